use async_trait::async_trait;
use curriculum_core::model::{LearnerId, PlanId, ProblemRecord, SessionPlan};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    /// The learner already has an open plan.
    #[error("learner already has open plan {0}")]
    Conflict(PlanId),

    #[error("connection error: {0}")]
    Connection(String),

    /// Record `index` of an append batch is older than the record before it.
    #[error("history record {index} of the batch is out of order")]
    OutOfOrder { index: usize },
}

/// Repository contract for session plans.
///
/// Implementations must make `create_if_absent` atomic per learner: it is
/// the only thing standing between two concurrent planning requests and two
/// open plans.
#[async_trait]
pub trait PlanRepository: Send + Sync {
    /// Insert `plan` unless its learner already has an open plan.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` carrying the open plan's id.
    async fn create_if_absent(&self, plan: &SessionPlan) -> Result<(), StorageError>;

    /// Overwrite a stored plan.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the plan was never created.
    async fn save(&self, plan: &SessionPlan) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get(&self, id: PlanId) -> Result<SessionPlan, StorageError>;

    /// The learner's open plan, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn active_for(&self, learner: LearnerId) -> Result<Option<SessionPlan>, StorageError>;
}

/// Append-only answered-problem history per learner.
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Append records after the learner's existing history.
    ///
    /// Stored history stays in non-decreasing `answered_at` order; a batch
    /// that would break it is refused whole.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::OutOfOrder` for a record older than its
    /// predecessor, or other errors if the records cannot be stored.
    async fn append(&self, learner: LearnerId, records: &[ProblemRecord])
    -> Result<(), StorageError>;

    /// Full history in the order it was appended.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn history_for(&self, learner: LearnerId) -> Result<Vec<ProblemRecord>, StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    plans: Arc<Mutex<HashMap<PlanId, SessionPlan>>>,
    history: Arc<Mutex<HashMap<LearnerId, Vec<ProblemRecord>>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanRepository for InMemoryRepository {
    async fn create_if_absent(&self, plan: &SessionPlan) -> Result<(), StorageError> {
        let mut guard = self
            .plans
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        if let Some(open) = guard
            .values()
            .find(|p| p.learner_id() == plan.learner_id() && p.status().is_open())
        {
            debug!(learner = %plan.learner_id(), existing = %open.id(), "open plan conflict");
            return Err(StorageError::Conflict(open.id()));
        }
        guard.insert(plan.id(), plan.clone());
        Ok(())
    }

    async fn save(&self, plan: &SessionPlan) -> Result<(), StorageError> {
        let mut guard = self
            .plans
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let slot = guard.get_mut(&plan.id()).ok_or(StorageError::NotFound)?;
        *slot = plan.clone();
        Ok(())
    }

    async fn get(&self, id: PlanId) -> Result<SessionPlan, StorageError> {
        let guard = self
            .plans
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn active_for(&self, learner: LearnerId) -> Result<Option<SessionPlan>, StorageError> {
        let guard = self
            .plans
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .values()
            .find(|p| p.learner_id() == learner && p.status().is_open())
            .cloned())
    }
}

#[async_trait]
impl HistoryRepository for InMemoryRepository {
    async fn append(
        &self,
        learner: LearnerId,
        records: &[ProblemRecord],
    ) -> Result<(), StorageError> {
        let mut guard = self
            .history
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let stored = guard.entry(learner).or_default();
        let mut previous = stored.last().map(ProblemRecord::answered_at);
        for (index, record) in records.iter().enumerate() {
            if previous.is_some_and(|at| record.answered_at() < at) {
                debug!(%learner, index, "refusing out-of-order history");
                return Err(StorageError::OutOfOrder { index });
            }
            previous = Some(record.answered_at());
        }
        stored.extend(records.iter().cloned());
        Ok(())
    }

    async fn history_for(&self, learner: LearnerId) -> Result<Vec<ProblemRecord>, StorageError> {
        let guard = self
            .history
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&learner).cloned().unwrap_or_default())
    }
}

/// Aggregates plan and history repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub plans: Arc<dyn PlanRepository>,
    pub history: Arc<dyn HistoryRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let plans: Arc<dyn PlanRepository> = Arc::new(repo.clone());
        let history: Arc<dyn HistoryRepository> = Arc::new(repo);
        Self { plans, history }
    }
}
