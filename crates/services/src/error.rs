//! Shared error types for the services crate.

use thiserror::Error;

use curriculum_core::config::ConfigError;
use curriculum_core::history::HistoryError;
use curriculum_core::model::{PlanError, PlanId, ProblemError, SessionPlan};
use curriculum_core::progress::ProgressError;
use storage::repository::StorageError;

/// Errors emitted by `PlanComposer`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ComposeError {
    #[error("no part or skill is enabled for practice")]
    NoSkillsEnabled,
    /// The learner must resume or abandon this plan first.
    #[error("learner already has open plan {}", .existing.id())]
    ActiveSessionExists { existing: Box<SessionPlan> },
    #[error("session duration must be at least one minute")]
    InvalidDuration,
    #[error(transparent)]
    Plan(#[from] PlanError),
}

impl ComposeError {
    /// The open plan that blocked composition, if that was the cause.
    #[must_use]
    pub fn existing_plan(&self) -> Option<&SessionPlan> {
        match self {
            ComposeError::ActiveSessionExists { existing } => Some(existing),
            _ => None,
        }
    }
}

/// Errors emitted by `PlanningService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PlanningError {
    #[error("invalid engine config: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Compose(#[from] ComposeError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Problem(#[from] ProblemError),
    #[error("plan {0} belongs to another learner")]
    WrongLearner(PlanId),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
