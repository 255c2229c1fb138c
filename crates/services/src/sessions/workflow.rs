use std::sync::Arc;

use rand::Rng;
use tracing::{info, warn};

use curriculum_core::Clock;
use curriculum_core::config::EngineConfig;
use curriculum_core::history::{MasterySnapshot, compute_mastery};
use curriculum_core::mode::{LearnerProfile, ModeInputs, SessionMode, select_mode};
use curriculum_core::model::{
    BreakEndReason, CurriculumGraph, LearnerId, PlanId, PlanStatus, SessionPlan, SkillCatalog,
    SlotAnswer,
};
use curriculum_core::progress::{ProgressError, RecordOutcome, RedoOutcome};
use curriculum_core::readiness::ReadinessEvaluator;
use storage::repository::{HistoryRepository, PlanRepository, Storage, StorageError};

use super::compose::{ComposeContext, PlanComposer, PlanRequest};
use crate::error::{ComposeError, PlanningError};

/// Orchestrates planning and answering against persisted plans and history.
#[derive(Clone)]
pub struct PlanningService {
    clock: Clock,
    plans: Arc<dyn PlanRepository>,
    history: Arc<dyn HistoryRepository>,
    catalog: Arc<SkillCatalog>,
    curriculum: Arc<CurriculumGraph>,
    config: Arc<EngineConfig>,
    composer: Arc<PlanComposer>,
}

impl PlanningService {
    /// # Errors
    ///
    /// Returns `PlanningError::Config` if `config` does not validate.
    pub fn new(
        clock: Clock,
        storage: &Storage,
        catalog: SkillCatalog,
        curriculum: CurriculumGraph,
        config: EngineConfig,
    ) -> Result<Self, PlanningError> {
        Ok(Self {
            clock,
            plans: Arc::clone(&storage.plans),
            history: Arc::clone(&storage.history),
            catalog: Arc::new(catalog),
            curriculum: Arc::new(curriculum),
            composer: Arc::new(PlanComposer::new(&config)?),
            config: Arc::new(config),
        })
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn catalog(&self) -> &SkillCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replay the learner's stored history.
    ///
    /// # Errors
    ///
    /// Returns `PlanningError` for storage failures or out-of-order history.
    pub async fn mastery(&self, learner: LearnerId) -> Result<MasterySnapshot, PlanningError> {
        let history = self.history.history_for(learner).await?;
        Ok(compute_mastery(
            &history,
            &self.config.priors,
            &self.config.history,
        )?)
    }

    /// Decide the next session's mode from current mastery.
    ///
    /// # Errors
    ///
    /// Returns `PlanningError` if history cannot be loaded or replayed.
    pub async fn select_mode(
        &self,
        learner: LearnerId,
        profile: &LearnerProfile,
    ) -> Result<SessionMode, PlanningError> {
        let snapshot = self.mastery(learner).await?;
        Ok(self.mode_for(profile, &snapshot))
    }

    fn mode_for(&self, profile: &LearnerProfile, snapshot: &MasterySnapshot) -> SessionMode {
        let readiness = ReadinessEvaluator::new(self.config.readiness.clone());
        select_mode(
            ModeInputs {
                catalog: &self.catalog,
                curriculum: &self.curriculum,
                profile,
                snapshot,
                priors: &self.config.priors,
                readiness: &readiness,
            },
            &self.config.mode,
        )
    }

    /// The learner's open plan, for resuming.
    ///
    /// # Errors
    ///
    /// Returns `PlanningError::Storage` on backend failures.
    pub async fn resume(&self, learner: LearnerId) -> Result<Option<SessionPlan>, PlanningError> {
        Ok(self.plans.active_for(learner).await?)
    }

    /// Replay history, pick a mode, compose a draft plan and store it.
    ///
    /// # Errors
    ///
    /// Returns `ComposeError::ActiveSessionExists` (carrying the open plan)
    /// if the learner already has one, including when another request won
    /// the race to create it.
    pub async fn plan_session(
        &self,
        learner: LearnerId,
        profile: &LearnerProfile,
        request: &PlanRequest,
        rng: &mut impl Rng,
    ) -> Result<SessionPlan, PlanningError> {
        let active = self.plans.active_for(learner).await?;
        let snapshot = self.mastery(learner).await?;
        let mode = self.mode_for(profile, &snapshot);

        let ctx = ComposeContext {
            learner,
            catalog: &self.catalog,
            profile,
            snapshot: &snapshot,
            mode: &mode,
            active_plan: active.as_ref(),
            now: self.clock.now(),
        };
        let plan = self.composer.compose(request, &ctx, rng)?;

        match self.plans.create_if_absent(&plan).await {
            Ok(()) => Ok(plan),
            Err(StorageError::Conflict(existing_id)) => {
                warn!(%learner, existing = %existing_id, "lost race to create plan");
                let existing = self.plans.get(existing_id).await?;
                Err(ComposeError::ActiveSessionExists {
                    existing: Box::new(existing),
                }
                .into())
            }
            Err(e) => Err(e.into()),
        }
    }

    // Load, check ownership, mutate and persist. History is appended before
    // the completed plan is saved so a refused append leaves the plan open.
    async fn update<T>(
        &self,
        learner: LearnerId,
        id: PlanId,
        apply: impl FnOnce(&mut SessionPlan) -> Result<T, ProgressError>,
    ) -> Result<(SessionPlan, T), PlanningError> {
        let mut plan = self.plans.get(id).await?;
        if plan.learner_id() != learner {
            warn!(
                %learner,
                plan = %id,
                owner = %plan.learner_id(),
                "plan owned by another learner"
            );
            return Err(PlanningError::WrongLearner(id));
        }
        let was_completed = matches!(plan.status(), PlanStatus::Completed(_));
        let out = apply(&mut plan)?;
        if !was_completed && matches!(plan.status(), PlanStatus::Completed(_)) {
            let records = plan.problem_records()?;
            self.history.append(learner, &records).await?;
            info!(
                plan = %plan.id(),
                %learner,
                records = records.len(),
                "plan results appended to history"
            );
        }
        self.plans.save(&plan).await?;
        Ok((plan, out))
    }

    /// # Errors
    ///
    /// Returns `PlanningError` for invalid transitions, a plan owned by
    /// another learner, or storage failures.
    pub async fn approve(
        &self,
        learner: LearnerId,
        id: PlanId,
    ) -> Result<SessionPlan, PlanningError> {
        Ok(self.update(learner, id, SessionPlan::approve).await?.0)
    }

    /// # Errors
    ///
    /// Returns `PlanningError` for invalid transitions, a plan owned by
    /// another learner, or storage failures.
    pub async fn start(
        &self,
        learner: LearnerId,
        id: PlanId,
    ) -> Result<SessionPlan, PlanningError> {
        let now = self.clock.now();
        Ok(self.update(learner, id, |plan| plan.start(now)).await?.0)
    }

    /// Record a first-attempt answer, stamped with the service clock.
    /// Completing the plan appends its results to the learner's history.
    ///
    /// # Errors
    ///
    /// Returns `PlanningError` for invalid transitions, a plan owned by
    /// another learner, or storage failures.
    pub async fn record_answer(
        &self,
        learner: LearnerId,
        id: PlanId,
        mut answer: SlotAnswer,
    ) -> Result<(SessionPlan, RecordOutcome), PlanningError> {
        answer.answered_at = self.clock.now();
        self.update(learner, id, |plan| plan.record(answer)).await
    }

    /// Record a re-attempt, stamped with the service clock.
    ///
    /// # Errors
    ///
    /// Returns `PlanningError` for invalid transitions, a plan owned by
    /// another learner, or storage failures.
    pub async fn record_redo(
        &self,
        learner: LearnerId,
        id: PlanId,
        original: usize,
        mut answer: SlotAnswer,
    ) -> Result<(SessionPlan, RedoOutcome), PlanningError> {
        answer.answered_at = self.clock.now();
        self.update(learner, id, |plan| plan.record_redo(original, answer))
            .await
    }

    /// # Errors
    ///
    /// Returns `PlanningError` for invalid transitions, a plan owned by
    /// another learner, or storage failures.
    pub async fn part_transition_complete(
        &self,
        learner: LearnerId,
        id: PlanId,
    ) -> Result<SessionPlan, PlanningError> {
        Ok(self
            .update(learner, id, SessionPlan::part_transition_complete)
            .await?
            .0)
    }

    /// # Errors
    ///
    /// Returns `PlanningError` for invalid transitions, a plan owned by
    /// another learner, or storage failures.
    pub async fn break_finished(
        &self,
        learner: LearnerId,
        id: PlanId,
        reason: BreakEndReason,
    ) -> Result<SessionPlan, PlanningError> {
        Ok(self
            .update(learner, id, |plan| plan.break_finished(reason))
            .await?
            .0)
    }

    /// # Errors
    ///
    /// Returns `PlanningError` for invalid transitions, a plan owned by
    /// another learner, or storage failures.
    pub async fn break_results_acked(
        &self,
        learner: LearnerId,
        id: PlanId,
    ) -> Result<SessionPlan, PlanningError> {
        Ok(self
            .update(learner, id, SessionPlan::break_results_acked)
            .await?
            .0)
    }

    /// Stop early; answered slots still count toward history.
    ///
    /// # Errors
    ///
    /// Returns `PlanningError` for invalid transitions, a plan owned by
    /// another learner, or storage failures.
    pub async fn end_early(
        &self,
        learner: LearnerId,
        id: PlanId,
        reason: impl Into<String>,
    ) -> Result<SessionPlan, PlanningError> {
        let now = self.clock.now();
        let reason = reason.into();
        Ok(self
            .update(learner, id, |plan| plan.end_early(reason, now))
            .await?
            .0)
    }

    /// Drop the plan without touching history.
    ///
    /// # Errors
    ///
    /// Returns `PlanningError` for invalid transitions, a plan owned by
    /// another learner, or storage failures.
    pub async fn abandon(
        &self,
        learner: LearnerId,
        id: PlanId,
    ) -> Result<SessionPlan, PlanningError> {
        let now = self.clock.now();
        Ok(self.update(learner, id, |plan| plan.abandon(now)).await?.0)
    }
}
