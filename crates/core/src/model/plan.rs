use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mode::SessionMode;
use crate::model::ids::{LearnerId, PlanId, SkillId};
use crate::model::part::{PartType, Purpose};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PlanError {
    #[error("a plan needs at least one part")]
    NoParts,
    #[error("part {0} has no slots")]
    EmptyPart(usize),
}

//
// ─── SLOTS & PARTS ─────────────────────────────────────────────────────────────
//

/// One planned problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub skill_id: SkillId,
    pub purpose: Purpose,
    pub terms: Vec<i64>,
    pub answer: i64,
}

/// Marker asking the surrounding app to run a game break after a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameBreak {
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub part_type: PartType,
    pub slots: Vec<Slot>,
    pub estimated_minutes: f64,
    #[serde(default)]
    pub game_break: Option<GameBreak>,
}

/// Position of a slot in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SlotRef {
    pub part: usize,
    pub slot: usize,
}

impl SlotRef {
    #[must_use]
    pub const fn new(part: usize, slot: usize) -> Self {
        Self { part, slot }
    }
}

//
// ─── RESULTS ───────────────────────────────────────────────────────────────────
//

/// A learner's answer to one slot, as reported by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAnswer {
    pub slot: SlotRef,
    pub student_answer: i64,
    /// Skills the problem actually exercised. Empty means the slot's skill.
    #[serde(default)]
    pub skills_exercised: Vec<SkillId>,
    pub response_time_ms: u64,
    #[serde(default)]
    pub had_help: bool,
    pub answered_at: DateTime<Utc>,
}

/// Recorded outcome for a slot. Append-only on the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotResult {
    pub slot: SlotRef,
    pub student_answer: i64,
    pub is_correct: bool,
    pub skills_exercised: Vec<SkillId>,
    pub response_time_ms: u64,
    pub had_help: bool,
    pub answered_at: DateTime<Utc>,
    /// True when this is a re-attempt of an earlier slot.
    #[serde(default)]
    pub is_redo: bool,
}

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BreakEndReason {
    Timeout,
    GameFinished,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BreakState {
    Active,
    Finished(BreakEndReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActiveState {
    AwaitingAnswer,
    /// The cursor moved into `next_part`; waiting for the app to resume.
    PartTransition { next_part: usize },
    GameBreak {
        after_part: usize,
        duration_minutes: u32,
        state: BreakState,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Completion {
    Finished,
    EndedEarly { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlanStatus {
    Draft,
    Approved,
    Active(ActiveState),
    Completed(Completion),
    Abandoned,
}

impl PlanStatus {
    /// Short label for logs and errors.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            PlanStatus::Draft => "draft",
            PlanStatus::Approved => "approved",
            PlanStatus::Active(ActiveState::AwaitingAnswer) => "active/awaiting-answer",
            PlanStatus::Active(ActiveState::PartTransition { .. }) => "active/part-transition",
            PlanStatus::Active(ActiveState::GameBreak {
                state: BreakState::Active,
                ..
            }) => "active/game-break",
            PlanStatus::Active(ActiveState::GameBreak {
                state: BreakState::Finished(_),
                ..
            }) => "active/game-break-finished",
            PlanStatus::Completed(Completion::Finished) => "completed",
            PlanStatus::Completed(Completion::EndedEarly { .. }) => "ended-early",
            PlanStatus::Abandoned => "abandoned",
        }
    }

    /// Not yet completed or abandoned. Such a plan blocks a new one.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlanStatus::Completed(_) | PlanStatus::Abandoned)
    }
}

//
// ─── PLAN ──────────────────────────────────────────────────────────────────────
//

/// Progress counters for display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanProgress {
    pub total_slots: usize,
    pub answered: usize,
    pub remaining: usize,
    pub correct: usize,
    pub accuracy: Option<f64>,
    pub pending_retries: usize,
    pub is_complete: bool,
}

/// A composed practice session and everything recorded against it.
///
/// State transitions live in [`crate::progress`]; this type only exposes
/// read access so the cursor, results and status cannot drift apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPlan {
    pub(crate) id: PlanId,
    pub(crate) learner_id: LearnerId,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) duration_minutes: u32,
    pub(crate) mode: SessionMode,
    pub(crate) parts: Vec<Part>,
    pub(crate) cursor: SlotRef,
    pub(crate) results: Vec<SlotResult>,
    pub(crate) pending_retries: Vec<SlotRef>,
    pub(crate) status: PlanStatus,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) ended_at: Option<DateTime<Utc>>,
}

impl SessionPlan {
    /// Build a draft plan.
    ///
    /// # Errors
    ///
    /// Returns `PlanError` when there are no parts or a part has no slots.
    pub fn new(
        id: PlanId,
        learner_id: LearnerId,
        mode: SessionMode,
        parts: Vec<Part>,
        duration_minutes: u32,
        created_at: DateTime<Utc>,
    ) -> Result<Self, PlanError> {
        if parts.is_empty() {
            return Err(PlanError::NoParts);
        }
        if let Some(index) = parts.iter().position(|p| p.slots.is_empty()) {
            return Err(PlanError::EmptyPart(index));
        }
        Ok(Self {
            id,
            learner_id,
            created_at,
            duration_minutes,
            mode,
            parts,
            cursor: SlotRef::default(),
            results: Vec::new(),
            pending_retries: Vec::new(),
            status: PlanStatus::Draft,
            started_at: None,
            ended_at: None,
        })
    }

    #[must_use]
    pub fn id(&self) -> PlanId {
        self.id
    }

    #[must_use]
    pub fn learner_id(&self) -> LearnerId {
        self.learner_id
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    /// Informational snapshot of the mode the plan was composed under.
    #[must_use]
    pub fn mode(&self) -> &SessionMode {
        &self.mode
    }

    #[must_use]
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    #[must_use]
    pub fn cursor(&self) -> SlotRef {
        self.cursor
    }

    #[must_use]
    pub fn results(&self) -> &[SlotResult] {
        &self.results
    }

    #[must_use]
    pub fn pending_retries(&self) -> &[SlotRef] {
        &self.pending_retries
    }

    #[must_use]
    pub fn status(&self) -> &PlanStatus {
        &self.status
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    #[must_use]
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    #[must_use]
    pub fn slot(&self, at: SlotRef) -> Option<&Slot> {
        self.parts.get(at.part)?.slots.get(at.slot)
    }

    /// The slot awaiting an answer, if the plan is still running.
    #[must_use]
    pub fn current_slot(&self) -> Option<&Slot> {
        match self.status {
            PlanStatus::Active(_) => self.slot(self.cursor),
            _ => None,
        }
    }

    #[must_use]
    pub fn total_slots(&self) -> usize {
        self.parts.iter().map(|p| p.slots.len()).sum()
    }

    #[must_use]
    pub fn estimated_minutes(&self) -> f64 {
        self.parts.iter().map(|p| p.estimated_minutes).sum()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self.status, PlanStatus::Completed(_))
    }

    /// Counters over first attempts; redo results are excluded.
    #[must_use]
    pub fn progress(&self) -> PlanProgress {
        let first: Vec<&SlotResult> = self.results.iter().filter(|r| !r.is_redo).collect();
        let answered = first.len();
        let correct = first.iter().filter(|r| r.is_correct).count();
        #[allow(clippy::cast_precision_loss)]
        let accuracy = (answered > 0).then(|| correct as f64 / answered as f64);
        let total_slots = self.total_slots();
        PlanProgress {
            total_slots,
            answered,
            remaining: total_slots.saturating_sub(answered),
            correct,
            accuracy,
            pending_retries: self.pending_retries.len(),
            is_complete: self.is_complete(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn mode() -> SessionMode {
        SessionMode::Maintenance {
            focus_description: "Building fluency".into(),
            skill_count: 0,
            deferred_progression: None,
        }
    }

    fn part(slots: usize) -> Part {
        Part {
            part_type: PartType::Abacus,
            slots: (0..slots)
                .map(|_| Slot {
                    skill_id: SkillId::new("basic.directAddition").unwrap(),
                    purpose: Purpose::Focus,
                    terms: vec![1, 2],
                    answer: 3,
                })
                .collect(),
            estimated_minutes: 1.0,
            game_break: None,
        }
    }

    #[test]
    fn rejects_empty_shapes() {
        let id = PlanId::generate();
        let learner = LearnerId::new(1);
        assert_eq!(
            SessionPlan::new(id, learner, mode(), vec![], 10, fixed_now()),
            Err(PlanError::NoParts)
        );
        assert_eq!(
            SessionPlan::new(id, learner, mode(), vec![part(2), part(0)], 10, fixed_now()),
            Err(PlanError::EmptyPart(1))
        );
    }

    #[test]
    fn new_plan_is_an_open_draft() {
        let plan = SessionPlan::new(
            PlanId::generate(),
            LearnerId::new(1),
            mode(),
            vec![part(2), part(3)],
            10,
            fixed_now(),
        )
        .unwrap();
        assert_eq!(plan.status(), &PlanStatus::Draft);
        assert!(plan.status().is_open());
        assert_eq!(plan.total_slots(), 5);
        assert!(plan.current_slot().is_none());
        assert_eq!(plan.progress().remaining, 5);
        assert_eq!(plan.progress().accuracy, None);
    }

    #[test]
    fn status_round_trips_through_json() {
        let status = PlanStatus::Active(ActiveState::GameBreak {
            after_part: 0,
            duration_minutes: 2,
            state: BreakState::Finished(BreakEndReason::GameFinished),
        });
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(serde_json::from_str::<PlanStatus>(&json).unwrap(), status);
        assert_eq!(status.label(), "active/game-break-finished");
    }
}
