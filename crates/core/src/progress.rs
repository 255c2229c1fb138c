//! Session plan state machine.
//!
//! ```text
//! draft -> approved -> active -> completed (finished | ended early)
//!                         |   \-> abandoned
//!                         +-- awaiting answer <-> part transition
//!                         +-- game break: active -> finished -> (ack) awaiting answer
//! ```

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{
    ActiveState, BreakEndReason, BreakState, Completion, PlanStatus, ProblemError, ProblemRecord,
    SessionPlan, SlotAnswer, SlotRef, SlotResult,
};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("cannot {action} a plan that is {from}")]
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },

    #[error("answer targets slot {found:?} but the plan is waiting on {expected:?}")]
    SlotMismatch { expected: SlotRef, found: SlotRef },

    #[error("plan has no slot {0:?}")]
    UnknownSlot(SlotRef),

    #[error("plan has no result {0}")]
    UnknownResult(usize),

    #[error("answer stamped {found} precedes {earliest}")]
    AnsweredTooEarly {
        earliest: DateTime<Utc>,
        found: DateTime<Utc>,
    },
}

//
// ─── OUTCOMES ──────────────────────────────────────────────────────────────────
//

/// What happened after a first-attempt answer was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Next slot is in the same part.
    Advanced,
    /// Cursor moved into a new part; call `part_transition_complete`.
    PartTransition { next_part: usize },
    /// The finished part carries a game break.
    BreakStarted {
        after_part: usize,
        duration_minutes: u32,
    },
    /// That was the last slot.
    Completed,
}

/// What a redo did to the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedoOutcome {
    /// Stored as a redo result; retry accounting unchanged.
    Recorded,
    /// Original was wrong, redo was right: stored and the retry cleared.
    Redeemed,
    /// Original was right, redo was wrong: nothing stored.
    Ignored,
}

//
// ─── TRANSITIONS ───────────────────────────────────────────────────────────────
//

impl SessionPlan {
    fn invalid(&self, action: &'static str) -> ProgressError {
        ProgressError::InvalidTransition {
            from: self.status.label(),
            action,
        }
    }

    // Answers must not predate the start or the previous result, or the
    // appended history could not be replayed.
    fn check_answer_time(&self, at: DateTime<Utc>) -> Result<(), ProgressError> {
        let earliest = self
            .results
            .last()
            .map(|r| r.answered_at)
            .into_iter()
            .chain(self.started_at)
            .max();
        match earliest {
            Some(earliest) if at < earliest => {
                Err(ProgressError::AnsweredTooEarly { earliest, found: at })
            }
            _ => Ok(()),
        }
    }

    fn to_result(&self, answer: SlotAnswer, is_redo: bool) -> Result<SlotResult, ProgressError> {
        let slot = self
            .slot(answer.slot)
            .ok_or(ProgressError::UnknownSlot(answer.slot))?;
        let skills_exercised = if answer.skills_exercised.is_empty() {
            vec![slot.skill_id.clone()]
        } else {
            answer.skills_exercised
        };
        Ok(SlotResult {
            slot: answer.slot,
            is_correct: answer.student_answer == slot.answer,
            student_answer: answer.student_answer,
            skills_exercised,
            response_time_ms: answer.response_time_ms,
            had_help: answer.had_help,
            answered_at: answer.answered_at,
            is_redo,
        })
    }

    /// # Errors
    ///
    /// `InvalidTransition` unless the plan is a draft.
    pub fn approve(&mut self) -> Result<(), ProgressError> {
        if self.status != PlanStatus::Draft {
            return Err(self.invalid("approve"));
        }
        self.status = PlanStatus::Approved;
        Ok(())
    }

    /// # Errors
    ///
    /// `InvalidTransition` unless the plan is approved.
    pub fn start(&mut self, at: DateTime<Utc>) -> Result<(), ProgressError> {
        if self.status != PlanStatus::Approved {
            return Err(self.invalid("start"));
        }
        self.status = PlanStatus::Active(ActiveState::AwaitingAnswer);
        self.started_at = Some(at);
        info!(plan = %self.id, learner = %self.learner_id, "plan started");
        Ok(())
    }

    /// Record the answer to the slot under the cursor and advance.
    ///
    /// Incorrect answers are queued for retry.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless awaiting an answer, `SlotMismatch` if the
    /// answer is for a different slot, `AnsweredTooEarly` if it is stamped
    /// before the start or the previous result.
    pub fn record(&mut self, answer: SlotAnswer) -> Result<RecordOutcome, ProgressError> {
        if self.status != PlanStatus::Active(ActiveState::AwaitingAnswer) {
            return Err(self.invalid("record an answer on"));
        }
        if answer.slot != self.cursor {
            return Err(ProgressError::SlotMismatch {
                expected: self.cursor,
                found: answer.slot,
            });
        }
        self.check_answer_time(answer.answered_at)?;
        let at = answer.answered_at;
        let result = self.to_result(answer, false)?;
        if !result.is_correct {
            self.pending_retries.push(result.slot);
        }
        debug!(
            plan = %self.id,
            part = result.slot.part,
            slot = result.slot.slot,
            correct = result.is_correct,
            "slot answered"
        );
        self.results.push(result);

        let SlotRef { part, slot } = self.cursor;
        let part_len = self.parts[part].slots.len();
        if slot + 1 < part_len {
            self.cursor = SlotRef::new(part, slot + 1);
            return Ok(RecordOutcome::Advanced);
        }

        let next_part = part + 1;
        if next_part >= self.parts.len() {
            self.status = PlanStatus::Completed(Completion::Finished);
            self.ended_at = Some(at);
            info!(plan = %self.id, results = self.results.len(), "plan completed");
            return Ok(RecordOutcome::Completed);
        }

        self.cursor = SlotRef::new(next_part, 0);
        if let Some(game_break) = self.parts[part].game_break {
            self.status = PlanStatus::Active(ActiveState::GameBreak {
                after_part: part,
                duration_minutes: game_break.duration_minutes,
                state: BreakState::Active,
            });
            return Ok(RecordOutcome::BreakStarted {
                after_part: part,
                duration_minutes: game_break.duration_minutes,
            });
        }
        self.status = PlanStatus::Active(ActiveState::PartTransition { next_part });
        Ok(RecordOutcome::PartTransition { next_part })
    }

    /// Record a re-attempt of the slot behind result `original`. Never moves
    /// the cursor.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless the plan is active, `UnknownResult` for a
    /// bad index, `SlotMismatch` if the redo is for another slot,
    /// `AnsweredTooEarly` for a stamp before the previous result.
    pub fn record_redo(
        &mut self,
        original: usize,
        answer: SlotAnswer,
    ) -> Result<RedoOutcome, ProgressError> {
        if !matches!(self.status, PlanStatus::Active(_)) {
            return Err(self.invalid("record a redo on"));
        }
        let first = self
            .results
            .get(original)
            .ok_or(ProgressError::UnknownResult(original))?;
        if first.slot != answer.slot {
            return Err(ProgressError::SlotMismatch {
                expected: first.slot,
                found: answer.slot,
            });
        }
        self.check_answer_time(answer.answered_at)?;
        let was_correct = first.is_correct;
        let redo = self.to_result(answer, true)?;

        let outcome = match (was_correct, redo.is_correct) {
            (true, false) => return Ok(RedoOutcome::Ignored),
            (false, true) => {
                if let Some(i) = self.pending_retries.iter().position(|s| *s == redo.slot) {
                    self.pending_retries.remove(i);
                }
                RedoOutcome::Redeemed
            }
            _ => RedoOutcome::Recorded,
        };
        debug!(plan = %self.id, slot = ?redo.slot, ?outcome, "redo recorded");
        self.results.push(redo);
        Ok(outcome)
    }

    /// # Errors
    ///
    /// `InvalidTransition` unless in a part transition.
    pub fn part_transition_complete(&mut self) -> Result<(), ProgressError> {
        if !matches!(
            self.status,
            PlanStatus::Active(ActiveState::PartTransition { .. })
        ) {
            return Err(self.invalid("complete a part transition on"));
        }
        self.status = PlanStatus::Active(ActiveState::AwaitingAnswer);
        Ok(())
    }

    /// # Errors
    ///
    /// `InvalidTransition` unless a game break is running.
    pub fn break_finished(&mut self, reason: BreakEndReason) -> Result<(), ProgressError> {
        let PlanStatus::Active(ActiveState::GameBreak {
            after_part,
            duration_minutes,
            state: BreakState::Active,
        }) = self.status
        else {
            return Err(self.invalid("finish a break on"));
        };
        self.status = PlanStatus::Active(ActiveState::GameBreak {
            after_part,
            duration_minutes,
            state: BreakState::Finished(reason),
        });
        debug!(plan = %self.id, ?reason, "game break finished");
        Ok(())
    }

    /// Acknowledge break results and resume answering.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless a game break has finished.
    pub fn break_results_acked(&mut self) -> Result<(), ProgressError> {
        if !matches!(
            self.status,
            PlanStatus::Active(ActiveState::GameBreak {
                state: BreakState::Finished(_),
                ..
            })
        ) {
            return Err(self.invalid("acknowledge break results on"));
        }
        self.status = PlanStatus::Active(ActiveState::AwaitingAnswer);
        Ok(())
    }

    /// Deliberate stop by the learner or instructor.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless the plan is active.
    pub fn end_early(
        &mut self,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<(), ProgressError> {
        if !matches!(self.status, PlanStatus::Active(_)) {
            return Err(self.invalid("end early"));
        }
        let reason = reason.into();
        info!(plan = %self.id, %reason, "plan ended early");
        self.status = PlanStatus::Completed(Completion::EndedEarly { reason });
        self.ended_at = Some(at);
        Ok(())
    }

    /// The learner navigated away. Allowed from any open state.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` if the plan is already completed or abandoned.
    pub fn abandon(&mut self, at: DateTime<Utc>) -> Result<(), ProgressError> {
        if self.status.is_terminal() {
            return Err(self.invalid("abandon"));
        }
        info!(plan = %self.id, from = self.status.label(), "plan abandoned");
        self.status = PlanStatus::Abandoned;
        self.ended_at = Some(at);
        Ok(())
    }

    /// Convert every stored result into a history record, in answer order.
    ///
    /// # Errors
    ///
    /// Propagates `ProblemError`; cannot happen for results built by
    /// `record`/`record_redo`.
    pub fn problem_records(&self) -> Result<Vec<ProblemRecord>, ProblemError> {
        self.results
            .iter()
            .filter_map(|r| self.slot(r.slot).map(|slot| (r, slot)))
            .map(|(r, slot)| {
                ProblemRecord::new(
                    slot.terms.clone(),
                    r.student_answer,
                    r.skills_exercised.clone(),
                    r.response_time_ms,
                    r.had_help,
                    r.answered_at,
                )
            })
            .collect()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::SessionMode;
    use crate::model::{GameBreak, LearnerId, Part, PartType, PlanId, Purpose, SkillId, Slot};
    use crate::time::fixed_now;
    use chrono::Duration;

    fn slot(a: i64, b: i64) -> Slot {
        Slot {
            skill_id: SkillId::new("basic.directAddition").unwrap(),
            purpose: Purpose::Focus,
            terms: vec![a, b],
            answer: a + b,
        }
    }

    fn part(part_type: PartType, slots: usize, game_break: Option<GameBreak>) -> Part {
        Part {
            part_type,
            slots: (0..slots).map(|i| slot(1, i as i64)).collect(),
            estimated_minutes: 2.0,
            game_break,
        }
    }

    fn active_plan(parts: Vec<Part>) -> SessionPlan {
        let mut plan = SessionPlan::new(
            PlanId::generate(),
            LearnerId::new(7),
            SessionMode::Maintenance {
                focus_description: "Building fluency".into(),
                skill_count: 0,
                deferred_progression: None,
            },
            parts,
            10,
            fixed_now(),
        )
        .unwrap();
        plan.approve().unwrap();
        plan.start(fixed_now()).unwrap();
        plan
    }

    fn answer(plan: &SessionPlan, at: SlotRef, correct: bool, minute: i64) -> SlotAnswer {
        let expected = plan.slot(at).unwrap().answer;
        SlotAnswer {
            slot: at,
            student_answer: if correct { expected } else { expected + 1 },
            skills_exercised: Vec::new(),
            response_time_ms: 3_000,
            had_help: false,
            answered_at: fixed_now() + Duration::minutes(minute),
        }
    }

    #[test]
    fn lifecycle_requires_approval_before_start() {
        let mut plan = SessionPlan::new(
            PlanId::generate(),
            LearnerId::new(1),
            SessionMode::Maintenance {
                focus_description: String::new(),
                skill_count: 0,
                deferred_progression: None,
            },
            vec![part(PartType::Abacus, 1, None)],
            5,
            fixed_now(),
        )
        .unwrap();
        assert_eq!(
            plan.start(fixed_now()),
            Err(ProgressError::InvalidTransition {
                from: "draft",
                action: "start"
            })
        );
        plan.approve().unwrap();
        assert!(plan.approve().is_err());
        plan.start(fixed_now()).unwrap();
        assert_eq!(plan.started_at(), Some(fixed_now()));
    }

    #[test]
    fn walks_parts_with_transitions_and_completes() {
        let mut plan = active_plan(vec![
            part(PartType::Abacus, 2, None),
            part(PartType::Linear, 1, None),
        ]);

        let a = answer(&plan, SlotRef::new(0, 0), true, 1);
        assert_eq!(plan.record(a), Ok(RecordOutcome::Advanced));
        let a = answer(&plan, SlotRef::new(0, 1), true, 2);
        assert_eq!(
            plan.record(a),
            Ok(RecordOutcome::PartTransition { next_part: 1 })
        );

        // Answers are refused until the app resumes.
        let a = answer(&plan, SlotRef::new(1, 0), true, 3);
        assert!(matches!(
            plan.record(a.clone()),
            Err(ProgressError::InvalidTransition { .. })
        ));
        plan.part_transition_complete().unwrap();
        assert_eq!(plan.record(a), Ok(RecordOutcome::Completed));
        assert_eq!(plan.status(), &PlanStatus::Completed(Completion::Finished));
        assert_eq!(plan.ended_at(), Some(fixed_now() + Duration::minutes(3)));
        assert!(plan.progress().is_complete);
        assert_eq!(plan.progress().accuracy, Some(1.0));
    }

    #[test]
    fn wrong_slot_is_rejected() {
        let mut plan = active_plan(vec![part(PartType::Abacus, 3, None)]);
        let a = answer(&plan, SlotRef::new(0, 2), true, 1);
        assert_eq!(
            plan.record(a),
            Err(ProgressError::SlotMismatch {
                expected: SlotRef::new(0, 0),
                found: SlotRef::new(0, 2)
            })
        );
        assert!(plan.results().is_empty());
    }

    #[test]
    fn answers_cannot_go_back_in_time() {
        let mut plan = active_plan(vec![part(PartType::Abacus, 3, None)]);
        let first = answer(&plan, SlotRef::new(0, 0), false, 100);
        plan.record(first).unwrap();

        let late = answer(&plan, SlotRef::new(0, 1), true, 99);
        assert_eq!(
            plan.record(late),
            Err(ProgressError::AnsweredTooEarly {
                earliest: fixed_now() + Duration::minutes(100),
                found: fixed_now() + Duration::minutes(99),
            })
        );
        assert_eq!(plan.results().len(), 1);
        assert_eq!(plan.cursor(), SlotRef::new(0, 1));

        let redo = answer(&plan, SlotRef::new(0, 0), true, 50);
        assert!(matches!(
            plan.record_redo(0, redo),
            Err(ProgressError::AnsweredTooEarly { .. })
        ));
        assert_eq!(plan.pending_retries(), &[SlotRef::new(0, 0)]);

        let same_minute = answer(&plan, SlotRef::new(0, 1), true, 100);
        assert_eq!(plan.record(same_minute), Ok(RecordOutcome::Advanced));
    }

    #[test]
    fn answer_before_start_is_rejected() {
        let mut plan = active_plan(vec![part(PartType::Abacus, 1, None)]);
        let early = answer(&plan, SlotRef::new(0, 0), true, -5);
        assert!(matches!(
            plan.record(early),
            Err(ProgressError::AnsweredTooEarly { .. })
        ));
        assert!(plan.results().is_empty());
    }

    #[test]
    fn game_break_needs_finish_and_ack() {
        let mut plan = active_plan(vec![
            part(
                PartType::Abacus,
                1,
                Some(GameBreak {
                    duration_minutes: 2,
                }),
            ),
            part(PartType::Visualization, 1, None),
        ]);
        let a = answer(&plan, SlotRef::new(0, 0), true, 1);
        assert_eq!(
            plan.record(a),
            Ok(RecordOutcome::BreakStarted {
                after_part: 0,
                duration_minutes: 2
            })
        );
        assert!(plan.break_results_acked().is_err());
        plan.break_finished(BreakEndReason::Timeout).unwrap();
        assert!(plan.break_finished(BreakEndReason::Skipped).is_err());
        plan.break_results_acked().unwrap();
        assert_eq!(
            plan.status(),
            &PlanStatus::Active(ActiveState::AwaitingAnswer)
        );
        assert_eq!(plan.cursor(), SlotRef::new(1, 0));
    }

    #[test]
    fn incorrect_then_correct_redo_is_redeemed() {
        let mut plan = active_plan(vec![part(PartType::Abacus, 3, None)]);
        let a = answer(&plan, SlotRef::new(0, 0), false, 1);
        plan.record(a).unwrap();
        assert_eq!(plan.pending_retries(), &[SlotRef::new(0, 0)]);

        let cursor = plan.cursor();
        let redo = answer(&plan, SlotRef::new(0, 0), true, 2);
        assert_eq!(plan.record_redo(0, redo), Ok(RedoOutcome::Redeemed));
        assert!(plan.pending_retries().is_empty());
        assert_eq!(plan.cursor(), cursor);
        assert_eq!(plan.results().len(), 2);
        assert!(plan.results()[1].is_redo);
        // Redo results do not count as answered slots.
        assert_eq!(plan.progress().answered, 1);
    }

    #[test]
    fn correct_then_incorrect_redo_records_nothing() {
        let mut plan = active_plan(vec![part(PartType::Abacus, 3, None)]);
        let a = answer(&plan, SlotRef::new(0, 0), true, 1);
        plan.record(a).unwrap();

        let redo = answer(&plan, SlotRef::new(0, 0), false, 2);
        assert_eq!(plan.record_redo(0, redo), Ok(RedoOutcome::Ignored));
        assert_eq!(plan.results().len(), 1);
    }

    #[test]
    fn incorrect_redo_keeps_retry_pending() {
        let mut plan = active_plan(vec![part(PartType::Abacus, 3, None)]);
        let a = answer(&plan, SlotRef::new(0, 0), false, 1);
        plan.record(a).unwrap();
        let redo = answer(&plan, SlotRef::new(0, 0), false, 2);
        assert_eq!(plan.record_redo(0, redo), Ok(RedoOutcome::Recorded));
        assert_eq!(plan.pending_retries().len(), 1);
        assert_eq!(plan.results().len(), 2);
    }

    #[test]
    fn redo_must_match_original_slot() {
        let mut plan = active_plan(vec![part(PartType::Abacus, 3, None)]);
        let a = answer(&plan, SlotRef::new(0, 0), false, 1);
        plan.record(a).unwrap();
        let redo = answer(&plan, SlotRef::new(0, 1), true, 2);
        assert!(matches!(
            plan.record_redo(0, redo.clone()),
            Err(ProgressError::SlotMismatch { .. })
        ));
        assert_eq!(
            plan.record_redo(5, redo),
            Err(ProgressError::UnknownResult(5))
        );
    }

    #[test]
    fn end_early_and_abandon_are_distinct_terminals() {
        let mut ended = active_plan(vec![part(PartType::Abacus, 3, None)]);
        ended.end_early("instructor stopped", fixed_now()).unwrap();
        assert_eq!(
            ended.status(),
            &PlanStatus::Completed(Completion::EndedEarly {
                reason: "instructor stopped".into()
            })
        );
        assert!(ended.abandon(fixed_now()).is_err());

        let mut left = active_plan(vec![part(PartType::Abacus, 3, None)]);
        left.abandon(fixed_now()).unwrap();
        assert_eq!(left.status(), &PlanStatus::Abandoned);
        assert!(left.end_early("late", fixed_now()).is_err());
    }

    #[test]
    fn results_convert_to_history_records() {
        let mut plan = active_plan(vec![part(PartType::Abacus, 2, None)]);
        let a = answer(&plan, SlotRef::new(0, 0), false, 1);
        plan.record(a).unwrap();
        let a = answer(&plan, SlotRef::new(0, 1), true, 2);
        plan.record(a).unwrap();

        let records = plan.problem_records().unwrap();
        assert_eq!(records.len(), 2);
        assert!(!records[0].is_correct());
        assert!(records[1].is_correct());
        assert_eq!(records[1].terms(), &[1, 1]);
        assert_eq!(
            records[0].skills_exercised(),
            &[SkillId::new("basic.directAddition").unwrap()]
        );
    }
}
