use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::SkillId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProblemError {
    #[error("a problem must exercise at least one skill")]
    NoSkills,
    #[error("a problem must have at least one term")]
    NoTerms,
}

/// One answered problem. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemRecord {
    terms: Vec<i64>,
    correct_answer: i64,
    student_answer: i64,
    is_correct: bool,
    skills_exercised: Vec<SkillId>,
    response_time_ms: u64,
    had_help: bool,
    answered_at: DateTime<Utc>,
}

impl ProblemRecord {
    /// Creates a record; correctness is derived from the two answers.
    ///
    /// Duplicate skills are collapsed so a skill is never updated twice for
    /// one observation.
    ///
    /// # Errors
    ///
    /// Returns `ProblemError` if `terms` or `skills_exercised` is empty.
    pub fn new(
        terms: Vec<i64>,
        student_answer: i64,
        skills_exercised: Vec<SkillId>,
        response_time_ms: u64,
        had_help: bool,
        answered_at: DateTime<Utc>,
    ) -> Result<Self, ProblemError> {
        if terms.is_empty() {
            return Err(ProblemError::NoTerms);
        }
        let mut skills = Vec::with_capacity(skills_exercised.len());
        for skill in skills_exercised {
            if !skills.contains(&skill) {
                skills.push(skill);
            }
        }
        if skills.is_empty() {
            return Err(ProblemError::NoSkills);
        }
        let correct_answer = terms.iter().sum();
        Ok(Self {
            terms,
            correct_answer,
            student_answer,
            is_correct: student_answer == correct_answer,
            skills_exercised: skills,
            response_time_ms,
            had_help,
            answered_at,
        })
    }

    #[must_use]
    pub fn terms(&self) -> &[i64] {
        &self.terms
    }

    #[must_use]
    pub fn correct_answer(&self) -> i64 {
        self.correct_answer
    }

    #[must_use]
    pub fn student_answer(&self) -> i64 {
        self.student_answer
    }

    #[must_use]
    pub fn is_correct(&self) -> bool {
        self.is_correct
    }

    #[must_use]
    pub fn skills_exercised(&self) -> &[SkillId] {
        &self.skills_exercised
    }

    #[must_use]
    pub fn response_time_ms(&self) -> u64 {
        self.response_time_ms
    }

    #[must_use]
    pub fn had_help(&self) -> bool {
        self.had_help
    }

    #[must_use]
    pub fn answered_at(&self) -> DateTime<Utc> {
        self.answered_at
    }

    /// Seconds spent per term, or `None` without timing data.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn seconds_per_term(&self) -> Option<f64> {
        if self.response_time_ms == 0 {
            return None;
        }
        Some(self.response_time_ms as f64 / 1000.0 / self.terms.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn sid(raw: &str) -> SkillId {
        SkillId::new(raw).unwrap()
    }

    #[test]
    fn correctness_is_derived_from_terms() {
        let rec = ProblemRecord::new(
            vec![3, 4, -2],
            5,
            vec![sid("basic.directAddition")],
            6_000,
            false,
            fixed_now(),
        )
        .unwrap();
        assert_eq!(rec.correct_answer(), 5);
        assert!(rec.is_correct());
        assert_eq!(rec.seconds_per_term(), Some(2.0));
    }

    #[test]
    fn rejects_empty_skill_list_and_dedupes() {
        assert_eq!(
            ProblemRecord::new(vec![1], 1, vec![], 0, false, fixed_now()).unwrap_err(),
            ProblemError::NoSkills
        );
        let rec = ProblemRecord::new(
            vec![1, 1],
            3,
            vec![sid("a.b"), sid("a.b")],
            0,
            false,
            fixed_now(),
        )
        .unwrap();
        assert_eq!(rec.skills_exercised().len(), 1);
        assert!(!rec.is_correct());
        assert_eq!(rec.seconds_per_term(), None);
    }
}
