//! Four-gate readiness check: mastery, volume, speed, consistency.
//!
//! A skill is *solid* only when every gate passes. Sets of skills are judged
//! by their worst member on each dimension, so one weak prerequisite blocks
//! the whole set.

use serde::{Deserialize, Serialize};

use crate::bkt::SkillPriors;
use crate::history::{MasterySnapshot, MasteryState, RecentWindow};
use crate::model::SkillId;

//
// ─── THRESHOLDS ────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessThresholds {
    pub p_known_threshold: f64,
    pub confidence_threshold: f64,
    pub min_opportunities: u32,
    /// Maximum median seconds per term.
    pub speed_threshold: f64,
    pub accuracy_threshold: f64,
    pub accuracy_window_size: usize,
    /// Length of the "last N all correct" streak that is reported.
    pub streak_length: usize,
    /// Help uses in the accuracy window must stay below this.
    pub help_cap: u32,
}

impl Default for ReadinessThresholds {
    fn default() -> Self {
        Self {
            p_known_threshold: 0.8,
            confidence_threshold: 0.5,
            min_opportunities: 20,
            speed_threshold: 4.0,
            accuracy_threshold: 0.85,
            accuracy_window_size: 10,
            streak_length: 5,
            help_cap: 3,
        }
    }
}

//
// ─── RESULT ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MasteryGate {
    pub p_known: f64,
    pub confidence: f64,
    pub met: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeGate {
    pub opportunities: u32,
    pub required: u32,
    pub met: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedGate {
    /// `None` when no timing samples exist; never met in that case.
    pub median_seconds_per_term: Option<f64>,
    pub met: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyGate {
    pub recent_accuracy: Option<f64>,
    pub attempts_considered: usize,
    pub last_streak_all_correct: bool,
    pub recent_help_count: u32,
    pub met: bool,
}

/// Readiness verdict for one skill or the worst case over a set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessResult {
    pub skills: Vec<SkillId>,
    pub mastery: MasteryGate,
    pub volume: VolumeGate,
    pub speed: SpeedGate,
    pub consistency: ConsistencyGate,
    pub is_solid: bool,
}

impl ReadinessResult {
    /// Number of gates that passed, 0..=4.
    #[must_use]
    pub fn gates_met(&self) -> u8 {
        u8::from(self.mastery.met)
            + u8::from(self.volume.met)
            + u8::from(self.speed.met)
            + u8::from(self.consistency.met)
    }
}

// Raw dimension values before gating; aggregation happens on these.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Dimensions {
    p_known: f64,
    confidence: f64,
    opportunities: u32,
    median_seconds_per_term: Option<f64>,
    recent_accuracy: Option<f64>,
    attempts_considered: usize,
    last_streak_all_correct: bool,
    recent_help_count: u32,
}

impl Dimensions {
    fn unpracticed(p_init: f64) -> Self {
        Self {
            p_known: p_init,
            confidence: 0.0,
            opportunities: 0,
            median_seconds_per_term: None,
            recent_accuracy: None,
            attempts_considered: 0,
            last_streak_all_correct: false,
            recent_help_count: 0,
        }
    }

    // Worst case per dimension; a missing sample is worse than any value.
    fn worst(self, other: Self) -> Self {
        let slowest = match (self.median_seconds_per_term, other.median_seconds_per_term) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        };
        let lowest_accuracy = match (self.recent_accuracy, other.recent_accuracy) {
            (Some(a), Some(b)) => Some(a.min(b)),
            _ => None,
        };
        Self {
            p_known: self.p_known.min(other.p_known),
            confidence: self.confidence.min(other.confidence),
            opportunities: self.opportunities.min(other.opportunities),
            median_seconds_per_term: slowest,
            recent_accuracy: lowest_accuracy,
            attempts_considered: self.attempts_considered.min(other.attempts_considered),
            last_streak_all_correct: self.last_streak_all_correct && other.last_streak_all_correct,
            recent_help_count: self.recent_help_count.max(other.recent_help_count),
        }
    }
}

//
// ─── EVALUATOR ─────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Default)]
pub struct ReadinessEvaluator {
    thresholds: ReadinessThresholds,
}

impl ReadinessEvaluator {
    #[must_use]
    pub fn new(thresholds: ReadinessThresholds) -> Self {
        Self { thresholds }
    }

    #[must_use]
    pub fn thresholds(&self) -> &ReadinessThresholds {
        &self.thresholds
    }

    fn dimensions(&self, state: &MasteryState, window: &RecentWindow) -> Dimensions {
        let n = self.thresholds.accuracy_window_size;
        Dimensions {
            p_known: state.p_known,
            confidence: state.confidence,
            opportunities: state.opportunities,
            median_seconds_per_term: window.median_seconds_per_term(),
            recent_accuracy: window.accuracy(n),
            attempts_considered: window.len().min(n),
            last_streak_all_correct: window.last_n_all_correct(self.thresholds.streak_length),
            recent_help_count: window.help_count(n),
        }
    }

    fn dimensions_in(
        &self,
        skill: &SkillId,
        snapshot: &MasterySnapshot,
        priors: &SkillPriors,
    ) -> Dimensions {
        match snapshot.get(skill) {
            Some(progress) => self.dimensions(&progress.state, &progress.window),
            None => Dimensions::unpracticed(priors.params_for(skill).p_init()),
        }
    }

    fn gate(&self, skills: Vec<SkillId>, d: Dimensions) -> ReadinessResult {
        let t = &self.thresholds;
        let mastery = MasteryGate {
            p_known: d.p_known,
            confidence: d.confidence,
            met: d.p_known >= t.p_known_threshold && d.confidence >= t.confidence_threshold,
        };
        let volume = VolumeGate {
            opportunities: d.opportunities,
            required: t.min_opportunities,
            met: d.opportunities >= t.min_opportunities,
        };
        let speed = SpeedGate {
            median_seconds_per_term: d.median_seconds_per_term,
            met: d
                .median_seconds_per_term
                .is_some_and(|s| s <= t.speed_threshold),
        };
        let consistency = ConsistencyGate {
            recent_accuracy: d.recent_accuracy,
            attempts_considered: d.attempts_considered,
            last_streak_all_correct: d.last_streak_all_correct,
            recent_help_count: d.recent_help_count,
            met: d
                .recent_accuracy
                .is_some_and(|a| a >= t.accuracy_threshold)
                && d.recent_help_count < t.help_cap,
        };
        let is_solid = mastery.met && volume.met && speed.met && consistency.met;
        ReadinessResult {
            skills,
            mastery,
            volume,
            speed,
            consistency,
            is_solid,
        }
    }

    /// Evaluate one practiced skill.
    #[must_use]
    pub fn evaluate(
        &self,
        skill_id: &SkillId,
        state: &MasteryState,
        window: &RecentWindow,
    ) -> ReadinessResult {
        self.gate(vec![skill_id.clone()], self.dimensions(state, window))
    }

    /// Evaluate a skill from a snapshot; unpracticed skills use their prior.
    #[must_use]
    pub fn evaluate_in(
        &self,
        skill_id: &SkillId,
        snapshot: &MasterySnapshot,
        priors: &SkillPriors,
    ) -> ReadinessResult {
        self.gate(
            vec![skill_id.clone()],
            self.dimensions_in(skill_id, snapshot, priors),
        )
    }

    /// Worst-case readiness over a set of skills. `None` for an empty set.
    #[must_use]
    pub fn evaluate_set(
        &self,
        skills: &[SkillId],
        snapshot: &MasterySnapshot,
        priors: &SkillPriors,
    ) -> Option<ReadinessResult> {
        let worst = skills
            .iter()
            .map(|skill| self.dimensions_in(skill, snapshot, priors))
            .reduce(Dimensions::worst)?;
        Some(self.gate(skills.to_vec(), worst))
    }

    /// True when every skill in the set is solid; vacuously true when empty.
    #[must_use]
    pub fn set_is_solid(
        &self,
        skills: &[SkillId],
        snapshot: &MasterySnapshot,
        priors: &SkillPriors,
    ) -> bool {
        self.evaluate_set(skills, snapshot, priors)
            .is_none_or(|r| r.is_solid)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
