//! Search for a plausible answer history that lands a skill in a target
//! mastery band. Used to seed demo learners and test fixtures.
//!
//! The search is bounded by attempt count. When no candidate lands inside
//! the band the closest one is returned with `band_hit == false`.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::bkt::{self, BktParams};
use crate::history::MasteryLevel;
use crate::model::{ProblemError, ProblemRecord, SkillId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum SynthError {
    #[error("probability band [{low}, {high}] is not an ordered sub-range of [0, 1]")]
    InvalidBand { low: f64, high: f64 },

    #[error("history lengths must satisfy 1 <= min ({min}) <= max ({max})")]
    InvalidLengths { min: usize, max: usize },

    #[error("search needs at least one attempt")]
    NoAttempts,

    #[error(transparent)]
    Problem(#[from] ProblemError),
}

//
// ─── BANDS ─────────────────────────────────────────────────────────────────────
//

/// Closed `p_known` interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "(f64, f64)", into = "(f64, f64)")]
pub struct ProbabilityBand {
    low: f64,
    high: f64,
}

impl ProbabilityBand {
    /// # Errors
    ///
    /// Returns `SynthError::InvalidBand` unless `0 <= low <= high <= 1`.
    pub fn new(low: f64, high: f64) -> Result<Self, SynthError> {
        if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&high) || low > high {
            return Err(SynthError::InvalidBand { low, high });
        }
        Ok(Self { low, high })
    }

    #[must_use]
    pub fn low(&self) -> f64 {
        self.low
    }

    #[must_use]
    pub fn high(&self) -> f64 {
        self.high
    }

    #[must_use]
    pub fn contains(&self, p: f64) -> bool {
        (self.low..=self.high).contains(&p)
    }

    /// Zero inside the band, otherwise the gap to the nearest edge.
    #[must_use]
    pub fn distance(&self, p: f64) -> f64 {
        if p < self.low {
            self.low - p
        } else if p > self.high {
            p - self.high
        } else {
            0.0
        }
    }

    fn midpoint(&self) -> f64 {
        (self.low + self.high) / 2.0
    }
}

impl TryFrom<(f64, f64)> for ProbabilityBand {
    type Error = SynthError;

    fn try_from((low, high): (f64, f64)) -> Result<Self, Self::Error> {
        Self::new(low, high)
    }
}

impl From<ProbabilityBand> for (f64, f64) {
    fn from(band: ProbabilityBand) -> Self {
        (band.low, band.high)
    }
}

/// Target band per mastery level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthBands {
    pub weak: ProbabilityBand,
    pub developing: ProbabilityBand,
    pub strong: ProbabilityBand,
}

impl SynthBands {
    #[must_use]
    pub fn band(&self, level: MasteryLevel) -> ProbabilityBand {
        match level {
            MasteryLevel::Weak => self.weak,
            MasteryLevel::Developing => self.developing,
            MasteryLevel::Strong => self.strong,
        }
    }
}

impl Default for SynthBands {
    fn default() -> Self {
        Self {
            weak: ProbabilityBand {
                low: 0.1,
                high: 0.4,
            },
            developing: ProbabilityBand {
                low: 0.45,
                high: 0.7,
            },
            strong: ProbabilityBand {
                low: 0.85,
                high: 0.98,
            },
        }
    }
}

//
// ─── OPTIONS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthOptions {
    pub min_length: usize,
    pub max_length: usize,
    pub max_attempts: usize,
    /// Minutes between consecutive synthetic answers.
    pub spacing_minutes: i64,
    pub response_time_ms: u64,
}

impl Default for SynthOptions {
    fn default() -> Self {
        Self {
            min_length: 3,
            max_length: 30,
            max_attempts: 200,
            spacing_minutes: 1,
            response_time_ms: 4_000,
        }
    }
}

impl SynthOptions {
    fn validate(&self) -> Result<(), SynthError> {
        if self.min_length == 0 || self.min_length > self.max_length {
            return Err(SynthError::InvalidLengths {
                min: self.min_length,
                max: self.max_length,
            });
        }
        if self.max_attempts == 0 {
            return Err(SynthError::NoAttempts);
        }
        Ok(())
    }
}

//
// ─── PATTERNS ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq)]
enum Pattern {
    /// `wrong` misses, then correct answers.
    Recovering { wrong: usize },
    /// Correct answers, then `wrong` misses.
    Slipping { wrong: usize },
    Alternating,
    /// Independent draws at the given accuracy.
    Weighted(f64),
}

impl Pattern {
    fn outcomes(self, length: usize, rng: &mut impl Rng) -> Vec<bool> {
        match self {
            Pattern::Recovering { wrong } => (0..length).map(|i| i >= wrong).collect(),
            Pattern::Slipping { wrong } => {
                (0..length).map(|i| i + wrong < length).collect()
            }
            Pattern::Alternating => (0..length).map(|i| i % 2 == 1).collect(),
            Pattern::Weighted(accuracy) => (0..length)
                .map(|_| rng.random_bool(accuracy.clamp(0.0, 1.0)))
                .collect(),
        }
    }
}

// Candidate shapes for one history length, most structured first.
fn patterns_for(band: ProbabilityBand, length: usize) -> Vec<Pattern> {
    let mut patterns: Vec<Pattern> = (0..=length)
        .map(|wrong| Pattern::Recovering { wrong })
        .collect();
    patterns.extend((1..length).map(|wrong| Pattern::Slipping { wrong }));
    patterns.push(Pattern::Alternating);
    patterns.push(Pattern::Weighted(band.midpoint()));
    patterns
}

fn replay(outcomes: &[bool], params: &BktParams) -> f64 {
    outcomes
        .iter()
        .fold(params.p_init(), |p, &correct| bkt::observe(p, correct, params))
}

//
// ─── SEARCH ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedHistory {
    pub records: Vec<ProblemRecord>,
    /// `p_known` after replaying `records` with the same parameters.
    pub p_known: f64,
    pub band_hit: bool,
    pub candidates_tried: usize,
}

/// Find answer outcomes whose replay lands in `band`, and turn them into
/// timed records for `skill` starting at `start`.
///
/// # Errors
///
/// Returns `SynthError` for invalid options. Missing the band is not an
/// error; check `band_hit`.
pub fn synthesize_history(
    skill: &SkillId,
    band: ProbabilityBand,
    params: &BktParams,
    options: &SynthOptions,
    start: DateTime<Utc>,
    rng: &mut impl Rng,
) -> Result<SynthesizedHistory, SynthError> {
    options.validate()?;

    let mut best: Option<(f64, f64, Vec<bool>)> = None;
    let mut tried = 0;

    'search: for length in options.min_length..=options.max_length {
        for pattern in patterns_for(band, length) {
            if tried >= options.max_attempts {
                break 'search;
            }
            tried += 1;
            let outcomes = pattern.outcomes(length, rng);
            let p = replay(&outcomes, params);
            let distance = band.distance(p);
            if best.as_ref().is_none_or(|(d, _, _)| distance < *d) {
                best = Some((distance, p, outcomes));
            }
            if distance == 0.0 {
                break 'search;
            }
        }
    }

    let (distance, p_known, outcomes) = best.ok_or(SynthError::NoAttempts)?;
    let band_hit = distance == 0.0;
    debug!(
        skill = %skill,
        p_known,
        band_hit,
        tried,
        length = outcomes.len(),
        "synthetic history search finished"
    );

    let records = outcomes
        .iter()
        .enumerate()
        .map(|(i, &correct)| {
            let terms = vec![2, 1];
            let answer = if correct { 3 } else { 4 };
            #[allow(clippy::cast_possible_wrap)]
            let offset = Duration::minutes(options.spacing_minutes * i as i64);
            ProblemRecord::new(
                terms,
                answer,
                vec![skill.clone()],
                options.response_time_ms,
                false,
                start + offset,
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SynthesizedHistory {
        records,
        p_known,
        band_hit,
        candidates_tried: tried,
    })
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
