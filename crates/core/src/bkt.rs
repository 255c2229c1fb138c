use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::model::SkillId;

/// Denominators below this are treated as zero.
const DENOMINATOR_FLOOR: f64 = 1e-9;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BktError {
    #[error("{name} must be a probability in [0, 1], got {provided}")]
    OutOfRange { name: &'static str, provided: f64 },
}

//
// ─── PARAMETERS ────────────────────────────────────────────────────────────────
//

/// Per-skill Bayesian Knowledge Tracing parameters.
///
/// * `p_init` - prior probability the skill is already known
/// * `p_learn` - chance of learning the skill during one correct practice
/// * `p_guess` - chance of answering correctly without knowing the skill
/// * `p_slip` - chance of answering wrongly despite knowing the skill
///
/// # Examples
///
/// ```
/// # use curriculum_core::bkt::BktParams;
/// let params = BktParams::new(0.3, 0.1, 0.1, 0.1)?;
/// assert_eq!(params.p_init(), 0.3);
/// # Ok::<(), curriculum_core::bkt::BktError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBktParams", into = "RawBktParams")]
pub struct BktParams {
    p_init: f64,
    p_learn: f64,
    p_guess: f64,
    p_slip: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawBktParams {
    p_init: f64,
    p_learn: f64,
    p_guess: f64,
    p_slip: f64,
}

impl TryFrom<RawBktParams> for BktParams {
    type Error = BktError;

    fn try_from(raw: RawBktParams) -> Result<Self, Self::Error> {
        Self::new(raw.p_init, raw.p_learn, raw.p_guess, raw.p_slip)
    }
}

impl From<BktParams> for RawBktParams {
    fn from(p: BktParams) -> Self {
        Self {
            p_init: p.p_init,
            p_learn: p.p_learn,
            p_guess: p.p_guess,
            p_slip: p.p_slip,
        }
    }
}

impl BktParams {
    /// Validate and build a parameter set.
    ///
    /// # Errors
    ///
    /// Returns `BktError::OutOfRange` for any value outside `[0, 1]` or NaN.
    pub fn new(p_init: f64, p_learn: f64, p_guess: f64, p_slip: f64) -> Result<Self, BktError> {
        for (name, value) in [
            ("p_init", p_init),
            ("p_learn", p_learn),
            ("p_guess", p_guess),
            ("p_slip", p_slip),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(BktError::OutOfRange {
                    name,
                    provided: value,
                });
            }
        }
        Ok(Self {
            p_init,
            p_learn,
            p_guess,
            p_slip,
        })
    }

    #[must_use]
    pub fn p_init(&self) -> f64 {
        self.p_init
    }

    #[must_use]
    pub fn p_learn(&self) -> f64 {
        self.p_learn
    }

    #[must_use]
    pub fn p_guess(&self) -> f64 {
        self.p_guess
    }

    #[must_use]
    pub fn p_slip(&self) -> f64 {
        self.p_slip
    }
}

impl Default for BktParams {
    fn default() -> Self {
        Self {
            p_init: 0.3,
            p_learn: 0.1,
            p_guess: 0.1,
            p_slip: 0.1,
        }
    }
}

/// Skill-prior table: a default parameter set plus per-skill overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillPriors {
    #[serde(default)]
    default: BktParams,
    #[serde(default)]
    overrides: HashMap<SkillId, BktParams>,
}

impl SkillPriors {
    #[must_use]
    pub fn new(default: BktParams) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_override(mut self, skill: SkillId, params: BktParams) -> Self {
        self.overrides.insert(skill, params);
        self
    }

    #[must_use]
    pub fn default_params(&self) -> BktParams {
        self.default
    }

    /// Parameters for a skill, falling back to the default set.
    #[must_use]
    pub fn params_for(&self, skill: &SkillId) -> BktParams {
        self.overrides.get(skill).copied().unwrap_or(self.default)
    }
}

//
// ─── UPDATE RULES ──────────────────────────────────────────────────────────────
//

fn clamp_probability(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Bayesian observation update: `P(known | observed correctness)`.
///
/// Inputs are clamped to `[0, 1]`. When the evidence has zero probability
/// under both hypotheses (e.g. `p_guess = 0` and `p_known = 0` on a correct
/// answer) the clamped prior is returned unchanged.
#[must_use]
pub fn update(p_known: f64, is_correct: bool, params: &BktParams) -> f64 {
    let p = clamp_probability(p_known);
    let guess = clamp_probability(params.p_guess);
    let slip = clamp_probability(params.p_slip);

    let (numerator, denominator) = if is_correct {
        let known = p * (1.0 - slip);
        (known, known + (1.0 - p) * guess)
    } else {
        let known = p * slip;
        (known, known + (1.0 - p) * (1.0 - guess))
    };

    if denominator < DENOMINATOR_FLOOR {
        return p;
    }
    clamp_probability(numerator / denominator)
}

/// Learning transition: the chance an unknown skill became known while practicing.
#[must_use]
pub fn apply_learning(p_known: f64, p_learn: f64) -> f64 {
    let p = clamp_probability(p_known);
    clamp_probability(p + (1.0 - p) * clamp_probability(p_learn))
}

/// Full BKT step for one observation.
///
/// Learning is only applied after a correct answer; a wrong answer never
/// moves belief upward.
#[must_use]
pub fn observe(p_known: f64, is_correct: bool, params: &BktParams) -> f64 {
    let posterior = update(p_known, is_correct, params);
    if is_correct {
        apply_learning(posterior, params.p_learn)
    } else {
        posterior
    }
}

/// Like [`observe`], but a correct answer given with help only moves belief
/// `help_weight` of the way toward the unassisted result.
#[must_use]
pub fn observe_with_help(
    p_known: f64,
    is_correct: bool,
    had_help: bool,
    help_weight: f64,
    params: &BktParams,
) -> f64 {
    let prior = clamp_probability(p_known);
    let full = observe(prior, is_correct, params);
    if had_help && is_correct {
        let weight = clamp_probability(help_weight);
        clamp_probability(prior + (full - prior) * weight)
    } else {
        full
    }
}

/// Conjunctive multi-skill update: each exercised skill is conditioned
/// independently on the same observed correctness, with the same help
/// discount as [`observe_with_help`].
///
/// `beliefs` yields `(skill, p_known)` pairs; the result keeps their order.
pub fn conjunctive_update<'a>(
    beliefs: impl IntoIterator<Item = (&'a SkillId, f64)>,
    is_correct: bool,
    had_help: bool,
    help_weight: f64,
    priors: &SkillPriors,
) -> Vec<(&'a SkillId, f64)> {
    beliefs
        .into_iter()
        .map(|(skill, p)| {
            let params = priors.params_for(skill);
            (
                skill,
                observe_with_help(p, is_correct, had_help, help_weight, &params),
            )
        })
        .collect()
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
