use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::history::MasterySnapshot;
use crate::mode::ModeKind;
use crate::model::{PartType, PerPart, SkillId};

/// Smallest number of terms a problem may have.
pub const MIN_TERMS: u32 = 2;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TermCountError {
    #[error("{part}: every term bound must be at least {MIN_TERMS}, got {provided}")]
    BoundTooSmall { part: PartType, provided: u32 },

    #[error("{part}: {which} range has min {min} above max {max}")]
    InvertedRange {
        part: PartType,
        which: &'static str,
        min: u32,
        max: u32,
    },

    #[error("{part}: floor {bound} ({floor}) exceeds ceiling {bound} ({ceiling})")]
    FloorAboveCeiling {
        part: PartType,
        bound: &'static str,
        floor: u32,
        ceiling: u32,
    },
}

//
// ─── RANGES ────────────────────────────────────────────────────────────────────
//

/// Inclusive range of terms per problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermCountRange {
    pub min: u32,
    pub max: u32,
}

impl TermCountRange {
    #[must_use]
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub fn midpoint(&self) -> f64 {
        (f64::from(self.min) + f64::from(self.max)) / 2.0
    }

    #[must_use]
    pub fn contains(&self, terms: u32) -> bool {
        (self.min..=self.max).contains(&terms)
    }
}

/// Term ranges at zero comfort (`floor`) and full comfort (`ceiling`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeBounds {
    pub floor: TermCountRange,
    pub ceiling: TermCountRange,
}

impl ModeBounds {
    #[must_use]
    pub const fn new(floor: TermCountRange, ceiling: TermCountRange) -> Self {
        Self { floor, ceiling }
    }

    fn validate(&self, part: PartType) -> Result<(), TermCountError> {
        for bound in [self.floor.min, self.floor.max, self.ceiling.min, self.ceiling.max] {
            if bound < MIN_TERMS {
                return Err(TermCountError::BoundTooSmall {
                    part,
                    provided: bound,
                });
            }
        }
        for (which, range) in [("floor", self.floor), ("ceiling", self.ceiling)] {
            if range.min > range.max {
                return Err(TermCountError::InvertedRange {
                    part,
                    which,
                    min: range.min,
                    max: range.max,
                });
            }
        }
        if self.floor.min > self.ceiling.min {
            return Err(TermCountError::FloorAboveCeiling {
                part,
                bound: "min",
                floor: self.floor.min,
                ceiling: self.ceiling.min,
            });
        }
        if self.floor.max > self.ceiling.max {
            return Err(TermCountError::FloorAboveCeiling {
                part,
                bound: "max",
                floor: self.floor.max,
                ceiling: self.ceiling.max,
            });
        }
        Ok(())
    }
}

//
// ─── CONFIG ────────────────────────────────────────────────────────────────────
//

/// Per-part term-count bounds. Only constructible in a valid state, so
/// `range` never has to re-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PerPart<ModeBounds>", into = "PerPart<ModeBounds>")]
pub struct TermCountScalingConfig {
    parts: PerPart<ModeBounds>,
}

impl TermCountScalingConfig {
    /// Validate and build a config.
    ///
    /// # Errors
    ///
    /// Returns the first `TermCountError` found, checking parts in
    /// abacus, visualization, linear order.
    pub fn new(parts: PerPart<ModeBounds>) -> Result<Self, TermCountError> {
        for part in PartType::ALL {
            parts.get(part).validate(part)?;
        }
        Ok(Self { parts })
    }

    #[must_use]
    pub fn bounds(&self, part: PartType) -> &ModeBounds {
        self.parts.get(part)
    }

    /// Re-check every part. Always `Ok` for a value built through `new`.
    ///
    /// # Errors
    ///
    /// See [`TermCountScalingConfig::new`].
    pub fn validate(&self) -> Result<(), TermCountError> {
        Self::new(self.parts).map(|_| ())
    }
}

impl Default for TermCountScalingConfig {
    fn default() -> Self {
        Self {
            parts: PerPart {
                abacus: ModeBounds::new(TermCountRange::new(2, 3), TermCountRange::new(4, 8)),
                visualization: ModeBounds::new(
                    TermCountRange::new(2, 3),
                    TermCountRange::new(3, 6),
                ),
                linear: ModeBounds::new(TermCountRange::new(2, 4), TermCountRange::new(5, 10)),
            },
        }
    }
}

impl TryFrom<PerPart<ModeBounds>> for TermCountScalingConfig {
    type Error = TermCountError;

    fn try_from(parts: PerPart<ModeBounds>) -> Result<Self, Self::Error> {
        Self::new(parts)
    }
}

impl From<TermCountScalingConfig> for PerPart<ModeBounds> {
    fn from(config: TermCountScalingConfig) -> Self {
        config.parts
    }
}

//
// ─── SCALING ───────────────────────────────────────────────────────────────────
//

/// Learner's preferred problem length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LengthPreference {
    Shorter,
    #[default]
    Recommended,
    Longer,
}

impl LengthPreference {
    #[must_use]
    pub fn shift(self) -> f64 {
        match self {
            LengthPreference::Shorter => -0.3,
            LengthPreference::Recommended => 0.0,
            LengthPreference::Longer => 0.2,
        }
    }
}

#[must_use]
pub fn mode_multiplier(mode: ModeKind) -> f64 {
    match mode {
        ModeKind::Remediation => 0.6,
        ModeKind::Progression => 0.85,
        ModeKind::Maintenance => 1.0,
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Mean `p_known` over the skills that have mastery state; 0 when none do.
#[must_use]
pub fn base_comfort(snapshot: &MasterySnapshot, skills: &[SkillId]) -> f64 {
    let known: Vec<f64> = skills
        .iter()
        .filter_map(|s| snapshot.state(s))
        .map(|state| state.p_known)
        .collect();
    if known.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let count = known.len() as f64;
    clamp_unit(known.iter().sum::<f64>() / count)
}

/// Comfort after the mode multiplier and length preference, in `[0, 1]`.
#[must_use]
pub fn comfort_level(base: f64, mode: ModeKind, preference: LengthPreference) -> f64 {
    clamp_unit(clamp_unit(base) * mode_multiplier(mode) + preference.shift())
}

/// Interpolate the term range for `part` at `comfort`.
///
/// # Examples
///
/// ```
/// # use curriculum_core::model::PartType;
/// # use curriculum_core::term_count::{range, TermCountScalingConfig};
/// let config = TermCountScalingConfig::default();
/// let r = range(PartType::Abacus, 0.3, &config);
/// assert_eq!((r.min, r.max), (3, 5));
/// ```
#[must_use]
pub fn range(part: PartType, comfort: f64, config: &TermCountScalingConfig) -> TermCountRange {
    let comfort = clamp_unit(comfort);
    let bounds = config.bounds(part);
    let lerp = |floor: u32, ceiling: u32| -> u32 {
        let floor = f64::from(floor);
        let value = floor + (f64::from(ceiling) - floor) * comfort;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let rounded = value.round() as u32;
        rounded
    };
    TermCountRange {
        min: lerp(bounds.floor.min, bounds.ceiling.min),
        max: lerp(bounds.floor.max, bounds.ceiling.max),
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn interpolates_abacus_defaults() {
        let config = TermCountScalingConfig::default();
        assert_eq!(
            range(PartType::Abacus, 0.3, &config),
            TermCountRange::new(3, 5)
        );
    }

    #[test]
    fn endpoints_match_floor_and_ceiling() {
        let config = TermCountScalingConfig::default();
        for part in PartType::ALL {
            let bounds = config.bounds(part);
            assert_eq!(range(part, 0.0, &config), bounds.floor);
            assert_eq!(range(part, 1.0, &config), bounds.ceiling);
        }
    }

    #[test]
    fn comfort_outside_unit_interval_is_clamped() {
        let config = TermCountScalingConfig::default();
        assert_eq!(
            range(PartType::Linear, 7.0, &config),
            config.bounds(PartType::Linear).ceiling
        );
        assert_eq!(
            range(PartType::Linear, -1.0, &config),
            config.bounds(PartType::Linear).floor
        );
    }

    #[test]
    fn rejects_bounds_below_two() {
        let mut parts: PerPart<ModeBounds> = TermCountScalingConfig::default().into();
        parts.visualization.floor.min = 1;
        assert_eq!(
            TermCountScalingConfig::new(parts),
            Err(TermCountError::BoundTooSmall {
                part: PartType::Visualization,
                provided: 1
            })
        );
    }

    #[test]
    fn rejects_floor_above_ceiling() {
        let mut parts: PerPart<ModeBounds> = TermCountScalingConfig::default().into();
        parts.abacus.floor = TermCountRange::new(5, 6);
        assert!(matches!(
            TermCountScalingConfig::new(parts),
            Err(TermCountError::FloorAboveCeiling { bound: "min", .. })
        ));

        let mut parts: PerPart<ModeBounds> = TermCountScalingConfig::default().into();
        parts.linear.floor = TermCountRange::new(2, 12);
        parts.linear.ceiling = TermCountRange::new(5, 13);
        assert!(TermCountScalingConfig::new(parts).is_ok());
        parts.linear.ceiling = TermCountRange::new(5, 10);
        assert!(matches!(
            TermCountScalingConfig::new(parts),
            Err(TermCountError::FloorAboveCeiling { bound: "max", .. })
        ));
    }

    #[test]
    fn rejects_inverted_range() {
        let mut parts: PerPart<ModeBounds> = TermCountScalingConfig::default().into();
        parts.abacus.ceiling = TermCountRange::new(8, 4);
        assert!(matches!(
            TermCountScalingConfig::new(parts),
            Err(TermCountError::InvertedRange { which: "ceiling", .. })
        ));
    }

    #[test]
    fn invalid_config_fails_to_deserialize() {
        let raw = r#"{
            "abacus": {"floor": {"min": 2, "max": 3}, "ceiling": {"min": 4, "max": 8}},
            "visualization": {"floor": {"min": 2, "max": 3}, "ceiling": {"min": 3, "max": 6}},
            "linear": {"floor": {"min": 6, "max": 4}, "ceiling": {"min": 5, "max": 10}}
        }"#;
        assert!(serde_json::from_str::<TermCountScalingConfig>(raw).is_err());
    }

    #[test]
    fn comfort_applies_multiplier_then_shift() {
        assert!((comfort_level(1.0, ModeKind::Remediation, LengthPreference::Recommended) - 0.6).abs() < 1e-12);
        assert!((comfort_level(0.8, ModeKind::Progression, LengthPreference::Longer) - 0.88).abs() < 1e-12);
        assert_eq!(comfort_level(0.2, ModeKind::Maintenance, LengthPreference::Shorter), 0.0);
        assert_eq!(comfort_level(0.95, ModeKind::Maintenance, LengthPreference::Longer), 1.0);
    }

    #[test]
    fn base_comfort_without_state_is_zero() {
        let skill = SkillId::new("basic.directAddition").unwrap();
        assert_eq!(base_comfort(&MasterySnapshot::default(), &[skill]), 0.0);
        assert_eq!(base_comfort(&MasterySnapshot::default(), &[]), 0.0);
    }

    proptest! {
        #[test]
        fn range_is_ordered_and_between_bounds(
            comfort in -0.5f64..1.5,
            fmin in 2u32..6,
            fspan in 0u32..4,
            cmin_extra in 0u32..6,
            cspan_extra in 0u32..6,
        ) {
            let floor = TermCountRange::new(fmin, fmin + fspan);
            let ceiling = TermCountRange::new(fmin + cmin_extra, fmin + fspan + cmin_extra + cspan_extra);
            let bounds = ModeBounds::new(floor, ceiling);
            let config = TermCountScalingConfig::new(PerPart {
                abacus: bounds,
                visualization: bounds,
                linear: bounds,
            }).unwrap();
            let r = range(PartType::Abacus, comfort, &config);
            prop_assert!(r.min <= r.max);
            prop_assert!(r.min >= floor.min && r.min <= ceiling.min);
            prop_assert!(r.max >= floor.max && r.max <= ceiling.max);
        }
    }
}
