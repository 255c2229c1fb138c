use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::bkt::SkillPriors;
use crate::history::HistoryOptions;
use crate::mode::ModeSelectorConfig;
use crate::model::{PartType, PerPart};
use crate::readiness::ReadinessThresholds;
use crate::synth::SynthBands;
use crate::term_count::{TermCountError, TermCountScalingConfig};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read config {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("{field} must be in [0, 1], got {value}")]
    NotAProbability { field: &'static str, value: f64 },

    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("{0}")]
    Inconsistent(&'static str),

    #[error(transparent)]
    TermCount(#[from] TermCountError),
}

//
// ─── PACING ────────────────────────────────────────────────────────────────────
//

/// Time estimates the composer uses to size a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Expected seconds per term, per part.
    pub seconds_per_term: PerPart<f64>,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            seconds_per_term: PerPart {
                abacus: 4.0,
                visualization: 5.0,
                linear: 3.0,
            },
        }
    }
}

impl PacingConfig {
    /// Estimated seconds for one problem of `terms` terms.
    #[must_use]
    pub fn seconds_per_problem(&self, part: PartType, terms: f64) -> f64 {
        self.seconds_per_term.get(part) * terms
    }
}

//
// ─── ENGINE CONFIG ─────────────────────────────────────────────────────────────
//

/// Every tunable of the engine. Missing sections take their defaults.
///
/// # Examples
///
/// ```
/// # use curriculum_core::config::EngineConfig;
/// let config = EngineConfig::from_toml_str(
///     r#"
///     [readiness]
///     min_opportunities = 15
///     "#,
/// )?;
/// assert_eq!(config.readiness.min_opportunities, 15);
/// assert_eq!(config.readiness.p_known_threshold, 0.8);
/// # Ok::<(), curriculum_core::config::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub history: HistoryOptions,
    pub readiness: ReadinessThresholds,
    pub mode: ModeSelectorConfig,
    pub term_counts: TermCountScalingConfig,
    pub pacing: PacingConfig,
    pub synth: SynthBands,
    pub priors: SkillPriors,
}

fn probability(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::NotAProbability { field, value })
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// `ConfigError::Parse` for malformed TOML or a value rejected while
    /// deserializing (BKT parameters, term bounds, bands), otherwise the
    /// first failure from [`EngineConfig::validate`].
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    ///
    /// `ConfigError::Read` if the file cannot be read, then as
    /// [`EngineConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&raw)
    }

    /// Cross-field checks serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let h = &self.history;
        probability("history.confidence_threshold", h.confidence_threshold)?;
        probability("history.weak_below", h.weak_below)?;
        probability("history.strong_at", h.strong_at)?;
        probability("history.help_weight", h.help_weight)?;
        if h.weak_below > h.strong_at {
            return Err(ConfigError::Inconsistent(
                "history.weak_below must not exceed history.strong_at",
            ));
        }
        if h.session_gap_minutes < 0 {
            return Err(ConfigError::Inconsistent(
                "history.session_gap_minutes must not be negative",
            ));
        }

        let r = &self.readiness;
        probability("readiness.p_known_threshold", r.p_known_threshold)?;
        probability("readiness.confidence_threshold", r.confidence_threshold)?;
        probability("readiness.accuracy_threshold", r.accuracy_threshold)?;
        positive("readiness.speed_threshold", r.speed_threshold)?;
        if r.accuracy_window_size == 0 {
            return Err(ConfigError::Inconsistent(
                "readiness.accuracy_window_size must be at least 1",
            ));
        }
        if h.window_capacity < r.accuracy_window_size.max(r.streak_length) {
            return Err(ConfigError::Inconsistent(
                "history.window_capacity must cover the readiness accuracy window and streak",
            ));
        }

        probability("mode.severity_floor", self.mode.severity_floor)?;
        if self.mode.max_weak_skills == 0 {
            return Err(ConfigError::Inconsistent(
                "mode.max_weak_skills must be at least 1",
            ));
        }

        self.term_counts.validate()?;

        let pace = &self.pacing.seconds_per_term;
        positive("pacing.seconds_per_term.abacus", pace.abacus)?;
        positive("pacing.seconds_per_term.visualization", pace.visualization)?;
        positive("pacing.seconds_per_term.linear", pace.linear)?;
        Ok(())
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SkillId;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(EngineConfig::default().validate(), Ok(()));
        assert_eq!(EngineConfig::from_toml_str(""), Ok(EngineConfig::default()));
    }

    #[test]
    fn default_config_survives_toml_round_trip() {
        let printed = toml::to_string_pretty(&EngineConfig::default()).unwrap();
        let parsed = EngineConfig::from_toml_str(&printed).unwrap();
        assert_eq!(parsed, EngineConfig::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [history]
            confidence_saturation = 40

            [term_counts.abacus]
            floor = { min = 2, max = 2 }
            ceiling = { min = 3, max = 6 }

            [term_counts.visualization]
            floor = { min = 2, max = 3 }
            ceiling = { min = 3, max = 6 }

            [term_counts.linear]
            floor = { min = 2, max = 4 }
            ceiling = { min = 5, max = 10 }

            [pacing.seconds_per_term]
            abacus = 6.0
            visualization = 5.0
            linear = 3.0
            "#,
        )
        .unwrap();
        assert_eq!(config.history.confidence_saturation, 40);
        assert_eq!(config.history.session_gap_minutes, 30);
        assert_eq!(config.term_counts.bounds(PartType::Abacus).ceiling.max, 6);
        assert_eq!(config.pacing.seconds_per_problem(PartType::Abacus, 2.5), 15.0);
    }

    #[test]
    fn invalid_term_bounds_are_rejected_on_parse() {
        let err = EngineConfig::from_toml_str(
            r#"
            [term_counts.abacus]
            floor = { min = 1, max = 3 }
            ceiling = { min = 4, max = 8 }

            [term_counts.visualization]
            floor = { min = 2, max = 3 }
            ceiling = { min = 3, max = 6 }

            [term_counts.linear]
            floor = { min = 2, max = 4 }
            ceiling = { min = 5, max = 10 }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(msg) if msg.contains("at least 2")));
    }

    #[test]
    fn priors_and_overrides_parse() {
        let config = EngineConfig::from_toml_str(
            r#"
            [priors.default]
            p_init = 0.2
            p_learn = 0.15
            p_guess = 0.1
            p_slip = 0.05

            [priors.overrides."fiveComplements.4=5-1"]
            p_init = 0.05
            p_learn = 0.1
            p_guess = 0.1
            p_slip = 0.1
            "#,
        )
        .unwrap();
        let skill = SkillId::new("fiveComplements.4=5-1").unwrap();
        assert_eq!(config.priors.params_for(&skill).p_init(), 0.05);
        assert_eq!(config.priors.default_params().p_learn(), 0.15);
    }

    #[test]
    fn out_of_range_bkt_params_fail() {
        let err = EngineConfig::from_toml_str(
            r#"
            [priors.default]
            p_init = 1.5
            p_learn = 0.1
            p_guess = 0.1
            p_slip = 0.1
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn cross_field_checks() {
        let mut config = EngineConfig::default();
        config.history.weak_below = 0.9;
        assert!(matches!(config.validate(), Err(ConfigError::Inconsistent(_))));

        let mut config = EngineConfig::default();
        config.history.window_capacity = 4;
        assert!(matches!(config.validate(), Err(ConfigError::Inconsistent(_))));

        let mut config = EngineConfig::default();
        config.pacing.seconds_per_term.linear = 0.0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::NotPositive {
                field: "pacing.seconds_per_term.linear",
                value: 0.0
            })
        );

        let mut config = EngineConfig::default();
        config.readiness.accuracy_threshold = 1.2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotAProbability { field: "readiness.accuracy_threshold", .. })
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = EngineConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { path, .. } if path.contains("not/here")));
    }
}
