use thiserror::Error;

use crate::bkt::BktError;
use crate::config::ConfigError;
use crate::history::HistoryError;
use crate::model::{CurriculumError, IdError, PlanError, ProblemError, SkillError};
use crate::progress::ProgressError;
use crate::synth::SynthError;
use crate::term_count::TermCountError;

/// Any failure the engine core can report.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Id(#[from] IdError),
    #[error(transparent)]
    Skill(#[from] SkillError),
    #[error(transparent)]
    Curriculum(#[from] CurriculumError),
    #[error(transparent)]
    Problem(#[from] ProblemError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Bkt(#[from] BktError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    TermCount(#[from] TermCountError),
    #[error(transparent)]
    Synth(#[from] SynthError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
