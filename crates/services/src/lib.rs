#![forbid(unsafe_code)]

pub mod error;
pub mod logging;
pub mod sessions;

pub use curriculum_core::Clock;
pub use sessions as session;

pub use error::{ComposeError, PlanningError};
pub use logging::{LogFormat, init_logging};

pub use sessions::{
    ComposeContext, DigitProblemGenerator, GameBreakSettings, PlanComposer, PlanRequest,
    PlanningService, ProblemGenerator,
};
