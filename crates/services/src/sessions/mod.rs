mod compose;
mod workflow;

// Public API of the session subsystem.
pub use crate::error::{ComposeError, PlanningError};
pub use compose::{
    ComposeContext, DigitProblemGenerator, GameBreakSettings, PlanComposer, PlanRequest,
    ProblemGenerator,
};
pub use workflow::PlanningService;
