mod curriculum;
mod ids;
mod part;
mod plan;
mod problem;
mod skill;

pub use curriculum::{CurriculumError, CurriculumGraph, Phase};
pub use ids::{IdError, LearnerId, PhaseId, PlanId, SkillId};
pub use part::{PartType, PerPart, PerPurpose, Purpose};
pub use plan::{
    ActiveState, BreakEndReason, BreakState, Completion, GameBreak, Part, PlanError,
    PlanProgress, PlanStatus, SessionPlan, Slot, SlotAnswer, SlotRef, SlotResult,
};
pub use problem::{ProblemError, ProblemRecord};
pub use skill::{SkillCatalog, SkillDefinition, SkillError, SkillRef};
