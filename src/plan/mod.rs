//! 计划层：条目模型、依赖图校验、步骤调度

pub mod graph;
pub mod model;
pub mod scheduler;

pub use graph::{validate_plan, DependencyGraph};
pub use model::{PlanItem, PlanItemId, PlanModel, PlanPatch, PlanStatus};
pub use scheduler::StepScheduler;
