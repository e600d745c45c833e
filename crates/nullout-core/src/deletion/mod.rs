pub mod execute;
pub mod plan;

pub use execute::{DeletionReceipt, Executor, DELETE_STRATEGY};
pub use plan::{DeletionPlan, PlanItem, PlanStatus, Planner};
