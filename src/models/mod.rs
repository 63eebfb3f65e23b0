pub mod configuration;
pub mod execution;
pub mod plan;

pub use configuration::{ConfigurationBundle, VersionType};
pub use execution::{ExecutionStatus, StepExecution, StepStatus, UpgradeExecution};
pub use plan::{BreakpointData, PlanStep, StepPlan, StepType};
