pub mod bootstrap;
pub mod error;
pub mod executor;
pub mod scheduler;
pub mod template;
pub mod transition;
pub mod types;

pub use bootstrap::{Bootstrapper, DEFAULT_REQUIRED_TOOLS, SopAudit, audit_sop};
pub use error::{EngineError, ExecutionError};
pub use executor::StepExecutor;
pub use scheduler::{SchedulerConfig, TaskScheduler, TickSummary};
pub use transition::{Disposition, StepOutcome, Transition};
