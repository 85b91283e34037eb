//! The synco daemon runs each configured sync job on its interval through the
//! external copy utility and retries transient failures. A pid lock in the
//! configuration directory keeps it to one daemon per configuration.

mod error;
pub mod lifecycle;
pub mod log_rotation;
pub mod paths;
pub mod record;
pub mod report;
pub mod retry;
mod runtime;
pub mod scheduler;
pub mod supervisor;

pub use error::{DaemonError, LifecycleError};
pub use lifecycle::{is_alive, status, stop, LockStatus, PidLock, StopOutcome};
pub use record::{OutputSummary, RunOutcome, RunRecord};
pub use report::{RunReporter, TracingReporter};
pub use retry::{RetryDecision, RetryPolicy};
pub use runtime::{init_tracing, run, start_blocking, DaemonOptions};
pub use scheduler::{
    DaemonState, JobPhase, ScheduleMode, Scheduler, SchedulerHandle, SchedulerOptions,
};
pub use supervisor::{JobRunner, Supervisor};
