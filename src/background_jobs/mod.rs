//! Periodic batch job scheduling and execution.
//!
//! Jobs implement [`BatchJob`] and are registered on a [`JobScheduler`] with an
//! interval. Run state and history are persisted through a
//! [`JobStore`](crate::job_store::JobStore) so schedules survive restarts.

mod batch;
mod context;
mod events;
mod handle;
mod job;
pub mod jobs;
pub mod metrics;
mod scheduler;

pub use batch::{process_batch, BatchOutcome};
pub use context::JobContext;
pub use events::JobEvent;
pub use handle::{JobInfo, SchedulerHandle};
pub use job::{BatchJob, JobError, SchedulerError};
pub use scheduler::{
    initial_delay, JobScheduler, RunOutcome, ScheduledTask, SchedulerSettings,
    CLEAN_SHUTDOWN_KEY, LAST_SHUTDOWN_AT_KEY,
};
