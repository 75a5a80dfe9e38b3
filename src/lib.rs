//! Chat Stats Server Library
//!
//! Periodic batch analytics over a chat bot's message log: a persistent job
//! scheduler plus the jobs that derive activity, streak, content and
//! achievement tables.

pub mod analytics;
pub mod background_jobs;
pub mod chat_store;
pub mod clock;
pub mod config;
pub mod job_store;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use analytics::{build_job, register_analytics_jobs, resolve_job_keys, ANALYTICS_JOB_KEYS};
pub use background_jobs::{BatchJob, JobContext, JobScheduler, SchedulerHandle};
pub use chat_store::SqliteChatStore;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{AppConfig, CliConfig, FileConfig};
pub use job_store::{JobStore, SqliteJobStore};
