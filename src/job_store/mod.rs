mod models;
mod schema;
mod sqlite_job_store;

pub use models::*;
pub use schema::JOBS_VERSIONED_SCHEMAS;
pub use sqlite_job_store::SqliteJobStore;

use anyhow::Result;
use chrono::{DateTime, Utc};

/// Persistence for scheduler state: one `batch_jobs` row per job name and an
/// append-only `batch_job_history`.
pub trait JobStore: Send + Sync {
    /// Cheap round-trip used to verify the store is reachable.
    fn ping(&self) -> Result<()>;

    // Job state
    fn get_job_state(&self, job_name: &str) -> Result<Option<JobState>>;
    fn get_all_job_states(&self) -> Result<Vec<JobState>>;
    /// Insert an idle row for `job_name` unless one already exists.
    /// Returns true when a row was created.
    fn create_job_state(
        &self,
        job_name: &str,
        next_run: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;
    fn mark_job_running(&self, job_name: &str, now: DateTime<Utc>) -> Result<()>;
    fn record_job_success(
        &self,
        job_name: &str,
        finished_at: DateTime<Utc>,
        next_run: DateTime<Utc>,
    ) -> Result<()>;
    /// Record a failed attempt. `next_run` keeps its previous value.
    fn record_job_failure(
        &self,
        job_name: &str,
        finished_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()>;

    // Run history
    fn record_run_start(
        &self,
        job_name: &str,
        started_at: DateTime<Utc>,
        triggered_by: RunTrigger,
    ) -> Result<i64>;
    fn record_run_finish(
        &self,
        run_id: i64,
        completed_at: DateTime<Utc>,
        status: JobRunStatus,
        records_processed: Option<u64>,
        error_message: Option<&str>,
        duration_ms: i64,
    ) -> Result<()>;
    fn get_job_history(&self, job_name: &str, limit: usize) -> Result<Vec<JobRun>>;
    fn get_last_run(&self, job_name: &str) -> Result<Option<JobRun>>;
    /// Close out history rows left `running` by a previous process.
    fn mark_stale_runs_failed(&self, now: DateTime<Utc>) -> Result<usize>;

    // Scheduler-level key-value state
    fn get_state(&self, key: &str) -> Result<Option<String>>;
    fn set_state(&self, key: &str, value: &str, now: DateTime<Utc>) -> Result<()>;
}
