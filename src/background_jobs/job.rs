use super::context::JobContext;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info};

/// Errors a batch job can fail with. Any of them aborts the run and is
/// recorded by the scheduler as a failed attempt.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// A page of work was rolled back.
    #[error("Transaction at offset {offset} rolled back: {source:#}")]
    Transaction {
        offset: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("Batch size must be greater than zero")]
    InvalidBatchSize,

    #[error("Store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

/// Errors raised by the scheduler itself, as opposed to the jobs it runs.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Job '{0}' is already registered")]
    DuplicateJob(String),

    #[error("Job '{0}' not found")]
    JobNotFound(String),

    #[error("Job '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Job store unavailable: {0:#}")]
    PersistenceUnavailable(#[source] anyhow::Error),

    #[error("Job store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

/// A periodic analytics job.
///
/// Jobs are synchronous; the scheduler calls them from a blocking context
/// using `spawn_blocking`.
pub trait BatchJob: Send + Sync {
    /// Stable key used for registration and persisted state.
    fn id(&self) -> &'static str;

    /// Human-readable name for this job.
    fn name(&self) -> &'static str;

    /// Description of what this job does.
    fn description(&self) -> &'static str;

    /// Do the work. Returns how many records were processed.
    fn execute(&self, ctx: &JobContext) -> Result<usize, JobError>;

    /// Run `execute` with timing and logging around it.
    fn run(&self, ctx: &JobContext) -> Result<usize, JobError> {
        let started = Instant::now();
        info!("[{}] Starting {}", self.id(), self.name());
        match self.execute(ctx) {
            Ok(processed) => {
                info!(
                    "[{}] Completed in {:?}, {} records processed",
                    self.id(),
                    started.elapsed(),
                    processed
                );
                Ok(processed)
            }
            Err(e) => {
                error!(
                    "[{}] Failed after {:?}: {}",
                    self.id(),
                    started.elapsed(),
                    e
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_store::SqliteChatStore;
    use crate::clock::SystemClock;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct CountingJob {
        result: Result<usize, String>,
    }

    impl BatchJob for CountingJob {
        fn id(&self) -> &'static str {
            "counting"
        }

        fn name(&self) -> &'static str {
            "Counting"
        }

        fn description(&self) -> &'static str {
            "Returns a fixed result"
        }

        fn execute(&self, _ctx: &JobContext) -> Result<usize, JobError> {
            self.result.clone().map_err(JobError::ExecutionFailed)
        }
    }

    fn context(temp_dir: &TempDir) -> JobContext {
        let store = SqliteChatStore::new(temp_dir.path().join("chat.db")).unwrap();
        JobContext::new(Arc::new(store), Arc::new(SystemClock), 0, Duration::ZERO)
    }

    #[test]
    fn test_run_returns_execute_count() {
        let temp_dir = TempDir::new().unwrap();
        let job = CountingJob { result: Ok(7) };
        assert_eq!(job.run(&context(&temp_dir)).unwrap(), 7);
    }

    #[test]
    fn test_run_reraises_failure() {
        let temp_dir = TempDir::new().unwrap();
        let job = CountingJob {
            result: Err("boom".to_string()),
        };
        let err = job.run(&context(&temp_dir)).unwrap_err();
        assert_eq!(err.to_string(), "Execution failed: boom");
    }

    #[test]
    fn test_transaction_error_mentions_offset() {
        let err = JobError::Transaction {
            offset: 200,
            source: anyhow::anyhow!("constraint failed"),
        };
        let message = err.to_string();
        assert!(message.contains("offset 200"));
        assert!(message.contains("constraint failed"));
    }
}
