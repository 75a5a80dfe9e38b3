use super::events::JobEvent;
use super::job::SchedulerError;
use super::scheduler::{JobDescriptor, RunOutcome, SchedulerShared};
use crate::job_store::{JobRun, JobState, RunTrigger};
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::error;

/// Information about a registered job.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub name: String,
    pub description: String,
    pub interval_secs: u64,
    pub is_running: bool,
    /// Persisted scheduling state, absent until the job is first started.
    pub state: Option<JobState>,
    pub last_run: Option<JobRun>,
}

/// Cloneable handle for inspecting the scheduler and triggering jobs
/// from outside the task that owns it.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<SchedulerShared>,
}

impl SchedulerHandle {
    pub(super) fn new(shared: Arc<SchedulerShared>) -> Self {
        Self { shared }
    }

    fn descriptor(&self, name: &str) -> Result<Arc<JobDescriptor>, SchedulerError> {
        self.shared
            .find(name)
            .ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))
    }

    fn job_info(&self, descriptor: &JobDescriptor) -> Result<JobInfo, SchedulerError> {
        let store = &self.shared.job_store;
        Ok(JobInfo {
            name: descriptor.name.clone(),
            description: descriptor.job.description().to_string(),
            interval_secs: descriptor.interval.as_secs(),
            is_running: descriptor.running.load(Ordering::SeqCst),
            state: store.get_job_state(&descriptor.name)?,
            last_run: store.get_last_run(&descriptor.name)?,
        })
    }

    /// All registered jobs, in registration order.
    pub fn list_jobs(&self) -> Result<Vec<JobInfo>, SchedulerError> {
        self.shared
            .descriptors()
            .iter()
            .map(|d| self.job_info(d))
            .collect()
    }

    pub fn job_status(&self, name: &str) -> Result<JobInfo, SchedulerError> {
        let descriptor = self.descriptor(name)?;
        self.job_info(&descriptor)
    }

    /// Most recent runs of a job, newest first.
    pub fn job_history(&self, name: &str, limit: usize) -> Result<Vec<JobRun>, SchedulerError> {
        self.descriptor(name)?;
        Ok(self.shared.job_store.get_job_history(name, limit)?)
    }

    pub fn is_job_running(&self, name: &str) -> Result<bool, SchedulerError> {
        Ok(self.descriptor(name)?.running.load(Ordering::SeqCst))
    }

    /// Start a manual run in the background. Fails if the job is unknown or
    /// an execution is already in flight.
    ///
    /// The running flag is only checked here; a fire that claims the job
    /// before the spawned run does makes the returned outcome `Skipped`.
    pub fn trigger_job(
        &self,
        name: &str,
    ) -> Result<JoinHandle<Result<RunOutcome, SchedulerError>>, SchedulerError> {
        let descriptor = self.descriptor(name)?;
        if descriptor.running.load(Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning(name.to_string()));
        }

        let shared = Arc::clone(&self.shared);
        let name = name.to_string();
        Ok(tokio::spawn(async move {
            let result = shared.run_job(&name, RunTrigger::Manual).await;
            if let Err(e) = &result {
                error!("Manual run of {} failed to start: {}", name, e);
            }
            result
        }))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.shared.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::{
        BatchJob, JobContext, JobError, JobScheduler, SchedulerSettings,
    };
    use crate::chat_store::SqliteChatStore;
    use crate::clock::SystemClock;
    use crate::job_store::{JobRunStatus, SqliteJobStore};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;

    struct CountingJob {
        runs: Arc<AtomicUsize>,
    }

    impl BatchJob for CountingJob {
        fn id(&self) -> &'static str {
            "counting"
        }

        fn name(&self) -> &'static str {
            "Counting"
        }

        fn description(&self) -> &'static str {
            "Counts its executions"
        }

        fn execute(&self, _ctx: &JobContext) -> Result<usize, JobError> {
            Ok(self.runs.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    fn scheduler(temp_dir: &TempDir, runs: Arc<AtomicUsize>) -> JobScheduler {
        let job_store = Arc::new(SqliteJobStore::new(temp_dir.path().join("jobs.db")).unwrap());
        let chat_store = Arc::new(SqliteChatStore::new(temp_dir.path().join("chat.db")).unwrap());
        let context = JobContext::new(chat_store, Arc::new(SystemClock), 0, Duration::ZERO);
        let scheduler = JobScheduler::new(job_store, context, SchedulerSettings::default());
        scheduler
            .register("counting", Arc::new(CountingJob { runs }), Duration::from_secs(3600))
            .unwrap();
        scheduler
    }

    #[tokio::test]
    async fn test_list_jobs_before_start() {
        let temp_dir = TempDir::new().unwrap();
        let handle = scheduler(&temp_dir, Arc::new(AtomicUsize::new(0))).handle();

        let jobs = handle.list_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "counting");
        assert_eq!(jobs[0].interval_secs, 3600);
        assert!(!jobs[0].is_running);
        assert!(jobs[0].state.is_none());
        assert!(jobs[0].last_run.is_none());
    }

    #[tokio::test]
    async fn test_unknown_job_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let handle = scheduler(&temp_dir, Arc::new(AtomicUsize::new(0))).handle();

        assert!(matches!(
            handle.trigger_job("nope"),
            Err(SchedulerError::JobNotFound(_))
        ));
        assert!(matches!(
            handle.job_status("nope"),
            Err(SchedulerError::JobNotFound(_))
        ));
        assert!(matches!(
            handle.job_history("nope", 5),
            Err(SchedulerError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_trigger_job_runs_manually() {
        let temp_dir = TempDir::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let scheduler = scheduler(&temp_dir, runs.clone());
        let handle = scheduler.handle();
        let mut events = handle.subscribe();

        handle.trigger_job("counting").unwrap();
        loop {
            match events.recv().await.unwrap() {
                JobEvent::Completed { .. } => break,
                JobEvent::Failed { error, .. } => panic!("Job failed: {}", error),
                _ => {}
            }
        }

        // Completed is emitted before the flag is released.
        for _ in 0..100 {
            if !handle.is_job_running("counting").unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let history = handle.job_history("counting", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, JobRunStatus::Completed);
        assert_eq!(history[0].triggered_by, "manual");

        let status = handle.job_status("counting").unwrap();
        assert!(!status.is_running);
        assert_eq!(status.state.unwrap().error_count, 0);
        assert_eq!(status.last_run.unwrap().records_processed, Some(1));
    }

    #[tokio::test]
    async fn test_trigger_job_returns_run_outcome() {
        let temp_dir = TempDir::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let scheduler = scheduler(&temp_dir, runs.clone());
        let handle = scheduler.handle();

        let outcome = handle.trigger_job("counting").unwrap().await.unwrap();
        assert_eq!(
            outcome.unwrap(),
            RunOutcome::Completed {
                records_processed: 1
            }
        );
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!handle.is_job_running("counting").unwrap());
    }

    #[tokio::test]
    async fn test_racing_triggers_report_skipped_run() {
        let temp_dir = TempDir::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let scheduler = scheduler(&temp_dir, runs.clone());
        let handle = scheduler.handle();

        // Neither spawned run has claimed the job yet, so both triggers pass the check.
        let first = handle.trigger_job("counting").unwrap();
        let second = handle.trigger_job("counting").unwrap();

        let mut outcomes = vec![
            first.await.unwrap().unwrap(),
            second.await.unwrap().unwrap(),
        ];
        outcomes.sort_by_key(|o| matches!(o, RunOutcome::Skipped));
        assert_eq!(
            outcomes,
            vec![
                RunOutcome::Completed {
                    records_processed: 1
                },
                RunOutcome::Skipped
            ]
        );
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(handle.job_history("counting", 10).unwrap().len(), 1);
    }
}
