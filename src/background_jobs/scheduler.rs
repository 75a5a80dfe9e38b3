use super::context::JobContext;
use super::events::JobEvent;
use super::handle::SchedulerHandle;
use super::job::{BatchJob, SchedulerError};
use super::metrics;
use crate::job_store::{JobRunStatus, JobState, JobStatus, JobStore, RunTrigger};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);
const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub const LAST_SHUTDOWN_AT_KEY: &str = "last_shutdown_at";
pub const CLEAN_SHUTDOWN_KEY: &str = "clean_shutdown";

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// How long `stop()` waits for in-flight jobs.
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(300),
        }
    }
}

/// A registered job.
pub(super) struct JobDescriptor {
    pub name: String,
    pub job: Arc<dyn BatchJob>,
    pub interval: Duration,
    /// Set while an execution is in flight.
    pub running: Arc<AtomicBool>,
}

/// Result of a single `run_job` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { records_processed: usize },
    Failed { error: String },
    /// The job was already running, or the scheduler is stopping.
    Skipped,
}

/// Clears a job's running flag when dropped, including on unwind or when the
/// owning future is dropped.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// State shared between the scheduler, its timer tasks and any handles.
pub(super) struct SchedulerShared {
    pub jobs: RwLock<Vec<Arc<JobDescriptor>>>,
    pub job_store: Arc<dyn JobStore>,
    pub context: JobContext,
    pub events: broadcast::Sender<JobEvent>,
    stopping: AtomicBool,
}

impl SchedulerShared {
    pub fn find(&self, name: &str) -> Option<Arc<JobDescriptor>> {
        self.jobs
            .read()
            .unwrap()
            .iter()
            .find(|d| d.name == name)
            .cloned()
    }

    pub fn descriptors(&self) -> Vec<Arc<JobDescriptor>> {
        self.jobs.read().unwrap().clone()
    }

    fn running_job_names(&self) -> Vec<String> {
        self.jobs
            .read()
            .unwrap()
            .iter()
            .filter(|d| d.running.load(Ordering::SeqCst))
            .map(|d| d.name.clone())
            .collect()
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Execute one registered job now, unless it is already running.
    pub async fn run_job(
        &self,
        name: &str,
        trigger: RunTrigger,
    ) -> Result<RunOutcome, SchedulerError> {
        let descriptor = self
            .find(name)
            .ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))?;

        if descriptor
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Job {} is already running, skipping this fire", name);
            self.emit(JobEvent::Skipped {
                job: name.to_string(),
            });
            return Ok(RunOutcome::Skipped);
        }
        let _guard = RunningGuard(Arc::clone(&descriptor.running));

        if self.stopping.load(Ordering::SeqCst) {
            debug!("Scheduler is stopping, not starting job {}", name);
            return Ok(RunOutcome::Skipped);
        }

        let clock = Arc::clone(&self.context.clock);
        let started_at = clock.now();
        let interval = chrono_interval(descriptor.interval);

        if let Err(e) = self
            .job_store
            .create_job_state(name, started_at + interval, started_at)
            .and_then(|_| self.job_store.mark_job_running(name, started_at))
        {
            error!("Failed to mark job {} as running: {:#}", name, e);
        }
        let run_id = match self.job_store.record_run_start(name, started_at, trigger) {
            Ok(id) => Some(id),
            Err(e) => {
                error!("Failed to record run start for {}: {:#}", name, e);
                None
            }
        };

        info!(
            "Starting job: {} (run_id: {:?}, triggered_by: {})",
            name,
            run_id,
            trigger.as_str()
        );
        metrics::set_batch_job_running(name, true);
        self.emit(JobEvent::Started {
            job: name.to_string(),
            run_id,
            triggered_by: trigger,
        });

        let job = Arc::clone(&descriptor.job);
        let ctx = self.context.clone();
        let timer = Instant::now();
        let result = tokio::task::spawn_blocking(move || job.run(&ctx)).await;
        let elapsed = timer.elapsed();
        let duration_ms = elapsed.as_millis() as i64;
        let finished_at = clock.now();

        let (outcome, status_label) = match result {
            Ok(Ok(records_processed)) => {
                if let Err(e) =
                    self.job_store
                        .record_job_success(name, finished_at, finished_at + interval)
                {
                    error!("Failed to record success for {}: {:#}", name, e);
                }
                if let Some(run_id) = run_id {
                    if let Err(e) = self.job_store.record_run_finish(
                        run_id,
                        finished_at,
                        JobRunStatus::Completed,
                        Some(records_processed as u64),
                        None,
                        duration_ms,
                    ) {
                        error!("Failed to record run finish for {}: {:#}", name, e);
                    }
                }
                metrics::record_records_processed(name, records_processed);
                self.emit(JobEvent::Completed {
                    job: name.to_string(),
                    run_id,
                    records_processed,
                    duration_ms,
                });
                (RunOutcome::Completed { records_processed }, "success")
            }
            Ok(Err(e)) => {
                let message = e.to_string();
                self.record_failure(name, run_id, finished_at, &message, duration_ms);
                (RunOutcome::Failed { error: message }, "failed")
            }
            Err(e) => {
                let message = format!("Task panic: {}", e);
                error!("Job {} panicked after {:?}: {}", name, elapsed, e);
                self.record_failure(name, run_id, finished_at, &message, duration_ms);
                (RunOutcome::Failed { error: message }, "panic")
            }
        };

        metrics::record_batch_job_execution(name, status_label, elapsed);
        metrics::set_batch_job_running(name, false);
        Ok(outcome)
    }

    fn record_failure(
        &self,
        name: &str,
        run_id: Option<i64>,
        finished_at: DateTime<Utc>,
        message: &str,
        duration_ms: i64,
    ) {
        if let Err(e) = self.job_store.record_job_failure(name, finished_at, message) {
            error!("Failed to record failure for {}: {:#}", name, e);
        }
        if let Some(run_id) = run_id {
            if let Err(e) = self.job_store.record_run_finish(
                run_id,
                finished_at,
                JobRunStatus::Failed,
                None,
                Some(message),
                duration_ms,
            ) {
                error!("Failed to record run finish for {}: {:#}", name, e);
            }
        }
        self.emit(JobEvent::Failed {
            job: name.to_string(),
            run_id,
            error: message.to_string(),
            duration_ms,
        });
    }
}

fn chrono_interval(interval: Duration) -> chrono::Duration {
    chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// Delay before a job's first fire, derived from its persisted state.
///
/// A job whose previous run never finished, or whose `next_run` has passed,
/// runs immediately.
pub fn initial_delay(state: &JobState, now: DateTime<Utc>) -> Duration {
    if state.status == JobStatus::Running {
        return Duration::ZERO;
    }
    (state.next_run - now).to_std().unwrap_or(Duration::ZERO)
}

/// A job's recurring timer.
pub struct ScheduledTask {
    job_name: String,
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Stop future fires. An execution already in flight is not interrupted.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

}

/// Registry of recurring jobs driven by wall-clock intervals.
pub struct JobScheduler {
    shared: Arc<SchedulerShared>,
    tasks: Vec<ScheduledTask>,
    settings: SchedulerSettings,
    started: bool,
}

impl JobScheduler {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        context: JobContext,
        settings: SchedulerSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(SchedulerShared {
                jobs: RwLock::new(Vec::new()),
                job_store,
                context,
                events,
                stopping: AtomicBool::new(false),
            }),
            tasks: Vec::new(),
            settings,
            started: false,
        }
    }

    /// Check that the job store is reachable.
    pub fn init(&self) -> Result<(), SchedulerError> {
        self.shared
            .job_store
            .ping()
            .map_err(SchedulerError::PersistenceUnavailable)?;
        metrics::init_metrics();
        Ok(())
    }

    /// Register `job` under `name`, to run every `interval`.
    pub fn register(
        &self,
        name: &str,
        job: Arc<dyn BatchJob>,
        interval: Duration,
    ) -> Result<(), SchedulerError> {
        let mut jobs = self.shared.jobs.write().unwrap();
        if jobs.iter().any(|d| d.name == name) {
            return Err(SchedulerError::DuplicateJob(name.to_string()));
        }
        info!(
            "Registering job: {} every {:?} - {}",
            name,
            interval,
            job.description()
        );
        jobs.push(Arc::new(JobDescriptor {
            name: name.to_string(),
            job,
            interval: interval.max(MIN_INTERVAL),
            running: Arc::new(AtomicBool::new(false)),
        }));
        Ok(())
    }

    /// Names of registered jobs, in registration order.
    pub fn job_names(&self) -> Vec<String> {
        self.shared
            .descriptors()
            .iter()
            .map(|d| d.name.clone())
            .collect()
    }

    /// Arm every registered job's timer from its persisted state.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.started {
            warn!("Job scheduler already started");
            return Ok(());
        }
        // A previous stop() leaves this set.
        self.shared.stopping.store(false, Ordering::SeqCst);
        let descriptors = self.shared.descriptors();
        info!("Starting job scheduler with {} registered jobs", descriptors.len());

        let now = self.shared.context.clock.now();
        match self.shared.job_store.mark_stale_runs_failed(now) {
            Ok(count) if count > 0 => {
                info!("Marked {} stale job runs as failed from previous run", count);
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to mark stale job runs: {:#}", e);
            }
        }

        for descriptor in descriptors {
            let delay = match self.shared.job_store.get_job_state(&descriptor.name)? {
                Some(state) => initial_delay(&state, now),
                None => {
                    self.shared.job_store.create_job_state(
                        &descriptor.name,
                        now + chrono_interval(descriptor.interval),
                        now,
                    )?;
                    Duration::ZERO
                }
            };
            if delay.is_zero() {
                info!("Job {} is due, running now", descriptor.name);
            } else {
                info!("Job {} next runs in {:?}", descriptor.name, delay);
            }
            let task = self.spawn_timer(&descriptor, delay);
            self.tasks.push(task);
        }

        self.started = true;
        Ok(())
    }

    fn spawn_timer(&self, descriptor: &JobDescriptor, initial_delay: Duration) -> ScheduledTask {
        let cancel_token = CancellationToken::new();
        let task_token = cancel_token.clone();
        let shared = Arc::clone(&self.shared);
        let name = descriptor.name.clone();
        let period = descriptor.interval;

        let handle = tokio::spawn(async move {
            let first_fire = tokio::time::Instant::now() + initial_delay;
            let mut ticker = tokio::time::interval_at(first_fire, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut trigger = if initial_delay.is_zero() {
                RunTrigger::Startup
            } else {
                RunTrigger::Schedule
            };

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        debug!("Timer for job {} cancelled", name);
                        break;
                    }
                    _ = ticker.tick() => {
                        let shared = Arc::clone(&shared);
                        let name = name.clone();
                        tokio::spawn(async move {
                            if let Err(e) = shared.run_job(&name, trigger).await {
                                error!("Scheduled run of {} failed to start: {}", name, e);
                            }
                        });
                        trigger = RunTrigger::Schedule;
                    }
                }
            }
        });

        ScheduledTask {
            job_name: descriptor.name.clone(),
            cancel_token,
            handle,
        }
    }

    /// Execute a registered job now and wait for it to finish.
    pub async fn run_job(
        &self,
        name: &str,
        trigger: RunTrigger,
    ) -> Result<RunOutcome, SchedulerError> {
        self.shared.run_job(name, trigger).await
    }

    pub fn is_job_running(&self, name: &str) -> Result<bool, SchedulerError> {
        self.shared
            .find(name)
            .map(|d| d.running.load(Ordering::SeqCst))
            .ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))
    }

    pub fn tasks(&self) -> &[ScheduledTask] {
        &self.tasks
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.shared.events.subscribe()
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle::new(Arc::clone(&self.shared))
    }

    /// Cancel all timers, wait (bounded) for in-flight executions and persist
    /// shutdown state. Returns whether every execution finished in time.
    pub async fn stop(&mut self) -> Result<bool, SchedulerError> {
        info!("Shutting down job scheduler...");
        self.shared.stopping.store(true, Ordering::SeqCst);

        for task in self.tasks.drain(..) {
            task.cancel();
            if let Err(e) = task.handle.await {
                warn!("Timer task for {} ended abnormally: {}", task.job_name, e);
            }
        }

        let deadline = Instant::now() + self.settings.shutdown_timeout;
        let clean = loop {
            let running = self.shared.running_job_names();
            if running.is_empty() {
                break true;
            }
            if Instant::now() >= deadline {
                warn!(
                    "Shutdown timeout of {:?} elapsed with jobs still running: {}",
                    self.settings.shutdown_timeout,
                    running.join(", ")
                );
                break false;
            }
            debug!("Waiting for running jobs: {}", running.join(", "));
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        };

        let now = self.shared.context.clock.now();
        let store = &self.shared.job_store;
        store.set_state(LAST_SHUTDOWN_AT_KEY, &now.to_rfc3339(), now)?;
        store.set_state(CLEAN_SHUTDOWN_KEY, if clean { "true" } else { "false" }, now)?;

        self.started = false;
        info!("Job scheduler stopped (clean: {})", clean);
        Ok(clean)
    }
}
