use chrono::{DateTime, Utc};
use serde::Serialize;

/// Persisted scheduling status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Idle,
    Running,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Idle => "idle",
            JobStatus::Running => "running",
            JobStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(JobStatus::Idle),
            "running" => Some(JobStatus::Running),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }
}

/// Status of a single entry in the run history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRunStatus {
    Running,
    Completed,
    Failed,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunStatus::Running => "running",
            JobRunStatus::Completed => "completed",
            JobRunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(JobRunStatus::Running),
            "completed" => Some(JobRunStatus::Completed),
            "failed" => Some(JobRunStatus::Failed),
            _ => None,
        }
    }
}

/// What caused a run to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    /// First run of a job at scheduler start (cold start, overdue, or recovered).
    Startup,
    /// Steady-state timer fire.
    Schedule,
    /// Explicit request through the scheduler handle or the CLI runner.
    Manual,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunTrigger::Startup => "startup",
            RunTrigger::Schedule => "schedule",
            RunTrigger::Manual => "manual",
        }
    }
}

/// One row of `batch_jobs`.
#[derive(Debug, Clone, Serialize)]
pub struct JobState {
    pub job_name: String,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub status: JobStatus,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// One row of `batch_job_history`.
#[derive(Debug, Clone, Serialize)]
pub struct JobRun {
    pub id: i64,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobRunStatus,
    pub records_processed: Option<u64>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
    /// "startup", "schedule" or "manual".
    pub triggered_by: String,
}
