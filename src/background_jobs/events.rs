use crate::job_store::RunTrigger;
use serde::Serialize;

/// Lifecycle notifications published by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Started {
        job: String,
        run_id: Option<i64>,
        triggered_by: RunTrigger,
    },
    Completed {
        job: String,
        run_id: Option<i64>,
        records_processed: usize,
        duration_ms: i64,
    },
    Failed {
        job: String,
        run_id: Option<i64>,
        error: String,
        duration_ms: i64,
    },
    /// A fire arrived while the previous execution was still in flight.
    Skipped { job: String },
}

impl JobEvent {
    pub fn job(&self) -> &str {
        match self {
            JobEvent::Started { job, .. }
            | JobEvent::Completed { job, .. }
            | JobEvent::Failed { job, .. }
            | JobEvent::Skipped { job } => job,
        }
    }
}
