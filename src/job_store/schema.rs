//! SQLite schema definitions for the jobs database.
//!
//! Holds per-job scheduling state, the append-only run history and a small
//! key-value table for scheduler-level state such as the last shutdown time.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Job state and run history
// =============================================================================

pub const BATCH_JOBS_TABLE_V1: Table = Table {
    name: "batch_jobs",
    columns: &[
        sqlite_column!("job_name", &SqlType::Text, is_primary_key = true),
        sqlite_column!("last_run", &SqlType::Text),
        sqlite_column!("next_run", &SqlType::Text, non_null = true),
        sqlite_column!(
            "status",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'idle'")
        ),
        sqlite_column!(
            "error_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("last_error", &SqlType::Text),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    primary_key: &[],
    indices: &[],
    unique_constraints: &[],
};

pub const BATCH_JOB_HISTORY_TABLE_V1: Table = Table {
    name: "batch_job_history",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("job_name", &SqlType::Text, non_null = true),
        sqlite_column!("started_at", &SqlType::Text, non_null = true),
        sqlite_column!("completed_at", &SqlType::Text),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("records_processed", &SqlType::Integer),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("duration_ms", &SqlType::Integer),
        sqlite_column!("triggered_by", &SqlType::Text, non_null = true),
    ],
    primary_key: &[],
    indices: &[
        (
            "idx_batch_job_history_job_started",
            "job_name, started_at DESC",
        ),
        ("idx_batch_job_history_status", "status"),
    ],
    unique_constraints: &[],
};

pub const SCHEDULER_STATE_TABLE_V1: Table = Table {
    name: "scheduler_state",
    columns: &[
        sqlite_column!("key", &SqlType::Text, is_primary_key = true),
        sqlite_column!("value", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    primary_key: &[],
    indices: &[],
    unique_constraints: &[],
};

pub static JOBS_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[
        BATCH_JOBS_TABLE_V1,
        BATCH_JOB_HISTORY_TABLE_V1,
        SCHEDULER_STATE_TABLE_V1,
    ],
    migration: None,
}];
