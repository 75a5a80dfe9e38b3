use super::models::{JobRun, JobRunStatus, JobState, JobStatus, RunTrigger};
use super::schema::JOBS_VERSIONED_SCHEMAS;
use super::JobStore;
use crate::sqlite_persistence::open_versioned_database;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

const JOB_RUN_COLUMNS: &str = "id, job_name, started_at, completed_at, status, records_processed, \
     error_message, duration_ms, triggered_by";

const JOB_STATE_COLUMNS: &str =
    "job_name, last_run, next_run, status, error_count, last_error, updated_at";

pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned_database(db_path.as_ref(), JOBS_VERSIONED_SCHEMAS, "jobs", None)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }

    fn row_to_job_state(row: &rusqlite::Row) -> rusqlite::Result<JobState> {
        let last_run: Option<String> = row.get("last_run")?;
        let next_run: String = row.get("next_run")?;
        let status: String = row.get("status")?;
        let updated_at: String = row.get("updated_at")?;
        let error_count: i64 = row.get("error_count")?;

        Ok(JobState {
            job_name: row.get("job_name")?,
            last_run: last_run.as_deref().and_then(Self::parse_datetime),
            // An unreadable next_run makes the job overdue rather than lost.
            next_run: Self::parse_datetime(&next_run).unwrap_or(DateTime::<Utc>::MIN_UTC),
            status: JobStatus::parse(&status).unwrap_or(JobStatus::Error),
            error_count: error_count.max(0) as u32,
            last_error: row.get("last_error")?,
            updated_at: Self::parse_datetime(&updated_at).unwrap_or_else(Utc::now),
        })
    }

    fn row_to_job_run(row: &rusqlite::Row) -> rusqlite::Result<JobRun> {
        let status: String = row.get("status")?;
        let started_at: String = row.get("started_at")?;
        let completed_at: Option<String> = row.get("completed_at")?;
        let records_processed: Option<i64> = row.get("records_processed")?;

        Ok(JobRun {
            id: row.get("id")?,
            job_name: row.get("job_name")?,
            started_at: Self::parse_datetime(&started_at).unwrap_or_else(Utc::now),
            completed_at: completed_at.as_deref().and_then(Self::parse_datetime),
            status: JobRunStatus::parse(&status).unwrap_or(JobRunStatus::Failed),
            records_processed: records_processed.map(|n| n.max(0) as u64),
            error_message: row.get("error_message")?,
            duration_ms: row.get("duration_ms")?,
            triggered_by: row.get("triggered_by")?,
        })
    }
}

impl JobStore for SqliteJobStore {
    fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM batch_jobs", [], |row| {
            row.get::<_, i64>(0)
        })?;
        Ok(())
    }

    fn get_job_state(&self, job_name: &str) -> Result<Option<JobState>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_STATE_COLUMNS} FROM batch_jobs WHERE job_name = ?1"
        ))?;
        let state = stmt
            .query_row(params![job_name], Self::row_to_job_state)
            .optional()?;
        Ok(state)
    }

    fn get_all_job_states(&self) -> Result<Vec<JobState>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_STATE_COLUMNS} FROM batch_jobs ORDER BY job_name"
        ))?;
        let states = stmt
            .query_map([], Self::row_to_job_state)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(states)
    }

    fn create_job_state(
        &self,
        job_name: &str,
        next_run: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO batch_jobs (job_name, next_run, status, error_count, updated_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![
                job_name,
                Self::format_datetime(&next_run),
                JobStatus::Idle.as_str(),
                Self::format_datetime(&now)
            ],
        )?;
        Ok(inserted > 0)
    }

    fn mark_job_running(&self, job_name: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE batch_jobs SET status = ?1, updated_at = ?2 WHERE job_name = ?3",
            params![
                JobStatus::Running.as_str(),
                Self::format_datetime(&now),
                job_name
            ],
        )?;
        Ok(())
    }

    fn record_job_success(
        &self,
        job_name: &str,
        finished_at: DateTime<Utc>,
        next_run: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let finished_at = Self::format_datetime(&finished_at);
        conn.execute(
            "INSERT INTO batch_jobs (job_name, last_run, next_run, status, error_count, last_error, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, NULL, ?2)
             ON CONFLICT(job_name) DO UPDATE SET
                last_run = ?2, next_run = ?3, status = ?4, error_count = 0,
                last_error = NULL, updated_at = ?2",
            params![
                job_name,
                finished_at,
                Self::format_datetime(&next_run),
                JobStatus::Idle.as_str()
            ],
        )?;
        Ok(())
    }

    fn record_job_failure(
        &self,
        job_name: &str,
        finished_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE batch_jobs SET status = ?1, error_count = error_count + 1, last_error = ?2,
                last_run = ?3, updated_at = ?3
             WHERE job_name = ?4",
            params![
                JobStatus::Error.as_str(),
                error,
                Self::format_datetime(&finished_at),
                job_name
            ],
        )?;
        Ok(())
    }

    fn record_run_start(
        &self,
        job_name: &str,
        started_at: DateTime<Utc>,
        triggered_by: RunTrigger,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO batch_job_history (job_name, started_at, status, triggered_by)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                job_name,
                Self::format_datetime(&started_at),
                JobRunStatus::Running.as_str(),
                triggered_by.as_str()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn record_run_finish(
        &self,
        run_id: i64,
        completed_at: DateTime<Utc>,
        status: JobRunStatus,
        records_processed: Option<u64>,
        error_message: Option<&str>,
        duration_ms: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE batch_job_history
             SET completed_at = ?1, status = ?2, records_processed = ?3, error_message = ?4,
                 duration_ms = ?5
             WHERE id = ?6",
            params![
                Self::format_datetime(&completed_at),
                status.as_str(),
                records_processed.map(|n| n as i64),
                error_message,
                duration_ms,
                run_id
            ],
        )?;
        Ok(())
    }

    fn get_job_history(&self, job_name: &str, limit: usize) -> Result<Vec<JobRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_RUN_COLUMNS} FROM batch_job_history
             WHERE job_name = ?1 ORDER BY started_at DESC, id DESC LIMIT ?2"
        ))?;
        let runs = stmt
            .query_map(params![job_name, limit as i64], Self::row_to_job_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    fn get_last_run(&self, job_name: &str) -> Result<Option<JobRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_RUN_COLUMNS} FROM batch_job_history
             WHERE job_name = ?1 ORDER BY started_at DESC, id DESC LIMIT 1"
        ))?;
        let run = stmt
            .query_row(params![job_name], Self::row_to_job_run)
            .optional()?;
        Ok(run)
    }

    fn mark_stale_runs_failed(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE batch_job_history SET status = ?1, completed_at = ?2, error_message = ?3
             WHERE status = ?4",
            params![
                JobRunStatus::Failed.as_str(),
                Self::format_datetime(&now),
                "Run was interrupted (process restart)",
                JobRunStatus::Running.as_str()
            ],
        )?;
        Ok(count)
    }

    fn get_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM scheduler_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_state(&self, key: &str, value: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO scheduler_state (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            params![key, value, Self::format_datetime(&now)],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    struct TestStore {
        store: SqliteJobStore,
        _temp_dir: TempDir,
    }

    fn create_test_store() -> TestStore {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteJobStore::new(temp_dir.path().join("jobs.db")).unwrap();
        TestStore {
            store,
            _temp_dir: temp_dir,
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_create_job_state_is_idempotent() {
        let test = create_test_store();
        let store = &test.store;

        assert!(store.create_job_state("streaks", at(4), at(0)).unwrap());
        assert!(!store.create_job_state("streaks", at(8), at(1)).unwrap());

        let state = store.get_job_state("streaks").unwrap().unwrap();
        assert_eq!(state.status, JobStatus::Idle);
        assert_eq!(state.next_run, at(4));
        assert_eq!(state.error_count, 0);
        assert!(state.last_run.is_none());
    }

    #[test]
    fn test_failure_keeps_next_run_and_counts_errors() {
        let test = create_test_store();
        let store = &test.store;
        store.create_job_state("activity", at(4), at(0)).unwrap();

        store.mark_job_running("activity", at(1)).unwrap();
        assert_eq!(
            store.get_job_state("activity").unwrap().unwrap().status,
            JobStatus::Running
        );

        store.record_job_failure("activity", at(1), "boom").unwrap();
        store.record_job_failure("activity", at(2), "boom again").unwrap();

        let state = store.get_job_state("activity").unwrap().unwrap();
        assert_eq!(state.status, JobStatus::Error);
        assert_eq!(state.error_count, 2);
        assert_eq!(state.last_error.as_deref(), Some("boom again"));
        assert_eq!(state.next_run, at(4));
        assert_eq!(state.last_run, Some(at(2)));
    }

    #[test]
    fn test_success_resets_error_state() {
        let test = create_test_store();
        let store = &test.store;
        store.create_job_state("activity", at(4), at(0)).unwrap();
        store.record_job_failure("activity", at(1), "boom").unwrap();

        store
            .record_job_success("activity", at(5), at(5) + Duration::hours(4))
            .unwrap();

        let state = store.get_job_state("activity").unwrap().unwrap();
        assert_eq!(state.status, JobStatus::Idle);
        assert_eq!(state.error_count, 0);
        assert!(state.last_error.is_none());
        assert_eq!(state.next_run, at(9));
        assert_eq!(state.last_run, Some(at(5)));
    }

    #[test]
    fn test_run_history_roundtrip() {
        let test = create_test_store();
        let store = &test.store;

        let run_id = store
            .record_run_start("content", at(1), RunTrigger::Startup)
            .unwrap();
        assert!(run_id > 0);

        let running = store.get_last_run("content").unwrap().unwrap();
        assert_eq!(running.status, JobRunStatus::Running);
        assert!(running.completed_at.is_none());

        store
            .record_run_finish(run_id, at(2), JobRunStatus::Completed, Some(42), None, 1500)
            .unwrap();

        let last = store.get_last_run("content").unwrap().unwrap();
        assert_eq!(last.status, JobRunStatus::Completed);
        assert_eq!(last.records_processed, Some(42));
        assert_eq!(last.duration_ms, Some(1500));
        assert_eq!(last.completed_at, Some(at(2)));
        assert_eq!(last.triggered_by, "startup");
    }

    #[test]
    fn test_history_is_newest_first_and_limited() {
        let test = create_test_store();
        let store = &test.store;
        for hour in 0..5 {
            store
                .record_run_start("content", at(hour), RunTrigger::Schedule)
                .unwrap();
        }

        let history = store.get_job_history("content", 3).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].started_at, at(4));
        assert_eq!(history[2].started_at, at(2));
        assert!(store.get_job_history("unknown", 10).unwrap().is_empty());
    }

    #[test]
    fn test_mark_stale_runs_failed() {
        let test = create_test_store();
        let store = &test.store;
        store
            .record_run_start("streaks", at(1), RunTrigger::Schedule)
            .unwrap();
        let done = store
            .record_run_start("activity", at(1), RunTrigger::Schedule)
            .unwrap();
        store
            .record_run_finish(done, at(2), JobRunStatus::Completed, Some(1), None, 10)
            .unwrap();

        assert_eq!(store.mark_stale_runs_failed(at(3)).unwrap(), 1);

        let stale = store.get_last_run("streaks").unwrap().unwrap();
        assert_eq!(stale.status, JobRunStatus::Failed);
        assert!(stale.error_message.unwrap().contains("interrupted"));
        assert_eq!(
            store.get_last_run("activity").unwrap().unwrap().status,
            JobRunStatus::Completed
        );
    }

    #[test]
    fn test_scheduler_state_upsert() {
        let test = create_test_store();
        let store = &test.store;
        assert!(store.get_state("last_shutdown_at").unwrap().is_none());

        store.set_state("last_shutdown_at", "a", at(1)).unwrap();
        store.set_state("last_shutdown_at", "b", at(2)).unwrap();
        assert_eq!(
            store.get_state("last_shutdown_at").unwrap().as_deref(),
            Some("b")
        );
    }

    #[test]
    fn test_reopen_existing_database() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("jobs.db");
        {
            let store = SqliteJobStore::new(&path).unwrap();
            store.create_job_state("streaks", at(4), at(0)).unwrap();
        }
        let store = SqliteJobStore::new(&path).unwrap();
        store.ping().unwrap();
        assert_eq!(store.get_all_job_states().unwrap().len(), 1);
    }
}
