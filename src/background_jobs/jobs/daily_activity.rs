//! Daily activity aggregation job.
//!
//! Rolls the message log up into one row per user and local calendar day,
//! then drops rows that fell out of the retention window.

use crate::background_jobs::{process_batch, BatchJob, JobContext, JobError};
use crate::chat_store::{read_date, read_optional_date, DailyActivityRecord, DATE_FORMAT};
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveTime};
use rusqlite::params;
use tracing::{debug, info};

pub const DEFAULT_RETENTION_DAYS: u32 = 90;
pub const DEFAULT_BATCH_SIZE: usize = 500;

pub struct DailyActivityJob {
    retention_days: u32,
    batch_size: usize,
}

impl DailyActivityJob {
    pub fn new(retention_days: u32, batch_size: usize) -> Self {
        Self {
            retention_days,
            batch_size,
        }
    }

    /// First date to re-aggregate: the latest already-aggregated day, but
    /// never earlier than the retention window.
    fn start_date(latest: Option<NaiveDate>, window_start: NaiveDate) -> NaiveDate {
        latest.map_or(window_start, |d| d.max(window_start))
    }
}

impl Default for DailyActivityJob {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_DAYS, DEFAULT_BATCH_SIZE)
    }
}

impl BatchJob for DailyActivityJob {
    fn id(&self) -> &'static str {
        "daily_activity"
    }

    fn name(&self) -> &'static str {
        "Daily Activity Tracker"
    }

    fn description(&self) -> &'static str {
        "Aggregate messages into per-user daily activity and prune old days"
    }

    fn execute(&self, ctx: &JobContext) -> Result<usize, JobError> {
        let store = &ctx.chat_store;
        let today = ctx.today();
        let window_start = today - ChronoDuration::days(self.retention_days as i64);

        let latest = store
            .get(
                "SELECT MAX(date) FROM user_daily_activity",
                &[],
                |row| read_optional_date(row, 0),
            )?
            .flatten();
        let start = Self::start_date(latest, window_start);

        // Local midnight of `start`, as a UTC epoch millisecond bound.
        let offset_secs = ctx.timezone_offset_secs();
        let start_ms = (start.and_time(NaiveTime::MIN).and_utc().timestamp() - offset_secs) * 1000;

        info!(
            "Aggregating daily activity from {} (latest aggregated: {:?}, window starts {})",
            start, latest, window_start
        );

        let outcome = process_batch(
            store,
            "SELECT username, date(timestamp / 1000 + ?1, 'unixepoch') AS day,
                    COUNT(*), COALESCE(SUM(word_count), 0), MIN(timestamp), MAX(timestamp)
             FROM messages
             WHERE timestamp >= ?2
             GROUP BY username, day
             ORDER BY day, username",
            &[&offset_secs, &start_ms],
            self.batch_size,
            ctx.batch_throttle,
            |row| {
                Ok(DailyActivityRecord {
                    username: row.get(0)?,
                    date: read_date(row, 1)?,
                    message_count: row.get::<_, i64>(2)? as u64,
                    word_count: row.get::<_, i64>(3)? as u64,
                    first_message_time: row.get(4)?,
                    last_message_time: row.get(5)?,
                })
            },
            |tx, record| {
                tx.execute(
                    "INSERT INTO user_daily_activity
                     (username, date, message_count, word_count, first_message_time, last_message_time)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(username, date) DO UPDATE SET
                        message_count = excluded.message_count,
                        word_count = excluded.word_count,
                        first_message_time = excluded.first_message_time,
                        last_message_time = excluded.last_message_time",
                    params![
                        record.username,
                        record.date.format(DATE_FORMAT).to_string(),
                        record.message_count as i64,
                        record.word_count as i64,
                        record.first_message_time,
                        record.last_message_time,
                    ],
                )?;
                Ok(())
            },
        )?;

        let pruned = store.run(
            "DELETE FROM user_daily_activity WHERE date < ?1",
            &[&window_start.format(DATE_FORMAT).to_string()],
        )?;
        if pruned > 0 {
            info!(
                "Pruned {} daily activity rows older than {}",
                pruned, window_start
            );
        }
        debug!(
            "Daily activity: {} rows upserted in {} transactions",
            outcome.total_processed, outcome.transactions
        );

        Ok(outcome.total_processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::jobs::test_support::{utc, TestEnv};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_start_date_never_precedes_window() {
        let window = date(2024, 1, 1);
        assert_eq!(DailyActivityJob::start_date(None, window), window);
        assert_eq!(
            DailyActivityJob::start_date(Some(date(2023, 12, 1)), window),
            window
        );
        assert_eq!(
            DailyActivityJob::start_date(Some(date(2024, 2, 1)), window),
            date(2024, 2, 1)
        );
    }

    #[test]
    fn test_aggregates_per_user_and_day() {
        let env = TestEnv::new(utc(2024, 3, 10, 20, 0), 0);
        env.say("alice", "good morning everyone", utc(2024, 3, 9, 8, 0));
        env.say("alice", "bye", utc(2024, 3, 9, 22, 0));
        env.say("alice", "hello again", utc(2024, 3, 10, 9, 0));
        env.say("bob", "hi", utc(2024, 3, 10, 10, 0));

        let upserted = DailyActivityJob::default().execute(&env.ctx).unwrap();
        assert_eq!(upserted, 3);

        let alice = env.store.get_daily_activity("alice").unwrap();
        assert_eq!(alice.len(), 2);
        assert_eq!(alice[0].date, date(2024, 3, 10));
        assert_eq!(alice[1].date, date(2024, 3, 9));
        assert_eq!(alice[1].message_count, 2);
        assert_eq!(alice[1].word_count, 4);
        assert_eq!(
            alice[1].first_message_time,
            Some(utc(2024, 3, 9, 8, 0).timestamp_millis())
        );
        assert_eq!(
            alice[1].last_message_time,
            Some(utc(2024, 3, 9, 22, 0).timestamp_millis())
        );
    }

    #[test]
    fn test_timezone_offset_moves_day_boundary() {
        let env = TestEnv::new(utc(2024, 3, 10, 20, 0), 3);
        // 22:30 UTC is 01:30 the next day at UTC+3.
        env.say("alice", "late", utc(2024, 3, 8, 22, 30));

        DailyActivityJob::default().execute(&env.ctx).unwrap();

        let alice = env.store.get_daily_activity("alice").unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].date, date(2024, 3, 9));
    }

    #[test]
    fn test_rerun_recomputes_latest_day_without_double_counting() {
        let env = TestEnv::new(utc(2024, 3, 10, 12, 0), 0);
        env.say("alice", "one", utc(2024, 3, 9, 10, 0));
        env.say("alice", "two", utc(2024, 3, 10, 10, 0));
        DailyActivityJob::default().execute(&env.ctx).unwrap();

        env.say("alice", "three", utc(2024, 3, 10, 11, 0));
        env.clock.set(utc(2024, 3, 10, 13, 0));
        let upserted = DailyActivityJob::default().execute(&env.ctx).unwrap();

        // Only the latest day is re-aggregated.
        assert_eq!(upserted, 1);
        let alice = env.store.get_daily_activity("alice").unwrap();
        assert_eq!(alice[0].date, date(2024, 3, 10));
        assert_eq!(alice[0].message_count, 2);
        assert_eq!(alice[1].message_count, 1);

        // Unchanged data yields unchanged rows.
        DailyActivityJob::default().execute(&env.ctx).unwrap();
        assert_eq!(env.store.get_daily_activity("alice").unwrap(), alice);
    }

    #[test]
    fn test_retention_window_limits_backfill_and_prunes() {
        let env = TestEnv::new(utc(2024, 3, 31, 12, 0), 0);
        env.say("alice", "ancient", utc(2024, 1, 1, 12, 0));
        env.say("alice", "recent", utc(2024, 3, 25, 12, 0));
        env.store
            .run(
                "INSERT INTO user_daily_activity (username, date, message_count, word_count)
                 VALUES ('bob', '2024-02-01', 5, 5)",
                &[],
            )
            .unwrap();

        let job = DailyActivityJob::new(30, 100);
        job.execute(&env.ctx).unwrap();

        // Window starts 2024-03-01: the January message is never aggregated and
        // bob's February row is pruned.
        let alice = env.store.get_daily_activity("alice").unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].date, date(2024, 3, 25));
        assert!(env.store.get_daily_activity("bob").unwrap().is_empty());
    }

    #[test]
    fn test_small_batches_cover_all_groups() {
        let env = TestEnv::new(utc(2024, 3, 10, 20, 0), 0);
        for i in 0..7 {
            env.say(&format!("user{}", i), "hello", utc(2024, 3, 10, 8, i));
        }

        let upserted = DailyActivityJob::new(90, 3).execute(&env.ctx).unwrap();
        assert_eq!(upserted, 7);
        assert_eq!(env.store.cache_status().unwrap()[0].record_count, 7);
    }

    #[test]
    fn test_empty_log() {
        let env = TestEnv::new(utc(2024, 3, 10, 20, 0), 0);
        assert_eq!(DailyActivityJob::default().execute(&env.ctx).unwrap(), 0);
    }
}
