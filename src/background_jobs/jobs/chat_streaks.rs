//! Consecutive-day chat streaks.

use crate::background_jobs::{process_batch, BatchJob, JobContext, JobError};
use crate::chat_store::{read_date, SqliteChatStore, DATE_FORMAT};
use chrono::NaiveDate;
use rusqlite::params;
use tracing::info;

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Streak figures derived from one user's active dates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreakSummary {
    pub current_streak: u32,
    pub best_streak: u32,
    pub last_active_date: NaiveDate,
    pub streak_start_date: Option<NaiveDate>,
    pub total_active_days: u32,
}

/// Compute streaks from distinct active dates sorted most recent first.
///
/// The current streak survives while the latest active day is today or
/// yesterday. Returns `None` for an empty history.
pub fn compute_streak(dates_desc: &[NaiveDate], today: NaiveDate) -> Option<StreakSummary> {
    let most_recent = *dates_desc.first()?;

    let mut current_streak = 0u32;
    let mut streak_start_date = None;
    if (today - most_recent).num_days() <= 1 {
        current_streak = 1;
        streak_start_date = Some(most_recent);
        for pair in dates_desc.windows(2) {
            if (pair[0] - pair[1]).num_days() != 1 {
                break;
            }
            current_streak += 1;
            streak_start_date = Some(pair[1]);
        }
    }

    let mut best_streak = 1u32;
    let mut run = 1u32;
    for pair in dates_desc.windows(2) {
        if (pair[0] - pair[1]).num_days() == 1 {
            run += 1;
            best_streak = best_streak.max(run);
        } else {
            run = 1;
        }
    }

    Some(StreakSummary {
        current_streak,
        best_streak: best_streak.max(current_streak),
        last_active_date: most_recent,
        streak_start_date,
        total_active_days: dates_desc.len() as u32,
    })
}

pub struct ChatStreakJob {
    batch_size: usize,
}

impl ChatStreakJob {
    pub fn new(batch_size: usize) -> Self {
        Self { batch_size }
    }
}

impl Default for ChatStreakJob {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl BatchJob for ChatStreakJob {
    fn id(&self) -> &'static str {
        "chat_streaks"
    }

    fn name(&self) -> &'static str {
        "Chat Streak Calculator"
    }

    fn description(&self) -> &'static str {
        "Recompute current and best consecutive-day chat streaks per user"
    }

    fn execute(&self, ctx: &JobContext) -> Result<usize, JobError> {
        let today = ctx.today();
        let updated_at = SqliteChatStore::format_datetime(&ctx.clock.now());

        let outcome = process_batch(
            &ctx.chat_store,
            "SELECT DISTINCT username FROM user_daily_activity ORDER BY username",
            &[],
            self.batch_size,
            ctx.batch_throttle,
            |row| row.get::<_, String>(0),
            |tx, username| {
                let mut stmt = tx.prepare_cached(
                    "SELECT date FROM user_daily_activity WHERE username = ?1 ORDER BY date DESC",
                )?;
                let dates = stmt
                    .query_map([username], |row| read_date(row, 0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                let Some(summary) = compute_streak(&dates, today) else {
                    return Ok(());
                };

                tx.execute(
                    "INSERT INTO user_chat_streaks
                     (username, current_streak, best_streak, last_active_date, streak_start_date,
                      total_active_days, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(username) DO UPDATE SET
                        current_streak = excluded.current_streak,
                        best_streak = excluded.best_streak,
                        last_active_date = excluded.last_active_date,
                        streak_start_date = excluded.streak_start_date,
                        total_active_days = excluded.total_active_days,
                        updated_at = excluded.updated_at",
                    params![
                        username,
                        summary.current_streak,
                        summary.best_streak,
                        summary.last_active_date.format(DATE_FORMAT).to_string(),
                        summary
                            .streak_start_date
                            .map(|d| d.format(DATE_FORMAT).to_string()),
                        summary.total_active_days,
                        updated_at,
                    ],
                )?;
                Ok(())
            },
        )?;

        info!(
            "Updated streaks for {} users in {} transactions",
            outcome.total_processed, outcome.transactions
        );
        Ok(outcome.total_processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::jobs::test_support::{utc, TestEnv};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn dates(list: &[&str]) -> Vec<NaiveDate> {
        list.iter().map(|s| d(s)).collect()
    }

    #[test]
    fn test_broken_streak_keeps_best() {
        let history = dates(&["2024-01-10", "2024-01-03", "2024-01-02", "2024-01-01"]);
        let summary = compute_streak(&history, d("2024-01-10")).unwrap();
        assert_eq!(summary.current_streak, 1);
        assert_eq!(summary.best_streak, 3);
        assert_eq!(summary.total_active_days, 4);
        assert_eq!(summary.streak_start_date, Some(d("2024-01-10")));
        assert_eq!(summary.last_active_date, d("2024-01-10"));
    }

    #[test]
    fn test_yesterday_is_within_grace_period() {
        let history = dates(&["2024-01-09", "2024-01-08", "2024-01-07"]);
        let summary = compute_streak(&history, d("2024-01-10")).unwrap();
        assert_eq!(summary.current_streak, 3);
        assert_eq!(summary.best_streak, 3);
        assert_eq!(summary.streak_start_date, Some(d("2024-01-07")));
    }

    #[test]
    fn test_lapsed_streak_is_zero() {
        let history = dates(&["2024-01-08", "2024-01-07"]);
        let summary = compute_streak(&history, d("2024-01-10")).unwrap();
        assert_eq!(summary.current_streak, 0);
        assert_eq!(summary.streak_start_date, None);
        assert_eq!(summary.best_streak, 2);
    }

    #[test]
    fn test_single_day() {
        let today = compute_streak(&dates(&["2024-01-10"]), d("2024-01-10")).unwrap();
        assert_eq!((today.current_streak, today.best_streak), (1, 1));

        let old = compute_streak(&dates(&["2024-01-01"]), d("2024-01-10")).unwrap();
        assert_eq!((old.current_streak, old.best_streak), (0, 1));
    }

    #[test]
    fn test_empty_history() {
        assert!(compute_streak(&[], d("2024-01-10")).is_none());
    }

    #[test]
    fn test_best_is_never_below_current() {
        let histories = [
            dates(&["2024-01-10", "2024-01-09", "2024-01-08", "2024-01-05", "2024-01-04"]),
            dates(&["2024-01-09", "2024-01-07", "2024-01-06", "2024-01-05", "2024-01-04"]),
            dates(&["2024-01-10", "2024-01-08", "2024-01-06"]),
            dates(&["2023-12-31", "2023-12-30"]),
        ];
        for history in &histories {
            let summary = compute_streak(history, d("2024-01-10")).unwrap();
            assert!(summary.best_streak >= summary.current_streak, "{:?}", history);
        }
    }

    fn seed_activity(env: &TestEnv, username: &str, days: &[&str]) {
        for day in days {
            env.store
                .run(
                    "INSERT INTO user_daily_activity (username, date, message_count, word_count)
                     VALUES (?1, ?2, 1, 1)",
                    &[&username, day],
                )
                .unwrap();
        }
    }

    #[test]
    fn test_job_persists_streaks() {
        let env = TestEnv::new(utc(2024, 1, 10, 18, 0), 0);
        seed_activity(
            &env,
            "bob",
            &["2024-01-01", "2024-01-02", "2024-01-03", "2024-01-10"],
        );
        seed_activity(&env, "carol", &["2024-01-08"]);

        let processed = ChatStreakJob::default().execute(&env.ctx).unwrap();
        assert_eq!(processed, 2);

        let bob = env.store.get_streak("bob").unwrap().unwrap();
        assert_eq!(bob.current_streak, 1);
        assert_eq!(bob.best_streak, 3);
        assert_eq!(bob.total_active_days, 4);
        assert_eq!(bob.streak_start_date, Some(d("2024-01-10")));

        let carol = env.store.get_streak("carol").unwrap().unwrap();
        assert_eq!(carol.current_streak, 0);
        assert_eq!(carol.streak_start_date, None);
        assert_eq!(carol.best_streak, 1);

        assert!(env.store.get_streak("nobody").unwrap().is_none());
    }

    #[test]
    fn test_rerun_on_unchanged_data_is_identical() {
        let env = TestEnv::new(utc(2024, 1, 10, 18, 0), 0);
        seed_activity(&env, "bob", &["2024-01-09", "2024-01-10"]);

        ChatStreakJob::new(1).execute(&env.ctx).unwrap();
        let first = env.store.get_streak("bob").unwrap().unwrap();
        ChatStreakJob::new(1).execute(&env.ctx).unwrap();
        let second = env.store.get_streak("bob").unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(first.current_streak, 2);
    }
}
