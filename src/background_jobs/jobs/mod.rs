//! Analytics job implementations.
//!
//! Data flows from `messages` into daily activity and content stats, from
//! daily activity into streaks, and from all of them into achievements.

pub mod chat_achievements;
pub mod chat_streaks;
pub mod daily_activity;
pub mod message_content;

pub use chat_achievements::{AchievementMetric, ChatAchievementJob};
pub use chat_streaks::{compute_streak, ChatStreakJob, StreakSummary};
pub use daily_activity::DailyActivityJob;
pub use message_content::{analyze_message, MessageContentJob, MessageFeatures};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::background_jobs::JobContext;
    use crate::chat_store::SqliteChatStore;
    use crate::clock::FixedClock;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    pub struct TestEnv {
        pub ctx: JobContext,
        pub store: Arc<SqliteChatStore>,
        pub clock: Arc<FixedClock>,
        _temp_dir: TempDir,
    }

    impl TestEnv {
        pub fn new(now: DateTime<Utc>, timezone_offset_hours: i32) -> Self {
            let temp_dir = TempDir::new().unwrap();
            let store = Arc::new(SqliteChatStore::new(temp_dir.path().join("chat.db")).unwrap());
            let clock = Arc::new(FixedClock::new(now));
            let ctx = JobContext::new(
                store.clone(),
                clock.clone(),
                timezone_offset_hours,
                Duration::ZERO,
            );
            Self {
                ctx,
                store,
                clock,
                _temp_dir: temp_dir,
            }
        }

        pub fn say(&self, username: &str, body: &str, at: DateTime<Utc>) {
            self.store
                .insert_message(username, body, at.timestamp_millis())
                .unwrap();
        }
    }

    pub fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }
}
