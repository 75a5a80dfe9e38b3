use crate::chat_store::SqliteChatStore;
use crate::clock::Clock;
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;

/// Context provided to jobs during execution.
///
/// Contains references to shared resources and the settings every job
/// interprets the same way.
#[derive(Clone)]
pub struct JobContext {
    /// The message log and the derived analytics tables.
    pub chat_store: Arc<SqliteChatStore>,

    /// Wall-clock source.
    pub clock: Arc<dyn Clock>,

    /// Fixed offset from UTC, in hours, that defines a calendar day.
    pub timezone_offset_hours: i32,

    /// Pause between consecutive pages of a batch.
    pub batch_throttle: Duration,
}

impl JobContext {
    /// Create a new job context with the given dependencies.
    pub fn new(
        chat_store: Arc<SqliteChatStore>,
        clock: Arc<dyn Clock>,
        timezone_offset_hours: i32,
        batch_throttle: Duration,
    ) -> Self {
        Self {
            chat_store,
            clock,
            timezone_offset_hours,
            batch_throttle,
        }
    }

    /// Today's date in the configured timezone.
    pub fn today(&self) -> NaiveDate {
        self.clock.today(self.timezone_offset_hours)
    }

    /// Timezone offset in seconds, as used in SQL date expressions.
    pub fn timezone_offset_secs(&self) -> i64 {
        self.timezone_offset_hours as i64 * 3600
    }
}
