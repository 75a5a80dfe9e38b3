mod file_config;

pub use file_config::{
    BackgroundJobsConfig, ChatAchievementsConfig, ChatStreaksConfig, DailyActivityConfig,
    FileConfig, MessageContentConfig, SchedulerConfig,
};

use crate::background_jobs::jobs::{chat_streaks, daily_activity, message_content};
use crate::background_jobs::SchedulerSettings;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const MIN_TIMEZONE_OFFSET_HOURS: i32 = -12;
pub const MAX_TIMEZONE_OFFSET_HOURS: i32 = 14;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub timezone_offset_hours: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub timezone_offset_hours: i32,

    pub scheduler: SchedulerConfigSettings,
    pub background_jobs: BackgroundJobsSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfigSettings {
    pub shutdown_timeout_secs: u64,
    pub batch_throttle_ms: u64,
}

impl Default for SchedulerConfigSettings {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 300,
            batch_throttle_ms: 50,
        }
    }
}

impl SchedulerConfigSettings {
    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }

    pub fn batch_throttle(&self) -> Duration {
        Duration::from_millis(self.batch_throttle_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyActivitySettings {
    pub interval_hours: u64,
    pub retention_days: u32,
    pub batch_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatStreaksSettings {
    pub interval_hours: u64,
    pub batch_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContentSettings {
    pub interval_hours: u64,
    pub batch_size: usize,
    pub vocabulary_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatAchievementsSettings {
    pub interval_hours: u64,
}

/// Per-job settings for the analytics jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundJobsSettings {
    pub daily_activity: DailyActivitySettings,
    pub chat_streaks: ChatStreaksSettings,
    pub message_content: MessageContentSettings,
    pub chat_achievements: ChatAchievementsSettings,
}

impl Default for BackgroundJobsSettings {
    fn default() -> Self {
        Self {
            daily_activity: DailyActivitySettings {
                interval_hours: 1,
                retention_days: daily_activity::DEFAULT_RETENTION_DAYS,
                batch_size: daily_activity::DEFAULT_BATCH_SIZE,
            },
            chat_streaks: ChatStreaksSettings {
                interval_hours: 4,
                batch_size: chat_streaks::DEFAULT_BATCH_SIZE,
            },
            message_content: MessageContentSettings {
                interval_hours: 6,
                batch_size: message_content::DEFAULT_BATCH_SIZE,
                vocabulary_limit: message_content::DEFAULT_VOCABULARY_LIMIT,
            },
            chat_achievements: ChatAchievementsSettings { interval_hours: 4 },
        }
    }
}

impl BackgroundJobsSettings {
    fn from_file(file: BackgroundJobsConfig) -> Self {
        let defaults = Self::default();

        let da = file.daily_activity.unwrap_or_default();
        let cs = file.chat_streaks.unwrap_or_default();
        let mc = file.message_content.unwrap_or_default();
        let ca = file.chat_achievements.unwrap_or_default();

        Self {
            daily_activity: DailyActivitySettings {
                interval_hours: da
                    .interval_hours
                    .unwrap_or(defaults.daily_activity.interval_hours),
                retention_days: da
                    .retention_days
                    .unwrap_or(defaults.daily_activity.retention_days),
                batch_size: da.batch_size.unwrap_or(defaults.daily_activity.batch_size),
            },
            chat_streaks: ChatStreaksSettings {
                interval_hours: cs
                    .interval_hours
                    .unwrap_or(defaults.chat_streaks.interval_hours),
                batch_size: cs.batch_size.unwrap_or(defaults.chat_streaks.batch_size),
            },
            message_content: MessageContentSettings {
                interval_hours: mc
                    .interval_hours
                    .unwrap_or(defaults.message_content.interval_hours),
                batch_size: mc.batch_size.unwrap_or(defaults.message_content.batch_size),
                vocabulary_limit: mc
                    .vocabulary_limit
                    .unwrap_or(defaults.message_content.vocabulary_limit),
            },
            chat_achievements: ChatAchievementsSettings {
                interval_hours: ca
                    .interval_hours
                    .unwrap_or(defaults.chat_achievements.interval_hours),
            },
        }
    }

    fn validate(&self) -> Result<()> {
        let intervals = [
            ("daily_activity", self.daily_activity.interval_hours),
            ("chat_streaks", self.chat_streaks.interval_hours),
            ("message_content", self.message_content.interval_hours),
            ("chat_achievements", self.chat_achievements.interval_hours),
        ];
        for (job, hours) in intervals {
            if hours == 0 {
                bail!("background_jobs.{}.interval_hours must be at least 1", job);
            }
        }

        let batch_sizes = [
            ("daily_activity", self.daily_activity.batch_size),
            ("chat_streaks", self.chat_streaks.batch_size),
            ("message_content", self.message_content.batch_size),
        ];
        for (job, size) in batch_sizes {
            if size == 0 {
                bail!("background_jobs.{}.batch_size must be at least 1", job);
            }
        }
        Ok(())
    }
}

/// Hours as a schedule interval.
pub fn interval_from_hours(hours: u64) -> Duration {
    Duration::from_secs(hours * 3600)
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let timezone_offset_hours = file
            .timezone_offset_hours
            .or(cli.timezone_offset_hours)
            .unwrap_or(0);
        if !(MIN_TIMEZONE_OFFSET_HOURS..=MAX_TIMEZONE_OFFSET_HOURS).contains(&timezone_offset_hours)
        {
            bail!(
                "Timezone offset must be between {} and {} hours, got {}",
                MIN_TIMEZONE_OFFSET_HOURS,
                MAX_TIMEZONE_OFFSET_HOURS,
                timezone_offset_hours
            );
        }

        let scheduler_file = file.scheduler.unwrap_or_default();
        let scheduler_defaults = SchedulerConfigSettings::default();
        let scheduler = SchedulerConfigSettings {
            shutdown_timeout_secs: scheduler_file
                .shutdown_timeout_secs
                .unwrap_or(scheduler_defaults.shutdown_timeout_secs),
            batch_throttle_ms: scheduler_file
                .batch_throttle_ms
                .unwrap_or(scheduler_defaults.batch_throttle_ms),
        };

        let background_jobs =
            BackgroundJobsSettings::from_file(file.background_jobs.unwrap_or_default());
        background_jobs.validate()?;

        Ok(Self {
            db_dir,
            timezone_offset_hours,
            scheduler,
            background_jobs,
        })
    }

    pub fn chat_db_path(&self) -> PathBuf {
        self.db_dir.join("chat.db")
    }

    pub fn jobs_db_path(&self) -> PathBuf {
        self.db_dir.join("jobs.db")
    }
}
