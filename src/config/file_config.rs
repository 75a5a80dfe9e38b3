use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub timezone_offset_hours: Option<i32>,

    pub scheduler: Option<SchedulerConfig>,
    pub background_jobs: Option<BackgroundJobsConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    pub shutdown_timeout_secs: Option<u64>,
    /// Pause between batch pages, in milliseconds.
    pub batch_throttle_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BackgroundJobsConfig {
    pub daily_activity: Option<DailyActivityConfig>,
    pub chat_streaks: Option<ChatStreaksConfig>,
    pub message_content: Option<MessageContentConfig>,
    pub chat_achievements: Option<ChatAchievementsConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DailyActivityConfig {
    pub interval_hours: Option<u64>,
    pub retention_days: Option<u32>,
    pub batch_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ChatStreaksConfig {
    pub interval_hours: Option<u64>,
    pub batch_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct MessageContentConfig {
    pub interval_hours: Option<u64>,
    pub batch_size: Option<usize>,
    /// Max distinct words persisted per user.
    pub vocabulary_limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ChatAchievementsConfig {
    pub interval_hours: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_job_sections() {
        let config: FileConfig = toml::from_str(
            r#"
            db_dir = "/data"
            timezone_offset_hours = 2

            [scheduler]
            batch_throttle_ms = 0

            [background_jobs.message_content]
            vocabulary_limit = 100

            [background_jobs.chat_achievements]
            interval_hours = 12
            "#,
        )
        .unwrap();

        assert_eq!(config.db_dir.as_deref(), Some("/data"));
        assert_eq!(config.timezone_offset_hours, Some(2));
        let scheduler = config.scheduler.unwrap();
        assert_eq!(scheduler.batch_throttle_ms, Some(0));
        assert_eq!(scheduler.shutdown_timeout_secs, None);

        let jobs = config.background_jobs.unwrap();
        assert_eq!(jobs.message_content.unwrap().vocabulary_limit, Some(100));
        assert_eq!(jobs.chat_achievements.unwrap().interval_hours, Some(12));
        assert!(jobs.daily_activity.is_none());
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert!(config.db_dir.is_none());
        assert!(config.background_jobs.is_none());
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = FileConfig::load(Path::new("/nonexistent/chat-stats.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
