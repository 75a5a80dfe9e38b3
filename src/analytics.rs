//! Wiring of the analytics jobs onto a scheduler.
//!
//! Jobs are registered in dependency order: daily activity before streaks,
//! and both content stats and streaks before achievements.

use crate::background_jobs::jobs::{
    ChatAchievementJob, ChatStreakJob, DailyActivityJob, MessageContentJob,
};
use crate::background_jobs::{BatchJob, JobScheduler, SchedulerError};
use crate::config::{interval_from_hours, BackgroundJobsSettings};
use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Job keys in dependency order.
pub const ANALYTICS_JOB_KEYS: [&str; 4] = [
    "daily_activity",
    "chat_streaks",
    "message_content",
    "chat_achievements",
];

/// Canonical key for `key`, accepting short aliases.
pub fn canonical_job_key(key: &str) -> Option<&'static str> {
    match key {
        "daily_activity" | "activity" => Some("daily_activity"),
        "chat_streaks" | "streaks" => Some("chat_streaks"),
        "message_content" | "content" => Some("message_content"),
        "chat_achievements" | "achievements" => Some("chat_achievements"),
        _ => None,
    }
}

/// Build the job for `key` along with its configured interval.
pub fn build_job(
    key: &str,
    settings: &BackgroundJobsSettings,
) -> Result<(Arc<dyn BatchJob>, Duration)> {
    let Some(key) = canonical_job_key(key) else {
        bail!("Unknown job '{}'", key);
    };
    let (job, hours): (Arc<dyn BatchJob>, u64) = match key {
        "daily_activity" => {
            let s = &settings.daily_activity;
            (
                Arc::new(DailyActivityJob::new(s.retention_days, s.batch_size)),
                s.interval_hours,
            )
        }
        "chat_streaks" => {
            let s = &settings.chat_streaks;
            (Arc::new(ChatStreakJob::new(s.batch_size)), s.interval_hours)
        }
        "message_content" => {
            let s = &settings.message_content;
            (
                Arc::new(MessageContentJob::new(s.batch_size, s.vocabulary_limit)),
                s.interval_hours,
            )
        }
        _ => (
            Arc::new(ChatAchievementJob::new()),
            settings.chat_achievements.interval_hours,
        ),
    };
    Ok((job, interval_from_hours(hours)))
}

/// Register every analytics job on `scheduler`, in dependency order.
pub fn register_analytics_jobs(
    scheduler: &JobScheduler,
    settings: &BackgroundJobsSettings,
) -> Result<(), SchedulerError> {
    for key in ANALYTICS_JOB_KEYS {
        let (job, interval) = build_job(key, settings)?;
        scheduler.register(key, job, interval)?;
    }
    info!("Registered {} analytics jobs", ANALYTICS_JOB_KEYS.len());
    Ok(())
}

/// Turn user-supplied job names into canonical keys in dependency order.
///
/// `all` (or no arguments) selects every job. Duplicates collapse; unknown
/// names are an error.
pub fn resolve_job_keys<S: AsRef<str>>(args: &[S]) -> Result<Vec<&'static str>> {
    if args.is_empty() || args.iter().any(|a| a.as_ref() == "all") {
        return Ok(ANALYTICS_JOB_KEYS.to_vec());
    }

    let mut requested = Vec::with_capacity(args.len());
    for arg in args {
        let arg = arg.as_ref();
        match canonical_job_key(arg) {
            Some(key) => requested.push(key),
            None => bail!(
                "Unknown job '{}'. Valid jobs: all, {}",
                arg,
                ANALYTICS_JOB_KEYS.join(", ")
            ),
        }
    }

    Ok(ANALYTICS_JOB_KEYS
        .into_iter()
        .filter(|key| requested.contains(key))
        .collect())
}
