//! Run analytics jobs once, outside the scheduler's timers.
//!
//! Runs are recorded in the jobs database like any other run, with the
//! `manual` trigger.

use anyhow::{Context, Result};
use chat_stats_server::background_jobs::{metrics, JobScheduler, RunOutcome};
use chat_stats_server::chat_store::TableStatus;
use chat_stats_server::job_store::{JobState, JobStore, RunTrigger};
use chat_stats_server::{
    build_job, resolve_job_keys, AppConfig, CliConfig, FileConfig, JobContext, SqliteChatStore,
    SqliteJobStore, SystemClock,
};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(about = "Run chat analytics jobs once")]
struct CliArgs {
    /// Jobs to run: all, daily_activity (activity), chat_streaks (streaks),
    /// message_content (content), chat_achievements (achievements).
    #[clap(default_value = "all")]
    pub jobs: Vec<String>,

    /// Fixed UTC offset in hours that defines a calendar day.
    #[clap(long = "timezone", allow_negative_numbers = true)]
    pub timezone_offset_hours: Option<i32>,

    /// Print derived table counts and persisted job state instead of running jobs.
    #[clap(long)]
    pub status: bool,

    /// Print status as JSON.
    #[clap(long)]
    pub json: bool,

    /// Print Prometheus metrics after running.
    #[clap(long)]
    pub metrics: bool,

    /// Directory holding chat.db and jobs.db.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Path to a TOML config file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,
}

#[derive(Serialize)]
struct StatusReport {
    tables: Vec<TableStatus>,
    jobs: Vec<JobState>,
}

fn print_status(report: &StatusReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("Derived tables:");
    for table in &report.tables {
        println!(
            "  {:<24} {:>8} records   last updated: {}",
            table.table,
            table.record_count,
            table.last_updated.as_deref().unwrap_or("never")
        );
    }

    println!("Jobs:");
    if report.jobs.is_empty() {
        println!("  (no job has run yet)");
    }
    for job in &report.jobs {
        println!(
            "  {:<24} {:<8} last run: {}   next run: {}   errors: {}",
            job.job_name,
            job.status.as_str(),
            job.last_run
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string()),
            job.next_run.to_rfc3339(),
            job.error_count
        );
        if let Some(last_error) = &job.last_error {
            println!("  {:<24} last error: {}", "", last_error);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        timezone_offset_hours: cli_args.timezone_offset_hours,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    let chat_store = Arc::new(SqliteChatStore::new(config.chat_db_path())?);
    let job_store = Arc::new(SqliteJobStore::new(config.jobs_db_path())?);

    if cli_args.status {
        let report = StatusReport {
            tables: chat_store.cache_status()?,
            jobs: job_store.get_all_job_states()?,
        };
        return print_status(&report, cli_args.json);
    }

    let keys = resolve_job_keys(&cli_args.jobs)?;

    let context = JobContext::new(
        chat_store,
        Arc::new(SystemClock),
        config.timezone_offset_hours,
        config.scheduler.batch_throttle(),
    );
    let scheduler = JobScheduler::new(
        job_store,
        context,
        config.scheduler.scheduler_settings(),
    );
    scheduler
        .init()
        .context("Job scheduler could not reach its store")?;
    for key in &keys {
        let (job, interval) = build_job(key, &config.background_jobs)?;
        scheduler.register(key, job, interval)?;
    }

    let mut failed = 0;
    for key in &keys {
        info!("Running job {}...", key);
        match scheduler.run_job(key, RunTrigger::Manual).await {
            Ok(RunOutcome::Completed { records_processed }) => {
                info!("Job {} processed {} records", key, records_processed);
            }
            Ok(RunOutcome::Failed { error }) => {
                failed += 1;
                error!("Job {} failed: {}", key, error);
            }
            Ok(RunOutcome::Skipped) => info!("Job {} skipped: already running", key),
            Err(e) => {
                failed += 1;
                error!("Job {} could not run: {}", key, e);
            }
        }
    }
    info!(
        "Finished {} jobs ({} succeeded, {} failed)",
        keys.len(),
        keys.len() - failed,
        failed
    );

    if cli_args.metrics {
        print!("{}", metrics::render()?);
    }
    Ok(())
}
