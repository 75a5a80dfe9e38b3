use anyhow::{Context, Result};
use chat_stats_server::background_jobs::JobScheduler;
use chat_stats_server::{
    register_analytics_jobs, AppConfig, CliConfig, FileConfig, JobContext, SqliteChatStore,
    SqliteJobStore, SystemClock,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, level_filters::LevelFilter, warn};
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
struct CliArgs {
    /// Directory holding chat.db and jobs.db.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Path to a TOML config file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Fixed UTC offset in hours that defines a calendar day.
    #[clap(long = "timezone", allow_negative_numbers = true)]
    pub timezone_offset_hours: Option<i32>,
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
        db_dir: cli_args.db_dir,
        timezone_offset_hours: cli_args.timezone_offset_hours,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Opening chat database at {:?}...", config.chat_db_path());
    let chat_store = Arc::new(SqliteChatStore::new(config.chat_db_path())?);
    info!("Opening jobs database at {:?}...", config.jobs_db_path());
    let job_store = Arc::new(SqliteJobStore::new(config.jobs_db_path())?);

    let context = JobContext::new(
        chat_store,
        Arc::new(SystemClock),
        config.timezone_offset_hours,
        config.scheduler.batch_throttle(),
    );
    let mut scheduler =
        JobScheduler::new(job_store, context, config.scheduler.scheduler_settings());
    scheduler
        .init()
        .context("Job scheduler could not reach its store")?;
    register_analytics_jobs(&scheduler, &config.background_jobs)?;
    scheduler.start()?;

    info!(
        "Chat stats scheduler running (timezone offset {}h), press Ctrl+C to stop",
        config.timezone_offset_hours
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    match scheduler.stop().await {
        Ok(true) => info!("Job scheduler stopped cleanly"),
        Ok(false) => warn!("Job scheduler stopped with jobs still running"),
        Err(e) => error!("Failed to record scheduler shutdown: {}", e),
    }
    Ok(())
}
