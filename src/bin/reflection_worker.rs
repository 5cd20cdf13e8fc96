use std::time::Duration;

use anyhow::Context;
use chrono::TimeDelta;
use clap::{Args, Parser, Subcommand};
use reflection_worker::{ConfigError, HttpAnalysisHandler, WorkerConfig, WorkerOptions};
use serde::Serialize;
use tracing_subscriber::{
    filter::EnvFilter, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

#[derive(Subcommand)]
enum Command {
    #[command(about = "Install or upgrade the analysis_queue table")]
    Migrate,
    #[command(about = "Enqueue the analyses every user is due for")]
    Populate,
    #[command(about = "Dispatch due analysis jobs")]
    Process {
        #[arg(long, env = "ANALYSIS_FUNCTIONS_URL")]
        functions_url: String,
        #[arg(long, env = "ANALYSIS_SERVICE_KEY", hide_env_values = true)]
        service_key: String,
        #[arg(long, env = "REFLECTION_HTTP_TIMEOUT_SECS", default_value_t = 45)]
        http_timeout_secs: u64,
    },
}

#[derive(Args)]
struct Tuning {
    #[arg(long, env = "REFLECTION_BATCH_SIZE")]
    batch_size: Option<i64>,
    #[arg(long, env = "REFLECTION_MAX_ATTEMPTS")]
    max_attempts: Option<i16>,
    #[arg(long, env = "REFLECTION_DAILY_MIN_CHARS")]
    daily_min_chars: Option<usize>,
    #[arg(long, env = "REFLECTION_CATCH_UP_DAYS")]
    catch_up_days: Option<i64>,
    #[arg(long, env = "REFLECTION_WEEKLY_MIN_ENTRIES")]
    weekly_min_entries: Option<usize>,
    #[arg(long, env = "REFLECTION_MONTHLY_MIN_ENTRIES")]
    monthly_min_entries: Option<usize>,
    #[arg(long, env = "REFLECTION_USER_PAGE_SIZE")]
    user_page_size: Option<i64>,
    #[arg(long, env = "REFLECTION_PRODUCER_CONCURRENCY")]
    producer_concurrency: Option<usize>,
    #[arg(long, env = "REFLECTION_CONSUMER_CONCURRENCY")]
    consumer_concurrency: Option<usize>,
    #[arg(long, env = "REFLECTION_INVOCATION_DEADLINE_SECS")]
    invocation_deadline_secs: Option<u64>,
    #[arg(long, env = "REFLECTION_STALE_CLAIM_AFTER_MINUTES")]
    stale_claim_after_minutes: Option<i64>,
}

impl Tuning {
    fn to_config(&self) -> Result<WorkerConfig, ConfigError> {
        let mut builder = WorkerConfig::builder();
        if let Some(value) = self.batch_size {
            builder.batch_size(value);
        }
        if let Some(value) = self.max_attempts {
            builder.max_attempts(value);
        }
        if let Some(value) = self.daily_min_chars {
            builder.daily_min_chars(value);
        }
        if let Some(value) = self.catch_up_days {
            builder.catch_up_days(value);
        }
        if let Some(value) = self.weekly_min_entries {
            builder.weekly_min_entries(value);
        }
        if let Some(value) = self.monthly_min_entries {
            builder.monthly_min_entries(value);
        }
        if let Some(value) = self.user_page_size {
            builder.user_page_size(value);
        }
        if let Some(value) = self.producer_concurrency {
            builder.producer_concurrency(value);
        }
        if let Some(value) = self.consumer_concurrency {
            builder.consumer_concurrency(value);
        }
        if let Some(value) = self.invocation_deadline_secs {
            builder.invocation_deadline(Duration::from_secs(value));
        }
        if let Some(value) = self.stale_claim_after_minutes {
            builder.stale_claim_after(TimeDelta::minutes(value));
        }
        builder.build()
    }
}

#[derive(Parser)]
#[command(
    author,
    version,
    about,
    long_about = "Schedules and dispatches diary reflection analyses"
)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,
    #[arg(long, env = "REFLECTION_SCHEMA", default_value = "public")]
    schema: String,
    #[arg(long, env = "REFLECTION_MAX_PG_CONN", default_value_t = 10)]
    max_pg_conn: u32,
    /// Compute local dates with the bundled timezone database only
    #[arg(long, env = "REFLECTION_LOCAL_TIMEZONE")]
    local_timezone: bool,
    /// Emit logs as JSON lines on stderr
    #[arg(long, env = "REFLECTION_LOG_JSON")]
    log_json: bool,
    #[command(flatten)]
    tuning: Tuning,
    #[command(subcommand)]
    command: Command,
}

fn enable_logs(json: bool) {
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));
    let registry = tracing_subscriber::registry().with(filter_layer);

    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_summary<T: Serialize>(summary: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    enable_logs(cli.log_json);

    let config = cli.tuning.to_config().context("Invalid configuration")?;
    let mut options = WorkerOptions::default()
        .database_url(&cli.database_url)
        .max_pg_conn(cli.max_pg_conn)
        .schema(&cli.schema)
        .config(config)
        .database_timezone(!cli.local_timezone);

    if let Command::Process {
        functions_url,
        service_key,
        http_timeout_secs,
    } = &cli.command
    {
        let handler = HttpAnalysisHandler::new(
            functions_url,
            service_key.as_str(),
            Duration::from_secs(*http_timeout_secs),
        )
        .context("Invalid analysis handler configuration")?;
        options = options.handler_for_all(handler);
    }

    let worker = options.init().await.context("Failed to start worker")?;

    match cli.command {
        Command::Migrate => {
            print_summary(&serde_json::json!({ "success": true, "schema": cli.schema }))?;
        }
        Command::Populate => {
            let summary = worker.producer().populate().await?;
            print_summary(&summary)?;
        }
        Command::Process { .. } => {
            let summary = worker.consumer()?.process().await?;
            print_summary(&summary)?;
        }
    }

    Ok(())
}
