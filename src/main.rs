use batchtrigger::{
    BatchDate, Client, DateRange, HaltPolicy, RunArgs, RunConfig, RunReport, TransportConfig,
    TriggerError, run,
};
use clap::{Parser, ValueEnum};
use env_logger::{Env, Target};
use log::{debug, error};
use std::fs::OpenOptions;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "batchtrigger",
    about = "Trigger the batch job for the next pending date of a range",
    after_help = "Run from a scheduler at most once at a time: the state file is not locked."
)]
struct Cli {
    /// First date of the range, YYYYMMDD
    #[arg(value_parser = parse_date)]
    start_date: BatchDate,
    /// Last date of the range (inclusive), YYYYMMDD
    #[arg(value_parser = parse_date)]
    end_date: BatchDate,
    /// CTK cookie forwarded to the orchestrator
    #[arg(env = "BATCH_TRIGGER_CTK", hide_env_values = true)]
    credential: String,

    /// State file tracking progress between runs
    #[arg(long, env = "BATCH_TRIGGER_STATE", default_value = batchtrigger::runner::DEFAULT_STATE_FILE)]
    state_file: PathBuf,
    /// Trigger endpoint
    #[arg(long, env = "BATCH_TRIGGER_ENDPOINT", default_value = batchtrigger::DEFAULT_ENDPOINT)]
    endpoint: String,
    /// Consecutive failures that trip the breaker
    #[arg(long, env = "BATCH_TRIGGER_HALT_THRESHOLD", default_value = "3")]
    halt_threshold: NonZeroU32,
    /// Behaviour once the breaker has tripped
    #[arg(long, value_enum, env = "BATCH_TRIGGER_HALT_POLICY", default_value = "retry")]
    halt_policy: Policy,
    /// Clear the consecutive-failure counter before this run
    #[arg(long)]
    reset_breaker: bool,
    /// Transport retries within a single trigger call
    #[arg(long, default_value_t = 3)]
    retries: u32,
    /// Delay between transport retries
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    retry_delay_secs: u64,
    /// Timeout of each request attempt
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    timeout_secs: u64,
    /// Ceiling for the whole trigger call, retries included
    #[arg(long, value_name = "SECS", default_value_t = 120)]
    max_time_secs: u64,
    /// Append log output to this file instead of stderr
    #[arg(long, env = "BATCH_TRIGGER_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Policy {
    Retry,
    RequireReset,
}

impl From<Policy> for HaltPolicy {
    fn from(value: Policy) -> Self {
        match value {
            Policy::Retry => HaltPolicy::Retry,
            Policy::RequireReset => HaltPolicy::RequireReset,
        }
    }
}

fn parse_date(raw: &str) -> Result<BatchDate, String> {
    raw.parse().map_err(|e: TriggerError| e.to_string())
}

fn init_logging(log_file: Option<&PathBuf>) -> std::io::Result<()> {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(err) = init_logging(cli.log_file.as_ref()) {
        eprintln!("Failed to open log file: {err}");
        return ExitCode::FAILURE;
    }

    match execute(cli).await {
        Ok(report) => {
            debug!("Run finished: {:?}", report);
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<RunReport, TriggerError> {
    let range = DateRange::new(cli.start_date, cli.end_date)?;

    let transport = TransportConfig {
        endpoint: cli.endpoint,
        request_timeout: Duration::from_secs(cli.timeout_secs),
        retries: cli.retries,
        retry_delay: Duration::from_secs(cli.retry_delay_secs),
        max_time: Duration::from_secs(cli.max_time_secs),
        ..TransportConfig::default()
    };
    let client = Client::new(transport)?;

    let config = RunConfig {
        state_path: cli.state_file,
        halt_threshold: cli.halt_threshold,
        halt_policy: cli.halt_policy.into(),
        reset_breaker: cli.reset_breaker,
    };
    let args = RunArgs {
        range,
        credential: cli.credential,
        today: BatchDate::today_utc(),
    };

    Ok(run(&config, &client, &args).await)
}
