use crate::client::{Client, Outcome};
use crate::date::{BatchDate, DateRange};
use crate::state::{CursorState, DEFAULT_HALT_THRESHOLD, StateStore};
use chrono::Utc;
use log::{error, info, warn};
use std::num::NonZeroU32;
use std::path::PathBuf;

pub const DEFAULT_STATE_FILE: &str = "batch_trigger_state.json";

/// What a run does once the breaker has tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HaltPolicy {
    /// Keep attempting the pending date on every run, alerting each time.
    #[default]
    Retry,
    /// Skip runs until the breaker is reset.
    RequireReset,
}

/// Per-run settings: where the cursor lives and how the breaker behaves.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub state_path: PathBuf,
    /// Consecutive failures that trip the breaker.
    pub halt_threshold: NonZeroU32,
    pub halt_policy: HaltPolicy,
    /// Clear the consecutive-failure counter before attempting.
    pub reset_breaker: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from(DEFAULT_STATE_FILE),
            halt_threshold: DEFAULT_HALT_THRESHOLD,
            halt_policy: HaltPolicy::default(),
            reset_breaker: false,
        }
    }
}

/// Inputs of one run. `today` is injected so runs can be replayed.
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub range: DateRange,
    pub credential: String,
    pub today: BatchDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReport {
    /// Today is outside the range; nothing was touched.
    OutOfRange { today: BatchDate },
    /// Every date in the range has been triggered.
    Exhausted,
    /// The pending date is still in the future.
    UpToDate { next: BatchDate },
    /// Breaker is tripped and the policy requires a reset.
    Halted { pending: BatchDate },
    Attempted {
        date: BatchDate,
        outcome: Outcome,
        halted: bool,
    },
}

/// Perform one scheduled run: at most one trigger call, state saved at the end.
pub async fn run(config: &RunConfig, client: &Client, args: &RunArgs) -> RunReport {
    if !args.range.contains(args.today) {
        info!(
            "Current date {} is outside the specified range ({})",
            args.today, args.range
        );
        return RunReport::OutOfRange { today: args.today };
    }

    let store = StateStore::new(&config.state_path);
    let mut state = store.load(args.range);
    if config.reset_breaker && state.consecutive_failures > 0 {
        info!(
            "Resetting breaker after {} consecutive failures",
            state.consecutive_failures
        );
        state.reset_breaker();
    }

    let report = step(config, client, args, &mut state).await;

    state.last_run = Some(Utc::now());
    if let Err(err) = store.save(&state) {
        error!(
            "Failed to persist state to {}: {}; the pending date will be retried",
            store.path().display(),
            err
        );
    }
    report
}

async fn step(
    config: &RunConfig,
    client: &Client,
    args: &RunArgs,
    state: &mut CursorState,
) -> RunReport {
    let Some(date) = state.next_pending_date() else {
        info!("All dates in {} have been triggered", args.range);
        return RunReport::Exhausted;
    };

    if config.halt_policy == HaltPolicy::RequireReset && state.is_halted(config.halt_threshold) {
        error!(
            "Halted after {} consecutive failures; {} not attempted until the breaker is reset",
            state.consecutive_failures, date
        );
        return RunReport::Halted { pending: date };
    }

    if date > args.today {
        info!("Up to date; next pending date is {}", date);
        return RunReport::UpToDate { next: date };
    }

    info!("Triggering batch job for {}", date);
    let outcome = client.invoke(date, &args.credential).await;
    let advance = state.advance(date, &outcome, config.halt_threshold);

    match &outcome {
        Outcome::Success { response_body } => {
            info!("Triggered {} successfully: {}", date, response_body);
        }
        Outcome::ApiError { response_body, .. } => {
            warn!(
                "Trigger for {} failed: {} (attempt {}): {}",
                date,
                outcome,
                state.failed_attempts.get(&date).copied().unwrap_or_default(),
                response_body
            );
        }
        Outcome::TransportError { .. } => {
            warn!(
                "Trigger for {} failed: {} (attempt {})",
                date,
                outcome,
                state.failed_attempts.get(&date).copied().unwrap_or_default()
            );
        }
    }

    if advance.halted {
        error!(
            "{} consecutive failures; operator intervention required before {} can proceed",
            state.consecutive_failures, date
        );
    }

    RunReport::Attempted {
        date,
        outcome,
        halted: advance.halted,
    }
}
