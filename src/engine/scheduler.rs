//! Multi-market scheduler: fans one tick out to every market pipeline
//! concurrently, isolates failures per market, and owns the fatal
//! consecutive-error circuit breaker.

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::{pipeline, MarketContext};

/// Delay after a tick in which at least one round executed.
const EXECUTED_TICK_DELAY: Duration = Duration::from_secs(5);
/// Delay when only genesis/ready-state work happened, or nothing was
/// ready: check again soon.
const RECHECK_DELAY: Duration = Duration::from_secs(3);
/// Delay after a tick-level error.
const ERROR_DELAY: Duration = Duration::from_secs(5);

/// Consecutive tick-level errors before the process gives up. The
/// outermost circuit breaker against infinite silent failure loops.
const MAX_CONSECUTIVE_ERRORS: u32 = 20;

#[derive(Debug, Clone, Copy)]
pub struct TickSummary {
    pub any_success: bool,
    pub any_executed: bool,
}

pub struct Scheduler {
    markets: Vec<Arc<MarketContext>>,
}

impl Scheduler {
    pub fn new(markets: Vec<MarketContext>) -> Self {
        Self {
            markets: markets.into_iter().map(Arc::new).collect(),
        }
    }

    /// Runs every market's pipeline once, concurrently. A market's
    /// failure (including a panic inside its task) never cancels its
    /// siblings; the tick settles only once all pipelines have.
    pub async fn tick(&self) -> Result<TickSummary> {
        info!("starting tick for {} markets", self.markets.len());

        let handles: Vec<_> = self
            .markets
            .iter()
            .map(|ctx| {
                let ctx = ctx.clone();
                tokio::spawn(pipeline::run_market_tick(ctx))
            })
            .collect();

        let mut any_success = false;
        let mut any_executed = false;
        let mut unsettled = 0usize;

        for (handle, ctx) in handles.into_iter().zip(&self.markets) {
            match handle.await {
                Ok(report) => {
                    info!(
                        "[{}] tick result: success={}, executed={}, cancelled={}, action={}",
                        report.market,
                        report.success,
                        report.round_executed,
                        report.round_cancelled,
                        report.action.as_str()
                    );
                    any_success |= report.success;
                    any_executed |= report.round_executed;
                }
                Err(e) => {
                    error!("[{}] pipeline task did not settle: {e}", ctx.config.name);
                    unsettled += 1;
                }
            }
        }

        if !self.markets.is_empty() && unsettled == self.markets.len() {
            bail!("no market pipeline settled this tick");
        }

        info!("tick complete: any_success={any_success}, any_executed={any_executed}");
        Ok(TickSummary {
            any_success,
            any_executed,
        })
    }

    /// Main operator loop. Returns an error only when the consecutive
    /// error ceiling is reached; the caller maps that to a non-zero
    /// exit.
    pub async fn run(&self) -> Result<()> {
        let mut consecutive_errors = 0u32;

        loop {
            match self.tick().await {
                Ok(summary) => {
                    if summary.any_success {
                        consecutive_errors = 0;
                    }
                    let delay = if summary.any_executed {
                        info!("round executed for one or more markets, waiting for next round");
                        EXECUTED_TICK_DELAY
                    } else {
                        info!("no round executed, checking again soon");
                        RECHECK_DELAY
                    };
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    error!("tick failed (consecutive error {consecutive_errors}): {e:#}");
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        bail!("too many consecutive tick errors ({consecutive_errors}), giving up");
                    }
                    tokio::time::sleep(ERROR_DELAY).await;
                }
            }
        }
    }
}
