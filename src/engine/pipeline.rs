//! Per-market pipeline: one state-machine step per tick.
//!
//! The machine is stateless across ticks; every run re-reads genesis
//! flags and the active round from the chain and takes exactly one
//! action: genesis-start, genesis-lock, or a normal execute.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{gate, recorder, submitter, MarketContext};
use crate::models::{TickAction, TickReport};
use crate::oracle::OracleUpdate;

/// Recording attempts per executed round.
const RECORD_ATTEMPTS: u32 = 3;
const RECORD_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Nominal payment attached to the genesis lock call.
const GENESIS_LOCK_VALUE: u128 = 1;

/// Runs one tick for one market. Never panics the scheduler: every
/// failure is caught here and reported as an unsuccessful tick.
pub async fn run_market_tick(ctx: Arc<MarketContext>) -> TickReport {
    let market = ctx.config.name.clone();
    match tick_inner(&ctx).await {
        Ok(report) => report,
        Err(e) => {
            error!("[{market}] pipeline iteration failed: {e:#}");
            TickReport::new(&market, false, TickAction::NoAction)
        }
    }
}

async fn tick_inner(ctx: &MarketContext) -> anyhow::Result<TickReport> {
    let market = ctx.config.name.as_str();
    let chain = ctx.chain.as_ref();

    // Genesis bootstrap takes precedence; at most one genesis step per
    // tick, and never a genesis step and a normal step together.
    if !chain.genesis_started().await? {
        info!("[{market}] genesis not started, submitting genesis start");
        let nonce = chain.pending_nonce().await?;
        let receipt = chain.genesis_start_round(nonce).await?;
        info!("[{market}] genesis start confirmed, tx {}", receipt.tx_hash);
        return Ok(TickReport::new(market, true, TickAction::GenesisStarted));
    }

    if !chain.genesis_locked().await? {
        info!("[{market}] genesis started but not locked, awaiting lock timestamp");
        let round_id = chain.current_round_id().await?;
        let round = chain.round(round_id).await?;
        gate::await_chain_timestamp(chain, round.lock_timestamp, market).await?;

        let update = ctx.oracle.fetch_update(&ctx.config.feed_id).await?;
        let nonce = chain.pending_nonce().await?;
        let receipt = chain
            .genesis_lock_round(&update.payload, GENESIS_LOCK_VALUE, nonce)
            .await?;
        info!("[{market}] genesis lock confirmed, tx {}", receipt.tx_hash);
        return Ok(TickReport::new(market, true, TickAction::GenesisLocked));
    }

    execute_normal_round(ctx).await
}

async fn execute_normal_round(ctx: &MarketContext) -> anyhow::Result<TickReport> {
    let market = ctx.config.name.as_str();
    let chain = ctx.chain.as_ref();

    let round_id = chain.current_round_id().await?;
    let round = chain.round(round_id).await?;

    let now = chain.latest_block_timestamp().await?;
    if now < round.lock_timestamp {
        gate::await_chain_timestamp(chain, round.lock_timestamp, market).await?;
    }

    let update: OracleUpdate = ctx.oracle.fetch_update(&ctx.config.feed_id).await?;
    let fee = ctx.oracle.quote_fee(chain, &update).await?;

    info!("[{market}] executing round {round_id} with fresh price data (fee {fee})");
    let outcome = submitter::execute_round(chain, market, round_id, &update.payload, fee).await?;

    match outcome {
        submitter::SubmissionOutcome::Executed(_) => {
            // The previously active round has now closed; hand it to
            // the recorder.
            record_closed_round(ctx, round_id.saturating_sub(1)).await;
            Ok(TickReport::new(market, true, TickAction::RoundExecuted))
        }
        submitter::SubmissionOutcome::Cancelled { round_id } => {
            info!("[{market}] round {round_id} cancelled instead of executed");
            Ok(TickReport::new(market, true, TickAction::RoundCancelled))
        }
    }
}

async fn record_closed_round(ctx: &MarketContext, round_id: u64) {
    let market = ctx.config.name.as_str();
    for attempt in 1..=RECORD_ATTEMPTS {
        if recorder::record_round(ctx.chain.as_ref(), &ctx.store, &ctx.config, round_id).await {
            return;
        }
        if attempt < RECORD_ATTEMPTS {
            tokio::time::sleep(RECORD_RETRY_DELAY).await;
        }
    }
    warn!("[{market}] round {round_id} was not recorded after {RECORD_ATTEMPTS} attempts");
}
