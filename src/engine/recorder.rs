//! Records a finalized round and its participants off-chain.
//!
//! Best-effort by contract: a recording failure costs analytics, never
//! an on-chain action, so this module returns `bool` and lets the
//! pipeline retry a few times before moving on.

use futures_util::future::join_all;
use tracing::{info, warn};

use crate::chain::ChainClient;
use crate::models::{scale_amount, BetPosition, MarketConfig, NATIVE_EXPO, PAYOUT_MULTIPLIER};
use crate::store::{PersistedBet, PersistedRound, RoundStore};

/// Deterministic payout for one participant: winning side stake times
/// the multiplier, full refund when no side won, zero otherwise.
pub fn compute_payout(winner: BetPosition, pump_amount: f64, dump_amount: f64) -> f64 {
    match winner {
        BetPosition::Pump if pump_amount > 0.0 => pump_amount * PAYOUT_MULTIPLIER,
        BetPosition::Dump if dump_amount > 0.0 => dump_amount * PAYOUT_MULTIPLIER,
        BetPosition::None => pump_amount + dump_amount,
        _ => 0.0,
    }
}

/// Persists round `round_id` and its per-participant rows as one
/// logical unit. Returns true on success or when the round row already
/// exists (at-least-once, idempotent at round-row granularity).
pub async fn record_round(
    chain: &dyn ChainClient,
    store: &RoundStore,
    config: &MarketConfig,
    round_id: u64,
) -> bool {
    match record_round_inner(chain, store, config, round_id).await {
        Ok(()) => true,
        Err(e) => {
            warn!("[{}] failed to record round {round_id}: {e:#}", config.name);
            false
        }
    }
}

async fn record_round_inner(
    chain: &dyn ChainClient,
    store: &RoundStore,
    config: &MarketConfig,
    round_id: u64,
) -> anyhow::Result<()> {
    let market = config.name.as_str();

    if store.round_exists(market, round_id).await? {
        info!("[{market}] round {round_id} already recorded, skipping");
        return Ok(());
    }

    let round = chain.round(round_id).await?;
    let winner = round.winner;

    let users = chain.users_in_round(round_id).await?;
    info!("[{market}] recording round {round_id}: {} participants", users.len());

    // Bets are fetched batched, not sequentially, to bound latency.
    let bet_results = join_all(users.iter().map(|user| chain.user_bet(round_id, user))).await;

    let mut bets = Vec::with_capacity(users.len());
    for (user, result) in users.iter().zip(bet_results) {
        match result {
            Ok((pump_raw, dump_raw)) => {
                let pump = scale_amount(pump_raw, NATIVE_EXPO);
                let dump = scale_amount(dump_raw, NATIVE_EXPO);
                bets.push(PersistedBet {
                    player_address: user.to_lowercase(),
                    pump_amount: pump,
                    dump_amount: dump,
                    payout: compute_payout(winner, pump, dump),
                });
            }
            Err(e) => {
                warn!("[{market}] failed to fetch bet for {user}: {e}");
            }
        }
    }

    let row = PersistedRound {
        market: market.to_string(),
        round_id,
        pair: config.pair.clone(),
        start_ts: round.start_timestamp as i64,
        lock_price: scale_amount(round.lock_price, config.price_expo),
        close_price: scale_amount(round.close_price, config.price_expo),
        bet_volume: scale_amount(round.bet_volume, NATIVE_EXPO),
        pump_amount: scale_amount(round.pump_amount, NATIVE_EXPO),
        dump_amount: scale_amount(round.dump_amount, NATIVE_EXPO),
        total_payout: scale_amount(round.total_payout, NATIVE_EXPO),
        oracle_called: round.oracle_called,
        rewards_calculated: round.rewards_calculated,
        cancelled: round.cancelled,
        winner: winner.as_str().to_string(),
    };

    let round_ref = store.insert_round(&row).await?;
    if !bets.is_empty() {
        // The round row is considered recorded even if this insert
        // fails; the idempotency guard above prevents duplicates on a
        // caller retry.
        store.insert_players(round_ref, &bets).await?;
        info!("[{market}] inserted {} participant rows for round {round_id}", bets.len());
    }

    info!("[{market}] round {round_id} recorded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_winner_refunds_both_stakes() {
        for (pump, dump) in [(1.5, 0.0), (0.0, 2.0), (1.25, 0.75), (0.0, 0.0)] {
            let payout = compute_payout(BetPosition::None, pump, dump);
            assert!((payout - (pump + dump)).abs() < 1e-9);
        }
    }

    #[test]
    fn winning_side_pays_multiplier() {
        let payout = compute_payout(BetPosition::Pump, 2.0, 1.0);
        assert!((payout - 3.8).abs() < 1e-9);

        let payout = compute_payout(BetPosition::Dump, 2.0, 1.0);
        assert!((payout - 1.9).abs() < 1e-9);
    }

    #[test]
    fn zero_stake_on_winning_side_pays_nothing() {
        assert_eq!(compute_payout(BetPosition::Pump, 0.0, 5.0), 0.0);
        assert_eq!(compute_payout(BetPosition::Dump, 5.0, 0.0), 0.0);
    }
}
