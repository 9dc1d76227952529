//! Timestamp gate: suspends a pipeline until the chain's observed time
//! reaches a target.

use std::time::Duration;
use tracing::debug;

use crate::chain::{ChainClient, ChainError};

/// Upper bound on a single wait iteration. The gate re-checks
/// progressively faster as the target nears and never oversleeps the
/// target by more than this.
pub const POLL_CAP_SECS: u64 = 5;

/// Blocks until the latest block timestamp is >= `target`. No timeout:
/// chain liveness bounds this in practice, and the surrounding
/// scheduler never starts a second wait for the same market.
pub async fn await_chain_timestamp(
    chain: &dyn ChainClient,
    target: u64,
    market: &str,
) -> Result<(), ChainError> {
    loop {
        let now = chain.latest_block_timestamp().await?;
        if now >= target {
            debug!("[{market}] target timestamp reached: current {now}, target {target}");
            return Ok(());
        }
        let wait = (target - now).min(POLL_CAP_SECS);
        debug!("[{market}] chain time {now}, sleeping {wait}s toward {target}");
        tokio::time::sleep(Duration::from_secs(wait)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RoundState;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::time::Instant;

    /// Chain stub whose clock advances with (paused) tokio time.
    struct TickingChain {
        base: u64,
        started: Instant,
        max_observed_sleep: AtomicU64,
        last_poll_at: std::sync::Mutex<Option<Instant>>,
    }

    impl TickingChain {
        fn new(base: u64) -> Self {
            Self {
                base,
                started: Instant::now(),
                max_observed_sleep: AtomicU64::new(0),
                last_poll_at: std::sync::Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl crate::chain::ChainClient for TickingChain {
        async fn latest_block_timestamp(&self) -> Result<u64, ChainError> {
            let now = Instant::now();
            let mut last = self.last_poll_at.lock().unwrap();
            if let Some(prev) = *last {
                let gap = now.duration_since(prev).as_secs();
                self.max_observed_sleep.fetch_max(gap, Ordering::SeqCst);
            }
            *last = Some(now);
            Ok(self.base + self.started.elapsed().as_secs())
        }

        async fn current_round_id(&self) -> Result<u64, ChainError> {
            unimplemented!()
        }
        async fn round(&self, _: u64) -> Result<RoundState, ChainError> {
            unimplemented!()
        }
        async fn genesis_started(&self) -> Result<bool, ChainError> {
            unimplemented!()
        }
        async fn genesis_locked(&self) -> Result<bool, ChainError> {
            unimplemented!()
        }
        async fn users_in_round(&self, _: u64) -> Result<Vec<String>, ChainError> {
            unimplemented!()
        }
        async fn user_bet(&self, _: u64, _: &str) -> Result<(u128, u128), ChainError> {
            unimplemented!()
        }
        async fn quote_update_fee(&self, _: &[u8]) -> Result<u128, ChainError> {
            unimplemented!()
        }
        async fn pending_nonce(&self) -> Result<u64, ChainError> {
            unimplemented!()
        }
        async fn genesis_start_round(&self, _: u64) -> Result<crate::chain::TxReceipt, ChainError> {
            unimplemented!()
        }
        async fn genesis_lock_round(
            &self,
            _: &[u8],
            _: u128,
            _: u64,
        ) -> Result<crate::chain::TxReceipt, ChainError> {
            unimplemented!()
        }
        async fn execute_round(
            &self,
            _: &[u8],
            _: u128,
            _: u64,
        ) -> Result<crate::chain::TxReceipt, ChainError> {
            unimplemented!()
        }
        async fn cancel_round(
            &self,
            _: u64,
            _: &[u8],
            _: u128,
            _: u64,
        ) -> Result<crate::chain::TxReceipt, ChainError> {
            unimplemented!()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn never_returns_before_target_and_bounds_each_sleep() {
        let chain = TickingChain::new(1_000);
        let start = Instant::now();

        // 13s away: expect waits of 5, 5, 3.
        await_chain_timestamp(&chain, 1_013, "BTC").await.unwrap();

        let elapsed = start.elapsed().as_secs();
        assert!(elapsed >= 13, "returned {elapsed}s in, before the target");
        assert!(
            chain.max_observed_sleep.load(Ordering::SeqCst) <= POLL_CAP_SECS,
            "a single wait exceeded the poll cap"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn returns_immediately_when_target_passed() {
        let chain = TickingChain::new(5_000);
        let start = Instant::now();
        await_chain_timestamp(&chain, 4_000, "ETH").await.unwrap();
        assert_eq!(start.elapsed().as_secs(), 0);
    }
}
