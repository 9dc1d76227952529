//! Transaction submission with the nonce-conflict and buffer-expired
//! recovery protocol.
//!
//! Two-tier classification: nonce conflicts are retried at this call
//! with a fresh nonce; a buffer-expired rejection changes WHAT is
//! submitted (cancel of the previous round) rather than whether it is
//! retried; everything else propagates to the pipeline as fatal for
//! this iteration. Buffer-expired is the sole cancel trigger.

use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::chain::{ChainClient, ChainError, TxReceipt};

/// Attempt ceiling for cancel-style calls.
const CANCEL_MAX_ATTEMPTS: u32 = 5;
/// Delay between conflicting cancel attempts.
const CONFLICT_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("submission attempts exhausted: {0}")]
    Exhausted(String),
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// What actually happened on-chain for this round.
#[derive(Debug, Clone)]
pub enum SubmissionOutcome {
    Executed(TxReceipt),
    /// The execution window had elapsed; the previous round was
    /// cancelled instead.
    Cancelled { round_id: u64 },
}

/// Submits the execute call for the active round, driving the full
/// recovery protocol. `round_id` is the active round; on a
/// buffer-expired rejection the cancel targets `round_id - 1`.
pub async fn execute_round(
    chain: &dyn ChainClient,
    market: &str,
    round_id: u64,
    payload: &[u8],
    fee: u128,
) -> Result<SubmissionOutcome, SubmissionError> {
    // Initial attempt plus one bump-and-retry on a nonce conflict.
    let mut nonce = chain.pending_nonce().await?;
    let mut bumped = false;
    loop {
        match chain.execute_round(payload, fee, nonce).await {
            Ok(receipt) => {
                info!("[{market}] round {round_id} executed, tx {}", receipt.tx_hash);
                return Ok(SubmissionOutcome::Executed(receipt));
            }
            Err(ChainError::NonceConflict(msg)) => {
                if bumped {
                    return Err(SubmissionError::Exhausted(format!(
                        "execute for round {round_id} kept conflicting: {msg}"
                    )));
                }
                warn!("[{market}] execute conflicted, retrying with bumped nonce: {msg}");
                nonce += 1;
                bumped = true;
            }
            Err(ChainError::BufferExpired(msg)) => {
                warn!("[{market}] execution window elapsed for round {round_id}: {msg}");
                let cancelled = round_id.saturating_sub(1);
                cancel_round(chain, market, cancelled, payload, fee).await?;
                return Ok(SubmissionOutcome::Cancelled {
                    round_id: cancelled,
                });
            }
            Err(e) => return Err(SubmissionError::Chain(e)),
        }
    }
}

/// Cancels a round, retrying nonce conflicts with a fresh nonce up to
/// the cancel ceiling.
pub async fn cancel_round(
    chain: &dyn ChainClient,
    market: &str,
    round_id: u64,
    payload: &[u8],
    fee: u128,
) -> Result<TxReceipt, SubmissionError> {
    info!("[{market}] cancelling round {round_id}");
    let mut last_conflict = String::new();
    for attempt in 1..=CANCEL_MAX_ATTEMPTS {
        let nonce = chain.pending_nonce().await?;
        match chain.cancel_round(round_id, payload, fee, nonce).await {
            Ok(receipt) => {
                info!("[{market}] round {round_id} cancelled, tx {}", receipt.tx_hash);
                return Ok(receipt);
            }
            Err(ChainError::NonceConflict(msg)) => {
                warn!("[{market}] cancel conflicted on attempt {attempt}: {msg}");
                last_conflict = msg;
                if attempt < CANCEL_MAX_ATTEMPTS {
                    tokio::time::sleep(CONFLICT_RETRY_DELAY).await;
                }
            }
            Err(e) => return Err(SubmissionError::Chain(e)),
        }
    }
    Err(SubmissionError::Exhausted(format!(
        "cancel of round {round_id} conflicted {CANCEL_MAX_ATTEMPTS} times: {last_conflict}"
    )))
}
