//! Game-contract chain client over plain JSON-RPC.
//!
//! Reads go through `eth_call` with hand-encoded calldata; writes go
//! through `eth_sendTransaction` from the node-held operator account
//! and are confirmed by polling for the receipt. Key management is the
//! node's concern, not this process's.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::codec;
use crate::models::{BetPosition, RoundState};

/// How often we poll for a submitted transaction's receipt.
const RECEIPT_POLL_SECS: u64 = 1;

// 4-byte selectors for the game contract's call surface.
const SEL_CURRENT_ROUND_ID: &str = "0x8a19c8bc"; // currentRoundId()
const SEL_ROUNDS: &str = "0x8c65c81f"; // rounds(uint256)
const SEL_GENESIS_STARTED: &str = "0xb71d4fc0"; // genesisStarted()
const SEL_GENESIS_LOCKED: &str = "0x5a2e44d1"; // genesisLocked()
const SEL_USERS_IN_ROUND: &str = "0x2f7f79a3"; // getUsersInRound(uint256)
const SEL_USER_BETS_IN_ROUND: &str = "0x63c8b60f"; // userBetsInRound(uint256,address)
const SEL_GENESIS_START_ROUND: &str = "0xe54da5ae"; // genesisStartRound()
const SEL_GENESIS_LOCK_ROUND: &str = "0x46e7a99c"; // genesisLockRound(bytes[])
const SEL_EXECUTE_ROUND: &str = "0x9c7e4a3b"; // executeRound(bytes[])
const SEL_CANCEL_ROUND: &str = "0x1d3e90b2"; // cancelRound(uint256,bytes[])
const SEL_GET_UPDATE_FEE: &str = "0xd47eed45"; // getUpdateFee(bytes[])

/// Failure classification for every chain interaction. The node's
/// free-text error messages are interpreted once, in this module.
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// A competing pending transaction from the same identity
    /// invalidated this one; retry with a fresh nonce.
    #[error("nonce conflict: {0}")]
    NonceConflict(String),
    /// The contract rejected the transition because the allowed timing
    /// window has elapsed; the call must be redirected, not retried.
    #[error("buffer expired: {0}")]
    BufferExpired(String),
    /// The transaction was mined but reverted.
    #[error("transaction reverted: {0}")]
    Reverted(String),
    /// Transport, encoding, or any unclassified node failure.
    #[error("rpc error: {0}")]
    Rpc(String),
}

impl ChainError {
    /// Maps a node error string to its classified kind.
    pub fn from_node_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("higher priority")
            || lower.contains("replacement transaction underpriced")
            || lower.contains("nonce too low")
            || lower.contains("already known")
        {
            ChainError::NonceConflict(message.to_string())
        } else if lower.contains("can only lock round within extended buffer") {
            ChainError::BufferExpired(message.to_string())
        } else {
            ChainError::Rpc(message.to_string())
        }
    }
}

/// Confirmation of a mined transaction.
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: u64,
}

/// Chain boundary used by the engine. One instance per market: each
/// carries its own contract binding and operator identity, so markets
/// never share mutable chain state.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn current_round_id(&self) -> Result<u64, ChainError>;
    async fn round(&self, round_id: u64) -> Result<RoundState, ChainError>;
    async fn genesis_started(&self) -> Result<bool, ChainError>;
    async fn genesis_locked(&self) -> Result<bool, ChainError>;
    /// Timestamp of the latest observed block.
    async fn latest_block_timestamp(&self) -> Result<u64, ChainError>;
    async fn users_in_round(&self, round_id: u64) -> Result<Vec<String>, ChainError>;
    /// Returns (pump, dump) stake for one participant.
    async fn user_bet(&self, round_id: u64, user: &str) -> Result<(u128, u128), ChainError>;
    /// Read-only fee quote for submitting an oracle payload on-chain.
    async fn quote_update_fee(&self, payload: &[u8]) -> Result<u128, ChainError>;
    /// Pending-inclusive nonce for the operator identity. Never cached:
    /// a prior retry may have left transactions in the pool.
    async fn pending_nonce(&self) -> Result<u64, ChainError>;

    async fn genesis_start_round(&self, nonce: u64) -> Result<TxReceipt, ChainError>;
    async fn genesis_lock_round(
        &self,
        payload: &[u8],
        value: u128,
        nonce: u64,
    ) -> Result<TxReceipt, ChainError>;
    async fn execute_round(
        &self,
        payload: &[u8],
        value: u128,
        nonce: u64,
    ) -> Result<TxReceipt, ChainError>;
    async fn cancel_round(
        &self,
        round_id: u64,
        payload: &[u8],
        value: u128,
        nonce: u64,
    ) -> Result<TxReceipt, ChainError>;
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    message: String,
}

/// Production [`ChainClient`] speaking JSON-RPC to a single node.
pub struct RpcChainClient {
    client: Client,
    rpc_url: String,
    contract_address: String,
    fee_contract_address: String,
    operator_address: String,
}

impl RpcChainClient {
    pub fn new(
        client: Client,
        rpc_url: String,
        contract_address: String,
        fee_contract_address: String,
        operator_address: String,
    ) -> Self {
        Self {
            client,
            rpc_url,
            contract_address,
            fee_contract_address,
            operator_address,
        }
    }

    async fn rpc(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ChainError> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });

        let response: JsonRpcResponse = self
            .client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChainError::Rpc(format!("{method} request failed: {e}")))?
            .json()
            .await
            .map_err(|e| ChainError::Rpc(format!("{method} response parse failed: {e}")))?;

        if let Some(err) = response.error {
            return Err(ChainError::from_node_message(&err.message));
        }
        response
            .result
            .ok_or_else(|| ChainError::Rpc(format!("{method}: empty result")))
    }

    async fn eth_call(&self, to: &str, calldata: &[u8]) -> Result<Vec<u8>, ChainError> {
        let result = self
            .rpc(
                "eth_call",
                serde_json::json!([
                    { "to": to, "data": format!("0x{}", hex::encode(calldata)) },
                    "latest",
                ]),
            )
            .await?;
        let raw = result
            .as_str()
            .ok_or_else(|| ChainError::Rpc("eth_call: non-string result".to_string()))?;
        hex::decode(raw.trim_start_matches("0x"))
            .map_err(|e| ChainError::Rpc(format!("eth_call: bad hex result: {e}")))
    }

    async fn game_call(&self, calldata: &[u8]) -> Result<Vec<u8>, ChainError> {
        self.eth_call(&self.contract_address, calldata).await
    }

    /// Submits a state-changing call and waits for its receipt.
    async fn send_transaction(
        &self,
        calldata: Vec<u8>,
        value: u128,
        nonce: u64,
    ) -> Result<TxReceipt, ChainError> {
        let result = self
            .rpc(
                "eth_sendTransaction",
                serde_json::json!([{
                    "from": self.operator_address,
                    "to": self.contract_address,
                    "value": format!("0x{value:x}"),
                    "nonce": format!("0x{nonce:x}"),
                    "data": format!("0x{}", hex::encode(&calldata)),
                }]),
            )
            .await?;
        let tx_hash = result
            .as_str()
            .ok_or_else(|| ChainError::Rpc("eth_sendTransaction: non-string result".to_string()))?
            .to_string();
        debug!(tx_hash = %tx_hash, nonce, "transaction submitted, awaiting receipt");
        self.wait_for_receipt(tx_hash).await
    }

    async fn wait_for_receipt(&self, tx_hash: String) -> Result<TxReceipt, ChainError> {
        loop {
            let result = self
                .rpc(
                    "eth_getTransactionReceipt",
                    serde_json::json!([tx_hash.clone()]),
                )
                .await?;
            if result.is_null() {
                tokio::time::sleep(Duration::from_secs(RECEIPT_POLL_SECS)).await;
                continue;
            }
            let status = result
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("0x0");
            if status != "0x1" {
                return Err(ChainError::Reverted(format!("tx {tx_hash} status {status}")));
            }
            let block_number = result
                .get("blockNumber")
                .and_then(|v| v.as_str())
                .and_then(parse_hex_u64)
                .unwrap_or(0);
            return Ok(TxReceipt {
                tx_hash,
                block_number,
            });
        }
    }

    fn selector(sel: &str) -> Vec<u8> {
        hex::decode(sel.trim_start_matches("0x")).unwrap_or_default()
    }
}

fn parse_hex_u64(raw: &str) -> Option<u64> {
    u64::from_str_radix(raw.trim_start_matches("0x"), 16).ok()
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn current_round_id(&self) -> Result<u64, ChainError> {
        let data = self.game_call(&Self::selector(SEL_CURRENT_ROUND_ID)).await?;
        codec::u64_at(&data, 0)
    }

    async fn round(&self, round_id: u64) -> Result<RoundState, ChainError> {
        let mut calldata = Self::selector(SEL_ROUNDS);
        codec::push_u64(&mut calldata, round_id);
        let data = self.game_call(&calldata).await?;
        // Word layout mirrors the contract's round struct: epoch, the
        // three timestamps, both prices, volumes, payout, three flags,
        // winner index.
        Ok(RoundState {
            round_id: codec::u64_at(&data, 0)?,
            start_timestamp: codec::u64_at(&data, 1)?,
            lock_timestamp: codec::u64_at(&data, 2)?,
            close_timestamp: codec::u64_at(&data, 3)?,
            lock_price: codec::u128_at(&data, 4)?,
            close_price: codec::u128_at(&data, 5)?,
            bet_volume: codec::u128_at(&data, 6)?,
            pump_amount: codec::u128_at(&data, 7)?,
            dump_amount: codec::u128_at(&data, 8)?,
            total_payout: codec::u128_at(&data, 9)?,
            oracle_called: codec::bool_at(&data, 10)?,
            rewards_calculated: codec::bool_at(&data, 11)?,
            cancelled: codec::bool_at(&data, 12)?,
            winner: BetPosition::from_index(codec::u64_at(&data, 13)?),
        })
    }

    async fn genesis_started(&self) -> Result<bool, ChainError> {
        let data = self.game_call(&Self::selector(SEL_GENESIS_STARTED)).await?;
        codec::bool_at(&data, 0)
    }

    async fn genesis_locked(&self) -> Result<bool, ChainError> {
        let data = self.game_call(&Self::selector(SEL_GENESIS_LOCKED)).await?;
        codec::bool_at(&data, 0)
    }

    async fn latest_block_timestamp(&self) -> Result<u64, ChainError> {
        let result = self
            .rpc(
                "eth_getBlockByNumber",
                serde_json::json!(["latest", false]),
            )
            .await?;
        result
            .get("timestamp")
            .and_then(|v| v.as_str())
            .and_then(parse_hex_u64)
            .ok_or_else(|| ChainError::Rpc("latest block missing timestamp".to_string()))
    }

    async fn users_in_round(&self, round_id: u64) -> Result<Vec<String>, ChainError> {
        let mut calldata = Self::selector(SEL_USERS_IN_ROUND);
        codec::push_u64(&mut calldata, round_id);
        let data = self.game_call(&calldata).await?;
        codec::address_array(&data)
    }

    async fn user_bet(&self, round_id: u64, user: &str) -> Result<(u128, u128), ChainError> {
        let mut calldata = Self::selector(SEL_USER_BETS_IN_ROUND);
        codec::push_u64(&mut calldata, round_id);
        codec::push_address(&mut calldata, user)?;
        let data = self.game_call(&calldata).await?;
        Ok((codec::u128_at(&data, 0)?, codec::u128_at(&data, 1)?))
    }

    async fn quote_update_fee(&self, payload: &[u8]) -> Result<u128, ChainError> {
        let mut calldata = Self::selector(SEL_GET_UPDATE_FEE);
        codec::push_single_bytes_array(&mut calldata, 0, payload);
        let data = self.eth_call(&self.fee_contract_address, &calldata).await?;
        codec::u128_at(&data, 0)
    }

    async fn pending_nonce(&self) -> Result<u64, ChainError> {
        let result = self
            .rpc(
                "eth_getTransactionCount",
                serde_json::json!([self.operator_address, "pending"]),
            )
            .await?;
        result
            .as_str()
            .and_then(parse_hex_u64)
            .ok_or_else(|| ChainError::Rpc("bad nonce result".to_string()))
    }

    async fn genesis_start_round(&self, nonce: u64) -> Result<TxReceipt, ChainError> {
        self.send_transaction(Self::selector(SEL_GENESIS_START_ROUND), 0, nonce)
            .await
    }

    async fn genesis_lock_round(
        &self,
        payload: &[u8],
        value: u128,
        nonce: u64,
    ) -> Result<TxReceipt, ChainError> {
        let mut calldata = Self::selector(SEL_GENESIS_LOCK_ROUND);
        codec::push_single_bytes_array(&mut calldata, 0, payload);
        self.send_transaction(calldata, value, nonce).await
    }

    async fn execute_round(
        &self,
        payload: &[u8],
        value: u128,
        nonce: u64,
    ) -> Result<TxReceipt, ChainError> {
        let mut calldata = Self::selector(SEL_EXECUTE_ROUND);
        codec::push_single_bytes_array(&mut calldata, 0, payload);
        self.send_transaction(calldata, value, nonce).await
    }

    async fn cancel_round(
        &self,
        round_id: u64,
        payload: &[u8],
        value: u128,
        nonce: u64,
    ) -> Result<TxReceipt, ChainError> {
        let mut calldata = Self::selector(SEL_CANCEL_ROUND);
        codec::push_u64(&mut calldata, round_id);
        codec::push_single_bytes_array(&mut calldata, 1, payload);
        self.send_transaction(calldata, value, nonce).await
    }
}
