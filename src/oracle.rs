//! Price oracle client: latest-price payload fetch plus the on-chain
//! fee quote required to submit it.
//!
//! Payloads are single-use proofs, so nothing here is cached; every
//! call fetches fresh data.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::chain::ChainClient;

const FETCH_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle unavailable after {attempts} attempts: {last_error}")]
    Unavailable { attempts: u32, last_error: String },
    #[error("fee quote failed after {attempts} attempts: {last_error}")]
    FeeQuoteFailed { attempts: u32, last_error: String },
}

/// One fetched price-update payload. Consumed once per submission
/// attempt and never persisted.
#[derive(Debug, Clone)]
pub struct OracleUpdate {
    pub feed_id: String,
    pub payload: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

/// Oracle boundary used by the pipelines; mocked in tests.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn fetch_update(&self, feed_id: &str) -> Result<OracleUpdate, OracleError>;
    async fn quote_fee(
        &self,
        chain: &dyn ChainClient,
        update: &OracleUpdate,
    ) -> Result<u128, OracleError>;
}

#[derive(Debug, Deserialize)]
struct LatestPriceResponse {
    binary: BinarySection,
}

#[derive(Debug, Deserialize)]
struct BinarySection {
    data: Vec<String>,
}

/// Hermes-style HTTP oracle client.
pub struct HermesOracle {
    client: Client,
    base_url: String,
}

impl HermesOracle {
    pub fn new(client: Client, base_url: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_once(&self, feed_id: &str) -> Result<OracleUpdate, String> {
        let url = format!(
            "{}/v2/updates/price/latest?ids[]={feed_id}",
            self.base_url
        );
        let response: LatestPriceResponse = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?
            .error_for_status()
            .map_err(|e| format!("status error: {e}"))?
            .json()
            .await
            .map_err(|e| format!("bad response body: {e}"))?;

        let raw = response
            .binary
            .data
            .first()
            .ok_or_else(|| "empty update payload".to_string())?;
        let payload =
            hex::decode(raw.trim_start_matches("0x")).map_err(|e| format!("bad payload hex: {e}"))?;
        Ok(OracleUpdate {
            feed_id: feed_id.to_string(),
            payload,
            fetched_at: Utc::now(),
        })
    }
}

#[async_trait]
impl PriceOracle for HermesOracle {
    async fn fetch_update(&self, feed_id: &str) -> Result<OracleUpdate, OracleError> {
        let mut last_error = String::new();
        for attempt in 1..=FETCH_ATTEMPTS {
            match self.fetch_once(feed_id).await {
                Ok(update) => return Ok(update),
                Err(e) => {
                    warn!(feed = %feed_id, attempt, error = %e, "oracle fetch failed");
                    last_error = e;
                    if attempt < FETCH_ATTEMPTS {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }
        Err(OracleError::Unavailable {
            attempts: FETCH_ATTEMPTS,
            last_error,
        })
    }

    async fn quote_fee(
        &self,
        chain: &dyn ChainClient,
        update: &OracleUpdate,
    ) -> Result<u128, OracleError> {
        let mut last_error = String::new();
        for attempt in 1..=FETCH_ATTEMPTS {
            match chain.quote_update_fee(&update.payload).await {
                Ok(fee) => return Ok(fee),
                Err(e) => {
                    warn!(feed = %update.feed_id, attempt, error = %e, "fee quote failed");
                    last_error = e.to_string();
                    if attempt < FETCH_ATTEMPTS {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }
        Err(OracleError::FeeQuoteFailed {
            attempts: FETCH_ATTEMPTS,
            last_error,
        })
    }
}
