//! Round orchestration engine: the per-market state machine and the
//! multi-market scheduler driving it.

pub mod gate;
pub mod pipeline;
pub mod recorder;
pub mod scheduler;
pub mod submitter;

use std::sync::Arc;

use crate::chain::ChainClient;
use crate::models::MarketConfig;
use crate::oracle::PriceOracle;
use crate::store::RoundStore;

/// Everything one market's pipeline needs for a tick. Built once by
/// the scheduler's owner at startup; markets never share chain or
/// operator state, only the round store.
pub struct MarketContext {
    pub config: MarketConfig,
    pub chain: Arc<dyn ChainClient>,
    pub oracle: Arc<dyn PriceOracle>,
    pub store: RoundStore,
}
