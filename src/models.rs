//! Core domain types shared across the operator.
//!
//! Chain-derived state is always re-fetched, never mutated locally:
//! the contract is the single source of truth for round progression.

use serde::{Deserialize, Serialize};

/// Decimal exponent of the chain's native token (bet amounts, payouts).
pub const NATIVE_EXPO: u32 = 18;

/// Payout multiplier applied to the winning side's stake.
pub const PAYOUT_MULTIPLIER: f64 = 1.9;

/// Immutable per-market configuration, loaded once from the environment
/// and owned by the scheduler for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct MarketConfig {
    /// Short market name used as log prefix and DB key, e.g. "BTC".
    pub name: String,
    /// Trading pair label, e.g. "BTC/USD".
    pub pair: String,
    /// Price feed identifier understood by the oracle service.
    pub feed_id: String,
    /// Prediction game contract address for this market.
    pub contract_address: String,
    /// Decimal exponent of the oracle price for this feed.
    pub price_expo: u32,
    /// Operator identity submitting state transitions for this market.
    pub operator_address: String,
}

/// Side of a round a participant bet on, and the settled winner label.
///
/// Index order matches the contract's winner field: 0 = none, 1 = pump,
/// 2 = dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetPosition {
    None,
    Pump,
    Dump,
}

impl BetPosition {
    pub fn from_index(index: u64) -> Self {
        match index {
            1 => BetPosition::Pump,
            2 => BetPosition::Dump,
            _ => BetPosition::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BetPosition::None => "none",
            BetPosition::Pump => "pump",
            BetPosition::Dump => "dump",
        }
    }
}

/// One round as reported by the game contract.
///
/// Invariant: `lock_timestamp <= close_timestamp`. A round is immutable
/// once `cancelled` or `rewards_calculated` is set.
#[derive(Debug, Clone)]
pub struct RoundState {
    pub round_id: u64,
    pub start_timestamp: u64,
    pub lock_timestamp: u64,
    pub close_timestamp: u64,
    pub lock_price: u128,
    pub close_price: u128,
    pub bet_volume: u128,
    pub pump_amount: u128,
    pub dump_amount: u128,
    pub total_payout: u128,
    pub oracle_called: bool,
    pub rewards_calculated: bool,
    pub cancelled: bool,
    pub winner: BetPosition,
}

/// The single action a market pipeline took this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    GenesisStarted,
    GenesisLocked,
    RoundExecuted,
    RoundCancelled,
    /// Nothing completed this tick (a failure was logged).
    NoAction,
}

impl TickAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickAction::GenesisStarted => "genesis_started",
            TickAction::GenesisLocked => "genesis_locked",
            TickAction::RoundExecuted => "round_executed",
            TickAction::RoundCancelled => "round_cancelled",
            TickAction::NoAction => "no_action",
        }
    }
}

/// Outcome of one market pipeline run, aggregated by the scheduler.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub market: String,
    pub success: bool,
    pub round_executed: bool,
    pub round_cancelled: bool,
    pub action: TickAction,
}

impl TickReport {
    pub fn new(market: &str, success: bool, action: TickAction) -> Self {
        Self {
            market: market.to_string(),
            success,
            round_executed: action == TickAction::RoundExecuted,
            round_cancelled: action == TickAction::RoundCancelled,
            action,
        }
    }
}

/// Converts a fixed-point chain amount to a decimal value for storage.
pub fn scale_amount(raw: u128, expo: u32) -> f64 {
    raw as f64 / 10f64.powi(expo as i32)
}
