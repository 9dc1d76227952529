//! Classified chain-call layer.
//!
//! All node error strings are mapped to [`ChainError`] variants here,
//! once; everything above this layer branches on the variant and never
//! inspects human-readable text.

pub mod client;
pub mod codec;

pub use client::{ChainClient, ChainError, RpcChainClient, TxReceipt};
