//! Durable round records. Append-only: a finalized round and its
//! participant rows are written once and never updated.

pub mod rounds_db;

pub use rounds_db::{PersistedBet, PersistedRound, RoundStore};
