//! Roundbot Backend Library
//!
//! Exposes the operator's core modules for the binary and the
//! integration tests.

pub mod chain;
pub mod engine;
pub mod models;
pub mod oracle;
pub mod store;
