//! TOKEN SENTRY: background ERC-20 token detection for a wallet.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod engine;
pub mod sources;
pub mod types;
