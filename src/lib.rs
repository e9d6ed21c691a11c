//! EVM transaction batch-dispatch engine.
//!
//! Claims queued ledger transactions in batches, assigns nonces safely
//! under concurrency, submits per-wallet groups to their networks, and
//! notifies webhook subscribers of every status change.

pub mod app;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
