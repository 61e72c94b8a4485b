//! MIRROR: leader/follower copy trading on the XRP Ledger.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod notify;
pub mod ledger;
pub mod engine;
pub mod storage;
pub mod api;
