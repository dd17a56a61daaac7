#![allow(dead_code, unused_imports)]
//! Shared test utilities for integration tests.
//!
//! # Modules
//!
//! - `codec`: a JSON stand-in for ABI encoding, so ledger rules can match on
//!   readable call data
//! - `setup`: ledger, artifacts and deployer construction

pub mod codec;
pub mod setup;

pub use codec::{call_needle, event_log, JsonCodec};
pub use setup::{artifacts, deployer, fast_config, TestEnv};
