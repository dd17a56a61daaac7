//! ledgerplan
//!
//! Declarative deployment orchestrator. A plan is a graph of futures
//! (contract deployments, calls, reads, transfers) that is executed against a
//! remote ledger, with every state transition journaled so an interrupted run
//! can resume and a re-run with an edited plan is checked against what was
//! already done.
//!
//! - **Batching**: dependency graph to ordered groups of futures ([`batcher`])
//! - **Execution**: per-future state machine, nonces, fee bumps ([`execution`], [`nonce`])
//! - **Reconciliation**: edited plan vs. recorded execution ([`reconciliation`])
//! - **Orchestration**: validation, replay, gating and results ([`deployer`])
//!
//! See [`deployer::Deployer`] for the entry point.

#![allow(clippy::too_many_arguments)]

pub mod batcher;
pub mod codec;
pub mod config;
pub mod deployer;
pub mod error;
pub mod execution;
pub mod metrics;
pub mod nonce;
pub mod reconciliation;
pub mod resolve;
pub mod state;
pub mod strategy;
pub mod wipe;

pub use codec::{ArtifactCodec, ArtifactResolver, StaticArtifactResolver};
pub use config::DeployConfig;
pub use deployer::{DeployedContract, Deployer, DeploymentResult};
pub use error::{DeploymentError, InvariantError, NonceSyncError};
pub use metrics::{ExecutionMetrics, ExecutionMetricsSnapshot};
pub use resolve::ModuleParameters;
pub use state::{DeploymentState, StatusReport};
pub use strategy::{BasicStrategy, ExecutionStrategy, StrategyStep};

pub use ledgerplan_journal as journal;
pub use ledgerplan_transport as transport;
pub use ledgerplan_types as types;
