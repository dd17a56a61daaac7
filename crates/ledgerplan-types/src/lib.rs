//! Shared types for the ledgerplan workspace.
//!
//! This crate provides the data model used across the workspace, breaking
//! dependency chains between the transport, journal and engine crates.
//!
//! ## Modules
//!
//! - [`address`] - Ledger addresses, transaction hashes and raw byte payloads
//! - [`ledger`] - Blocks, receipts, fees and requests exchanged with the ledger
//! - [`future`] - Futures: the planned operations of a deployment
//! - [`plan`] - Modules and the plan graph, with structural validation
//! - [`execution_state`] - Durable per-future execution state
//! - [`messages`] - Journal messages describing every state transition

pub mod address;
pub mod amount;
pub mod execution_state;
pub mod future;
pub mod ledger;
pub mod messages;
pub mod plan;

pub use address::{Address, Bytes, HexParseError, TxHash};
pub use execution_state::{
    AbandonReason, CallExecution, ContractAtExecution, DeploymentExecution, ExecutionKind,
    ExecutionResult, ExecutionState, ExecutionStatus, NetworkInteraction, OnchainInteraction,
    ReadEventArgumentExecution, SendDataExecution, StaticCallExecution, StaticCallInteraction,
    SuccessResult, TransactionRecord,
};
pub use future::{
    AddressSource, Argument, Artifact, ArtifactSource, ContractAtFuture, ContractCallFuture,
    ContractDeploymentFuture, Future, FutureId, FutureType, LibraryDeploymentFuture,
    ModuleParameter, NameOrIndex, ReadEventArgumentFuture, SendDataFuture, SenderRef,
    StaticCallFuture, ValueSource,
};
pub use ledger::{
    Block, BlockTag, CallRequest, Log, NetworkFees, RawCallResult, ReceiptStatus, TransactionInfo,
    TransactionReceipt, TransactionRequest,
};
pub use messages::{JournalMessage, NetworkInteractionRequest, SentTransaction};
pub use plan::{Module, Plan, PlanError};

use std::time::Duration;

/// Configuration for retry behavior on network operations.
#[derive(Debug, Copy, Clone)]
pub struct RetryConfig {
    /// Number of retry attempts.
    pub retries: usize,
    /// Initial backoff duration between retries.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
}

impl RetryConfig {
    /// Create a new RetryConfig with the specified parameters.
    pub fn new(retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }

    /// A configuration that never retries.
    pub fn none() -> Self {
        Self::new(0, 0, 0)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 4,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_millis(4000),
        }
    }
}
