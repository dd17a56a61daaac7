//! Ledger Transport Layer
//!
//! Network access for the deployment engine.
//!
//! This crate provides:
//! - [`NetworkClient`]: the narrow interface the engine talks to
//! - [`jsonrpc`]: JSON-RPC over HTTP client for real nodes
//! - [`memory`]: deterministic in-memory ledger for tests and dry runs
//! - [`retry`]: backoff helper shared by the clients
//!
//! # Example
//!
//! ```ignore
//! use ledgerplan_transport::{JsonRpcClient, NetworkClient};
//!
//! let client = JsonRpcClient::new("http://127.0.0.1:8545");
//! let chain_id = client.chain_id().await?;
//! let block = client.latest_block().await?;
//! ```

pub mod jsonrpc;
pub mod memory;
pub mod retry;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

use ledgerplan_types::{
    Address, Block, BlockTag, Bytes, CallRequest, NetworkFees, RawCallResult, TransactionInfo,
    TransactionReceipt, TransactionRequest, TxHash,
};

pub use jsonrpc::JsonRpcClient;
pub use memory::InMemoryLedger;
pub use retry::{should_retry_error, with_retries};

/// Errors surfaced by ledger clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The request never got an answer (connection, timeout, rate limit).
    Transport(String),
    /// The node answered with an error object.
    Rpc {
        code: i64,
        message: String,
        data: Option<Bytes>,
    },
    /// The node answered with something we could not parse.
    Decode(String),
}

impl RpcError {
    /// Node-side execution failure (revert during estimation or call).
    pub fn is_execution_error(&self) -> bool {
        match self {
            RpcError::Rpc { code, message, .. } => {
                *code == 3 || message.to_ascii_lowercase().contains("revert")
            }
            _ => false,
        }
    }

    /// Revert payload attached to an execution error.
    pub fn revert_data(&self) -> Option<&Bytes> {
        match self {
            RpcError::Rpc { data, .. } => data.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::Transport(msg) => write!(f, "transport error: {}", msg),
            RpcError::Rpc { code, message, .. } => write!(f, "rpc error {}: {}", code, message),
            RpcError::Decode(msg) => write!(f, "failed to decode response: {}", msg),
        }
    }
}

impl std::error::Error for RpcError {}

/// Everything the engine needs from a ledger.
///
/// Implementations are expected to retry transient failures themselves; an
/// `Err` returned from here aborts the run instead of failing a future.
#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;

    async fn latest_block(&self) -> Result<Block>;

    /// Number of transactions sent by `address` as seen at `tag`.
    async fn transaction_count(&self, address: Address, tag: BlockTag) -> Result<u64>;

    /// Fees a new transaction should pay right now.
    async fn network_fees(&self) -> Result<NetworkFees>;

    /// Gas estimate. A revert is reported as an [`RpcError::Rpc`] execution error.
    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64>;

    async fn send_transaction(&self, request: &TransactionRequest) -> Result<TxHash>;

    /// `None` when the ledger does not know the transaction (never seen or dropped).
    async fn transaction(&self, hash: TxHash) -> Result<Option<TransactionInfo>>;

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>>;

    async fn call(&self, request: &CallRequest, tag: BlockTag) -> Result<RawCallResult>;
}
