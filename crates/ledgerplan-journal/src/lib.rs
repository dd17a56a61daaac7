//! Deployment journal and artifact store.
//!
//! This crate provides:
//! - [`DeploymentLoader`]: durable storage for journal messages, artifacts
//!   and the deployed address record
//! - [`FileDeploymentLoader`]: a deployment directory on disk
//! - [`MemoryDeploymentLoader`]: the same contract, kept in memory

pub mod file;
pub mod memory;
pub mod paths;

use anyhow::Result;
use std::collections::BTreeMap;

use ledgerplan_types::{Address, Artifact, FutureId, JournalMessage};

pub use file::FileDeploymentLoader;
pub use memory::MemoryDeploymentLoader;

/// Storage behind a deployment.
///
/// `record_message` must not return before the message is durable: the
/// engine applies a message to its in-memory state only after it was
/// recorded, so a crash can never leave state the journal does not explain.
pub trait DeploymentLoader: Send + Sync {
    fn record_message(&self, message: &JournalMessage) -> Result<()>;

    /// All recorded messages, in recording order.
    fn read_messages(&self) -> Result<Vec<JournalMessage>>;

    fn store_artifact(&self, artifact_id: &str, artifact: &Artifact) -> Result<()>;

    fn load_artifact(&self, artifact_id: &str) -> Result<Artifact>;

    fn record_deployed_address(&self, future_id: &str, address: Address) -> Result<()>;

    fn deployed_addresses(&self) -> Result<BTreeMap<FutureId, Address>>;
}
