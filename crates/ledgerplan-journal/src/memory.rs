//! In-memory deployment storage, for tests and dry runs.

use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;

use ledgerplan_types::{Address, Artifact, FutureId, JournalMessage};

use crate::DeploymentLoader;

#[derive(Default)]
pub struct MemoryDeploymentLoader {
    messages: RwLock<Vec<JournalMessage>>,
    artifacts: RwLock<BTreeMap<String, Artifact>>,
    addresses: RwLock<BTreeMap<FutureId, Address>>,
}

impl MemoryDeploymentLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing journal.
    pub fn with_messages(messages: Vec<JournalMessage>) -> Self {
        Self {
            messages: RwLock::new(messages),
            ..Self::default()
        }
    }

    pub fn message_count(&self) -> usize {
        self.messages.read().len()
    }
}

impl DeploymentLoader for MemoryDeploymentLoader {
    fn record_message(&self, message: &JournalMessage) -> Result<()> {
        self.messages.write().push(message.clone());
        Ok(())
    }

    fn read_messages(&self) -> Result<Vec<JournalMessage>> {
        Ok(self.messages.read().clone())
    }

    fn store_artifact(&self, artifact_id: &str, artifact: &Artifact) -> Result<()> {
        self.artifacts
            .write()
            .insert(artifact_id.to_string(), artifact.clone());
        Ok(())
    }

    fn load_artifact(&self, artifact_id: &str) -> Result<Artifact> {
        self.artifacts
            .read()
            .get(artifact_id)
            .cloned()
            .ok_or_else(|| anyhow!("Artifact {} not found", artifact_id))
    }

    fn record_deployed_address(&self, future_id: &str, address: Address) -> Result<()> {
        self.addresses.write().insert(future_id.to_string(), address);
        Ok(())
    }

    fn deployed_addresses(&self) -> Result<BTreeMap<FutureId, Address>> {
        Ok(self.addresses.read().clone())
    }
}
