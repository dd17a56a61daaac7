//! Collaborators for artifacts and ABI encoding.
//!
//! The engine never looks inside bytecode or ABIs. Loading artifacts by
//! contract name and turning resolved arguments into call data (and return
//! data back into values) is delegated to these traits.

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::BTreeMap;

use ledgerplan_types::{Address, Artifact, Bytes, Log, NameOrIndex};

/// Loads compiled artifacts by contract name.
pub trait ArtifactResolver: Send + Sync {
    fn load_artifact(&self, contract_name: &str) -> Result<Artifact>;
}

/// ABI encoding and decoding.
pub trait ArtifactCodec: Send + Sync {
    /// Creation data: linked bytecode followed by encoded constructor arguments.
    fn encode_deployment(
        &self,
        artifact: &Artifact,
        args: &[Value],
        libraries: &BTreeMap<String, Address>,
    ) -> Result<Bytes>;

    fn encode_function_call(
        &self,
        artifact: &Artifact,
        function_name: &str,
        args: &[Value],
    ) -> Result<Bytes>;

    /// Pick one return value out of a static call's return data.
    fn decode_function_result(
        &self,
        artifact: &Artifact,
        function_name: &str,
        data: &Bytes,
        name_or_index: &NameOrIndex,
    ) -> Result<Value>;

    /// Whether `log` is an instance of `event_name`.
    fn is_event(&self, artifact: &Artifact, event_name: &str, log: &Log) -> bool;

    fn decode_event_argument(
        &self,
        artifact: &Artifact,
        event_name: &str,
        log: &Log,
        name_or_index: &NameOrIndex,
    ) -> Result<Value>;

    /// Human readable reason out of revert data.
    fn decode_revert(&self, data: &Bytes) -> String {
        if data.is_empty() {
            "reverted without a reason".to_string()
        } else {
            format!("reverted with data {}", data)
        }
    }
}

/// Resolver over a fixed set of artifacts.
#[derive(Debug, Clone, Default)]
pub struct StaticArtifactResolver {
    artifacts: BTreeMap<String, Artifact>,
}

impl StaticArtifactResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, artifact: Artifact) -> Self {
        self.insert(artifact);
        self
    }

    pub fn insert(&mut self, artifact: Artifact) {
        self.artifacts
            .insert(artifact.contract_name.clone(), artifact);
    }
}

impl ArtifactResolver for StaticArtifactResolver {
    fn load_artifact(&self, contract_name: &str) -> Result<Artifact> {
        self.artifacts
            .get(contract_name)
            .cloned()
            .ok_or_else(|| anyhow!("Artifact for contract {} not found", contract_name))
    }
}
