//! Test setup helpers.

use std::sync::Arc;
use std::time::Duration;

use ledgerplan::journal::{DeploymentLoader, MemoryDeploymentLoader};
use ledgerplan::transport::InMemoryLedger;
use ledgerplan::types::{Address, Artifact};
use ledgerplan::{DeployConfig, Deployer, StaticArtifactResolver};

use super::codec::JsonCodec;

/// One confirmation, fast polling.
pub fn fast_config() -> DeployConfig {
    DeployConfig {
        required_confirmations: 1,
        block_polling_interval: Duration::from_millis(10),
        ..DeployConfig::default()
    }
}

pub fn artifacts() -> StaticArtifactResolver {
    StaticArtifactResolver::new()
        .with(Artifact::new("Foo", "0x6080aa01"))
        .with(Artifact::new("Bar", "0x6080bb02"))
        .with(Artifact::new("Token", "0x6080cc03"))
        .with(Artifact::new("Contract1", "0x6080dd04"))
}

pub fn deployer(
    ledger: &InMemoryLedger,
    loader: Arc<dyn DeploymentLoader>,
    config: DeployConfig,
) -> Deployer {
    Deployer::new(
        Arc::new(ledger.clone()),
        loader,
        Arc::new(JsonCodec),
        Arc::new(artifacts()),
        ledger.accounts(),
    )
    .with_config(config)
}

/// A ledger and an in-memory journal that outlive individual deployers.
pub struct TestEnv {
    pub ledger: InMemoryLedger,
    pub loader: Arc<MemoryDeploymentLoader>,
    pub config: DeployConfig,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            ledger: InMemoryLedger::default(),
            loader: Arc::new(MemoryDeploymentLoader::new()),
            config: fast_config(),
        }
    }

    pub fn with_config(mut self, config: DeployConfig) -> Self {
        self.config = config;
        self
    }

    pub fn deployer(&self) -> Deployer {
        deployer(&self.ledger, self.loader.clone(), self.config.clone())
    }

    pub fn account(&self, index: usize) -> Address {
        self.ledger.accounts()[index]
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
