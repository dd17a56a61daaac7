//! Filesystem-backed deployment directory.

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ledgerplan_types::{Address, Artifact, FutureId, JournalMessage};

use crate::paths::{artifact_path, atomic_write_json, deployed_addresses_path, journal_path};
use crate::DeploymentLoader;

/// Deployment directory with an append-only `journal.jsonl`.
pub struct FileDeploymentLoader {
    deployment_dir: Arc<Path>,
    journal_file: Arc<Path>,
    journal_lock: parking_lot::Mutex<()>,
    addresses: parking_lot::RwLock<BTreeMap<FutureId, Address>>,
}

impl FileDeploymentLoader {
    pub fn new<P: AsRef<Path>>(deployment_dir: P) -> Result<Self> {
        let deployment_dir = deployment_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&deployment_dir).map_err(|e| {
            anyhow!(
                "Failed to create deployment directory {}: {}",
                deployment_dir.display(),
                e
            )
        })?;

        let addresses_path = deployed_addresses_path(&deployment_dir);
        let addresses = if addresses_path.exists() {
            let json = std::fs::read_to_string(&addresses_path)
                .map_err(|e| anyhow!("Failed to read deployed addresses: {}", e))?;
            serde_json::from_str(&json)
                .map_err(|e| anyhow!("Failed to parse deployed addresses: {}", e))?
        } else {
            BTreeMap::new()
        };

        let journal_file = journal_path(&deployment_dir);
        Ok(Self {
            deployment_dir: Arc::from(deployment_dir),
            journal_file: Arc::from(journal_file),
            journal_lock: parking_lot::Mutex::new(()),
            addresses: parking_lot::RwLock::new(addresses),
        })
    }

    pub fn deployment_dir(&self) -> &Path {
        &self.deployment_dir
    }

    pub fn journal_path(&self) -> PathBuf {
        self.journal_file.to_path_buf()
    }
}

impl DeploymentLoader for FileDeploymentLoader {
    fn record_message(&self, message: &JournalMessage) -> Result<()> {
        let json = serde_json::to_string(message)
            .map_err(|e| anyhow!("Failed to serialize journal message: {}", e))?;
        // Serialize writes across threads to keep jsonl lines intact.
        let _guard = self.journal_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&*self.journal_file)
            .map_err(|e| anyhow!("Failed to open journal: {}", e))?;
        writeln!(file, "{}", json).map_err(|e| anyhow!("Failed to write journal: {}", e))?;
        file.sync_data()
            .map_err(|e| anyhow!("Failed to sync journal: {}", e))?;
        Ok(())
    }

    fn read_messages(&self) -> Result<Vec<JournalMessage>> {
        let _guard = self.journal_lock.lock();
        if !self.journal_file.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&*self.journal_file)
            .map_err(|e| anyhow!("Failed to open journal: {}", e))?;

        let lines: Vec<String> = BufReader::new(file)
            .lines()
            .collect::<std::io::Result<_>>()
            .map_err(|e| anyhow!("Failed to read journal: {}", e))?;

        let mut messages = Vec::with_capacity(lines.len());
        let last = lines.len().saturating_sub(1);
        for (i, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalMessage>(line) {
                Ok(msg) => messages.push(msg),
                // A torn final line is a write interrupted by a crash.
                Err(e) if i == last => {
                    tracing::warn!(line = i + 1, error = %e, "ignoring incomplete last journal line");
                }
                Err(e) => {
                    return Err(anyhow!("Corrupt journal at line {}: {}", i + 1, e));
                }
            }
        }
        Ok(messages)
    }

    fn store_artifact(&self, artifact_id: &str, artifact: &Artifact) -> Result<()> {
        atomic_write_json(&artifact_path(&self.deployment_dir, artifact_id), artifact)
    }

    fn load_artifact(&self, artifact_id: &str) -> Result<Artifact> {
        let path = artifact_path(&self.deployment_dir, artifact_id);
        let json = std::fs::read_to_string(&path)
            .map_err(|e| anyhow!("Failed to read artifact {}: {}", artifact_id, e))?;
        serde_json::from_str(&json)
            .map_err(|e| anyhow!("Failed to parse artifact {}: {}", artifact_id, e))
    }

    fn record_deployed_address(&self, future_id: &str, address: Address) -> Result<()> {
        let mut addresses = self.addresses.write();
        addresses.insert(future_id.to_string(), address);
        atomic_write_json(&deployed_addresses_path(&self.deployment_dir), &*addresses)
    }

    fn deployed_addresses(&self) -> Result<BTreeMap<FutureId, Address>> {
        Ok(self.addresses.read().clone())
    }
}
