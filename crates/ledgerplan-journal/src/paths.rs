//! Path utilities for the deployment directory layout.
//!
//! ```text
//! <deployment_dir>/
//!   journal.jsonl
//!   deployed_addresses.json
//!   artifacts/<artifact id>.json
//! ```

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

pub fn journal_path(deployment_dir: &Path) -> PathBuf {
    deployment_dir.join("journal.jsonl")
}

pub fn deployed_addresses_path(deployment_dir: &Path) -> PathBuf {
    deployment_dir.join("deployed_addresses.json")
}

/// File name of an artifact; path separators in the id are replaced.
pub fn artifact_path(deployment_dir: &Path, artifact_id: &str) -> PathBuf {
    let name: String = artifact_id
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    deployment_dir
        .join("artifacts")
        .join(format!("{}.json", name))
}

/// Ensure all parent directories exist for a path.
pub fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| anyhow!("Failed to create directory {}: {}", parent.display(), e))?;
    }
    Ok(())
}

/// Write a file atomically (write to .tmp, then rename).
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    ensure_parent_dirs(path)?;
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|s| s.to_str()).unwrap_or("tmp")
    ));
    std::fs::write(&tmp_path, contents)
        .map_err(|e| anyhow!("Failed to write temp file {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        anyhow!(
            "Failed to rename {} to {}: {}",
            tmp_path.display(),
            path.display(),
            e
        )
    })?;
    Ok(())
}

/// Write a JSON file atomically, pretty printed so it can be read by humans.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| anyhow!("Failed to serialize JSON: {}", e))?;
    atomic_write(path, &json)
}
