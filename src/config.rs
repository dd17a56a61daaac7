//! Deployment configuration.
//!
//! Loaded from a JSON file, or from `LEDGERPLAN_*` environment variables on
//! top of the defaults. Durations are written in milliseconds.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use ledgerplan_types::Address;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Blocks (including the one holding the transaction) before a receipt counts.
    pub required_confirmations: u64,
    #[serde(rename = "block_polling_interval_ms", with = "millis")]
    pub block_polling_interval: Duration,
    #[serde(rename = "time_before_bumping_fees_ms", with = "millis")]
    pub time_before_bumping_fees: Duration,
    pub max_fee_bumps: usize,
    pub disable_fee_bumping: bool,
    /// Fee bumps never go above this price per gas.
    #[serde(with = "ledgerplan_types::amount::option")]
    pub max_fee_per_gas_limit: Option<u128>,
    /// Name of the execution strategy.
    pub strategy: String,
    /// Sender for futures without an explicit one; defaults to the first account.
    pub default_sender: Option<Address>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            required_confirmations: 5,
            block_polling_interval: Duration::from_millis(1000),
            time_before_bumping_fees: Duration::from_secs(180),
            max_fee_bumps: 4,
            disable_fee_bumping: false,
            max_fee_per_gas_limit: None,
            strategy: "basic".to_string(),
            default_sender: None,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => {
            let normalized = value.trim().to_ascii_lowercase();
            !matches!(normalized.as_str(), "0" | "false" | "no" | "off")
        }
        Err(_) => default,
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

impl DeployConfig {
    /// Read a JSON config file; missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| anyhow!("Failed to parse config {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `LEDGERPLAN_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let max_fee_per_gas_limit = match std::env::var("LEDGERPLAN_MAX_FEE_PER_GAS_LIMIT") {
            Ok(v) => Some(
                v.trim()
                    .parse::<u128>()
                    .map_err(|e| anyhow!("Invalid LEDGERPLAN_MAX_FEE_PER_GAS_LIMIT: {}", e))?,
            ),
            Err(_) => None,
        };
        let default_sender = match std::env::var("LEDGERPLAN_DEFAULT_SENDER") {
            Ok(v) => Some(
                Address::from_hex(&v)
                    .map_err(|e| anyhow!("Invalid LEDGERPLAN_DEFAULT_SENDER: {}", e))?,
            ),
            Err(_) => None,
        };

        let config = Self {
            required_confirmations: env_u64(
                "LEDGERPLAN_REQUIRED_CONFIRMATIONS",
                defaults.required_confirmations,
            ),
            block_polling_interval: Duration::from_millis(env_u64(
                "LEDGERPLAN_BLOCK_POLLING_INTERVAL_MS",
                defaults.block_polling_interval.as_millis() as u64,
            )),
            time_before_bumping_fees: Duration::from_millis(env_u64(
                "LEDGERPLAN_TIME_BEFORE_BUMPING_FEES_MS",
                defaults.time_before_bumping_fees.as_millis() as u64,
            )),
            max_fee_bumps: env_u64("LEDGERPLAN_MAX_FEE_BUMPS", defaults.max_fee_bumps as u64)
                as usize,
            disable_fee_bumping: env_bool(
                "LEDGERPLAN_DISABLE_FEE_BUMPING",
                defaults.disable_fee_bumping,
            ),
            max_fee_per_gas_limit,
            strategy: std::env::var("LEDGERPLAN_STRATEGY").unwrap_or(defaults.strategy),
            default_sender,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.required_confirmations == 0 {
            return Err(anyhow!("required_confirmations must be at least 1"));
        }
        if self.block_polling_interval.is_zero() {
            return Err(anyhow!("block_polling_interval must be positive"));
        }
        if self.strategy.trim().is_empty() {
            return Err(anyhow!("strategy must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"required_confirmations": 1, "max_fee_per_gas_limit": "1000", "block_polling_interval_ms": 50}"#,
        )?;
        let config = DeployConfig::load(&path)?;
        assert_eq!(config.required_confirmations, 1);
        assert_eq!(config.max_fee_per_gas_limit, Some(1000));
        assert_eq!(config.block_polling_interval, Duration::from_millis(50));
        assert_eq!(config.max_fee_bumps, 4);
        assert_eq!(config.strategy, "basic");
        Ok(())
    }

    #[test]
    fn test_zero_confirmations_rejected() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"required_confirmations": 0}"#)?;
        assert!(DeployConfig::load(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_env_bool_parsing() {
        assert!(env_bool("LEDGERPLAN_TEST_UNSET_VARIABLE", true));
        assert!(!env_bool("LEDGERPLAN_TEST_UNSET_VARIABLE", false));
    }
}
