//! Configuration structures for the vault-history pipeline.

use crate::error::{Error, Result};
use crate::types::Checkpoint;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable names.
pub mod env {
    pub const API_ENDPOINT: &str = "API_ENDPOINT";
    pub const NETWORK: &str = "NETWORK";
    pub const DATA_DIR: &str = "DATA_DIR";
    pub const BATCH_SIZE: &str = "BATCH_SIZE";
}

/// Main configuration for the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote subgraph source.
    pub source: SourceConfig,
    /// Checkpoint range for snapshots.
    pub checkpoints: CheckpointConfig,
    /// Ledger reconstruction.
    pub ledger: LedgerConfig,
    /// Transition labeling.
    pub labeler: LabelerConfig,
    /// Retry policy for remote requests.
    pub retry: RetryConfig,
    /// On-disk artifacts.
    pub storage: StorageConfig,
}

impl Config {
    /// Load from an optional JSON file, then overlay environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                debug!(path = %path.display(), "Loaded config file");
                serde_json::from_str(&raw)?
            }
            None => Config::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Overlay values present in the process environment.
    pub fn apply_env(&mut self) {
        if let Ok(endpoint) = std::env::var(env::API_ENDPOINT) {
            if !endpoint.trim().is_empty() {
                self.source.endpoint = Some(endpoint.trim().to_string());
            }
        }
        if let Ok(network) = std::env::var(env::NETWORK) {
            self.source.set_network(network);
        }
        if let Ok(dir) = std::env::var(env::DATA_DIR) {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(size) = std::env::var(env::BATCH_SIZE)
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.labeler.batch_size = size;
        }
    }

    /// Reject settings that would make a run meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.labeler.batch_size == 0 {
            return Err(Error::config("labeler.batch_size must be positive"));
        }
        if self.source.collateral_types.is_empty() {
            return Err(Error::config("source.collateral_types is empty"));
        }
        if self.source.page_size == 0 {
            return Err(Error::config("source.page_size must be positive"));
        }
        self.checkpoints.checkpoints()?;
        Ok(())
    }

    /// Log the effective settings.
    pub fn log_config(&self) {
        info!(
            endpoint = self.source.endpoint.as_deref().unwrap_or("<unset>"),
            network = %self.source.network,
            collateral_types = ?self.source.collateral_types,
            checkpoint_min = self.checkpoints.min,
            checkpoint_max = self.checkpoints.max,
            batch_size = self.labeler.batch_size,
            data_dir = %self.storage.data_dir.display(),
            "Configuration"
        );
    }
}

/// Remote subgraph configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// GraphQL endpoint; without it nothing is fetched.
    pub endpoint: Option<String>,
    /// Network name (e.g., "mainnet").
    pub network: String,
    /// Whitelisted collateral classes (ilks).
    pub collateral_types: Vec<String>,
    /// Page size for `id_gt` cursors.
    pub page_size: usize,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl SourceConfig {
    /// Default collateral whitelist for a network.
    pub fn whitelist_for(network: &str) -> Vec<String> {
        if network == "mainnet" {
            vec!["ETH-A".to_string()]
        } else {
            vec!["ETH-A".to_string(), "FAU-A".to_string()]
        }
    }

    /// Switch network, following its default whitelist unless a custom one
    /// was configured.
    pub fn set_network(&mut self, network: String) {
        let default_types = Self::whitelist_for(&network);
        if self.collateral_types == Self::whitelist_for(&self.network) {
            self.collateral_types = default_types;
        } else if self.collateral_types != default_types {
            warn!(
                network = %network,
                collateral_types = ?self.collateral_types,
                "Keeping configured collateral types instead of the network default"
            );
        }
        self.network = network;
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            network: "mainnet".to_string(),
            collateral_types: Self::whitelist_for("mainnet"),
            page_size: 1000,
            request_timeout_secs: 60,
        }
    }
}

/// Checkpoint (block) range configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// First block (inclusive).
    pub min: Checkpoint,
    /// Last block (exclusive).
    pub max: Checkpoint,
    /// Number of evenly spaced data points; ignored when `step` is set.
    pub count: Option<u64>,
    /// Fixed block step.
    pub step: Option<u64>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            min: 8_928_198,
            max: 16_267_142,
            count: Some(1000),
            step: None,
        }
    }
}

impl CheckpointConfig {
    /// Block step between consecutive checkpoints.
    pub fn step(&self) -> Result<u64> {
        if self.max <= self.min {
            return Err(Error::config(format!(
                "checkpoint range is empty: min {} >= max {}",
                self.min, self.max
            )));
        }
        let step = match (self.step, self.count) {
            (Some(step), _) => step,
            (None, Some(count)) if count > 0 => (self.max - self.min) / count,
            _ => return Err(Error::config("checkpoints need either a step or a positive count")),
        };
        if step == 0 {
            return Err(Error::config("checkpoint step resolves to zero"));
        }
        Ok(step)
    }

    /// All checkpoints in `[min, max)`.
    pub fn checkpoints(&self) -> Result<Vec<Checkpoint>> {
        let step = self.step()?;
        Ok((self.min..self.max).step_by(step as usize).collect())
    }
}

/// Ledger reconstruction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Synthetic price sample points between the first and last event.
    pub price_sample_points: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            price_sample_points: 100,
        }
    }
}

/// Transition labeling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelerConfig {
    /// Records per output batch.
    pub batch_size: usize,
    /// Vaults need collateral strictly above this at the first checkpoint.
    pub min_collateral: f64,
    /// Vaults need debt strictly above this at the first checkpoint.
    pub min_debt: f64,
    /// Collateral class the dataset is built for.
    pub collateral_type: String,
}

impl Default for LabelerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            min_collateral: 0.0,
            min_debt: 0.0,
            collateral_type: "ETH-A".to_string(),
        }
    }
}

/// Retry policy for remote requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts; 0 retries forever.
    pub max_attempts: u32,
    /// First backoff delay in milliseconds.
    pub initial_delay_ms: u64,
    /// Backoff cap in milliseconds.
    pub max_delay_ms: u64,
    /// Delay multiplier per attempt.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay_ms: 500,
            max_delay_ms: 16_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// On-disk artifact configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for all JSON artifacts.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}
