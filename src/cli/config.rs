use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde::Deserialize;

use crate::engine::{DEFAULT_REQUIRED_TOOLS, SchedulerConfig};
use crate::storage::RecordStore;
use crate::storage::json_store::JsonRecordStore;
use crate::storage::memory_store::MemoryRecordStore;
use crate::storage::sql_store::SqlRecordStore;

pub const DEFAULT_STORE_DIR: &str = "data/sopflow";
pub const DEFAULT_STORE_URL: &str = "sqlite://data/sopflow.db?mode=rwc";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_ERROR_BACKOFF_FACTOR: u32 = 5;

/// Which record store backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Json,
    Memory,
    Sql,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: Option<StoreKind>,
    /// Base directory of the JSON store.
    pub dir: Option<String>,
    /// Database URL of the SQL store.
    pub url: Option<String>,
}

impl StoreConfig {
    /// Open the configured backend.
    pub async fn open(&self) -> Result<Arc<dyn RecordStore>> {
        match self.kind.unwrap_or_default() {
            StoreKind::Json => {
                let dir = self.dir.as_deref().unwrap_or(DEFAULT_STORE_DIR);
                Ok(Arc::new(JsonRecordStore::new(dir)))
            }
            StoreKind::Memory => Ok(Arc::new(MemoryRecordStore::new())),
            StoreKind::Sql => {
                let url = self.url.as_deref().unwrap_or(DEFAULT_STORE_URL);
                let store = SqlRecordStore::connect(url)
                    .await
                    .with_context(|| format!("Failed to open SQL store at {}", url))?;
                Ok(Arc::new(store))
            }
        }
    }
}

/// Configuration loaded from `sopflow.yaml`.
/// All fields are optional; missing fields fall back to CLI/env/defaults.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct SopflowConfig {
    pub agent_name: Option<String>,
    pub store: StoreConfig,
    pub poll_interval_secs: Option<u64>,
    /// Multiplier on the poll interval used as backoff after a failed tick.
    pub error_backoff_factor: Option<u32>,
    pub rescan_interval_secs: Option<u64>,
    pub required_tools: Option<Vec<String>>,
    pub image_api_url: Option<String>,
}

impl SopflowConfig {
    /// Load configuration from a YAML file.
    ///
    /// - If `path` is `Some`, load that specific file (error if missing).
    /// - If `path` is `None`, auto-detect `sopflow.yaml` in cwd; return defaults if absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_path = match path {
            Some(p) => {
                if !p.exists() {
                    anyhow::bail!("Config file not found: {}", p.display());
                }
                p.to_path_buf()
            }
            None => {
                let default_path = Path::new("sopflow.yaml");
                if !default_path.exists() {
                    return Ok(Self::default());
                }
                default_path.to_path_buf()
            }
        };

        let contents = std::fs::read_to_string(&file_path)
            .with_context(|| format!("Failed to read config file: {}", file_path.display()))?;

        let config: SopflowConfig = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", file_path.display()))?;

        Ok(config)
    }

    /// Scheduler timing. `poll_override` (from the CLI) wins over the file.
    pub fn scheduler_config(&self, poll_override: Option<u64>) -> SchedulerConfig {
        let poll_secs = poll_override
            .or(self.poll_interval_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS)
            .max(1);
        let factor = self
            .error_backoff_factor
            .unwrap_or(DEFAULT_ERROR_BACKOFF_FACTOR)
            .max(1);
        let poll_interval = Duration::from_secs(poll_secs);

        SchedulerConfig {
            poll_interval,
            error_backoff: poll_interval.saturating_mul(factor),
            rescan_interval: self
                .rescan_interval_secs
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
        }
    }

    pub fn required_tools(&self) -> Vec<String> {
        self.required_tools.clone().unwrap_or_else(|| {
            DEFAULT_REQUIRED_TOOLS
                .iter()
                .map(|s| s.to_string())
                .collect()
        })
    }
}
