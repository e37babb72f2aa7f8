//! Configuration system for tessera.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreResult, TesseraError};
pub use crate::reconcile::{GeometryPolicy, ReconcileConfig};

/// Detector adapter declaration, instantiated by the adapter factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AdapterSpec {
    /// Derives text blocks and equation-number labels from the text layer.
    TextStructure {
        #[serde(default = "default_text_structure_name")]
        name: String,
    },
    /// Replays detections written by an out-of-process model.
    Precomputed {
        name: String,
        /// JSON file of detections for the whole document.
        path: PathBuf,
        /// Vendor class -> normalized class.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        class_map: BTreeMap<String, String>,
    },
}

fn default_text_structure_name() -> String {
    "text-structure".to_string()
}

impl AdapterSpec {
    pub fn name(&self) -> &str {
        match self {
            Self::TextStructure { name } | Self::Precomputed { name, .. } => name,
        }
    }
}

/// Detection phase configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Timeout for a single adapter call on one page (milliseconds).
    pub adapter_timeout_ms: u64,
    /// Pages of one document detected concurrently.
    pub page_concurrency: usize,
    /// Stop calling an adapter for the rest of a document once it has timed
    /// out on one of its pages.
    pub disable_after_timeout: bool,
    /// Adapters to run on every page, in declaration order.
    pub adapters: Vec<AdapterSpec>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            adapter_timeout_ms: 30_000,
            page_concurrency: 4,
            disable_after_timeout: true,
            adapters: vec![AdapterSpec::TextStructure {
                name: default_text_structure_name(),
            }],
        }
    }
}

impl DetectionConfig {
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }
}

/// Retry policy for transient stage failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Initial delay before first retry (milliseconds)
    pub initial_delay_ms: u64,
    /// Maximum delay between retries (milliseconds)
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            multiplier: 2.0_f32,
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Default per-call stage timeout (milliseconds).
    pub stage_timeout_ms: u64,
    /// Documents processed concurrently by `run_batch`.
    pub max_concurrent_documents: usize,
    pub retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stage_timeout_ms: 300_000,
            max_concurrent_documents: 4,
            retry: RetryPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }
}

/// Semantic bundling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundlingConfig {
    /// Upper bound on chunk length, in characters.
    pub max_chunk_chars: usize,
}

impl Default for BundlingConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 1200,
        }
    }
}

/// Where the load stage writes records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Jsonl,
    Sqlite,
}

/// Storage load configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub sink: SinkKind,
    /// Output file (JSON Lines file or SQLite database).
    pub path: PathBuf,
    /// Table name for the SQLite sink.
    pub table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sink: SinkKind::Jsonl,
            path: PathBuf::from("tessera-chunks.jsonl"),
            table: "chunks".to_string(),
        }
    }
}

/// Main tessera configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseraConfig {
    pub reconcile: ReconcileConfig,
    pub detection: DetectionConfig,
    pub orchestrator: OrchestratorConfig,
    pub bundling: BundlingConfig,
    pub storage: StorageConfig,
}

impl TesseraConfig {
    /// Load configuration from a file (TOML, JSON, or YAML).
    pub fn from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let ext = path.as_ref().extension().and_then(|e| e.to_str());

        let config: Self = match ext {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| TesseraError::Configuration(e.to_string()))?
            }
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| TesseraError::Configuration(e.to_string()))?,
            Some("yaml" | "yml") => serde_yaml::from_str(&content)
                .map_err(|e| TesseraError::Configuration(e.to_string()))?,
            _ => {
                return Err(TesseraError::Configuration(
                    "Unsupported config file format. Use .toml, .json, or .yaml".to_string(),
                ))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Default configuration overlaid with environment variables.
    pub fn from_env() -> CoreResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Overlay environment variables onto this configuration.
    ///
    /// Reads:
    /// - `TESSERA_PAIR_DISTANCE`
    /// - `TESSERA_IOU_THRESHOLD`
    /// - `TESSERA_ADAPTER_TIMEOUT_MS`
    /// - `TESSERA_STAGE_TIMEOUT_MS`
    /// - `TESSERA_MAX_RETRIES`
    /// - `TESSERA_MAX_CONCURRENT_DOCUMENTS`
    /// - `TESSERA_STORAGE_PATH`
    pub fn apply_env(&mut self) -> CoreResult<()> {
        if let Some(v) = env_parse("TESSERA_PAIR_DISTANCE")? {
            self.reconcile.pair_distance = v;
        }
        if let Some(v) = env_parse("TESSERA_IOU_THRESHOLD")? {
            self.reconcile.iou_threshold = v;
        }
        if let Some(v) = env_parse("TESSERA_ADAPTER_TIMEOUT_MS")? {
            self.detection.adapter_timeout_ms = v;
        }
        if let Some(v) = env_parse("TESSERA_STAGE_TIMEOUT_MS")? {
            self.orchestrator.stage_timeout_ms = v;
        }
        if let Some(v) = env_parse("TESSERA_MAX_RETRIES")? {
            self.orchestrator.retry.max_retries = v;
        }
        if let Some(v) = env_parse("TESSERA_MAX_CONCURRENT_DOCUMENTS")? {
            self.orchestrator.max_concurrent_documents = v;
        }
        if let Ok(path) = std::env::var("TESSERA_STORAGE_PATH") {
            self.storage.path = PathBuf::from(path);
        }
        self.validate()
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> CoreResult<()> {
        self.reconcile.validate()?;
        if self.detection.adapter_timeout_ms == 0 {
            return Err(TesseraError::configuration(
                "detection.adapter_timeout_ms must be greater than 0",
            ));
        }
        if self.detection.page_concurrency == 0 {
            return Err(TesseraError::configuration(
                "detection.page_concurrency must be at least 1",
            ));
        }
        // The extraction stage must outlive at least one stalled adapter call.
        if self.orchestrator.stage_timeout_ms <= self.detection.adapter_timeout_ms {
            return Err(TesseraError::configuration(format!(
                "orchestrator.stage_timeout_ms ({}) must be greater than detection.adapter_timeout_ms ({})",
                self.orchestrator.stage_timeout_ms, self.detection.adapter_timeout_ms
            )));
        }
        if self.orchestrator.max_concurrent_documents == 0 {
            return Err(TesseraError::configuration(
                "orchestrator.max_concurrent_documents must be at least 1",
            ));
        }
        if self.bundling.max_chunk_chars == 0 {
            return Err(TesseraError::configuration(
                "bundling.max_chunk_chars must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Build configuration using builder pattern.
    pub fn builder() -> TesseraConfigBuilder {
        TesseraConfigBuilder::default()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> CoreResult<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            TesseraError::Configuration(format!("{} has an invalid value: '{}'", key, raw))
        }),
        Err(_) => Ok(None),
    }
}

/// Builder for TesseraConfig.
#[derive(Default)]
pub struct TesseraConfigBuilder {
    config: TesseraConfig,
}

impl TesseraConfigBuilder {
    /// Set reconciliation configuration.
    pub fn reconcile(mut self, config: ReconcileConfig) -> Self {
        self.config.reconcile = config;
        self
    }

    /// Set detection configuration.
    pub fn detection(mut self, config: DetectionConfig) -> Self {
        self.config.detection = config;
        self
    }

    /// Set orchestrator configuration.
    pub fn orchestrator(mut self, config: OrchestratorConfig) -> Self {
        self.config.orchestrator = config;
        self
    }

    /// Set bundling configuration.
    pub fn bundling(mut self, config: BundlingConfig) -> Self {
        self.config.bundling = config;
        self
    }

    /// Set storage configuration.
    pub fn storage(mut self, config: StorageConfig) -> Self {
        self.config.storage = config;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> CoreResult<TesseraConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
