//! Configuration loading from TOML files
//!
//! Config file is selected via `--config <path>` (default: config/dev.toml).
//! Every section is optional; missing keys take the defaults below.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Deployment identifier, used as the Prometheus `site` label
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "brt".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Largest accepted upload body in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_server_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    5000
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    /// Object detection sidecar endpoint
    #[serde(default = "default_detector_url")]
    pub detector_url: String,
    /// OCR sidecar endpoint; absent means recognition runs degraded
    #[serde(default)]
    pub recognizer_url: Option<String>,
    #[serde(default = "default_inference_timeout_ms")]
    pub timeout_ms: u64,
    /// Upper bound on in-flight backend calls across all pipeline invocations
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_target_classes")]
    pub target_classes: Vec<String>,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            detector_url: default_detector_url(),
            recognizer_url: None,
            timeout_ms: default_inference_timeout_ms(),
            max_concurrent: default_max_concurrent(),
            target_classes: default_target_classes(),
            min_confidence: default_min_confidence(),
        }
    }
}

fn default_detector_url() -> String {
    "http://127.0.0.1:8500/detect".to_string()
}

fn default_inference_timeout_ms() -> u64 {
    5000
}

fn default_max_concurrent() -> usize {
    2
}

fn default_target_classes() -> Vec<String> {
    vec!["bus".to_string()]
}

fn default_min_confidence() -> f32 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// How long past its prediction an arrival stays visible
    #[serde(default = "default_expiry_grace_secs")]
    pub expiry_grace_secs: u64,
    /// Arrivals detected longer ago than this are deleted
    #[serde(default = "default_retention_minutes")]
    pub retention_minutes: u64,
    #[serde(default = "default_max_predictions")]
    pub max_predictions: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            expiry_grace_secs: default_expiry_grace_secs(),
            retention_minutes: default_retention_minutes(),
            max_predictions: default_max_predictions(),
        }
    }
}

/// Upper bounds for the queue windows; larger values are rejected at load
pub const MAX_EXPIRY_GRACE_SECS: u64 = 24 * 60 * 60;
pub const MAX_RETENTION_MINUTES: u64 = 7 * 24 * 60;

impl QueueConfig {
    fn validate(&self) -> anyhow::Result<()> {
        if self.expiry_grace_secs > MAX_EXPIRY_GRACE_SECS {
            anyhow::bail!(
                "queue.expiry_grace_secs = {} exceeds the maximum of {}",
                self.expiry_grace_secs,
                MAX_EXPIRY_GRACE_SECS
            );
        }
        if self.retention_minutes > MAX_RETENTION_MINUTES {
            anyhow::bail!(
                "queue.retention_minutes = {} exceeds the maximum of {}",
                self.retention_minutes,
                MAX_RETENTION_MINUTES
            );
        }
        Ok(())
    }
}

fn default_expiry_grace_secs() -> u64 {
    60
}

fn default_retention_minutes() -> u64 {
    30
}

fn default_max_predictions() -> usize {
    10
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RegistryConfig {
    /// TOML file with `[[line]]` tables; absent means the built-in lines
    #[serde(default)]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    #[serde(default = "default_egress_enabled")]
    pub enabled: bool,
    /// File path for arrival transitions (JSONL format)
    #[serde(default = "default_egress_file")]
    pub file: String,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self { enabled: default_egress_enabled(), file: default_egress_file() }
    }
}

fn default_egress_enabled() -> bool {
    true
}

fn default_egress_file() -> String {
    "arrivals.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    bind_address: String,
    server_port: u16,
    max_upload_bytes: usize,
    detector_url: String,
    recognizer_url: Option<String>,
    inference_timeout_ms: u64,
    max_concurrent_inferences: usize,
    target_classes: Vec<String>,
    min_detection_confidence: f32,
    expiry_grace_secs: u64,
    retention_minutes: u64,
    max_predictions: usize,
    registry_file: Option<String>,
    egress_enabled: bool,
    egress_file: String,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            bind_address: toml_config.server.bind_address,
            server_port: toml_config.server.port,
            max_upload_bytes: toml_config.server.max_upload_bytes,
            detector_url: toml_config.inference.detector_url,
            recognizer_url: toml_config.inference.recognizer_url.filter(|url| !url.is_empty()),
            inference_timeout_ms: toml_config.inference.timeout_ms,
            max_concurrent_inferences: toml_config.inference.max_concurrent.max(1),
            target_classes: toml_config.inference.target_classes,
            min_detection_confidence: toml_config.inference.min_confidence,
            expiry_grace_secs: toml_config.queue.expiry_grace_secs,
            retention_minutes: toml_config.queue.retention_minutes,
            max_predictions: toml_config.queue.max_predictions,
            registry_file: toml_config.registry.file,
            egress_enabled: toml_config.egress.enabled,
            egress_file: toml_config.egress.file,
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            config_file,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        toml_config
            .queue
            .validate()
            .with_context(|| format!("Invalid config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    pub fn detector_url(&self) -> &str {
        &self.detector_url
    }

    pub fn recognizer_url(&self) -> Option<&str> {
        self.recognizer_url.as_deref()
    }

    pub fn inference_timeout_ms(&self) -> u64 {
        self.inference_timeout_ms
    }

    pub fn max_concurrent_inferences(&self) -> usize {
        self.max_concurrent_inferences
    }

    pub fn target_classes(&self) -> &[String] {
        &self.target_classes
    }

    pub fn min_detection_confidence(&self) -> f32 {
        self.min_detection_confidence
    }

    pub fn expiry_grace_secs(&self) -> u64 {
        self.expiry_grace_secs
    }

    pub fn retention_minutes(&self) -> u64 {
        self.retention_minutes
    }

    pub fn max_predictions(&self) -> usize {
        self.max_predictions
    }

    pub fn registry_file(&self) -> Option<&str> {
        self.registry_file.as_deref()
    }

    pub fn egress_enabled(&self) -> bool {
        self.egress_enabled
    }

    pub fn egress_file(&self) -> &str {
        &self.egress_file
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}
