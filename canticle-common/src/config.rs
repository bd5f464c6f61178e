//! Bootstrap configuration for the Canticle classifier
//!
//! Settings sources, highest priority first:
//! 1. Command-line arguments (the binary's clap `Args`, which also read `CANTICLE_*` env vars)
//! 2. TOML configuration file
//! 3. Built-in defaults (code constants)
//!
//! A missing TOML file is not an error: a warning is logged and defaults are used.
//! The extraction defaults are the values the shipped model was fitted with;
//! changing them invalidates the model.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "CANTICLE_CONFIG";

/// Default HTTP port for canticle-classifier
pub const DEFAULT_PORT: u16 = 5731;

/// Canonical pipeline sample rate (Hz)
pub const CANONICAL_SAMPLE_RATE: u32 = 22050;

/// Canonical analysis window (seconds)
pub const CANONICAL_DURATION_SECS: u32 = 10;

/// File name of the model artifact searched for in the default candidate paths
pub const MODEL_FILE_NAME: &str = "audio_classifier_random_forest.json";

/// Bootstrap configuration loaded from TOML file
///
/// These settings cannot change during runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Interface to bind the HTTP listener to
    pub bind_address: String,

    /// HTTP server port
    pub port: u16,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Model artifact location
    pub model: ModelConfig,

    /// Feature extraction parameters
    pub extraction: ExtractionConfig,

    /// Batch execution limits
    pub batch: BatchConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            logging: LoggingConfig::default(),
            model: ModelConfig::default(),
            extraction: ExtractionConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Model artifact location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModelConfig {
    /// Explicit artifact path; when set, it is the only candidate
    pub path: Option<PathBuf>,

    /// Ordered candidate paths tried when `path` is not set.
    /// Empty means [`default_model_candidates`].
    pub candidate_paths: Vec<PathBuf>,
}

impl ModelConfig {
    /// Ordered list of paths to probe for the artifact
    pub fn candidates(&self) -> Vec<PathBuf> {
        if let Some(path) = &self.path {
            return vec![path.clone()];
        }
        if self.candidate_paths.is_empty() {
            default_model_candidates()
        } else {
            self.candidate_paths.clone()
        }
    }
}

/// Built-in artifact search order
pub fn default_model_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![
        PathBuf::from("models").join(MODEL_FILE_NAME),
        PathBuf::from(MODEL_FILE_NAME),
    ];
    if let Some(data_dir) = dirs::data_local_dir() {
        candidates.push(data_dir.join("canticle").join("models").join(MODEL_FILE_NAME));
    }
    candidates
}

/// Feature extractor implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorStrategy {
    /// Framed STFT analysis with mel-cepstral, chroma, rhythm and HPSS features
    #[default]
    Full,
    /// Single whole-signal FFT with simplified derivations
    Reduced,
}

impl ExtractorStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractorStrategy::Full => "full",
            ExtractorStrategy::Reduced => "reduced",
        }
    }
}

impl fmt::Display for ExtractorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractorStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(ExtractorStrategy::Full),
            "reduced" | "minimal" => Ok(ExtractorStrategy::Reduced),
            other => Err(format!(
                "unknown extractor strategy '{}' (expected 'full' or 'reduced')",
                other
            )),
        }
    }
}

/// Feature extraction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub strategy: ExtractorStrategy,

    /// Canonical sample rate signals are conditioned to
    pub sample_rate: u32,

    /// Canonical window length in seconds
    pub duration_secs: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            strategy: ExtractorStrategy::default(),
            sample_rate: CANONICAL_SAMPLE_RATE,
            duration_secs: CANONICAL_DURATION_SECS,
        }
    }
}

impl ExtractionConfig {
    /// Number of samples in the canonical window
    pub fn target_length(&self) -> usize {
        self.sample_rate as usize * self.duration_secs as usize
    }
}

/// Batch execution limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum items accepted in one batch request
    pub max_items: usize,

    /// Worker pool size; 0 selects `min(4, available cores)`
    pub workers: usize,

    /// Per-item time budget in seconds
    pub item_timeout_secs: u64,

    /// Batches allowed in flight at once; further submissions are rejected
    pub max_pending_batches: usize,

    /// Largest accepted request body in MiB (a 10 s signal at 22050 Hz is about 3 MiB of JSON)
    pub max_request_mb: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_items: 1000,
            workers: 0,
            item_timeout_secs: 30,
            max_pending_batches: 2,
            max_request_mb: 256,
        }
    }
}

impl BatchConfig {
    /// Resolved worker count (never 0)
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cores.min(4)
    }

    /// Request body limit in bytes
    pub fn max_request_bytes(&self) -> usize {
        self.max_request_mb.saturating_mul(1024 * 1024)
    }
}

/// Values supplied on the command line (or their `CANTICLE_*` env equivalents)
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub bind_address: Option<String>,
    pub model_path: Option<PathBuf>,
    pub strategy: Option<ExtractorStrategy>,
    pub workers: Option<usize>,
    pub log_level: Option<String>,
}

impl TomlConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
    }

    /// Load configuration, falling back to defaults when no file is available
    ///
    /// A file that exists but fails to parse is still an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => {
                let config = Self::load(path)?;
                info!("Loaded configuration from {}", path.display());
                Ok(config)
            }
            Some(path) => {
                warn!(
                    "Config file {} not found, using built-in defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => {
                warn!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Apply command-line / environment overrides on top of file values
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(bind_address) = overrides.bind_address {
            self.bind_address = bind_address;
        }
        if let Some(path) = overrides.model_path {
            self.model.path = Some(path);
        }
        if let Some(strategy) = overrides.strategy {
            self.extraction.strategy = strategy;
        }
        if let Some(workers) = overrides.workers {
            self.batch.workers = workers;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.extraction.sample_rate == 0 {
            return Err(Error::Config("extraction.sample_rate must be > 0".to_string()));
        }
        if self.extraction.duration_secs == 0 {
            return Err(Error::Config("extraction.duration_secs must be > 0".to_string()));
        }
        if self.batch.max_items == 0 {
            return Err(Error::Config("batch.max_items must be > 0".to_string()));
        }
        if self.batch.item_timeout_secs == 0 {
            return Err(Error::Config("batch.item_timeout_secs must be > 0".to_string()));
        }
        if self.batch.max_pending_batches == 0 {
            return Err(Error::Config("batch.max_pending_batches must be > 0".to_string()));
        }
        if self.batch.max_request_mb == 0 {
            return Err(Error::Config("batch.max_request_mb must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Per-user config file location (`<config dir>/canticle/canticle.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("canticle").join("canticle.toml"))
}

/// Resolve which config file to read
///
/// Priority: explicit argument, then `CANTICLE_CONFIG`, then the per-user default
/// (only if it exists).
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    default_config_path().filter(|p| p.exists())
}

/// Write configuration to TOML atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}
