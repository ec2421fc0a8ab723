//! Configuration loading, validation, and management for ContextForge.
//!
//! Loads configuration from `~/.contextforge/config.toml` with environment
//! variable overrides. Validates all settings at load time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.contextforge/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Model used for token estimation and pricing when a request names none
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Token budget used when a request names none
    #[serde(default = "default_budget_tokens")]
    pub default_budget_tokens: usize,

    /// Freshness SLA in milliseconds; absent means "unknown" freshness
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_freshness_sla_ms: Option<u64>,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Custom token counting schemes keyed by model id or prefix
    #[serde(default)]
    pub tokens: BTreeMap<String, TokenSchemeConfig>,

    /// Per-million input token price overrides keyed by model id
    #[serde(default)]
    pub pricing: BTreeMap<String, PricingOverrideConfig>,
}

fn default_model() -> String {
    "openai/gpt-4o".into()
}
fn default_budget_tokens() -> usize {
    4096
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// TTL applied to sources that do not declare their own
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
}

fn default_ttl_secs() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Per-source timeout applied to sources that do not declare their own
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
        }
    }
}

/// Where lineage records are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// One of "memory", "file", "sqlite"
    #[serde(default = "default_ledger_backend")]
    pub backend: String,

    /// File path for the "file" and "sqlite" backends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_ledger_backend() -> String {
    "sqlite".into()
}

const LEDGER_BACKENDS: [&str; 3] = ["memory", "file", "sqlite"];

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: default_ledger_backend(),
            path: None,
        }
    }
}

impl LedgerConfig {
    /// The configured path, or the backend's default under the config dir.
    pub fn resolved_path(&self) -> PathBuf {
        match &self.path {
            Some(p) => p.clone(),
            None if self.backend == "file" => EngineConfig::config_dir().join("ledger.jsonl"),
            None => EngineConfig::config_dir().join("ledger.sqlite"),
        }
    }
}

/// `chars` characters count as `tokens` tokens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TokenSchemeConfig {
    pub chars: u32,
    pub tokens: u32,
}

/// Custom per-million-token input pricing for a model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PricingOverrideConfig {
    /// Price per 1M input tokens in USD
    pub input_per_m: f64,
}

impl EngineConfig {
    /// Load configuration from the default path (~/.contextforge/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `CONTEXTFORGE_MODEL`
    /// - `CONTEXTFORGE_LEDGER_BACKEND`
    /// - `CONTEXTFORGE_LEDGER_PATH`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(model) = std::env::var("CONTEXTFORGE_MODEL") {
            config.default_model = model;
        }
        if let Ok(backend) = std::env::var("CONTEXTFORGE_LEDGER_BACKEND") {
            config.ledger.backend = backend;
        }
        if let Ok(path) = std::env::var("CONTEXTFORGE_LEDGER_PATH") {
            config.ledger.path = Some(PathBuf::from(path));
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".contextforge")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_budget_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "default_budget_tokens must be > 0".into(),
            ));
        }

        if !LEDGER_BACKENDS.contains(&self.ledger.backend.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "ledger.backend must be one of {LEDGER_BACKENDS:?}, got '{}'",
                self.ledger.backend
            )));
        }

        for (model, scheme) in &self.tokens {
            if scheme.chars == 0 || scheme.tokens == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "tokens.{model}: chars and tokens must both be > 0"
                )));
            }
        }

        for (model, price) in &self.pricing {
            if !price.input_per_m.is_finite() || price.input_per_m < 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "pricing.{model}: input_per_m must be a non-negative number"
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            default_budget_tokens: default_budget_tokens(),
            default_freshness_sla_ms: None,
            cache: CacheConfig::default(),
            gateway: GatewayConfig::default(),
            ledger: LedgerConfig::default(),
            tokens: BTreeMap::new(),
            pricing: BTreeMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
