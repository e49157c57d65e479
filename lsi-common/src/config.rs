//! Bootstrap configuration loading
//!
//! Configuration file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `LSI_CONFIG` environment variable
//! 3. Platform config directory (`~/.config/lsi/lsi-scoring.toml` on Linux)
//! 4. Compiled defaults (fallback)
//!
//! A missing config file is not an error: the compiled defaults are used and a
//! warning is logged.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "LSI_CONFIG";

/// Environment variable overriding `scoring.audit_secret`
pub const AUDIT_SECRET_ENV_VAR: &str = "LSI_AUDIT_SECRET";

const CONFIG_FILE_NAME: &str = "lsi-scoring.toml";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Scoring engine settings (optional)
    #[serde(default)]
    pub scoring: ScoringSettings,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Scoring engine settings
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringSettings {
    /// Secret mixed into the audit digest of every finalized snapshot
    #[serde(default)]
    pub audit_secret: Option<String>,

    /// Maximum number of cached percentile lookups
    #[serde(default = "default_norm_cache_capacity")]
    pub norm_cache_capacity: usize,

    /// Norm version token tried before the default version
    #[serde(default)]
    pub norm_version: Option<String>,

    /// Version token every norm group falls back to
    #[serde(default = "default_norm_version")]
    pub default_norm_version: String,

    /// Optional external norm provider
    #[serde(default)]
    pub external: Option<ExternalProviderSettings>,
}

/// External norm provider endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalProviderSettings {
    pub base_url: String,

    #[serde(default = "default_external_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_external_max_attempts")]
    pub max_attempts: u32,
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("lsi").join("lsi.db"))
        .unwrap_or_else(|| PathBuf::from("./lsi_data/lsi.db"))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_norm_cache_capacity() -> usize {
    4096
}

fn default_norm_version() -> String {
    "default".to_string()
}

fn default_external_timeout_ms() -> u64 {
    2000
}

fn default_external_max_attempts() -> u32 {
    2
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            audit_secret: None,
            norm_cache_capacity: default_norm_cache_capacity(),
            norm_version: None,
            default_norm_version: default_norm_version(),
            external: None,
        }
    }
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            logging: LoggingConfig::default(),
            scoring: ScoringSettings::default(),
        }
    }
}

impl ScoringSettings {
    /// Audit secret with the environment override applied
    ///
    /// An empty string is treated as "not configured".
    pub fn resolved_audit_secret(&self) -> Option<String> {
        std::env::var(AUDIT_SECRET_ENV_VAR)
            .ok()
            .or_else(|| self.audit_secret.clone())
            .filter(|s| !s.trim().is_empty())
    }
}

impl TomlConfig {
    /// Parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse config from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config following the resolution priority, falling back to defaults
    pub fn load(cli_arg: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_arg) {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)
            }
            None => {
                warn!("No configuration file found, using compiled defaults");
                Ok(Self::default())
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.scoring.norm_cache_capacity == 0 {
            return Err(Error::Config(
                "scoring.norm_cache_capacity must be greater than zero".to_string(),
            ));
        }
        if self.scoring.default_norm_version.trim().is_empty() {
            return Err(Error::Config(
                "scoring.default_norm_version must not be empty".to_string(),
            ));
        }
        if let Some(external) = &self.scoring.external {
            if external.max_attempts == 0 || external.max_attempts > 2 {
                return Err(Error::Config(format!(
                    "scoring.external.max_attempts must be 1 or 2 (got {})",
                    external.max_attempts
                )));
            }
            if external.timeout_ms == 0 {
                return Err(Error::Config(
                    "scoring.external.timeout_ms must be greater than zero".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Resolve the config file path
///
/// An explicit CLI or environment path is returned even if it does not exist,
/// so that a typo surfaces as an IO error instead of silently using defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    dirs::config_dir()
        .map(|d| d.join("lsi").join(CONFIG_FILE_NAME))
        .filter(|p| p.exists())
}
