//! Bootstrap configuration and root folder resolution
//!
//! Settings sources, highest priority first:
//! 1. Command-line arguments (each also readable from an `MLS_*` env var)
//! 2. TOML configuration file
//! 3. Built-in defaults (code constants)
//!
//! Command-line parsing lives in each service binary; this module owns the
//! TOML shape, its defaults and validation.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable naming the output root folder
pub const ROOT_FOLDER_ENV: &str = "MLS_ROOT_FOLDER";

/// Maximum AE title length permitted by DICOM
pub const MAX_AE_TITLE_LEN: usize = 16;

/// Bootstrap configuration loaded from TOML file
///
/// Read once at startup; the service must restart to pick up changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Output root for study artifacts
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub inference: InferenceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Intake listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Application entity title announced to peers
    #[serde(default = "default_ae_title")]
    pub ae_title: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ae_title: default_ae_title(),
        }
    }
}

/// Coalescing scheduler timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Quiet period before a study fires, in seconds
    #[serde(default = "default_delay_secs")]
    pub delay_secs: f64,

    /// Time between sweeps of the pending table, in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            delay_secs: default_delay_secs(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs_f64(self.delay_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }
}

/// Optional study record persistence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub enabled: bool,

    /// SQLite file; relative paths resolve against the root folder
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    /// Database file location, defaulting to `mlserver.db` under `root`
    pub fn resolve_path(&self, root: &Path) -> PathBuf {
        match &self.path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => root.join(path),
            None => root.join("mlserver.db"),
        }
    }
}

/// Inference backend selection
///
/// Without an endpoint the service uses its built-in pseudo model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_inference_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_inference_timeout_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    11112
}

fn default_ae_title() -> String {
    "MLSERVER".to_string()
}

fn default_delay_secs() -> f64 {
    10.0
}

fn default_interval_secs() -> f64 {
    1.0
}

fn default_inference_timeout_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TomlConfig {
    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<()> {
        let scheduler = &self.scheduler;
        if !scheduler.delay_secs.is_finite() || scheduler.delay_secs < 0.0 {
            return Err(Error::Config(format!(
                "scheduler.delay_secs must be a non-negative number, got {}",
                scheduler.delay_secs
            )));
        }
        if !scheduler.interval_secs.is_finite() || scheduler.interval_secs <= 0.0 {
            return Err(Error::Config(format!(
                "scheduler.interval_secs must be positive, got {}",
                scheduler.interval_secs
            )));
        }

        let ae_title = self.server.ae_title.trim();
        if ae_title.is_empty() || ae_title.len() > MAX_AE_TITLE_LEN {
            return Err(Error::Config(format!(
                "server.ae_title must be 1-{} characters, got {:?}",
                MAX_AE_TITLE_LEN, self.server.ae_title
            )));
        }

        Ok(())
    }
}

/// Load and validate a TOML configuration file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML {} failed: {}", path.display(), e)))?;
    config.validate()?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Load the explicit config file, else the platform default if it exists,
/// else built-in defaults
pub fn load_or_default(explicit: Option<&Path>, module_name: &str) -> Result<TomlConfig> {
    if let Some(path) = explicit {
        return load_toml_config(path);
    }

    match default_config_path(module_name) {
        Some(path) if path.exists() => load_toml_config(&path),
        _ => {
            debug!("No config file found for {}, using defaults", module_name);
            Ok(TomlConfig::default())
        }
    }
}

/// Platform config file location, e.g. `~/.config/mlserver/<module>.toml`
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mlserver").join(format!("{}.toml", module_name)))
}

/// Root folder resolution
///
/// Priority: command-line argument, then `MLS_ROOT_FOLDER`, then TOML, then
/// the OS-dependent default.
pub fn resolve_root_folder(cli_arg: Option<&Path>, toml: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml.root_folder {
        return path.clone();
    }

    get_default_root_folder()
}

/// OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("mlserver"))
        .unwrap_or_else(|| PathBuf::from("./mlserver_data"))
}
