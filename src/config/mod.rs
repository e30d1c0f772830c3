//! Configuration for vidpipe-rs
//!
//! A pipeline config file holds everything needed to build and run an
//! engine:
//! - engine tuning (queue capacities, statistics window, stop grace period)
//! - logging (filter directive, optional rolling log file)
//! - the modules, as tagged [`ModuleSpec`] entries
//! - the declarative graph (producer -> list of edge tokens)
//!
//! The format is chosen by file extension: `.toml` or `.json`.
//!
//! # App Data Location
//!
//! Log files default to the platform data directory:
//! - **Linux**: `~/.local/share/vidpipe-rs/logs/`
//! - **macOS**: `~/Library/Application Support/vidpipe-rs/logs/`
//! - **Windows**: `%APPDATA%\vidpipe-rs\logs\`
//!
//! # Example
//!
//! ```ignore
//! use vidpipe_rs::{config::AppConfig, Engine};
//!
//! let config = AppConfig::load("pipeline.toml")?;
//! let mut engine = Engine::from_config(&config)?;
//! engine.start()?;
//! ```

mod modules;

pub use modules::ModuleSpec;

use crate::error::{Result, VidPipeError};
use crate::pipeline::description::GraphDescription;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for data directories
pub const APP_ID: &str = "vidpipe-rs";

/// Default capacity of connections created from the declarative graph
pub const DEFAULT_QUEUE_CAPACITY: usize = crate::pipeline::graph::DEFAULT_QUEUE_CAPACITY;

/// Default tap queue depth
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize =
    crate::pipeline::subscription::DEFAULT_SUBSCRIPTION_CAPACITY;

/// Default trailing window for fps statistics
pub const DEFAULT_STATS_WINDOW_MS: u64 = 1000;

/// Default time a worker gets to exit after a stop request
pub const DEFAULT_STOP_GRACE_PERIOD_MS: u64 = 2000;

pub const DEFAULT_LOG_FILTER: &str = "info,vidpipe_rs=debug";

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Default directory for rolling log files
pub fn default_log_dir() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join("logs"))
}

// ==================== Engine ====================

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of connections added without an explicit capacity
    pub default_queue_capacity: usize,

    /// Capacity of subscription taps unless given per call
    pub subscription_capacity: usize,

    /// Trailing window for fps statistics, in milliseconds
    pub stats_window_ms: u64,

    /// How long `stop` waits for each worker before abandoning it
    pub stop_grace_period_ms: u64,

    /// Stop every module when any module faults
    pub halt_on_fault: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            subscription_capacity: DEFAULT_SUBSCRIPTION_CAPACITY,
            stats_window_ms: DEFAULT_STATS_WINDOW_MS,
            stop_grace_period_ms: DEFAULT_STOP_GRACE_PERIOD_MS,
            halt_on_fault: false,
        }
    }
}

impl EngineConfig {
    pub fn stats_window(&self) -> Duration {
        Duration::from_millis(self.stats_window_ms)
    }

    pub fn stop_grace_period(&self) -> Duration {
        Duration::from_millis(self.stop_grace_period_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_queue_capacity == 0 {
            return Err(VidPipeError::Config(
                "engine.default_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.subscription_capacity == 0 {
            return Err(VidPipeError::Config(
                "engine.subscription_capacity must be at least 1".to_string(),
            ));
        }
        if self.stats_window_ms == 0 {
            return Err(VidPipeError::Config(
                "engine.stats_window_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ==================== Logging ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set
    pub filter: String,

    /// Also write a daily rolling log file
    pub log_to_file: bool,

    /// Log file directory (defaults to the platform data dir)
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            log_to_file: false,
            directory: None,
        }
    }
}

impl LoggingConfig {
    /// Directory for log files, if one can be determined.
    pub fn log_directory(&self) -> Option<PathBuf> {
        self.directory.clone().or_else(default_log_dir)
    }
}

// ==================== App Config ====================

/// Serialization format of a config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Ok(ConfigFormat::Toml),
            Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(ConfigFormat::Json),
            _ => Err(VidPipeError::Config(format!(
                "Unsupported config file extension: {:?} (expected .toml or .json)",
                path
            ))),
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub modules: Vec<ModuleSpec>,

    /// Producer -> `consumer[:inputPort[:outputPort]]` tokens
    #[serde(default)]
    pub graph: BTreeMap<String, Vec<String>>,
}

impl AppConfig {
    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| {
            VidPipeError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config = Self::parse(&content, format).map_err(|e| {
            e.with_context(format!("Failed to load config file {:?}", path))
        })?;
        tracing::info!(
            "Loaded {} modules and {} graph entries from {:?}",
            config.modules.len(),
            config.graph.len(),
            path
        );
        Ok(config)
    }

    /// Parse and validate config text.
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        let config: Self = match format {
            ConfigFormat::Toml => toml::from_str(content)
                .map_err(|e| VidPipeError::Serialization(e.to_string()))?,
            ConfigFormat::Json => serde_json::from_str(content)
                .map_err(|e| VidPipeError::Serialization(e.to_string()))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Save in the format selected by the file extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| VidPipeError::Serialization(e.to_string()))?,
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| VidPipeError::Serialization(e.to_string()))?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content).map_err(|e| {
            VidPipeError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Check engine settings, module name uniqueness and graph tokens.
    ///
    /// Module parameters are checked when the modules are built.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;

        let mut names = HashSet::new();
        for spec in &self.modules {
            if !names.insert(spec.name()) {
                return Err(VidPipeError::Config(format!(
                    "Duplicate module name {:?}",
                    spec.name()
                )));
            }
        }

        let description = GraphDescription::parse_map(&self.graph)?;
        for (producer, edge) in description.iter() {
            for name in [producer, edge.consumer.as_str()] {
                if !names.contains(name) {
                    return Err(VidPipeError::Config(format!(
                        "Graph references unknown module {:?}",
                        name
                    )));
                }
            }
        }
        Ok(())
    }
}
