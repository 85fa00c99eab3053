//! Configuration system for the task graph runtime
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. Values set programmatically by the embedder
//! 2. Environment variables (TASKGRAPH_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Main runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Scheduling policy and failure handling
    pub scheduler: SchedulerSettings,

    /// Data transfer limits
    pub transfers: TransferSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Which scoring policy drives placement decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Oldest action first, idle resources first
    Fifo,
    /// Newest action first
    Lifo,
    /// Resources already holding the inputs first
    Locality,
    /// Locality with a penalty for busy resources
    LoadBalancing,
    /// Largest computing-unit requirement first
    ConstraintsFifo,
}

impl PolicyKind {
    /// Get all policy kinds
    pub fn all() -> &'static [PolicyKind] {
        &[
            PolicyKind::Fifo,
            PolicyKind::Lifo,
            PolicyKind::Locality,
            PolicyKind::LoadBalancing,
            PolicyKind::ConstraintsFifo,
        ]
    }

    /// Config name of the policy
    pub fn name(&self) -> &'static str {
        match self {
            PolicyKind::Fifo => "fifo",
            PolicyKind::Lifo => "lifo",
            PolicyKind::Locality => "locality",
            PolicyKind::LoadBalancing => "load_balancing",
            PolicyKind::ConstraintsFifo => "constraints_fifo",
        }
    }
}

impl Default for PolicyKind {
    fn default() -> Self {
        PolicyKind::Fifo
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for PolicyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        PolicyKind::all()
            .iter()
            .copied()
            .find(|p| p.name() == normalized)
            .ok_or_else(|| {
                Error::config_field_invalid("scheduler.policy", format!("unknown policy '{}'", s))
            })
    }
}

/// Scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Scoring policy
    pub policy: PolicyKind,

    /// Attempts after the first failure for actions with the retry policy
    pub max_retries: u32,

    /// Host running the application (locality tie-break)
    pub app_host: String,

    /// Final states of retired actions kept for queries (0 = keep none)
    pub history_limit: usize,
}

/// Data transfer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Maximum physical copies in flight (0 = number of CPUs)
    pub max_concurrent_copies: usize,

    /// Copy timeout in milliseconds (0 = no timeout)
    pub copy_timeout_ms: u64,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Maximum log file size in MB before rotation
    pub max_file_size_mb: u64,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,

    /// Level overrides per runtime component (`scheduler`, `comm`, ...)
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, String>,
}

// Default implementations

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            policy: PolicyKind::Fifo,
            max_retries: 2,
            app_host: local_hostname(),
            history_limit: 10_000,
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            max_concurrent_copies: 0, // Auto-detect
            copy_timeout_ms: 0,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
            components: BTreeMap::new(),
        }
    }
}

impl TransferSettings {
    /// Effective copy concurrency, resolving 0 to the CPU count
    pub fn effective_concurrency(&self) -> usize {
        if self.max_concurrent_copies == 0 {
            num_cpus::get().max(1)
        } else {
            self.max_concurrent_copies
        }
    }

    /// Copy timeout, if any
    pub fn copy_timeout(&self) -> Option<std::time::Duration> {
        if self.copy_timeout_ms == 0 {
            None
        } else {
            Some(std::time::Duration::from_millis(self.copy_timeout_ms))
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        let config_file = Self::find_config_file(config_path)?;
        if let Some(path) = config_file {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path).map_err(|e| Error::ConfigNotFound {
                path: path.clone(),
                source: Some(e),
            })?;
            config = Self::from_toml(&content)?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides()?;

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML document without touching the environment
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse {
            message: e.to_string(),
            source: Some(e),
        })
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // If explicit path provided, use it (error if not found)
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::config_not_found(path));
        }

        let search_paths = [
            PathBuf::from("taskgraph.toml"),
            dirs::config_dir()
                .map(|p| p.join("taskgraph").join("runtime.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".taskgraph").join("runtime.toml"))
                .unwrap_or_default(),
        ];

        for path in &search_paths {
            if !path.as_os_str().is_empty() && path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        // Scheduler settings
        if let Ok(val) = std::env::var("TASKGRAPH_POLICY") {
            self.scheduler.policy = val.parse()?;
        }
        if let Ok(val) = std::env::var("TASKGRAPH_MAX_RETRIES") {
            if let Ok(n) = val.parse() {
                self.scheduler.max_retries = n;
            }
        }
        if let Ok(val) = std::env::var("TASKGRAPH_APP_HOST") {
            self.scheduler.app_host = val;
        }
        if let Ok(val) = std::env::var("TASKGRAPH_HISTORY_LIMIT") {
            if let Ok(n) = val.parse() {
                self.scheduler.history_limit = n;
            }
        }

        // Transfer settings
        if let Ok(val) = std::env::var("TASKGRAPH_MAX_CONCURRENT_COPIES") {
            if let Ok(n) = val.parse() {
                self.transfers.max_concurrent_copies = n;
            }
        }
        if let Ok(val) = std::env::var("TASKGRAPH_COPY_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.transfers.copy_timeout_ms = n;
            }
        }

        // Logging settings
        if let Ok(val) = std::env::var("TASKGRAPH_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("TASKGRAPH_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("TASKGRAPH_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }

        Ok(())
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.app_host.trim().is_empty() {
            return Err(Error::config_field_invalid(
                "scheduler.app_host",
                "app_host cannot be empty",
            ));
        }

        // Durations are tracked as i64 milliseconds in profiles
        if self.transfers.copy_timeout_ms > i64::MAX as u64 {
            return Err(Error::config_field_invalid(
                "transfers.copy_timeout_ms",
                "copy_timeout_ms is out of range",
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let check_level = |field: String, level: &str| {
            if valid_levels.contains(&level.to_lowercase().as_str()) {
                Ok(())
            } else {
                Err(Error::config_field_invalid(
                    field,
                    format!(
                        "Invalid log level '{}'. Must be one of: {}",
                        level,
                        valid_levels.join(", ")
                    ),
                ))
            }
        };
        check_level("logging.level".to_string(), &self.logging.level)?;
        for (component, level) in &self.logging.components {
            let field = format!("logging.components.{}", component);
            if !crate::logging::COMPONENTS.contains(&component.as_str()) {
                return Err(Error::config_field_invalid(
                    field,
                    format!(
                        "Unknown component '{}'. Must be one of: {}",
                        component,
                        crate::logging::COMPONENTS.join(", ")
                    ),
                ));
            }
            check_level(field, level)?;
        }

        Ok(())
    }
}

/// Hostname of this machine, or "localhost" if it cannot be read
fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Write a commented default configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".taskgraph")
                .join("runtime.toml")
        });

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    info!(path = %config_path.display(), "Configuration file created");
    Ok(config_path)
}

/// Generate default configuration content with comments
pub fn generate_default_config() -> String {
    r#"# Task graph runtime configuration

[scheduler]
# Scoring policy: fifo, lifo, locality, load_balancing, constraints_fifo
policy = "fifo"

# Extra attempts for tasks whose on-failure policy is retry
max_retries = 2

# Host running the application (defaults to this machine's hostname)
# app_host = "login-node"

# Retired actions whose final state stays queryable
history_limit = 10000

[transfers]
# Maximum physical copies in flight (0 = number of CPUs)
max_concurrent_copies = 0

# Copy timeout in milliseconds (0 = no timeout)
copy_timeout_ms = 0

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.taskgraph/logs/runtime.log"

# Maximum log file size in MB before rotation
max_file_size_mb = 100

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false

# Per-component levels: action, comm, data, resource, scheduler
# [logging.components]
# comm = "trace"
"#
    .to_string()
}
