//! Configuration loading traits and types.
//!
//! Every tandem application reads its runtime configuration from TOML.
//! Application structs embed [`SharedConfig`] and load through the blanket
//! [`ConfigLoader`] implementation; types that carry semantic rules also
//! implement [`Validate`] and use [`ConfigLoader::load_validated`].
//!
//! ```rust,no_run
//! use tandem_common::config::{ConfigError, ConfigLoader, SharedConfig, Validate};
//! use serde::Deserialize;
//! use std::path::Path;
//!
//! #[derive(Debug, Deserialize)]
//! struct RobotConfig {
//!     shared: SharedConfig,
//!     wheel_base_m: f64,
//! }
//!
//! impl Validate for RobotConfig {
//!     fn validate(&self) -> Result<(), ConfigError> {
//!         self.shared.validate()
//!     }
//! }
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = RobotConfig::load_validated(Path::new("robot.toml"))?;
//!     println!("{} wheel base {}", config.shared.service_name, config.wheel_base_m);
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    /// File could not be read.
    #[error("Failed to read configuration: {0}")]
    ReadError(String),

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, per-cycle tracing.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// Lifecycle information.
    #[default]
    Info,
    /// Overruns, mismatches and recoverable faults.
    Warn,
    /// Serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields shared across all tandem applications.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "rover-main"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub log_json: bool,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Semantic validation hook for configuration types.
pub trait Validate {
    /// Check invariants that the TOML schema cannot express.
    fn validate(&self) -> Result<(), ConfigError>;
}

/// Loading configuration from TOML text or files.
///
/// Blanket-implemented for every `DeserializeOwned` type.
///
/// # Contract
///
/// - `ConfigError::FileNotFound` if the file does not exist
/// - `ConfigError::ParseError` if TOML syntax or schema is invalid
/// - `ConfigError::ValidationError` if [`Validate`] rejects the result
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Parse configuration from TOML text.
    fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.display().to_string())
            } else {
                ConfigError::ReadError(format!("{}: {e}", path.display()))
            }
        })?;
        Self::from_toml_str(&content)
    }

    /// Load and validate configuration from a TOML file.
    fn load_validated(path: &Path) -> Result<Self, ConfigError>
    where
        Self: Validate,
    {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
