//! Runtime configuration: control units, cycle monitor, logging.
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! log_level = "info"
//! service_name = "rover"
//!
//! [monitor]
//! window_s = 5.0
//! tolerance = 0.10
//!
//! [[units]]
//! name = "plc"
//! cycle_time_ms = 10
//! lock_policy = "write_preferring"
//!
//! [[units]]
//! name = "controller"
//! cycle_time_ms = 100
//! start_delay_ms = 50
//! ```

use crate::cycle::{CyclerOptions, MonitorSettings};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tandem_common::config::{ConfigError, SharedConfig, Validate};
use tandem_common::consts::{CYCLE_TOLERANCE, DEFAULT_CYCLE_TIME, MONITOR_WINDOW};
use tandem_image::LockPolicy;

/// Complete runtime configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Logging and identity.
    pub shared: SharedConfig,

    /// Cycle monitor settings applied to every unit.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Control units, one cycler each.
    #[serde(default)]
    pub units: Vec<UnitConfig>,
}

/// `[monitor]` section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Reporting window in seconds.
    #[serde(default = "default_window_s")]
    pub window_s: f64,
    /// Relative tolerance of the effective cycle time.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

fn default_window_s() -> f64 {
    MONITOR_WINDOW.as_secs_f64()
}

fn default_tolerance() -> f64 {
    CYCLE_TOLERANCE
}

fn default_cycle_time_ms() -> u64 {
    DEFAULT_CYCLE_TIME.as_millis() as u64
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_s: default_window_s(),
            tolerance: default_tolerance(),
        }
    }
}

impl MonitorConfig {
    /// Monitor settings for cyclers.
    pub fn settings(&self) -> MonitorSettings {
        MonitorSettings {
            window: Duration::from_secs_f64(self.window_s.max(0.0)),
            tolerance: self.tolerance,
        }
    }
}

/// `[[units]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitConfig {
    /// Unit name; also the sender name of its image collection.
    pub name: String,
    /// Nominal cycle time in milliseconds.
    #[serde(default = "default_cycle_time_ms")]
    pub cycle_time_ms: u64,
    /// Delay before the first cycle in milliseconds.
    #[serde(default)]
    pub start_delay_ms: u64,
    /// Do not join the worker on drop.
    #[serde(default)]
    pub daemon: bool,
    /// Lock policy of the unit's image collection.
    #[serde(default)]
    pub lock_policy: LockPolicy,
}

impl UnitConfig {
    /// Nominal cycle time.
    pub fn cycle_time(&self) -> Duration {
        Duration::from_millis(self.cycle_time_ms)
    }

    /// Cycler options for this unit.
    pub fn cycler_options(&self, monitor: &MonitorConfig) -> CyclerOptions {
        CyclerOptions {
            start_delay: Duration::from_millis(self.start_delay_ms),
            daemon: self.daemon,
            monitor: monitor.settings(),
        }
    }
}

impl RuntimeConfig {
    /// Unit by name.
    pub fn unit(&self, name: &str) -> Option<&UnitConfig> {
        self.units.iter().find(|u| u.name == name)
    }
}

impl Validate for RuntimeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        let m = &self.monitor;
        if !m.window_s.is_finite() || m.window_s <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "monitor.window_s must be > 0, got {}",
                m.window_s
            )));
        }
        if !(m.tolerance > 0.0 && m.tolerance <= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "monitor.tolerance must be in (0, 1], got {}",
                m.tolerance
            )));
        }

        let mut seen = HashSet::new();
        for unit in &self.units {
            if unit.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "unit name cannot be empty".to_string(),
                ));
            }
            if !seen.insert(unit.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate unit '{}'",
                    unit.name
                )));
            }
            if unit.cycle_time_ms == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "unit '{}': cycle_time_ms must be > 0",
                    unit.name
                )));
            }
        }
        Ok(())
    }
}
