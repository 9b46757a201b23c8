//! Configuration management for pvsurplus
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files. Every section carries `#[serde(default)]` so
//! a partial file only needs the values that differ from the defaults.

use crate::controls::{ControllerParams, OperatingMode};
use crate::error::{PvSurplusError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

mod defaults;

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "PVSURPLUS_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// PV inverter (producer) connection
    pub pv: PvConfig,

    /// Grid meter (SML reader) connection
    pub grid: GridConfig,

    /// Wallbox power measurement
    pub wallbox: WallboxConfig,

    /// Wallbox control API
    pub charger: ChargerConfig,

    /// Surplus controller thresholds and limits
    pub controls: ControlsConfig,

    /// Loop cadences and device timeout
    pub timing: TimingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Web server binding configuration
    pub web: WebConfig,

    /// Mode the process starts in
    pub initial_mode: OperatingMode,
}

/// Modbus TCP endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusConfig {
    /// IP address or host name of the device
    pub ip: String,

    /// TCP port
    pub port: u16,

    /// Modbus unit (slave) id
    pub unit_id: u8,
}

/// PV inverter configuration (Kostal, Modbus TCP)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PvConfig {
    pub modbus: ModbusConfig,

    /// First of two holding registers carrying total AC power as float32
    pub total_power_register: u16,
}

/// Grid meter configuration (Tasmota SML reader, HTTP)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// IP address or host name of the reader
    pub ip: String,

    /// Meter key inside `StatusSNS` (depends on the Tasmota script)
    pub meter_key: String,

    /// Field carrying current power in W
    pub power_field: String,
}

/// Which transport delivers the wallbox charging power
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WallboxSourceKind {
    /// go-e Modbus TCP input registers
    Modbus,
    /// go-e HTTP API v2 `nrg` array
    Http,
}

/// Wallbox power measurement configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WallboxConfig {
    pub source: WallboxSourceKind,

    pub modbus: ModbusConfig,

    /// First of two input registers carrying total power in 0.01 W
    pub power_register: u16,

    /// Readings above this are treated as register garbage and read as 0 W
    pub max_plausible_watts: f64,
}

/// go-e HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargerConfig {
    /// IP address or host name of the go-e charger
    pub ip: String,
}

/// Surplus controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    /// Nominal phase voltage
    pub voltage: f64,

    /// Smallest current the wallbox accepts while charging
    pub min_current_amps: f64,

    /// Largest current the installation allows
    pub max_current_amps: f64,

    /// Current resolution of the wallbox; setpoints are rounded down to it
    pub current_step_amps: f64,

    /// Start threshold override. Defaults to the 1-phase minimum power plus
    /// `start_stop_margin_watts`.
    pub start_threshold_watts: Option<f64>,

    /// Charging stops once surplus falls below start threshold minus this
    pub start_stop_margin_watts: f64,

    /// Buffer around the 3-phase minimum power for phase switching
    pub phase_switch_margin_watts: f64,

    /// Surplus needed to start directly on 3 phases. Defaults to the
    /// 1 -> 3 switch threshold.
    pub initial_three_phase_watts: Option<f64>,

    /// Subtracted from the computed surplus before deciding
    pub safety_margin_watts: f64,
}

/// Loop timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Fast tick: device sampling interval
    pub sample_interval_ms: u64,

    /// Slow tick: controller evaluation interval
    pub evaluation_interval_secs: u64,

    /// Rolling window span
    pub window_secs: u64,

    /// Upper bound for any single device call
    pub device_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console-specific level
    pub console_level: Option<String>,

    /// Optional file-specific level
    pub file_level: Option<String>,

    /// Path to log file (its directory receives the daily rolled files)
    pub file: String,

    /// Number of rolled files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Bind address
    pub host: String,

    /// TCP port
    pub port: u16,
}

impl TimingConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_millis(self.device_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the first location that exists
    pub fn load() -> Result<Self> {
        if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV)
            && !explicit.is_empty()
        {
            return Self::from_file(explicit);
        }

        let default_paths = ["pvsurplus_config.yaml", "/etc/pvsurplus/config.yaml"];
        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Controller parameters derived from the `controls` section
    pub fn controller_params(&self) -> ControllerParams {
        ControllerParams::from(&self.controls)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_endpoint("pv.modbus", &self.pv.modbus)?;
        if self.wallbox.source == WallboxSourceKind::Modbus {
            validate_endpoint("wallbox.modbus", &self.wallbox.modbus)?;
        }
        if self.grid.ip.is_empty() {
            return Err(PvSurplusError::validation(
                "grid.ip",
                "IP address cannot be empty",
            ));
        }
        if self.grid.meter_key.is_empty() {
            return Err(PvSurplusError::validation(
                "grid.meter_key",
                "Meter key cannot be empty",
            ));
        }
        if self.charger.ip.is_empty() {
            return Err(PvSurplusError::validation(
                "charger.ip",
                "IP address cannot be empty",
            ));
        }
        if !(self.wallbox.max_plausible_watts > 0.0) {
            return Err(PvSurplusError::validation(
                "wallbox.max_plausible_watts",
                "Must be positive",
            ));
        }

        if self.timing.sample_interval_ms == 0 {
            return Err(PvSurplusError::validation(
                "timing.sample_interval_ms",
                "Must be greater than 0",
            ));
        }
        if self.timing.evaluation_interval_secs == 0 {
            return Err(PvSurplusError::validation(
                "timing.evaluation_interval_secs",
                "Must be greater than 0",
            ));
        }
        if self.timing.window_secs == 0 {
            return Err(PvSurplusError::validation(
                "timing.window_secs",
                "Must be greater than 0",
            ));
        }
        if self.timing.device_timeout_ms == 0 {
            return Err(PvSurplusError::validation(
                "timing.device_timeout_ms",
                "Must be greater than 0",
            ));
        }
        if self.timing.evaluation_interval() <= self.timing.sample_interval() {
            return Err(PvSurplusError::validation(
                "timing.evaluation_interval_secs",
                "Must be longer than the sample interval",
            ));
        }

        if self.web.port == 0 {
            return Err(PvSurplusError::validation(
                "web.port",
                "Port must be greater than 0",
            ));
        }

        self.controller_params().validate()
    }
}

fn validate_endpoint(section: &str, modbus: &ModbusConfig) -> Result<()> {
    if modbus.ip.is_empty() {
        return Err(PvSurplusError::validation(
            format!("{section}.ip"),
            "IP address cannot be empty".to_string(),
        ));
    }
    if modbus.port == 0 {
        return Err(PvSurplusError::validation(
            format!("{section}.port"),
            "Port must be greater than 0".to_string(),
        ));
    }
    Ok(())
}
