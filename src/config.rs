//! # Heater Configuration
//!
//! Configuration is read from a TOML file and then overlaid with the
//! `PI_HEATER_*` environment variables. Every section is optional.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [devices]
//! temperature = "/dev/thermocouple"
//! status = "/sys/class/gpio/gpio17/value"
//!
//! [control]
//! window_ms = 1000
//! safety_margin_ms = 15
//! start_target = 150.0
//!
//! [pid]
//! p = 40.0
//! i = 0.5
//! d = 2.0
//! ```
//!
//! ## Example: Rust Usage
//!
//! ```rust
//! use pi_heater::config::Config;
//! let toml_str = r#"
//! [control]
//! window_ms = 2000
//!
//! [pid]
//! p = 12.5
//! "#;
//! let config: Config = toml::from_str(toml_str).unwrap();
//! assert_eq!(config.control.window_ms, 2000);
//! assert_eq!(config.control.safety_margin_ms, 15);
//! assert_eq!(config.pid.p, 12.5);
//! assert!(config.validate().is_ok());
//! ```

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid environment variable {var}={value:?}")]
    Env { var: &'static str, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the heater devices, control loop, PID gains and servers.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub devices: DeviceConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub pid: PidConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub hub: HubConfig,
}

/// Device files for the thermocouple and the heater switch.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    #[serde(default = "default_temperature_device")]
    pub temperature: PathBuf,
    #[serde(default = "default_status_device")]
    pub status: PathBuf,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature_device(),
            status: default_status_device(),
        }
    }
}

/// Control window timing and fault detection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlConfig {
    /// Window length; also the upper output limit of the PID controller.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_safety_margin_ms")]
    pub safety_margin_ms: u64,
    #[serde(default)]
    pub start_target: f64,
    /// Largest tolerated change between consecutive samples.
    #[serde(default = "default_fault_threshold")]
    pub fault_threshold: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            safety_margin_ms: default_safety_margin_ms(),
            start_target: 0.0,
            fault_threshold: default_fault_threshold(),
        }
    }
}

impl ControlConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Largest fire time a single window may request.
    pub fn max_fire_ms(&self) -> u64 {
        self.window_ms.saturating_sub(self.safety_margin_ms)
    }
}

/// PID gains.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PidConfig {
    #[serde(default = "default_p")]
    pub p: f64,
    #[serde(default)]
    pub i: f64,
    #[serde(default)]
    pub d: f64,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self { p: default_p(), i: 0.0, d: 0.0 }
    }
}

/// Linear transform applied to the raw thermocouple reading.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CalibrationConfig {
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default = "default_offset")]
    pub offset: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            scale: default_scale(),
            offset: default_offset(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HubConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

// Default value functions
fn default_temperature_device() -> PathBuf { PathBuf::from("/dev/thermocouple") }
fn default_status_device() -> PathBuf { PathBuf::from("/sys/class/gpio/gpio17/value") }
fn default_window_ms() -> u64 { 1000 }
fn default_safety_margin_ms() -> u64 { 15 }
fn default_fault_threshold() -> f64 { 100.0 }
fn default_p() -> f64 { 1.0 }
fn default_scale() -> f64 { 0.45 }
fn default_offset() -> f64 { 32.0 }
fn default_bind() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_queue_capacity() -> usize { 256 }

impl Config {
    /// Overlay `PI_HEATER_*` variables on top of the loaded values.
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in vars {
            let value = value.into();
            match key.as_ref() {
                "PI_HEATER_TEMP_DEV_FILE" => self.devices.temperature = PathBuf::from(value),
                "PI_HEATER_STATUS_DEV_FILE" => self.devices.status = PathBuf::from(value),
                "PI_HEATER_START_TEMP" => {
                    self.control.start_target = parse_env("PI_HEATER_START_TEMP", value)?
                }
                "PI_HEATER_PID_P" => self.pid.p = parse_env("PI_HEATER_PID_P", value)?,
                "PI_HEATER_PID_I" => self.pid.i = parse_env("PI_HEATER_PID_I", value)?,
                "PI_HEATER_PID_D" => self.pid.d = parse_env("PI_HEATER_PID_D", value)?,
                "PI_HEATER_PID_MAX" => {
                    self.control.window_ms = parse_env("PI_HEATER_PID_MAX", value)?
                }
                "PI_HEATER_HTTP_PORT" => {
                    self.server.port = parse_env("PI_HEATER_HTTP_PORT", value)?
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.control.window_ms <= self.control.safety_margin_ms {
            return Err(ConfigError::Invalid(format!(
                "control.window_ms ({}) must exceed control.safety_margin_ms ({})",
                self.control.window_ms, self.control.safety_margin_ms
            )));
        }
        if self.control.fault_threshold.is_nan() || self.control.fault_threshold <= 0.0 {
            return Err(ConfigError::Invalid(
                "control.fault_threshold must be > 0".to_string(),
            ));
        }
        for (name, gain) in [("p", self.pid.p), ("i", self.pid.i), ("d", self.pid.d)] {
            if !gain.is_finite() {
                return Err(ConfigError::Invalid(format!("pid.{} must be finite", name)));
            }
        }
        if self.calibration.scale == 0.0 || !self.calibration.scale.is_finite() {
            return Err(ConfigError::Invalid(
                "calibration.scale must be finite and non-zero".to_string(),
            ));
        }
        if self.hub.queue_capacity == 0 {
            return Err(ConfigError::Invalid("hub.queue_capacity must be > 0".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { var, value })
}

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                Err(ConfigError::Toml(e))
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path.display(), e);
            Err(ConfigError::Io(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.control.window_ms, 1000);
        assert_eq!(config.control.safety_margin_ms, 15);
        assert_eq!(config.control.max_fire_ms(), 985);
        assert_eq!(config.control.fault_threshold, 100.0);
        assert_eq!(config.calibration.scale, 0.45);
        assert_eq!(config.calibration.offset, 32.0);
        assert_eq!(config.hub.queue_capacity, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_success() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("heater.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "[pid]\np = 40.0\ni = 0.25\n\n[server]\nport = 9000").unwrap();
        file.flush().unwrap();
        let config = load_config(&file_path).unwrap();
        assert_eq!(config.pid.p, 40.0);
        assert_eq!(config.pid.i, 0.25);
        assert_eq!(config.server.port, 9000);
        // Defaults for missing fields
        assert_eq!(config.pid.d, 0.0);
        assert_eq!(config.server.bind, "0.0.0.0");
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent_file.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("bad.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "not a valid toml").unwrap();
        file.flush().unwrap();
        let result = load_config(&file_path);
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env([
                ("PI_HEATER_TEMP_DEV_FILE", "/tmp/temp"),
                ("PI_HEATER_PID_P", "3.5"),
                ("PI_HEATER_PID_MAX", "2000"),
                ("PI_HEATER_START_TEMP", " 180.5 "),
                ("UNRELATED", "ignored"),
            ])
            .unwrap();
        assert_eq!(config.devices.temperature, PathBuf::from("/tmp/temp"));
        assert_eq!(config.pid.p, 3.5);
        assert_eq!(config.control.window_ms, 2000);
        assert_eq!(config.control.start_target, 180.5);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = Config::default();
        let err = config.apply_env([("PI_HEATER_PID_I", "lots")]).unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "PI_HEATER_PID_I", .. }));
    }

    #[test]
    fn test_validate_window_must_exceed_margin() {
        let mut config = Config::default();
        config.control.window_ms = 15;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.control.window_ms = 16;
        assert!(config.validate().is_ok());
        config.hub.queue_capacity = 0;
        assert!(config.validate().is_err());
    }
}
