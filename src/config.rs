// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Configuration file handling.
//!
//! Fan, sensor and curve settings are read once from TOML at startup and
//! stay fixed for the life of the process.
//! Default path: `/etc/rpi-fanctl/config.toml`

use crate::control_loop::ControlSettings;
use crate::controller::DutyPolicy;
use crate::curve::{self, StepTable};
use crate::error::ControlError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/rpi-fanctl/config.toml";

/// Default poll interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: f64 = 3.0;

/// Default thermal zone read by the `thermal_zone` sensor.
pub const DEFAULT_THERMAL_ZONE_PATH: &str = "/sys/class/thermal/thermal_zone0/temp";

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Loop timing and sensor failure handling.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Where temperatures come from.
    #[serde(default)]
    pub sensor: SensorConfig,

    /// PWM output and duty-cycle policy.
    #[serde(default)]
    pub fan: FanConfig,

    /// Temperature smoothing.
    #[serde(default)]
    pub filter: FilterConfig,

    /// Temperature-to-duty step table.
    #[serde(default)]
    pub curve: CurveConfig,
}

/// Daemon-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    /// Time between temperature polls, in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: f64,

    /// Upper bound on a single sensor read, in seconds.
    #[serde(default = "default_sensor_timeout")]
    pub sensor_timeout_secs: f64,

    /// Consecutive failed reads tolerated before giving up.
    #[serde(default = "default_sensor_retry_limit")]
    pub sensor_retry_limit: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            sensor_timeout_secs: default_sensor_timeout(),
            sensor_retry_limit: default_sensor_retry_limit(),
        }
    }
}

/// Temperature source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "source")]
pub enum SensorConfig {
    /// Firmware probe via `vcgencmd measure_temp`.
    #[serde(rename = "vcgencmd")]
    Vcgencmd {
        #[serde(default = "default_vcgencmd")]
        command: String,
    },

    /// Kernel thermal zone reporting millidegrees Celsius.
    #[serde(rename = "thermal_zone")]
    ThermalZone {
        #[serde(default = "default_thermal_zone")]
        path: PathBuf,
    },
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self::Vcgencmd {
            command: default_vcgencmd(),
        }
    }
}

/// PWM line the fan hangs off.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "driver")]
pub enum OutputConfig {
    /// Software PWM on a BCM-numbered GPIO pin.
    #[serde(rename = "gpio")]
    Gpio { pin: u8 },

    /// Kernel PWM channel `/sys/class/pwm/pwmchip<chip>/pwm<channel>`.
    #[serde(rename = "sysfs")]
    Sysfs { chip: u32, channel: u32 },

    /// Log commands only.
    #[serde(rename = "dry_run")]
    DryRun,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::Gpio { pin: 24 }
    }
}

/// Fan output and duty-cycle policy. All duties are percentages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FanConfig {
    /// PWM carrier frequency. Change this if the fan behaves strangely.
    pub pwm_frequency_hz: f64,
    /// Duty applied before the first poll.
    pub startup_duty: f64,
    /// The duty only changes when the target moves by more than this.
    pub hysteresis: f64,
    /// Targets below this stop the fan.
    pub min_duty: f64,
    /// Targets above `min_duty` and below this are kicked at 100% first.
    pub kick_ceiling: f64,
    pub kick_duration_secs: f64,
    pub output: OutputConfig,
}

impl Default for FanConfig {
    fn default() -> Self {
        Self {
            pwm_frequency_hz: 275.0,
            startup_duty: 50.0,
            hysteresis: 1.0,
            min_duty: 15.0,
            kick_ceiling: 25.0,
            kick_duration_secs: 0.1,
            output: OutputConfig::default(),
        }
    }
}

/// Temperature smoothing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterConfig {
    /// Weight of the newest raw sample, in (0, 1]. Higher reacts faster.
    #[serde(default = "default_filter_ratio")]
    pub ratio: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            ratio: default_filter_ratio(),
        }
    }
}

/// Step table as two parallel sequences.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CurveConfig {
    /// Thresholds in degrees Celsius, strictly increasing.
    pub temperatures: Vec<f64>,
    /// Duty cycle at each threshold.
    pub duties: Vec<f64>,
}

impl Default for CurveConfig {
    fn default() -> Self {
        Self {
            temperatures: curve::DEFAULT_TEMPERATURES.to_vec(),
            duties: curve::DEFAULT_DUTIES.to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Check every value the control loop depends on.
    pub fn validate(&self) -> Result<(), ControlError> {
        StepTable::new(&self.curve.temperatures, &self.curve.duties)?;
        for &duty in &self.curve.duties {
            ensure_percent("curve duty", duty)?;
        }

        let ratio = self.filter.ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(invalid(format!("filter ratio must be in (0, 1], got {ratio}")));
        }

        let fan = &self.fan;
        if !(fan.pwm_frequency_hz > 0.0 && fan.pwm_frequency_hz.is_finite()) {
            return Err(invalid(format!(
                "PWM frequency must be positive, got {}",
                fan.pwm_frequency_hz
            )));
        }
        ensure_percent("startup duty", fan.startup_duty)?;
        ensure_percent("minimum duty", fan.min_duty)?;
        ensure_percent("kick ceiling", fan.kick_ceiling)?;
        if !(fan.hysteresis >= 0.0) {
            return Err(invalid(format!(
                "hysteresis must not be negative, got {}",
                fan.hysteresis
            )));
        }
        if fan.min_duty > fan.kick_ceiling {
            return Err(invalid(format!(
                "minimum duty {} is above the kick ceiling {}",
                fan.min_duty, fan.kick_ceiling
            )));
        }

        to_duration("kick duration", fan.kick_duration_secs, true)?;
        to_duration("poll interval", self.daemon.poll_interval_secs, false)?;
        to_duration("sensor timeout", self.daemon.sensor_timeout_secs, false)?;
        Ok(())
    }

    /// Validate and convert into the settings the control loop runs with.
    pub fn control_settings(&self) -> Result<ControlSettings, ControlError> {
        self.validate()?;
        Ok(ControlSettings {
            temperatures: self.curve.temperatures.clone(),
            duties: self.curve.duties.clone(),
            filter_ratio: self.filter.ratio,
            policy: DutyPolicy {
                hysteresis: self.fan.hysteresis,
                min_duty: self.fan.min_duty,
                kick_ceiling: self.fan.kick_ceiling,
                kick_duration: to_duration("kick duration", self.fan.kick_duration_secs, true)?,
            },
            startup_duty: self.fan.startup_duty,
            poll_interval: to_duration("poll interval", self.daemon.poll_interval_secs, false)?,
            sensor_timeout: to_duration(
                "sensor timeout",
                self.daemon.sensor_timeout_secs,
                false,
            )?,
            sensor_retry_limit: self.daemon.sensor_retry_limit,
        })
    }
}

fn invalid(message: String) -> ControlError {
    ControlError::InvalidConfiguration(message)
}

fn ensure_percent(name: &str, value: f64) -> Result<(), ControlError> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be within 0-100%, got {value}")))
    }
}

fn to_duration(name: &str, secs: f64, allow_zero: bool) -> Result<Duration, ControlError> {
    let duration = Duration::try_from_secs_f64(secs)
        .map_err(|_| invalid(format!("{name} must be a non-negative number of seconds, got {secs}")))?;
    if duration.is_zero() && !allow_zero {
        return Err(invalid(format!("{name} must be greater than zero")));
    }
    Ok(duration)
}

// ---------------------------------------------------------------------------
// Load / Save
// ---------------------------------------------------------------------------

/// Load config from a TOML file, or return the default if the file doesn't exist.
pub fn load_config(path: &Path) -> io::Result<Config> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::info!("No config file at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        Err(e) => return Err(e),
    };
    let config: Config = toml::from_str(&contents).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to parse config: {e}"),
        )
    })?;

    log::info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Save config to a TOML file, creating parent directories if needed.
pub fn save_config(path: &Path, config: &Config) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to serialize config: {e}"),
        )
    })?;

    fs::write(path, contents)?;
    log::info!("Saved config to {}", path.display());
    Ok(())
}

/// Resolve the config file path from CLI arg or default.
pub fn resolve_config_path(cli_path: Option<&str>) -> PathBuf {
    cli_path
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn default_poll_interval() -> f64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_sensor_timeout() -> f64 {
    2.0
}

fn default_sensor_retry_limit() -> u32 {
    3
}

fn default_vcgencmd() -> String {
    "vcgencmd".to_string()
}

fn default_thermal_zone() -> PathBuf {
    PathBuf::from(DEFAULT_THERMAL_ZONE_PATH)
}

fn default_filter_ratio() -> f64 {
    0.7
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn test_unreadable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::create_dir(&path).unwrap();
        assert!(load_config(&path).is_err());

        let blocked = dir.path().join("not-a-dir");
        fs::write(&blocked, "").unwrap();
        assert!(load_config(&blocked.join("config.toml")).is_err());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[sensor]
source = "thermal_zone"

[fan]
min_duty = 20
kick_ceiling = 30

[fan.output]
driver = "sysfs"
chip = 0
channel = 1

[curve]
temperatures = [30, 40, 50, 60]
duties = [25, 35, 85, 100]
"#,
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(
            cfg.sensor,
            SensorConfig::ThermalZone {
                path: PathBuf::from(DEFAULT_THERMAL_ZONE_PATH)
            }
        );
        assert_eq!(cfg.fan.output, OutputConfig::Sysfs { chip: 0, channel: 1 });
        assert_eq!(cfg.fan.min_duty, 20.0);
        assert_eq!(cfg.fan.hysteresis, 1.0);
        assert_eq!(cfg.filter.ratio, 0.7);
        assert_eq!(cfg.curve.duties, vec![25.0, 35.0, 85.0, 100.0]);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[curve]\ntemperatures = \"hot\"\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.fan.output = OutputConfig::DryRun;
        save_config(&path, &cfg).unwrap();
        assert_eq!(load_config(&path).unwrap(), cfg);
    }

    #[test]
    fn test_mismatched_curve_rejected() {
        let mut cfg = Config::default();
        cfg.curve.duties.pop();
        assert!(matches!(
            cfg.validate(),
            Err(ControlError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_bad_ratio_rejected() {
        let mut cfg = Config::default();
        cfg.filter.ratio = 0.0;
        assert!(cfg.validate().is_err());
        cfg.filter.ratio = 1.5;
        assert!(cfg.validate().is_err());
        cfg.filter.ratio = 1.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_bad_timing_rejected() {
        let mut cfg = Config::default();
        cfg.daemon.poll_interval_secs = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.fan.kick_duration_secs = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_min_duty_above_kick_ceiling_rejected() {
        let mut cfg = Config::default();
        cfg.fan.min_duty = 30.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_control_settings_conversion() {
        let settings = Config::default().control_settings().unwrap();
        assert_eq!(settings.poll_interval, Duration::from_secs(3));
        assert_eq!(settings.policy.kick_duration, Duration::from_millis(100));
        assert_eq!(settings.sensor_retry_limit, 3);
        assert_eq!(settings.startup_duty, 50.0);
    }

    #[test]
    fn test_resolve_config_path() {
        assert_eq!(
            resolve_config_path(None),
            PathBuf::from(DEFAULT_CONFIG_PATH)
        );
        assert_eq!(
            resolve_config_path(Some("/tmp/fan.toml")),
            PathBuf::from("/tmp/fan.toml")
        );
    }
}
