// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Processor temperature sources.
//!
//! On Raspberry Pi OS the firmware probe `vcgencmd measure_temp` is the
//! reference reading; any Linux board also exposes a thermal zone in
//! sysfs reporting millidegrees Celsius.

use crate::config::SensorConfig;
use crate::error::SensorError;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;

/// Anything that can report the processor temperature in degrees Celsius.
pub trait TemperatureSource {
    fn read_celsius(&mut self) -> impl Future<Output = Result<f64, SensorError>> + Send;
}

/// Read `source`, giving up after `timeout`.
pub async fn read_with_timeout<S: TemperatureSource>(
    source: &mut S,
    timeout: Duration,
) -> Result<f64, SensorError> {
    match tokio::time::timeout(timeout, source.read_celsius()).await {
        Ok(result) => result,
        Err(_) => Err(SensorError::Timeout(timeout)),
    }
}

// ---------------------------------------------------------------------------
// vcgencmd
// ---------------------------------------------------------------------------

/// Runs `<command> measure_temp` for every reading.
#[derive(Debug, Clone)]
pub struct VcgencmdSensor {
    command: String,
}

impl VcgencmdSensor {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl TemperatureSource for VcgencmdSensor {
    async fn read_celsius(&mut self) -> Result<f64, SensorError> {
        let output = Command::new(&self.command)
            .arg("measure_temp")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| SensorError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SensorError::ExitStatus {
                command: self.command.clone(),
                status: output.status,
            });
        }

        parse_measure_temp(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse `vcgencmd measure_temp` output such as `temp=47.2'C`.
pub fn parse_measure_temp(text: &str) -> Result<f64, SensorError> {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("temp=")
        .and_then(|rest| rest.strip_suffix("'C"))
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|celsius| celsius.is_finite())
        .ok_or_else(|| SensorError::Parse(trimmed.to_string()))
}

// ---------------------------------------------------------------------------
// Thermal zone
// ---------------------------------------------------------------------------

/// Reads a sysfs thermal zone, e.g. `/sys/class/thermal/thermal_zone0/temp`.
#[derive(Debug, Clone)]
pub struct ThermalZoneSensor {
    path: PathBuf,
}

impl ThermalZoneSensor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TemperatureSource for ThermalZoneSensor {
    async fn read_celsius(&mut self) -> Result<f64, SensorError> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SensorError::Read {
                path: self.path.clone(),
                source,
            })?;
        let trimmed = contents.trim();
        let millic = trimmed
            .parse::<i64>()
            .map_err(|_| SensorError::Parse(trimmed.to_string()))?;
        Ok(millic as f64 / 1000.0)
    }
}

// ---------------------------------------------------------------------------
// Source selected by configuration
// ---------------------------------------------------------------------------

/// The sensor named in the config file.
#[derive(Debug, Clone)]
pub enum ConfiguredSensor {
    Vcgencmd(VcgencmdSensor),
    ThermalZone(ThermalZoneSensor),
}

impl ConfiguredSensor {
    pub fn from_config(config: &SensorConfig) -> Self {
        match config {
            SensorConfig::Vcgencmd { command } => {
                log::info!("Reading temperature with `{command} measure_temp`");
                Self::Vcgencmd(VcgencmdSensor::new(command.clone()))
            }
            SensorConfig::ThermalZone { path } => {
                log::info!("Reading temperature from {}", path.display());
                Self::ThermalZone(ThermalZoneSensor::new(path.clone()))
            }
        }
    }
}

impl TemperatureSource for ConfiguredSensor {
    async fn read_celsius(&mut self) -> Result<f64, SensorError> {
        match self {
            Self::Vcgencmd(sensor) => sensor.read_celsius().await,
            Self::ThermalZone(sensor) => sensor.read_celsius().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_measure_temp() {
        assert_eq!(parse_measure_temp("temp=47.2'C\n").unwrap(), 47.2);
        assert_eq!(parse_measure_temp("temp=60'C").unwrap(), 60.0);
    }

    #[test]
    fn test_parse_measure_temp_rejects_garbage() {
        assert!(matches!(
            parse_measure_temp("error=1 error_msg=\"Command not registered\""),
            Err(SensorError::Parse(_))
        ));
        assert!(parse_measure_temp("temp=abc'C").is_err());
        assert!(parse_measure_temp("temp=NaN'C").is_err());
        assert!(parse_measure_temp("").is_err());
    }

    #[tokio::test]
    async fn test_thermal_zone_reads_millidegrees() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp");
        std::fs::write(&path, "48312\n").unwrap();

        let mut sensor = ThermalZoneSensor::new(&path);
        assert_eq!(sensor.read_celsius().await.unwrap(), 48.312);
    }

    #[tokio::test]
    async fn test_thermal_zone_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sensor = ThermalZoneSensor::new(dir.path().join("nope"));
        assert!(matches!(
            sensor.read_celsius().await,
            Err(SensorError::Read { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_command_fails_to_spawn() {
        let mut sensor = VcgencmdSensor::new("/nonexistent/vcgencmd");
        assert!(matches!(
            sensor.read_celsius().await,
            Err(SensorError::Spawn { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_times_out() {
        struct Hung;
        impl TemperatureSource for Hung {
            async fn read_celsius(&mut self) -> Result<f64, SensorError> {
                std::future::pending().await
            }
        }

        let result = read_with_timeout(&mut Hung, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(SensorError::Timeout(_))));
    }
}
