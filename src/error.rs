// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Error types shared by the control loop and its hardware collaborators.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that stop the control loop.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The step table or another configured value is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The temperature source failed more often than the retry budget allows.
    #[error("temperature sensor unavailable: {0}")]
    SensorUnavailable(#[from] SensorError),

    /// A PWM write did not succeed.
    #[error("PWM actuator failure: {0}")]
    ActuatorFailure(#[from] ActuatorError),
}

/// A single failed temperature read.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` exited with {status}")]
    ExitStatus {
        command: String,
        status: std::process::ExitStatus,
    },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not parse a temperature from {0:?}")]
    Parse(String),

    #[error("sensor read timed out after {0:?}")]
    Timeout(Duration),
}

/// A failed PWM command.
#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("failed to write {}: {source}", path.display())]
    Sysfs {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[cfg(feature = "rpi")]
    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    #[error("duty cycle {0} is outside 0-100%")]
    OutOfRange(f64),
}
