// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! PWM outputs that drive the fan.
//!
//! Three drivers are available: software PWM on a BCM GPIO pin (the usual
//! Raspberry Pi wiring, `rpi` feature), the kernel PWM class under
//! `/sys/class/pwm`, and a dry-run output that only logs. The control loop
//! always holds its output through an [`ActuatorGuard`] so the fan is
//! stopped on every exit path.

use crate::config::OutputConfig;
use crate::error::ActuatorError;
use std::fs;
use std::path::{Path, PathBuf};

const PWM_ROOT: &str = "/sys/class/pwm";

/// Anything that can drive a fan with a duty cycle.
pub trait PwmOutput {
    /// Set the duty cycle in percent (0-100). Takes effect before returning.
    fn set_duty_cycle(&mut self, percent: f64) -> Result<(), ActuatorError>;

    /// Stop driving the fan and leave the line low.
    fn stop(&mut self) -> Result<(), ActuatorError>;
}

fn check_duty(percent: f64) -> Result<f64, ActuatorError> {
    if (0.0..=100.0).contains(&percent) {
        Ok(percent)
    } else {
        Err(ActuatorError::OutOfRange(percent))
    }
}

// ---------------------------------------------------------------------------
// Kernel PWM class (sysfs)
// ---------------------------------------------------------------------------

/// A channel of a kernel PWM chip, e.g. `/sys/class/pwm/pwmchip0/pwm0`.
#[derive(Debug)]
pub struct SysfsPwm {
    channel_dir: PathBuf,
    period_ns: u64,
    enabled: bool,
}

impl SysfsPwm {
    /// Open `pwmchip<chip>/pwm<channel>` under `/sys/class/pwm`.
    pub fn open(chip: u32, channel: u32, frequency_hz: f64) -> Result<Self, ActuatorError> {
        Self::open_at(Path::new(PWM_ROOT), chip, channel, frequency_hz)
    }

    /// Open a channel below an arbitrary PWM class root, exporting it first
    /// if the kernel has not done so yet. The output starts disabled at 0%.
    pub fn open_at(
        root: &Path,
        chip: u32,
        channel: u32,
        frequency_hz: f64,
    ) -> Result<Self, ActuatorError> {
        let chip_dir = root.join(format!("pwmchip{chip}"));
        let channel_dir = chip_dir.join(format!("pwm{channel}"));

        if !channel_dir.exists() {
            write_attr(&chip_dir.join("export"), channel)?;
        }

        let period_ns = (1_000_000_000.0 / frequency_hz).round() as u64;
        let mut pwm = Self {
            channel_dir,
            period_ns,
            enabled: false,
        };

        // The duty cycle may never exceed the period, so clear it first.
        pwm.write("duty_cycle", 0)?;
        pwm.write("period", period_ns)?;
        pwm.write("enable", 0)?;
        Ok(pwm)
    }

    pub fn period_ns(&self) -> u64 {
        self.period_ns
    }

    fn write(&mut self, attr: &str, value: impl std::fmt::Display) -> Result<(), ActuatorError> {
        write_attr(&self.channel_dir.join(attr), value)
    }
}

impl PwmOutput for SysfsPwm {
    fn set_duty_cycle(&mut self, percent: f64) -> Result<(), ActuatorError> {
        let percent = check_duty(percent)?;
        let duty_ns = (self.period_ns as f64 * percent / 100.0).round() as u64;
        self.write("duty_cycle", duty_ns)?;
        if !self.enabled {
            self.write("enable", 1)?;
            self.enabled = true;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ActuatorError> {
        self.write("duty_cycle", 0)?;
        self.write("enable", 0)?;
        self.enabled = false;
        Ok(())
    }
}

fn write_attr(path: &Path, value: impl std::fmt::Display) -> Result<(), ActuatorError> {
    fs::write(path, format!("{value}")).map_err(|source| ActuatorError::Sysfs {
        path: path.to_path_buf(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Software PWM on a GPIO pin
// ---------------------------------------------------------------------------

/// Software PWM on a BCM-numbered GPIO pin, driving the fan transistor.
#[cfg(feature = "rpi")]
#[derive(Debug)]
pub struct GpioSoftPwm {
    pin: rppal::gpio::OutputPin,
    frequency_hz: f64,
}

#[cfg(feature = "rpi")]
impl GpioSoftPwm {
    /// Claim `pin` as a low output.
    pub fn open(pin: u8, frequency_hz: f64) -> Result<Self, ActuatorError> {
        let pin = rppal::gpio::Gpio::new()?.get(pin)?.into_output_low();
        Ok(Self { pin, frequency_hz })
    }
}

#[cfg(feature = "rpi")]
impl PwmOutput for GpioSoftPwm {
    fn set_duty_cycle(&mut self, percent: f64) -> Result<(), ActuatorError> {
        let percent = check_duty(percent)?;
        self.pin
            .set_pwm_frequency(self.frequency_hz, percent / 100.0)?;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ActuatorError> {
        self.pin.clear_pwm()?;
        self.pin.set_low();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dry run
// ---------------------------------------------------------------------------

/// Logs every command instead of touching hardware.
#[derive(Debug, Default)]
pub struct DryRunOutput {
    duty: Option<f64>,
}

impl DryRunOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last duty cycle set, `None` once stopped.
    pub fn duty(&self) -> Option<f64> {
        self.duty
    }
}

impl PwmOutput for DryRunOutput {
    fn set_duty_cycle(&mut self, percent: f64) -> Result<(), ActuatorError> {
        let percent = check_duty(percent)?;
        log::info!("[dry-run] duty cycle {percent}%");
        self.duty = Some(percent);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ActuatorError> {
        log::info!("[dry-run] output stopped");
        self.duty = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Driver selected by configuration
// ---------------------------------------------------------------------------

/// The output named in the config file.
#[derive(Debug)]
pub enum ConfiguredOutput {
    #[cfg(feature = "rpi")]
    Gpio(GpioSoftPwm),
    Sysfs(SysfsPwm),
    DryRun(DryRunOutput),
}

impl ConfiguredOutput {
    pub fn open(config: &OutputConfig, frequency_hz: f64) -> Result<Self, ActuatorError> {
        let output = match config {
            #[cfg(feature = "rpi")]
            OutputConfig::Gpio { pin } => {
                log::info!("Driving fan with software PWM on BCM pin {pin} at {frequency_hz} Hz");
                Self::Gpio(GpioSoftPwm::open(*pin, frequency_hz)?)
            }
            #[cfg(not(feature = "rpi"))]
            OutputConfig::Gpio { pin } => {
                log::warn!("GPIO support not compiled in, BCM pin {pin} falls back to dry run");
                Self::DryRun(DryRunOutput::new())
            }
            OutputConfig::Sysfs { chip, channel } => {
                log::info!("Driving fan with pwmchip{chip}/pwm{channel} at {frequency_hz} Hz");
                Self::Sysfs(SysfsPwm::open(*chip, *channel, frequency_hz)?)
            }
            OutputConfig::DryRun => Self::DryRun(DryRunOutput::new()),
        };
        Ok(output)
    }
}

impl PwmOutput for ConfiguredOutput {
    fn set_duty_cycle(&mut self, percent: f64) -> Result<(), ActuatorError> {
        match self {
            #[cfg(feature = "rpi")]
            Self::Gpio(out) => out.set_duty_cycle(percent),
            Self::Sysfs(out) => out.set_duty_cycle(percent),
            Self::DryRun(out) => out.set_duty_cycle(percent),
        }
    }

    fn stop(&mut self) -> Result<(), ActuatorError> {
        match self {
            #[cfg(feature = "rpi")]
            Self::Gpio(out) => out.stop(),
            Self::Sysfs(out) => out.stop(),
            Self::DryRun(out) => out.stop(),
        }
    }
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

/// Exclusive owner of a PWM output that stops the fan when dropped.
///
/// Call [`ActuatorGuard::release`] to stop it explicitly and observe the
/// result; otherwise the drop does it and only logs a failure.
#[derive(Debug)]
pub struct ActuatorGuard<O: PwmOutput> {
    output: O,
    released: bool,
}

impl<O: PwmOutput> ActuatorGuard<O> {
    pub fn new(output: O) -> Self {
        Self {
            output,
            released: false,
        }
    }

    /// Stop the fan. Later calls are no-ops.
    pub fn release(&mut self) -> Result<(), ActuatorError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.output.stop()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl<O: PwmOutput> std::ops::Deref for ActuatorGuard<O> {
    type Target = O;

    fn deref(&self) -> &O {
        &self.output
    }
}

impl<O: PwmOutput> std::ops::DerefMut for ActuatorGuard<O> {
    fn deref_mut(&mut self) -> &mut O {
        &mut self.output
    }
}

impl<O: PwmOutput> Drop for ActuatorGuard<O> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("Failed to stop PWM output: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(path: &Path) -> String {
        fs::read_to_string(path).unwrap()
    }

    fn fake_chip() -> (tempfile::TempDir, PathBuf) {
        let root = tempfile::tempdir().unwrap();
        let channel_dir = root.path().join("pwmchip0").join("pwm1");
        fs::create_dir_all(&channel_dir).unwrap();
        (root, channel_dir)
    }

    #[test]
    fn test_sysfs_open_sets_period() {
        let (root, channel_dir) = fake_chip();
        let pwm = SysfsPwm::open_at(root.path(), 0, 1, 250.0).unwrap();
        assert_eq!(pwm.period_ns(), 4_000_000);
        assert_eq!(read(&channel_dir.join("period")), "4000000");
        assert_eq!(read(&channel_dir.join("duty_cycle")), "0");
        assert_eq!(read(&channel_dir.join("enable")), "0");
    }

    #[test]
    fn test_sysfs_exports_missing_channel() {
        let root = tempfile::tempdir().unwrap();
        let chip_dir = root.path().join("pwmchip0");
        fs::create_dir_all(&chip_dir).unwrap();

        // No real kernel here, so the channel directory never appears and
        // the first attribute write fails after the export.
        let result = SysfsPwm::open_at(root.path(), 0, 3, 250.0);
        assert_eq!(read(&chip_dir.join("export")), "3");
        assert!(matches!(result, Err(ActuatorError::Sysfs { .. })));
    }

    #[test]
    fn test_sysfs_duty_and_stop() {
        let (root, channel_dir) = fake_chip();
        let mut pwm = SysfsPwm::open_at(root.path(), 0, 1, 250.0).unwrap();

        pwm.set_duty_cycle(25.0).unwrap();
        assert_eq!(read(&channel_dir.join("duty_cycle")), "1000000");
        assert_eq!(read(&channel_dir.join("enable")), "1");

        pwm.stop().unwrap();
        assert_eq!(read(&channel_dir.join("duty_cycle")), "0");
        assert_eq!(read(&channel_dir.join("enable")), "0");
    }

    #[test]
    fn test_duty_out_of_range_rejected() {
        let mut out = DryRunOutput::new();
        assert!(matches!(
            out.set_duty_cycle(120.0),
            Err(ActuatorError::OutOfRange(_))
        ));
        assert_eq!(out.duty(), None);
    }

    #[test]
    fn test_guard_stops_on_drop() {
        let (root, channel_dir) = fake_chip();
        {
            let mut guard = ActuatorGuard::new(SysfsPwm::open_at(root.path(), 0, 1, 250.0).unwrap());
            guard.set_duty_cycle(100.0).unwrap();
            assert_eq!(read(&channel_dir.join("enable")), "1");
        }
        assert_eq!(read(&channel_dir.join("enable")), "0");
    }

    #[test]
    fn test_guard_release_is_idempotent() {
        let mut guard = ActuatorGuard::new(DryRunOutput::new());
        guard.set_duty_cycle(40.0).unwrap();
        guard.release().unwrap();
        assert!(guard.is_released());
        assert_eq!(guard.duty(), None);
        guard.release().unwrap();
    }
}
