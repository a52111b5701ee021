// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Bench test: sweep the fan through a fixed duty ramp, ignoring temperature.
//!
//! Useful for checking the PWM wiring before trusting the control loop.

use crate::error::ActuatorError;
use crate::pwm::{ActuatorGuard, PwmOutput};
use std::time::Duration;
use tokio::sync::Notify;

/// Pause between ramp steps.
pub const SWEEP_STEP_INTERVAL: Duration = Duration::from_secs(3);

/// Pause at 0% before the ramp starts.
pub const SWEEP_SETTLE_TIME: Duration = Duration::from_secs(1);

const SWEEP_START_COUNTER: i64 = 9997;

/// Endless descending ramp in 5% steps: 5, 0, 100, 95, ..., 0, 100, ...
#[derive(Debug, Clone)]
pub struct SweepRamp {
    counter: i64,
}

impl SweepRamp {
    pub fn new() -> Self {
        Self {
            counter: SWEEP_START_COUNTER,
        }
    }
}

impl Default for SweepRamp {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for SweepRamp {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        let duty = self.counter.rem_euclid(21) * 5;
        self.counter -= 1;
        Some(duty as f64)
    }
}

/// Drive `output` through [`SweepRamp`] until `shutdown` is notified, then
/// stop the fan.
pub async fn run_sweep<O: PwmOutput>(
    output: O,
    step_interval: Duration,
    shutdown: &Notify,
) -> Result<(), ActuatorError> {
    log::info!("Testing fan output, sweeping duty cycle every {step_interval:?}");
    let mut output = ActuatorGuard::new(output);

    let result = sweep(&mut *output, step_interval, shutdown).await;
    let released = output.release();
    result?;
    released
}

async fn sweep<O: PwmOutput>(
    output: &mut O,
    step_interval: Duration,
    shutdown: &Notify,
) -> Result<(), ActuatorError> {
    output.set_duty_cycle(0.0)?;
    if !pause(SWEEP_SETTLE_TIME, shutdown).await {
        return Ok(());
    }

    for duty in SweepRamp::new() {
        output.set_duty_cycle(duty)?;
        log::info!("Changed duty cycle to {duty}%");
        if !pause(step_interval, shutdown).await {
            return Ok(());
        }
    }
    Ok(())
}

/// Sleep for `duration`; `false` if shutdown was requested instead.
async fn pause(duration: Duration, shutdown: &Notify) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown.notified() => {
            log::info!("Fan test interrupted");
            false
        }
    }
}
