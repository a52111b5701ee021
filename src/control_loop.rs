// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! The polling loop tying sensor, filter, curve and controller together.
//!
//! ```text
//!   Initializing ──▶ Polling ──▶ Sleeping ──▶ Polling ...
//!                                   │
//!                                   └── shutdown ──▶ ShuttingDown
//! ```
//!
//! Each cycle reads the sensor, smooths the reading, looks up the target
//! duty and lets the [`DutyCycleController`] decide what to send to the
//! fan. The loop owns the PWM output through an [`ActuatorGuard`] and
//! stops the fan on every way out of [`ControlLoop::run`].

use crate::controller::{Action, DutyCycleController, DutyPolicy};
use crate::curve::StepTable;
use crate::error::ControlError;
use crate::filter::TemperatureFilter;
use crate::pwm::{ActuatorGuard, PwmOutput};
use crate::sensor::{self, TemperatureSource};
use std::time::Duration;
use tokio::sync::Notify;

/// Validated numbers the loop runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlSettings {
    /// Step table thresholds in degrees Celsius.
    pub temperatures: Vec<f64>,
    /// Duty cycle at each threshold.
    pub duties: Vec<f64>,
    pub filter_ratio: f64,
    pub policy: DutyPolicy,
    pub startup_duty: f64,
    pub poll_interval: Duration,
    pub sensor_timeout: Duration,
    /// Consecutive failed reads bridged with the last filtered value.
    pub sensor_retry_limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Initializing,
    Polling,
    Sleeping,
    ShuttingDown,
}

/// Outcome of one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Raw reading, `None` if the sensor failed and the last filtered
    /// value was reused.
    pub raw: Option<f64>,
    pub filtered: f64,
    pub target: f64,
    pub action: Action,
}

pub struct ControlLoop<S, O: PwmOutput> {
    sensor: S,
    output: ActuatorGuard<O>,
    table: StepTable,
    filter: TemperatureFilter,
    controller: DutyCycleController,
    poll_interval: Duration,
    sensor_timeout: Duration,
    sensor_retry_limit: u32,
    consecutive_failures: u32,
    state: LoopState,
}

impl<S: TemperatureSource, O: PwmOutput> ControlLoop<S, O> {
    /// Validate the step table, seed the filter from a first reading and
    /// start the fan at the startup duty.
    ///
    /// Nothing is sent to `output` unless the table is valid and the seed
    /// reading succeeded.
    pub async fn initialize(
        settings: ControlSettings,
        mut sensor: S,
        output: O,
    ) -> Result<Self, ControlError> {
        log::debug!("Control loop state: {:?}", LoopState::Initializing);

        let table = StepTable::new(&settings.temperatures, &settings.duties)?;
        let seed = sensor::read_with_timeout(&mut sensor, settings.sensor_timeout).await?;
        log::info!("Initial temperature {seed:.1}°C");

        let mut output = ActuatorGuard::new(output);
        output.set_duty_cycle(settings.startup_duty)?;
        log::info!("Fan started at {}%", settings.startup_duty);

        let state = LoopState::Polling;
        log::debug!("Control loop state: {state:?}");

        Ok(Self {
            sensor,
            output,
            table,
            filter: TemperatureFilter::new(settings.filter_ratio, seed),
            controller: DutyCycleController::new(settings.policy, settings.startup_duty),
            poll_interval: settings.poll_interval,
            sensor_timeout: settings.sensor_timeout,
            sensor_retry_limit: settings.sensor_retry_limit,
            consecutive_failures: 0,
            state,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Duty cycle last sent to the fan.
    pub fn current_duty(&self) -> f64 {
        self.controller.current_duty()
    }

    pub fn filtered_temperature(&self) -> f64 {
        self.filter.previous()
    }

    /// Run one read, filter, decide, apply cycle.
    pub async fn poll_once(&mut self) -> Result<CycleReport, ControlError> {
        let raw = self.read_raw().await?;
        let filtered = match raw {
            Some(raw) => self.filter.update(raw),
            None => self.filter.previous(),
        };
        let target = self.table.target_duty(filtered);

        log::debug!(
            "raw {} filtered {filtered:.2}°C target {target}% current {}%",
            raw.map_or_else(|| "n/a".to_string(), |t| format!("{t:.1}°C")),
            self.controller.current_duty()
        );

        let action = self.controller.apply(target, &mut *self.output).await?;
        Ok(CycleReport {
            raw,
            filtered,
            target,
            action,
        })
    }

    /// Poll until `shutdown` is notified or a cycle fails, then stop the fan.
    ///
    /// A notification that arrives while a cycle is in progress is picked up
    /// at the next sleep.
    pub async fn run(&mut self, shutdown: &Notify) -> Result<(), ControlError> {
        let result = self.drive(shutdown).await;
        if let Err(e) = &result {
            log::error!("Control loop failed: {e}");
        }

        self.transition(LoopState::ShuttingDown);
        let released = self.output.release();
        match &released {
            Ok(()) => log::info!("Fan output released"),
            Err(e) => log::error!("Failed to release fan output: {e}"),
        }

        result?;
        released?;
        Ok(())
    }

    async fn drive(&mut self, shutdown: &Notify) -> Result<(), ControlError> {
        loop {
            match self.state {
                LoopState::Polling => {
                    self.poll_once().await?;
                    self.transition(LoopState::Sleeping);
                }
                LoopState::Sleeping => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {
                            self.transition(LoopState::Polling);
                        }
                        _ = shutdown.notified() => {
                            log::info!("Shutdown requested");
                            return Ok(());
                        }
                    }
                }
                LoopState::Initializing | LoopState::ShuttingDown => return Ok(()),
            }
        }
    }

    /// Read the sensor. Up to `sensor_retry_limit` consecutive failures come
    /// back as `None` and the caller keeps the last filtered temperature.
    async fn read_raw(&mut self) -> Result<Option<f64>, ControlError> {
        match sensor::read_with_timeout(&mut self.sensor, self.sensor_timeout).await {
            Ok(raw) => {
                if self.consecutive_failures > 0 {
                    log::info!(
                        "Temperature sensor recovered after {} failed read(s)",
                        self.consecutive_failures
                    );
                }
                self.consecutive_failures = 0;
                Ok(Some(raw))
            }
            Err(e) if self.consecutive_failures < self.sensor_retry_limit => {
                self.consecutive_failures += 1;
                log::warn!(
                    "Temperature read failed ({}/{}): {e}, keeping {:.1}°C",
                    self.consecutive_failures,
                    self.sensor_retry_limit,
                    self.filter.previous()
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn transition(&mut self, next: LoopState) {
        if self.state != next {
            log::debug!("Control loop state: {:?} -> {next:?}", self.state);
            self.state = next;
        }
    }
}
