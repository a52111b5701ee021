// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Duty-cycle change decisions.
//!
//! Small target changes are suppressed by a hysteresis band so the fan does
//! not hunt audibly. Targets below the fan's reliable minimum stop it
//! outright, and low non-zero targets are preceded by a short full-power
//! kick so a stalled motor actually starts turning.

use crate::error::ActuatorError;
use crate::pwm::PwmOutput;
use std::time::Duration;

/// Duty cycle used for the kick pulse.
pub const KICK_DUTY: f64 = 100.0;

/// Tuning for the change decision.
#[derive(Debug, Clone, PartialEq)]
pub struct DutyPolicy {
    /// Changes of this many percent or less are ignored.
    pub hysteresis: f64,
    /// Targets below this stop the fan.
    pub min_duty: f64,
    /// Targets strictly between `min_duty` and this get a kick first.
    pub kick_ceiling: f64,
    /// How long the kick pulse lasts.
    pub kick_duration: Duration,
}

/// What to do with the actuator this cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    NoChange,
    ApplyDirect(f64),
    ApplyWithKick {
        kick_duty: f64,
        kick_duration: Duration,
        final_duty: f64,
    },
}

impl Action {
    /// The duty the fan settles at after this action, if it changes anything.
    pub fn final_duty(&self) -> Option<f64> {
        match self {
            Action::NoChange => None,
            Action::ApplyDirect(duty) => Some(*duty),
            Action::ApplyWithKick { final_duty, .. } => Some(*final_duty),
        }
    }
}

/// Decide how to move from `old_duty` towards `target`.
pub fn decide(old_duty: f64, target: f64, policy: &DutyPolicy) -> Action {
    if (target - old_duty).abs() <= policy.hysteresis {
        return Action::NoChange;
    }

    let effective = if target < policy.min_duty { 0.0 } else { target };

    if effective > policy.min_duty && effective < policy.kick_ceiling {
        Action::ApplyWithKick {
            kick_duty: KICK_DUTY,
            kick_duration: policy.kick_duration,
            final_duty: effective,
        }
    } else {
        Action::ApplyDirect(effective)
    }
}

/// Tracks the duty cycle last sent to the fan and issues new commands.
#[derive(Debug)]
pub struct DutyCycleController {
    policy: DutyPolicy,
    current_duty: f64,
}

impl DutyCycleController {
    pub fn new(policy: DutyPolicy, startup_duty: f64) -> Self {
        Self {
            policy,
            current_duty: startup_duty,
        }
    }

    /// Duty cycle currently applied to the fan.
    pub fn current_duty(&self) -> f64 {
        self.current_duty
    }

    /// Decide on `target` and drive `output` accordingly.
    ///
    /// The stored duty only changes once every command of the action went
    /// through.
    pub async fn apply<O: PwmOutput>(
        &mut self,
        target: f64,
        output: &mut O,
    ) -> Result<Action, ActuatorError> {
        let action = decide(self.current_duty, target, &self.policy);

        match &action {
            Action::NoChange => return Ok(action),
            Action::ApplyDirect(duty) => {
                if target < self.policy.min_duty {
                    log::info!("Requested duty cycle too low, dropped from {target}% to 0%");
                }
                output.set_duty_cycle(*duty)?;
            }
            Action::ApplyWithKick {
                kick_duty,
                kick_duration,
                final_duty,
            } => {
                output.set_duty_cycle(*kick_duty)?;
                tokio::time::sleep(*kick_duration).await;
                log::info!("Duty cycle boosted to {kick_duty}% for {kick_duration:?}");
                output.set_duty_cycle(*final_duty)?;
            }
        }

        if let Some(duty) = action.final_duty() {
            log::info!("Changed duty cycle from {}% to {duty}%", self.current_duty);
            self.current_duty = duty;
        }
        Ok(action)
    }
}
