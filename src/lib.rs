// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Temperature-driven PWM fan control for Raspberry Pi class boards.
//!
//! The daemon polls the processor temperature, smooths it, maps it onto a
//! duty cycle through a step table and drives the fan with hysteresis and a
//! low-speed kick.

pub mod config;
pub mod control_loop;
pub mod controller;
pub mod curve;
pub mod error;
pub mod filter;
pub mod pwm;
pub mod sensor;
pub mod sweep;
