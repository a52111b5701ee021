// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Exponential smoothing of raw temperature readings.

/// Blend a new raw reading into the previous filtered value.
///
/// `ratio` is the weight of the newest sample, `0 < ratio <= 1`. A ratio of
/// 1 disables filtering entirely.
pub fn filtered(previous: f64, raw: f64, ratio: f64) -> f64 {
    (1.0 - ratio) * previous + ratio * raw
}

/// Owns the filter state between poll cycles.
#[derive(Debug, Clone)]
pub struct TemperatureFilter {
    ratio: f64,
    previous: f64,
}

impl TemperatureFilter {
    /// Seed the filter with the first live reading.
    pub fn new(ratio: f64, seed: f64) -> Self {
        Self {
            ratio,
            previous: seed,
        }
    }

    /// Feed a raw reading and return the new filtered temperature, which is
    /// also kept as the previous value for the next call.
    pub fn update(&mut self, raw: f64) -> f64 {
        self.previous = filtered(self.previous, raw, self.ratio);
        self.previous
    }

    /// Last filtered temperature.
    pub fn previous(&self) -> f64 {
        self.previous
    }
}
