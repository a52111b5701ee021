// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Speed curve definitions and interpolation.
//!
//! A step table maps temperature readings to PWM duty cycles (0-100%).
//! Points are linearly interpolated between defined thresholds and the
//! result is rounded to a whole percent, ties to even.

use crate::error::ControlError;

/// A single point on the speed curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    /// Temperature in degrees Celsius
    pub temp_c: f64,
    /// Duty cycle in percent (0-100)
    pub duty: f64,
}

/// An immutable, validated temperature-to-duty step table.
#[derive(Debug, Clone, PartialEq)]
pub struct StepTable {
    /// Points with strictly increasing temperatures. At least 2.
    points: Vec<CurvePoint>,
}

impl StepTable {
    /// Build a table from parallel temperature and duty sequences.
    ///
    /// Fails with [`ControlError::InvalidConfiguration`] if the sequences
    /// differ in length, hold fewer than 2 entries, or the temperatures are
    /// not strictly increasing.
    pub fn new(temperatures: &[f64], duties: &[f64]) -> Result<Self, ControlError> {
        if temperatures.len() != duties.len() {
            return Err(ControlError::InvalidConfiguration(format!(
                "temperature steps table has a different size than duty steps table ({} vs {})",
                temperatures.len(),
                duties.len()
            )));
        }
        if temperatures.len() < 2 {
            return Err(ControlError::InvalidConfiguration(
                "step table must have at least 2 points".to_string(),
            ));
        }
        for (i, pair) in temperatures.windows(2).enumerate() {
            // Written so that NaN also fails.
            if !(pair[1] > pair[0]) {
                return Err(ControlError::InvalidConfiguration(format!(
                    "step temperatures must be strictly increasing (point {})",
                    i + 1
                )));
            }
        }

        let points = temperatures
            .iter()
            .zip(duties)
            .map(|(&temp_c, &duty)| CurvePoint { temp_c, duty })
            .collect();
        Ok(Self { points })
    }

    /// The validated points, ascending by temperature.
    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    /// Target duty cycle for a filtered temperature.
    ///
    /// - At or below the lowest point: the lowest point's duty
    /// - At or above the highest point: the highest point's duty
    /// - Between two points: linear interpolation, rounded half to even
    pub fn target_duty(&self, temp_c: f64) -> f64 {
        let first = &self.points[0];
        let last = &self.points[self.points.len() - 1];

        if temp_c <= first.temp_c {
            return first.duty;
        }
        if temp_c >= last.temp_c {
            return last.duty;
        }

        for window in self.points.windows(2) {
            let lo = &window[0];
            let hi = &window[1];

            if temp_c >= lo.temp_c && temp_c < hi.temp_c {
                let duty = lo.duty
                    + (hi.duty - lo.duty) * (temp_c - lo.temp_c) / (hi.temp_c - lo.temp_c);
                return duty.round_ties_even();
            }
        }

        // Only reachable for a NaN temperature.
        last.duty
    }
}

/// Temperature thresholds used when no config file is present.
pub const DEFAULT_TEMPERATURES: [f64; 4] = [35.0, 40.0, 50.0, 60.0];

/// Duty cycles matching [`DEFAULT_TEMPERATURES`].
pub const DEFAULT_DUTIES: [f64; 4] = [0.0, 40.0, 85.0, 100.0];

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_table() -> StepTable {
        StepTable::new(&[30.0, 40.0, 50.0, 60.0], &[25.0, 35.0, 85.0, 100.0]).unwrap()
    }

    #[test]
    fn test_interpolation_below_range() {
        let table = reference_table();
        assert_eq!(table.target_duty(10.0), 25.0);
        assert_eq!(table.target_duty(30.0), 25.0);
    }

    #[test]
    fn test_interpolation_above_range() {
        let table = reference_table();
        assert_eq!(table.target_duty(60.0), 100.0);
        assert_eq!(table.target_duty(95.0), 100.0);
    }

    #[test]
    fn test_interpolation_exact_point() {
        let table = reference_table();
        assert_eq!(table.target_duty(40.0), 35.0);
        assert_eq!(table.target_duty(50.0), 85.0);
    }

    #[test]
    fn test_interpolation_midpoint() {
        let table = reference_table();
        assert_eq!(table.target_duty(45.0), 60.0);
    }

    #[test]
    fn test_rounding_ties_to_even() {
        let table = StepTable::new(&[0.0, 10.0], &[0.0, 5.0]).unwrap();
        // 0.5 -> 0, 1.5 -> 2, 2.5 -> 2
        assert_eq!(table.target_duty(1.0), 0.0);
        assert_eq!(table.target_duty(3.0), 2.0);
        assert_eq!(table.target_duty(5.0), 2.0);
    }

    #[test]
    fn test_default_table_is_valid() {
        let table = StepTable::new(&DEFAULT_TEMPERATURES, &DEFAULT_DUTIES).unwrap();
        assert_eq!(table.points().len(), 4);
        assert_eq!(table.target_duty(20.0), 0.0);
        // 92.5 rounds down to the even neighbour
        assert_eq!(table.target_duty(55.0), 92.0);
    }

    #[test]
    fn test_validation_length_mismatch() {
        let err = StepTable::new(&[30.0, 40.0, 50.0], &[25.0, 35.0]).unwrap_err();
        assert!(matches!(err, ControlError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_validation_too_few_points() {
        let err = StepTable::new(&[50.0], &[50.0]).unwrap_err();
        assert!(matches!(err, ControlError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_validation_not_increasing() {
        assert!(StepTable::new(&[30.0, 30.0], &[10.0, 20.0]).is_err());
        assert!(StepTable::new(&[40.0, 30.0], &[10.0, 20.0]).is_err());
        assert!(StepTable::new(&[30.0, f64::NAN], &[10.0, 20.0]).is_err());
    }
}
