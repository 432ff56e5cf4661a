//! Linear calibration from raw channel units to engineering units.
use serde::{Deserialize, Serialize};

/// `apply(raw) = scale * raw + offset`.
///
/// Coefficients are deployment data loaded with [`crate::config::Settings`];
/// they are read-only once the process is running.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearCalibration {
    /// Multiplier applied to the raw value.
    pub scale: f64,
    /// Added after scaling.
    pub offset: f64,
}

impl Default for LinearCalibration {
    /// Identity transform.
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset: 0.0,
        }
    }
}

impl LinearCalibration {
    /// `raw * scale + offset`.
    pub fn new(scale: f64, offset: f64) -> Self {
        Self { scale, offset }
    }

    /// Convert a raw reading. NaN stays NaN.
    #[inline]
    pub fn apply(&self, raw: f64) -> f64 {
        self.scale * raw + self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_linear_transform() {
        let cal = LinearCalibration::new(80.0, -20.0);
        assert_eq!(cal.apply(0.0), -20.0);
        assert_eq!(cal.apply(2.5), 180.0);
    }

    #[test]
    fn nan_propagates() {
        assert!(LinearCalibration::default().apply(f64::NAN).is_nan());
    }
}
