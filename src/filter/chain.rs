//! Per-key online filter chain.
use super::stages::{deadband, slew_limit, Ema, HampelWindow, MovingAverage, Smoother};
use crate::config::SensorRange;
use std::time::Instant;

/// Smoothing stage parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SmoothingConfig {
    /// Pass values through.
    None,
    /// Exponential moving average.
    Ema {
        /// Weight of the newest sample, in (0, 1].
        alpha: f64,
    },
    /// Trailing boxcar mean.
    MovingAverage {
        /// Samples averaged.
        window: usize,
    },
}

/// Hampel stage parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HampelConfig {
    /// Odd window length, at least 3
    pub window: usize,
    /// Threshold in scaled MADs
    pub k: f64,
}

impl Default for HampelConfig {
    fn default() -> Self {
        Self { window: 11, k: 3.0 }
    }
}

/// Stage selection and parameters for one [`FilterChain`].
///
/// Every stage is optional. Start from [`FilterConfig::passthrough`] and enable
/// stages with the `with_*` methods.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    /// Range clamp bounds and spike step limit
    pub range: Option<SensorRange>,
    /// Substitute the last output for NaN or out-of-range input
    pub hold_last_on_invalid: bool,
    /// Outlier rejection
    pub hampel: Option<HampelConfig>,
    /// Smoothing
    pub smoothing: SmoothingConfig,
    /// Deadband threshold; 0 disables
    pub deadband: f64,
    /// Slew limit in units per second; 0 disables
    pub max_rate: f64,
}

impl FilterConfig {
    /// All stages disabled.
    pub fn passthrough() -> Self {
        Self {
            range: None,
            hold_last_on_invalid: false,
            hampel: None,
            smoothing: SmoothingConfig::None,
            deadband: 0.0,
            max_rate: 0.0,
        }
    }

    /// Clamp to `range`, which also carries the optional anti-spike step.
    pub fn with_range(mut self, range: SensorRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Repeat the last good output for out-of-range input instead of NaN.
    pub fn with_hold_last(mut self, enabled: bool) -> Self {
        self.hold_last_on_invalid = enabled;
        self
    }

    /// Enable the trailing Hampel identifier.
    pub fn with_hampel(mut self, window: usize, k: f64) -> Self {
        self.hampel = Some(HampelConfig { window, k });
        self
    }

    /// Select the smoothing stage.
    pub fn with_smoothing(mut self, smoothing: SmoothingConfig) -> Self {
        self.smoothing = smoothing;
        self
    }

    /// Hold the previous output while the change stays within `threshold`.
    pub fn with_deadband(mut self, threshold: f64) -> Self {
        self.deadband = threshold;
        self
    }

    /// Cap the rate of change, in units per second. Zero disables.
    pub fn with_slew(mut self, max_rate: f64) -> Self {
        self.max_rate = max_rate;
        self
    }
}

/// The conditioning pipeline for one (device, sensor) key.
///
/// Stages run in a fixed order: range clamp → anti-spike → Hampel → smoothing →
/// deadband → slew limit. Invalid input (NaN, infinite or out of range) never
/// reaches the stateful stages: it becomes the held last output when hold-last
/// is enabled and one exists, otherwise NaN. `last_output` only ever holds a
/// finite value produced by the full chain.
#[derive(Debug, Clone)]
pub struct FilterChain {
    config: FilterConfig,
    hampel: Option<HampelWindow>,
    smoother: Smoother,
    last_output: Option<f64>,
    last_sample_at: Option<Instant>,
}

impl FilterChain {
    /// Fresh chain with no history.
    pub fn new(config: FilterConfig) -> Self {
        let hampel = config.hampel.map(|h| HampelWindow::new(h.window, h.k));
        let smoother = match config.smoothing {
            SmoothingConfig::None => Smoother::None,
            SmoothingConfig::Ema { alpha } => Smoother::Ema(Ema::new(alpha)),
            SmoothingConfig::MovingAverage { window } => {
                Smoother::MovingAverage(MovingAverage::new(window))
            }
        };
        Self {
            config,
            hampel,
            smoother,
            last_output: None,
            last_sample_at: None,
        }
    }

    /// Parameters this chain was built with.
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Most recent finite output.
    pub fn last_output(&self) -> Option<f64> {
        self.last_output
    }

    /// The smoothing window, when a moving average is configured.
    pub fn moving_average(&self) -> Option<&MovingAverage> {
        match &self.smoother {
            Smoother::MovingAverage(avg) => Some(avg),
            _ => None,
        }
    }

    /// Condition one sample taken at `at`.
    pub fn process(&mut self, value: f64, at: Instant) -> f64 {
        let in_range = match self.config.range {
            Some(range) => range.contains(value),
            None => value.is_finite(),
        };
        if !in_range {
            return match self.last_output {
                Some(last) if self.config.hold_last_on_invalid => last,
                _ => f64::NAN,
            };
        }

        let mut x = value;

        if let (Some(step), Some(last)) = (
            self.config.range.and_then(|r| r.max_step),
            self.last_output,
        ) {
            if (x - last).abs() > step {
                x = last;
            }
        }

        if let Some(hampel) = self.hampel.as_mut() {
            x = hampel.push(x);
        }

        let mut y = self.smoother.push(x);
        y = deadband(self.last_output, y, self.config.deadband);

        if let Some(prev_at) = self.last_sample_at {
            let dt = at.saturating_duration_since(prev_at).as_secs_f64();
            y = slew_limit(self.last_output, y, self.config.max_rate, dt);
        }

        if y.is_finite() {
            self.last_output = Some(y);
            self.last_sample_at = Some(at);
        }
        y
    }
}
