//! Lazily populated map of filter chains, one per (device, sensor) key.
use super::chain::{FilterChain, FilterConfig, SmoothingConfig};
use crate::config::{LimitsConfig, LiveFilterConfig, SmoothingKind};
use crate::reading::SensorKind;
use std::collections::HashMap;
use std::time::Instant;

/// Threshold above which a digital channel reads as "on".
pub const DIGITAL_THRESHOLD: f64 = 0.5;

/// Map a raw digital value to 0.0 / 1.0; NaN stays NaN.
#[inline]
pub fn threshold_digital(value: f64) -> f64 {
    if value.is_nan() {
        value
    } else if value >= DIGITAL_THRESHOLD {
        1.0
    } else {
        0.0
    }
}

/// Which [`FilterConfig`] each continuous sensor kind gets.
#[derive(Debug, Clone)]
pub struct FilterProfile {
    enabled: bool,
    base: FilterConfig,
    limits: Option<LimitsConfig>,
}

impl FilterProfile {
    /// Live-path profile: shared stage settings, per-sensor sanity range and step limit.
    pub fn from_live_settings(filter: &LiveFilterConfig, limits: &LimitsConfig) -> Self {
        let smoothing = match filter.smoothing {
            SmoothingKind::None => SmoothingConfig::None,
            SmoothingKind::Ema => SmoothingConfig::Ema {
                alpha: filter.ema_alpha,
            },
            SmoothingKind::Boxcar => SmoothingConfig::MovingAverage {
                window: filter.window,
            },
        };
        let mut base = FilterConfig::passthrough()
            .with_hold_last(filter.hold_last_on_invalid)
            .with_smoothing(smoothing)
            .with_deadband(filter.deadband)
            .with_slew(filter.max_slew_per_s);
        if let Some(window) = filter.hampel_window {
            base = base.with_hampel(window, filter.hampel_k);
        }
        Self {
            enabled: filter.enabled,
            base,
            limits: Some(limits.clone()),
        }
    }

    /// The same configuration for every continuous sensor.
    pub fn uniform(config: FilterConfig) -> Self {
        Self {
            enabled: true,
            base: config,
            limits: None,
        }
    }

    /// Calibrate only; no conditioning.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            base: FilterConfig::passthrough(),
            limits: None,
        }
    }

    /// Whether values are conditioned at all; a disabled profile passes them through.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Configuration for a new chain on `sensor`.
    pub fn config_for(&self, sensor: &SensorKind) -> FilterConfig {
        let mut config = self.base.clone();
        if let Some(range) = self.limits.as_ref().and_then(|l| l.range_for(sensor)) {
            config.range = Some(range);
        }
        config
    }
}

/// Filter state for every (device, sensor) pair seen so far.
///
/// Chains are created explicitly on first use and live for the lifetime of the
/// bank; the key space is bounded by the distinct device/sensor pairs observed.
/// A bank is owned by exactly one ingest source, so no locking is needed.
#[derive(Debug)]
pub struct FilterBank {
    profile: FilterProfile,
    chains: HashMap<(String, SensorKind), FilterChain>,
}

impl FilterBank {
    /// Empty bank; chains are built from `profile` as keys appear.
    pub fn new(profile: FilterProfile) -> Self {
        Self {
            profile,
            chains: HashMap::new(),
        }
    }

    /// Condition one value.
    ///
    /// Digital channels are thresholded, continuous channels go through their
    /// chain, anything else passes through untouched.
    pub fn process(&mut self, device_id: &str, sensor: &SensorKind, value: f64, at: Instant) -> f64 {
        if sensor.is_digital() {
            return threshold_digital(value);
        }
        if !sensor.is_continuous() || !self.profile.is_enabled() {
            return value;
        }
        self.chain_mut(device_id, sensor).process(value, at)
    }

    fn chain_mut(&mut self, device_id: &str, sensor: &SensorKind) -> &mut FilterChain {
        let profile = &self.profile;
        self.chains
            .entry((device_id.to_string(), sensor.clone()))
            .or_insert_with(|| {
                tracing::debug!(device_id, %sensor, "created filter state");
                FilterChain::new(profile.config_for(sensor))
            })
    }

    /// The chain for a key, if one exists.
    pub fn chain(&self, device_id: &str, sensor: &SensorKind) -> Option<&FilterChain> {
        self.chains.get(&(device_id.to_string(), sensor.clone()))
    }

    /// Number of keys with live filter state.
    pub fn key_count(&self) -> usize {
        self.chains.len()
    }
}
