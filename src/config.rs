//! Configuration System using Figment
//!
//! This module provides strongly-typed configuration loading. Configuration is
//! loaded once at startup from:
//! 1. `config/press_daq.toml` (base configuration, optional)
//! 2. Environment variables (prefixed with `PRESS_DAQ_`, nested keys split on `__`)
//!
//! Every section carries serde defaults, so a missing file yields a usable
//! configuration. The resulting [`Settings`] is validated and then handed down
//! to each component by reference; nothing re-reads the environment later.
//!
//! # Example
//! ```no_run
//! use press_daq::config::Settings;
//!
//! let settings = Settings::load()?;
//! settings.validate()?;
//! println!("Hub listening on {}", settings.hub.bind);
//! # Ok::<(), press_daq::error::DaqError>(())
//! ```

use crate::calibration::LinearCalibration;
use crate::error::{AppResult, DaqError};
use crate::reading::SensorKind;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/press_daq.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Reading sink settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Calibration coefficients per raw channel
    #[serde(default)]
    pub calibration: CalibrationConfig,
    /// Physical sanity bounds per sensor kind
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Live serial source
    #[serde(default)]
    pub live: LiveConfig,
    /// Historical replay source
    #[serde(default)]
    pub replay: ReplayConfig,
    /// Broadcast hub and subscriber server
    #[serde(default)]
    pub hub: HubConfig,
    /// Source lifecycle management
    #[serde(default)]
    pub manager: ManagerConfig,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored (development)
    #[default]
    Pretty,
    /// Single-line, no colors
    Compact,
    /// JSON lines for log aggregation
    Json,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

/// Reading sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Whether conditioned readings are appended to CSV history
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Directory holding one CSV file per device/sensor pair
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: default_output_dir(),
        }
    }
}

/// Calibration coefficients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Raw pressure transducer reading → kPa
    #[serde(default)]
    pub pressure: LinearCalibration,
}

/// Sanity bounds for one sensor kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorRange {
    /// Lowest physically plausible value
    pub min: f64,
    /// Highest physically plausible value
    pub max: f64,
    /// Largest accepted single-sample jump; larger steps are rejected as spikes
    #[serde(default)]
    pub max_step: Option<f64>,
}

impl SensorRange {
    /// Range with no spike rejection.
    pub const fn new(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            max_step: None,
        }
    }

    /// Whether `value` is a finite number inside `[min, max]`.
    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

/// Sanity bounds shared by the live and replay paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Pressure, kPa.
    #[serde(default = "default_pressure_range")]
    pub pressure: SensorRange,
    /// Distance, mm.
    #[serde(default = "default_distance_range")]
    pub distance: SensorRange,
    /// Temperature, °C.
    #[serde(default = "default_temperature_range")]
    pub temperature: SensorRange,
    /// Relative humidity, %.
    #[serde(default = "default_humidity_range")]
    pub humidity: SensorRange,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            pressure: default_pressure_range(),
            distance: default_distance_range(),
            temperature: default_temperature_range(),
            humidity: default_humidity_range(),
        }
    }
}

impl LimitsConfig {
    /// Bounds for a continuous sensor kind; `None` for digital or unknown channels.
    pub fn range_for(&self, sensor: &SensorKind) -> Option<SensorRange> {
        match sensor {
            SensorKind::Pressure => Some(self.pressure),
            SensorKind::Distance => Some(self.distance),
            SensorKind::Temperature => Some(self.temperature),
            SensorKind::Humidity => Some(self.humidity),
            _ => None,
        }
    }

    fn iter(&self) -> impl Iterator<Item = (&'static str, &SensorRange)> {
        [
            ("pressure", &self.pressure),
            ("distance", &self.distance),
            ("temperature", &self.temperature),
            ("humidity", &self.humidity),
        ]
        .into_iter()
    }
}

/// Smoothing stage selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmoothingKind {
    /// Pass values through unsmoothed
    None,
    /// Exponentially weighted average
    Ema,
    /// Fixed-window moving average
    #[serde(alias = "moving_average")]
    Boxcar,
}

/// Online filter chain settings for the live path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveFilterConfig {
    /// Master switch; when false continuous values are only calibrated
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Smoothing stage
    #[serde(default = "default_live_smoothing")]
    pub smoothing: SmoothingKind,
    /// Moving-average window (samples)
    #[serde(default = "default_live_window")]
    pub window: usize,
    /// EMA weight of the newest sample
    #[serde(default = "default_live_alpha")]
    pub ema_alpha: f64,
    /// Hampel window (odd, ≥3); `None` disables outlier rejection
    #[serde(default = "default_hampel_window")]
    pub hampel_window: Option<usize>,
    /// Hampel threshold in scaled MADs
    #[serde(default = "default_hampel_k")]
    pub hampel_k: f64,
    /// Minimum change before the output moves
    #[serde(default = "default_live_deadband")]
    pub deadband: f64,
    /// Maximum rate of change per second; 0 disables slew limiting
    #[serde(default = "default_live_slew")]
    pub max_slew_per_s: f64,
    /// Substitute the last valid output for NaN or out-of-range inputs
    #[serde(default = "default_true")]
    pub hold_last_on_invalid: bool,
}

impl Default for LiveFilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            smoothing: default_live_smoothing(),
            window: default_live_window(),
            ema_alpha: default_live_alpha(),
            hampel_window: default_hampel_window(),
            hampel_k: default_hampel_k(),
            deadband: default_live_deadband(),
            max_slew_per_s: default_live_slew(),
            hold_last_on_invalid: true,
        }
    }
}

/// Live serial source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Serial port path (e.g. "/dev/ttyUSB0", "COM3")
    #[serde(default = "default_port")]
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// Device id stamped on every reading
    #[serde(default = "default_device_id")]
    pub device_id: String,
    /// Fixed delay between reconnect attempts
    #[serde(default = "default_reconnect_delay", with = "humantime_serde")]
    pub reconnect_delay: Duration,
    /// Per-read timeout of the blocking transport; bounds stop latency
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Capacity of the worker → event loop line channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Filter chain
    #[serde(default)]
    pub filter: LiveFilterConfig,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud: default_baud(),
            device_id: default_device_id(),
            reconnect_delay: default_reconnect_delay(),
            read_timeout: default_read_timeout(),
            channel_capacity: default_channel_capacity(),
            filter: LiveFilterConfig::default(),
        }
    }
}

/// What the replay engine does with a channel that has no valid value in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NanPolicy {
    /// Emit the reading with a NaN value
    #[default]
    Keep,
    /// Skip the reading
    Drop,
}

/// Replay source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Device id stamped on replayed readings
    #[serde(default = "default_device_id")]
    pub device_id: String,
    /// Playback speed factor (>1 is faster than recorded)
    #[serde(default = "default_speed")]
    pub speed: f64,
    /// Restart from the top of the file when the end is reached
    #[serde(default = "default_true", rename = "loop")]
    pub loop_playback: bool,
    /// Sample spacing assumed when the file carries no timestamps
    #[serde(default = "default_replay_dt", with = "humantime_serde")]
    pub default_dt: Duration,
    /// Leading span of the recording discarded as sensor warmup
    #[serde(default = "default_warmup", with = "humantime_serde")]
    pub warmup: Duration,
    /// Longest pause reproduced between two rows
    #[serde(default = "default_max_gap", with = "humantime_serde")]
    pub max_gap: Duration,
    /// Pause between two loop iterations
    #[serde(default = "default_loop_pause", with = "humantime_serde")]
    pub loop_pause: Duration,
    /// Hampel window (odd, ≥3); `None` disables outlier rejection
    #[serde(default = "default_hampel_window")]
    pub hampel_window: Option<usize>,
    /// Hampel threshold in scaled MADs
    #[serde(default = "default_hampel_k")]
    pub hampel_k: f64,
    /// Primary smoother
    #[serde(default = "default_replay_smoothing")]
    pub smoothing: SmoothingKind,
    /// Moving-average window (samples)
    #[serde(default = "default_replay_window")]
    pub window: usize,
    /// EMA weight of the newest sample
    #[serde(default = "default_replay_alpha")]
    pub ema_alpha: f64,
    /// Deadband for pressure and distance; temperature uses a fifth of it
    #[serde(default = "default_replay_deadband")]
    pub deadband: f64,
    /// Pressure slew limit, kPa/s
    #[serde(default = "default_slew_kpa")]
    pub slew_kpa_per_s: f64,
    /// Distance slew limit, mm/s
    #[serde(default = "default_slew_mm")]
    pub slew_mm_per_s: f64,
    /// Temperature slew limit, °C/s
    #[serde(default = "default_slew_c")]
    pub slew_c_per_s: f64,
    /// Handling of channels without a value
    #[serde(default)]
    pub nan_policy: NanPolicy,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            speed: default_speed(),
            loop_playback: true,
            default_dt: default_replay_dt(),
            warmup: default_warmup(),
            max_gap: default_max_gap(),
            loop_pause: default_loop_pause(),
            hampel_window: default_hampel_window(),
            hampel_k: default_hampel_k(),
            smoothing: default_replay_smoothing(),
            window: default_replay_window(),
            ema_alpha: default_replay_alpha(),
            deadband: default_replay_deadband(),
            slew_kpa_per_s: default_slew_kpa(),
            slew_mm_per_s: default_slew_mm(),
            slew_c_per_s: default_slew_c(),
            nan_policy: NanPolicy::default(),
        }
    }
}

/// Broadcast hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Address of the subscriber server
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Minimum spacing between two messages to one subscriber
    #[serde(default = "default_min_send_interval", with = "humantime_serde")]
    pub min_send_interval: Duration,
    /// Idle time after which a keepalive is pushed
    #[serde(default = "default_keepalive", with = "humantime_serde")]
    pub keepalive_interval: Duration,
    /// Messages buffered per subscriber; a subscriber whose queue is full is dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Longest a single write to a subscriber may take before it is dropped
    #[serde(default = "default_send_timeout", with = "humantime_serde")]
    pub send_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            min_send_interval: default_min_send_interval(),
            keepalive_interval: default_keepalive(),
            queue_capacity: default_queue_capacity(),
            send_timeout: default_send_timeout(),
        }
    }
}

/// Source lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Bound on how long `stop_*` waits for a source to wind down
    #[serde(default = "default_stop_timeout", with = "humantime_serde")]
    pub stop_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            stop_timeout: default_stop_timeout(),
        }
    }
}

// Default value functions
fn default_queue_capacity() -> usize {
    256
}

fn default_send_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_true() -> bool {
    true
}

fn default_app_name() -> String {
    "press-daq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_pressure_range() -> SensorRange {
    SensorRange {
        min: 0.0,
        max: 400.0,
        max_step: Some(300.0),
    }
}

fn default_distance_range() -> SensorRange {
    SensorRange::new(0.0, 2000.0)
}

fn default_temperature_range() -> SensorRange {
    SensorRange::new(-50.0, 350.0)
}

fn default_humidity_range() -> SensorRange {
    SensorRange::new(0.0, 100.0)
}

fn default_live_smoothing() -> SmoothingKind {
    SmoothingKind::Boxcar
}

fn default_live_window() -> usize {
    500
}

fn default_live_alpha() -> f64 {
    0.02
}

fn default_hampel_window() -> Option<usize> {
    Some(11)
}

fn default_hampel_k() -> f64 {
    3.0
}

fn default_live_deadband() -> f64 {
    2.0
}

fn default_live_slew() -> f64 {
    20.0
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud() -> u32 {
    9600
}

fn default_device_id() -> String {
    "arduino-01".to_string()
}

fn default_reconnect_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_read_timeout() -> Duration {
    Duration::from_millis(100)
}

fn default_channel_capacity() -> usize {
    256
}

fn default_speed() -> f64 {
    1.0
}

fn default_replay_dt() -> Duration {
    Duration::from_millis(500)
}

fn default_warmup() -> Duration {
    Duration::from_secs(4)
}

fn default_max_gap() -> Duration {
    Duration::from_secs(5)
}

fn default_loop_pause() -> Duration {
    Duration::from_millis(200)
}

fn default_replay_smoothing() -> SmoothingKind {
    SmoothingKind::Ema
}

fn default_replay_window() -> usize {
    25
}

fn default_replay_alpha() -> f64 {
    0.08
}

fn default_replay_deadband() -> f64 {
    0.8
}

fn default_slew_kpa() -> f64 {
    15.0
}

fn default_slew_mm() -> f64 {
    120.0
}

fn default_slew_c() -> f64 {
    3.0
}

fn default_bind() -> String {
    "0.0.0.0:8765".to_string()
}

fn default_min_send_interval() -> Duration {
    Duration::from_millis(50)
}

fn default_keepalive() -> Duration {
    Duration::from_secs(30)
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(3)
}

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Settings {
    /// Load configuration from `config/press_daq.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `PRESS_DAQ_`.
    /// Example: `PRESS_DAQ_LIVE__BAUD=115200`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("PRESS_DAQ_").split("__"))
            .extract()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: String| Err(DaqError::Configuration(msg));

        let level = self.application.log_level.to_lowercase();
        if !VALID_LEVELS.contains(&level.as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LEVELS.join(", ")
            ));
        }

        for (name, range) in self.limits.iter() {
            if !(range.min.is_finite() && range.max.is_finite()) || range.min >= range.max {
                return invalid(format!(
                    "limits.{name}: min ({}) must be below max ({})",
                    range.min, range.max
                ));
            }
            if let Some(step) = range.max_step {
                if !(step > 0.0) {
                    return invalid(format!("limits.{name}.max_step must be positive"));
                }
            }
        }

        let filter = &self.live.filter;
        validate_alpha("live.filter.ema_alpha", filter.ema_alpha)?;
        validate_window("live.filter.window", filter.window)?;
        validate_hampel("live.filter", filter.hampel_window, filter.hampel_k)?;
        validate_non_negative("live.filter.deadband", filter.deadband)?;
        validate_non_negative("live.filter.max_slew_per_s", filter.max_slew_per_s)?;

        if self.live.port.trim().is_empty() {
            return invalid("live.port must not be empty".to_string());
        }
        if self.live.baud == 0 {
            return invalid("live.baud must be positive".to_string());
        }
        if self.live.channel_capacity == 0 {
            return invalid("live.channel_capacity must be positive".to_string());
        }

        let replay = &self.replay;
        if !(replay.speed.is_finite() && replay.speed > 0.0) {
            return invalid(format!(
                "replay.speed must be positive and finite, got {}",
                replay.speed
            ));
        }
        if replay.default_dt.is_zero() {
            return invalid("replay.default_dt must be positive".to_string());
        }
        validate_alpha("replay.ema_alpha", replay.ema_alpha)?;
        validate_window("replay.window", replay.window)?;
        validate_hampel("replay", replay.hampel_window, replay.hampel_k)?;
        validate_non_negative("replay.deadband", replay.deadband)?;
        validate_non_negative("replay.slew_kpa_per_s", replay.slew_kpa_per_s)?;
        validate_non_negative("replay.slew_mm_per_s", replay.slew_mm_per_s)?;
        validate_non_negative("replay.slew_c_per_s", replay.slew_c_per_s)?;

        if self.hub.queue_capacity == 0 {
            return invalid("hub.queue_capacity must be at least 1".to_string());
        }
        if self.hub.send_timeout.is_zero() {
            return invalid("hub.send_timeout must be positive".to_string());
        }
        if self.hub.keepalive_interval.is_zero() {
            return invalid("hub.keepalive_interval must be positive".to_string());
        }

        Ok(())
    }
}

fn validate_alpha(name: &str, alpha: f64) -> AppResult<()> {
    if alpha > 0.0 && alpha <= 1.0 {
        Ok(())
    } else {
        Err(DaqError::Configuration(format!(
            "{name} must be in (0, 1], got {alpha}"
        )))
    }
}

fn validate_window(name: &str, window: usize) -> AppResult<()> {
    if window == 0 {
        return Err(DaqError::Configuration(format!("{name} must be positive")));
    }
    Ok(())
}

fn validate_hampel(prefix: &str, window: Option<usize>, k: f64) -> AppResult<()> {
    if let Some(w) = window {
        if w < 3 || w % 2 == 0 {
            return Err(DaqError::Configuration(format!(
                "{prefix}.hampel_window must be odd and at least 3, got {w}"
            )));
        }
    }
    if !(k.is_finite() && k > 0.0) {
        return Err(DaqError::Configuration(format!(
            "{prefix}.hampel_k must be positive, got {k}"
        )));
    }
    Ok(())
}

fn validate_non_negative(name: &str, value: f64) -> AppResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(DaqError::Configuration(format!(
            "{name} must be non-negative, got {value}"
        )))
    }
}
