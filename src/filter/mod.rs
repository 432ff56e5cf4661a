//! Signal conditioning.
//!
//! - [`stages`]: moving average, EMA, Hampel window, deadband and slew primitives
//! - [`chain`]: the per-key online chain (clamp → anti-spike → Hampel → smooth →
//!   deadband → slew)
//! - [`bank`]: lazily created chains keyed by (device, sensor)
//! - [`batch`]: whole-track forms used by the replay engine
pub mod bank;
pub mod batch;
pub mod chain;
pub mod stages;

pub use bank::{threshold_digital, FilterBank, FilterProfile};
pub use chain::{FilterChain, FilterConfig, HampelConfig, SmoothingConfig};
pub use stages::{deadband, slew_limit, Ema, HampelWindow, MovingAverage};
