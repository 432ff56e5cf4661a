//! # press_daq
//!
//! Signal conditioning and real-time distribution for the sensor telemetry of
//! a heated pneumatic press (temperature, pressure, ram distance and two
//! infrared presence flags).
//!
//! ## Data flow
//!
//! ```text
//! serial line / recorded file
//!   → source (parse) → calibration → filter chain
//!   → IngestionPipeline → { ReadingSink, BroadcastHub → subscribers }
//! ```
//!
//! ## Crate Structure
//!
//! - **`config`**: Figment-backed [`config::Settings`], loaded once and validated.
//! - **`error`**: The crate-wide [`error::DaqError`].
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`reading`**: [`reading::Reading`] and [`reading::SensorKind`].
//! - **`calibration`**: Linear raw → engineering unit conversion.
//! - **`filter`**: Range clamp, anti-spike, Hampel, smoothing, deadband and slew stages.
//! - **`source`**: Live serial and file replay ingest sources.
//! - **`pipeline`**: Fan-in point forwarding readings to the sink and the hub.
//! - **`sink`**: CSV history and latest-value table.
//! - **`hub`**: Subscriber registry with per-subscriber rate limiting, plus a TCP front-end.
//! - **`manager`**: Start/stop/status for the single active source.

pub mod calibration;
pub mod config;
pub mod error;
pub mod filter;
pub mod hub;
pub mod logging;
pub mod manager;
pub mod pipeline;
pub mod reading;
pub mod sink;
pub mod source;

pub use error::{AppResult, DaqError};
pub use reading::{Reading, SensorKind};
