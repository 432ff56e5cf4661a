//! Live ingest source: serial device → worker thread → async conditioning.
//!
//! The blocking transport lives on a dedicated OS thread; complete lines cross
//! to the tokio runtime over a bounded channel. The async half parses each
//! line, calibrates raw pressure, runs the filter bank and hands the readings
//! to the pipeline in arrival order.
use super::parse::parse_line;
use super::transport::{run_reader, ReaderSettings, TransportFactory};
use super::StopSignal;
use crate::calibration::LinearCalibration;
use crate::config::Settings;
use crate::error::{AppResult, DaqError};
use crate::filter::{FilterBank, FilterProfile};
use crate::pipeline::IngestionPipeline;
use crate::reading::Reading;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything a live source needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct LiveOptions {
    /// Serial port path.
    pub port: String,
    /// Line rate.
    pub baud: u32,
    /// Device id stamped on every reading.
    pub device_id: String,
    /// Per-read timeout on the serial port.
    pub read_timeout: Duration,
    /// Pause before reopening a failed port.
    pub reconnect_delay: Duration,
    /// Bound on lines buffered between the reader thread and the async task.
    pub channel_capacity: usize,
    /// Applied to raw pressure volts from JSON records.
    pub pressure_calibration: LinearCalibration,
    /// Live conditioning profile.
    pub filter: FilterProfile,
}

impl LiveOptions {
    /// Options for `port` with everything else taken from `settings`.
    pub fn from_settings(settings: &Settings, port: &str, baud: u32, device_id: &str) -> Self {
        let live = &settings.live;
        Self {
            port: port.to_string(),
            baud,
            device_id: device_id.to_string(),
            read_timeout: live.read_timeout,
            reconnect_delay: live.reconnect_delay,
            channel_capacity: live.channel_capacity,
            pressure_calibration: settings.calibration.pressure,
            filter: FilterProfile::from_live_settings(&live.filter, &settings.limits),
        }
    }
}

/// Turns device lines into conditioned readings for one device.
#[derive(Debug)]
pub struct LineConditioner {
    device_id: String,
    pressure_calibration: LinearCalibration,
    bank: FilterBank,
}

impl LineConditioner {
    /// Conditioner for one device with a fresh filter bank.
    pub fn new(
        device_id: impl Into<String>,
        pressure_calibration: LinearCalibration,
        filter: FilterProfile,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            pressure_calibration,
            bank: FilterBank::new(filter),
        }
    }

    /// Parse, calibrate and filter one line. Malformed lines are logged and
    /// yield nothing.
    pub fn condition(&mut self, line: &str, at: Instant) -> Vec<Reading> {
        let samples = match parse_line(line) {
            Ok(samples) => samples,
            Err(e) => {
                debug!(device_id = %self.device_id, error = %e, line, "skipping malformed line");
                return Vec::new();
            }
        };
        samples
            .into_iter()
            .map(|sample| {
                let value = if sample.raw {
                    self.pressure_calibration.apply(sample.value)
                } else {
                    sample.value
                };
                let value = self.bank.process(&self.device_id, &sample.sensor, value, at);
                Reading::now(self.device_id.clone(), sample.sensor, value)
            })
            .collect()
    }

    /// Per-channel filter state, for inspection.
    pub fn filter_bank(&self) -> &FilterBank {
        &self.bank
    }
}

/// A running live source.
pub struct LiveSource {
    port: String,
    stop: StopSignal,
    worker: Option<std::thread::JoinHandle<()>>,
    task: Option<JoinHandle<()>>,
}

impl LiveSource {
    /// Start the worker thread and the conditioning task.
    pub fn spawn(
        options: LiveOptions,
        factory: Arc<dyn TransportFactory>,
        pipeline: IngestionPipeline,
    ) -> AppResult<Self> {
        let stop = StopSignal::new();
        let (tx, mut rx) = mpsc::channel::<String>(options.channel_capacity.max(1));

        let reader_settings = ReaderSettings {
            port: options.port.clone(),
            baud: options.baud,
            read_timeout: options.read_timeout,
            reconnect_delay: options.reconnect_delay,
        };
        let worker = {
            let stop = stop.clone();
            std::thread::Builder::new()
                .name(format!("live-{}", options.port))
                .spawn(move || run_reader(factory.as_ref(), &reader_settings, &stop, &tx))?
        };

        let mut conditioner = LineConditioner::new(
            options.device_id.clone(),
            options.pressure_calibration,
            options.filter,
        );
        let task = {
            let stop = stop.clone();
            tokio::spawn(async move {
                loop {
                    let line = tokio::select! {
                        line = rx.recv() => line,
                        _ = stop.triggered() => None,
                    };
                    let Some(line) = line else { break };
                    for reading in conditioner.condition(&line, Instant::now()) {
                        pipeline.ingest(reading).await;
                    }
                }
                debug!("live conditioning task finished");
            })
        };

        info!(port = %options.port, baud = options.baud, device_id = %options.device_id, "live source started");
        Ok(Self {
            port: options.port,
            stop,
            worker: Some(worker),
            task: Some(task),
        })
    }

    /// Serial port this source reads.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Whether both halves have exited.
    pub fn is_finished(&self) -> bool {
        let task_done = self.task.as_ref().map_or(true, JoinHandle::is_finished);
        let worker_done = self
            .worker
            .as_ref()
            .map_or(true, std::thread::JoinHandle::is_finished);
        task_done && worker_done
    }

    /// Signal the source and wait up to `timeout` for both halves to exit.
    pub async fn stop(mut self, timeout: Duration) -> AppResult<()> {
        self.stop.trigger();
        let task = self.task.take();
        let worker = self.worker.take();

        let joined = tokio::time::timeout(timeout, async move {
            if let Some(task) = task {
                if let Err(e) = task.await {
                    warn!(error = %e, "live conditioning task panicked");
                }
            }
            if let Some(worker) = worker {
                match tokio::task::spawn_blocking(move || worker.join()).await {
                    Ok(Ok(())) => {}
                    _ => warn!("live worker thread panicked"),
                }
            }
        })
        .await;

        match joined {
            Ok(()) => {
                info!(port = %self.port, "live source stopped");
                Ok(())
            }
            Err(_) => Err(DaqError::StopTimeout(timeout)),
        }
    }
}

impl Drop for LiveSource {
    fn drop(&mut self) {
        self.stop.trigger();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::LinearCalibration;
    use crate::filter::FilterProfile;
    use crate::reading::SensorKind;

    #[test]
    fn conditions_json_line() {
        let mut conditioner = LineConditioner::new(
            "arduino-01",
            LinearCalibration::new(100.0, 0.0),
            FilterProfile::disabled(),
        );
        let readings = conditioner.condition(
            r#"{"temperatura_C":180.0,"pressao_volts":1.5,"IR_mao":0.9}"#,
            Instant::now(),
        );
        assert_eq!(readings.len(), 3);
        assert_eq!(readings[1].sensor, SensorKind::Pressure);
        assert_eq!(readings[1].value, 150.0);
        assert_eq!(readings[1].unit.as_deref(), Some("kPa"));
        assert_eq!(readings[2].value, 1.0);
        assert!(readings.iter().all(|r| r.device_id == "arduino-01"));
    }

    #[test]
    fn malformed_line_yields_nothing() {
        let mut conditioner =
            LineConditioner::new("a", LinearCalibration::default(), FilterProfile::disabled());
        assert!(conditioner
            .condition("[1][PRESSAO]", Instant::now())
            .is_empty());
        assert!(conditioner.condition("hello", Instant::now()).is_empty());
    }

    #[test]
    fn bracketed_pressure_is_not_calibrated() {
        let mut conditioner = LineConditioner::new(
            "a",
            LinearCalibration::new(0.01234, -1.23),
            FilterProfile::disabled(),
        );
        let readings =
            conditioner.condition("[2025-01-01 12:12:00] [PRESSAO] [VALUE: 110]", Instant::now());
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].sensor, SensorKind::Pressure);
        assert_eq!(readings[0].value, 110.0);
        assert_eq!(readings[0].unit.as_deref(), Some("kPa"));
    }

    #[test]
    fn engineering_pressure_skips_calibration() {
        let mut conditioner = LineConditioner::new(
            "a",
            LinearCalibration::new(100.0, 5.0),
            FilterProfile::disabled(),
        );
        let readings = conditioner.condition(r#"{"pressao_kPa":42.0}"#, Instant::now());
        assert_eq!(readings[0].value, 42.0);
    }
}
