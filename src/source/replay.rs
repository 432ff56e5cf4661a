//! Replay ingest source: plays a recorded session back through the pipeline.
//!
//! A pass over the file works in two phases. First the whole recording is
//! loaded and every continuous track is cleaned in batch (sanity clip, warmup
//! trim, Hampel, smoothing). Then rows are emitted with their original spacing
//! (capped at `max_gap`, divided by `speed`) against absolute deadlines, each
//! value going through an online deadband and a per-channel slew limit.
use super::parse::{coerce_json, coerce_str};
use super::StopSignal;
use crate::calibration::LinearCalibration;
use crate::config::{LimitsConfig, NanPolicy, ReplayConfig, Settings};
use crate::error::{AppResult, DaqError};
use crate::filter::{batch, deadband, slew_limit, threshold_digital};
use crate::pipeline::IngestionPipeline;
use crate::reading::{Reading, SensorKind};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const TIMESTAMP_MS_COLUMNS: &[&str] = &["timestamp_ms", "ts_ms", "ts"];
const TIMESTAMP_S_COLUMNS: &[&str] = &["timestamp_s", "time_s", "epoch_s"];

/// Temperature uses a fraction of the configured deadband.
const TEMPERATURE_DEADBAND_FACTOR: f64 = 0.2;

/// Everything a replay needs besides the pipeline.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// CSV recording to play.
    pub path: PathBuf,
    /// `[replay]` settings, after per-call overrides.
    pub config: ReplayConfig,
    /// Ranges for the batch clip stage.
    pub limits: LimitsConfig,
    /// Applied to the `pressao_volts` column.
    pub pressure_calibration: LinearCalibration,
}

impl ReplayOptions {
    /// Options from the loaded settings; only `path` is per call.
    pub fn from_settings(settings: &Settings, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: settings.replay.clone(),
            limits: settings.limits.clone(),
            pressure_calibration: settings.calibration.pressure,
        }
    }

    /// Device id stamped on emitted readings.
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.config.device_id = device_id.into();
        self
    }

    /// Playback speed multiplier; 2.0 plays twice as fast.
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.config.speed = speed;
        self
    }

    /// Restart from the first row after the last.
    pub fn with_loop(mut self, loop_playback: bool) -> Self {
        self.config.loop_playback = loop_playback;
        self
    }
}

/// One channel's values, aligned with [`Recording::t_ms`].
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    /// Channel name from the column header.
    pub sensor: SensorKind,
    /// NaN marks a sample that was missing or rejected.
    pub values: Vec<f64>,
}

/// A prepared recording: timestamps plus batch-filtered tracks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recording {
    /// Milliseconds since the first row.
    pub t_ms: Vec<f64>,
    /// One track per recognised column.
    pub tracks: Vec<Track>,
}

impl Recording {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.t_ms.len()
    }

    /// `true` for a header-only file.
    pub fn is_empty(&self) -> bool {
        self.t_ms.is_empty()
    }

    /// Track for `sensor`, if the recording had that column.
    pub fn track(&self, sensor: &SensorKind) -> Option<&Track> {
        self.tracks.iter().find(|t| &t.sensor == sensor)
    }
}

type Row = HashMap<String, f64>;

/// Load and prepare a recording.
pub fn load_recording(options: &ReplayOptions) -> AppResult<Recording> {
    let rows = load_rows(&options.path)?;
    Ok(prepare(&rows, options))
}

fn load_rows(path: &Path) -> AppResult<Vec<Row>> {
    if !path.is_file() {
        return Err(DaqError::ReplayFileNotFound(path.to_path_buf()));
    }
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    let is_json_lines = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("jsonl") || e.eq_ignore_ascii_case("ndjson"));
    if is_json_lines {
        Ok(json_rows(&text))
    } else {
        csv_rows(&text)
    }
}

fn json_rows(text: &str) -> Vec<Row> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<Map<String, Value>>(line) {
            Ok(record) => Some(
                record
                    .iter()
                    .map(|(k, v)| (k.clone(), coerce_json(v).unwrap_or(f64::NAN)))
                    .collect(),
            ),
            Err(e) => {
                debug!(error = %e, "skipping malformed record");
                None
            }
        })
        .collect()
}

/// `;` wins when the header holds more semicolons than commas.
fn guess_delimiter(header: &str) -> u8 {
    if header.matches(';').count() > header.matches(',').count() {
        b';'
    } else {
        b','
    }
}

fn csv_rows(text: &str) -> AppResult<Vec<Row>> {
    let header = text.lines().next().unwrap_or_default();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(guess_delimiter(header))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                debug!(error = %e, "skipping malformed row");
                continue;
            }
        };
        rows.push(
            headers
                .iter()
                .zip(record.iter())
                .map(|(name, cell)| (name.to_string(), coerce_str(cell).unwrap_or(f64::NAN)))
                .collect(),
        );
    }
    Ok(rows)
}

/// Build timestamps and tracks from raw rows, trim the warmup and run the
/// batch filters.
pub fn prepare(rows: &[Row], options: &ReplayOptions) -> Recording {
    let config = &options.config;
    let mut t_ms = timestamps(rows, config.default_dt);

    let mut tracks = Vec::new();
    if let Some(raw) = column(rows, &["pressao_volts", "pressao_un"]) {
        let values = raw
            .into_iter()
            .map(|v| options.pressure_calibration.apply(v))
            .collect();
        tracks.push(Track {
            sensor: SensorKind::Pressure,
            values,
        });
    } else if let Some(values) = column(rows, &["pressao_kPa", "pressure"]) {
        tracks.push(Track {
            sensor: SensorKind::Pressure,
            values,
        });
    }
    let channels: [(SensorKind, &[&str]); 5] = [
        (SensorKind::Distance, &["distancia_mm", "distance"]),
        (SensorKind::Temperature, &["temperatura_C", "temperature"]),
        (SensorKind::Humidity, &["umidade", "humidity"]),
        (SensorKind::IrBread, &["IR_pao", "ir_bread"]),
        (SensorKind::IrHand, &["IR_mao", "ir_hand"]),
    ];
    for (sensor, names) in channels {
        if let Some(values) = column(rows, names) {
            tracks.push(Track { sensor, values });
        }
    }

    let start = batch::warmup_start_index(&t_ms, config.warmup);
    if start > 0 {
        debug!(rows = start, "trimming warmup");
        t_ms.drain(..start);
        for track in &mut tracks {
            track.values.drain(..start);
        }
    }

    for track in &mut tracks {
        if track.sensor.is_digital() {
            for v in &mut track.values {
                *v = threshold_digital(*v);
            }
            continue;
        }
        if let Some(range) = options.limits.range_for(&track.sensor) {
            batch::clip_to_range(&mut track.values, range);
        }
        if let Some(window) = config.hampel_window {
            track.values = batch::hampel(&track.values, window, config.hampel_k);
        }
        track.values = batch::smooth(
            &track.values,
            config.smoothing,
            config.window,
            config.ema_alpha,
        );
    }

    Recording { t_ms, tracks }
}

/// First matching column present in any row; missing cells are NaN.
fn column(rows: &[Row], names: &[&str]) -> Option<Vec<f64>> {
    let name = names
        .iter()
        .find(|name| rows.iter().any(|row| row.contains_key(**name)))?;
    Some(
        rows.iter()
            .map(|row| row.get(*name).copied().unwrap_or(f64::NAN))
            .collect(),
    )
}

fn row_timestamp(row: &Row) -> Option<f64> {
    let lookup = |names: &[&str], factor: f64| {
        names
            .iter()
            .filter_map(|name| row.get(*name))
            .find(|v| v.is_finite())
            .map(|v| v * factor)
    };
    lookup(TIMESTAMP_MS_COLUMNS, 1.0).or_else(|| lookup(TIMESTAMP_S_COLUMNS, 1000.0))
}

/// Per-row timestamps in ms. Without any timestamp column rows are spaced
/// `default_dt` apart; a row missing its own timestamp gets the previous one
/// plus `default_dt`.
fn timestamps(rows: &[Row], default_dt: Duration) -> Vec<f64> {
    let dt_ms = default_dt.as_secs_f64() * 1000.0;
    let found: Vec<Option<f64>> = rows.iter().map(row_timestamp).collect();
    if found.iter().all(Option::is_none) {
        return (0..rows.len()).map(|i| i as f64 * dt_ms).collect();
    }
    let mut out = Vec::with_capacity(rows.len());
    let mut prev: Option<f64> = None;
    for t in found {
        let t = match (t, prev) {
            (Some(t), _) => t,
            (None, Some(p)) => p + dt_ms,
            (None, None) => 0.0,
        };
        out.push(t);
        prev = Some(t);
    }
    out
}

/// Online tail of the replay conditioning: deadband and slew per channel.
struct OnlineStage<'a> {
    config: &'a ReplayConfig,
    held: Vec<Option<f64>>,
}

impl<'a> OnlineStage<'a> {
    fn new(config: &'a ReplayConfig, tracks: usize) -> Self {
        Self {
            config,
            held: vec![None; tracks],
        }
    }

    fn deadband_for(&self, sensor: &SensorKind) -> f64 {
        match sensor {
            SensorKind::Temperature => self.config.deadband * TEMPERATURE_DEADBAND_FACTOR,
            _ => self.config.deadband,
        }
    }

    fn slew_for(&self, sensor: &SensorKind) -> f64 {
        match sensor {
            SensorKind::Pressure => self.config.slew_kpa_per_s,
            SensorKind::Distance => self.config.slew_mm_per_s,
            SensorKind::Temperature => self.config.slew_c_per_s,
            _ => 0.0,
        }
    }

    /// Value to emit for track `index`, or `None` to skip it.
    fn step(&mut self, index: usize, sensor: &SensorKind, value: f64, dt_s: f64) -> Option<f64> {
        if sensor.is_continuous() && value.is_finite() {
            let prev = self.held[index];
            let candidate = deadband(prev, value, self.deadband_for(sensor));
            let y = slew_limit(prev, candidate, self.slew_for(sensor), dt_s);
            self.held[index] = Some(y);
            return Some(y);
        }
        if !value.is_nan() {
            return Some(value);
        }
        if *sensor == SensorKind::Temperature {
            if let Some(last) = self.held[index] {
                return Some(last);
            }
        }
        match self.config.nan_policy {
            NanPolicy::Keep => Some(f64::NAN),
            NanPolicy::Drop => None,
        }
    }
}

/// Emit one pass of `recording`. Returns `false` when interrupted by `stop`.
pub async fn play(
    recording: &Recording,
    config: &ReplayConfig,
    pipeline: &IngestionPipeline,
    stop: &StopSignal,
) -> bool {
    let speed = config.speed.max(1e-6);
    let max_gap_ms = config.max_gap.as_secs_f64() * 1000.0;
    let default_dt_s = config.default_dt.as_secs_f64();
    let mut online = OnlineStage::new(config, recording.tracks.len());
    let mut deadline = Instant::now();

    for i in 0..recording.len() {
        let dt_s = if i > 0 {
            let gap_ms = recording.t_ms[i] - recording.t_ms[i - 1];
            let wait_ms = gap_ms.clamp(0.0, max_gap_ms);
            deadline += Duration::from_secs_f64(wait_ms / 1000.0 / speed);
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {}
                _ = stop.triggered() => return false,
            }
            (gap_ms / 1000.0).max(default_dt_s)
        } else {
            default_dt_s
        };
        if stop.is_triggered() {
            return false;
        }

        for (index, track) in recording.tracks.iter().enumerate() {
            if let Some(value) = online.step(index, &track.sensor, track.values[i], dt_s) {
                let reading = Reading::now(config.device_id.clone(), track.sensor.clone(), value);
                pipeline.ingest(reading).await;
            }
        }
    }
    true
}

async fn run(options: ReplayOptions, pipeline: IngestionPipeline, stop: StopSignal) {
    let path = options.path.display().to_string();
    let mut pass = 0u64;
    loop {
        let loaded = {
            let options = options.clone();
            tokio::task::spawn_blocking(move || load_recording(&options)).await
        };
        let recording = match loaded {
            Ok(Ok(recording)) => recording,
            Ok(Err(e)) => {
                error!(path, error = %e, "failed to load recording");
                return;
            }
            Err(e) => {
                error!(path, error = %e, "recording loader panicked");
                return;
            }
        };
        if recording.is_empty() {
            warn!(path, "recording is empty");
            return;
        }

        pass += 1;
        info!(path, pass, rows = recording.len(), "replay pass started");
        if !play(&recording, &options.config, &pipeline, &stop).await {
            return;
        }
        if !options.config.loop_playback {
            info!(path, "replay finished");
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(options.config.loop_pause) => {}
            _ = stop.triggered() => return,
        }
    }
}

/// A running replay.
pub struct ReplaySource {
    path: PathBuf,
    stop: StopSignal,
    task: Option<JoinHandle<()>>,
}

impl ReplaySource {
    /// Start playing `options.path`.
    ///
    /// Fails immediately with [`DaqError::ReplayFileNotFound`] when the file
    /// does not exist.
    pub fn spawn(options: ReplayOptions, pipeline: IngestionPipeline) -> AppResult<Self> {
        if !options.path.is_file() {
            return Err(DaqError::ReplayFileNotFound(options.path));
        }
        let stop = StopSignal::new();
        let path = options.path.clone();
        info!(
            path = %path.display(),
            device_id = %options.config.device_id,
            speed = options.config.speed,
            looping = options.config.loop_playback,
            "replay source started"
        );
        let task = tokio::spawn(run(options, pipeline, stop.clone()));
        Ok(Self {
            path,
            stop,
            task: Some(task),
        })
    }

    /// Recording being played.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once playback ended on its own or after a stop.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal the replay and wait up to `timeout` for it to exit.
    pub async fn stop(mut self, timeout: Duration) -> AppResult<()> {
        self.stop.trigger();
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(())) => {
                info!(path = %self.path.display(), "replay source stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(error = %e, "replay task panicked");
                Ok(())
            }
            Err(_) => Err(DaqError::StopTimeout(timeout)),
        }
    }
}

impl Drop for ReplaySource {
    fn drop(&mut self) {
        self.stop.trigger();
    }
}
