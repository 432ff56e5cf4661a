//! Reading sinks: durable history plus a latest-value table.
use crate::error::{AppResult, DaqError};
use crate::reading::{Reading, SensorKind};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Accepts one conditioned reading and records it.
#[async_trait]
pub trait ReadingSink: Send + Sync {
    /// Store one reading.
    async fn record(&self, reading: &Reading) -> AppResult<()>;
}

/// Most recent reading per (device, sensor).
#[derive(Debug, Default)]
pub struct LatestValues {
    table: RwLock<HashMap<String, HashMap<SensorKind, Reading>>>,
}

impl LatestValues {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored reading for its (device, sensor).
    pub fn update(&self, reading: &Reading) {
        self.table
            .write()
            .entry(reading.device_id.clone())
            .or_default()
            .insert(reading.sensor.clone(), reading.clone());
    }

    /// Latest reading for one channel.
    pub fn latest(&self, device_id: &str, sensor: &SensorKind) -> Option<Reading> {
        self.table.read().get(device_id)?.get(sensor).cloned()
    }

    /// Every channel's latest reading for one device, ordered by sensor name.
    pub fn latest_for_device(&self, device_id: &str) -> Vec<Reading> {
        let table = self.table.read();
        let mut readings: Vec<Reading> = table
            .get(device_id)
            .map(|sensors| sensors.values().cloned().collect())
            .unwrap_or_default();
        readings.sort_by(|a, b| a.sensor.as_str().cmp(b.sensor.as_str()));
        readings
    }
}

#[async_trait]
impl ReadingSink for LatestValues {
    async fn record(&self, reading: &Reading) -> AppResult<()> {
        self.update(reading);
        Ok(())
    }
}

/// Appends every reading to `{output_dir}/{device}__{sensor}.csv` and keeps
/// the latest-value table current.
///
/// Files are opened in append mode on first use; the `ts,value,unit` header is
/// written only when the file is new. NaN values are stored as empty cells.
pub struct CsvReadingSink {
    output_dir: PathBuf,
    writers: Mutex<HashMap<(String, SensorKind), csv::Writer<File>>>,
    latest: Arc<LatestValues>,
}

impl CsvReadingSink {
    /// Creates `output_dir` if needed.
    pub fn new(output_dir: impl Into<PathBuf>) -> AppResult<Self> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir).map_err(|e| {
            DaqError::Storage(format!(
                "failed to create '{}': {e}",
                output_dir.display()
            ))
        })?;
        tracing::info!(path = %output_dir.display(), "CSV sink ready");
        Ok(Self {
            output_dir,
            writers: Mutex::new(HashMap::new()),
            latest: Arc::new(LatestValues::new()),
        })
    }

    /// Table updated alongside every appended row.
    pub fn latest(&self) -> Arc<LatestValues> {
        self.latest.clone()
    }

    /// Path of the history file for a (device, sensor) pair.
    pub fn file_path(&self, device_id: &str, sensor: &SensorKind) -> PathBuf {
        self.output_dir.join(format!(
            "{}__{}.csv",
            sanitize(device_id),
            sanitize(sensor.as_str())
        ))
    }

    fn open_writer(path: &Path) -> AppResult<csv::Writer<File>> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let is_new = file.metadata()?.len() == 0;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_new {
            writer.write_record(["ts", "value", "unit"])?;
        }
        Ok(writer)
    }
}

#[async_trait]
impl ReadingSink for CsvReadingSink {
    async fn record(&self, reading: &Reading) -> AppResult<()> {
        {
            let mut writers = self.writers.lock();
            let key = (reading.device_id.clone(), reading.sensor.clone());
            let writer = match writers.entry(key) {
                std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::hash_map::Entry::Vacant(e) => {
                    let path = self.file_path(&reading.device_id, &reading.sensor);
                    tracing::debug!(path = %path.display(), "opening history file");
                    e.insert(Self::open_writer(&path)?)
                }
            };
            let value = if reading.value.is_nan() {
                String::new()
            } else {
                reading.value.to_string()
            };
            writer.write_record([
                reading
                    .timestamp
                    .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                value,
                reading.unit.clone().unwrap_or_default(),
            ])?;
            writer.flush()?;
        }
        self.latest.update(reading);
        Ok(())
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_one_file_per_channel() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvReadingSink::new(dir.path()).unwrap();

        sink.record(&Reading::now("press/1", SensorKind::Pressure, 120.5))
            .await
            .unwrap();
        sink.record(&Reading::now("press/1", SensorKind::Pressure, f64::NAN))
            .await
            .unwrap();
        sink.record(&Reading::now("press/1", SensorKind::Temperature, 180.0))
            .await
            .unwrap();

        let pressure = std::fs::read_to_string(dir.path().join("press_1__pressure.csv")).unwrap();
        let lines: Vec<&str> = pressure.lines().collect();
        assert_eq!(lines[0], "ts,value,unit");
        assert!(lines[1].ends_with(",120.5,kPa"));
        assert!(lines[2].ends_with(",,kPa"));
        assert!(dir.path().join("press_1__temperature.csv").exists());
    }

    #[tokio::test]
    async fn appends_without_repeating_header() {
        let dir = tempfile::tempdir().unwrap();
        for _ in 0..2 {
            let sink = CsvReadingSink::new(dir.path()).unwrap();
            sink.record(&Reading::now("a", SensorKind::Distance, 10.0))
                .await
                .unwrap();
        }
        let text = std::fs::read_to_string(dir.path().join("a__distance.csv")).unwrap();
        assert_eq!(text.matches("ts,value,unit").count(), 1);
        assert_eq!(text.lines().count(), 3);
    }

    #[tokio::test]
    async fn latest_values_track_each_channel() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvReadingSink::new(dir.path()).unwrap();
        let latest = sink.latest();

        sink.record(&Reading::now("a", SensorKind::Pressure, 1.0))
            .await
            .unwrap();
        sink.record(&Reading::now("a", SensorKind::Pressure, 2.0))
            .await
            .unwrap();
        sink.record(&Reading::now("a", SensorKind::Distance, 5.0))
            .await
            .unwrap();

        assert_eq!(latest.latest("a", &SensorKind::Pressure).unwrap().value, 2.0);
        assert!(latest.latest("b", &SensorKind::Pressure).is_none());
        let all = latest.latest_for_device("a");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].sensor, SensorKind::Distance);
    }
}
