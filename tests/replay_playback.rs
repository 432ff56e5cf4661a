//! Replay engine: timing reconstruction, determinism and lifecycle.

mod common;

use common::{wait_for, CollectingSink};
use press_daq::config::{NanPolicy, ReplayConfig, Settings, SmoothingKind};
use press_daq::error::DaqError;
use press_daq::hub::BroadcastHub;
use press_daq::pipeline::IngestionPipeline;
use press_daq::reading::SensorKind;
use press_daq::source::replay::{load_recording, ReplayOptions, ReplaySource};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn pipeline(sink: Arc<CollectingSink>) -> IngestionPipeline {
    IngestionPipeline::new(
        sink,
        BroadcastHub::new(Duration::ZERO, Duration::from_secs(30)),
    )
}

/// Replay settings with every batch and online stage disabled.
fn plain_config() -> ReplayConfig {
    ReplayConfig {
        loop_playback: false,
        warmup: Duration::ZERO,
        hampel_window: None,
        smoothing: SmoothingKind::None,
        deadband: 0.0,
        slew_kpa_per_s: 0.0,
        slew_mm_per_s: 0.0,
        slew_c_per_s: 0.0,
        ..ReplayConfig::default()
    }
}

fn options(path: &Path, config: ReplayConfig) -> ReplayOptions {
    let mut options = ReplayOptions::from_settings(&Settings::default(), path);
    options.config = config;
    options
}

fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).expect("create recording");
    file.write_all(contents.as_bytes()).expect("write recording");
    path
}

async fn play_to_end(options: ReplayOptions) -> Arc<CollectingSink> {
    let sink = Arc::new(CollectingSink::default());
    let source = ReplaySource::spawn(options, pipeline(sink.clone())).expect("spawn replay");
    assert!(wait_for(Duration::from_secs(600), || source.is_finished()).await);
    sink
}

#[tokio::test(start_paused = true)]
async fn test_replay_reconstructs_timing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(
        &dir,
        "session.csv",
        "ts,distancia_mm\n0,10\n1000,20\n3000,30\n10000,40\n",
    );
    let config = ReplayConfig {
        speed: 2.0,
        ..plain_config()
    };

    let sink = play_to_end(options(&path, config)).await;

    assert_eq!(sink.values(&SensorKind::Distance), vec![10.0, 20.0, 30.0, 40.0]);
    let times = sink.times(&SensorKind::Distance);
    let offsets: Vec<Duration> = times.iter().map(|t| *t - times[0]).collect();
    // 1 s and 2 s gaps at 2x; the 7 s gap is capped at 5 s first
    assert_eq!(
        offsets,
        vec![
            Duration::ZERO,
            Duration::from_millis(500),
            Duration::from_millis(1500),
            Duration::from_millis(4000),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_replay_is_deterministic() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut csv = String::from("timestamp_ms;pressao_kPa;temperatura_C;IR_pao\n");
    for i in 0..60 {
        let pressure = if i == 30 { 9_000.0 } else { 100.0 + f64::from(i % 7) };
        let temperature = if i % 11 == 0 { String::new() } else { format!("{},5", 170 + i) };
        csv.push_str(&format!("{};{};{};{}\n", i * 500, pressure, temperature, i % 2));
    }
    let path = write_file(&dir, "session.csv", &csv);
    let config = ReplayConfig {
        loop_playback: false,
        speed: 8.0,
        ..ReplayConfig::default()
    };

    let first = play_to_end(options(&path, config.clone())).await;
    let second = play_to_end(options(&path, config)).await;

    let bits = |sink: &CollectingSink| -> Vec<(String, u64)> {
        sink.readings
            .lock()
            .iter()
            .map(|(_, r)| (r.sensor.to_string(), r.value.to_bits()))
            .collect()
    };
    assert!(first.len() > 100);
    assert_eq!(bits(&first), bits(&second));

    // The 9000 kPa sample is out of range and never reaches the output.
    assert!(first
        .values(&SensorKind::Pressure)
        .iter()
        .all(|v| v.is_nan() || *v < 200.0));
}

#[tokio::test(start_paused = true)]
async fn test_nan_policy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(
        &dir,
        "gaps.jsonl",
        "{\"ts\":0,\"distancia_mm\":5,\"temperatura_C\":180}\n\
         {\"ts\":500,\"distancia_mm\":null,\"temperatura_C\":null}\n\
         {\"ts\":1000,\"distancia_mm\":7,\"temperatura_C\":181}\n",
    );

    let kept = play_to_end(options(&path, plain_config())).await;
    let distances = kept.values(&SensorKind::Distance);
    assert_eq!(distances.len(), 3);
    assert!(distances[1].is_nan());
    // temperature holds its last value instead of going NaN
    assert_eq!(kept.values(&SensorKind::Temperature), vec![180.0, 180.0, 181.0]);

    let dropped = play_to_end(options(
        &path,
        ReplayConfig {
            nan_policy: NanPolicy::Drop,
            ..plain_config()
        },
    ))
    .await;
    assert_eq!(dropped.values(&SensorKind::Distance), vec![5.0, 7.0]);
}

#[tokio::test(start_paused = true)]
async fn test_loop_restarts_until_stopped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(&dir, "short.csv", "ts,distancia_mm\n0,1\n500,2\n");
    let config = ReplayConfig {
        loop_playback: true,
        ..plain_config()
    };

    let sink = Arc::new(CollectingSink::default());
    let source =
        ReplaySource::spawn(options(&path, config), pipeline(sink.clone())).expect("spawn replay");
    assert!(wait_for(Duration::from_secs(60), || sink.len() >= 6).await);
    assert!(!source.is_finished());

    source
        .stop(Duration::from_secs(3))
        .await
        .expect("stop within timeout");
    let values = sink.values(&SensorKind::Distance);
    assert_eq!(&values[..4], &[1.0, 2.0, 1.0, 2.0]);
}

#[tokio::test(start_paused = true)]
async fn test_empty_file_finishes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(&dir, "empty.csv", "ts,distancia_mm\n");
    let sink = play_to_end(options(&path, plain_config())).await;
    assert_eq!(sink.len(), 0);
}

#[tokio::test]
async fn test_missing_file_rejected() {
    let sink = Arc::new(CollectingSink::default());
    let result = ReplaySource::spawn(
        options(Path::new("/no/such/recording.csv"), plain_config()),
        pipeline(sink),
    );
    assert!(matches!(result, Err(DaqError::ReplayFileNotFound(_))));
}

#[test]
fn test_warmup_trim_and_synthetic_timestamps() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut csv = String::from("distancia_mm\n");
    for i in 0..12 {
        csv.push_str(&format!("{}\n", i * 10));
    }
    let path = write_file(&dir, "no_ts.csv", &csv);
    let config = ReplayConfig {
        warmup: Duration::from_secs(4),
        ..plain_config()
    };

    let recording = load_recording(&options(&path, config)).expect("load");
    // rows are 500 ms apart; the first 8 fall inside the warmup
    assert_eq!(recording.len(), 4);
    assert_eq!(recording.t_ms[0], 4000.0);
    assert_eq!(
        recording.track(&SensorKind::Distance).expect("distance").values,
        vec![80.0, 90.0, 100.0, 110.0]
    );
}
