//! Live source against a scripted serial device.

mod common;

use common::{wait_for, CollectingSink, MemoryTransportFactory, DISCONNECT};
use press_daq::config::Settings;
use press_daq::hub::BroadcastHub;
use press_daq::pipeline::IngestionPipeline;
use press_daq::reading::SensorKind;
use press_daq::source::live::{LiveOptions, LiveSource};
use std::sync::Arc;
use std::time::Duration;

fn options(port: &str) -> LiveOptions {
    let mut settings = Settings::default();
    settings.live.filter.enabled = false;
    settings.live.read_timeout = Duration::from_millis(20);
    settings.live.reconnect_delay = Duration::from_millis(50);
    LiveOptions::from_settings(&settings, port, 115_200, "bench-01")
}

fn spawn(
    port: &str,
    factory: Arc<MemoryTransportFactory>,
) -> (LiveSource, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::default());
    let pipeline = IngestionPipeline::new(
        sink.clone(),
        BroadcastHub::new(Duration::ZERO, Duration::from_secs(30)),
    );
    let source = LiveSource::spawn(options(port), factory, pipeline).expect("spawn live source");
    (source, sink)
}

#[tokio::test]
async fn test_lines_reach_sink_in_order() {
    let factory = Arc::new(MemoryTransportFactory::new(vec![vec![
        r#"{"distancia_mm":10}"#,
        "garbage",
        "[1][DISTANCIA][11 mm]",
        r#"{"distancia_mm":12,"IR_pao":0}"#,
    ]]));
    let (source, sink) = spawn("/dev/ttyTEST0", factory.clone());

    assert!(wait_for(Duration::from_secs(5), || sink.len() >= 4).await);
    assert_eq!(sink.values(&SensorKind::Distance), vec![10.0, 11.0, 12.0]);
    assert_eq!(sink.values(&SensorKind::IrBread), vec![0.0]);
    assert!(sink
        .readings
        .lock()
        .iter()
        .all(|(_, r)| r.device_id == "bench-01"));
    assert_eq!(source.port(), "/dev/ttyTEST0");
    assert_eq!(*factory.opened_ports.lock(), vec!["/dev/ttyTEST0".to_string()]);

    source
        .stop(Duration::from_secs(2))
        .await
        .expect("stop within timeout");
}

#[tokio::test]
async fn test_reconnects_after_transport_error() {
    let factory = Arc::new(MemoryTransportFactory::new(vec![
        vec![r#"{"distancia_mm":1}"#, DISCONNECT],
        vec![r#"{"distancia_mm":2}"#],
    ]));
    let (source, sink) = spawn("COM7", factory.clone());

    assert!(wait_for(Duration::from_secs(5), || sink.len() >= 2).await);
    assert_eq!(sink.values(&SensorKind::Distance), vec![1.0, 2.0]);
    assert_eq!(factory.opened_ports.lock().len(), 2);

    source
        .stop(Duration::from_secs(2))
        .await
        .expect("stop within timeout");
}

#[tokio::test]
async fn test_stop_while_device_missing() {
    // every open fails, so the worker sits in its reconnect loop
    let factory = Arc::new(MemoryTransportFactory::new(Vec::new()));
    let (source, sink) = spawn("/dev/ttyNONE", factory.clone());

    assert!(wait_for(Duration::from_secs(5), || factory.opened_ports.lock().len() >= 2).await);
    assert!(!source.is_finished());

    source
        .stop(Duration::from_secs(2))
        .await
        .expect("stop within timeout");
    assert_eq!(sink.len(), 0);
}
