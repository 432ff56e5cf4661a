//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use press_daq::error::{AppResult, DaqError};
use press_daq::hub::SubscriberConnection;
use press_daq::reading::{Reading, SensorKind};
use press_daq::sink::ReadingSink;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Sink that remembers every reading together with the (tokio) time it arrived.
#[derive(Default)]
pub struct CollectingSink {
    pub readings: Mutex<Vec<(Instant, Reading)>>,
}

impl CollectingSink {
    pub fn values(&self, sensor: &SensorKind) -> Vec<f64> {
        self.readings
            .lock()
            .iter()
            .filter(|(_, r)| &r.sensor == sensor)
            .map(|(_, r)| r.value)
            .collect()
    }

    pub fn times(&self, sensor: &SensorKind) -> Vec<Instant> {
        self.readings
            .lock()
            .iter()
            .filter(|(_, r)| &r.sensor == sensor)
            .map(|(t, _)| *t)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.readings.lock().len()
    }
}

#[async_trait]
impl ReadingSink for CollectingSink {
    async fn record(&self, reading: &Reading) -> AppResult<()> {
        self.readings.lock().push((Instant::now(), reading.clone()));
        Ok(())
    }
}

/// Subscriber connection that records what it was sent.
#[derive(Default)]
pub struct RecordingConnection {
    pub sent: Mutex<Vec<(Instant, String)>>,
    pub closed: AtomicBool,
    pub fail_sends: AtomicBool,
    /// When set, every later write hangs forever.
    pub stall: AtomicBool,
    pub delay: Option<Duration>,
}

impl RecordingConnection {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn ingest_count(&self) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|(_, m)| m.contains("\"event\":\"ingest\""))
            .count()
    }

    pub fn ingest_times(&self) -> Vec<Instant> {
        self.sent
            .lock()
            .iter()
            .filter(|(_, m)| m.contains("\"event\":\"ingest\""))
            .map(|(t, _)| *t)
            .collect()
    }
}

#[async_trait]
impl SubscriberConnection for RecordingConnection {
    async fn send_text(&self, text: String) -> AppResult<()> {
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(DaqError::SubscriberDisconnected);
        }
        self.sent.lock().push((Instant::now(), text));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

/// Line a scripted session treats as a dropped connection.
pub const DISCONNECT: &str = "<disconnect>";

/// Scripted serial device: each `open` hands out the next batch of lines.
pub struct MemoryTransportFactory {
    sessions: Mutex<VecDeque<Vec<String>>>,
    pub opened_ports: Mutex<Vec<String>>,
}

impl MemoryTransportFactory {
    pub fn new(sessions: Vec<Vec<&str>>) -> Self {
        Self {
            sessions: Mutex::new(
                sessions
                    .into_iter()
                    .map(|lines| lines.into_iter().map(str::to_string).collect())
                    .collect(),
            ),
            opened_ports: Mutex::new(Vec::new()),
        }
    }
}

struct MemoryTransport {
    lines: VecDeque<String>,
    read_timeout: Duration,
}

impl press_daq::source::transport::LineTransport for MemoryTransport {
    fn read_line(&mut self) -> AppResult<Option<String>> {
        match self.lines.pop_front() {
            Some(line) if line == DISCONNECT => Err(DaqError::Serial("device unplugged".into())),
            Some(line) => Ok(Some(line)),
            None => {
                std::thread::sleep(self.read_timeout);
                Ok(None)
            }
        }
    }
}

impl press_daq::source::transport::TransportFactory for MemoryTransportFactory {
    fn open(
        &self,
        port: &str,
        _baud: u32,
        read_timeout: Duration,
    ) -> AppResult<Box<dyn press_daq::source::transport::LineTransport>> {
        self.opened_ports.lock().push(port.to_string());
        match self.sessions.lock().pop_front() {
            Some(lines) => Ok(Box::new(MemoryTransport {
                lines: lines.into(),
                read_timeout,
            })),
            None => Err(DaqError::Serial(format!("no device on {port}"))),
        }
    }
}

/// Poll `cond` on the tokio clock until it holds or `limit` elapses.
pub async fn wait_for(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Let spawned tasks run without advancing the (paused) clock.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}
