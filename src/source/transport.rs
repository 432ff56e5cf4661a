//! Blocking line transports for the live source.
//!
//! The live source's worker thread owns exactly one [`LineTransport`] at a
//! time. Transports are created through a [`TransportFactory`] so the reconnect
//! loop can reopen them, and so tests can substitute an in-memory device.
use crate::error::{AppResult, DaqError};
use crate::source::StopSignal;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A line-oriented, blocking byte stream.
pub trait LineTransport: Send {
    /// Read the next complete line without its terminator.
    ///
    /// Returns `Ok(None)` when the read timeout expired before a full line
    /// arrived; partial data is kept for the next call. Any `Err` means the
    /// transport is unusable and must be reopened.
    fn read_line(&mut self) -> AppResult<Option<String>>;
}

/// Opens transports for a port.
pub trait TransportFactory: Send + Sync {
    /// Open `port`; errors are retried by the reader after the reconnect delay.
    fn open(&self, port: &str, baud: u32, read_timeout: Duration)
        -> AppResult<Box<dyn LineTransport>>;
}

/// Serial ports via the `serialport` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialTransportFactory;

#[cfg(feature = "instrument_serial")]
mod serial {
    use super::*;
    use std::io::{BufRead, BufReader, ErrorKind};

    pub(super) struct SerialTransport {
        reader: BufReader<Box<dyn serialport::SerialPort>>,
        pending: Vec<u8>,
    }

    impl LineTransport for SerialTransport {
        fn read_line(&mut self) -> AppResult<Option<String>> {
            match self.reader.read_until(b'\n', &mut self.pending) {
                Ok(0) => Err(DaqError::Serial("port closed".to_string())),
                Ok(_) if self.pending.ends_with(b"\n") => {
                    let line = String::from_utf8_lossy(&self.pending).trim().to_string();
                    self.pending.clear();
                    Ok(Some(line))
                }
                Ok(_) => Ok(None),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    Ok(None)
                }
                Err(e) => Err(DaqError::Serial(e.to_string())),
            }
        }
    }

    pub(super) fn open(
        port: &str,
        baud: u32,
        read_timeout: Duration,
    ) -> AppResult<Box<dyn LineTransport>> {
        let handle = serialport::new(port, baud)
            .timeout(read_timeout)
            .open()
            .map_err(|e| DaqError::Serial(format!("failed to open '{port}': {e}")))?;
        Ok(Box::new(SerialTransport {
            reader: BufReader::new(handle),
            pending: Vec::new(),
        }))
    }
}

impl TransportFactory for SerialTransportFactory {
    #[cfg(feature = "instrument_serial")]
    fn open(
        &self,
        port: &str,
        baud: u32,
        read_timeout: Duration,
    ) -> AppResult<Box<dyn LineTransport>> {
        serial::open(port, baud, read_timeout)
    }

    #[cfg(not(feature = "instrument_serial"))]
    fn open(
        &self,
        _port: &str,
        _baud: u32,
        _read_timeout: Duration,
    ) -> AppResult<Box<dyn LineTransport>> {
        Err(DaqError::SerialFeatureDisabled)
    }
}

/// Where and how the worker connects.
#[derive(Debug, Clone)]
pub struct ReaderSettings {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port: String,
    /// Line rate.
    pub baud: u32,
    /// Per-read timeout; a timeout is not an error.
    pub read_timeout: Duration,
    /// Pause between failed open attempts.
    pub reconnect_delay: Duration,
}

/// Body of the live source's worker thread.
///
/// Opens the transport, forwards every line over `lines` and reopens after a
/// fixed delay whenever opening or reading fails. Returns once `stop` is
/// triggered or the receiving side has gone away.
pub fn run_reader(
    factory: &dyn TransportFactory,
    settings: &ReaderSettings,
    stop: &StopSignal,
    lines: &mpsc::Sender<String>,
) {
    let port = settings.port.as_str();
    while !stop.is_triggered() {
        match factory.open(port, settings.baud, settings.read_timeout) {
            Ok(mut transport) => {
                info!(port, baud = settings.baud, "transport opened");
                loop {
                    if stop.is_triggered() {
                        return;
                    }
                    match transport.read_line() {
                        Ok(Some(line)) => {
                            if line.is_empty() {
                                continue;
                            }
                            if lines.blocking_send(line).is_err() {
                                debug!(port, "line receiver dropped, worker exiting");
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(port, error = %e, "transport read failed");
                            break;
                        }
                    }
                }
            }
            Err(DaqError::SerialFeatureDisabled) => {
                warn!(port, "{}", DaqError::SerialFeatureDisabled);
                return;
            }
            Err(e) => warn!(port, error = %e, "transport open failed"),
        }
        if lines.is_closed() {
            return;
        }
        info!(port, delay = ?settings.reconnect_delay, "reconnecting");
        sleep_unless_stopped(settings.reconnect_delay, stop);
    }
}

fn sleep_unless_stopped(delay: Duration, stop: &StopSignal) {
    const SLICE: Duration = Duration::from_millis(20);
    let deadline = Instant::now() + delay;
    while !stop.is_triggered() {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep(SLICE.min(deadline - now));
    }
}
