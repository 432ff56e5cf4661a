//! Ingest sources.
//!
//! A source turns raw device output into conditioned [`crate::reading::Reading`]s
//! and hands them to the [`crate::pipeline::IngestionPipeline`]. Two kinds exist:
//!
//! - [`live::LiveSource`]: a serial device read by a dedicated OS thread
//! - [`replay::ReplaySource`]: a recorded CSV/JSONL file played back on the tokio runtime
//!
//! At most one source runs at a time; [`crate::manager::SourceManager`] enforces that.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

pub mod live;
pub mod parse;
pub mod replay;
pub mod transport;

/// Which kind of ingest source is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Serial device.
    Live,
    /// Recorded CSV file.
    Replay,
}

impl SourceKind {
    /// Lower-case name used in status output.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Live => "live",
            SourceKind::Replay => "replay",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stop request shared between a source's owner, its async task and (for the
/// live source) its blocking worker thread.
///
/// The flag is a plain atomic so the worker thread can poll it between reads;
/// async waiters are woken through a [`Notify`].
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopSignal {
    /// Untriggered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Idempotent.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether [`StopSignal::trigger`] has been called.
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once [`StopSignal::trigger`] has been called.
    pub async fn triggered(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn stop_signal_wakes_waiter() {
        let stop = StopSignal::new();
        let waiter = {
            let stop = stop.clone();
            tokio::spawn(async move { stop.triggered().await })
        };
        tokio::task::yield_now().await;
        stop.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(stop.is_triggered());
    }

    #[tokio::test]
    async fn already_triggered_resolves_immediately() {
        let stop = StopSignal::new();
        stop.trigger();
        stop.triggered().await;
    }
}
