//! Command surface: start, stop and inspect the single active ingest source.
use crate::config::Settings;
use crate::error::{AppResult, DaqError};
use crate::pipeline::IngestionPipeline;
use crate::source::live::{LiveOptions, LiveSource};
use crate::source::replay::{ReplayOptions, ReplaySource};
use crate::source::transport::{SerialTransportFactory, TransportFactory};
use crate::source::SourceKind;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Snapshot returned by [`SourceManager::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStatus {
    /// A source task is alive.
    pub running: bool,
    /// Which one, when `running`.
    pub source: Option<SourceKind>,
}

enum ActiveSource {
    Live(LiveSource),
    Replay(ReplaySource),
}

impl ActiveSource {
    fn kind(&self) -> SourceKind {
        match self {
            ActiveSource::Live(_) => SourceKind::Live,
            ActiveSource::Replay(_) => SourceKind::Replay,
        }
    }

    fn is_finished(&self) -> bool {
        match self {
            ActiveSource::Live(source) => source.is_finished(),
            ActiveSource::Replay(source) => source.is_finished(),
        }
    }

    async fn stop(self, timeout: std::time::Duration) -> AppResult<()> {
        match self {
            ActiveSource::Live(source) => source.stop(timeout).await,
            ActiveSource::Replay(source) => source.stop(timeout).await,
        }
    }
}

/// Owns the active ingest source. At most one source, of either kind, runs
/// at any time; starting a second one fails with [`DaqError::SourceConflict`].
///
/// All methods must be called from within a tokio runtime.
pub struct SourceManager {
    settings: Arc<Settings>,
    pipeline: IngestionPipeline,
    transports: Arc<dyn TransportFactory>,
    active: Mutex<Option<ActiveSource>>,
}

impl SourceManager {
    /// Manager whose live sources use real serial ports.
    pub fn new(settings: Arc<Settings>, pipeline: IngestionPipeline) -> Self {
        Self::with_transport(settings, pipeline, Arc::new(SerialTransportFactory))
    }

    /// Same as [`SourceManager::new`] with an injected transport factory.
    pub fn with_transport(
        settings: Arc<Settings>,
        pipeline: IngestionPipeline,
        transports: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            settings,
            pipeline,
            transports,
            active: Mutex::new(None),
        }
    }

    /// Start reading from `port`. `baud` and `device_id` default to the
    /// `[live]` configuration.
    pub fn start_live(
        &self,
        port: &str,
        baud: Option<u32>,
        device_id: Option<&str>,
    ) -> AppResult<()> {
        let mut active = self.active.lock();
        check_idle(&mut active, SourceKind::Live)?;

        let live = &self.settings.live;
        let options = LiveOptions::from_settings(
            &self.settings,
            port,
            baud.unwrap_or(live.baud),
            device_id.unwrap_or(&live.device_id),
        );
        let source = LiveSource::spawn(options, self.transports.clone(), self.pipeline.clone())?;
        *active = Some(ActiveSource::Live(source));
        Ok(())
    }

    /// Stop the running live source.
    ///
    /// Fails with [`DaqError::NotRunning`] when no live source is active.
    pub async fn stop_live(&self) -> AppResult<()> {
        self.stop_kind(SourceKind::Live).await
    }

    /// Start replaying `path`. Unset arguments default to the `[replay]`
    /// configuration.
    pub fn start_replay(
        &self,
        path: impl Into<PathBuf>,
        device_id: Option<&str>,
        loop_playback: Option<bool>,
        speed: Option<f64>,
    ) -> AppResult<()> {
        let mut active = self.active.lock();
        check_idle(&mut active, SourceKind::Replay)?;

        let mut options = ReplayOptions::from_settings(&self.settings, path);
        if let Some(device_id) = device_id {
            options = options.with_device_id(device_id);
        }
        if let Some(loop_playback) = loop_playback {
            options = options.with_loop(loop_playback);
        }
        if let Some(speed) = speed {
            if !(speed.is_finite() && speed > 0.0) {
                return Err(DaqError::Configuration(format!(
                    "replay speed must be positive, got {speed}"
                )));
            }
            options = options.with_speed(speed);
        }
        let source = ReplaySource::spawn(options, self.pipeline.clone())?;
        *active = Some(ActiveSource::Replay(source));
        Ok(())
    }

    /// Stop the running replay.
    pub async fn stop_replay(&self) -> AppResult<()> {
        self.stop_kind(SourceKind::Replay).await
    }

    /// Whether a source is running, and which.
    pub fn status(&self) -> SourceStatus {
        let active = self.active.lock();
        match active.as_ref() {
            Some(source) if !source.is_finished() => SourceStatus {
                running: true,
                source: Some(source.kind()),
            },
            _ => SourceStatus {
                running: false,
                source: None,
            },
        }
    }

    /// Stop whatever is running. Used on shutdown.
    pub async fn stop_all(&self) -> AppResult<()> {
        let taken = self.active.lock().take();
        match taken {
            Some(source) => source.stop(self.settings.manager.stop_timeout).await,
            None => Ok(()),
        }
    }

    async fn stop_kind(&self, kind: SourceKind) -> AppResult<()> {
        let taken = {
            let mut active = self.active.lock();
            match active.as_ref() {
                Some(source) if source.kind() == kind => active.take(),
                _ => None,
            }
        };
        let Some(source) = taken else {
            return Err(DaqError::NotRunning(kind.as_str()));
        };
        info!(source = %kind, "stopping source");
        source.stop(self.settings.manager.stop_timeout).await
    }
}

/// Reject a start while another source is still running; a source that has
/// already finished on its own is discarded.
fn check_idle(active: &mut Option<ActiveSource>, requested: SourceKind) -> AppResult<()> {
    match active.as_ref() {
        Some(source) if !source.is_finished() => Err(DaqError::SourceConflict {
            requested: requested.as_str(),
            active: source.kind().as_str(),
        }),
        _ => {
            *active = None;
            Ok(())
        }
    }
}
