//! Ingestion pipeline: the single entry point for conditioned readings.
use crate::hub::BroadcastHub;
use crate::reading::Reading;
use crate::sink::ReadingSink;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, warn};

/// Forwards every reading to the sink and then to the hub.
///
/// The two collaborators are isolated from each other: an error or a panic in
/// one is logged and the other still receives the reading. `ingest` itself
/// never fails.
#[derive(Clone)]
pub struct IngestionPipeline {
    sink: Arc<dyn ReadingSink>,
    hub: BroadcastHub,
}

impl IngestionPipeline {
    /// Pipeline writing to `sink` and publishing to `hub`.
    pub fn new(sink: Arc<dyn ReadingSink>, hub: BroadcastHub) -> Self {
        Self { sink, hub }
    }

    /// Hub the pipeline publishes to.
    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    /// Record `reading` in the sink, then publish it.
    ///
    /// Sink errors and panics are logged and do not stop the publish.
    pub async fn ingest(&self, reading: Reading) {
        match AssertUnwindSafe(self.sink.record(&reading))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                device_id = %reading.device_id,
                sensor = %reading.sensor,
                error = %e,
                "sink rejected reading"
            ),
            Err(_) => error!(
                device_id = %reading.device_id,
                sensor = %reading.sensor,
                "sink panicked while recording reading"
            ),
        }

        if AssertUnwindSafe(self.hub.publish(&reading))
            .catch_unwind()
            .await
            .is_err()
        {
            error!(
                device_id = %reading.device_id,
                sensor = %reading.sensor,
                "hub panicked while publishing reading"
            );
        }
    }
}
