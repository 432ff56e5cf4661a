//! Broadcast hub: fans conditioned readings out to live subscribers.
//!
//! Each subscriber has an interest set ([`DeviceFilter`]), a bounded outbound
//! queue and a writer task that owns the connection. Publishing only enqueues,
//! so a slow or stalled connection delays nobody but itself. The writer
//! spaces messages at least `min_send_interval` apart and sends a keepalive
//! after `keepalive_interval` of silence. An overflowing queue or a failed or
//! timed-out write removes the subscriber.
use crate::config::HubConfig;
use crate::error::{AppResult, DaqError};
use crate::reading::Reading;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod protocol;
pub mod server;

pub use protocol::ServerMessage;

/// Transport half of one subscriber, e.g. a TCP or WebSocket connection.
#[async_trait]
pub trait SubscriberConnection: Send + Sync {
    /// Deliver one complete message.
    async fn send_text(&self, text: String) -> AppResult<()>;

    /// Whether the peer is still reachable.
    fn is_connected(&self) -> bool;

    /// Called once when the hub drops this subscriber.
    fn close(&self) {}
}

/// Which devices a subscriber wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeviceFilter {
    /// Every device.
    #[default]
    All,
    /// Only these device ids.
    Devices(BTreeSet<String>),
}

impl DeviceFilter {
    /// Parse a comma-separated device list; blank input or `all` means every device.
    pub fn parse(text: &str) -> Self {
        let devices: BTreeSet<String> = text
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .collect();
        if devices.is_empty() || (devices.len() == 1 && devices.contains("all")) {
            DeviceFilter::All
        } else {
            DeviceFilter::Devices(devices)
        }
    }

    /// Whether readings from `device_id` pass this filter.
    pub fn matches(&self, device_id: &str) -> bool {
        match self {
            DeviceFilter::All => true,
            DeviceFilter::Devices(set) => set.contains(device_id),
        }
    }
}

impl fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceFilter::All => f.write_str("all"),
            DeviceFilter::Devices(set) => {
                let joined: Vec<&str> = set.iter().map(String::as_str).collect();
                f.write_str(&joined.join(","))
            }
        }
    }
}

/// Identifies one subscription.
pub type SubscriberId = Uuid;

/// Outbound queue length used by [`BroadcastHub::new`].
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Per-write bound used by [`BroadcastHub::new`].
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

struct Subscriber {
    id: SubscriberId,
    filter: DeviceFilter,
    connection: Arc<dyn SubscriberConnection>,
    outbox: mpsc::Sender<String>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

struct HubInner {
    subscribers: RwLock<HashMap<SubscriberId, Arc<Subscriber>>>,
    min_send_interval: Duration,
    keepalive_interval: Duration,
    queue_capacity: usize,
    send_timeout: Duration,
}

/// Registry of live subscribers. Cheap to clone; clones share state.
///
/// `publish` only enqueues. Every subscriber owns a bounded queue drained by
/// its own writer task, which spaces messages, sends keepalives and bounds
/// each write by the send timeout. A subscriber whose queue overflows or
/// whose write fails or times out is removed.
///
/// ```
/// use press_daq::hub::BroadcastHub;
/// use press_daq::reading::{Reading, SensorKind};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let hub = BroadcastHub::new(Duration::from_millis(50), Duration::from_secs(15));
/// let queued = hub
///     .publish(&Reading::now("press-a", SensorKind::Pressure, 101.3))
///     .await;
/// assert_eq!(queued, 0);
/// assert_eq!(hub.subscriber_count(), 0);
/// # })
/// ```
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    /// Hub with the default queue capacity and send timeout.
    pub fn new(min_send_interval: Duration, keepalive_interval: Duration) -> Self {
        Self::with_limits(
            min_send_interval,
            keepalive_interval,
            DEFAULT_QUEUE_CAPACITY,
            DEFAULT_SEND_TIMEOUT,
        )
    }

    /// Hub with explicit per-subscriber queue capacity and write timeout.
    pub fn with_limits(
        min_send_interval: Duration,
        keepalive_interval: Duration,
        queue_capacity: usize,
        send_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: RwLock::new(HashMap::new()),
                min_send_interval,
                keepalive_interval,
                queue_capacity: queue_capacity.max(1),
                send_timeout,
            }),
        }
    }

    /// Hub built from the `[hub]` settings section.
    pub fn from_config(config: &HubConfig) -> Self {
        Self::with_limits(
            config.min_send_interval,
            config.keepalive_interval,
            config.queue_capacity,
            config.send_timeout,
        )
    }

    /// Send the `connected` acknowledgement, then register the connection and
    /// start its writer task.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn subscribe(
        &self,
        connection: Arc<dyn SubscriberConnection>,
        filter: DeviceFilter,
    ) -> AppResult<SubscriberId> {
        let id = Uuid::new_v4();
        let ack = ServerMessage::connected(filter.to_string()).to_json()?;
        // Registration happens after the ack, so nothing can overtake it.
        match tokio::time::timeout(self.inner.send_timeout, connection.send_text(ack)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(DaqError::SubscriberDisconnected),
        }
        let acked_at = Instant::now();

        let (outbox, queue) = mpsc::channel(self.inner.queue_capacity);
        let subscriber = Arc::new(Subscriber {
            id,
            filter,
            connection: connection.clone(),
            outbox,
            writer: Mutex::new(None),
        });
        self.inner
            .subscribers
            .write()
            .insert(id, subscriber.clone());

        let handle = tokio::spawn(writer_loop(
            Arc::downgrade(&self.inner),
            id,
            connection,
            queue,
            acked_at,
        ));
        *subscriber.writer.lock() = Some(handle);

        info!(subscriber = %id, filter = %subscriber.filter, "subscriber connected");
        Ok(id)
    }

    /// Queue `reading` for every subscriber whose filter matches.
    ///
    /// Never waits on a connection. Returns the number of subscribers the
    /// reading was queued for; subscribers that are disconnected or whose
    /// queue is full are removed before this returns.
    pub async fn publish(&self, reading: &Reading) -> usize {
        let targets: Vec<Arc<Subscriber>> = self
            .inner
            .subscribers
            .read()
            .values()
            .filter(|s| s.filter.matches(&reading.device_id))
            .cloned()
            .collect();
        if targets.is_empty() {
            return 0;
        }

        let text = match ServerMessage::ingest(reading.clone()).to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to encode reading");
                return 0;
            }
        };

        let mut queued = 0;
        for subscriber in &targets {
            let outcome = if subscriber.connection.is_connected() {
                subscriber.outbox.try_send(text.clone())
            } else {
                Err(TrySendError::Closed(String::new()))
            };
            match outcome {
                Ok(()) => queued += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = %subscriber.id, "subscriber queue full, dropping subscriber");
                    self.unsubscribe(subscriber.id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = %subscriber.id, "subscriber gone");
                    self.unsubscribe(subscriber.id);
                }
            }
        }
        queued
    }

    /// Remove a subscriber and stop its writer. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        remove_subscriber(&self.inner, id)
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Drop every subscriber.
    pub fn clear(&self) {
        let drained: Vec<Arc<Subscriber>> = self
            .inner
            .subscribers
            .write()
            .drain()
            .map(|(_, s)| s)
            .collect();
        for subscriber in drained {
            if let Some(handle) = subscriber.writer.lock().take() {
                handle.abort();
            }
        }
    }
}

impl fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("subscribers", &self.subscriber_count())
            .field("min_send_interval", &self.inner.min_send_interval)
            .field("queue_capacity", &self.inner.queue_capacity)
            .finish()
    }
}

fn remove_subscriber(inner: &HubInner, id: SubscriberId) -> bool {
    let removed = inner.subscribers.write().remove(&id);
    match removed {
        Some(subscriber) => {
            subscriber.connection.close();
            if let Some(handle) = subscriber.writer.lock().take() {
                handle.abort();
            }
            info!(subscriber = %id, "subscriber removed");
            true
        }
        None => false,
    }
}

/// Drain one subscriber's queue.
///
/// Messages go out at least `min_send_interval` apart. When nothing was sent
/// for `keepalive_interval` a keepalive goes out instead. The loop ends, and
/// removes the subscriber, on the first failed or timed-out write.
async fn writer_loop(
    hub: Weak<HubInner>,
    id: SubscriberId,
    connection: Arc<dyn SubscriberConnection>,
    mut queue: mpsc::Receiver<String>,
    mut last_send: Instant,
) {
    let Some((min_interval, keepalive_interval, send_timeout)) = hub
        .upgrade()
        .map(|h| (h.min_send_interval, h.keepalive_interval, h.send_timeout))
    else {
        return;
    };
    let keepalive = match ServerMessage::keepalive().to_json() {
        Ok(text) => text,
        Err(_) => return,
    };

    let failure = loop {
        let (text, is_keepalive) = tokio::select! {
            next = queue.recv() => match next {
                Some(text) => (text, false),
                None => return,
            },
            _ = tokio::time::sleep_until(last_send + keepalive_interval) => (keepalive.clone(), true),
        };

        let ready_at = last_send + min_interval;
        if !is_keepalive && Instant::now() < ready_at {
            tokio::time::sleep_until(ready_at).await;
        }
        if !connection.is_connected() {
            break DaqError::SubscriberDisconnected;
        }
        match tokio::time::timeout(send_timeout, connection.send_text(text)).await {
            Ok(Ok(())) => last_send = Instant::now(),
            Ok(Err(e)) => break e,
            Err(_) => {
                warn!(subscriber = %id, timeout = ?send_timeout, "subscriber write timed out");
                break DaqError::SubscriberDisconnected;
            }
        }
    };

    debug!(subscriber = %id, error = %failure, "send failed");
    if let Some(inner) = hub.upgrade() {
        remove_subscriber(&inner, id);
    }
}
