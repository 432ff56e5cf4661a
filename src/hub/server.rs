//! Line-oriented TCP front-end for hub subscribers.
//!
//! Protocol: the client sends one line with a comma-separated device filter
//! (empty for all devices). The server answers with the `connected`
//! acknowledgement and then streams newline-delimited JSON messages. Anything
//! else the client sends is read and discarded; EOF ends the subscription.
use super::{BroadcastHub, DeviceFilter, SubscriberConnection};
use crate::error::{AppResult, DaqError};
use crate::source::StopSignal;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// How long a new client has to send its filter line before it is treated as
/// subscribing to every device.
const FILTER_TIMEOUT: Duration = Duration::from_secs(10);

struct TcpSubscriber {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    connected: AtomicBool,
    dropped: Notify,
}

#[async_trait]
impl SubscriberConnection for TcpSubscriber {
    async fn send_text(&self, text: String) -> AppResult<()> {
        let mut writer = self.writer.lock().await;
        let result = async {
            writer.write_all(text.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            self.connected.store(false, Ordering::SeqCst);
            return Err(DaqError::Io(e));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.dropped.notify_one();
    }
}

/// Accepts subscriber connections and registers them with a [`BroadcastHub`].
pub struct SubscriberServer {
    listener: TcpListener,
    hub: BroadcastHub,
}

impl SubscriberServer {
    /// Bind `addr`; port 0 picks a free port.
    pub async fn bind(addr: &str, hub: BroadcastHub) -> AppResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr, "subscriber server listening");
        Ok(Self { listener, hub })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients until `stop` is triggered.
    pub async fn run(self, stop: StopSignal) {
        loop {
            tokio::select! {
                result = self.listener.accept() => match result {
                    Ok((socket, addr)) => {
                        let hub = self.hub.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(socket, addr, hub).await {
                                warn!(%addr, error = %e, "subscriber session ended with error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "accept failed"),
                },
                _ = stop.triggered() => {
                    info!("subscriber server stopping");
                    return;
                }
            }
        }
    }
}

async fn handle_client(socket: TcpStream, addr: SocketAddr, hub: BroadcastHub) -> AppResult<()> {
    debug!(%addr, "client connected");
    let (read_half, write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let filter = match tokio::time::timeout(FILTER_TIMEOUT, lines.next_line()).await {
        Ok(Ok(Some(line))) => DeviceFilter::parse(&line),
        Ok(Ok(None)) => {
            debug!(%addr, "client closed before subscribing");
            return Ok(());
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => DeviceFilter::All,
    };

    let connection = Arc::new(TcpSubscriber {
        writer: tokio::sync::Mutex::new(write_half),
        connected: AtomicBool::new(true),
        dropped: Notify::new(),
    });
    let id = hub.subscribe(connection.clone(), filter).await?;

    // Client lines only prove liveness. The hub may also drop a client that
    // cannot keep up.
    let outcome = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(_)) => continue,
                Ok(None) => break Ok(()),
                Err(e) => break Err(DaqError::Io(e)),
            },
            _ = connection.dropped.notified() => {
                warn!(%addr, subscriber = %id, "subscriber dropped by hub");
                break Ok(());
            }
        }
    };

    connection.connected.store(false, Ordering::SeqCst);
    hub.unsubscribe(id);
    info!(%addr, subscriber = %id, "client disconnected");
    outcome
}
