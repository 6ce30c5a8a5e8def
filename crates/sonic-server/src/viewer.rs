//! WebSocket live feed.
//!
//! Each viewer connection runs two duties side by side: an outbound duty
//! draining the viewer's hub queue and sending periodic pings, and an inbound
//! duty that only watches for close frames and pongs. When either ends the
//! other is stopped and the viewer is unregistered.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at, sleep_until, timeout};
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::context::PipelineContext;
use crate::error::{ServerError, ServerResult};
use crate::hub::{HubHandle, ViewerRegistration};

/// Largest message accepted from a viewer.
const MAX_INBOUND_MESSAGE: usize = 4096;

/// Heartbeat and write timings for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewerTiming {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Silence allowed before the viewer is considered gone.
    pub pong_timeout: Duration,
    /// Maximum duration of one write.
    pub write_timeout: Duration,
}

impl ViewerTiming {
    /// Timings taken from the server configuration.
    #[must_use]
    pub const fn from_config(config: &ServerConfig) -> Self {
        Self {
            ping_interval: config.ping_interval,
            pong_timeout: config.pong_timeout,
            write_timeout: config.write_timeout,
        }
    }
}

/// Handle WebSocket upgrade request for /ws.
///
/// The viewer is registered before the upgrade so that a full hub is
/// reported as 503 instead of an accepted-then-closed socket. If the upgrade
/// never completes the registration is released when the callback is dropped.
pub async fn ws_upgrade(
    State(ctx): State<Arc<PipelineContext>>,
    ws: WebSocketUpgrade,
) -> ServerResult<Response> {
    let pending = PendingViewer::register(ctx.hub()).await?;
    let hub = ctx.hub().clone();
    let timing = ViewerTiming::from_config(ctx.config());

    Ok(ws
        .max_message_size(MAX_INBOUND_MESSAGE)
        .on_upgrade(move |socket| async move {
            if let Some(registration) = pending.into_registration() {
                run_viewer(socket, registration, hub, timing).await;
            }
        }))
}

/// A registration not yet handed to a connection. Unregisters on drop.
struct PendingViewer {
    registration: Option<ViewerRegistration>,
    hub: HubHandle,
}

impl PendingViewer {
    async fn register(hub: &HubHandle) -> ServerResult<Self> {
        Ok(Self {
            registration: Some(hub.register().await?),
            hub: hub.clone(),
        })
    }

    fn into_registration(mut self) -> Option<ViewerRegistration> {
        self.registration.take()
    }
}

impl Drop for PendingViewer {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            debug!(viewer = %registration.id, "upgrade abandoned, releasing viewer");
            self.hub.release(registration.id);
        }
    }
}

/// Runs one viewer connection until it fails, times out or is evicted.
pub async fn run_viewer(
    socket: WebSocket,
    registration: ViewerRegistration,
    hub: HubHandle,
    timing: ViewerTiming,
) {
    let ViewerRegistration { id, queue } = registration;
    info!(viewer = %id, "viewer connected");

    let (sender, receiver) = socket.split();
    let mut outbound = tokio::spawn(drive_outbound(sender, queue, timing));
    let mut inbound = tokio::spawn(watch_inbound(receiver, timing.pong_timeout));

    tokio::select! {
        result = &mut outbound => {
            inbound.abort();
            if let Ok(Err(e)) = result {
                debug!(viewer = %id, error = %e, "outbound duty failed");
            }
        }
        _ = &mut inbound => {
            outbound.abort();
        }
    }

    hub.unregister(id).await;
    info!(viewer = %id, "viewer disconnected");
}

/// Sends queued records and periodic pings.
///
/// Returns `Ok` once the queue is closed by the hub, after sending a close
/// frame.
async fn drive_outbound(
    mut sender: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<Utf8Bytes>,
    timing: ViewerTiming,
) -> ServerResult<()> {
    let mut ping = interval_at(Instant::now() + timing.ping_interval, timing.ping_interval);

    loop {
        tokio::select! {
            next = queue.recv() => match next {
                Some(text) => write(&mut sender, Message::Text(text), timing.write_timeout).await?,
                None => {
                    // Best effort, the connection is going away either way.
                    let _ = write(&mut sender, Message::Close(None), timing.write_timeout).await;
                    return Ok(());
                }
            },
            _ = ping.tick() => {
                write(&mut sender, Message::Ping(Bytes::new()), timing.write_timeout).await?;
            }
        }
    }
}

/// Waits for the connection to close or fall silent.
///
/// Any pong pushes the deadline back by `pong_timeout`. Other messages are
/// ignored.
async fn watch_inbound(mut receiver: SplitStream<WebSocket>, pong_timeout: Duration) {
    let mut deadline = Instant::now() + pong_timeout;

    loop {
        tokio::select! {
            message = receiver.next() => match message {
                Some(Ok(Message::Pong(_))) => deadline = Instant::now() + pong_timeout,
                Some(Ok(Message::Close(_))) | None => {
                    debug!("viewer closed connection");
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "viewer receive error");
                    return;
                }
            },
            () = sleep_until(deadline) => {
                debug!("viewer liveness deadline expired");
                return;
            }
        }
    }
}

async fn write(
    sender: &mut SplitSink<WebSocket, Message>,
    message: Message,
    limit: Duration,
) -> ServerResult<()> {
    timeout(limit, sender.send(message))
        .await
        .map_err(|_| ServerError::WebSocket("write timed out".to_string()))?
        .map_err(|e| ServerError::WebSocket(e.to_string()))
}
