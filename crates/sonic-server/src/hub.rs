//! Broadcast hub fanning records out to live viewers.
//!
//! A single task owns the viewer registry and processes register,
//! unregister and publish commands one at a time. Each viewer has a bounded
//! outbound queue; a publish never waits on a viewer. A viewer whose queue is
//! full is evicted instead, which closes its queue and lets its connection
//! shut down.
//!
//! ```rust
//! # async fn example() {
//! use sonic_logs::LogRecord;
//! use sonic_server::hub::{BroadcastHub, HubConfig};
//!
//! let (hub, _task) = BroadcastHub::spawn(HubConfig::default());
//! let mut viewer = hub.register().await.unwrap();
//!
//! hub.publish(LogRecord::new("hello")).await;
//! let message = viewer.queue.recv().await.unwrap();
//! assert!(message.as_str().contains("\"raw\":\"hello\""));
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;

use axum::extract::ws::Utf8Bytes;
use sonic_logs::LogRecord;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ServerError, ServerResult};

/// Default outbound queue capacity per viewer.
pub const DEFAULT_VIEWER_QUEUE_CAPACITY: usize = 4096;

/// Default maximum number of registered viewers.
pub const DEFAULT_MAX_VIEWERS: usize = 1000;

/// Capacity of the hub's own command queue.
const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Unique identifier of a registered viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewerId(Uuid);

impl ViewerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Hub sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Outbound queue capacity per viewer.
    pub queue_capacity: usize,
    /// Registrations beyond this are refused.
    pub max_viewers: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_VIEWER_QUEUE_CAPACITY,
            max_viewers: DEFAULT_MAX_VIEWERS,
        }
    }
}

impl HubConfig {
    /// Set the per-viewer queue capacity. Zero is raised to one.
    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = if capacity == 0 { 1 } else { capacity };
        self
    }

    /// Set the maximum number of viewers.
    #[must_use]
    pub const fn with_max_viewers(mut self, max: usize) -> Self {
        self.max_viewers = max;
        self
    }
}

/// A viewer's membership in the hub.
///
/// `queue` yields serialized records until the viewer is unregistered or
/// evicted, after which it returns `None` once drained.
#[derive(Debug)]
pub struct ViewerRegistration {
    /// Identifier to pass to [`HubHandle::unregister`].
    pub id: ViewerId,
    /// Outbound messages for this viewer.
    pub queue: mpsc::Receiver<Utf8Bytes>,
}

enum HubCommand {
    Register {
        reply: oneshot::Sender<ServerResult<ViewerRegistration>>,
    },
    Unregister {
        id: ViewerId,
    },
    Publish {
        record: Box<LogRecord>,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
}

/// Cloneable handle for sending commands to the hub task.
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Registers a new viewer.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::TooManyViewers`] when the limit is reached and
    /// [`ServerError::HubUnavailable`] if the hub has stopped.
    pub async fn register(&self) -> ServerResult<ViewerRegistration> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(HubCommand::Register { reply })
            .await
            .map_err(|_| ServerError::HubUnavailable)?;
        response.await.map_err(|_| ServerError::HubUnavailable)?
    }

    /// Removes a viewer and closes its queue. Unknown ids are ignored.
    pub async fn unregister(&self, id: ViewerId) {
        if self.commands.send(HubCommand::Unregister { id }).await.is_err() {
            debug!(viewer = %id, "hub stopped before unregister");
        }
    }

    /// Unregisters without waiting, for use where `.await` is unavailable.
    ///
    /// Falls back to a spawned [`unregister`](Self::unregister) when the
    /// command queue is full.
    pub fn release(&self, id: ViewerId) {
        match self.commands.try_send(HubCommand::Unregister { id }) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    let hub = self.clone();
                    runtime.spawn(async move { hub.unregister(id).await });
                }
            }
        }
    }

    /// Delivers `record` to every registered viewer.
    pub async fn publish(&self, record: LogRecord) {
        let command = HubCommand::Publish {
            record: Box::new(record),
        };
        if self.commands.send(command).await.is_err() {
            warn!("hub stopped, dropping record");
        }
    }

    /// Number of registered viewers.
    pub async fn viewer_count(&self) -> usize {
        let (reply, response) = oneshot::channel();
        if self.commands.send(HubCommand::Count { reply }).await.is_err() {
            return 0;
        }
        response.await.unwrap_or(0)
    }
}

/// The hub task's state. Only reachable through a [`HubHandle`].
pub struct BroadcastHub {
    config: HubConfig,
    viewers: HashMap<ViewerId, mpsc::Sender<Utf8Bytes>>,
    commands: mpsc::Receiver<HubCommand>,
}

impl BroadcastHub {
    /// Starts the hub task.
    ///
    /// The task ends once every [`HubHandle`] has been dropped.
    #[must_use]
    pub fn spawn(config: HubConfig) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let hub = Self {
            config,
            viewers: HashMap::new(),
            commands: rx,
        };
        let task = tokio::spawn(hub.run());
        (HubHandle { commands: tx }, task)
    }

    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                HubCommand::Register { reply } => {
                    let _ = reply.send(self.register());
                }
                HubCommand::Unregister { id } => self.unregister(id),
                HubCommand::Publish { record } => self.publish(&record),
                HubCommand::Count { reply } => {
                    let _ = reply.send(self.viewers.len());
                }
            }
        }
        debug!("hub stopped");
    }

    fn register(&mut self) -> ServerResult<ViewerRegistration> {
        if self.viewers.len() >= self.config.max_viewers {
            return Err(ServerError::TooManyViewers(self.config.max_viewers));
        }
        let id = ViewerId::new();
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        self.viewers.insert(id, tx);
        debug!(viewer = %id, viewers = self.viewers.len(), "viewer registered");
        Ok(ViewerRegistration { id, queue: rx })
    }

    fn unregister(&mut self, id: ViewerId) {
        // Dropping the sender closes the viewer's queue.
        if self.viewers.remove(&id).is_some() {
            debug!(viewer = %id, viewers = self.viewers.len(), "viewer unregistered");
        }
    }

    fn publish(&mut self, record: &LogRecord) {
        let message = match record.to_json() {
            Ok(json) => Utf8Bytes::from(json),
            Err(e) => {
                warn!(error = %e, "failed to serialize record");
                return;
            }
        };

        self.viewers.retain(|id, queue| match queue.try_send(message.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(viewer = %id, "viewer queue full, evicting slow consumer");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(viewer = %id, "viewer queue closed, removing");
                false
            }
        });
    }
}
