//! Broadcast fanout to live viewers.
//!
//! Each connected viewer owns a small bounded channel of pre-serialized JSON
//! frames. [`Fanout::broadcast`] serializes a [`Notification`] once and
//! offers the frame to every viewer without waiting. A viewer whose channel
//! is full or closed is treated as dead and removed on the spot; there is no
//! retry and nothing is queued for it beyond its channel.
//!
//! The channel (`fanout.viewer_buffer` frames deep) stands in for the
//! socket's send buffer: the websocket task drains it straight into the
//! socket, so it only absorbs the gap between back-to-back frames such as a
//! `route_update` followed by its `snapshot`. Nothing is kept for a viewer
//! once it has been dropped, and a dropped viewer must reconnect.
//!
//! In distributed mode a broadcast is published to a NATS subject instead.
//! Every process runs a relay (see [`Fanout::start_relay`]) that subscribes
//! to the subject and performs the local delivery, so a viewer sees updates
//! triggered by events another process consumed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::StreamExt as _;
use ropt_types::Notification;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::error::CoreError;

/// Identifier of one registered viewer.
pub type ViewerId = u64;

/// The receiving half handed to a connected viewer.
pub struct Viewer {
    /// Registration id, for [`Fanout::disconnect`].
    pub id: ViewerId,
    /// Serialized notification frames, in broadcast order.
    pub rx: mpsc::Receiver<Arc<str>>,
}

enum Transport {
    Local,
    Distributed {
        client: async_nats::Client,
        subject: String,
    },
}

/// Registry of live viewers plus the delivery transport.
pub struct Fanout {
    viewers: Mutex<BTreeMap<ViewerId, mpsc::Sender<Arc<str>>>>,
    next_id: AtomicU64,
    buffer: usize,
    transport: Transport,
}

impl Fanout {
    /// Process-local fanout.
    pub fn local(viewer_buffer: usize) -> Self {
        Self::with_transport(viewer_buffer, Transport::Local)
    }

    /// Fanout through a NATS subject shared by every process.
    pub fn distributed(client: async_nats::Client, subject: &str, viewer_buffer: usize) -> Self {
        Self::with_transport(
            viewer_buffer,
            Transport::Distributed {
                client,
                subject: subject.to_owned(),
            },
        )
    }

    fn with_transport(viewer_buffer: usize, transport: Transport) -> Self {
        Self {
            viewers: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            buffer: viewer_buffer.max(1),
            transport,
        }
    }

    /// Register a viewer.
    pub async fn connect(&self) -> Viewer {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        self.viewers.lock().await.insert(id, tx);
        tracing::debug!(viewer_id = id, "Viewer connected");
        Viewer { id, rx }
    }

    /// Remove a viewer. Unknown or already-removed ids are ignored.
    pub async fn disconnect(&self, id: ViewerId) {
        if self.viewers.lock().await.remove(&id).is_some() {
            tracing::debug!(viewer_id = id, "Viewer disconnected");
        }
    }

    /// Number of registered viewers in this process.
    pub async fn viewer_count(&self) -> usize {
        self.viewers.lock().await.len()
    }

    /// Deliver `notification` to every viewer (locally or via NATS).
    ///
    /// A failed publish falls back to local delivery so this process's
    /// viewers still see the update.
    pub async fn broadcast(&self, notification: &Notification) {
        let frame: Arc<str> = match serde_json::to_string(notification) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize notification");
                return;
            }
        };

        match &self.transport {
            Transport::Local => {
                self.deliver_local(&frame).await;
            }
            Transport::Distributed { client, subject } => {
                let payload = frame.as_bytes().to_vec();
                if let Err(e) = client.publish(subject.clone(), payload.into()).await {
                    tracing::warn!(subject, error = %e, "Broadcast publish failed, delivering locally");
                    self.deliver_local(&frame).await;
                }
            }
        }
    }

    /// Offer `frame` to every local viewer; drop those that cannot take it.
    /// Returns the number of viewers that received it.
    pub async fn deliver_local(&self, frame: &Arc<str>) -> usize {
        let mut viewers = self.viewers.lock().await;
        let before = viewers.len();
        viewers.retain(|id, tx| match tx.try_send(Arc::clone(frame)) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(viewer_id = id, error = %e, "Dropping viewer after failed delivery");
                false
            }
        });
        let delivered = viewers.len();
        if delivered < before {
            tracing::info!(dropped = before.saturating_sub(delivered), "Removed dead viewers");
        }
        delivered
    }

    /// Start the NATS relay in distributed mode. Returns `None` in local mode.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Nats`] if the subscription cannot be created.
    pub async fn start_relay(self: &Arc<Self>) -> Result<Option<JoinHandle<()>>, CoreError> {
        let Transport::Distributed { client, subject } = &self.transport else {
            return Ok(None);
        };

        let mut sub = client
            .subscribe(subject.clone())
            .await
            .map_err(|e| CoreError::Nats(format!("failed to subscribe to {subject}: {e}")))?;
        tracing::info!(subject, "Broadcast relay subscribed");

        let fanout = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(msg) = sub.next().await {
                match std::str::from_utf8(&msg.payload) {
                    Ok(text) => {
                        fanout.deliver_local(&Arc::from(text)).await;
                    }
                    Err(e) => tracing::warn!(error = %e, "Ignoring non-UTF-8 broadcast frame"),
                }
            }
            tracing::info!("Broadcast relay subscription ended");
        });
        Ok(Some(handle))
    }
}
