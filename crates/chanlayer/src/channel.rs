//! Channel: a named mailbox with a bounded queue.
//!
//! Each channel owns one subscribe socket and a background receive loop that
//! moves matching frames from the socket into the local queue. Direct sends
//! skip the socket and push into the queue themselves.
//!
//! Producers never wait: a full queue means the message is dropped. Direct
//! senders are told (`ChannelFull`); group traffic is dropped with a warning
//! because the receive loop must keep draining the socket for every other
//! group multiplexed on it.

use std::collections::BTreeSet;
use std::sync::Arc;

use chanlayer_transport::{EndpointAddr, Received, SubSocket, Transport, TransportError};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::LayerError;
use crate::framer;
use crate::stats::LayerMetrics;
use crate::types::Message;

pub struct Channel {
    name: String,
    socket: Arc<SubSocket>,
    queue_tx: mpsc::Sender<String>,
    queue_rx: Mutex<mpsc::Receiver<String>>,
    /// Groups this channel is subscribed to; mirrors the socket filters.
    groups: Mutex<BTreeSet<String>>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    closed: CancellationToken,
    metrics: Arc<LayerMetrics>,
}

impl Channel {
    /// Connect a socket to `addr` and start the receive loop.
    pub(crate) async fn open(
        name: &str,
        transport: &Transport,
        addr: &EndpointAddr,
        capacity: usize,
        metrics: Arc<LayerMetrics>,
    ) -> Result<Arc<Self>, LayerError> {
        let socket = Arc::new(transport.connect_subscriber(addr, capacity).await?);
        let (queue_tx, queue_rx) = mpsc::channel(capacity);

        let receive_task = tokio::spawn(receive_loop(
            name.to_string(),
            socket.clone(),
            queue_tx.clone(),
            metrics.clone(),
        ));

        Ok(Arc::new(Self {
            name: name.to_string(),
            socket,
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
            groups: Mutex::new(BTreeSet::new()),
            receive_task: Mutex::new(Some(receive_task)),
            closed: CancellationToken::new(),
            metrics,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start receiving frames published to `group`. Idempotent.
    pub async fn subscribe(&self, group: &str) {
        let mut groups = self.groups.lock().await;
        if groups.insert(group.to_string()) {
            self.socket
                .subscribe(&framer::subscription_prefix(group))
                .await;
            tracing::debug!("{}: subscribed to {group}", self.name);
        }
    }

    /// Stop receiving `group`. Idempotent; frames already queued stay queued.
    pub async fn unsubscribe(&self, group: &str) {
        let mut groups = self.groups.lock().await;
        if groups.remove(group) {
            self.socket
                .unsubscribe(&framer::subscription_prefix(group))
                .await;
            tracing::debug!("{}: unsubscribed from {group}", self.name);
        }
    }

    /// Groups currently subscribed, sorted.
    pub async fn subscriptions(&self) -> Vec<String> {
        self.groups.lock().await.iter().cloned().collect()
    }

    /// Number of payloads waiting to be received.
    pub fn pending(&self) -> usize {
        self.queue_tx.max_capacity() - self.queue_tx.capacity()
    }

    /// Queue a JSON payload directly, without touching the transport.
    pub fn send(&self, text: String) -> Result<(), LayerError> {
        if self.closed.is_cancelled() {
            return Err(LayerError::Closed);
        }
        match self.queue_tx.try_send(text) {
            Ok(()) => {
                self.metrics.direct.record(true);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.metrics.direct.record(false);
                tracing::warn!("{}: queue full, rejecting direct send", self.name);
                Err(LayerError::ChannelFull {
                    channel: self.name.clone(),
                })
            }
            Err(TrySendError::Closed(_)) => Err(LayerError::Closed),
        }
    }

    /// Wait for the next message.
    ///
    /// No timeout of its own; callers wrap it in one if they need it.
    /// Dropping the future does not lose a message.
    pub async fn receive(&self) -> Result<Message, LayerError> {
        let mut queue = tokio::select! {
            _ = self.closed.cancelled() => return Err(LayerError::Closed),
            queue = self.queue_rx.lock() => queue,
        };
        let payload = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(LayerError::Closed),
            payload = queue.recv() => payload.ok_or(LayerError::Closed)?,
        };
        drop(queue);

        serde_json::from_str(&payload).map_err(LayerError::Deserialization)
    }

    /// Stop the receive loop and close the socket.
    ///
    /// Pending `receive` callers get `Closed`; queued payloads are discarded.
    /// A second call only re-closes the already closed socket.
    pub async fn close(&self) {
        self.closed.cancel();

        if let Some(task) = self.receive_task.lock().await.take() {
            tracing::debug!("{}: stopping receive loop", self.name);
            if let Err(e) = self.socket.interrupt().await {
                tracing::warn!("{}: could not interrupt receive loop: {e}", self.name);
                task.abort();
            }
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::warn!("{}: receive loop ended abnormally: {e}", self.name);
                }
            }
        }

        self.socket.close().await;
        tracing::debug!("{}: closed", self.name);
    }
}

/// Dropping without [`close`](Channel::close) aborts the receive loop.
impl Drop for Channel {
    fn drop(&mut self) {
        self.closed.cancel();
        if let Some(task) = self.receive_task.get_mut().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

/// Move frames from the socket into the channel queue until interrupted.
async fn receive_loop(
    name: String,
    socket: Arc<SubSocket>,
    queue: mpsc::Sender<String>,
    metrics: Arc<LayerMetrics>,
) {
    loop {
        let frame = match socket.recv().await {
            Ok(Received::Frame(frame)) => frame,
            Ok(Received::Interrupted) => break,
            Err(TransportError::Closed) => {
                tracing::warn!("{name}: socket closed under the receive loop");
                break;
            }
            Err(e) => {
                tracing::warn!("{name}: receive failed: {e}");
                continue;
            }
        };

        let (group, payload) = match framer::decode(&frame) {
            Ok(parts) => parts,
            Err(e) => {
                metrics.malformed.inc();
                tracing::warn!("{name}: discarding frame: {e}");
                continue;
            }
        };

        match queue.try_send(payload.to_string()) {
            Ok(()) => {
                metrics.inbound.record(true);
                tracing::debug!("{name}: queued message from group {group}");
            }
            Err(TrySendError::Full(_)) => {
                metrics.inbound.record(false);
                tracing::warn!("{name}: queue full, dropping message from group {group}");
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }

    tracing::debug!("{name}: receive loop stopped");
}
