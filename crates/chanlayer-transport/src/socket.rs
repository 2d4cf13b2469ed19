use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chanlayer_metrics::DropMeter;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};

use crate::context::EndpointState;
use crate::{EndpointAddr, TransportError};

/// Item travelling through a subscriber's inbound queue.
pub(crate) enum Inbound {
    Frame(String),
    Interrupt,
}

/// What [`SubSocket::recv`] yielded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A published frame that matched one of the socket's filters.
    Frame(String),
    /// The owner woke its own reader via [`SubSocket::interrupt`].
    Interrupted,
}

/// Outcome of one [`PubSocket::send`] fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendReport {
    /// Subscribers whose filters matched the frame.
    pub matched: usize,
    /// Subscribers that queued the frame.
    pub delivered: usize,
    /// Subscribers that were at their high-water mark.
    pub dropped: usize,
}

/// Subscriber-side state shared with the endpoint it is connected to.
pub(crate) struct SubscriberSlot {
    pub id: u64,
    tx: mpsc::Sender<Inbound>,
    filters: Mutex<BTreeSet<String>>,
    meter: DropMeter,
}

impl SubscriberSlot {
    async fn matches(&self, frame: &str) -> bool {
        self.filters
            .lock()
            .await
            .iter()
            .any(|filter| frame.starts_with(filter.as_str()))
    }

    fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_detached(&self) -> bool {
        self.tx.is_closed()
    }
}

// ── Publisher side ────────────────────────────────────────────────────

/// The single writer bound to an endpoint.
///
/// Sending never blocks on a slow subscriber: a subscriber whose queue is at
/// the high-water mark (its own, or this socket's, whichever is lower) simply
/// misses the frame.
pub struct PubSocket {
    addr: EndpointAddr,
    endpoint: Arc<EndpointState>,
    hwm: usize,
    closed: AtomicBool,
}

impl PubSocket {
    pub(crate) fn new(addr: EndpointAddr, endpoint: Arc<EndpointState>, hwm: usize) -> Self {
        Self {
            addr,
            endpoint,
            hwm,
            closed: AtomicBool::new(false),
        }
    }

    pub fn addr(&self) -> &EndpointAddr {
        &self.addr
    }

    pub fn high_water_mark(&self) -> usize {
        self.hwm
    }

    /// Fan a frame out to every matching subscriber.
    pub async fn send(&self, frame: &str) -> Result<SendReport, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let mut report = SendReport::default();
        let mut subscribers = self.endpoint.subscribers.lock().await;
        subscribers.retain(|slot| !slot.is_detached());

        for slot in subscribers.iter() {
            if !slot.matches(frame).await {
                continue;
            }
            report.matched += 1;

            if slot.queued() >= self.hwm {
                slot.meter.record(false);
                report.dropped += 1;
                continue;
            }

            match slot.tx.try_send(Inbound::Frame(frame.to_owned())) {
                Ok(()) => {
                    slot.meter.record(true);
                    report.delivered += 1;
                }
                Err(TrySendError::Full(_)) => {
                    slot.meter.record(false);
                    report.dropped += 1;
                }
                // Detached between retain and here; pruned on the next send.
                Err(TrySendError::Closed(_)) => {}
            }
        }

        if report.dropped > 0 {
            tracing::debug!(
                "{}: frame dropped for {} subscriber(s) at high-water mark",
                self.addr,
                report.dropped
            );
        }
        Ok(report)
    }

    /// Stop writing and free the endpoint for another publisher.
    pub async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.endpoint.bound.store(false, Ordering::Release);
            tracing::debug!("{}: publisher closed", self.addr);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for PubSocket {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.endpoint.bound.store(false, Ordering::Release);
        }
    }
}

impl std::fmt::Debug for PubSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSocket")
            .field("addr", &self.addr)
            .field("hwm", &self.hwm)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ── Subscriber side ───────────────────────────────────────────────────

/// A reader connected to an endpoint.
///
/// Starts with no filters, so it receives nothing until [`subscribe`] is
/// called. Filters are prefixes: `"news|"` matches every frame that starts
/// with `news|`.
///
/// [`subscribe`]: SubSocket::subscribe
pub struct SubSocket {
    addr: EndpointAddr,
    slot: Arc<SubscriberSlot>,
    endpoint: Arc<EndpointState>,
    rx: Mutex<mpsc::Receiver<Inbound>>,
}

impl SubSocket {
    pub(crate) fn new(
        id: u64,
        addr: EndpointAddr,
        endpoint: Arc<EndpointState>,
        hwm: usize,
    ) -> (Self, Arc<SubscriberSlot>) {
        let (tx, rx) = mpsc::channel(hwm);
        let slot = Arc::new(SubscriberSlot {
            id,
            tx,
            filters: Mutex::new(BTreeSet::new()),
            meter: DropMeter::new(),
        });
        let socket = Self {
            addr,
            slot: slot.clone(),
            endpoint,
            rx: Mutex::new(rx),
        };
        (socket, slot)
    }

    pub fn addr(&self) -> &EndpointAddr {
        &self.addr
    }

    /// Add a prefix filter. Returns `false` if it was already installed.
    pub async fn subscribe(&self, filter: &str) -> bool {
        self.slot.filters.lock().await.insert(filter.to_string())
    }

    /// Remove a prefix filter. Returns `false` if it was not installed.
    pub async fn unsubscribe(&self, filter: &str) -> bool {
        self.slot.filters.lock().await.remove(filter)
    }

    /// Currently installed filters, sorted.
    pub async fn filters(&self) -> Vec<String> {
        self.slot.filters.lock().await.iter().cloned().collect()
    }

    /// Wait for the next frame or interrupt.
    ///
    /// Cancel-safe: dropping the future never loses a queued frame.
    pub async fn recv(&self) -> Result<Received, TransportError> {
        match self.rx.lock().await.recv().await {
            Some(Inbound::Frame(frame)) => Ok(Received::Frame(frame)),
            Some(Inbound::Interrupt) => Ok(Received::Interrupted),
            None => Err(TransportError::Closed),
        }
    }

    /// Queue an interrupt behind any pending frames, bypassing the filters.
    ///
    /// Waits for room if the inbound queue is full, so the interrupt itself is
    /// never dropped.
    pub async fn interrupt(&self) -> Result<(), TransportError> {
        self.slot
            .tx
            .send(Inbound::Interrupt)
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Frames queued at this socket and frames turned away at its high-water mark.
    pub fn stats(&self) -> chanlayer_metrics::MeterSnapshot {
        self.slot.meter.snapshot()
    }

    /// Detach from the endpoint and discard anything still queued.
    ///
    /// Must not race a pending [`recv`](Self::recv): the reader is expected to
    /// have been interrupted and finished first.
    pub async fn close(&self) {
        self.endpoint
            .subscribers
            .lock()
            .await
            .retain(|slot| slot.id != self.slot.id);

        let mut rx = self.rx.lock().await;
        rx.close();
        while rx.try_recv().is_ok() {}
        tracing::debug!("{}: subscriber {} closed", self.addr, self.slot.id);
    }
}

impl std::fmt::Debug for SubSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubSocket")
            .field("addr", &self.addr)
            .field("id", &self.slot.id)
            .finish()
    }
}
