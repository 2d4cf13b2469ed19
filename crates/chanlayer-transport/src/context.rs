use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::socket::SubscriberSlot;
use crate::{EndpointAddr, PubSocket, SubSocket, TransportError};

/// Rendezvous state for one endpoint address.
pub(crate) struct EndpointState {
    pub bound: AtomicBool,
    pub subscribers: Mutex<Vec<Arc<SubscriberSlot>>>,
}

impl EndpointState {
    fn new() -> Self {
        Self {
            bound: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

struct Inner {
    endpoints: Mutex<HashMap<EndpointAddr, Arc<EndpointState>>>,
    next_subscriber_id: AtomicU64,
}

/// The transport binding: owns every endpoint in the process.
///
/// Cheap to clone. Built once by the composition root and handed to whatever
/// needs sockets; there is no hidden global instance.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoints: Mutex::new(HashMap::new()),
                next_subscriber_id: AtomicU64::new(1),
            }),
        }
    }

    async fn endpoint(&self, addr: &EndpointAddr) -> Arc<EndpointState> {
        self.inner
            .endpoints
            .lock()
            .await
            .entry(addr.clone())
            .or_insert_with(|| Arc::new(EndpointState::new()))
            .clone()
    }

    /// Bind the publisher for `addr`.
    ///
    /// Only one open publisher may be bound per endpoint. Subscribers that
    /// connected earlier start receiving as soon as this returns.
    pub async fn bind_publisher(
        &self,
        addr: &EndpointAddr,
        hwm: usize,
    ) -> Result<PubSocket, TransportError> {
        if hwm == 0 {
            return Err(TransportError::InvalidHighWaterMark);
        }
        let endpoint = self.endpoint(addr).await;
        if endpoint.bound.swap(true, Ordering::AcqRel) {
            return Err(TransportError::AddressInUse(addr.clone()));
        }
        tracing::debug!("{addr}: publisher bound (hwm {hwm})");
        Ok(PubSocket::new(addr.clone(), endpoint, hwm))
    }

    /// Connect a new subscriber to `addr`. The endpoint need not be bound yet.
    pub async fn connect_subscriber(
        &self,
        addr: &EndpointAddr,
        hwm: usize,
    ) -> Result<SubSocket, TransportError> {
        if hwm == 0 {
            return Err(TransportError::InvalidHighWaterMark);
        }
        let endpoint = self.endpoint(addr).await;
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (socket, slot) = SubSocket::new(id, addr.clone(), endpoint.clone(), hwm);
        endpoint.subscribers.lock().await.push(slot);
        tracing::debug!("{addr}: subscriber {id} connected (hwm {hwm})");
        Ok(socket)
    }

    /// Whether an open publisher is bound at `addr`.
    pub async fn is_bound(&self, addr: &EndpointAddr) -> bool {
        match self.inner.endpoints.lock().await.get(addr) {
            Some(endpoint) => endpoint.bound.load(Ordering::Acquire),
            None => false,
        }
    }

    /// Number of subscribers currently attached to `addr`.
    pub async fn subscriber_count(&self, addr: &EndpointAddr) -> usize {
        let endpoint = match self.inner.endpoints.lock().await.get(addr) {
            Some(endpoint) => endpoint.clone(),
            None => return 0,
        };
        let subscribers = endpoint.subscribers.lock().await;
        subscribers.iter().filter(|slot| !slot.is_detached()).count()
    }

    /// Forget `addr`. Sockets still holding the old endpoint keep working
    /// among themselves; new sockets for `addr` start from scratch.
    pub async fn release(&self, addr: &EndpointAddr) {
        if self.inner.endpoints.lock().await.remove(addr).is_some() {
            tracing::debug!("{addr}: endpoint released");
        }
    }

    /// All endpoints that have been bound or connected to and not released.
    pub async fn endpoints(&self) -> Vec<EndpointAddr> {
        let mut addrs: Vec<_> = self.inner.endpoints.lock().await.keys().cloned().collect();
        addrs.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        addrs
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}
