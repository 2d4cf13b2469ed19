//! Channel registry: the only place channels are created or looked up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chanlayer_transport::{EndpointAddr, Transport};
use tokio::sync::Mutex;

use crate::channel::Channel;
use crate::error::LayerError;
use crate::naming;
use crate::stats::LayerMetrics;

/// Maps channel names to live channels, up to `channel_capacity` of them.
///
/// Creation happens under the map lock, so two concurrent requests for the
/// same new name end up sharing one channel. Once drained, the registry
/// refuses to create channels.
pub struct ChannelRegistry {
    transport: Transport,
    addr: EndpointAddr,
    capacity: usize,
    channel_capacity: usize,
    metrics: Arc<LayerMetrics>,
    channels: Mutex<HashMap<String, Arc<Channel>>>,
    /// Only written under the `channels` lock.
    drained: AtomicBool,
}

impl ChannelRegistry {
    pub(crate) fn new(
        transport: Transport,
        addr: EndpointAddr,
        capacity: usize,
        channel_capacity: usize,
        metrics: Arc<LayerMetrics>,
    ) -> Self {
        Self {
            transport,
            addr,
            capacity,
            channel_capacity,
            metrics,
            channels: Mutex::new(HashMap::new()),
            drained: AtomicBool::new(false),
        }
    }

    /// Look up an existing channel. Never creates one.
    pub async fn get(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.lock().await.get(name).cloned()
    }

    /// Return the channel called `name`, creating it on first reference.
    pub async fn get_or_create(&self, name: &str) -> Result<Arc<Channel>, LayerError> {
        let mut channels = self.channels.lock().await;
        if let Some(channel) = channels.get(name) {
            return Ok(channel.clone());
        }
        self.create_locked(&mut channels, name).await
    }

    /// Create a channel under a fresh name `prefix + ".zmq!" + <random>`.
    pub async fn allocate(&self, prefix: &str) -> Result<Arc<Channel>, LayerError> {
        let mut channels = self.channels.lock().await;
        let name = loop {
            let candidate = naming::allocated_name(prefix, &naming::random_suffix());
            if !channels.contains_key(&candidate) {
                break candidate;
            }
        };
        naming::validate_channel_name(&name)?;

        self.create_locked(&mut channels, &name).await
    }

    async fn create_locked(
        &self,
        channels: &mut HashMap<String, Arc<Channel>>,
        name: &str,
    ) -> Result<Arc<Channel>, LayerError> {
        if self.drained.load(Ordering::Acquire) {
            return Err(LayerError::Closed);
        }
        self.check_ceiling(channels.len())?;

        let channel = Channel::open(
            name,
            &self.transport,
            &self.addr,
            self.capacity,
            self.metrics.clone(),
        )
        .await?;
        channels.insert(name.to_string(), channel.clone());

        tracing::info!("channel {name} created ({} registered)", channels.len());
        Ok(channel)
    }

    fn check_ceiling(&self, registered: usize) -> Result<(), LayerError> {
        if registered >= self.channel_capacity {
            tracing::warn!(
                "channel capacity reached ({} channels), refusing new channel",
                self.channel_capacity
            );
            return Err(LayerError::CapacityExceeded {
                limit: self.channel_capacity,
            });
        }
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.channels.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.channels.lock().await.is_empty()
    }

    /// Names of all registered channels, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.channels.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Unregister every channel and hand them to the caller for closing.
    ///
    /// Later creation attempts fail with `Closed`, so nothing can slip in
    /// behind a concurrent close.
    pub(crate) async fn drain(&self) -> Vec<Arc<Channel>> {
        let mut channels = self.channels.lock().await;
        self.drained.store(true, Ordering::Release);
        channels.drain().map(|(_, channel)| channel).collect()
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("addr", &self.addr)
            .field("channel_capacity", &self.channel_capacity)
            .finish_non_exhaustive()
    }
}
