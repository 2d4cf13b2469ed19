//! GroupLayer: the public face of the message layer.
//!
//! Owns the channel registry and the publisher, validates names and
//! messages at the boundary, and tears everything down on `close`.

mod api;

pub use api::ChannelLayer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chanlayer_transport::{EndpointAddr, Transport};

use crate::config::LayerConfig;
use crate::error::LayerError;
use crate::naming;
use crate::publisher::Publisher;
use crate::registry::ChannelRegistry;
use crate::stats::{LayerMetrics, LayerStats};
use crate::types::{Message, EXTENSIONS};

/// Channels and groups over one transport endpoint.
///
/// Call [`close`](GroupLayer::close) for an orderly shutdown. Dropping the
/// layer without it aborts the publish workers and receive loops, losing
/// anything still queued.
pub struct GroupLayer {
    config: LayerConfig,
    endpoint: EndpointAddr,
    transport: Transport,
    registry: ChannelRegistry,
    publisher: Publisher,
    metrics: Arc<LayerMetrics>,
    closed: AtomicBool,
}

impl GroupLayer {
    /// Bind a layer to the endpoint named in `config`.
    ///
    /// The transport is owned by the caller; several layers may share it as
    /// long as each uses its own endpoint.
    pub async fn bind(transport: &Transport, config: LayerConfig) -> Result<Self, LayerError> {
        let endpoint = config.validate()?;
        let metrics = Arc::new(LayerMetrics::default());

        let publisher = Publisher::bind(
            transport,
            &endpoint,
            config.capacity,
            config.expiry,
            config.workers,
            metrics.clone(),
        )
        .await?;

        let registry = ChannelRegistry::new(
            transport.clone(),
            endpoint.clone(),
            config.capacity,
            config.channel_capacity,
            metrics.clone(),
        );

        tracing::info!(
            "group layer on {endpoint}: capacity {}, channel capacity {}, expiry {:?}",
            config.capacity,
            config.channel_capacity,
            config.expiry
        );

        Ok(Self {
            config,
            endpoint,
            transport: transport.clone(),
            registry,
            publisher,
            metrics,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), LayerError> {
        if self.closed.load(Ordering::Acquire) {
            Err(LayerError::Closed)
        } else {
            Ok(())
        }
    }

    fn encode(message: &Message) -> Result<String, LayerError> {
        naming::validate_message(message)?;
        serde_json::to_string(message).map_err(LayerError::Serialization)
    }

    // ── Direct delivery ─────────────────────────────

    /// Queue `message` on `channel`, creating the channel if needed.
    ///
    /// Fails with [`LayerError::ChannelFull`] when the channel's queue is at
    /// capacity. Never touches the transport.
    pub async fn send(&self, channel: &str, message: &Message) -> Result<(), LayerError> {
        self.ensure_open()?;
        naming::validate_channel_name(channel)?;
        let text = Self::encode(message)?;

        tracing::debug!("send to {channel}");
        self.registry.get_or_create(channel).await?.send(text)
    }

    /// Wait for the next message on `channel`, creating the channel if needed.
    pub async fn receive(&self, channel: &str) -> Result<Message, LayerError> {
        self.ensure_open()?;
        naming::validate_channel_name(channel)?;

        let message = self.registry.get_or_create(channel).await?.receive().await?;
        tracing::debug!("received on {channel}");
        Ok(message)
    }

    /// Create a channel with a fresh, unused name and return the name.
    pub async fn new_channel(&self, prefix: &str) -> Result<String, LayerError> {
        self.ensure_open()?;
        let channel = self.registry.allocate(prefix).await?;
        tracing::info!("new channel: {}", channel.name());
        Ok(channel.name().to_string())
    }

    // ── Groups ──────────────────────────────────────

    /// Subscribe `channel` to `group`, creating the channel if needed.
    pub async fn group_add(&self, group: &str, channel: &str) -> Result<(), LayerError> {
        self.ensure_open()?;
        naming::validate_group_name(group)?;
        naming::validate_channel_name(channel)?;

        tracing::debug!("group add: {group} <- {channel}");
        self.registry.get_or_create(channel).await?.subscribe(group).await;
        Ok(())
    }

    /// Unsubscribe `channel` from `group`.
    ///
    /// An unknown channel is left alone: nothing is created and no error is
    /// returned.
    pub async fn group_discard(&self, group: &str, channel: &str) -> Result<(), LayerError> {
        self.ensure_open()?;
        naming::validate_group_name(group)?;
        naming::validate_channel_name(channel)?;

        match self.registry.get(channel).await {
            Some(existing) => {
                tracing::debug!("group discard: {group} -/- {channel}");
                existing.unsubscribe(group).await;
            }
            None => tracing::debug!("group discard: {channel} unknown, ignoring"),
        }
        Ok(())
    }

    /// Publish `message` to every channel subscribed to `group`.
    ///
    /// Best effort: overflow and transport failures drop the message without
    /// an error. Only invalid input or a closed layer fail.
    pub async fn group_send(&self, group: &str, message: &Message) -> Result<(), LayerError> {
        self.ensure_open()?;
        naming::validate_group_name(group)?;
        let text = Self::encode(message)?;

        tracing::debug!("group send to {group}");
        self.publisher.send_group(group, text);
        Ok(())
    }

    // ── Lifecycle ───────────────────────────────────

    /// Not implemented by this layer.
    pub async fn flush(&self) -> Result<(), LayerError> {
        Err(LayerError::NotSupported("flush"))
    }

    /// Stop the publisher, close every channel and release the endpoint.
    ///
    /// Safe to call more than once.
    pub async fn close(&self) -> Result<(), LayerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!("closing group layer on {}", self.endpoint);

        self.publisher.close().await;
        for channel in self.registry.drain().await {
            channel.close().await;
        }
        self.transport.release(&self.endpoint).await;

        tracing::info!("group layer on {} closed", self.endpoint);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ── Introspection ───────────────────────────────

    pub fn extensions(&self) -> &'static [&'static str] {
        EXTENSIONS
    }

    pub fn endpoint(&self) -> &EndpointAddr {
        &self.endpoint
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn channel_capacity(&self) -> usize {
        self.config.channel_capacity
    }

    pub fn expiry(&self) -> Duration {
        self.config.expiry
    }

    pub fn group_expiry(&self) -> Duration {
        self.config.group_expiry
    }

    /// Names of all live channels, sorted.
    pub async fn channels(&self) -> Vec<String> {
        self.registry.names().await
    }

    /// Groups `channel` is subscribed to, or `None` for an unknown channel.
    pub async fn subscriptions(&self, channel: &str) -> Option<Vec<String>> {
        match self.registry.get(channel).await {
            Some(existing) => Some(existing.subscriptions().await),
            None => None,
        }
    }

    pub async fn stats(&self) -> LayerStats {
        self.metrics.snapshot(self.registry.len().await)
    }
}

impl std::fmt::Debug for GroupLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupLayer")
            .field("endpoint", &self.endpoint)
            .field("config", &self.config)
            .field("publisher", &self.publisher)
            .field("closed", &self.is_closed())
            .finish()
    }
}
