use crate::error::LayerError;
use crate::types::Message;

use super::GroupLayer;

/// What request handlers program against.
///
/// Production: [`GroupLayer`]. Handlers that only need to move messages
/// take `&dyn ChannelLayer` so they can be driven by anything that speaks
/// channels and groups.
#[async_trait::async_trait]
pub trait ChannelLayer: Send + Sync {
    /// Optional capabilities beyond send/receive/new_channel.
    fn extensions(&self) -> &'static [&'static str];

    async fn send(&self, channel: &str, message: &Message) -> Result<(), LayerError>;

    async fn receive(&self, channel: &str) -> Result<Message, LayerError>;

    async fn new_channel(&self, prefix: &str) -> Result<String, LayerError>;

    async fn group_add(&self, group: &str, channel: &str) -> Result<(), LayerError>;

    async fn group_discard(&self, group: &str, channel: &str) -> Result<(), LayerError>;

    async fn group_send(&self, group: &str, message: &Message) -> Result<(), LayerError>;

    async fn flush(&self) -> Result<(), LayerError>;

    async fn close(&self) -> Result<(), LayerError>;
}

#[async_trait::async_trait]
impl ChannelLayer for GroupLayer {
    fn extensions(&self) -> &'static [&'static str] {
        GroupLayer::extensions(self)
    }

    async fn send(&self, channel: &str, message: &Message) -> Result<(), LayerError> {
        GroupLayer::send(self, channel, message).await
    }

    async fn receive(&self, channel: &str) -> Result<Message, LayerError> {
        GroupLayer::receive(self, channel).await
    }

    async fn new_channel(&self, prefix: &str) -> Result<String, LayerError> {
        GroupLayer::new_channel(self, prefix).await
    }

    async fn group_add(&self, group: &str, channel: &str) -> Result<(), LayerError> {
        GroupLayer::group_add(self, group, channel).await
    }

    async fn group_discard(&self, group: &str, channel: &str) -> Result<(), LayerError> {
        GroupLayer::group_discard(self, group, channel).await
    }

    async fn group_send(&self, group: &str, message: &Message) -> Result<(), LayerError> {
        GroupLayer::group_send(self, group, message).await
    }

    async fn flush(&self) -> Result<(), LayerError> {
        GroupLayer::flush(self).await
    }

    async fn close(&self) -> Result<(), LayerError> {
        GroupLayer::close(self).await
    }
}
