use chanlayer_transport::TransportError;

/// Errors surfaced to callers of the layer.
///
/// Background work (publish workers, channel receive loops) never produces
/// these; its failures are logged and counted instead.
#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error("channel {channel} is full")]
    ChannelFull { channel: String },

    #[error("channel capacity exceeded ({limit} channels)")]
    CapacityExceeded { limit: usize },

    #[error("{0} is not supported")]
    NotSupported(&'static str),

    #[error("invalid channel name: {0}")]
    InvalidChannelName(String),

    #[error("invalid group name: {0}")]
    InvalidGroupName(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("message serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("message deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    #[error("layer is closed")]
    Closed,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
