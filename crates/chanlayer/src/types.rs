/// A message is any JSON object.
pub type Message = serde_json::Map<String, serde_json::Value>;

/// Prefix used by [`GroupLayer::new_channel`](crate::GroupLayer::new_channel)
/// when the caller has no preference.
pub const DEFAULT_CHANNEL_PREFIX: &str = "specific.";

/// Optional capabilities this layer advertises beyond plain send/receive.
pub const EXTENSIONS: &[&str] = &["groups", "flush"];
