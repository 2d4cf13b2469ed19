//! Channel and group message layer.
//!
//! Lets independently scheduled consumers exchange JSON objects in two ways:
//!
//! - **direct**: [`GroupLayer::send`] pushes into one named channel's queue,
//!   entirely in memory;
//! - **fan-out**: [`GroupLayer::group_send`] publishes a framed message on the
//!   shared transport, and every channel subscribed to the group picks it up.
//!
//! Every queue is bounded. A full channel rejects direct sends with
//! [`LayerError::ChannelFull`]; group traffic is at-most-once and is dropped
//! silently when any queue on its path is full.
//!
//! Wire format: `"<group>|<json>"`, one text frame per message.

pub mod channel;
pub mod config;
pub mod error;
pub mod framer;
pub mod layer;
pub mod naming;
pub mod publisher;
pub mod registry;
pub mod stats;
pub mod types;

pub use channel::Channel;
pub use config::LayerConfig;
pub use error::LayerError;
pub use framer::FrameError;
pub use layer::{ChannelLayer, GroupLayer};
pub use publisher::Publisher;
pub use registry::ChannelRegistry;
pub use stats::LayerStats;
pub use types::{Message, DEFAULT_CHANNEL_PREFIX, EXTENSIONS};

pub use chanlayer_transport::{EndpointAddr, Transport, TransportError};
