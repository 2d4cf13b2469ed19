//! Traffic counters shared by the publisher, every channel and the façade.

use chanlayer_metrics::{Counter, DropMeter, MeterSnapshot};
use serde::{Deserialize, Serialize};

/// Live counters, one set per layer.
#[derive(Debug, Default)]
pub(crate) struct LayerMetrics {
    /// Direct sends: queued vs. rejected with `ChannelFull`.
    pub direct: DropMeter,
    /// Group sends: queued for a worker vs. dropped at the submission queue.
    pub group_submit: DropMeter,
    /// Frames written to the publish socket.
    pub published: Counter,
    /// Frames a worker gave up on (timeout or transport error).
    pub publish_failures: Counter,
    /// Frames a channel's receive loop queued vs. dropped on a full queue.
    pub inbound: DropMeter,
    /// Frames that could not be split into group and payload.
    pub malformed: Counter,
}

impl LayerMetrics {
    pub fn snapshot(&self, channels: usize) -> LayerStats {
        LayerStats {
            channels,
            direct: self.direct.snapshot(),
            group_submit: self.group_submit.snapshot(),
            published: self.published.get(),
            publish_failures: self.publish_failures.get(),
            inbound: self.inbound.snapshot(),
            malformed: self.malformed.get(),
        }
    }
}

/// Point-in-time view of a layer's traffic, returned by
/// [`GroupLayer::stats`](crate::GroupLayer::stats).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerStats {
    pub channels: usize,
    pub direct: MeterSnapshot,
    pub group_submit: MeterSnapshot,
    pub published: u64,
    pub publish_failures: u64,
    pub inbound: MeterSnapshot,
    pub malformed: u64,
}
