use std::time::{Duration, Instant};

use chanlayer::{GroupLayer, Message};

/// How long a drain waits for the next message before giving up.
pub const DRAIN_IDLE: Duration = Duration::from_millis(200);

pub fn elapsed_s(start: Instant) -> f64 {
    start.elapsed().as_secs_f64()
}

pub fn rate(count: f64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count / secs
    } else {
        0.0
    }
}

/// Generate a JSON message of approximately `size` bytes.
pub fn generate_payload(size: usize, seq: u32) -> Message {
    // Overhead for JSON structure: {"seq":N,"data":"..."}
    let overhead = 30;
    let fill = if size > overhead {
        "X".repeat(size - overhead)
    } else {
        String::new()
    };
    let mut message = Message::new();
    message.insert("seq".into(), seq.into());
    message.insert("data".into(), fill.into());
    message
}

/// Receive from `channel` until it stays empty for [`DRAIN_IDLE`].
pub async fn drain(layer: &GroupLayer, channel: &str) -> anyhow::Result<u32> {
    let mut received = 0u32;
    loop {
        match tokio::time::timeout(DRAIN_IDLE, layer.receive(channel)).await {
            Ok(Ok(_)) => received += 1,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Ok(received),
        }
    }
}

/// Wait until the publisher has written or dropped `sends` group messages.
pub async fn settle(layer: &GroupLayer, sends: u64) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while Instant::now() < deadline {
        let stats = layer.stats().await;
        if stats.published + stats.publish_failures + stats.group_submit.dropped >= sends {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tracing::warn!("publisher did not settle within 30s");
}
