use std::sync::Arc;
use std::time::Instant;

use chanlayer::{GroupLayer, DEFAULT_CHANNEL_PREFIX};
use tokio::task::JoinSet;

use crate::common::{drain, elapsed_s, generate_payload, rate, settle};
use crate::events::*;

const GROUP: &str = "stress-fanout";

pub struct FanoutConfig {
    pub channels: usize,
    pub count: u32,
    pub payload_size: usize,
    pub name: String,
}

pub async fn run(
    layer: Arc<GroupLayer>,
    config: FanoutConfig,
    start: Instant,
) -> anyhow::Result<()> {
    emit(&EventStarted::new(
        &config.name,
        layer.endpoint().as_str(),
        "fanout",
    ));
    eprintln!(
        "Fanout mode → {} channels, {} msgs x {} bytes",
        config.channels, config.count, config.payload_size
    );

    let mut channels = Vec::with_capacity(config.channels);
    for _ in 0..config.channels {
        let channel = layer.new_channel(DEFAULT_CHANNEL_PREFIX).await?;
        layer.group_add(GROUP, &channel).await?;
        channels.push(channel);
    }

    let fanout_start = Instant::now();

    // Phase 1: one consumer per channel, draining while we publish.
    let mut consumers = JoinSet::new();
    for channel in channels {
        let layer = layer.clone();
        consumers.spawn(async move { drain(&layer, &channel).await });
    }

    for seq in 1..=config.count {
        layer
            .group_send(GROUP, &generate_payload(config.payload_size, seq))
            .await?;
    }
    settle(&layer, config.count as u64).await;

    // Phase 2: each consumer returns once its channel has gone idle.
    let mut counts = Vec::with_capacity(config.channels);
    while let Some(joined) = consumers.join_next().await {
        counts.push(joined??);
    }

    let elapsed = fanout_start.elapsed();
    let copies_received: u64 = counts.iter().map(|&c| c as u64).sum();
    let copies_expected = config.count as u64 * config.channels as u64;

    eprintln!(
        "  {copies_received}/{copies_expected} copies in {:.1}ms",
        elapsed.as_secs_f64() * 1000.0
    );

    emit(&EventFanoutResult {
        event: "fanout_result",
        channels: config.channels,
        messages_sent: config.count,
        copies_received,
        copies_expected,
        per_channel_min: counts.iter().copied().min().unwrap_or(0) as u64,
        per_channel_max: counts.iter().copied().max().unwrap_or(0) as u64,
        payload_size: config.payload_size,
        elapsed_ms: elapsed.as_secs_f64() * 1000.0,
        copies_per_sec: rate(copies_received as f64, elapsed),
        elapsed_s: elapsed_s(start),
    });

    Ok(())
}
