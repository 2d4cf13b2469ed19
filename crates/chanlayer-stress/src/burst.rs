use std::time::{Duration, Instant};

use chanlayer::{GroupLayer, LayerError};

use crate::common::{drain, elapsed_s, generate_payload, rate, settle};
use crate::events::*;

pub struct BurstConfig {
    pub count: u32,
    pub payload_size: usize,
    pub rounds: u32,
    pub round_delay_ms: u64,
    pub name: String,
}

pub async fn run(layer: &GroupLayer, config: BurstConfig, start: Instant) -> anyhow::Result<()> {
    emit(&EventStarted::new(
        &config.name,
        layer.endpoint().as_str(),
        "burst",
    ));
    eprintln!(
        "Burst mode → {} msgs x {} bytes per path, {} rounds, capacity {}",
        config.count,
        config.payload_size,
        config.rounds,
        layer.capacity()
    );

    let mut group_sends = 0u64;
    for round in 1..=config.rounds {
        eprintln!("\n  Round {round}/{} ...", config.rounds);
        direct_burst(layer, &config, round, start).await?;
        group_burst(layer, &config, round, &mut group_sends, start).await?;

        if round < config.rounds && config.round_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.round_delay_ms)).await;
        }
    }

    Ok(())
}

/// Fill one channel with direct sends; everything past capacity is refused.
async fn direct_burst(
    layer: &GroupLayer,
    config: &BurstConfig,
    round: u32,
    start: Instant,
) -> anyhow::Result<()> {
    let channel = format!("stress-direct-{round}");
    let mut rejected = 0u32;
    let send_start = Instant::now();

    for seq in 1..=config.count {
        match layer
            .send(&channel, &generate_payload(config.payload_size, seq))
            .await
        {
            Ok(()) => {}
            Err(LayerError::ChannelFull { .. }) => rejected += 1,
            Err(e) => return Err(e.into()),
        }
    }
    let send_elapsed = send_start.elapsed();
    let received = drain(layer, &channel).await?;

    eprintln!(
        "    direct: {}/{} accepted, {received} received",
        config.count - rejected,
        config.count
    );

    emit(&EventBurstResult {
        event: "burst_result",
        round,
        path: "direct",
        attempted: config.count,
        rejected,
        received,
        payload_size: config.payload_size,
        send_ms: send_elapsed.as_secs_f64() * 1000.0,
        sends_per_sec: rate(config.count as f64, send_elapsed),
        elapsed_s: elapsed_s(start),
    });
    Ok(())
}

/// Flood one subscribed channel through the publisher; overflow is dropped
/// somewhere on the path and never reported to the sender.
async fn group_burst(
    layer: &GroupLayer,
    config: &BurstConfig,
    round: u32,
    group_sends: &mut u64,
    start: Instant,
) -> anyhow::Result<()> {
    let group = format!("stress-group-{round}");
    let channel = format!("stress-member-{round}");
    layer.group_add(&group, &channel).await?;

    let send_start = Instant::now();
    for seq in 1..=config.count {
        layer
            .group_send(&group, &generate_payload(config.payload_size, seq))
            .await?;
    }
    let send_elapsed = send_start.elapsed();

    *group_sends += config.count as u64;
    settle(layer, *group_sends).await;
    let received = drain(layer, &channel).await?;
    layer.group_discard(&group, &channel).await?;

    eprintln!("    group: {received}/{} received", config.count);

    emit(&EventBurstResult {
        event: "burst_result",
        round,
        path: "group",
        attempted: config.count,
        rejected: 0,
        received,
        payload_size: config.payload_size,
        send_ms: send_elapsed.as_secs_f64() * 1000.0,
        sends_per_sec: rate(config.count as f64, send_elapsed),
        elapsed_s: elapsed_s(start),
    });
    Ok(())
}
