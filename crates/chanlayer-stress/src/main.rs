mod burst;
mod common;
mod events;
mod fanout;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chanlayer::{GroupLayer, LayerConfig, Transport};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chanlayer-stress", about = "Load generator for the channel layer")]
struct Cli {
    /// Label written into every event.
    #[arg(short, long, default_value = "run")]
    name: String,

    /// In-process endpoint the layer binds.
    #[arg(long, default_value = "inproc://stress")]
    endpoint: String,

    /// Bound of every queue in the layer.
    #[arg(long, default_value = "1000")]
    capacity: usize,

    /// Maximum number of channels.
    #[arg(long, default_value = "1000")]
    channel_capacity: usize,

    /// Number of publish workers.
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Per-publish timeout in ms.
    #[arg(long, default_value = "60000")]
    expiry: u64,

    /// Also write events to a JSONL file in this directory.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// One group, many subscribed channels: measure fan-out delivery.
    Fanout {
        /// Number of subscribed channels.
        #[arg(long, default_value = "10")]
        channels: usize,
        /// Group messages to publish.
        #[arg(long, default_value = "100")]
        count: u32,
        /// Approximate payload size in bytes.
        #[arg(long, default_value = "256")]
        payload_size: usize,
    },

    /// Flood one channel without receiving: measure what is kept and dropped.
    Burst {
        /// Messages per round, on each path.
        #[arg(long, default_value = "5000")]
        count: u32,
        /// Approximate payload size in bytes.
        #[arg(long, default_value = "256")]
        payload_size: usize,
        /// Number of rounds.
        #[arg(long, default_value = "1")]
        rounds: u32,
        /// Delay between rounds in ms.
        #[arg(long, default_value = "500")]
        round_delay: u64,
    },
}

impl Command {
    fn mode(&self) -> &'static str {
        match self {
            Command::Fanout { .. } => "fanout",
            Command::Burst { .. } => "burst",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let start = Instant::now();

    if let Some(dir) = &cli.output_dir {
        let path = events::record_to(dir, &cli.name, cli.command.mode())?;
        eprintln!("Writing events to {}", path.display());
    }

    let config = LayerConfig::new()
        .endpoint(cli.endpoint.as_str())
        .capacity(cli.capacity)
        .channel_capacity(cli.channel_capacity)
        .workers(cli.workers)
        .expiry(Duration::from_millis(cli.expiry));
    let transport = Transport::new();
    let layer = Arc::new(GroupLayer::bind(&transport, config).await?);

    eprintln!("chanlayer-stress v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("Endpoint: {}", layer.endpoint());
    eprintln!();

    let outcome = match cli.command {
        Command::Fanout {
            channels,
            count,
            payload_size,
        } => {
            fanout::run(
                layer.clone(),
                fanout::FanoutConfig {
                    channels,
                    count,
                    payload_size,
                    name: cli.name,
                },
                start,
            )
            .await
        }

        Command::Burst {
            count,
            payload_size,
            rounds,
            round_delay,
        } => {
            burst::run(
                &layer,
                burst::BurstConfig {
                    count,
                    payload_size,
                    rounds,
                    round_delay_ms: round_delay,
                    name: cli.name,
                },
                start,
            )
            .await
        }
    };

    events::emit(&events::EventStats::new(layer.stats().await, start));
    layer.close().await?;
    outcome
}
