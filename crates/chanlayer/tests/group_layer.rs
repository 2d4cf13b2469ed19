//! Integration tests: a GroupLayer bound to an in-process transport.
//!
//! Covers direct delivery, group fan-out, capacity handling on both paths,
//! channel allocation limits and shutdown.

use std::collections::BTreeSet;
use std::time::Duration;

use chanlayer::{
    GroupLayer, LayerConfig, LayerError, Message, Transport, TransportError,
    DEFAULT_CHANNEL_PREFIX,
};
use serde_json::{json, Value};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();
}

fn message(value: Value) -> Message {
    match value {
        Value::Object(map) => map,
        _ => panic!("test messages must be objects"),
    }
}

async fn bind(transport: &Transport, endpoint: &str, config: LayerConfig) -> GroupLayer {
    GroupLayer::bind(transport, config.endpoint(endpoint))
        .await
        .unwrap()
}

async fn receive_within(layer: &GroupLayer, channel: &str, wait: Duration) -> Option<Message> {
    match tokio::time::timeout(wait, layer.receive(channel)).await {
        Ok(result) => Some(result.unwrap()),
        Err(_) => None,
    }
}

/// Wait until every group send has been written, dropped or failed.
async fn settle(layer: &GroupLayer, sends: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let stats = layer.stats().await;
            if stats.published + stats.publish_failures + stats.group_submit.dropped >= sends {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("group sends never settled");
    // Let receive loops move the last frames into channel queues.
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ── Direct delivery ─────────────────────────────────────────────────

#[tokio::test]
async fn direct_send_bypasses_transport() {
    init_tracing();
    let transport = Transport::new();
    let layer = bind(&transport, "inproc://direct", LayerConfig::new()).await;

    layer.send("c1", &message(json!({"x": 1}))).await.unwrap();
    let received = layer.receive("c1").await.unwrap();
    assert_eq!(Value::Object(received), json!({"x": 1}));

    let stats = layer.stats().await;
    assert_eq!(stats.direct.accepted, 1);
    assert_eq!(stats.group_submit.attempts(), 0);
    assert_eq!(stats.published, 0);
    assert_eq!(stats.inbound.attempts(), 0);

    layer.close().await.unwrap();
}

#[tokio::test]
async fn direct_send_to_full_channel_fails_immediately() {
    init_tracing();
    let transport = Transport::new();
    let layer = bind(&transport, "inproc://full", LayerConfig::new().capacity(2)).await;

    layer.send("c1", &message(json!({"n": 1}))).await.unwrap();
    layer.send("c1", &message(json!({"n": 2}))).await.unwrap();

    let third = tokio::time::timeout(
        Duration::from_millis(500),
        layer.send("c1", &message(json!({"n": 3}))),
    )
    .await
    .expect("send to a full channel must not block");
    match third {
        Err(LayerError::ChannelFull { channel }) => assert_eq!(channel, "c1"),
        other => panic!("expected ChannelFull, got {other:?}"),
    }

    // The rejected message never shows up.
    let first = layer.receive("c1").await.unwrap();
    let second = layer.receive("c1").await.unwrap();
    assert_eq!(first["n"], 1);
    assert_eq!(second["n"], 2);
    assert!(receive_within(&layer, "c1", Duration::from_millis(50)).await.is_none());

    layer.close().await.unwrap();
}

#[tokio::test]
async fn receive_preserves_arrival_order() {
    init_tracing();
    let transport = Transport::new();
    let layer = bind(&transport, "inproc://fifo", LayerConfig::new()).await;

    for n in 0..10 {
        layer.send("c1", &message(json!({"n": n}))).await.unwrap();
    }
    for n in 0..10 {
        assert_eq!(layer.receive("c1").await.unwrap()["n"], n);
    }

    layer.close().await.unwrap();
}

// ── Groups ──────────────────────────────────────────────────────────

#[tokio::test]
async fn group_send_reaches_only_subscribers() {
    init_tracing();
    let transport = Transport::new();
    let layer = bind(&transport, "inproc://fanout", LayerConfig::new()).await;

    layer.group_add("room", "alice").await.unwrap();
    layer.group_add("room", "bob").await.unwrap();
    layer.group_add("other", "carol").await.unwrap();

    layer
        .group_send("room", &message(json!({"text": "hi"})))
        .await
        .unwrap();
    settle(&layer, 1).await;

    for member in ["alice", "bob"] {
        let received = receive_within(&layer, member, Duration::from_secs(5))
            .await
            .unwrap_or_else(|| panic!("{member} got nothing"));
        assert_eq!(Value::Object(received), json!({"text": "hi"}));
        // Exactly once.
        assert!(receive_within(&layer, member, Duration::from_millis(50)).await.is_none());
    }
    assert!(receive_within(&layer, "carol", Duration::from_millis(50)).await.is_none());

    layer.close().await.unwrap();
}

#[tokio::test]
async fn group_names_do_not_match_by_prefix() {
    init_tracing();
    let transport = Transport::new();
    let layer = bind(&transport, "inproc://prefix", LayerConfig::new()).await;

    layer.group_add("chat", "c1").await.unwrap();
    layer
        .group_send("chatter", &message(json!({"n": 1})))
        .await
        .unwrap();
    settle(&layer, 1).await;

    assert!(receive_within(&layer, "c1", Duration::from_millis(50)).await.is_none());
    layer.close().await.unwrap();
}

#[tokio::test]
async fn payload_with_delimiter_survives_the_wire() {
    init_tracing();
    let transport = Transport::new();
    let layer = bind(&transport, "inproc://pipes", LayerConfig::new()).await;

    layer.group_add("g", "c1").await.unwrap();
    let sent = json!({"text": "a|b||c", "nested": {"k|ey": "|"}});
    layer.group_send("g", &message(sent.clone())).await.unwrap();

    let received = receive_within(&layer, "c1", Duration::from_secs(5))
        .await
        .expect("message lost");
    assert_eq!(Value::Object(received), sent);
    layer.close().await.unwrap();
}

#[tokio::test]
async fn unsubscribe_stops_future_but_keeps_queued() {
    init_tracing();
    let transport = Transport::new();
    let layer = bind(&transport, "inproc://discard", LayerConfig::new()).await;

    layer.group_add("g", "c1").await.unwrap();
    layer.group_send("g", &message(json!({"n": 1}))).await.unwrap();
    settle(&layer, 1).await;

    layer.group_discard("g", "c1").await.unwrap();
    assert_eq!(layer.subscriptions("c1").await, Some(vec![]));

    layer.group_send("g", &message(json!({"n": 2}))).await.unwrap();
    settle(&layer, 2).await;

    let kept = layer.receive("c1").await.unwrap();
    assert_eq!(kept["n"], 1);
    assert!(receive_within(&layer, "c1", Duration::from_millis(50)).await.is_none());

    layer.close().await.unwrap();
}

#[tokio::test]
async fn group_add_and_discard_are_idempotent() {
    init_tracing();
    let transport = Transport::new();
    let layer = bind(&transport, "inproc://idempotent", LayerConfig::new()).await;

    layer.group_add("g", "c1").await.unwrap();
    layer.group_add("g", "c1").await.unwrap();
    layer.group_add("h", "c1").await.unwrap();
    assert_eq!(
        layer.subscriptions("c1").await,
        Some(vec!["g".to_string(), "h".to_string()])
    );

    layer.group_discard("never", "c1").await.unwrap();
    layer.group_discard("g", "c1").await.unwrap();
    layer.group_discard("g", "c1").await.unwrap();
    assert_eq!(layer.subscriptions("c1").await, Some(vec!["h".to_string()]));

    layer.close().await.unwrap();
}

/// Discarding from a channel nobody created is ignored and creates nothing.
#[tokio::test]
async fn discard_on_unknown_channel_is_ignored() {
    init_tracing();
    let transport = Transport::new();
    let layer = bind(&transport, "inproc://unknown", LayerConfig::new()).await;

    layer.group_discard("g", "ghost").await.unwrap();
    assert!(layer.channels().await.is_empty());
    assert_eq!(layer.subscriptions("ghost").await, None);

    layer.close().await.unwrap();
}

/// capacity=2, three group sends, nobody receiving: two arrive, one is
/// dropped, and no call fails.
#[tokio::test]
async fn group_overflow_drops_without_error() {
    init_tracing();
    let transport = Transport::new();
    let layer = bind(&transport, "inproc://overflow", LayerConfig::new().capacity(2)).await;

    layer.group_add("g", "c1").await.unwrap();
    for n in 1..=3 {
        layer.group_send("g", &message(json!({"n": n}))).await.unwrap();
    }
    settle(&layer, 3).await;

    let mut seen = BTreeSet::new();
    for _ in 0..2 {
        let received = receive_within(&layer, "c1", Duration::from_secs(5))
            .await
            .expect("expected two deliveries");
        seen.insert(received["n"].as_u64().unwrap());
    }
    assert_eq!(seen.len(), 2, "no duplicates");
    assert!(seen.iter().all(|n| (1..=3).contains(n)));
    assert!(receive_within(&layer, "c1", Duration::from_millis(100)).await.is_none());

    layer.close().await.unwrap();
}

/// A flood far beyond capacity is accepted call by call; only what fits is
/// ever delivered, and nothing is delivered twice.
#[tokio::test]
async fn group_flood_never_errors_or_duplicates() {
    init_tracing();
    let transport = Transport::new();
    let layer = bind(&transport, "inproc://flood", LayerConfig::new().capacity(4)).await;

    layer.group_add("g", "c1").await.unwrap();
    for n in 0..200u64 {
        layer.group_send("g", &message(json!({"n": n}))).await.unwrap();
    }
    settle(&layer, 200).await;

    let mut seen = BTreeSet::new();
    while let Some(received) = receive_within(&layer, "c1", Duration::from_millis(100)).await {
        assert!(seen.insert(received["n"].as_u64().unwrap()), "duplicate delivery");
    }

    let stats = layer.stats().await;
    assert!(!seen.is_empty());
    assert!(seen.len() as u64 <= stats.inbound.accepted);
    assert!(seen.len() <= 200);

    layer.close().await.unwrap();
}

// ── Channel allocation ──────────────────────────────────────────────

#[tokio::test]
async fn new_channel_names_are_unique_and_prefixed() {
    init_tracing();
    let transport = Transport::new();
    let layer = bind(&transport, "inproc://names", LayerConfig::new()).await;

    let mut names = BTreeSet::new();
    for _ in 0..20 {
        let name = layer.new_channel(DEFAULT_CHANNEL_PREFIX).await.unwrap();
        assert!(name.starts_with("specific..zmq!"));
        names.insert(name);
    }
    assert_eq!(names.len(), 20);
    assert_eq!(layer.channels().await.len(), 20);

    let custom = layer.new_channel("http.response").await.unwrap();
    assert!(custom.starts_with("http.response.zmq!"));

    layer.close().await.unwrap();
}

/// Exactly `channel_capacity` channels may exist; one more is refused.
#[tokio::test]
async fn new_channel_ceiling_boundary() {
    init_tracing();
    let transport = Transport::new();
    let layer = bind(
        &transport,
        "inproc://ceiling",
        LayerConfig::new().channel_capacity(3),
    )
    .await;

    for _ in 0..3 {
        layer.new_channel(DEFAULT_CHANNEL_PREFIX).await.unwrap();
    }
    assert!(matches!(
        layer.new_channel(DEFAULT_CHANNEL_PREFIX).await,
        Err(LayerError::CapacityExceeded { limit: 3 })
    ));
    // Lazily created channels count against the same ceiling.
    assert!(matches!(
        layer.send("late", &message(json!({}))).await,
        Err(LayerError::CapacityExceeded { limit: 3 })
    ));
    assert_eq!(layer.stats().await.channels, 3);

    layer.close().await.unwrap();
}

// ── Validation ──────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_input_is_rejected() {
    init_tracing();
    let transport = Transport::new();
    let layer = bind(&transport, "inproc://validation", LayerConfig::new()).await;
    let ok = message(json!({"k": "v"}));

    assert!(matches!(
        layer.send("bad name", &ok).await,
        Err(LayerError::InvalidChannelName(_))
    ));
    assert!(matches!(
        layer.group_add("bad|group", "c1").await,
        Err(LayerError::InvalidGroupName(_))
    ));
    assert!(matches!(
        layer.group_send("", &ok).await,
        Err(LayerError::InvalidGroupName(_))
    ));
    assert!(matches!(
        layer
            .send("c1", &message(json!({"__asgi_channel__": "x"})))
            .await,
        Err(LayerError::InvalidMessage(_))
    ));
    assert!(layer.channels().await.is_empty());

    layer.close().await.unwrap();
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn flush_is_not_supported() {
    init_tracing();
    let transport = Transport::new();
    let layer = bind(&transport, "inproc://flush", LayerConfig::new()).await;

    assert!(matches!(
        layer.flush().await,
        Err(LayerError::NotSupported("flush"))
    ));
    assert_eq!(layer.extensions(), &["groups", "flush"]);

    layer.close().await.unwrap();
}

#[tokio::test]
async fn close_is_idempotent_and_final() {
    init_tracing();
    let transport = Transport::new();
    let endpoint = "inproc://close";
    let layer = bind(&transport, endpoint, LayerConfig::new()).await;

    layer.group_add("g", "c1").await.unwrap();
    layer.send("c2", &message(json!({"n": 1}))).await.unwrap();

    layer.close().await.unwrap();
    layer.close().await.unwrap();
    assert!(layer.is_closed());
    assert!(layer.channels().await.is_empty());

    let ok = message(json!({}));
    assert!(matches!(layer.send("c2", &ok).await, Err(LayerError::Closed)));
    assert!(matches!(layer.receive("c2").await, Err(LayerError::Closed)));
    assert!(matches!(layer.group_send("g", &ok).await, Err(LayerError::Closed)));
    assert!(matches!(
        layer.new_channel(DEFAULT_CHANNEL_PREFIX).await,
        Err(LayerError::Closed)
    ));

    // The endpoint is free for a new layer.
    let addr = endpoint.parse().unwrap();
    assert!(!transport.is_bound(&addr).await);
    assert_eq!(transport.subscriber_count(&addr).await, 0);
    let again = bind(&transport, endpoint, LayerConfig::new()).await;
    again.close().await.unwrap();
}

#[tokio::test]
async fn close_wakes_pending_receive() {
    init_tracing();
    let transport = Transport::new();
    let layer = std::sync::Arc::new(bind(&transport, "inproc://wake", LayerConfig::new()).await);

    layer.group_add("g", "c1").await.unwrap();
    let waiter = {
        let layer = layer.clone();
        tokio::spawn(async move { layer.receive("c1").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    layer.close().await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("receive was not woken by close")
        .unwrap();
    assert!(matches!(result, Err(LayerError::Closed)));
}

/// Operations racing `close` either finish or see `Closed`; none of them
/// leaves a channel behind.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn close_racing_sends_leaves_no_channels() {
    init_tracing();
    let transport = Transport::new();

    for round in 0..20 {
        let endpoint = format!("inproc://race-{round}");
        let layer = std::sync::Arc::new(bind(&transport, &endpoint, LayerConfig::new()).await);

        let senders: Vec<_> = (0..8)
            .map(|n| {
                let layer = layer.clone();
                tokio::spawn(async move {
                    layer
                        .send(&format!("racer-{n}"), &message(json!({"n": n})))
                        .await
                })
            })
            .collect();
        layer.close().await.unwrap();

        for sender in senders {
            match sender.await.unwrap() {
                Ok(()) | Err(LayerError::Closed) => {}
                Err(e) => panic!("unexpected error racing close: {e}"),
            }
        }
        assert!(layer.channels().await.is_empty());
        let addr = endpoint.parse().unwrap();
        assert_eq!(transport.subscriber_count(&addr).await, 0);
    }
}

#[tokio::test]
async fn dropping_an_open_layer_frees_its_endpoint() {
    init_tracing();
    let transport = Transport::new();
    let endpoint = "inproc://dropped";
    let layer = bind(&transport, endpoint, LayerConfig::new()).await;
    layer.group_add("g", "c1").await.unwrap();
    layer.send("c2", &message(json!({"n": 1}))).await.unwrap();

    drop(layer);

    let addr = endpoint.parse().unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while transport.is_bound(&addr).await || transport.subscriber_count(&addr).await > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("background tasks outlived the layer");

    let again = bind(&transport, endpoint, LayerConfig::new()).await;
    again.close().await.unwrap();
}

#[tokio::test]
async fn two_layers_cannot_share_an_endpoint() {
    init_tracing();
    let transport = Transport::new();
    let first = bind(&transport, "inproc://shared", LayerConfig::new()).await;

    let second = GroupLayer::bind(&transport, LayerConfig::new().endpoint("inproc://shared")).await;
    assert!(matches!(
        second,
        Err(LayerError::Transport(TransportError::AddressInUse(_)))
    ));

    // Separate endpoints on one transport are independent.
    let other = bind(&transport, "inproc://separate", LayerConfig::new()).await;
    first.group_add("g", "c1").await.unwrap();
    other.group_add("g", "c1").await.unwrap();
    first.group_send("g", &message(json!({"from": "first"}))).await.unwrap();
    settle(&first, 1).await;

    assert!(receive_within(&first, "c1", Duration::from_secs(5)).await.is_some());
    assert!(receive_within(&other, "c1", Duration::from_millis(50)).await.is_none());

    first.close().await.unwrap();
    other.close().await.unwrap();
}

#[tokio::test]
async fn bind_rejects_bad_config() {
    init_tracing();
    let transport = Transport::new();

    let zero = GroupLayer::bind(
        &transport,
        LayerConfig::new().endpoint("inproc://zero").capacity(0),
    )
    .await;
    assert!(matches!(zero, Err(LayerError::Config(_))));

    let network = GroupLayer::bind(&transport, LayerConfig::new().endpoint("tcp://0.0.0.0:1")).await;
    assert!(matches!(
        network,
        Err(LayerError::Transport(TransportError::InvalidEndpoint(_)))
    ));
}
