//! Publisher: the shared fan-out sender.
//!
//! Group sends land in a bounded submission queue; a fixed pool of workers
//! drains it, frames each item and writes it to the one publish socket. The
//! socket is only ever written by these workers.
//!
//! Group delivery is at-most-once: a full submission queue, a write that
//! outlives `expiry`, or a transport error all drop the message with a
//! warning. None of them reach the caller, and nothing is retried.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chanlayer_transport::{EndpointAddr, PubSocket, SendReport, Transport, TransportError};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::LayerError;
use crate::framer;
use crate::stats::LayerMetrics;

/// Default size of the worker pool.
pub const DEFAULT_WORKERS: usize = 4;

/// Item in the submission queue.
enum Submission {
    Publish { group: String, text: String },
    /// Tells exactly one worker to exit.
    Stop,
}

type SharedQueue = Arc<Mutex<mpsc::Receiver<Submission>>>;

/// Where publish workers write frames.
///
/// Production: [`PubSocket`]. Tests swap in sinks that record or stall.
#[async_trait::async_trait]
pub(crate) trait FrameSink: Send + Sync {
    async fn send(&self, frame: &str) -> Result<SendReport, TransportError>;

    async fn close(&self);
}

#[async_trait::async_trait]
impl FrameSink for PubSocket {
    async fn send(&self, frame: &str) -> Result<SendReport, TransportError> {
        PubSocket::send(self, frame).await
    }

    async fn close(&self) {
        PubSocket::close(self).await
    }
}

pub struct Publisher {
    sink: Arc<dyn FrameSink>,
    queue: mpsc::Sender<Submission>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    closed: AtomicBool,
    metrics: Arc<LayerMetrics>,
}

impl Publisher {
    /// Bind the publish socket at `addr` and start `workers` workers.
    pub(crate) async fn bind(
        transport: &Transport,
        addr: &EndpointAddr,
        capacity: usize,
        expiry: Duration,
        workers: usize,
        metrics: Arc<LayerMetrics>,
    ) -> Result<Self, LayerError> {
        let socket = transport.bind_publisher(addr, capacity).await?;
        tracing::info!("publisher bound to {addr} with {workers} workers");
        Ok(Self::start(
            Arc::new(socket),
            capacity,
            expiry,
            workers,
            metrics,
        ))
    }

    /// Start `workers` workers writing into `sink`.
    pub(crate) fn start(
        sink: Arc<dyn FrameSink>,
        capacity: usize,
        expiry: Duration,
        workers: usize,
        metrics: Arc<LayerMetrics>,
    ) -> Self {
        let (queue, rx) = mpsc::channel(capacity);
        let rx: SharedQueue = Arc::new(Mutex::new(rx));

        let handles = (0..workers)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    rx.clone(),
                    sink.clone(),
                    expiry,
                    metrics.clone(),
                ))
            })
            .collect();

        Self {
            sink,
            queue,
            workers: Mutex::new(handles),
            worker_count: workers,
            closed: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Items waiting for a worker.
    pub fn pending(&self) -> usize {
        self.queue.max_capacity() - self.queue.capacity()
    }

    /// Hand a JSON payload to the workers. Never fails; drops on overflow.
    pub fn send_group(&self, group: &str, text: String) {
        if self.closed.load(Ordering::Acquire) {
            tracing::debug!("publisher closed, dropping message for group {group}");
            return;
        }

        let submission = Submission::Publish {
            group: group.to_string(),
            text,
        };
        match self.queue.try_send(submission) {
            Ok(()) => self.metrics.group_submit.record(true),
            Err(TrySendError::Full(_)) => {
                self.metrics.group_submit.record(false);
                tracing::warn!("submission queue full, dropping message for group {group}");
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.group_submit.record(false);
                tracing::warn!("publish workers gone, dropping message for group {group}");
            }
        }
    }

    /// Stop every worker, wait for them, then close the sink.
    ///
    /// Stop items compete with queued messages, so some messages submitted
    /// before `close` may never be written. Nothing is written once this
    /// returns. Calling it again is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let workers = std::mem::take(&mut *self.workers.lock().await);

        tracing::info!("stopping {} publish workers", workers.len());
        for _ in 0..workers.len() {
            if self.queue.send(Submission::Stop).await.is_err() {
                break;
            }
        }

        for worker in workers {
            if let Err(e) = worker.await {
                tracing::warn!("publish worker ended abnormally: {e}");
            }
        }

        self.sink.close().await;
        tracing::info!("publisher closed");
    }
}

/// Dropping without [`close`](Publisher::close) aborts the workers; frames
/// still queued are lost.
impl Drop for Publisher {
    fn drop(&mut self) {
        for worker in self.workers.get_mut().drain(..) {
            worker.abort();
        }
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("workers", &self.worker_count)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .field("pending", &self.pending())
            .finish()
    }
}

async fn worker_loop(
    id: usize,
    queue: SharedQueue,
    sink: Arc<dyn FrameSink>,
    expiry: Duration,
    metrics: Arc<LayerMetrics>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let (group, text) = match next {
            Some(Submission::Publish { group, text }) => (group, text),
            Some(Submission::Stop) | None => break,
        };

        let frame = framer::encode(&group, &text);
        match tokio::time::timeout(expiry, sink.send(&frame)).await {
            Ok(Ok(report)) => {
                metrics.published.inc();
                tracing::debug!(
                    "worker {id}: published to {group} ({} matched, {} dropped)",
                    report.matched,
                    report.dropped
                );
            }
            Ok(Err(e)) => {
                metrics.publish_failures.inc();
                tracing::warn!("worker {id}: publish to {group} failed: {e}");
            }
            Err(_) => {
                metrics.publish_failures.inc();
                tracing::warn!("worker {id}: publish to {group} timed out after {expiry:?}");
            }
        }
    }

    tracing::debug!("publish worker {id} stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chanlayer_transport::Received;

    /// Records frames; never finishes writing frames for `stalled_group`.
    struct StallingSink {
        stalled_group: &'static str,
        written: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl FrameSink for StallingSink {
        async fn send(&self, frame: &str) -> Result<SendReport, TransportError> {
            if frame.starts_with(&framer::subscription_prefix(self.stalled_group)) {
                std::future::pending::<()>().await;
            }
            self.written.lock().await.push(frame.to_string());
            Ok(SendReport {
                matched: 1,
                delivered: 1,
                dropped: 0,
            })
        }

        async fn close(&self) {}
    }

    fn addr() -> EndpointAddr {
        "inproc://publisher-tests".parse().unwrap()
    }

    async fn bind(transport: &Transport, capacity: usize, workers: usize) -> Publisher {
        Publisher::bind(
            transport,
            &addr(),
            capacity,
            Duration::from_secs(1),
            workers,
            Arc::new(LayerMetrics::default()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn worker_frames_and_publishes() {
        let transport = Transport::new();
        let publisher = bind(&transport, 10, DEFAULT_WORKERS).await;
        let sub = transport.connect_subscriber(&addr(), 10).await.unwrap();
        sub.subscribe("g|").await;

        publisher.send_group("g", r#"{"n":1}"#.into());

        let received = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, Received::Frame(r#"g|{"n":1}"#.into()));
        publisher.close().await;
        assert_eq!(publisher.metrics.published.get(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn overflow_is_dropped_silently() {
        let transport = Transport::new();
        let publisher = bind(&transport, 2, 1).await;

        // Workers have not been polled yet on a current-thread runtime, so
        // the queue fills up deterministically.
        for n in 0..5 {
            publisher.send_group("g", format!("{{\"n\":{n}}}"));
        }
        let submitted = publisher.metrics.group_submit.snapshot();
        assert_eq!(submitted.accepted, 2);
        assert_eq!(submitted.dropped, 3);

        publisher.close().await;
    }

    #[tokio::test]
    async fn transport_errors_are_absorbed() {
        let transport = Transport::new();
        let publisher = bind(&transport, 10, 2).await;

        // Close the socket under the workers.
        publisher.sink.close().await;
        publisher.send_group("g", "{}".into());

        tokio::time::timeout(Duration::from_secs(5), async {
            while publisher.metrics.publish_failures.get() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("failure was never recorded");

        publisher.close().await;
    }

    #[tokio::test]
    async fn close_stops_all_workers_and_socket() {
        let transport = Transport::new();
        let publisher = bind(&transport, 10, 3).await;
        assert_eq!(publisher.worker_count(), 3);
        assert!(transport.is_bound(&addr()).await);

        publisher.close().await;
        assert!(publisher.workers.lock().await.is_empty());
        assert!(!transport.is_bound(&addr()).await);

        // Idempotent, and later sends are discarded.
        publisher.close().await;
        publisher.send_group("g", "{}".into());
        assert_eq!(publisher.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_times_out_and_worker_moves_on() {
        let sink = Arc::new(StallingSink {
            stalled_group: "slow",
            written: Mutex::new(Vec::new()),
        });
        let metrics = Arc::new(LayerMetrics::default());
        let publisher = Publisher::start(
            sink.clone(),
            10,
            Duration::from_millis(50),
            1,
            metrics.clone(),
        );

        // Both calls return at once even though the first write never ends.
        publisher.send_group("slow", r#"{"n":1}"#.into());
        publisher.send_group("fast", r#"{"n":2}"#.into());
        assert_eq!(metrics.group_submit.snapshot().accepted, 2);

        tokio::time::timeout(Duration::from_secs(5), async {
            while metrics.published.get() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("worker never got past the stalled write");

        assert_eq!(metrics.publish_failures.get(), 1);
        assert_eq!(metrics.published.get(), 1);
        assert_eq!(*sink.written.lock().await, vec![r#"fast|{"n":2}"#.to_string()]);

        publisher.close().await;
    }

    #[tokio::test]
    async fn drop_without_close_frees_the_endpoint() {
        let transport = Transport::new();
        let publisher = bind(&transport, 10, 2).await;
        assert!(transport.is_bound(&addr()).await);

        drop(publisher);

        tokio::time::timeout(Duration::from_secs(5), async {
            while transport.is_bound(&addr()).await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("aborted workers kept the socket bound");
        transport.bind_publisher(&addr(), 10).await.unwrap();
    }
}
