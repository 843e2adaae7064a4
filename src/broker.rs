//! Fan-out broker
//!
//! Every capture passes through one bounded ingestion queue. A single broker
//! task drains it and offers each request to the subscribers of its bin.
//! Delivery never waits on a subscriber: mailboxes are bounded and a full
//! one loses the request (see [`Bin::fan_out`](crate::bin::Bin::fan_out)).

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError, Permit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bin::Delivery;
use crate::record::CapturedRequest;
use crate::registry::BinRegistry;
use crate::{ReqbinError, Result};

/// Default ingestion queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// What a capture does when the ingestion queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestPolicy {
    /// Fail immediately with `Backpressure`
    Reject,
    /// Wait up to the configured timeout, then fail with `Backpressure`
    Wait,
}

/// Producer side of the ingestion queue
#[derive(Debug, Clone)]
pub struct IngestQueue {
    tx: mpsc::Sender<Arc<CapturedRequest>>,
    policy: IngestPolicy,
    timeout: Duration,
    capacity: usize,
}

impl IngestQueue {
    /// Reserve one slot according to the overflow policy
    ///
    /// Holding the permit guarantees the later send cannot block or fail.
    ///
    /// # Errors
    ///
    /// Returns `Backpressure` if no slot frees up in time, or `Other` if the
    /// broker has shut down
    pub async fn reserve(&self) -> Result<Permit<'_, Arc<CapturedRequest>>> {
        let reserved = match self.policy {
            IngestPolicy::Reject => self.tx.try_reserve().map_err(|e| match e {
                TrySendError::Full(()) => self.saturated(),
                TrySendError::Closed(()) => Self::closed(),
            }),
            IngestPolicy::Wait => match tokio::time::timeout(self.timeout, self.tx.reserve()).await
            {
                Ok(permit) => permit.map_err(|_| Self::closed()),
                Err(_) => Err(self.saturated()),
            },
        };

        if let Err(ReqbinError::Backpressure { .. }) = &reserved {
            warn!(
                capacity = self.capacity,
                policy = ?self.policy,
                "Ingestion queue saturated"
            );
        }
        reserved
    }

    /// Queue capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots right now
    #[must_use]
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    fn saturated(&self) -> ReqbinError {
        ReqbinError::Backpressure {
            capacity: self.capacity,
        }
    }

    fn closed() -> ReqbinError {
        ReqbinError::Other("broker is not running".to_string())
    }
}

/// Running totals of the broker loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Requests taken off the queue
    pub processed: u64,
    /// Successful mailbox deliveries
    pub delivered: u64,
    /// Deliveries lost to full mailboxes
    pub dropped: u64,
    /// Disconnected subscribers removed
    pub pruned: u64,
    /// Requests whose bin could not be resolved
    pub orphaned: u64,
}

impl BrokerStats {
    fn record(&mut self, delivery: Delivery) {
        self.delivered += delivery.delivered as u64;
        self.dropped += delivery.dropped as u64;
        self.pruned += delivery.pruned as u64;
    }
}

/// Consumer side: the single fan-out task
pub struct Broker {
    rx: mpsc::Receiver<Arc<CapturedRequest>>,
    registry: Arc<BinRegistry>,
    stats: BrokerStats,
}

impl Broker {
    /// Create a broker and its ingestion queue
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0
    #[must_use]
    pub fn new(
        registry: Arc<BinRegistry>,
        capacity: usize,
        policy: IngestPolicy,
        timeout: Duration,
    ) -> (IngestQueue, Self) {
        assert!(capacity > 0, "queue capacity must be > 0");

        let (tx, rx) = mpsc::channel(capacity);
        let queue = IngestQueue {
            tx,
            policy,
            timeout,
            capacity,
        };
        let broker = Self {
            rx,
            registry,
            stats: BrokerStats::default(),
        };

        (queue, broker)
    }

    /// Drain the queue until shutdown or until every producer is gone
    pub async fn run(mut self, shutdown: CancellationToken) -> BrokerStats {
        info!("Broker started");

        loop {
            let request = tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Broker received shutdown signal");
                    break;
                }
                request = self.rx.recv() => request,
            };

            match request {
                Some(request) => self.dispatch(&request),
                None => {
                    info!("Ingestion queue closed");
                    break;
                }
            }
        }

        info!(
            processed = self.stats.processed,
            delivered = self.stats.delivered,
            dropped = self.stats.dropped,
            "Broker stopped"
        );
        self.stats
    }

    /// Fan one request out to its bin's subscribers
    fn dispatch(&mut self, request: &Arc<CapturedRequest>) {
        self.stats.processed += 1;

        // The registry guard is released before the bin is locked
        let bin = match self.registry.lookup(&request.key) {
            Ok(bin) => bin,
            Err(e) => {
                self.stats.orphaned += 1;
                warn!(bin = %request.key, "Dropping request for unknown bin: {}", e);
                return;
            }
        };

        let delivery = bin.fan_out(request);
        self.stats.record(delivery);

        if delivery.dropped > 0 {
            warn!(
                bin = %request.key,
                seq = request.seq,
                dropped = delivery.dropped,
                "Slow subscribers missed a request"
            );
        }
        debug!(
            bin = %request.key,
            seq = request.seq,
            delivered = delivery.delivered,
            pruned = delivery.pruned,
            "Request fanned out"
        );
    }

    /// Totals so far
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::BinKey;
    use crate::record::RequestRecord;

    fn setup(capacity: usize, policy: IngestPolicy) -> (Arc<BinRegistry>, IngestQueue, Broker) {
        let registry = Arc::new(BinRegistry::default());
        let (queue, broker) = Broker::new(
            Arc::clone(&registry),
            capacity,
            policy,
            Duration::from_millis(50),
        );
        (registry, queue, broker)
    }

    fn captured(key: &BinKey, seq: u64) -> Arc<CapturedRequest> {
        Arc::new(CapturedRequest {
            key: key.clone(),
            seq,
            record: RequestRecord::new("GET", "http://localhost/", vec![], "x"),
        })
    }

    #[tokio::test]
    async fn test_reject_when_full() {
        let (_registry, queue, _broker) = setup(1, IngestPolicy::Reject);

        let permit = queue.reserve().await.unwrap();
        permit.send(captured(&BinKey::new("a"), 1));

        let result = queue.reserve().await;
        assert!(matches!(result, Err(ReqbinError::Backpressure { capacity: 1 })));
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let (_registry, queue, _broker) = setup(1, IngestPolicy::Wait);

        queue.reserve().await.unwrap().send(captured(&BinKey::new("a"), 1));

        let start = std::time::Instant::now();
        let result = queue.reserve().await;
        assert!(matches!(result, Err(ReqbinError::Backpressure { .. })));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_reserve_after_broker_gone() {
        let (_registry, queue, broker) = setup(4, IngestPolicy::Reject);
        drop(broker);

        let result = queue.reserve().await;
        assert!(matches!(result, Err(ReqbinError::Other(_))));
    }

    #[tokio::test]
    async fn test_dispatch_to_subscribers() {
        let (registry, queue, broker) = setup(8, IngestPolicy::Reject);
        let bin = registry.create_bin().unwrap();
        let mut session = bin.subscribe(4);

        let request = bin.append(RequestRecord::new("POST", "http://localhost/", vec![], "hi"));
        queue.reserve().await.unwrap().send(request);
        drop(queue);

        let stats = broker.run(CancellationToken::new()).await;
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(&session.next().await.unwrap().record.body[..], b"hi");
    }

    #[tokio::test]
    async fn test_unknown_bin_is_orphaned() {
        let (_registry, queue, broker) = setup(8, IngestPolicy::Reject);
        queue
            .reserve()
            .await
            .unwrap()
            .send(captured(&BinKey::new("ghost"), 1));
        drop(queue);

        let stats = broker.run(CancellationToken::new()).await;
        assert_eq!(stats.orphaned, 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let (_registry, _queue, broker) = setup(8, IngestPolicy::Reject);
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(broker.run(shutdown.clone()));
        shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_stall() {
        let (registry, queue, broker) = setup(64, IngestPolicy::Reject);
        let bin = registry.create_bin().unwrap();
        let slow = bin.subscribe(1);
        let mut fast = bin.subscribe(32);

        for i in 0..10 {
            let request = bin.append(RequestRecord::new("POST", "http://localhost/", vec![], format!("{i}")));
            queue.reserve().await.unwrap().send(request);
        }
        drop(queue);

        let stats = broker.run(CancellationToken::new()).await;
        assert_eq!(stats.processed, 10);
        assert_eq!(stats.dropped, 9);
        assert!(slow.handle().is_degraded());

        for i in 0..10 {
            let body = fast.next().await.unwrap().record.body.clone();
            assert_eq!(body, format!("{i}").as_bytes());
        }
    }
}
