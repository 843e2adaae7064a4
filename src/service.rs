//! The capture service handed to transports
//!
//! [`BinService`] ties the registry, the ingestion queue and the limits
//! together. It is cheap to clone; every clone shares the same bins.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::broker::{Broker, BrokerStats, IngestQueue};
use crate::config::Config;
use crate::key::{BinKey, KeyGenerator};
use crate::record::{CapturedRequest, RequestRecord};
use crate::registry::BinRegistry;
use crate::session::{SessionHandle, StreamSession};
use crate::{ReqbinError, Result};

/// Shared request-capture store
#[derive(Clone)]
pub struct BinService {
    registry: Arc<BinRegistry>,
    queue: IngestQueue,
    max_body_size: usize,
    mailbox_capacity: usize,
}

impl BinService {
    /// Build a service and the broker that must run for live delivery
    ///
    /// # Panics
    ///
    /// Panics if a capacity in `config` is 0; run [`Config::validate`] first
    #[must_use]
    pub fn new(config: &Config) -> (Self, Broker) {
        let registry = Arc::new(BinRegistry::new(
            KeyGenerator::new(config.keys.length),
            config.keys.max_attempts,
        ));
        let (queue, broker) = Broker::new(
            Arc::clone(&registry),
            config.broker.queue_capacity,
            config.broker.ingest_policy,
            config.broker.ingest_timeout(),
        );

        let service = Self {
            registry,
            queue,
            max_body_size: config.limits.max_body_size,
            mailbox_capacity: config.broker.mailbox_capacity,
        };

        (service, broker)
    }

    /// Build a service and spawn its broker on the current runtime
    ///
    /// The broker stops when `shutdown` is cancelled.
    #[must_use]
    pub fn spawn(config: &Config, shutdown: CancellationToken) -> (Self, JoinHandle<BrokerStats>) {
        let (service, broker) = Self::new(config);
        let handle = tokio::spawn(broker.run(shutdown));
        (service, handle)
    }

    /// Create an empty bin
    ///
    /// # Errors
    ///
    /// Returns `KeyGeneration` if no key could be produced
    pub fn create_bin(&self) -> Result<BinKey> {
        Ok(self.registry.create_bin()?.key().clone())
    }

    /// Record a request into a bin and hand it to the broker
    ///
    /// Nothing is stored unless the whole operation succeeds.
    ///
    /// # Errors
    ///
    /// Returns `BinNotFound`, `PayloadTooLarge` if the body exceeds the
    /// ingress cap, or `Backpressure` if the ingestion queue stays full
    pub async fn capture(&self, key: &BinKey, record: RequestRecord) -> Result<()> {
        if record.body.len() > self.max_body_size {
            return Err(ReqbinError::PayloadTooLarge {
                size: record.body.len(),
                limit: self.max_body_size,
            });
        }

        let bin = self.registry.lookup(key)?;
        let permit = self.queue.reserve().await?;

        let captured = bin.append_and(record, |request| permit.send(request));

        debug!(
            bin = %key,
            seq = captured.seq,
            method = %captured.record.method,
            bytes = captured.record.content_length,
            "Captured request"
        );
        Ok(())
    }

    /// Current history of a bin, oldest-first
    ///
    /// # Errors
    ///
    /// Returns `BinNotFound` if the key is unknown
    pub fn history(&self, key: &BinKey) -> Result<Vec<Arc<CapturedRequest>>> {
        Ok(self.registry.lookup(key)?.snapshot())
    }

    /// Start observing a bin
    ///
    /// The session yields the current history, then every later capture.
    ///
    /// # Errors
    ///
    /// Returns `BinNotFound` if the key is unknown
    pub fn subscribe(&self, key: &BinKey) -> Result<StreamSession> {
        let bin = self.registry.lookup(key)?;
        Ok(bin.subscribe(self.mailbox_capacity))
    }

    /// Stop a session; repeated calls are no-ops
    pub fn unsubscribe(&self, handle: &SessionHandle) {
        handle.unsubscribe();
    }

    /// Whether a bin exists
    #[must_use]
    pub fn contains(&self, key: &BinKey) -> bool {
        self.registry.contains(key)
    }

    /// Number of bins
    #[must_use]
    pub fn bin_count(&self) -> usize {
        self.registry.len()
    }

    /// Ingress cap in bytes
    #[must_use]
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }
}
