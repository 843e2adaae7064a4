//! A single capture bin: bounded history plus live subscribers
//!
//! All mutable state of a bin sits behind one lock. Appending, taking a
//! snapshot, (un)subscribing and fanning out a request each take that lock
//! once and never await while holding it, so every operation is atomic
//! with respect to the others.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::history::{Ring, HISTORY_CAPACITY};
use crate::key::BinKey;
use crate::record::{CapturedRequest, RequestRecord};
use crate::session::{MailboxStats, SessionHandle, StreamSession};

/// Identifies a subscriber within its bin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of offering one request to a bin's subscribers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Mailboxes that accepted the request
    pub delivered: usize,
    /// Mailboxes that were full; the request was dropped for them
    pub dropped: usize,
    /// Subscribers found disconnected and removed
    pub pruned: usize,
}

struct Subscriber {
    mailbox: mpsc::Sender<Arc<CapturedRequest>>,
    /// Last sequence number already covered by the subscribe-time snapshot
    after_seq: u64,
    token: CancellationToken,
    stats: Arc<MailboxStats>,
}

struct BinState {
    history: Ring<Arc<CapturedRequest>>,
    last_seq: u64,
    next_session: u64,
    subscribers: HashMap<SessionId, Subscriber>,
}

/// A capture target identified by a key
pub struct Bin {
    key: BinKey,
    state: Mutex<BinState>,
}

impl Bin {
    /// Create an empty bin
    #[must_use]
    pub fn new(key: BinKey) -> Self {
        Self {
            key,
            state: Mutex::new(BinState {
                history: Ring::with_capacity(HISTORY_CAPACITY),
                last_seq: 0,
                next_session: 0,
                subscribers: HashMap::new(),
            }),
        }
    }

    /// The bin's key
    #[must_use]
    pub fn key(&self) -> &BinKey {
        &self.key
    }

    /// Append a request to the history, evicting the oldest past capacity
    pub fn append(&self, record: RequestRecord) -> Arc<CapturedRequest> {
        self.append_and(record, |_| {})
    }

    /// Append a request and run `publish` on it before the lock is released
    ///
    /// `publish` must not block. Requests reach `publish` in the same order
    /// they enter the history.
    pub fn append_and<F>(&self, record: RequestRecord, publish: F) -> Arc<CapturedRequest>
    where
        F: FnOnce(Arc<CapturedRequest>),
    {
        let mut state = self.state.lock();

        state.last_seq += 1;
        let captured = Arc::new(CapturedRequest {
            key: self.key.clone(),
            seq: state.last_seq,
            record,
        });

        if let Some(evicted) = state.history.push(Arc::clone(&captured)) {
            debug!(bin = %self.key, seq = evicted.seq, "Evicted oldest request");
        }
        publish(Arc::clone(&captured));

        captured
    }

    /// Consistent copy of the history, oldest-first
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<CapturedRequest>> {
        self.state.lock().history.to_vec()
    }

    /// Number of requests in the history
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().history.len()
    }

    /// Whether nothing has been captured yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Register a live subscriber with a mailbox of `mailbox_capacity`
    ///
    /// The returned session first yields the history as it stood at this
    /// call, then every request appended afterwards.
    ///
    /// # Panics
    ///
    /// Panics if `mailbox_capacity` is 0
    pub fn subscribe(self: &Arc<Self>, mailbox_capacity: usize) -> StreamSession {
        assert!(mailbox_capacity > 0, "mailbox_capacity must be > 0");

        let (tx, rx) = mpsc::channel(mailbox_capacity);
        let token = CancellationToken::new();
        let stats = Arc::new(MailboxStats::default());

        let (id, snapshot) = {
            let mut state = self.state.lock();

            let id = SessionId(state.next_session);
            state.next_session += 1;

            let snapshot = state.history.to_vec();
            let after_seq = state.last_seq;
            state.subscribers.insert(
                id,
                Subscriber {
                    mailbox: tx,
                    after_seq,
                    token: token.clone(),
                    stats: Arc::clone(&stats),
                },
            );

            (id, snapshot)
        };

        debug!(bin = %self.key, session = %id, backlog = snapshot.len(), "Subscriber added");

        let handle = SessionHandle::new(id, Arc::clone(self), token, stats);
        StreamSession::new(handle, snapshot, rx)
    }

    /// Remove a subscriber; unknown ids are ignored
    pub fn unsubscribe(&self, id: SessionId) {
        let removed = self.state.lock().subscribers.remove(&id);

        if let Some(subscriber) = removed {
            subscriber.token.cancel();
            debug!(bin = %self.key, session = %id, "Subscriber removed");
        }
    }

    /// Offer a request to every current subscriber without waiting
    ///
    /// A full mailbox loses this request and its subscriber is marked
    /// degraded. A closed mailbox means the session is gone; it is pruned.
    pub fn fan_out(&self, request: &Arc<CapturedRequest>) -> Delivery {
        let mut delivery = Delivery::default();
        let mut state = self.state.lock();

        state.subscribers.retain(|id, subscriber| {
            if request.seq <= subscriber.after_seq || subscriber.token.is_cancelled() {
                return true;
            }

            match subscriber.mailbox.try_send(Arc::clone(request)) {
                Ok(()) => {
                    delivery.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    subscriber.stats.record_drop();
                    delivery.dropped += 1;
                    debug!(bin = %self.key, session = %id, seq = request.seq, "Mailbox full, dropped");
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    subscriber.token.cancel();
                    delivery.pruned += 1;
                    false
                }
            }
        });

        delivery
    }
}

impl fmt::Debug for Bin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bin").field("key", &self.key).finish_non_exhaustive()
    }
}
