//! Live stream sessions
//!
//! A [`StreamSession`] is the observer side of a subscription: it replays the
//! history snapshot taken at subscribe time, then yields requests as the
//! broker delivers them. A [`SessionHandle`] cancels the session from
//! anywhere; dropping the session (the transport went away) does the same.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bin::{Bin, SessionId};
use crate::key::BinKey;
use crate::record::CapturedRequest;

/// Mailbox-full accounting shared between a bin and its session
#[derive(Debug, Default)]
pub struct MailboxStats {
    dropped: AtomicU64,
    degraded: AtomicBool,
}

impl MailboxStats {
    /// Record one request lost to a full mailbox
    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        self.degraded.store(true, Ordering::Relaxed);
    }

    /// Requests lost so far
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether any request was lost
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }
}

/// Cloneable handle used to end a session
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    bin: Arc<Bin>,
    token: CancellationToken,
    stats: Arc<MailboxStats>,
}

impl SessionHandle {
    pub(crate) fn new(
        id: SessionId,
        bin: Arc<Bin>,
        token: CancellationToken,
        stats: Arc<MailboxStats>,
    ) -> Self {
        Self {
            id,
            bin,
            token,
            stats,
        }
    }

    /// Session id within its bin
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Key of the subscribed bin
    #[must_use]
    pub fn key(&self) -> &BinKey {
        self.bin.key()
    }

    /// Stop delivery and deregister from the bin
    ///
    /// Safe to call any number of times, from any task.
    pub fn unsubscribe(&self) {
        self.token.cancel();
        self.bin.unsubscribe(self.id);
    }

    /// Whether the session has been cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the session is cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Requests dropped because the mailbox was full
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.stats.dropped()
    }

    /// Whether the session has lost any request
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.stats.is_degraded()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("key", self.bin.key())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// One observer's view of a bin
pub struct StreamSession {
    handle: SessionHandle,
    backlog: std::vec::IntoIter<Arc<CapturedRequest>>,
    mailbox: mpsc::Receiver<Arc<CapturedRequest>>,
}

impl StreamSession {
    pub(crate) fn new(
        handle: SessionHandle,
        snapshot: Vec<Arc<CapturedRequest>>,
        mailbox: mpsc::Receiver<Arc<CapturedRequest>>,
    ) -> Self {
        Self {
            handle,
            backlog: snapshot.into_iter(),
            mailbox,
        }
    }

    /// A handle that can cancel this session
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Snapshot entries not yet yielded
    #[must_use]
    pub fn backlog(&self) -> &[Arc<CapturedRequest>] {
        self.backlog.as_slice()
    }

    /// Next request: snapshot first, then live deliveries
    ///
    /// Returns `None` once the session is cancelled. Cancel safe.
    pub async fn next(&mut self) -> Option<Arc<CapturedRequest>> {
        if self.handle.is_cancelled() {
            return None;
        }

        if let Some(request) = self.backlog.next() {
            return Some(request);
        }

        let token = &self.handle.token;
        let request = tokio::select! {
            biased;
            () = token.cancelled() => None,
            request = self.mailbox.recv() => request,
        };

        if self.handle.is_cancelled() {
            return None;
        }
        request
    }

    /// Next already-delivered request, without waiting
    pub fn try_next(&mut self) -> Option<Arc<CapturedRequest>> {
        if self.handle.is_cancelled() {
            return None;
        }

        self.backlog
            .next()
            .or_else(|| self.mailbox.try_recv().ok())
    }

    /// End the session; same as [`SessionHandle::unsubscribe`]
    pub fn unsubscribe(&self) {
        self.handle.unsubscribe();
    }

    #[cfg(test)]
    pub(crate) fn close_mailbox(&mut self) {
        self.mailbox.close();
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.handle.unsubscribe();
    }
}
