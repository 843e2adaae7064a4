//! Captured request types

use std::time::SystemTime;

use bytes::Bytes;

use crate::key::BinKey;

/// An inbound HTTP request as handed over by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    /// Arrival time
    pub timestamp: SystemTime,
    /// HTTP method (e.g., "GET", "POST")
    pub method: String,
    /// Absolute target URL
    pub url: String,
    /// Headers in arrival order, duplicates allowed
    pub headers: Vec<(String, String)>,
    /// Request body
    pub body: Bytes,
    /// Number of body bytes received
    pub content_length: usize,
}

impl RequestRecord {
    /// Build a record stamped with the current time
    ///
    /// `content_length` is taken from the body.
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        url: impl Into<String>,
        headers: Vec<(String, String)>,
        body: impl Into<Bytes>,
    ) -> Self {
        let body = body.into();
        Self {
            timestamp: SystemTime::now(),
            method: method.into(),
            url: url.into(),
            headers,
            content_length: body.len(),
            body,
        }
    }
}

/// A request stored in a bin
///
/// Tagged with its owning bin and its position in that bin's capture
/// sequence. Immutable; shared between history, broker and mailboxes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRequest {
    /// Owning bin
    pub key: BinKey,
    /// Per-bin capture sequence number, starting at 1
    pub seq: u64,
    /// The request itself
    pub record: RequestRecord,
}
