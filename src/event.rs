//! Display framing for captured requests
//!
//! Observers receive each request as a JSON object inside a server-sent
//! event. Headers are flattened and sorted so the output is stable; the body
//! is decoded lossily and cut to a display limit independent of the ingress
//! cap.

use std::time::UNIX_EPOCH;

use bytes::Bytes;
use serde::Serialize;

use crate::record::CapturedRequest;
use crate::Result;

/// Default number of body characters shown to observers
pub const DEFAULT_DISPLAY_BODY_CHARS: usize = 1_000_000;

/// One header line
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct HeaderPair {
    /// Header name
    pub key: String,
    /// Header value
    pub value: String,
}

/// A captured request as observers see it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEvent {
    /// Arrival time, nanoseconds since the Unix epoch
    pub timestamp: i64,
    /// HTTP method
    pub method: String,
    /// Absolute URL
    pub url: String,
    /// Headers sorted by key, then value
    pub headers: Vec<HeaderPair>,
    /// Body text, possibly truncated
    pub body: String,
    /// Received body length in bytes
    pub content_length: String,
}

impl RequestEvent {
    /// Build the display form of a request
    #[must_use]
    pub fn from_captured(request: &CapturedRequest, display_body_chars: usize) -> Self {
        let record = &request.record;

        let mut headers: Vec<HeaderPair> = record
            .headers
            .iter()
            .map(|(key, value)| HeaderPair {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        headers.sort();

        Self {
            timestamp: unix_nanos(record.timestamp),
            method: record.method.clone(),
            url: record.url.clone(),
            headers,
            body: display_body(&record.body, display_body_chars),
            content_length: record.content_length.to_string(),
        }
    }

    /// JSON encoding
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Encode as one server-sent event
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_sse_frame(&self) -> Result<Bytes> {
        let json = self.to_json()?;
        Ok(Bytes::from(format!("data: {json}\n\n")))
    }
}

/// Decode a body for display, keeping at most `max_chars` characters
#[must_use]
pub fn display_body(body: &[u8], max_chars: usize) -> String {
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.into_owned(),
    }
}

fn unix_nanos(time: std::time::SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        Err(e) => i64::try_from(e.duration().as_nanos()).map_or(i64::MIN, |n| -n),
    }
}
