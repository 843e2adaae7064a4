//! HTTP surface for reqbin
//!
//! Accepts HTTP/1.1 connections with bounded concurrency and maps routes
//! onto [`BinService`](crate::service::BinService) operations.

mod connection_limit;
mod listener;
mod routes;
mod sse;

pub use connection_limit::{ConnectionGuard, ConnectionLimit};
pub use listener::Server;
pub use routes::{error_response, Route, Router};
pub use sse::{event_stream, KEEPALIVE_FRAME};

/// Body type of every response
pub type ResponseBody = http_body_util::combinators::UnsyncBoxBody<bytes::Bytes, std::convert::Infallible>;

/// How long open connections get to finish after shutdown
pub const SHUTDOWN_TIMEOUT_MS: u64 = 5000;
