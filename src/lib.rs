//! Reqbin - disposable HTTP request bins with live inspection
//!
//! Create a bin, point any HTTP client at it, and watch the requests it
//! receives. Each bin keeps its ten most recent requests; observers get
//! that history followed by a live tail.
//!
//! ```text
//!  capture ──► BinRegistry ──► Bin (history ring) ──► ingestion queue
//!                                   ▲                      │
//!                      subscribe ───┘                   Broker
//!                                                          │ try_send
//!                                              ┌───────────┼───────────┐
//!                                              ▼           ▼           ▼
//!                                          mailbox     mailbox     mailbox
//!                                          session     session     session
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::field_reassign_with_default,
    clippy::multiple_crate_versions
)]

pub mod bin;
pub mod broker;
pub mod config;
pub mod error;
pub mod event;
pub mod history;
pub mod key;
pub mod record;
pub mod registry;
pub mod server;
pub mod service;
pub mod session;

pub use error::{ReqbinError, Result};
pub use key::BinKey;
pub use record::{CapturedRequest, RequestRecord};
pub use service::BinService;
pub use session::{SessionHandle, StreamSession};
