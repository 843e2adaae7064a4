//! Server-sent-events transport for stream sessions

use std::convert::Infallible;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::event::RequestEvent;
use crate::session::StreamSession;

use super::ResponseBody;

/// Comment line sent on idle streams; lets dead peers surface as write errors
pub const KEEPALIVE_FRAME: &[u8] = b": keep-alive\n\n";

struct EventStream {
    session: StreamSession,
    ticker: Interval,
    shutdown: CancellationToken,
    display_body_chars: usize,
}

impl EventStream {
    async fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            let request = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return None,
                request = self.session.next() => request?,
                _ = self.ticker.tick() => return Some(Bytes::from_static(KEEPALIVE_FRAME)),
            };

            match RequestEvent::from_captured(&request, self.display_body_chars).to_sse_frame() {
                Ok(frame) => {
                    self.ticker.reset();
                    return Some(frame);
                }
                Err(e) => warn!(bin = %request.key, seq = request.seq, "Skipping event: {}", e),
            }
        }
    }
}

/// Response body that streams a session as server-sent events
///
/// The body ends when the session is cancelled or `shutdown` fires. When
/// the client disconnects hyper drops the body, which drops the session and
/// deregisters it from its bin.
pub fn event_stream(
    session: StreamSession,
    display_body_chars: usize,
    keepalive: Duration,
    shutdown: CancellationToken,
) -> ResponseBody {
    let mut ticker = interval_at(Instant::now() + keepalive, keepalive);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(bin = %session.handle().key(), backlog = session.backlog().len(), "Event stream opened");

    let state = EventStream {
        session,
        ticker,
        shutdown,
        display_body_chars,
    };

    let frames = stream::unfold(state, |mut state| async move {
        let frame = state.next_frame().await?;
        Some((Ok::<_, Infallible>(Frame::data(frame)), state))
    });

    StreamBody::new(frames).boxed_unsync()
}
