//! Session id and keep-alive wiring for the MCP endpoint.
//!
//! Every write to a kept-alive response goes through one bounded channel that
//! feeds the response body, and one writer task owns the sending side. The
//! handler's frames and the ping frames are therefore serialized at frame
//! boundaries and a ping never lands inside a protocol message.

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use futures::{future::BoxFuture, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use terraform_mcp_types::MCP_SESSION_ID_HEADER;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace, warn};

use super::frames::PingStyle;
use super::manager::{KeepAliveManager, Registration};
use super::session_id::McpSessionId;

/// Frames buffered between the writer task and the connection.
const FRAME_BUFFER: usize = 32;

type FrameSender = mpsc::Sender<Result<Bytes, Infallible>>;

/// State for [`session_middleware`].
#[derive(Clone, Debug)]
pub struct SessionLayer {
    manager: KeepAliveManager,
    interval: Option<Duration>,
}

impl SessionLayer {
    /// `interval` of `None` disables pings; session ids are still issued.
    pub fn new(manager: KeepAliveManager, interval: Option<Duration>) -> Self {
        Self { manager, interval }
    }
}

/// Resolve the session id and keep the connection alive while it is open.
///
/// GET and POST requests without an `mcp-session-id` header get a fresh id,
/// echoed back in the response header. A keep-alive task is started only if
/// none is running for the id yet. A successful DELETE stops the session's
/// keep-alive task.
pub async fn session_middleware(
    State(layer): State<SessionLayer>,
    mut request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let style = PingStyle::for_method(&method);

    let session = match McpSessionId::from_headers(request.headers()) {
        Some(session) => session,
        None if style.is_some() => McpSessionId::generate(),
        None => return next.run(request).await,
    };
    request.extensions_mut().insert(session.clone());

    let registration = match (style, layer.interval) {
        (Some(_), Some(_)) => layer.manager.register(session.id()).await,
        _ => None,
    };

    let mut response = match (style, registration, layer.interval) {
        (Some(PingStyle::Stream), Some(registration), Some(period)) => {
            let response = next.run(request).await;
            if response.status().is_success() {
                keep_alive_stream(response, registration, period)
            } else {
                response
            }
        }
        (Some(PingStyle::Unary), Some(registration), Some(period)) => {
            keep_alive_unary(Box::pin(next.run(request)), registration, period).await
        }
        _ => next.run(request).await,
    };

    if method == Method::DELETE && response.status().is_success() {
        layer.manager.stop(session.id()).await;
    }

    if let Ok(value) = HeaderValue::from_str(session.id()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(MCP_SESSION_ID_HEADER), value);
    }

    response
}

fn ping_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Queue one ping. Returns false once the connection is gone.
///
/// A full buffer means the connection is not idle, so the ping is skipped.
fn send_ping(tx: &FrameSender, style: PingStyle, session_id: &str) -> bool {
    match tx.try_send(Ok(style.frame())) {
        Ok(()) => {
            trace!(session_id = %session_id, "Keep-alive ping sent");
            true
        }
        Err(TrySendError::Full(_)) => {
            debug!(session_id = %session_id, "Response buffer full, skipping keep-alive ping");
            true
        }
        Err(TrySendError::Closed(_)) => {
            warn!(session_id = %session_id, "Keep-alive write failed, stopping keep-alive");
            false
        }
    }
}

fn streamed_body(rx: mpsc::Receiver<Result<Bytes, Infallible>>) -> Body {
    Body::from_stream(ReceiverStream::new(rx))
}

/// Re-plumb a streaming response through a writer task that interleaves pings.
fn keep_alive_stream(response: Response, registration: Registration, period: Duration) -> Response {
    let (mut parts, body) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);

    let (tx, rx) = mpsc::channel(FRAME_BUFFER);
    tokio::spawn(stream_writer(body, tx, registration, period));

    Response::from_parts(parts, streamed_body(rx))
}

async fn stream_writer(body: Body, tx: FrameSender, registration: Registration, period: Duration) {
    let mut frames = body.into_data_stream();
    let mut ticker = ping_ticker(period);

    loop {
        tokio::select! {
            _ = registration.cancelled() => {
                debug!(session_id = %registration.session_id(), "Keep-alive cancelled, closing stream");
                break;
            }
            _ = tx.closed() => {
                debug!(session_id = %registration.session_id(), "Client disconnected");
                break;
            }
            frame = frames.next() => match frame {
                Some(Ok(bytes)) => {
                    if tx.send(Ok(bytes)).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(session_id = %registration.session_id(), error = %e, "Response stream failed");
                    break;
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !send_ping(&tx, PingStyle::Stream, registration.session_id()) {
                    break;
                }
            }
        }
    }
}

/// Run a unary handler, pinging if it outlives one interval.
///
/// A handler that finishes within the first interval is returned untouched.
/// Otherwise the response is committed as a streamed `200 application/json`
/// body: bare ping lines each interval, then the handler's body.
async fn keep_alive_unary(
    mut handler: BoxFuture<'static, Response>,
    registration: Registration,
    period: Duration,
) -> Response {
    let mut ticker = ping_ticker(period);

    tokio::select! {
        response = &mut handler => return response,
        _ = registration.cancelled() => {
            drop(registration);
            return handler.await;
        }
        _ = ticker.tick() => {}
    }

    debug!(
        session_id = %registration.session_id(),
        "Handler still running after one keep-alive interval, streaming pings"
    );

    let (tx, rx) = mpsc::channel(FRAME_BUFFER);
    send_ping(&tx, PingStyle::Unary, registration.session_id());
    tokio::spawn(unary_writer(handler, tx, registration, ticker));

    let mut response = Response::new(streamed_body(rx));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

async fn cancelled(registration: &Option<Registration>) {
    match registration {
        Some(registration) => registration.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn unary_writer(
    mut handler: BoxFuture<'static, Response>,
    tx: FrameSender,
    registration: Registration,
    mut ticker: Interval,
) {
    let session_id = registration.session_id().to_string();
    let mut registration = Some(registration);

    let response = loop {
        tokio::select! {
            response = &mut handler => break Some(response),
            _ = tx.closed() => break None,
            _ = cancelled(&registration) => {
                registration = None;
            }
            _ = ticker.tick(), if registration.is_some() => {
                if !send_ping(&tx, PingStyle::Unary, &session_id) {
                    break None;
                }
            }
        }
    };

    // The exchange is complete: stop pinging before the body goes out.
    drop(registration);

    let Some(response) = response else {
        debug!(session_id = %session_id, "Client went away before the handler finished");
        return;
    };

    if response.status() != StatusCode::OK {
        warn!(
            session_id = %session_id,
            status = %response.status(),
            "Handler status lost, response was already committed"
        );
    }

    let mut frames = response.into_body().into_data_stream();
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(bytes) => {
                if tx.send(Ok(bytes)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Response body failed");
                break;
            }
        }
    }
}
