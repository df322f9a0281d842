//! Streamable-HTTP server.
//!
//! Request path for the MCP endpoint, outermost first:
//! trace layer, security wrapper (origin policy, CORS, preflight), session
//! layer (session id, keep-alive), base MCP handler. `/health` sits outside
//! the security wrapper.
//!
//! No per-request timeouts are installed. Long-lived SSE streams end on client
//! disconnect, session termination or shutdown; the drain timeout is the only
//! server-level bound.

use axum::{
    body::{Body, HttpBody},
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::StreamExt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::api;
use crate::config::{HttpConfig, SessionMode};
use crate::cors::security_middleware;
use crate::error::ServerError;
use crate::keepalive::{session_middleware, KeepAliveManager, SessionLayer};
use crate::mcp::McpDispatcher;

/// Time left to connections after a force-close before the server task is aborted.
const FORCE_CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Compose the full router around a base MCP handler.
///
/// Cancelling `force_close` fails in-flight requests with `503` and ends
/// every streamed response body.
pub fn build_router(
    config: &HttpConfig,
    keep_alive: KeepAliveManager,
    force_close: CancellationToken,
    base: Router,
) -> Router {
    config.origin_policy.log_summary();

    match config.keep_alive_interval {
        Some(interval) => info!(interval_secs = interval.as_secs(), "Keep-alive pings enabled"),
        None => warn!("Keep-alive pings disabled - idle connections may be closed by proxies"),
    }

    let session_layer = SessionLayer::new(keep_alive, config.keep_alive_interval);
    let policy = Arc::new(config.origin_policy.clone());

    let mcp_router = base
        .layer(middleware::from_fn_with_state(session_layer, session_middleware))
        .layer(middleware::from_fn_with_state(policy, security_middleware));

    Router::new()
        .route("/health", get(api::health::health))
        .merge(mcp_router)
        .layer(middleware::from_fn_with_state(force_close, force_close_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Tie a request to the server's force-close token.
///
/// Responses with a known length are left alone. Streamed bodies end when the
/// token is cancelled so their connections can close.
async fn force_close_middleware(
    State(force_close): State<CancellationToken>,
    request: Request,
    next: Next,
) -> Response {
    let response = tokio::select! {
        response = next.run(request) => response,
        _ = force_close.cancelled() => {
            debug!("Request aborted by forced shutdown");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    if response.body().size_hint().exact().is_some() {
        return response;
    }

    let (parts, body) = response.into_parts();
    let frames = body
        .into_data_stream()
        .take_until(force_close.cancelled_owned());
    Response::from_parts(parts, Body::from_stream(frames))
}

/// The streamable-HTTP transport, configured but not yet listening.
pub struct StreamableHttpServer {
    config: HttpConfig,
    keep_alive: KeepAliveManager,
    force_close: CancellationToken,
    router: Router,
}

impl StreamableHttpServer {
    /// Serve the built-in MCP endpoint backed by `dispatcher`.
    ///
    /// In stateful mode a background task removes sessions that stay idle
    /// with no open stream for `session_idle_timeout`.
    pub fn new(config: &HttpConfig, dispatcher: Arc<dyn McpDispatcher>) -> Self {
        let state = api::mcp::McpState::new(dispatcher, config.session_mode);
        if config.session_mode == SessionMode::Stateless {
            info!("MCP session mode: stateless");
        } else {
            info!("MCP session mode: stateful");
            match config.session_idle_timeout {
                Some(max_idle) => {
                    info!(idle_secs = max_idle.as_secs(), "Idle MCP sessions will be removed");
                    state.sessions().spawn_cleanup(max_idle);
                }
                None => warn!("MCP session cleanup disabled - sessions live until DELETE"),
            }
        }
        Self::with_handler(config, api::mcp::router(&config.endpoint, state))
    }

    /// Serve a custom base handler behind the security and session layers.
    ///
    /// `base` must route the configured endpoint itself.
    pub fn with_handler(config: &HttpConfig, base: Router) -> Self {
        let keep_alive = KeepAliveManager::new();
        let force_close = CancellationToken::new();
        let router = build_router(config, keep_alive.clone(), force_close.clone(), base);

        Self {
            config: config.clone(),
            keep_alive,
            force_close,
            router,
        }
    }

    /// The fully layered router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn keep_alive(&self) -> &KeepAliveManager {
        &self.keep_alive
    }

    /// Bind the listener.
    pub async fn bind(self) -> Result<BoundServer, ServerError> {
        let addr = self.config.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::bind(&addr, e))?;
        let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

        info!(
            addr = %local_addr,
            endpoint = %self.config.endpoint,
            "Streamable HTTP server listening"
        );

        Ok(BoundServer {
            listener,
            local_addr,
            router: self.router,
            keep_alive: self.keep_alive,
            force_close: self.force_close,
            shutdown_timeout: self.config.shutdown_timeout,
        })
    }

    /// Bind and serve until Ctrl-C or SIGTERM.
    pub async fn run(self) -> Result<(), ServerError> {
        self.bind().await?.run_until(shutdown_signal()).await
    }
}

/// A bound listener ready to serve.
pub struct BoundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    router: Router,
    keep_alive: KeepAliveManager,
    force_close: CancellationToken,
    shutdown_timeout: Duration,
}

impl BoundServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until `shutdown` resolves, then shut down.
    ///
    /// Shutdown cancels every keep-alive task first, so no ping is written to
    /// a draining connection, then drains in-flight requests for at most the
    /// configured timeout. Whatever is still open after that is force-closed:
    /// pending handlers answer `503` and streamed bodies end. Connections
    /// that still have not closed after a further second are left to the
    /// runtime and this returns.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let (drain_tx, drain_rx) = oneshot::channel::<()>();
        let serve = axum::serve(self.listener, self.router).with_graceful_shutdown(async move {
            let _ = drain_rx.await;
        });
        let mut server = tokio::spawn(async move { serve.await });

        tokio::select! {
            result = &mut server => {
                return match result {
                    Ok(result) => result.map_err(ServerError::Serve),
                    Err(e) => Err(ServerError::Serve(std::io::Error::other(e))),
                };
            }
            _ = shutdown => {}
        }

        info!("Shutting down streamable HTTP server");
        let cancelled = self.keep_alive.shutdown().await;
        info!(sessions = cancelled, "Keep-alive tasks cancelled, draining connections");
        let _ = drain_tx.send(());

        match tokio::time::timeout(self.shutdown_timeout, &mut server).await {
            Ok(Ok(result)) => result.map_err(ServerError::Serve)?,
            Ok(Err(e)) => warn!(error = %e, "Server task failed during shutdown"),
            Err(_) => {
                warn!(
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    "Graceful shutdown timed out, closing remaining connections"
                );
                self.force_close.cancel();
                match tokio::time::timeout(FORCE_CLOSE_GRACE, &mut server).await {
                    Ok(Ok(result)) => result.map_err(ServerError::Serve)?,
                    Ok(Err(e)) => warn!(error = %e, "Server task failed during shutdown"),
                    Err(_) => {
                        warn!("Connections still open after force-close, abandoning them");
                        server.abort();
                    }
                }
            }
        }

        info!("Server stopped");
        Ok(())
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
