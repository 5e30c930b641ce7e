//! Host transport: axum on tokio.
//!
//! The router has no routes of its own. Every request lands in a fallback
//! handler that buffers the body, hands the request to [`App::dispatch`] on
//! the blocking pool and returns whatever it produces.
//!
//! ```text
//! TcpListener → TraceLayer → TimeoutLayer → fallback
//!                                              │
//!                          WebSocket upgrade? ─┼─ spawn_blocking(App::admit_websocket)
//!                                              │        └─ 101 + handler task, or the refusal
//!                                   to_bytes(max body) ── 413
//!                                              │
//!                                   spawn_blocking(App::dispatch)
//!                                              │
//!                                   panic escaped chain ── 500
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, FromRequestParts, State};
use axum::http::header::CONTENT_LENGTH;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use tokio::net::TcpListener;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::app::App;
use crate::config::Config;
use crate::metrics;
use crate::middleware::recovery::panic_message;
use crate::websocket::is_upgrade_request;

#[derive(Clone)]
struct ServerState {
    app: Arc<App>,
    max_body_size: usize,
}

/// Wrap `app` in an axum router with tracing and a per-request timeout.
pub fn build_router(app: Arc<App>, config: &Config) -> Router {
    let state = ServerState {
        app,
        max_body_size: config.max_request_body_size,
    };

    Router::new()
        .fallback(dispatch_handler)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    config.request_timeout,
                )),
        )
}

async fn dispatch_handler(State(state): State<ServerState>, request: Request<Body>) -> Response<Body> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let (parts, body) = request.into_parts();

    if is_upgrade_request(&parts.headers) && state.app.is_websocket_route(parts.uri.path()) {
        return upgrade_websocket(state, parts, peer).await;
    }

    let declared_len = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_len.is_some_and(|len| len > state.max_body_size) {
        return payload_too_large(state.max_body_size);
    }

    let bytes: Bytes = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            // Overflowing chunked bodies surface here rather than above.
            warn!(error = %e, path = %parts.uri.path(), "Failed to buffer request body");
            return payload_too_large(state.max_body_size);
        }
    };

    let request = Request::from_parts(parts, bytes);
    let app = state.app.clone();

    match tokio::task::spawn_blocking(move || app.dispatch(request, peer)).await {
        Ok(response) => response,
        Err(join_err) => escaped_panic(join_err),
    }
}

async fn upgrade_websocket(
    state: ServerState,
    mut parts: axum::http::request::Parts,
    peer: Option<SocketAddr>,
) -> Response<Body> {
    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            debug!(path = %parts.uri.path(), %rejection, "Rejected WebSocket handshake");
            return rejection.into_response();
        }
    };

    // The handshake has no body worth reading.
    let request = Request::from_parts(parts, Bytes::new());
    let app = state.app.clone();

    match tokio::task::spawn_blocking(move || app.admit_websocket(request, peer)).await {
        Ok(Ok(matched)) => upgrade
            .on_upgrade(move |socket| matched.run(socket, peer))
            .into_response(),
        Ok(Err(refusal)) => refusal,
        Err(join_err) => escaped_panic(join_err),
    }
}

fn escaped_panic(join_err: JoinError) -> Response<Body> {
    if join_err.is_panic() {
        let message = panic_message(join_err.into_panic().as_ref());
        error!(panic = %message, "Panic escaped the middleware chain");
        metrics::record_panic_recovered();
    } else {
        error!(error = %join_err, "Dispatch task was cancelled");
    }
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

fn payload_too_large(limit: usize) -> Response<Body> {
    (
        StatusCode::PAYLOAD_TOO_LARGE,
        [("Content-Type", "application/json")],
        format!(
            r#"{{"error":"payload_too_large","message":"Request body exceeds {limit} bytes"}}"#
        ),
    )
        .into_response()
}

/// Serve `app` on `listener` until `shutdown` is cancelled.
///
/// After cancellation the listener stops accepting and in-flight requests get
/// `config.shutdown_grace_period` to finish; whatever is left is aborted.
///
/// # Errors
///
/// Returns the I/O error that stopped the server, if any.
pub async fn serve(
    app: Arc<App>,
    listener: TcpListener,
    config: &Config,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    let router = build_router(app, config);
    let grace = config.shutdown_grace_period;

    info!(address = %addr, "HTTP server starting");

    let signal = shutdown.clone();
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { signal.cancelled().await });

    let mut handle = tokio::spawn(async move { server.await });

    tokio::select! {
        result = &mut handle => return flatten(result),
        _ = shutdown.cancelled() => {}
    }

    match tokio::time::timeout(grace, &mut handle).await {
        Ok(result) => {
            info!("HTTP server stopped");
            flatten(result)
        }
        Err(_) => {
            warn!(
                grace_secs = grace.as_secs(),
                "Shutdown grace period elapsed, aborting in-flight requests"
            );
            handle.abort();
            Ok(())
        }
    }
}

fn flatten(result: Result<std::io::Result<()>, tokio::task::JoinError>) -> std::io::Result<()> {
    result.map_err(std::io::Error::other)?
}
