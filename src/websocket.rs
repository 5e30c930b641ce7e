//! WebSocket routes.
//!
//! A WebSocket route is matched like any other pattern, but the request never
//! reaches a synchronous handler. The server detects the upgrade, runs the
//! global middleware over the handshake request (so auth and rate limiting
//! still apply), and on admission completes the handshake and hands the
//! connection to an async [`WebSocketHandler`] as a [`WebSocketSession`].
//!
//! ```text
//! GET /ws/room (Upgrade: websocket)
//!    → WebSocketRoutes::lookup
//!    → global middleware → admission link
//!    → 101 Switching Protocols → handler(session)
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::http::HeaderMap;
use axum::http::header::{CONNECTION, HeaderName, UPGRADE};
use parking_lot::RwLock;

use crate::routing::{CompiledPattern, compile};

/// Boxed future returned by a [`WebSocketHandler`].
pub type SessionFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Drives one upgraded connection until it closes.
///
/// Implemented for any `Fn(WebSocketSession) -> impl Future<Output = ()>`.
pub trait WebSocketHandler: Send + Sync {
    fn handle(&self, session: WebSocketSession) -> SessionFuture;
}

impl<F, Fut> WebSocketHandler for F
where
    F: Fn(WebSocketSession) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn handle(&self, session: WebSocketSession) -> SessionFuture {
        Box::pin(self(session))
    }
}

/// An upgraded connection plus what routing learned about the request.
pub struct WebSocketSession {
    socket: WebSocket,
    params: HashMap<String, String>,
    peer_addr: Option<SocketAddr>,
}

impl WebSocketSession {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Next message from the client. `None` once the connection is closed.
    pub async fn recv(&mut self) -> Option<Result<Message, axum::Error>> {
        self.socket.recv().await
    }

    /// # Errors
    ///
    /// Fails when the connection is closed or the write fails.
    pub async fn send(&mut self, message: Message) -> Result<(), axum::Error> {
        self.socket.send(message).await
    }

    /// The raw socket, for callers that want to split it into sink and stream.
    pub fn into_socket(self) -> WebSocket {
        self.socket
    }
}

struct WebSocketRoute {
    pattern: String,
    compiled: CompiledPattern,
    handler: Arc<dyn WebSocketHandler>,
}

/// A matched WebSocket route waiting for its handshake.
pub struct WebSocketMatch {
    pub pattern: String,
    pub params: HashMap<String, String>,
    handler: Arc<dyn WebSocketHandler>,
}

impl fmt::Debug for WebSocketMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketMatch")
            .field("pattern", &self.pattern)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl WebSocketMatch {
    /// Run the handler on the upgraded `socket`.
    pub async fn run(self, socket: WebSocket, peer_addr: Option<SocketAddr>) {
        let session = WebSocketSession {
            socket,
            params: self.params,
            peer_addr,
        };
        self.handler.handle(session).await;
    }
}

/// WebSocket routes in registration order. First match wins.
#[derive(Default)]
pub struct WebSocketRoutes {
    routes: RwLock<Vec<Arc<WebSocketRoute>>>,
}

impl WebSocketRoutes {
    pub fn register(&self, pattern: &str, handler: Arc<dyn WebSocketHandler>) {
        let route = WebSocketRoute {
            pattern: pattern.to_string(),
            compiled: compile(pattern),
            handler,
        };
        self.routes.write().push(Arc::new(route));
    }

    pub fn lookup(&self, path: &str) -> Option<WebSocketMatch> {
        let routes = self.routes.read();
        routes.iter().find_map(|route| {
            let values = route.compiled.matcher.captures(path)?;
            let params = route
                .compiled
                .param_names
                .iter()
                .cloned()
                .zip(values.into_iter().map(str::to_string))
                .collect();
            Some(WebSocketMatch {
                pattern: route.pattern.clone(),
                params,
                handler: route.handler.clone(),
            })
        })
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }

    pub fn patterns(&self) -> Vec<String> {
        self.routes.read().iter().map(|r| r.pattern.clone()).collect()
    }
}

/// Whether the request asks for a WebSocket upgrade.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let has_token = |name: HeaderName, token: &str| {
        headers.get_all(name).iter().any(|value| {
            value
                .to_str()
                .is_ok_and(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
        })
    };
    has_token(UPGRADE, "websocket") && has_token(CONNECTION, "upgrade")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn noop() -> Arc<dyn WebSocketHandler> {
        Arc::new(|_session: WebSocketSession| async {})
    }

    #[test]
    fn test_lookup_binds_params() {
        let routes = WebSocketRoutes::default();
        routes.register("/ws/:room", noop());

        let matched = routes.lookup("/ws/lobby").unwrap();
        assert_eq!(matched.pattern, "/ws/:room");
        assert_eq!(matched.params.get("room").unwrap(), "lobby");
        assert!(routes.lookup("/ws/lobby/extra").is_none());
    }

    #[test]
    fn test_first_registered_wins() {
        let routes = WebSocketRoutes::default();
        routes.register("/ws/*rest", noop());
        routes.register("/ws/:room", noop());

        let matched = routes.lookup("/ws/lobby").unwrap();
        assert_eq!(matched.pattern, "/ws/*rest");
        assert_eq!(routes.patterns(), vec!["/ws/*rest", "/ws/:room"]);
    }

    #[test]
    fn test_upgrade_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_upgrade_request(&headers));

        headers.insert(UPGRADE, HeaderValue::from_static("WebSocket"));
        assert!(!is_upgrade_request(&headers));

        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        assert!(is_upgrade_request(&headers));
    }
}
