//! The dispatcher: route table, global middleware and request entry point.
//!
//! # Request flow
//!
//! ```text
//! dispatch(request)
//!    │
//!    ├─ Context::new            query parsed, first value wins
//!    ├─ RouteTable::lookup      first registered match wins
//!    │     └─ no match ──────── 404 {"error":"route_not_found"}
//!    ├─ chain::build            global ++ route middleware ++ handler
//!    ├─ chain::execute
//!    │     └─ Err, nothing written ── status from AppError, JSON body
//!    └─ ResponseWriter::into_response
//! ```
//!
//! `App` is shared behind an `Arc` by the server. Registration takes `&self`,
//! so routes and middleware can be added while requests are in flight; a
//! request sees the middleware list as it was when its chain was built.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{Method, Request, Response};
use parking_lot::RwLock;
use tracing::{debug, error, warn};

use crate::chain::{self, Handler, Middleware, middleware_fn};
use crate::collaborators::TemplateRenderer;
use crate::context::Context;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::response::{CONTENT_TYPE_JSON, ResponseWriter};
use crate::routing::RouteTable;
use crate::static_files::{static_handler, static_pattern};
use crate::websocket::{WebSocketHandler, WebSocketMatch, WebSocketRoutes};

/// Fallback body if an error body cannot be serialized.
const FALLBACK_ERROR_BODY: &[u8] =
    br#"{"error":"internal_error","message":"Internal Server Error"}"#;

/// Local set by the last link of a WebSocket handshake chain.
const WEBSOCKET_ADMITTED_LOCAL: &str = "websocket_admitted";

#[derive(Default)]
pub struct App {
    routes: RouteTable,
    websockets: WebSocketRoutes,
    middleware: RwLock<Vec<Middleware>>,
    renderer: Option<Arc<dyn TemplateRenderer>>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `renderer` available to [`Context::render`].
    pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Append a global middleware. Runs for every matched route, in the order
    /// added.
    pub fn use_middleware(&self, middleware: Middleware) {
        self.middleware.write().push(middleware);
    }

    pub fn get<H>(&self, pattern: &str, handler: H)
    where
        H: Fn(&mut Context) -> AppResult<()> + Send + Sync + 'static,
    {
        self.route(Method::GET, pattern, handler);
    }

    pub fn post<H>(&self, pattern: &str, handler: H)
    where
        H: Fn(&mut Context) -> AppResult<()> + Send + Sync + 'static,
    {
        self.route(Method::POST, pattern, handler);
    }

    pub fn put<H>(&self, pattern: &str, handler: H)
    where
        H: Fn(&mut Context) -> AppResult<()> + Send + Sync + 'static,
    {
        self.route(Method::PUT, pattern, handler);
    }

    pub fn delete<H>(&self, pattern: &str, handler: H)
    where
        H: Fn(&mut Context) -> AppResult<()> + Send + Sync + 'static,
    {
        self.route(Method::DELETE, pattern, handler);
    }

    pub fn patch<H>(&self, pattern: &str, handler: H)
    where
        H: Fn(&mut Context) -> AppResult<()> + Send + Sync + 'static,
    {
        self.route(Method::PATCH, pattern, handler);
    }

    pub fn options<H>(&self, pattern: &str, handler: H)
    where
        H: Fn(&mut Context) -> AppResult<()> + Send + Sync + 'static,
    {
        self.route(Method::OPTIONS, pattern, handler);
    }

    /// Register `handler` for `method` and `pattern`.
    ///
    /// Routes are matched in registration order. A pattern registered earlier
    /// shadows any later one that accepts the same paths, even a more
    /// specific one: register `/a/fixed` before `/a/:x` if both should work.
    pub fn route<H>(&self, method: Method, pattern: &str, handler: H)
    where
        H: Fn(&mut Context) -> AppResult<()> + Send + Sync + 'static,
    {
        self.route_with(method, pattern, Vec::new(), middleware_fn(handler));
    }

    /// Register a route with its own middleware, run after the global list.
    pub fn route_with(
        &self,
        method: Method,
        pattern: &str,
        middleware: Vec<Middleware>,
        handler: Handler,
    ) {
        self.routes.register(method, pattern, middleware, handler);
        metrics::set_routes_registered(self.routes.len());
    }

    /// Serve files under `dir` at `GET {prefix}/*filepath`.
    pub fn serve_static(&self, prefix: &str, dir: impl Into<PathBuf>) {
        self.route_with(
            Method::GET,
            &static_pattern(prefix),
            Vec::new(),
            static_handler(dir),
        );
    }

    /// Register an async handler for WebSocket upgrades on `pattern`.
    ///
    /// Global middleware runs over the handshake request; the connection is
    /// upgraded only if the chain reaches its end without writing a response.
    pub fn websocket<H>(&self, pattern: &str, handler: H)
    where
        H: WebSocketHandler + 'static,
    {
        self.websockets.register(pattern, Arc::new(handler));
    }

    /// Whether `path` belongs to a WebSocket route.
    pub fn is_websocket_route(&self, path: &str) -> bool {
        !self.websockets.is_empty() && self.websockets.lookup(path).is_some()
    }

    /// Run the global middleware over a WebSocket handshake request.
    ///
    /// Returns the matched route when the upgrade may proceed, or the
    /// response to send instead: 404 when no WebSocket route matches,
    /// otherwise whatever the chain wrote or failed with.
    pub fn admit_websocket(
        &self,
        request: Request<Bytes>,
        peer: Option<SocketAddr>,
    ) -> Result<WebSocketMatch, Response<Body>> {
        let mut ctx = Context::new(request, peer);

        let Some(matched) = self.websockets.lookup(ctx.path()) else {
            return Err(not_found(&ctx));
        };

        ctx.set_route(&matched.pattern, matched.params.clone());
        ctx.set_renderer(self.renderer.clone());

        let admit = middleware_fn(|ctx| {
            ctx.set_local(WEBSOCKET_ADMITTED_LOCAL, true);
            Ok(())
        });
        let links = {
            let global = self.middleware.read();
            chain::build(&global, &[], &admit)
        };

        let result = chain::execute(&mut ctx, links);
        let admitted = result.is_ok()
            && !ctx.response().is_committed()
            && ctx.get_local::<bool>(WEBSOCKET_ADMITTED_LOCAL) == Some(&true);

        if admitted {
            debug!(path = %ctx.path(), pattern = %matched.pattern, "WebSocket upgrade admitted");
            Ok(matched)
        } else {
            Err(finish(ctx, result))
        }
    }

    /// `(method, pattern)` for every route, in match order.
    pub fn routes(&self) -> Vec<(Method, String)> {
        self.routes.describe()
    }

    /// WebSocket patterns in registration order.
    pub fn websocket_routes(&self) -> Vec<String> {
        self.websockets.patterns()
    }

    /// Run one request through routing and the middleware chain.
    ///
    /// Always produces a response. A panic that no recovery link catches
    /// propagates to the caller.
    pub fn dispatch(&self, request: Request<Bytes>, peer: Option<SocketAddr>) -> Response<Body> {
        let mut ctx = Context::new(request, peer);

        let Some(matched) = self.routes.lookup(ctx.method(), ctx.path()) else {
            return not_found(&ctx);
        };

        ctx.set_route(matched.route.pattern(), matched.params);
        ctx.set_renderer(self.renderer.clone());

        let links = {
            let global = self.middleware.read();
            chain::build(&global, matched.route.middleware(), matched.route.handler())
        };

        let result = chain::execute(&mut ctx, links);
        finish(ctx, result)
    }
}

fn not_found(ctx: &Context) -> Response<Body> {
    debug!(method = %ctx.method(), path = %ctx.path(), "No route matched");
    let err = AppError::RouteNotFound {
        method: ctx.method().clone(),
        path: ctx.path().to_string(),
    };
    let mut writer = ResponseWriter::new();
    write_error(&mut writer, &err);
    writer.into_response()
}

/// Turn a finished chain into the response, rendering `result`'s error when
/// nothing was written.
fn finish(ctx: Context, result: AppResult<()>) -> Response<Body> {
    let method = ctx.method().clone();
    let path = ctx.path().to_string();
    let mut writer = ctx.into_response_writer();

    if let Err(err) = result {
        if writer.is_committed() {
            warn!(
                method = %method,
                path = %path,
                status = writer.status().as_u16(),
                error = %err,
                "Chain failed after the response was written"
            );
        } else {
            if err.status_code().is_server_error() {
                error!(method = %method, path = %path, error = %err, "Unhandled chain error");
            } else {
                debug!(method = %method, path = %path, error = %err, "Chain rejected request");
            }
            write_error(&mut writer, &err);
        }
    }

    writer.into_response()
}

/// Write `err` as the JSON error body. Headers already set are kept.
fn write_error(writer: &mut ResponseWriter, err: &AppError) {
    let body = serde_json::to_vec(&err.to_response_body())
        .unwrap_or_else(|_| FALLBACK_ERROR_BODY.to_vec());
    writer.write_with_type(err.status_code(), CONTENT_TYPE_JSON, &body);
}
