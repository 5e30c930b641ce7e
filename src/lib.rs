//! # waypoint
//!
//! The dispatch core of a small HTTP framework:
//!
//! - **Ordered routing**: `:name` segment captures and a trailing `*rest`
//!   wildcard, matched first-registered-first
//! - **Explicit continuation**: every middleware decides whether to call
//!   [`Context::next`]; not calling it short-circuits the chain
//! - **Panic containment**: a recovery middleware turns handler panics into 500s
//! - **Fixed-window rate limiting** with a background reaper
//! - **WebSocket routes**: handshakes pass through the global middleware, then
//!   an async handler owns the connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │               axum / hyper (server::serve)                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  App::dispatch → RouteTable::lookup → chain::execute        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Global middleware → route middleware → handler             │
//! │  (Recovery, Logger, CORS, RateLimit, RequestId, Auth, ...)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Context: params, query, locals, cursor, ResponseWriter     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use axum::http::StatusCode;
//! use tokio_util::sync::CancellationToken;
//! use waypoint::middleware::{logger, recovery};
//! use waypoint::{App, Config, server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let app = Arc::new(App::new());
//!     app.use_middleware(recovery());
//!     app.use_middleware(logger());
//!     app.get("/users/:id", |ctx| {
//!         let id = ctx.param("id").unwrap_or_default().to_string();
//!         ctx.text(StatusCode::OK, id)
//!     });
//!
//!     let listener = tokio::net::TcpListener::bind(config.server_addr()).await?;
//!     server::serve(app, listener, &config, CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod chain;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod response;
pub mod routing;
pub mod server;
pub mod static_files;
pub mod utils;
pub mod websocket;

// Re-exports for convenience
pub use app::App;
pub use chain::{Handler, Middleware, middleware_fn};
pub use config::Config;
pub use context::Context;
pub use error::{AppError, AppResult};
pub use response::ResponseWriter;
