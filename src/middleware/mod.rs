//! Built-in middleware.
//!
//! Each constructor returns a [`Middleware`](crate::chain::Middleware) ready to
//! pass to [`App::use_middleware`](crate::App::use_middleware) or to a route.
//!
//! - **Recovery**: turns a panic anywhere later in the chain into a 500
//! - **Logger**: one `tracing` event and one metrics sample per request
//! - **Request ID**: propagates or generates `X-Request-Id`
//! - **CORS**: allow-origin headers and `OPTIONS` short-circuit
//! - **Rate Limiting**: fixed-window counter per client
//! - **Bearer Auth**: token verification with failure throttling
//! - **No Cache**: disables client caching during development
//! - **Upload**: hands multipart bodies to an upload processor
//!
//! # Suggested order
//!
//! ```text
//! Request → Recovery → Logger → Request ID → CORS → Rate Limit → Auth → Handler
//!              ↓          ↓          ↓          ↓        ↓          ↓
//!            500 on    latency   X-Request-Id  OPTIONS   429       401
//!            panic     + status                 200
//! ```
//!
//! Recovery goes first so a panic in any other link is caught. The logger
//! goes before anything that can reject, so rejections are logged too.

pub mod auth;
pub mod cors;
pub mod ip;
pub mod logger;
pub mod no_cache;
pub mod rate_limit;
pub mod recovery;
pub mod request_id;
pub mod upload;

pub use auth::{ApiKeyVerifier, BearerAuth, Claims, FailureTracker, TokenVerifier};
pub use cors::{cors, cors_with_origins};
pub use ip::{TrustedProxyConfig, UNKNOWN_IP, client_key};
pub use logger::logger;
pub use no_cache::no_cache;
pub use rate_limit::{Admission, FixedWindowLimiter, RateLimit, RateLimitError};
pub use recovery::recovery;
pub use request_id::request_id;
pub use upload::upload;
