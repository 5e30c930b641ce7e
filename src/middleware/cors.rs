//! Cross-origin resource sharing headers.
//!
//! Every response gets `Access-Control-Allow-Origin`, `-Methods` and
//! `-Headers`. An `OPTIONS` request is answered `200` here without running the
//! rest of the chain.
//!
//! Preflights only reach this link when an `OPTIONS` route matches the path;
//! the dispatcher answers everything else with 404 before any middleware runs.

use std::sync::Arc;

use axum::http::{Method, StatusCode};

use crate::chain::{Middleware, middleware_fn};
use crate::context::Context;

pub const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS, PATCH";
pub const ALLOWED_HEADERS: &str = "Content-Type, Authorization";

/// Allow any origin.
pub fn cors() -> Middleware {
    cors_with_origins(vec!["*".to_string()])
}

/// Allow the listed origins. A `*` entry allows any origin.
///
/// With a specific list the request's `Origin` is echoed back when it is
/// listed; unlisted origins get no `Access-Control-Allow-Origin` header.
pub fn cors_with_origins(origins: Vec<String>) -> Middleware {
    let origins: Arc<[String]> = origins.into();
    middleware_fn(move |ctx| {
        if let Some(origin) = allowed_origin(ctx, &origins) {
            ctx.set_header("Access-Control-Allow-Origin", &origin);
            if origin != "*" {
                ctx.set_header("Vary", "Origin");
            }
        }
        ctx.set_header("Access-Control-Allow-Methods", ALLOWED_METHODS);
        ctx.set_header("Access-Control-Allow-Headers", ALLOWED_HEADERS);

        if *ctx.method() == Method::OPTIONS {
            return ctx.status(StatusCode::OK);
        }
        ctx.next()
    })
}

fn allowed_origin(ctx: &Context, origins: &[String]) -> Option<String> {
    if origins.iter().any(|o| o == "*") {
        return Some("*".to_string());
    }
    let origin = ctx.header("origin")?;
    origins
        .iter()
        .any(|o| o.eq_ignore_ascii_case(origin))
        .then(|| origin.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use axum::body::Bytes;
    use axum::http::Request;

    use super::*;
    use crate::chain::{build, execute};

    fn run(cors: Middleware, method: Method, origin: Option<&str>) -> (Context, bool) {
        let mut builder = Request::builder().method(method).uri("/api");
        if let Some(origin) = origin {
            builder = builder.header("origin", origin);
        }
        let mut ctx = Context::new(builder.body(Bytes::new()).unwrap(), None);

        let reached = Arc::new(AtomicBool::new(false));
        let flag = reached.clone();
        let handler = middleware_fn(move |ctx| {
            flag.store(true, Ordering::SeqCst);
            ctx.text(StatusCode::OK, "handled")
        });
        execute(&mut ctx, build(&[cors], &[], &handler)).unwrap();
        (ctx, reached.load(Ordering::SeqCst))
    }

    #[test]
    fn test_default_headers() {
        let (ctx, reached) = run(cors(), Method::GET, None);
        let headers = ctx.response().headers();
        assert!(reached);
        assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
        assert_eq!(
            headers.get("access-control-allow-methods").unwrap(),
            ALLOWED_METHODS
        );
        assert_eq!(
            headers.get("access-control-allow-headers").unwrap(),
            ALLOWED_HEADERS
        );
    }

    #[test]
    fn test_options_short_circuits() {
        let (ctx, reached) = run(cors(), Method::OPTIONS, None);
        assert!(!reached);
        assert_eq!(ctx.response().status(), StatusCode::OK);
        assert!(ctx.response().body().is_empty());
        assert!(ctx.response().headers().contains_key("access-control-allow-origin"));
    }

    #[test]
    fn test_listed_origin_echoed() {
        let origins = vec!["https://app.example.com".to_string()];
        let (ctx, _) = run(
            cors_with_origins(origins.clone()),
            Method::GET,
            Some("https://app.example.com"),
        );
        assert_eq!(
            ctx.response().headers().get("access-control-allow-origin").unwrap(),
            "https://app.example.com"
        );

        let (ctx, _) = run(cors_with_origins(origins), Method::GET, Some("https://evil.test"));
        assert!(!ctx.response().headers().contains_key("access-control-allow-origin"));
    }
}
