//! Request logging middleware.
//!
//! Times the rest of the chain and emits one `tracing` event per request with
//! method, path, status and latency. When the chain fails before writing a
//! response, the status logged is the one the dispatcher will send.

use std::time::Instant;

use tracing::{info, warn};

use crate::chain::{Middleware, middleware_fn};
use crate::metrics::{self, UNMATCHED_ROUTE};

pub fn logger() -> Middleware {
    middleware_fn(|ctx| {
        let start = Instant::now();
        let result = ctx.next();
        let elapsed = start.elapsed();

        let status = match &result {
            Err(err) if !ctx.response().is_committed() => err.status_code(),
            _ => ctx.response().status(),
        };
        let route = ctx.route_pattern().unwrap_or(UNMATCHED_ROUTE);
        metrics::record_request(
            route,
            ctx.method().as_str(),
            status.as_u16(),
            elapsed.as_secs_f64(),
        );

        match &result {
            Ok(()) => info!(
                method = %ctx.method(),
                path = %ctx.path(),
                status = status.as_u16(),
                latency_ms = elapsed.as_secs_f64() * 1000.0,
                "Request completed"
            ),
            Err(err) => warn!(
                method = %ctx.method(),
                path = %ctx.path(),
                status = status.as_u16(),
                latency_ms = elapsed.as_secs_f64() * 1000.0,
                error = %err,
                "Request failed"
            ),
        }

        result
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use axum::body::Bytes;
    use axum::http::{Request, StatusCode};

    use super::*;
    use crate::chain::{build, execute};
    use crate::context::Context;
    use crate::error::AppError;

    fn context() -> Context {
        Context::new(Request::builder().uri("/x").body(Bytes::new()).unwrap(), None)
    }

    #[test]
    fn test_logger_passes_result_through() {
        let handler = middleware_fn(|ctx| ctx.text(StatusCode::ACCEPTED, "ok"));
        let mut ctx = context();
        execute(&mut ctx, build(&[logger()], &[], &handler)).unwrap();
        assert_eq!(ctx.response().status(), StatusCode::ACCEPTED);
    }

    #[test]
    fn test_logger_returns_handler_error() {
        let handler = middleware_fn(|_ctx| Err(AppError::Validation("bad".to_string())));
        let mut ctx = context();
        let result = execute(&mut ctx, build(&[logger()], &[], &handler));
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
