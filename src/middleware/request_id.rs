//! Request ID middleware for correlating logs.
//!
//! 1. Uses the inbound `X-Request-Id` header when present and non-empty
//! 2. Otherwise generates a UUIDv4
//! 3. Stores the ID under the local key `request_id`
//! 4. Echoes it on the response
//!
//! ```bash
//! curl -H "X-Request-Id: my-correlation-id" http://localhost:3000/
//! ```

use tracing::debug;
use uuid::Uuid;

use crate::chain::{Middleware, middleware_fn};
use crate::context::Context;

/// Header name for request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Local key holding the request ID as a `String`.
pub const REQUEST_ID_LOCAL: &str = "request_id";

pub fn request_id() -> Middleware {
    middleware_fn(|ctx| {
        let id = extract_or_generate_request_id(ctx);
        debug!(request_id = %id, "Processing request");

        ctx.set_header(REQUEST_ID_HEADER, &id);
        ctx.set_local(REQUEST_ID_LOCAL, id);
        ctx.next()
    })
}

/// The ID stored by [`request_id`], if that link ran.
pub fn current_request_id(ctx: &Context) -> Option<&str> {
    ctx.get_local::<String>(REQUEST_ID_LOCAL).map(String::as_str)
}

fn extract_or_generate_request_id(ctx: &Context) -> String {
    match ctx.header(REQUEST_ID_HEADER).map(str::trim) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => Uuid::new_v4().to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use axum::body::Bytes;
    use axum::http::{Request, StatusCode};

    use super::*;
    use crate::chain::{build, execute};

    fn run(header: Option<&str>) -> Context {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(REQUEST_ID_HEADER, value);
        }
        let mut ctx = Context::new(builder.body(Bytes::new()).unwrap(), None);
        let handler = middleware_fn(|ctx| {
            let id = current_request_id(ctx).unwrap_or_default().to_string();
            ctx.text(StatusCode::OK, id)
        });
        execute(&mut ctx, build(&[request_id()], &[], &handler)).unwrap();
        ctx
    }

    #[test]
    fn test_existing_request_id_propagated() {
        let ctx = run(Some("existing-id-123"));
        assert_eq!(ctx.response().body(), b"existing-id-123");
        assert_eq!(
            ctx.response().headers().get(REQUEST_ID_HEADER).unwrap(),
            "existing-id-123"
        );
    }

    #[test]
    fn test_generate_new_request_id() {
        let ctx = run(None);
        let id = current_request_id(&ctx).unwrap();
        assert!(Uuid::parse_str(id).is_ok());
        assert_eq!(ctx.response().headers().get(REQUEST_ID_HEADER).unwrap(), id);
    }

    #[test]
    fn test_blank_header_replaced() {
        let ctx = run(Some("   "));
        assert!(Uuid::parse_str(current_request_id(&ctx).unwrap()).is_ok());
    }
}
