//! Panic recovery middleware.
//!
//! Runs the rest of the chain inside [`catch_unwind`]. A panic is logged with
//! its payload, anything already buffered is discarded, and the client gets a
//! plain `500 Internal Server Error`. The chain then reports success, so the
//! dispatcher sends that response as-is.
//!
//! Install it first so it covers every later link.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use axum::http::StatusCode;
use tracing::error;

use crate::chain::{Middleware, middleware_fn};
use crate::metrics;

pub fn recovery() -> Middleware {
    middleware_fn(|ctx| match catch_unwind(AssertUnwindSafe(|| ctx.next())) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(
                method = %ctx.method(),
                path = %ctx.path(),
                panic = %message,
                "Panic recovered"
            );
            metrics::record_panic_recovered();

            ctx.response_mut().reset();
            ctx.text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    })
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use axum::body::Bytes;
    use axum::http::Request;

    use super::*;
    use crate::chain::{build, execute};
    use crate::context::Context;

    fn context() -> Context {
        Context::new(Request::builder().uri("/boom").body(Bytes::new()).unwrap(), None)
    }

    #[test]
    fn test_panic_becomes_500() {
        let handler = middleware_fn(|ctx| {
            ctx.set_header("X-Partial", "yes");
            panic!("handler exploded");
        });
        let mut ctx = context();
        execute(&mut ctx, build(&[recovery()], &[], &handler)).unwrap();

        assert_eq!(ctx.response().status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ctx.response().body(), b"Internal Server Error");
        assert!(!ctx.response().headers().contains_key("x-partial"));
    }

    #[test]
    fn test_panic_after_write_is_replaced() {
        let handler = middleware_fn(|ctx| {
            ctx.text(StatusCode::OK, "partial")?;
            panic!("late failure");
        });
        let mut ctx = context();
        execute(&mut ctx, build(&[recovery()], &[], &handler)).unwrap();

        assert_eq!(ctx.response().status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ctx.response().body(), b"Internal Server Error");
    }

    #[test]
    fn test_no_panic_is_transparent() {
        let handler = middleware_fn(|ctx| ctx.text(StatusCode::OK, "fine"));
        let mut ctx = context();
        execute(&mut ctx, build(&[recovery()], &[], &handler)).unwrap();
        assert_eq!(ctx.response().body(), b"fine");
    }

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u8), "non-string panic payload");
    }
}
