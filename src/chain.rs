//! Middleware chain execution.
//!
//! A chain is an ordered list of links: global middleware, then route
//! middleware, then a terminal link that calls the matched handler. Links run
//! strictly in that order on the request's own thread, and each hands control
//! on with [`Context::next`].
//!
//! An error returned by a link unwinds straight back to the caller of
//! [`execute`]. Links that already ran see it only through the return value
//! of their own `next()` call; nothing re-runs or skips them.

use std::sync::Arc;

use crate::context::Context;
use crate::error::AppResult;

/// A link in the chain.
pub type Middleware = Arc<dyn Fn(&mut Context) -> AppResult<()> + Send + Sync>;

/// The user function that produces the response for a matched route.
///
/// Same signature as [`Middleware`]; a handler is just the last link.
pub type Handler = Middleware;

/// Wrap a closure as a [`Middleware`].
pub fn middleware_fn<F>(f: F) -> Middleware
where
    F: Fn(&mut Context) -> AppResult<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Assemble a chain: `global`, then `route`, then the terminal `handler`.
pub fn build(global: &[Middleware], route: &[Middleware], handler: &Handler) -> Arc<[Middleware]> {
    global
        .iter()
        .chain(route)
        .chain(std::iter::once(handler))
        .cloned()
        .collect()
}

/// Run `chain` from position 0.
pub fn execute(ctx: &mut Context, chain: Arc<[Middleware]>) -> AppResult<()> {
    ctx.start_chain(chain)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Mutex;

    use axum::body::Bytes;
    use axum::http::{Request, StatusCode};

    use super::*;
    use crate::error::AppError;

    fn context() -> Context {
        Context::new(Request::builder().uri("/").body(Bytes::new()).unwrap(), None)
    }

    fn logging(id: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Middleware {
        let log = log.clone();
        middleware_fn(move |ctx| {
            log.lock().unwrap().push(id);
            ctx.next()
        })
    }

    #[test]
    fn test_links_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let global = vec![logging("a", &log), logging("b", &log)];
        let route = vec![logging("c", &log)];
        let handler = logging("handler", &log);

        let mut ctx = context();
        execute(&mut ctx, build(&global, &route, &handler)).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c", "handler"]);
    }

    #[test]
    fn test_link_without_next_short_circuits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stop = middleware_fn(|ctx| ctx.text(StatusCode::FORBIDDEN, "stop"));
        let global = vec![logging("a", &log), stop, logging("never", &log)];
        let handler = logging("handler", &log);

        let mut ctx = context();
        execute(&mut ctx, build(&global, &[], &handler)).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a"]);
        assert_eq!(ctx.response().status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_error_unwinds_to_caller() {
        let after = Arc::new(Mutex::new(Vec::new()));
        let after_clone = after.clone();
        let outer = middleware_fn(move |ctx| {
            let result = ctx.next();
            after_clone.lock().unwrap().push(result.is_err());
            result
        });
        let handler = middleware_fn(|_ctx| Err(AppError::handler("boom")));

        let mut ctx = context();
        let result = execute(&mut ctx, build(&[outer], &[], &handler));

        assert!(matches!(result, Err(AppError::Handler(_))));
        assert_eq!(*after.lock().unwrap(), vec![true]);
        assert!(!ctx.response().is_committed());
    }

    #[test]
    fn test_handler_only_chain() {
        let handler = middleware_fn(|ctx| ctx.text(StatusCode::OK, "only"));
        let mut ctx = context();
        execute(&mut ctx, build(&[], &[], &handler)).unwrap();
        assert_eq!(ctx.response().body(), b"only");
    }
}
