//! Disable client caching.
//!
//! Used during development so edited assets and templates are always fetched
//! fresh.

use crate::chain::{Middleware, middleware_fn};

pub fn no_cache() -> Middleware {
    middleware_fn(|ctx| {
        ctx.set_header("Cache-Control", "no-cache, no-store, must-revalidate");
        ctx.set_header("Pragma", "no-cache");
        ctx.set_header("Expires", "0");
        ctx.next()
    })
}
