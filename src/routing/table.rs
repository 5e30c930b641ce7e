//! Ordered route table.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::http::Method;
use parking_lot::RwLock;
use tracing::debug;

use super::pattern::{PathMatcher, compile};
use crate::chain::{Handler, Middleware};

/// A registered route. Immutable once created.
pub struct Route {
    method: Method,
    pattern: String,
    matcher: PathMatcher,
    param_names: Vec<String>,
    middleware: Vec<Middleware>,
    handler: Handler,
}

impl Route {
    pub fn new(
        method: Method,
        pattern: impl Into<String>,
        middleware: Vec<Middleware>,
        handler: Handler,
    ) -> Self {
        let pattern = pattern.into();
        let compiled = compile(&pattern);
        Self {
            method,
            pattern,
            matcher: compiled.matcher,
            param_names: compiled.param_names,
            middleware,
            handler,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    pub fn middleware(&self) -> &[Middleware] {
        &self.middleware
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Match `path` and bind the captures to parameter names.
    ///
    /// A name that appears twice in the pattern keeps the later capture.
    fn bind(&self, path: &str) -> Option<HashMap<String, String>> {
        let captures = self.matcher.captures(path)?;
        Some(
            self.param_names
                .iter()
                .zip(captures)
                .map(|(name, value)| (name.clone(), value.to_string()))
                .collect(),
        )
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("param_names", &self.param_names)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

/// Result of a successful lookup.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub params: HashMap<String, String>,
}

/// Routes in registration order, shared by every request.
#[derive(Default)]
pub struct RouteTable {
    routes: RwLock<Vec<Arc<Route>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `pattern` and append a route. No de-duplication.
    pub fn register(
        &self,
        method: Method,
        pattern: &str,
        middleware: Vec<Middleware>,
        handler: Handler,
    ) {
        let route = Arc::new(Route::new(method, pattern, middleware, handler));
        debug!(method = %route.method, pattern = %route.pattern, params = ?route.param_names, "Route registered");
        self.routes.write().push(route);
    }

    /// Return the first route, in registration order, whose method equals
    /// `method` and whose pattern accepts `path`.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let routes = self.routes.read();
        routes
            .iter()
            .filter(|route| route.method == *method)
            .find_map(|route| {
                route.bind(path).map(|params| RouteMatch {
                    route: Arc::clone(route),
                    params,
                })
            })
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }

    /// `(method, pattern)` pairs in registration order.
    pub fn describe(&self) -> Vec<(Method, String)> {
        self.routes
            .read()
            .iter()
            .map(|r| (r.method.clone(), r.pattern.clone()))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::chain::middleware_fn;

    fn noop() -> Handler {
        middleware_fn(|_ctx| Ok(()))
    }

    #[test]
    fn test_lookup_binds_params() {
        let table = RouteTable::new();
        table.register(Method::GET, "/users/:id", vec![], noop());

        let matched = table.lookup(&Method::GET, "/users/42").unwrap();
        assert_eq!(matched.route.pattern(), "/users/:id");
        assert_eq!(matched.params.get("id").map(String::as_str), Some("42"));
    }

    #[test]
    fn test_method_must_match() {
        let table = RouteTable::new();
        table.register(Method::POST, "/users", vec![], noop());

        assert!(table.lookup(&Method::GET, "/users").is_none());
        assert!(table.lookup(&Method::POST, "/users").is_some());
    }

    #[test]
    fn test_registration_order_shadows_literal_route() {
        let table = RouteTable::new();
        table.register(Method::GET, "/a/:x", vec![], noop());
        table.register(Method::GET, "/a/fixed", vec![], noop());

        let matched = table.lookup(&Method::GET, "/a/fixed").unwrap();
        assert_eq!(matched.route.pattern(), "/a/:x");
        assert_eq!(matched.params.get("x").map(String::as_str), Some("fixed"));
    }

    #[test]
    fn test_literal_first_wins_when_registered_first() {
        let table = RouteTable::new();
        table.register(Method::GET, "/a/fixed", vec![], noop());
        table.register(Method::GET, "/a/:x", vec![], noop());

        let matched = table.lookup(&Method::GET, "/a/fixed").unwrap();
        assert_eq!(matched.route.pattern(), "/a/fixed");
        assert!(matched.params.is_empty());

        let other = table.lookup(&Method::GET, "/a/other").unwrap();
        assert_eq!(other.route.pattern(), "/a/:x");
    }

    #[test]
    fn test_duplicate_registration_is_kept() {
        let table = RouteTable::new();
        table.register(Method::GET, "/dup", vec![], noop());
        table.register(Method::GET, "/dup", vec![], noop());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_no_match() {
        let table = RouteTable::new();
        assert!(table.is_empty());
        table.register(Method::GET, "/users/:id", vec![], noop());
        assert!(table.lookup(&Method::GET, "/nonexistent").is_none());
    }

    #[test]
    fn test_repeated_param_name_keeps_last() {
        let table = RouteTable::new();
        table.register(Method::GET, "/:v/:v", vec![], noop());
        let matched = table.lookup(&Method::GET, "/one/two").unwrap();
        assert_eq!(matched.params.get("v").map(String::as_str), Some("two"));
    }
}
