//! Per-request context.
//!
//! A [`Context`] is created for every inbound request and owned by the
//! thread handling it. It carries the request, the path and query
//! parameters, a typed key/value store for passing state between links, the
//! chain of links with its continuation cursor, and the buffered response.
//!
//! # Continuation
//!
//! [`Context::next`] is the only way control moves down the chain. A link
//! that returns without calling it stops the chain there. Calling it twice
//! advances the cursor twice; nothing guards against that.

use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::http::header::{HeaderName, HeaderValue, SET_COOKIE};
use axum::http::{HeaderMap, Method, Request, StatusCode, Uri};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::chain::Middleware;
use crate::collaborators::TemplateRenderer;
use crate::error::{AppError, AppResult, sanitize_serde_error};
use crate::response::{CONTENT_TYPE_HTML, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT, ResponseWriter};

pub struct Context {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    peer_addr: Option<SocketAddr>,
    route_pattern: Option<String>,
    params: HashMap<String, String>,
    query: HashMap<String, String>,
    locals: HashMap<String, Box<dyn Any + Send + Sync>>,
    chain: Arc<[Middleware]>,
    cursor: usize,
    response: ResponseWriter,
    renderer: Option<Arc<dyn TemplateRenderer>>,
}

impl Context {
    /// Build a context from a buffered request.
    ///
    /// Query parameters are decoded here. When a key repeats, the first value
    /// is kept.
    pub fn new(request: Request<Bytes>, peer_addr: Option<SocketAddr>) -> Self {
        let (parts, body) = request.into_parts();
        let query = parse_query(parts.uri.query());

        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            peer_addr,
            route_pattern: None,
            params: HashMap::new(),
            query,
            locals: HashMap::new(),
            chain: Arc::from(Vec::new()),
            cursor: 0,
            response: ResponseWriter::new(),
            renderer: None,
        }
    }

    // =========================================================================
    // Request
    // =========================================================================

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A request header as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Address of the connected peer, when the host transport provides one.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn queries(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// Deserialize the request body as JSON.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` with a client-safe message when the body
    /// is not valid JSON for `T`.
    pub fn bind_json<T: DeserializeOwned>(&self) -> AppResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| AppError::Validation(sanitize_serde_error(&e)))
    }

    /// Pattern of the matched route, once the dispatcher has found one.
    pub fn route_pattern(&self) -> Option<&str> {
        self.route_pattern.as_deref()
    }

    pub(crate) fn set_route(&mut self, pattern: &str, params: HashMap<String, String>) {
        self.route_pattern = Some(pattern.to_string());
        self.params = params;
    }

    pub(crate) fn set_renderer(&mut self, renderer: Option<Arc<dyn TemplateRenderer>>) {
        self.renderer = renderer;
    }

    // =========================================================================
    // Locals
    // =========================================================================

    /// Store a value for later links in this request.
    pub fn set_local<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.locals.insert(key.into(), Box::new(value));
    }

    /// Fetch a value stored by an earlier link.
    ///
    /// Returns `None` when the key is missing or holds a different type.
    pub fn get_local<T: Any>(&self, key: &str) -> Option<&T> {
        self.locals.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn remove_local(&mut self, key: &str) -> bool {
        self.locals.remove(key).is_some()
    }

    // =========================================================================
    // Chain
    // =========================================================================

    /// Run the next link in the chain.
    ///
    /// Advances the cursor and invokes the link at the new position. Past the
    /// end of the chain this is a no-op that returns `Ok(())`.
    pub fn next(&mut self) -> AppResult<()> {
        self.cursor += 1;
        match self.chain.get(self.cursor).cloned() {
            Some(link) => link(self),
            None => Ok(()),
        }
    }

    /// Position of the link currently running.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Install `chain` and run its first link.
    pub(crate) fn start_chain(&mut self, chain: Arc<[Middleware]>) -> AppResult<()> {
        self.chain = chain;
        self.cursor = 0;
        match self.chain.first().cloned() {
            Some(link) => link(self),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Response
    // =========================================================================

    pub fn response(&self) -> &ResponseWriter {
        &self.response
    }

    pub(crate) fn response_mut(&mut self) -> &mut ResponseWriter {
        &mut self.response
    }

    pub(crate) fn into_response_writer(self) -> ResponseWriter {
        self.response
    }

    /// Write `data` as JSON.
    pub fn json<T: Serialize + ?Sized>(&mut self, status: StatusCode, data: &T) -> AppResult<()> {
        let bytes = serde_json::to_vec(data)?;
        self.response.write_with_type(status, CONTENT_TYPE_JSON, &bytes);
        Ok(())
    }

    /// Write a plain-text body.
    pub fn text(&mut self, status: StatusCode, text: impl AsRef<str>) -> AppResult<()> {
        self.response
            .write_with_type(status, CONTENT_TYPE_TEXT, text.as_ref().as_bytes());
        Ok(())
    }

    /// Write a markup body.
    pub fn html(&mut self, status: StatusCode, markup: impl AsRef<str>) -> AppResult<()> {
        self.response
            .write_with_type(status, CONTENT_TYPE_HTML, markup.as_ref().as_bytes());
        Ok(())
    }

    /// Write raw bytes with an explicit content type.
    pub fn blob(&mut self, status: StatusCode, content_type: &str, bytes: &[u8]) -> AppResult<()> {
        self.set_header("content-type", content_type);
        self.response.write_status(status);
        self.response.write(bytes);
        Ok(())
    }

    /// Commit a status with no body.
    pub fn status(&mut self, status: StatusCode) -> AppResult<()> {
        self.response.write_status(status);
        Ok(())
    }

    /// Render a template through the configured renderer and write it as HTML.
    ///
    /// # Errors
    ///
    /// `AppError::Template` when no renderer is configured or the template is
    /// unknown.
    pub fn render<T: Serialize + ?Sized>(
        &mut self,
        status: StatusCode,
        template: &str,
        data: &T,
    ) -> AppResult<()> {
        let renderer = self
            .renderer
            .clone()
            .ok_or_else(|| AppError::Template("no template renderer configured".to_string()))?;
        let value = serde_json::to_value(data)?;
        let markup = renderer.render(template, &value)?;
        self.html(status, markup)
    }

    /// Set a response header. Invalid names or values are logged and dropped.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let Some((name, value)) = header_pair(name, value) {
            self.response.set_header(name, value);
        }
    }

    /// Add a `Set-Cookie` header with `Path=/`.
    ///
    /// `max_age` of 0 omits the attribute; a negative value expires the cookie.
    pub fn set_cookie(&mut self, name: &str, value: &str, max_age: i64) {
        let mut cookie = format!("{name}={value}; Path=/");
        if max_age > 0 {
            cookie.push_str(&format!("; Max-Age={max_age}"));
        } else if max_age < 0 {
            cookie.push_str("; Max-Age=0");
        }

        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                self.response.append_header(SET_COOKIE, value);
            }
            Err(e) => warn!(cookie = name, error = %e, "Dropping invalid cookie"),
        }
    }
}

fn header_pair(name: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
    let parsed_name = HeaderName::from_bytes(name.as_bytes());
    let parsed_value = HeaderValue::from_str(value);
    match (parsed_name, parsed_value) {
        (Ok(n), Ok(v)) => Some((n, v)),
        _ => {
            warn!(header = name, "Dropping invalid response header");
            None
        }
    }
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if let Some(query) = query {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            out.entry(key.into_owned()).or_insert_with(|| value.into_owned());
        }
    }
    out
}
