//! Buffered response writer owned by a request [`Context`](crate::Context).
//!
//! # Write rules
//!
//! - The first status or body write commits the response.
//! - Once committed, the status is fixed. Further body writes append.
//! - Header changes after the commit are ignored.
//! - A response that is never written is sent as `200` with an empty body.

use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use axum::http::{HeaderMap, Response, StatusCode};
use tracing::{debug, warn};

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";
pub const CONTENT_TYPE_HTML: &str = "text/html; charset=utf-8";

#[derive(Debug)]
pub struct ResponseWriter {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    committed: bool,
}

impl Default for ResponseWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Vec::new(),
            committed: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Whether a status has been written.
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Replace a header. Returns `false` when the response is already committed.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> bool {
        if self.committed {
            debug!(header = %name, "Ignoring header set after response was written");
            return false;
        }
        self.headers.insert(name, value);
        true
    }

    /// Add a header value without replacing existing ones.
    pub fn append_header(&mut self, name: HeaderName, value: HeaderValue) -> bool {
        if self.committed {
            debug!(header = %name, "Ignoring header append after response was written");
            return false;
        }
        self.headers.append(name, value);
        true
    }

    /// Commit the status. Later calls are ignored.
    pub fn write_status(&mut self, status: StatusCode) {
        if self.committed {
            warn!(
                current = self.status.as_u16(),
                ignored = status.as_u16(),
                "Superfluous status write"
            );
            return;
        }
        self.status = status;
        self.committed = true;
    }

    /// Append bytes to the body, committing `200` first if needed.
    pub fn write(&mut self, bytes: &[u8]) {
        if !self.committed {
            self.write_status(StatusCode::OK);
        }
        self.body.extend_from_slice(bytes);
    }

    /// Set the content type, commit the status and write the body.
    pub(crate) fn write_with_type(
        &mut self,
        status: StatusCode,
        content_type: &'static str,
        bytes: &[u8],
    ) {
        self.set_header(CONTENT_TYPE, HeaderValue::from_static(content_type));
        self.write_status(status);
        self.write(bytes);
    }

    /// Drop everything written so far. Used when a panic is recovered.
    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn into_response(self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unwritten_response_is_empty_ok() {
        let writer = ResponseWriter::new();
        assert!(!writer.is_committed());
        let response = writer.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_first_status_wins() {
        let mut writer = ResponseWriter::new();
        writer.write_with_type(StatusCode::CREATED, CONTENT_TYPE_TEXT, b"a");
        writer.write_with_type(StatusCode::BAD_REQUEST, CONTENT_TYPE_TEXT, b"b");
        assert_eq!(writer.status(), StatusCode::CREATED);
        assert_eq!(writer.body(), b"ab");
    }

    #[test]
    fn test_headers_ignored_after_commit() {
        let mut writer = ResponseWriter::new();
        assert!(writer.set_header(
            HeaderName::from_static("x-before"),
            HeaderValue::from_static("1")
        ));
        writer.write(b"body");
        assert!(!writer.set_header(
            HeaderName::from_static("x-after"),
            HeaderValue::from_static("1")
        ));
        assert!(writer.headers().contains_key("x-before"));
        assert!(!writer.headers().contains_key("x-after"));
    }

    #[test]
    fn test_reset_clears_state() {
        let mut writer = ResponseWriter::new();
        writer.write_with_type(StatusCode::ACCEPTED, CONTENT_TYPE_JSON, b"{}");
        writer.reset();
        assert!(!writer.is_committed());
        assert!(writer.body().is_empty());
        assert!(writer.headers().is_empty());
    }
}
