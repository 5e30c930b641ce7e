use axum::http::{Method, StatusCode};
use serde::Serialize;
use thiserror::Error;

/// Failure type shared by every link in a middleware chain.
///
/// A link returns one of these instead of panicking. The dispatcher turns an
/// error that reaches it into an HTTP response, but only when the chain has
/// not already written one.
///
/// # Status mapping
///
/// - `RouteNotFound`, `NotFound` - 404
/// - `Validation` - 400
/// - `Unauthorized` - 401
/// - `RateLimitExceeded` - 429
/// - everything else - 500
#[derive(Error, Debug)]
pub enum AppError {
    #[error("No route for {method} {path}")]
    RouteNotFound { method: Method, path: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("Panic recovered: {0}")]
    PanicRecovered(String),

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Error response body written by the dispatcher.
#[derive(Serialize)]
pub(crate) struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

impl AppError {
    /// Shorthand for a generic handler failure.
    pub fn handler(message: impl Into<String>) -> Self {
        AppError::Handler(message.into())
    }

    /// HTTP status the dispatcher uses for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::RouteNotFound { .. } | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::PanicRecovered(_)
            | AppError::Handler(_)
            | AppError::Template(_)
            | AppError::Serialization(_)
            | AppError::Io(_)
            | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error kind used in the response body.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::RouteNotFound { .. } => "route_not_found",
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation_failed",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            AppError::PanicRecovered(_) => "panic_recovered",
            AppError::Handler(_) => "handler_failure",
            AppError::Template(_) => "template_error",
            AppError::Serialization(_) => "serialization_error",
            AppError::Io(_) => "io_error",
            AppError::ConfigError(_) => "config_error",
        }
    }

    /// Build the body sent to the client.
    ///
    /// Client errors carry their own message; server errors are replaced by a
    /// generic one so internal details never leave the process.
    pub(crate) fn to_response_body(&self) -> ErrorResponse {
        let message = match self {
            AppError::RouteNotFound { .. } => "The requested resource was not found.".to_string(),
            AppError::NotFound(msg) | AppError::Validation(msg) | AppError::Unauthorized(msg) => {
                msg.clone()
            }
            AppError::RateLimitExceeded { .. } => {
                "Rate limit exceeded. Please retry later.".to_string()
            }
            _ => "Internal Server Error".to_string(),
        };

        ErrorResponse {
            error: self.kind(),
            message,
        }
    }
}

/// Sanitize serde error messages to avoid leaking internal type information.
///
/// Serde errors can contain internal struct/field names which shouldn't be
/// exposed to external clients. This function extracts the useful parts.
pub fn sanitize_serde_error(e: &serde_json::Error) -> String {
    let msg = e.to_string();

    if msg.contains("missing field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Missing required field: {field}");
    }

    if msg.contains("unknown field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Unknown field: {field}");
    }

    if msg.contains("invalid type") {
        return "Invalid data type in request body".to_string();
    }

    if msg.contains("EOF while parsing") || msg.contains("expected") {
        return "Malformed JSON in request body".to_string();
    }

    "Invalid request format".to_string()
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[derive(Debug, serde::Deserialize)]
    #[allow(dead_code)]
    struct Payload {
        name: String,
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::RouteNotFound {
                method: Method::GET,
                path: "/x".to_string()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Validation("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::RateLimitExceeded { retry_after_secs: 1 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::handler("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_server_errors_hide_details() {
        let body = AppError::handler("database password is hunter2").to_response_body();
        assert_eq!(body.error, "handler_failure");
        assert_eq!(body.message, "Internal Server Error");
    }

    #[test]
    fn test_client_errors_keep_message() {
        let body = AppError::Validation("id must be numeric".to_string()).to_response_body();
        assert_eq!(body.message, "id must be numeric");
    }

    #[test]
    fn test_sanitize_missing_field() {
        let err = serde_json::from_str::<Payload>("{}").unwrap_err();
        assert_eq!(sanitize_serde_error(&err), "Missing required field: name");
    }

    #[test]
    fn test_sanitize_malformed() {
        let err = serde_json::from_str::<Payload>("{\"name\":").unwrap_err();
        assert_eq!(sanitize_serde_error(&err), "Malformed JSON in request body");
    }
}
