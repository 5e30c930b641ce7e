//! Interfaces for the libraries that plug into the dispatch core.
//!
//! Template rendering and multipart upload storage live outside this crate.
//! The core only needs the narrow surfaces below: a renderer used by
//! [`Context::render`](crate::Context::render) and an upload processor used by
//! the [`upload`](crate::middleware::upload) middleware. Authentication has its
//! own trait, [`TokenVerifier`](crate::middleware::auth::TokenVerifier).

use serde::Serialize;
use serde_json::Value;

use crate::error::AppResult;

/// Renders a named template with a data value.
pub trait TemplateRenderer: Send + Sync {
    /// # Errors
    ///
    /// `AppError::Template` when `name` is unknown or rendering fails.
    fn render(&self, name: &str, data: &Value) -> AppResult<String>;
}

/// Limits applied to uploaded files.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// Largest accepted file, in bytes.
    pub max_file_size: u64,
    /// Accepted MIME types. Entries ending in `/*` match a whole family.
    /// Empty accepts everything.
    pub allowed_types: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            allowed_types: Vec::new(),
        }
    }
}

impl UploadPolicy {
    /// Common web image formats.
    pub fn images(max_file_size: u64) -> Self {
        Self {
            max_file_size,
            allowed_types: ["image/jpeg", "image/png", "image/gif", "image/webp"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }

    /// PDF, Word and plain text documents.
    pub fn documents(max_file_size: u64) -> Self {
        Self {
            max_file_size,
            allowed_types: [
                "application/pdf",
                "application/msword",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                "text/plain",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }

    /// Whether `content_type` is accepted.
    pub fn is_allowed_type(&self, content_type: &str) -> bool {
        if self.allowed_types.is_empty() {
            return true;
        }
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        self.allowed_types.iter().any(|allowed| {
            let allowed = allowed.to_ascii_lowercase();
            match allowed.strip_suffix("/*") {
                Some(family) => essence
                    .split_once('/')
                    .is_some_and(|(kind, _)| kind == family),
                None => essence == allowed,
            }
        })
    }

    /// Whether a file of `size` bytes is accepted.
    pub fn is_allowed_size(&self, size: u64) -> bool {
        size <= self.max_file_size
    }
}

/// A file the upload processor accepted and stored.
#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    pub field_name: String,
    pub original_name: String,
    pub stored_name: String,
    pub size: u64,
    pub content_type: String,
}

/// Aggregate result of processing a multipart body.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadOutcome {
    pub files: Vec<StoredFile>,
    pub errors: Vec<String>,
}

impl UploadOutcome {
    /// `true` when no file was rejected.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Parses a multipart body and stores the files that pass `policy`.
pub trait UploadProcessor: Send + Sync {
    /// `content_type` is the request's full `Content-Type`, boundary included.
    fn process(&self, content_type: &str, body: &[u8], policy: &UploadPolicy) -> UploadOutcome;
}
