//! Static file serving.
//!
//! [`App::serve_static`](crate::App::serve_static) registers
//! `GET {prefix}/*filepath` with the handler built here. The wildcard tail is
//! resolved against the root directory; anything that could escape it is
//! refused.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::http::StatusCode;
use tracing::{debug, warn};

use crate::chain::{Handler, middleware_fn};
use crate::error::AppError;

/// Name of the wildcard parameter holding the requested file.
pub const FILEPATH_PARAM: &str = "filepath";

/// Route pattern for files under `prefix`.
pub fn static_pattern(prefix: &str) -> String {
    format!("{}/*{FILEPATH_PARAM}", prefix.trim_end_matches('/'))
}

/// Handler serving files below `root`.
pub fn static_handler(root: impl Into<PathBuf>) -> Handler {
    let root: Arc<Path> = Arc::from(root.into());
    middleware_fn(move |ctx| {
        let requested = ctx.param(FILEPATH_PARAM).unwrap_or_default();
        let Some(relative) = sanitize(requested) else {
            warn!(path = %ctx.path(), "Rejected static file path");
            return Err(AppError::Validation("Invalid file path".to_string()));
        };
        if relative.as_os_str().is_empty() {
            return Err(AppError::NotFound("File not found".to_string()));
        }

        let full = root.join(&relative);
        let bytes = match std::fs::read(&full) {
            Ok(bytes) => bytes,
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::IsADirectory) => {
                debug!(file = %full.display(), "Static file not found");
                return Err(AppError::NotFound("File not found".to_string()));
            }
            // Reading a directory reports a generic error on some platforms.
            Err(_) if full.is_dir() => {
                return Err(AppError::NotFound("File not found".to_string()));
            }
            Err(e) => return Err(AppError::Io(e)),
        };

        let mime = mime_guess::from_path(&full).first_or_octet_stream();
        ctx.blob(StatusCode::OK, mime.as_ref(), &bytes)
    })
}

/// Turn the wildcard capture into a relative path.
///
/// Returns `None` when the path climbs out of the root or names an absolute
/// location.
fn sanitize(requested: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(requested.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_static_pattern() {
        assert_eq!(static_pattern("/static"), "/static/*filepath");
        assert_eq!(static_pattern("/static/"), "/static/*filepath");
        assert_eq!(static_pattern(""), "/*filepath");
    }

    #[test]
    fn test_sanitize_accepts_nested() {
        assert_eq!(
            sanitize("css/site.css").unwrap(),
            PathBuf::from("css").join("site.css")
        );
        assert_eq!(sanitize("./a.txt").unwrap(), PathBuf::from("a.txt"));
    }

    #[test]
    fn test_sanitize_rejects_traversal() {
        assert!(sanitize("../etc/passwd").is_none());
        assert!(sanitize("css/../../secret").is_none());
    }
}
