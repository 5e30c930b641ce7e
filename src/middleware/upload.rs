//! Multipart upload middleware.
//!
//! Hands the buffered body of a `multipart/form-data` request to an
//! [`UploadProcessor`] and stores the [`UploadOutcome`] under the local key
//! `upload_result`. Other requests pass through untouched. Rejected files do
//! not fail the request; inspect [`UploadOutcome::errors`] in the handler.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::chain::{Middleware, middleware_fn};
use crate::collaborators::{UploadOutcome, UploadPolicy, UploadProcessor};
use crate::context::Context;

/// Local key holding the [`UploadOutcome`].
pub const UPLOAD_RESULT_LOCAL: &str = "upload_result";

pub fn upload(processor: Arc<dyn UploadProcessor>, policy: UploadPolicy) -> Middleware {
    let policy = Arc::new(policy);
    middleware_fn(move |ctx| {
        let content_type = match ctx.header("content-type") {
            Some(ct) if is_multipart(ct) => ct.to_string(),
            _ => return ctx.next(),
        };

        let outcome = processor.process(&content_type, ctx.body(), &policy);
        if outcome.is_success() {
            debug!(files = outcome.files.len(), "Upload processed");
        } else {
            warn!(
                files = outcome.files.len(),
                errors = ?outcome.errors,
                "Upload processed with rejected files"
            );
        }

        ctx.set_local(UPLOAD_RESULT_LOCAL, outcome);
        ctx.next()
    })
}

/// Outcome stored by [`upload`], if it ran on a multipart request.
pub fn upload_result(ctx: &Context) -> Option<&UploadOutcome> {
    ctx.get_local::<UploadOutcome>(UPLOAD_RESULT_LOCAL)
}

fn is_multipart(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("multipart/form-data"))
}
