use std::time::Instant;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
///
/// If a handler cannot be installed the error is logged and that signal is
/// never reported; the other one still works.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

/// Cancel `token` when a shutdown signal arrives.
pub fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });
}

/// Current instant on tokio's clock.
///
/// Same as `Instant::now()` in production; under a paused test runtime it
/// follows `tokio::time::advance`, which keeps window ages and ticker
/// periods on one clock.
pub(crate) fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}
