//! Turn SIGINT / SIGTERM into run cancellation.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Token cancelled on the first SIGINT or SIGTERM.
///
/// Cancelling stops the run's progress; containers already started keep
/// running.
pub fn cancel_on_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), cancelling run");
            }
            _ = terminate => {
                info!("Received SIGTERM, cancelling run");
            }
        }

        trigger.cancel();
    });

    token
}
