//! Graceful shutdown handling for pulsed.
//!
//! Translates SIGINT, SIGTERM, and SIGQUIT into a broadcast signal the
//! long-running workers select against.

use tokio::sync::broadcast;
use tracing::info;

/// Create a shutdown signal receiver.
///
/// Returns a broadcast receiver that will receive a signal when SIGINT,
/// SIGTERM, or SIGQUIT is received.
pub fn shutdown_signal() -> broadcast::Receiver<()> {
    let (tx, rx) = broadcast::channel(1);

    tokio::spawn(async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(unix)]
        let quit = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::quit())
                .expect("Failed to install SIGQUIT handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        #[cfg(not(unix))]
        let quit = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C)");
            }
            _ = terminate => {
                info!("Received SIGTERM");
            }
            _ = quit => {
                info!("Received SIGQUIT");
            }
        }

        let _ = tx.send(());
    });

    rx
}
