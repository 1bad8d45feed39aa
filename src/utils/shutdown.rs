// Process signals that trigger a graceful shutdown
use log::{error, info};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cancel `shutdown` on Ctrl+C or SIGTERM.
///
/// The SIGTERM handler is installed before this returns, so a signal sent
/// right after the call is not lost. The listener exits quietly when
/// `shutdown` is cancelled by someone else.
pub fn spawn_listener(shutdown: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    #[cfg(unix)]
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        let interrupted = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminated = async {
            sigterm.recv().await;
        };

        #[cfg(not(unix))]
        let terminated = std::future::pending::<()>();

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interrupted => info!("Received Ctrl+C, shutting down..."),
            _ = terminated => info!("Received SIGTERM, shutting down..."),
        }
        shutdown.cancel();
    }))
}
