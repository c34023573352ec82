//! Graceful shutdown wiring.

use tokio_util::sync::CancellationToken;

/// Cancellation signal fired on SIGTERM or SIGINT.
///
/// The server awaits [`Shutdown::cancelled`] to drain in-flight requests
/// before exiting.
#[derive(Clone)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Registers the signal handlers and returns the shared token.
    ///
    /// Returns an error if signal registration fails.
    pub fn listen() -> Result<Self, std::io::Error> {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
            }
            trigger.cancel();
        });
        Ok(Self { token })
    }

    /// Resolves once a shutdown signal has been received.
    pub async fn cancelled(self) {
        self.token.cancelled().await;
    }
}
