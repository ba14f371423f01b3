//! Shutdown requests from the operating system.

use anyhow::Context;
use tokio::signal;

/// Resolves with the name of the first termination signal received.
///
/// Ctrl+C is watched on every platform, SIGTERM only on Unix.
pub async fn shutdown_signal() -> anyhow::Result<&'static str> {
    let interrupt = async {
        signal::ctrl_c().await.context("listening for Ctrl+C")?;
        Ok::<_, anyhow::Error>("interrupt")
    };

    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate()).context("listening for SIGTERM")?;
        tokio::select! {
            name = interrupt => name,
            _ = terminate.recv() => Ok("terminate"),
        }
    }

    #[cfg(not(unix))]
    interrupt.await
}
