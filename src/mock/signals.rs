//! OS signal routing.

use tokio::sync::mpsc;

/// A request to shut the supervisor down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT / Ctrl-C.
    Interrupt,
    /// SIGTERM.
    Terminate,
}

/// Route interrupt and terminate signals into a channel.
///
/// The listener keeps forwarding until the receiver is dropped.
pub fn listen_for_shutdown() -> std::io::Result<mpsc::Receiver<ShutdownSignal>> {
    let (tx, rx) = mpsc::channel(4);

    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::spawn(async move {
        loop {
            #[cfg(unix)]
            let signal = tokio::select! {
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => ShutdownSignal::Interrupt,
                    Err(e) => {
                        tracing::error!("Failed to listen for Ctrl-C: {}", e);
                        return;
                    }
                },
                _ = terminate.recv() => ShutdownSignal::Terminate,
            };

            #[cfg(not(unix))]
            let signal = match tokio::signal::ctrl_c().await {
                Ok(()) => ShutdownSignal::Interrupt,
                Err(e) => {
                    tracing::error!("Failed to listen for Ctrl-C: {}", e);
                    return;
                }
            };

            tracing::debug!(?signal, "Received shutdown signal");
            if tx.send(signal).await.is_err() {
                return;
            }
        }
    });

    Ok(rx)
}
