//! Ctrl+C / SIGTERM observation for long-running commands.

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownEvent {
    CtrlC,
    SigTerm,
    ListenerFailed,
}

/// Spawn a listener that flips the returned channel to `true` on the first
/// termination signal. A failed listener never requests shutdown.
pub fn spawn_shutdown_watch() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        let event = wait_for_shutdown().await;
        if event == ShutdownEvent::ListenerFailed {
            // Keep the sender alive so receivers never mistake a dead
            // listener for a request to stop.
            tx.closed().await;
            return;
        }
        tracing::warn!(event = "shutdown_requested", signal = ?event, "finishing current step");
        let _ = tx.send(true);
    });
    rx
}

pub async fn wait_for_shutdown() -> ShutdownEvent {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => ShutdownEvent::CtrlC,
            Err(error) => {
                tracing::warn!(%error, "failed to capture Ctrl+C signal");
                ShutdownEvent::ListenerFailed
            }
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => match term.recv().await {
                Some(_) => ShutdownEvent::SigTerm,
                None => ShutdownEvent::ListenerFailed,
            },
            Err(error) => {
                tracing::warn!(%error, "failed to capture SIGTERM");
                ShutdownEvent::ListenerFailed
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending();

    tokio::select! {
        event = ctrl_c => event,
        event = sigterm => event,
    }
}
