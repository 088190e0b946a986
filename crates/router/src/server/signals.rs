//! SIGINT and SIGTERM trigger a graceful stop.

use super::shutdown::Shutdown;
use std::io;
use tracing::{info, warn};

/// Spawns a task waiting for a termination signal, it ends with the server either way.
pub(crate) fn spawn(shutdown: Shutdown) {
    let mut stop = shutdown.subscribe();
    tokio::spawn(async move {
        tokio::select! {
            received = wait_for_signal() => match received {
                Ok(signal) => {
                    info!(signal, "received signal, stopping server");
                    shutdown.trigger();
                }
                Err(e) => warn!(cause = %e, "failed to install signal handlers"),
            },
            _ = stop.recv() => {}
        }
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
