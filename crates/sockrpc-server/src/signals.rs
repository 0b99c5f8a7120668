//! Process shutdown on SIGINT and SIGTERM.

use std::io;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// A shared shutdown flag.
///
/// Clones observe the same flag. Once triggered it stays triggered.
#[derive(Debug, Clone)]
pub struct Shutdown {
    flag: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    /// Creates an untriggered flag.
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag: Arc::new(flag),
        }
    }

    /// Triggers shutdown. Idempotent.
    pub fn trigger(&self) {
        self.flag.send_replace(true);
    }

    /// Returns true once shutdown has been triggered.
    pub fn is_triggered(&self) -> bool {
        *self.flag.borrow()
    }

    /// Completes when shutdown is triggered, immediately if it already was.
    pub async fn triggered(&self) {
        let mut rx = self.flag.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }

    /// Spawns a task that triggers shutdown on the first SIGINT or SIGTERM.
    ///
    /// If the handlers cannot be installed the failure is logged and only
    /// [`Shutdown::trigger`] can stop the server.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let shutdown = self.clone();
        tokio::spawn(async move {
            match wait_for_signal().await {
                Ok(signal) => {
                    info!(signal, "Received signal, shutting down");
                    shutdown.trigger();
                }
                Err(e) => error!(error = %e, "Failed to install signal handlers"),
            }
        })
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = terminate.recv() => Ok("SIGTERM"),
        _ = interrupt.recv() => Ok("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}
