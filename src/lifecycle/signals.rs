//! OS signal handling.
//!
//! # Responsibilities
//! - Register SIGTERM and SIGINT handlers
//! - First signal triggers graceful shutdown
//! - Second signal exits immediately with status 1
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Handlers are registered before the manager starts, so a signal during
//!   startup is never lost

use tokio::task::JoinHandle;

use crate::lifecycle::Shutdown;

/// Install the handlers and return the task watching for signals.
pub fn install(shutdown: Shutdown) -> std::io::Result<JoinHandle<()>> {
    let mut signals = Signals::new()?;
    Ok(tokio::spawn(async move {
        let first = signals.recv().await;
        tracing::info!(signal = first, "Shutdown signal received; stopping gracefully");
        shutdown.trigger();

        let second = signals.recv().await;
        tracing::warn!(signal = second, "Second shutdown signal received; exiting immediately");
        std::process::exit(1);
    }))
}

#[cfg(unix)]
struct Signals {
    terminate: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.interrupt.recv() => "SIGINT",
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn new() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> &'static str {
        let _ = tokio::signal::ctrl_c().await;
        "ctrl-c"
    }
}
