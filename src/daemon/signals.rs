// Unix signal handling for daemon shutdown

use crate::error::{KnowError, Result};
use std::fmt;
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Signals the daemon reacts to; all of them stop it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonSignal {
    Terminate,
    Interrupt,
    Hangup,
}

impl fmt::Display for DaemonSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DaemonSignal::Terminate => "SIGTERM",
            DaemonSignal::Interrupt => "SIGINT",
            DaemonSignal::Hangup => "SIGHUP",
        };
        f.write_str(name)
    }
}

pub struct SignalHandler {
    sigterm: Signal,
    sigint: Signal,
    sighup: Signal,
}

fn install(kind: SignalKind, name: &str) -> Result<Signal> {
    signal(kind).map_err(|e| KnowError::Io {
        source: e,
        context: format!("Failed to setup {} handler", name),
    })
}

impl SignalHandler {
    /// Install handlers for SIGTERM, SIGINT and SIGHUP
    pub fn new() -> Result<Self> {
        Ok(Self {
            sigterm: install(SignalKind::terminate(), "SIGTERM")?,
            sigint: install(SignalKind::interrupt(), "SIGINT")?,
            sighup: install(SignalKind::hangup(), "SIGHUP")?,
        })
    }

    /// Wait for the next signal
    pub async fn wait(&mut self) -> DaemonSignal {
        let received = tokio::select! {
            _ = self.sigterm.recv() => DaemonSignal::Terminate,
            _ = self.sigint.recv() => DaemonSignal::Interrupt,
            _ = self.sighup.recv() => DaemonSignal::Hangup,
        };
        tracing::info!("Received {}", received);
        received
    }
}
