//! Process lifetime: one transport raced against a signal watcher.
//!
//! ```text
//! Idle --run--> Running --first outcome--> Terminated
//! ```
//!
//! The transport task and the signal task both report into one channel of
//! capacity 2. The first message wins; the other task is aborted and
//! in-flight requests are not drained.

use std::fmt;
use std::future::Future;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;

use super::{gateway, TransportError};
use crate::config::ListenAddr;

/// Which transport to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Long-running HTTP listener.
    Http(ListenAddr),
    /// Handle one gateway event from stdin, answer on stdout.
    Gateway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LauncherState {
    Idle,
    Running,
    Terminated,
}

/// Why the launcher stopped.
#[derive(Debug)]
pub enum Termination {
    /// An interrupt signal arrived.
    Signal(&'static str),
    /// The transport finished on its own (gateway invocation handled).
    Completed,
    /// The transport failed.
    Failed(TransportError),
}

impl Termination {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(name) => write!(f, "{}", name),
            Self::Completed => f.write_str("completed"),
            Self::Failed(e) => write!(f, "{}", e),
        }
    }
}

/// Runs exactly one transport until it ends or a signal arrives.
#[derive(Debug)]
pub struct TransportLauncher {
    router: Router,
    mode: Mode,
    state: LauncherState,
}

impl TransportLauncher {
    pub fn new(router: Router, mode: Mode) -> Self {
        Self {
            router,
            mode,
            state: LauncherState::Idle,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> LauncherState {
        self.state
    }

    /// Run until the transport ends or SIGINT/SIGTERM arrives.
    pub async fn run(&mut self) -> Termination {
        self.run_until(wait_for_signal()).await
    }

    /// Run until the transport ends or `signal` resolves.
    pub async fn run_until<F>(&mut self, signal: F) -> Termination
    where
        F: Future<Output = &'static str> + Send + 'static,
    {
        self.state = LauncherState::Running;
        tracing::debug!(mode = ?self.mode, state = ?self.state, "Launching transport");

        let router = self.router.clone();
        let termination = match self.mode.clone() {
            Mode::Http(addr) => race(serve_http(router, addr), signal).await,
            Mode::Gateway => race(serve_gateway(router), signal).await,
        };

        tracing::info!(terminated = %termination, "terminated");
        self.state = LauncherState::Terminated;
        termination
    }
}

/// Race a transport future against a signal future.
///
/// Both run as tasks reporting into a capacity-2 channel; the first report
/// wins and both tasks are aborted afterwards.
pub async fn race<T, S>(transport: T, signal: S) -> Termination
where
    T: Future<Output = Result<(), TransportError>> + Send + 'static,
    S: Future<Output = &'static str> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Termination>(2);

    let transport_tx = tx.clone();
    let transport_task = tokio::spawn(async move {
        let outcome = match transport.await {
            Ok(()) => Termination::Completed,
            Err(e) => Termination::Failed(e),
        };
        let _ = transport_tx.send(outcome).await;
    });

    let signal_task = tokio::spawn(async move {
        let name = signal.await;
        let _ = tx.send(Termination::Signal(name)).await;
    });

    // Both senders only drop after sending, unless their task panicked
    let termination = rx.recv().await.unwrap_or(Termination::Completed);

    transport_task.abort();
    signal_task.abort();
    termination
}

async fn serve_http(router: Router, addr: ListenAddr) -> Result<(), TransportError> {
    let target = addr.bind_target();
    let listener = TcpListener::bind(&target)
        .await
        .map_err(|source| TransportError::Bind {
            addr: target.clone(),
            source,
        })?;
    tracing::info!(transport = "http", address = %addr, "listening");
    axum::serve(listener, router)
        .await
        .map_err(TransportError::Serve)
}

async fn serve_gateway(router: Router) -> Result<(), TransportError> {
    tracing::info!(transport = "http", context = "gateway", "listening");
    gateway::run_once(router, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Wait for SIGINT, or SIGTERM on unix. Returns the signal name.
pub async fn wait_for_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), shutting down");
            "interrupt"
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
            "terminate"
        }
    }
}
