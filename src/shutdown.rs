use tokio_util::sync::CancellationToken;

/// Why we are shutting down (useful for logs + tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    CtrlC,
    Sigterm,
}

/// Owner of the root cancellation token. Every worker gets a clone.
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for SIGINT or SIGTERM, cancels the root token and reports which one.
pub async fn wait_for_signal(shutdown: &Shutdown) -> ShutdownReason {
    let reason = tokio::select! {
        _ = ctrl_c() => ShutdownReason::CtrlC,
        _ = sigterm() => ShutdownReason::Sigterm,
    };
    shutdown.cancel();
    reason
}

async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        // If we can't register, just never fire.
        std::future::pending::<()>().await;
    }
}

/// SIGTERM on Unix (Linux/macOS). On non-Unix, this future never completes.
#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
        }
        Err(_) => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}
