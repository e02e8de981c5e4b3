//! Cooperative cancellation
//!
//! One [`CancellationToken`] is created per run. Interrupt signals flip it from
//! "running" to "cancelled"; it never flips back. Every component polls it
//! between discrete steps and the process runner kills its child when it fires.

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Returned by [`CancellationToken::check`] once cancellation was requested
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Operation cancelled")]
pub struct Cancelled;

/// Monotonic, write-once cancellation flag
#[derive(Debug, Default)]
pub struct CancellationToken {
    inner: tokio_util::sync::CancellationToken,
}

impl CancellationToken {
    /// Create a token in the "running" state
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn request(&self) {
        self.inner.cancel();
    }

    /// Whether cancellation has been requested
    pub fn is_requested(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves once cancellation has been requested
    pub async fn requested(&self) {
        self.inner.cancelled().await;
    }

    /// Fail fast if cancellation has been requested
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_requested() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Spawn a task that requests cancellation on SIGINT or SIGTERM.
///
/// A second interrupt exits the process immediately with status 1.
pub fn listen_for_signals(token: Arc<CancellationToken>) {
    tokio::spawn(async move {
        escalate_interrupts(&token, wait_for_interrupt).await;
        tracing::error!("Second interrupt received, exiting without cleanup");
        std::process::exit(1);
    });
}

/// Request cancellation on the first interrupt, return on the second
async fn escalate_interrupts<F, Fut>(token: &CancellationToken, mut next_interrupt: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    next_interrupt().await;
    tracing::warn!("Interrupt received, cancelling after the current step (again to force exit)...");
    token.request();
    next_interrupt().await;
}

#[cfg(unix)]
async fn wait_for_interrupt() {
    use tokio::signal::unix::{signal, SignalKind};

    let Ok(mut terminate) = signal(SignalKind::terminate()) else {
        let _ = tokio::signal::ctrl_c().await;
        return;
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_interrupt() {
    let _ = tokio::signal::ctrl_c().await;
}
