//! Graceful shutdown coordination: a broadcast "draining" flag that every
//! session checks at its next command boundary, plus a deadline after which
//! any session still active is force-closed.

use std::time::Duration;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
}

/// Owned by the listener; sessions hold only a [`watch::Receiver`] obtained
/// through [`ShutdownCoordinator::subscribe`].
#[derive(Debug)]
pub struct ShutdownCoordinator {
    tx: watch::Sender<ShutdownState>,
    deadline: Duration,
}

impl ShutdownCoordinator {
    pub fn new(deadline: Duration) -> Self {
        let (tx, _rx) = watch::channel(ShutdownState::Running);
        ShutdownCoordinator { tx, deadline }
    }

    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.tx.subscribe()
    }

    /// Broadcast the draining signal. Idempotent: calling it twice is fine.
    pub fn begin_draining(&self) {
        let _ = self.tx.send(ShutdownState::Draining);
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn is_draining(&self) -> bool {
        *self.tx.borrow() == ShutdownState::Draining
    }
}

/// Run `fut` to completion, but if the draining deadline elapses first,
/// drop it instead (which, for a session task, closes its socket).
pub async fn run_until_deadline<F>(deadline: Duration, fut: F) -> Option<F::Output>
where
    F: std::future::Future,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(output) => Some(output),
        Err(_) => None,
    }
}
