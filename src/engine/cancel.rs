use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Sender half of a run's cancellation signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Cancellation signal plus optional deadline, threaded through every stage
/// of a run. Cloning is cheap and all clones observe the same signal.
#[derive(Debug, Clone)]
pub struct RunContext {
    cancel_rx: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

impl RunContext {
    pub fn new() -> (CancelHandle, RunContext) {
        let (tx, cancel_rx) = watch::channel(false);
        (
            CancelHandle { tx },
            RunContext {
                cancel_rx,
                deadline: None,
            },
        )
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check. Cancellation wins over an expired deadline.
    pub fn err(&self) -> Option<ContextError> {
        if *self.cancel_rx.borrow() {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is canceled or its deadline passes.
    /// Never resolves if the handle is dropped without canceling and there is
    /// no deadline.
    pub async fn done(&self) -> ContextError {
        let mut cancel_rx = self.cancel_rx.clone();
        let canceled = async move {
            let sender_dropped = cancel_rx.wait_for(|canceled| *canceled).await.is_err();
            if sender_dropped {
                std::future::pending::<()>().await;
            }
        };

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = canceled => ContextError::Canceled,
                    _ = tokio::time::sleep_until(deadline.into()) => ContextError::DeadlineExceeded,
                }
            }
            None => {
                canceled.await;
                ContextError::Canceled
            }
        }
    }
}
