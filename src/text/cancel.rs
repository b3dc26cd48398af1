//! Turn cancellation.
//!
//! A [`CancelHandle`] is held by whoever may abort a turn (the REPL's Ctrl-C
//! handler, a newer request); the [`CancelToken`] is handed to the text stream
//! consumer, which treats cancellation exactly like the upstream stream
//! ending so the rest of the pipeline drains normally.

use tokio::sync::watch;

/// Owner side: flips the shared flag.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Request cancellation of every token derived from this handle.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Clear a previous cancellation so the handle can guard the next turn.
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side, cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested.  Never resolves if the
    /// handle is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_wakes_token() {
        let handle = CancelHandle::new();
        let mut token = handle.token();
        assert!(!token.is_cancelled());

        let waiter = tokio::spawn(async move {
            token.cancelled().await;
            token.is_cancelled()
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();

        let observed = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("token woke")
            .expect("task ok");
        assert!(observed);
    }

    #[tokio::test]
    async fn never_token_stays_pending() {
        let mut token = CancelToken::never();
        let res = tokio::time::timeout(Duration::from_millis(30), token.cancelled()).await;
        assert!(res.is_err());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn reset_clears_cancellation() {
        let handle = CancelHandle::new();
        handle.cancel();
        assert!(handle.token().is_cancelled());
        handle.reset();
        assert!(!handle.token().is_cancelled());
    }
}
