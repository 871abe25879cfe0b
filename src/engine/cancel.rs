// src/engine/cancel.rs

//! Run-wide cooperative cancellation.
//!
//! A single [`CancelHandle`] is held by whoever may abort the run (Ctrl-C
//! handler, tests). Every pipeline receives a cloned [`CancelSignal`]: the
//! scheduler stops dispatching, fetch retries stop, and runners shorten
//! their deadlines.

use tokio::sync::watch;

#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; pends forever if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let sender_gone = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if sender_gone {
            std::future::pending::<()>().await;
        }
    }
}
