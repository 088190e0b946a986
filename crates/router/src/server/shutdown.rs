//! Stop coordination between the accept loop, the signal listener and server handles.

use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Broadcasts the stop request and publishes when the server has fully stopped.
#[derive(Debug, Clone)]
pub(crate) struct Shutdown {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    tx: broadcast::Sender<()>,
    stopped: watch::Sender<bool>,
}

impl Shutdown {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        let (stopped, _) = watch::channel(false);
        Self { inner: Arc::new(Inner { tx, stopped }) }
    }

    /// Receivers only observe stop requests sent after they subscribed.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<()> {
        self.inner.tx.subscribe()
    }

    pub(crate) fn trigger(&self) {
        // no receiver left means the accept loop is already gone
        let _ = self.inner.tx.send(());
    }

    pub(crate) fn mark_stopped(&self) {
        self.inner.stopped.send_replace(true);
    }

    pub(crate) fn is_stopped(&self) -> bool {
        *self.inner.stopped.borrow()
    }

    /// Resolves once [`Shutdown::mark_stopped`] has been called.
    pub(crate) async fn stopped(&self) {
        let mut rx = self.inner.stopped.subscribe();
        // the sender lives in `inner`, which `self` keeps alive
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}
