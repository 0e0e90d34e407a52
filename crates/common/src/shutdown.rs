use tokio::sync::watch;

/// Creates a linked shutdown signal/listener pair.
///
/// Every worker loop holds a [`Shutdown`] clone and selects on
/// [`Shutdown::cancelled`] next to its timer.
pub fn shutdown_pair() -> (ShutdownSignal, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSignal { tx }, Shutdown { rx })
}

/// The triggering side of a shutdown pair. Triggering is idempotent.
#[derive(Debug)]
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

impl ShutdownSignal {
    pub fn trigger(&self) {
        // Send failures only mean every listener is already gone.
        let _ = self.tx.send(true);
    }
}

/// The listening side of a shutdown pair.
///
/// A dropped [`ShutdownSignal`] counts as cancellation so orphaned workers
/// wind down instead of running forever.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once shutdown is triggered (or the signal is dropped).
    pub async fn cancelled(&mut self) {
        // wait_for errors when the sender is dropped, which we treat the
        // same as an explicit trigger.
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_releases_waiters() {
        let (signal, mut shutdown) = shutdown_pair();
        assert!(!shutdown.is_cancelled());

        signal.trigger();
        shutdown.cancelled().await;
        assert!(shutdown.is_cancelled());

        // idempotent
        signal.trigger();
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn dropped_signal_counts_as_cancelled() {
        let (signal, mut shutdown) = shutdown_pair();
        drop(signal);
        shutdown.cancelled().await;
        assert!(shutdown.is_cancelled());
    }
}
