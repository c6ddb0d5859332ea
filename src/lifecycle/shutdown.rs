//! Graceful shutdown signalling.

use tokio::sync::watch;

/// Shutdown latch shared by the listener and long-running gateway tasks.
///
/// Backed by a watch channel holding a single flag: the first `trigger`
/// flips it and every [`ShutdownSignal`] resolves, including signals
/// subscribed after the trigger. Dropping the latch also releases waiters.
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// A signal that resolves once shutdown is triggered.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger shutdown. Idempotent; only the first call is logged.
    pub fn trigger(&self) {
        let already_triggered = self.tx.send_replace(true);
        if !already_triggered {
            tracing::info!("gateway shutdown triggered");
        }
    }

    /// Whether shutdown has been triggered.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's view of the shutdown latch.
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait until shutdown is triggered. A dropped [`Shutdown`] counts as
    /// triggered.
    pub async fn wait(mut self) {
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signal_resolves_after_trigger() {
        let shutdown = Shutdown::new();
        let signal = shutdown.subscribe();
        assert!(!shutdown.is_triggered());
        shutdown.trigger();
        assert!(shutdown.is_triggered());
        signal.wait().await;
    }

    #[tokio::test]
    async fn late_subscribers_observe_a_past_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        shutdown.trigger();
        shutdown.subscribe().wait().await;
    }

    #[tokio::test]
    async fn dropping_the_latch_releases_waiters() {
        let shutdown = Shutdown::new();
        let signal = shutdown.subscribe();
        drop(shutdown);
        signal.wait().await;
    }
}
