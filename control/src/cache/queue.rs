//! Update signal between the change cache and the sync loop

use tokio::sync::Notify;

/// Level-triggered wake for a single-consumer work loop
///
/// Signals sent before the consumer gets to run collapse into one wake.
pub trait UpdateQueue: Send + Sync {
    fn notify(&self);
}

/// [`UpdateQueue`] backed by [`tokio::sync::Notify`]
#[derive(Debug, Default)]
pub struct SignalQueue {
    signal: Notify,
}

impl SignalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the next wake
    ///
    /// Returns immediately if a signal arrived since the previous wait.
    pub async fn wait(&self) {
        self.signal.notified().await;
    }
}

impl UpdateQueue for SignalQueue {
    fn notify(&self) {
        // notify_one stores at most one permit, so bursts collapse
        self.signal.notify_one();
    }
}
