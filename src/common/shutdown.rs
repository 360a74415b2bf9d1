use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// One-shot shutdown signal shared by background loops.
#[derive(Default)]
pub struct Shutdown {
    triggered: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger the signal and wake every waiter.
    pub fn shutdown(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Resolve once [`Shutdown::shutdown`] has been called.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_shutdown() {
                return;
            }
            notified.await;
        }
    }
}
