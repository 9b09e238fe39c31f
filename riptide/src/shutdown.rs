use tokio::sync::watch;

/// Scoped cancellation token passed down the call stack.
///
/// Cloned receivers observe cancellation independently; no task is ever
/// force-aborted by the signal itself, tasks notice it at their next
/// suspension point and flush in-flight work before exiting.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested (immediately if it already
    /// was). Also resolves if the controller is dropped.
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Owning side of the shutdown signal.
#[derive(Debug)]
pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_wakes_subscribers() {
        let controller = ShutdownController::new();
        let mut signal = controller.subscribe();
        assert!(!signal.is_cancelled());

        let waiter = tokio::spawn(async move {
            signal.cancelled().await;
            true
        });

        controller.cancel();
        assert!(waiter.await.unwrap());
        assert!(controller.is_cancelled());
    }

    #[tokio::test]
    async fn test_subscribe_after_cancel_resolves_immediately() {
        let controller = ShutdownController::new();
        controller.cancel();

        let mut signal = controller.subscribe();
        signal.cancelled().await;
        assert!(signal.is_cancelled());
    }
}
