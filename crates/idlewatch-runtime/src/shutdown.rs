use std::time::Duration;

use tokio::sync::watch;

#[derive(Debug, Clone)]
/// Cooperative cancellation observed by the maintenance loop and by dispatch.
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    /// A signal that is never raised.
    pub fn never() -> Self {
        let (_tx, signal) = Self::channel();
        signal
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the sender
    /// was dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleeps for `duration` unless cancelled first. Returns `false` on cancellation.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::ShutdownSignal;

    #[tokio::test]
    async fn unit_sleep_completes_when_not_cancelled() {
        let (_tx, signal) = ShutdownSignal::channel();
        assert!(signal.sleep(Duration::from_millis(5)).await);
        assert!(!signal.is_cancelled());
    }

    #[tokio::test]
    async fn functional_cancel_interrupts_long_sleep() {
        let (tx, signal) = ShutdownSignal::channel();
        let sleeper = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.sleep(Duration::from_secs(3_600)).await })
        };
        tx.send(true).expect("send cancel");
        let completed = tokio::time::timeout(Duration::from_secs(5), sleeper)
            .await
            .expect("sleep must observe cancellation")
            .expect("join");
        assert!(!completed);
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn regression_never_signal_does_not_resolve() {
        let signal = ShutdownSignal::never();
        let outcome = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(outcome.is_err());
    }
}
