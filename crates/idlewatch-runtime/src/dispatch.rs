//! Outbound digest delivery with bounded retry.

use std::time::Duration;

use async_trait::async_trait;
use idlewatch_policy::DigestSettings;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::shutdown::ShutdownSignal;

#[derive(Debug, Error)]
/// Enumerates failures reported by a digest transport.
pub enum DispatchError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
    #[error("message rejected: {0}")]
    Rejected(String),
}

#[async_trait]
/// Trait contract for the outbound message surface.
pub trait DigestSender: Send + Sync {
    async fn send_message(&self, group_id: &str, text: &str) -> Result<(), DispatchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff: Duration,
    pub send_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &DigestSettings) -> Self {
        Self {
            max_attempts: settings.max_retries.max(1),
            backoff: settings.retry_backoff,
            send_timeout: settings.send_timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Per-group delivery result recorded in the inspection report.
pub enum DeliveryOutcome {
    Delivered { attempts: usize },
    Failed { attempts: usize, error: String },
    /// Inactive members found, but the run was silent.
    Suppressed,
    NothingToSend,
    Cancelled,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered { .. } => "delivered",
            Self::Failed { .. } => "failed",
            Self::Suppressed => "suppressed",
            Self::NothingToSend => "nothing_to_send",
            Self::Cancelled => "cancelled",
        }
    }
}

async fn attempt_send(
    sender: &dyn DigestSender,
    group_id: &str,
    text: &str,
    send_timeout: Duration,
) -> Result<(), DispatchError> {
    match tokio::time::timeout(send_timeout, sender.send_message(group_id, text)).await {
        Ok(result) => result,
        Err(_) => Err(DispatchError::Timeout(send_timeout)),
    }
}

/// Sends `text` to `group_id`, retrying up to `policy.max_attempts` times.
///
/// Each attempt is bounded by the send timeout and the backoff sleep observes
/// `shutdown`, so a cancelled run returns promptly.
pub async fn send_with_retry(
    sender: &dyn DigestSender,
    group_id: &str,
    text: &str,
    policy: RetryPolicy,
    shutdown: &ShutdownSignal,
) -> DeliveryOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0usize;
    loop {
        if shutdown.is_cancelled() {
            return DeliveryOutcome::Cancelled;
        }
        attempt = attempt.saturating_add(1);
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return DeliveryOutcome::Cancelled,
            result = attempt_send(sender, group_id, text, policy.send_timeout) => result,
        };
        match result {
            Ok(()) => {
                info!(group_id, attempt, "digest delivered");
                return DeliveryOutcome::Delivered { attempts: attempt };
            }
            Err(dispatch_error) if attempt >= max_attempts => {
                error!(
                    group_id,
                    attempt,
                    error = %dispatch_error,
                    "digest delivery failed; giving up on group"
                );
                return DeliveryOutcome::Failed {
                    attempts: attempt,
                    error: dispatch_error.to_string(),
                };
            }
            Err(dispatch_error) => {
                warn!(
                    group_id,
                    attempt,
                    max_attempts,
                    error = %dispatch_error,
                    "digest delivery attempt failed; retrying"
                );
                if !shutdown.sleep(policy.backoff).await {
                    return DeliveryOutcome::Cancelled;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{send_with_retry, DeliveryOutcome, DigestSender, DispatchError, RetryPolicy};
    use crate::shutdown::ShutdownSignal;

    struct FlakySender {
        failures_before_success: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DigestSender for FlakySender {
        async fn send_message(&self, _group_id: &str, _text: &str) -> Result<(), DispatchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures_before_success {
                return Err(DispatchError::Transport(format!("boom {call}")));
            }
            Ok(())
        }
    }

    struct StuckSender;

    #[async_trait]
    impl DigestSender for StuckSender {
        async fn send_message(&self, _group_id: &str, _text: &str) -> Result<(), DispatchError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::ZERO,
            send_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn functional_fail_twice_then_succeed_is_delivered_on_third_attempt() {
        let sender = FlakySender {
            failures_before_success: 2,
            calls: AtomicUsize::new(0),
        };
        let outcome =
            send_with_retry(&sender, "g", "hi", fast_policy(3), &ShutdownSignal::never()).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 3 });
        assert_eq!(sender.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn functional_always_failing_sender_stops_after_max_attempts() {
        let sender = FlakySender {
            failures_before_success: usize::MAX,
            calls: AtomicUsize::new(0),
        };
        let outcome =
            send_with_retry(&sender, "g", "hi", fast_policy(3), &ShutdownSignal::never()).await;
        assert!(matches!(
            outcome,
            DeliveryOutcome::Failed { attempts: 3, ref error } if error.contains("boom 3")
        ));
        assert_eq!(sender.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn regression_hung_send_times_out_instead_of_blocking() {
        let policy = RetryPolicy {
            max_attempts: 1,
            backoff: Duration::ZERO,
            send_timeout: Duration::from_millis(20),
        };
        let outcome =
            send_with_retry(&StuckSender, "g", "hi", policy, &ShutdownSignal::never()).await;
        assert!(matches!(outcome, DeliveryOutcome::Failed { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn regression_cancellation_interrupts_backoff() {
        let sender = FlakySender {
            failures_before_success: usize::MAX,
            calls: AtomicUsize::new(0),
        };
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff: Duration::from_secs(3_600),
            send_timeout: Duration::from_secs(5),
        };
        let (tx, shutdown) = ShutdownSignal::channel();
        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(true);
            tx
        });
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            send_with_retry(&sender, "g", "hi", policy, &shutdown),
        )
        .await
        .expect("cancellation must end the backoff");
        let _tx = cancel.await.expect("join");
        assert_eq!(outcome, DeliveryOutcome::Cancelled);
        assert_eq!(sender.calls.load(Ordering::SeqCst), 1);
    }
}
