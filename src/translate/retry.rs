//! Per-class retry schedule around a remote call.
//!
//! Network: fixed short delay. Rate limit: server hint or quota delay, capped.
//! Server (5xx): short delay. Everything else surfaces immediately.
//! Cancellation is checked at the top of every attempt and during every wait.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{FailureClass, TranslateError};
use crate::metrics::ProcessingMetrics;
use crate::progress::RunObserver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub network_delay: Duration,
    pub server_delay: Duration,
    pub quota_delay: Duration,
    pub quota_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            network_delay: Duration::from_millis(3000),
            server_delay: Duration::from_millis(2000),
            quota_delay: Duration::from_millis(5000),
            quota_cap: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retrying after `err`, or None when it must surface.
    pub fn delay_for(&self, err: &TranslateError) -> Option<Duration> {
        match err {
            TranslateError::RateLimited { retry_after, .. } => {
                Some(retry_after.unwrap_or(self.quota_delay).min(self.quota_cap))
            }
            _ => match err.class() {
                FailureClass::Network => Some(self.network_delay),
                FailureClass::Server => Some(self.server_delay),
                _ => None,
            },
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent. `op` receives the 0-based attempt number.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        observer: &dyn RunObserver,
        metrics: &mut ProcessingMetrics,
        mut op: F,
    ) -> Result<T, TranslateError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TranslateError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(TranslateError::Cancelled);
            }

            let err = match op(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        observer.on_status(&format!("{label}: succeeded after {attempt} retries"));
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let delay = match self.delay_for(&err) {
                Some(delay) if attempt < self.max_retries => delay,
                _ => {
                    if attempt > 0 && err.is_retryable() {
                        observer.on_status(&format!("{label}: giving up after {attempt} retries: {err}"));
                    }
                    return Err(err);
                }
            };

            attempt += 1;
            metrics.retry_count += 1;
            warn!(
                label,
                attempt,
                class = ?err.class(),
                wait_ms = delay.as_millis() as u64,
                error = %err,
                "remote_call_retry"
            );

            let quota = err.class() == FailureClass::RateLimit;
            if quota {
                observer.on_status(&format!(
                    "{label}: quota limit reached, waiting {:.1}s",
                    delay.as_secs_f64()
                ));
            } else {
                observer.on_status(&format!(
                    "{label}: {err}; retry {attempt}/{} in {:.1}s",
                    self.max_retries,
                    delay.as_secs_f64()
                ));
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(TranslateError::Cancelled),
            }

            if quota {
                observer.on_status(&format!("{label}: quota wait over, resuming"));
            }
            observer.on_status(&format!("{label}: retrying (attempt {})", attempt + 1));
            debug!(label, attempt, "remote_call_retry_started");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl RunObserver for Recorder {
        fn on_status(&self, message: &str) {
            self.0.lock().push(message.to_string());
        }
    }

    fn server_error() -> TranslateError {
        TranslateError::Server {
            status: 503,
            message: "unavailable".into(),
        }
    }

    #[test]
    fn schedule_per_class() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for(&TranslateError::Network("reset".into())),
            Some(Duration::from_secs(3))
        );
        assert_eq!(policy.delay_for(&server_error()), Some(Duration::from_secs(2)));
        assert_eq!(
            policy.delay_for(&TranslateError::RateLimited {
                message: "429".into(),
                retry_after: None
            }),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            policy.delay_for(&TranslateError::RateLimited {
                message: "429".into(),
                retry_after: Some(Duration::from_secs(600))
            }),
            Some(Duration::from_secs(30))
        );
        assert_eq!(policy.delay_for(&TranslateError::MalformedResponse("x".into())), None);
        assert_eq!(policy.delay_for(&TranslateError::Cancelled), None);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let recorder = Recorder::default();
        let mut metrics = ProcessingMetrics::new();
        let cancel = CancellationToken::new();

        let result = policy
            .run("chunk 1/1", &cancel, &recorder, &mut metrics, |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(server_error())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.retry_count, 2);
        let messages = recorder.0.lock();
        assert!(messages.last().unwrap().contains("succeeded after 2 retries"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_surfaces_last_error() {
        let policy = RetryPolicy {
            max_retries: 1,
            ..RetryPolicy::default()
        };
        let calls = AtomicU32::new(0);
        let mut metrics = ProcessingMetrics::new();
        let cancel = CancellationToken::new();

        let result: Result<(), _> = policy
            .run("chunk", &cancel, &crate::progress::NoopObserver, &mut metrics, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TranslateError::Network("refused".into())) }
            })
            .await;

        assert!(matches!(result, Err(TranslateError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_is_not_retried() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let mut metrics = ProcessingMetrics::new();
        let cancel = CancellationToken::new();

        let result: Result<(), _> = policy
            .run("chunk", &cancel, &crate::progress::NoopObserver, &mut metrics, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TranslateError::MalformedResponse("no candidates".into())) }
            })
            .await;

        assert!(matches!(result, Err(TranslateError::MalformedResponse(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_wait_is_announced_and_cancellable() {
        let policy = RetryPolicy::default();
        let recorder = Recorder::default();
        let mut metrics = ProcessingMetrics::new();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let result: Result<(), _> = policy
            .run("chunk", &cancel, &recorder, &mut metrics, |_| async {
                Err(TranslateError::RateLimited {
                    message: "RESOURCE_EXHAUSTED".into(),
                    retry_after: None,
                })
            })
            .await;

        assert!(matches!(result, Err(TranslateError::Cancelled)));
        let messages = recorder.0.lock();
        assert!(messages.iter().any(|m| m.contains("quota limit reached")));
        assert!(!messages.iter().any(|m| m.contains("quota wait over")));
    }

    #[tokio::test]
    async fn cancelled_before_first_attempt() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let mut metrics = ProcessingMetrics::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), _> = policy
            .run("chunk", &cancel, &crate::progress::NoopObserver, &mut metrics, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(TranslateError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
