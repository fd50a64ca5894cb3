use crate::error::CallError;
use ncloud_core::config::RetryConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Bounded retry with exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Delay before retry number `attempt + 1`, without jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff plus up to a quarter of it in random jitter, still capped.
    fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        let spread = (delay.as_millis() / 4) as u64;
        let jitter = if spread == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=spread)
        };
        (delay + Duration::from_millis(jitter)).min(self.max_delay.max(delay))
    }

    fn delay_for(&self, err: &CallError, attempt: u32) -> Duration {
        match err {
            CallError::Transient {
                retry_after: Some(after),
                ..
            } => (*after).min(self.max_delay).max(self.backoff_delay(attempt)),
            _ => self.jittered_delay(attempt),
        }
    }

    /// Runs `op` until it succeeds, fails permanently, or retries run out.
    ///
    /// Only `Transient` failures are retried; exhaustion turns the last one
    /// into `Exhausted`. Sleeping between attempts stops early on `cancel`.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    let delay = self.delay_for(&err, attempt);
                    tracing::warn!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient failure"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(CallError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    tracing::warn!(operation, attempts = attempt + 1, error = %err, "retries exhausted");
                    return Err(CallError::Exhausted {
                        attempts: attempt + 1,
                        message: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Like [`run`](Self::run), but a rejected credential gets exactly one
    /// `reauthenticate` and one more round before `AuthenticationRequired`.
    pub async fn run_authenticated<T, F, Fut, R, RFut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut op: F,
        reauthenticate: R,
    ) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
        R: FnOnce() -> RFut,
        RFut: Future<Output = Result<(), CallError>>,
    {
        match self.run(operation, cancel, &mut op).await {
            Err(CallError::Unauthorized { message }) => {
                tracing::info!(operation, "credentials rejected, refreshing session once");
                reauthenticate().await.map_err(|err| match err {
                    CallError::Cancelled
                    | CallError::Transient { .. }
                    | CallError::Exhausted { .. }
                    | CallError::RateLimited { .. }
                    | CallError::AuthenticationRequired { .. } => err,
                    other => CallError::AuthenticationRequired {
                        message: format!("{message}; refresh failed: {other}"),
                    },
                })?;
                match self.run(operation, cancel, &mut op).await {
                    Err(CallError::Unauthorized { message }) => {
                        Err(CallError::AuthenticationRequired { message })
                    }
                    other => other,
                }
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(40),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(800));
        assert_eq!(policy.backoff_delay(10), Duration::from_secs(5));
        assert_eq!(policy.backoff_delay(40), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let delay = policy.jittered_delay(1);
            assert!(delay >= Duration::from_millis(400));
            assert!(delay <= Duration::from_millis(500));
        }
        assert_eq!(policy.jittered_delay(20), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let calls = &AtomicU32::new(0);
        let started = std::time::Instant::now();
        let result = fast()
            .run("test", &CancellationToken::new(), move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(CallError::transient("429"))
                } else {
                    Ok("done")
                }
            })
            .await;
        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(started.elapsed() >= Duration::from_millis(5 + 10 + 20));
    }

    #[tokio::test]
    async fn exhaustion_reports_attempts() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = fast()
            .run("test", &CancellationToken::new(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CallError::transient("503"))
            })
            .await;
        assert!(matches!(result, Err(CallError::Exhausted { attempts: 4, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = fast()
            .run("test", &CancellationToken::new(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CallError::permanent("bad request"))
            })
            .await;
        assert!(matches!(result, Err(CallError::Permanent { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unauthorized_refreshes_exactly_once() {
        let calls = &AtomicU32::new(0);
        let refreshes = &AtomicU32::new(0);
        let result: Result<(), _> = fast()
            .run_authenticated(
                "test",
                &CancellationToken::new(),
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CallError::Unauthorized {
                        message: "301".into(),
                    })
                },
                move || async move {
                    refreshes.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
            .await;
        assert!(matches!(
            result,
            Err(CallError::AuthenticationRequired { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unauthorized_then_success_after_refresh() {
        let calls = &AtomicU32::new(0);
        let result = fast()
            .run_authenticated(
                "test",
                &CancellationToken::new(),
                move || async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(CallError::Unauthorized {
                            message: "301".into(),
                        })
                    } else {
                        Ok(7)
                    }
                },
                move || async move { Ok(()) },
            )
            .await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn failed_refresh_requires_authentication() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = fast()
            .run_authenticated(
                "test",
                &CancellationToken::new(),
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CallError::Unauthorized {
                        message: "301".into(),
                    })
                },
                move || async move {
                    Err(CallError::Unauthorized {
                        message: "refresh rejected".into(),
                    })
                },
            )
            .await;
        assert!(matches!(
            result,
            Err(CallError::AuthenticationRequired { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_interrupts_backoff() {
        let cancel = &CancellationToken::new();
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
        };
        let result: Result<(), _> = policy
            .run("test", cancel, move || async move {
                cancel.cancel();
                Err(CallError::transient("timeout"))
            })
            .await;
        assert_eq!(result, Err(CallError::Cancelled));
    }
}
