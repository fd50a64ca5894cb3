//! Process-wide token bucket in front of every outgoing call.
//!
//! Backed by governor's GCRA limiter: the bucket state is a single atomic
//! timestamp, refilled lazily when a caller asks for a token, so an idle
//! plugin has no background timer.

use crate::error::CallError;
use governor::{DefaultDirectRateLimiter, Quota};
use ncloud_core::config::ProviderConfig;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct RateLimiter {
    inner: DefaultDirectRateLimiter,
    capacity: NonZeroU32,
    refill_per_second: f64,
    max_wait: Duration,
}

impl RateLimiter {
    pub fn new(
        refill_per_second: f64,
        capacity: u32,
        max_wait: Duration,
    ) -> Result<Self, CallError> {
        if !refill_per_second.is_finite() || refill_per_second <= 0.0 {
            return Err(CallError::InvalidArgument {
                message: format!("rate limit must be positive, got {refill_per_second}"),
            });
        }
        let capacity = NonZeroU32::new(capacity.max(1)).unwrap_or(NonZeroU32::MIN);
        let replenish_interval = Duration::try_from_secs_f64(1.0 / refill_per_second)
            .map_err(|e| CallError::InvalidArgument {
                message: format!("rate limit {refill_per_second} is out of range: {e}"),
            })?;
        let quota = Quota::with_period(replenish_interval)
            .ok_or_else(|| CallError::InvalidArgument {
                message: "rate limit replenish interval is zero".into(),
            })?
            .allow_burst(capacity);

        Ok(Self {
            inner: governor::RateLimiter::direct(quota),
            capacity,
            refill_per_second,
            max_wait,
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, CallError> {
        Self::new(
            config.rate_limit_per_second,
            config.rate_limit_capacity(),
            config.rate_limit_wait(),
        )
    }

    pub fn capacity(&self) -> u32 {
        self.capacity.get()
    }

    pub fn refill_per_second(&self) -> f64 {
        self.refill_per_second
    }

    /// Takes a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.inner.check().is_ok()
    }

    /// Suspends until a token is available.
    ///
    /// Fails with `RateLimited` once the configured wait elapses and with
    /// `Cancelled` as soon as `cancel` fires; in both cases no token is taken.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), CallError> {
        if self.try_acquire() {
            return Ok(());
        }
        tracing::trace!(capacity = self.capacity.get(), "waiting for rate limit token");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CallError::Cancelled),
            ready = tokio::time::timeout(self.max_wait, self.inner.until_ready()) => {
                ready.map_err(|_| {
                    tracing::warn!(wait_ms = self.max_wait.as_millis() as u64, "rate limit wait timed out");
                    CallError::RateLimited {
                        message: format!(
                            "no request token within {}ms",
                            self.max_wait.as_millis()
                        ),
                    }
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_bounded_by_capacity() {
        let limiter = RateLimiter::new(1.0, 3, Duration::from_millis(10)).unwrap();
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn rejects_non_positive_rates() {
        assert!(RateLimiter::new(0.0, 1, Duration::ZERO).is_err());
        assert!(RateLimiter::new(f64::NAN, 1, Duration::ZERO).is_err());
    }

    #[test]
    fn extreme_rates_are_errors_not_panics() {
        assert!(matches!(
            RateLimiter::new(1e-300, 1, Duration::ZERO),
            Err(CallError::InvalidArgument { .. })
        ));
        assert!(matches!(
            RateLimiter::new(1e300, 1, Duration::ZERO),
            Err(CallError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn capacity_follows_config() {
        let mut config = ProviderConfig::default();
        config.rate_limit_per_second = 2.5;
        let limiter = RateLimiter::from_config(&config).unwrap();
        assert_eq!(limiter.capacity(), 3);
    }

    #[tokio::test]
    async fn acquire_times_out_with_rate_limited() {
        let limiter = RateLimiter::new(0.1, 1, Duration::from_millis(50)).unwrap();
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();
        let err = limiter.acquire(&cancel).await.unwrap_err();
        assert!(matches!(err, CallError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn acquire_waits_for_refill() {
        let limiter = RateLimiter::new(20.0, 1, Duration::from_secs(2)).unwrap();
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();
        let started = std::time::Instant::now();
        limiter.acquire(&cancel).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn acquire_aborts_on_cancel() {
        let limiter = RateLimiter::new(0.1, 1, Duration::from_secs(30)).unwrap();
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();
        cancel.cancel();
        assert_eq!(limiter.acquire(&cancel).await, Err(CallError::Cancelled));
    }
}
