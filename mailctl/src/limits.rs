//! Request limiting.
//!
//! - [`UploadLimiter`]: bounds concurrent bulk uploads, with a bounded waiting queue
//! - [`KeyRateLimiter`]: fixed one-minute windows per API key
//!
//! Both reject with HTTP 429.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::{FileLimitsConfig, LimitsConfig};
use crate::errors::{Error, Result};
use crate::types::ApiKeyId;

#[derive(Clone)]
pub struct Limiters {
    /// `None` means uploads are not limited
    pub file_uploads: Option<Arc<UploadLimiter>>,
    pub api_keys: KeyRateLimiter,
}

impl Limiters {
    pub fn new(config: &LimitsConfig) -> Self {
        Self {
            file_uploads: UploadLimiter::new(&config.files).map(Arc::new),
            api_keys: KeyRateLimiter::new(),
        }
    }
}

fn busy(message: &str) -> Error {
    Error::TooManyRequests {
        message: message.to_string(),
    }
}

#[derive(Debug)]
pub struct UploadLimiter {
    slots: Arc<Semaphore>,
    waiting: AtomicUsize,
    /// `None` lets any number of uploads wait
    max_waiting: Option<usize>,
    max_wait: Duration,
}

/// Held for the duration of an upload.
#[must_use]
pub struct UploadPermit {
    _permit: OwnedSemaphorePermit,
}

impl UploadLimiter {
    /// `None` when `max_concurrent_uploads` is 0. A `max_waiting_uploads` of 0 means no cap on
    /// waiting uploads.
    pub fn new(config: &FileLimitsConfig) -> Option<Self> {
        (config.max_concurrent_uploads > 0).then(|| Self {
            slots: Arc::new(Semaphore::new(config.max_concurrent_uploads)),
            waiting: AtomicUsize::new(0),
            max_waiting: (config.max_waiting_uploads > 0).then_some(config.max_waiting_uploads),
            max_wait: Duration::from_secs(config.max_upload_wait_secs),
        })
    }

    /// Take a slot, waiting up to the configured time if all are busy.
    pub async fn acquire(&self) -> Result<UploadPermit> {
        if let Ok(permit) = self.slots.clone().try_acquire_owned() {
            return Ok(UploadPermit { _permit: permit });
        }

        let already_waiting = self.waiting.fetch_add(1, Ordering::SeqCst);
        let _waiting = scopeguard::guard((), |_| {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        });
        if self.max_waiting.is_some_and(|max| already_waiting >= max) {
            return Err(busy("Too many uploads in progress, retry later"));
        }
        if self.max_wait.is_zero() {
            return self
                .slots
                .clone()
                .try_acquire_owned()
                .map(|permit| UploadPermit { _permit: permit })
                .map_err(|_| busy("Too many uploads in progress, retry later"));
        }

        match tokio::time::timeout(self.max_wait, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(UploadPermit { _permit: permit }),
            Ok(Err(_)) => Err(busy("Upload service temporarily unavailable")),
            Err(_) => Err(busy("Timed out waiting for an upload slot, retry later")),
        }
    }
}

/// Per-key request counter over fixed one-minute windows.
#[derive(Clone)]
pub struct KeyRateLimiter {
    windows: Cache<(ApiKeyId, i64), Arc<AtomicU32>>,
}

impl Default for KeyRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyRateLimiter {
    pub fn new() -> Self {
        Self {
            // A window is only consulted during its own minute
            windows: Cache::builder().time_to_live(Duration::from_secs(61)).build(),
        }
    }

    /// Count one request for `key_id` at `now`.
    pub async fn check(&self, key_id: ApiKeyId, limit_per_minute: u32, now: DateTime<Utc>) -> Result<()> {
        let window = now.timestamp().div_euclid(60);
        let counter = self
            .windows
            .get_with((key_id, window), async { Arc::new(AtomicU32::new(0)) })
            .await;
        let used = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if used > limit_per_minute {
            tracing::debug!(key_id = %key_id, used, limit_per_minute, "API key rate limited");
            return Err(Error::TooManyRequests {
                message: format!("Rate limit of {limit_per_minute} requests per minute exceeded"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn files(max_concurrent: usize, max_waiting: usize, max_wait_secs: u64) -> FileLimitsConfig {
        FileLimitsConfig {
            max_concurrent_uploads: max_concurrent,
            max_waiting_uploads: max_waiting,
            max_upload_wait_secs: max_wait_secs,
            ..Default::default()
        }
    }

    #[test]
    fn test_zero_concurrency_disables_limiter() {
        assert!(UploadLimiter::new(&files(0, 5, 5)).is_none());
    }

    #[tokio::test]
    async fn test_waiter_gets_released_slot() {
        let limiter = Arc::new(UploadLimiter::new(&files(1, 5, 5)).unwrap());
        let held = limiter.acquire().await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);
        assert!(waiter.await.unwrap());
        assert_eq!(limiter.waiting.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_full_queue_rejects() {
        let limiter = Arc::new(UploadLimiter::new(&files(1, 1, 60)).unwrap());
        let _held = limiter.acquire().await.unwrap();
        let _queued = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = limiter.acquire().await.err().unwrap();
        assert!(matches!(err, Error::TooManyRequests { .. }));
    }

    #[tokio::test]
    async fn test_zero_wait_rejects_immediately() {
        let limiter = UploadLimiter::new(&files(1, 5, 0)).unwrap();
        let _held = limiter.acquire().await.unwrap();
        assert!(limiter.acquire().await.is_err());
        assert_eq!(limiter.waiting.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_resets_each_minute() {
        let limiter = KeyRateLimiter::new();
        let key = Uuid::new_v4();
        let minute = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 5).unwrap();

        for _ in 0..3 {
            limiter.check(key, 3, minute).await.unwrap();
        }
        assert!(matches!(
            limiter.check(key, 3, minute).await,
            Err(Error::TooManyRequests { .. })
        ));

        // Other keys are independent
        limiter.check(Uuid::new_v4(), 3, minute).await.unwrap();

        let next_minute = minute + chrono::Duration::seconds(60);
        limiter.check(key, 3, next_minute).await.unwrap();
    }
}
