use crate::error::RebalanceError;
use crate::market::FeedError;
use std::future::Future;
use std::time::Duration;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF_SECS: u64 = 10;

/// Backoff applied when the feed answers 429. Other failures are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: Duration::from_secs(DEFAULT_BACKOFF_SECS),
        }
    }
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        let max_attempts = std::env::var("PRICE_FEED_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_ATTEMPTS)
            .max(1);

        let backoff_secs = std::env::var("PRICE_FEED_BACKOFF_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_BACKOFF_SECS);

        Self {
            max_attempts,
            base_backoff: Duration::from_secs(backoff_secs),
        }
    }
}

/// Runs `op` until it succeeds, fails with a non-rate-limit error, or the attempt cap is hit.
/// The wait doubles after every rate-limited attempt; the last attempt is never followed by a wait.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, RebalanceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FeedError>>,
{
    let mut attempt: u32 = 0;
    let mut backoff = policy.base_backoff;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(FeedError::RateLimited) => {
                if attempt >= policy.max_attempts {
                    tracing::error!(attempt, what, "price feed rate limit persisted; giving up");
                    return Err(RebalanceError::UpstreamRateLimited { attempts: attempt });
                }
                tracing::warn!(attempt, ?backoff, what, "price feed rate limited; backing off");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_rate_limited_attempts() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let waits = Mutex::new(Vec::new());
        let mut last = started;

        let res: Result<(), _> = with_backoff(&RetryPolicy::default(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            let now = Instant::now();
            if now != last {
                waits.lock().unwrap().push((now - last).as_secs());
            }
            last = now;
            async { Err(FeedError::RateLimited) }
        })
        .await;

        assert!(matches!(
            res,
            Err(RebalanceError::UpstreamRateLimited { attempts: 3 })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(*waits.lock().unwrap(), vec![10, 20]);
        assert_eq!(started.elapsed().as_secs(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_when_rate_limit_clears() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let res = with_backoff(&RetryPolicy::default(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(FeedError::RateLimited)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(res.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(started.elapsed().as_secs(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn other_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let res: Result<(), _> = with_backoff(&RetryPolicy::default(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(FeedError::Status {
                    status: 500,
                    body: "boom".into(),
                })
            }
        })
        .await;

        assert!(matches!(
            res,
            Err(RebalanceError::UpstreamFetchFailed {
                status: Some(500),
                ..
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed().as_secs(), 0);
    }
}
