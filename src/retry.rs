//! A small retry combinator reused across every external call the core makes
//! (MetadataStore writes, QueryExecutor statements, LLMClient completions,
//! EmbeddingIndex calls), per the "Retry" design note: parameterize by
//! (attempts, base delay, jitter, classifier) rather than re-implementing the
//! loop at each call site.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    Retry,
    GiveUp,
    BudgetAbort,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        RetryPolicy { attempts, base_delay, max_delay }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        let capped = exp.min(self.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis().max(1) as u64 / 2);
        capped + Duration::from_millis(jitter_ms)
    }
}

/// MetadataStore write policy (§4.1): initial 1-2s, factor 2, cap ~30s, ~5 attempts.
pub const METADATA_STORE_RETRY: RetryPolicy =
    RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(30));

/// QueryExecutor transient-error policy (§4.2): up to 3 retries, 2s/4s/8s.
pub const EXECUTOR_RETRY: RetryPolicy =
    RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(8));

/// LLMClient policy (§4.4): up to 3 retries, exponential with jitter.
pub const LLM_RETRY: RetryPolicy =
    RetryPolicy::new(3, Duration::from_millis(500), Duration::from_secs(8));

/// Rate-limit backpressure policy (§5): jittered 1s -> 60s cap, effectively unbounded attempts
/// (the caller decides when to give up by checking cancellation/budget between tries).
pub const RATE_LIMIT_RETRY: RetryPolicy =
    RetryPolicy::new(8, Duration::from_secs(1), Duration::from_secs(60));

/// Run `op` under `policy`, calling `classify` on each error to decide whether to retry.
/// Returns the last error if attempts are exhausted or the classifier gives up.
pub async fn with_retry<T, E, F, Fut, C>(policy: RetryPolicy, mut op: F, classify: C) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryVerdict,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let verdict = classify(&e);
                if verdict != RetryVerdict::Retry || attempt + 1 >= policy.attempts {
                    return Err(e);
                }
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_retry(
            RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(5)),
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(n)
                }
            },
            |_| RetryVerdict::Retry,
        )
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_immediately_when_classifier_says_so() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_retry(
            RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(5)),
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("permanent")
            },
            |_| RetryVerdict::GiveUp,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
