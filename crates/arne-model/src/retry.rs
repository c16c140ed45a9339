// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Generic retry wrapper with exponential backoff.
//!
//! Providers classify their own errors; the wrapper only decides *when* to
//! try again.  An abort cancels the in-flight sleep and suppresses all
//! further attempts.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Typed transport failure, classifiable without string matching.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The provider answered with a non-success status.
    #[error("provider error {status}: {body}")]
    Http { status: u16, body: String },
    /// The request never produced a response (DNS, connect, TLS, timeout).
    #[error("network error: {0}")]
    Network(String),
    /// The caller aborted the request.
    #[error("aborted")]
    Aborted,
}

/// Outcome of classifying one error.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClass {
    pub retryable: bool,
    /// Provider-suggested delay (e.g. from a `retry-after` header) that
    /// overrides the computed backoff for this attempt.
    pub retry_after: Option<Duration>,
}

/// Classify a [`TransportError`] the way HTTP semantics dictate: network
/// failures, 5xx, and 429 are transient; other 4xx (including auth) are
/// fatal.
pub fn classify_transport(err: &anyhow::Error) -> ErrorClass {
    match err.downcast_ref::<TransportError>() {
        Some(TransportError::Network(_)) => ErrorClass { retryable: true, retry_after: None },
        Some(TransportError::Http { status, .. }) => ErrorClass {
            retryable: *status == 429 || *status >= 500,
            retry_after: None,
        },
        Some(TransportError::Aborted) | None => ErrorClass::default(),
    }
}

/// Retry policy: exponential backoff from `base_delay`, doubling per attempt,
/// capped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff for the given 1-based attempt number.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        self.base_delay.saturating_mul(factor as u32).min(self.max_delay)
    }

    /// Cap the maximum sleep, e.g. from a per-request option.
    pub fn with_max_delay_ms(mut self, ms: Option<u64>) -> Self {
        if let Some(ms) = ms {
            self.max_delay = Duration::from_millis(ms);
        }
        self
    }
}

/// Run `op` until it succeeds, the classifier declares the error fatal, the
/// attempt budget is exhausted, or `abort` fires.
///
/// `op` is called with the 0-based attempt number.  Abort wins every race:
/// a cancelled token aborts the current backoff sleep immediately and the
/// final error is [`TransportError::Aborted`].
pub async fn with_retry<T, Fut, Op, Cl>(
    policy: RetryPolicy,
    abort: &CancellationToken,
    classify: Cl,
    op: Op,
) -> anyhow::Result<T>
where
    Op: Fn(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
    Cl: Fn(&anyhow::Error) -> ErrorClass,
{
    let mut attempt = 0u32;
    loop {
        if abort.is_cancelled() {
            return Err(TransportError::Aborted.into());
        }
        let result = tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(TransportError::Aborted.into()),
            r = op(attempt) => r,
        };
        let err = match result {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        attempt += 1;
        let class = classify(&err);
        if !class.retryable || attempt >= policy.max_attempts {
            return Err(err);
        }
        let delay = class.retry_after.unwrap_or_else(|| policy.delay_for(attempt));
        warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "transient failure, backing off");
        tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(TransportError::Aborted.into()),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(350)); // capped
        assert_eq!(p.delay_for(8), Duration::from_millis(350));
    }

    #[test]
    fn classify_5xx_and_429_retryable() {
        let e: anyhow::Error = TransportError::Http { status: 503, body: "".into() }.into();
        assert!(classify_transport(&e).retryable);
        let e: anyhow::Error = TransportError::Http { status: 429, body: "".into() }.into();
        assert!(classify_transport(&e).retryable);
    }

    #[test]
    fn classify_auth_and_bad_request_fatal() {
        let e: anyhow::Error = TransportError::Http { status: 401, body: "".into() }.into();
        assert!(!classify_transport(&e).retryable);
        let e: anyhow::Error = TransportError::Http { status: 400, body: "".into() }.into();
        assert!(!classify_transport(&e).retryable);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let abort = CancellationToken::new();
        let out = with_retry(fast_policy(), &abort, classify_transport, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(TransportError::Network("flaky".into()).into())
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let abort = CancellationToken::new();
        let out: anyhow::Result<()> = with_retry(fast_policy(), &abort, classify_transport, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TransportError::Http { status: 401, body: "no".into() }.into()) }
        })
        .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempt_budget_is_honored() {
        let calls = AtomicU32::new(0);
        let abort = CancellationToken::new();
        let out: anyhow::Result<()> = with_retry(fast_policy(), &abort, classify_transport, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TransportError::Network("down".into()).into()) }
        })
        .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn pre_cancelled_abort_skips_the_first_attempt() {
        let abort = CancellationToken::new();
        abort.cancel();
        let calls = AtomicU32::new(0);
        let out: anyhow::Result<()> = with_retry(fast_policy(), &abort, classify_transport, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;
        let err = out.unwrap_err();
        assert!(matches!(err.downcast_ref(), Some(TransportError::Aborted)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn abort_during_backoff_cancels_remaining_retries() {
        let abort = CancellationToken::new();
        let slow = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
        };
        let calls = AtomicU32::new(0);
        let fut = with_retry(slow, &abort, classify_transport, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(TransportError::Network("down".into()).into()) }
        });
        let abort2 = abort.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            abort2.cancel();
        });
        let err = fut.await.unwrap_err();
        assert!(matches!(err.downcast_ref(), Some(TransportError::Aborted)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_after_hint_overrides_backoff() {
        let calls = AtomicU32::new(0);
        let abort = CancellationToken::new();
        let classify = |_e: &anyhow::Error| ErrorClass {
            retryable: true,
            retry_after: Some(Duration::from_millis(1)),
        };
        let out = with_retry(
            RetryPolicy { max_attempts: 2, base_delay: Duration::from_secs(60), max_delay: Duration::from_secs(60) },
            &abort,
            classify,
            |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(TransportError::Network("once".into()).into())
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(out, 1);
    }
}
