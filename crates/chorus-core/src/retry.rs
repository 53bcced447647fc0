// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Retry with classified-retryable errors and exponential backoff.
//!
//! Two modes:
//! - [`retry`] re-runs a whole unary call.
//! - [`retry_stream`] may restart a stream **only before the first item has
//!   been yielded to the consumer**.  Providers restart rather than resume,
//!   so retrying any later would duplicate already-delivered output.

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::StreamExt;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use chorus_model::EventStream;

use crate::error::OrchestratorError;

#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// HTTP statuses worth retrying: timeouts, throttling, server-side failures,
/// and Cloudflare's connection-level 52x codes.
const RETRYABLE_STATUS: &[u16] = &[408, 429, 500, 502, 503, 504, 522, 524];

/// Message fragments that mark known transient failures.
const TRANSIENT_PHRASES: &[&str] = &[
    "fetch failed",
    "Incomplete JSON segment",
    "connection reset",
    "connection refused",
    "connection closed",
    "dns error",
    "timed out",
    "timeout",
    "ECONNRESET",
    "ECONNREFUSED",
    "ETIMEDOUT",
    "EAI_AGAIN",
    "EPIPE",
    "socket hang up",
    "temporarily unavailable",
    "overloaded",
];

/// Classify an error as retryable.
///
/// Transport errors are recognized through the underlying `reqwest` error;
/// HTTP statuses and transient phrases are matched against the rendered
/// message, which is where the provider adapters put them.
pub fn is_retryable_error(err: &anyhow::Error) -> bool {
    // Aborts are never retried.
    if err.downcast_ref::<OrchestratorError>().map(|e| e.is_abort()).unwrap_or(false) {
        return false;
    }
    for cause in err.chain() {
        if let Some(re) = cause.downcast_ref::<reqwest::Error>() {
            if re.is_timeout() || re.is_connect() {
                return true;
            }
            if let Some(status) = re.status() {
                if RETRYABLE_STATUS.contains(&status.as_u16()) {
                    return true;
                }
            }
        }
    }
    let msg = format!("{err:#}");
    if RETRYABLE_STATUS.iter().any(|code| msg.contains(&format!("error {code}"))) {
        return true;
    }
    let lower = msg.to_lowercase();
    TRANSIENT_PHRASES.iter().any(|phrase| lower.contains(&phrase.to_lowercase()))
}

/// Backoff for the given 1-based attempt: `initial × multiplier^(attempt−1)`
/// capped at `max`, with ±10% jitter.
pub fn backoff_delay(opts: &RetryOptions, attempt: u32) -> Duration {
    let exp = opts.multiplier.powi(attempt.saturating_sub(1) as i32);
    let base = opts.initial.as_secs_f64() * exp;
    let capped = base.min(opts.max.as_secs_f64());
    let jitter = rand::thread_rng().gen_range(0.9..=1.1);
    Duration::from_secs_f64(capped * jitter)
}

/// Sleep for the backoff delay, aborting early when the token fires.
async fn backoff_sleep(
    opts: &RetryOptions,
    attempt: u32,
    abort: Option<&CancellationToken>,
) -> Result<(), OrchestratorError> {
    let delay = backoff_delay(opts, attempt);
    match abort {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(OrchestratorError::aborted()),
                _ = tokio::time::sleep(delay) => Ok(()),
            }
        }
        None => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}

/// Retry a unary call until it succeeds, the error is not retryable, or the
/// retry budget is spent.
pub async fn retry<T, F, Fut>(
    opts: &RetryOptions,
    abort: Option<&CancellationToken>,
    mut f: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt > opts.max_retries || !is_retryable_error(&err) {
                    return Err(err);
                }
                warn!(attempt, error = %err, "transient failure; retrying after backoff");
                backoff_sleep(opts, attempt, abort).await?;
            }
        }
    }
}

/// Wrap a stream factory with pre-first-item retry.
///
/// Factory failures and errors seen before anything was yielded restart the
/// stream (subject to classification and the retry budget).  Once one item
/// has reached the consumer, any further error propagates as a stream item.
pub fn retry_stream<F>(
    opts: RetryOptions,
    abort: Option<CancellationToken>,
    factory: F,
) -> EventStream
where
    F: Fn() -> BoxFuture<'static, anyhow::Result<EventStream>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut attempt = 0u32;
        'attempts: loop {
            attempt += 1;
            let mut inner = match factory().await {
                Ok(stream) => stream,
                Err(err) => {
                    if attempt <= opts.max_retries && is_retryable_error(&err) {
                        warn!(attempt, error = %err, "stream start failed; retrying");
                        if let Err(abort_err) = backoff_sleep(&opts, attempt, abort.as_ref()).await {
                            yield Err(abort_err.into());
                            break 'attempts;
                        }
                        continue 'attempts;
                    }
                    yield Err(err);
                    break 'attempts;
                }
            };

            let mut yielded = false;
            while let Some(item) = inner.next().await {
                match item {
                    Ok(event) => {
                        yielded = true;
                        yield Ok(event);
                    }
                    Err(err) => {
                        if !yielded && attempt <= opts.max_retries && is_retryable_error(&err) {
                            warn!(attempt, error = %err, "stream failed before first event; retrying");
                            if let Err(abort_err) =
                                backoff_sleep(&opts, attempt, abort.as_ref()).await
                            {
                                yield Err(abort_err.into());
                                break 'attempts;
                            }
                            continue 'attempts;
                        }
                        yield Err(err);
                        break 'attempts;
                    }
                }
            }
            break 'attempts;
        }
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use chorus_model::StreamEvent;

    use super::*;

    fn fast() -> RetryOptions {
        RetryOptions {
            max_retries: 3,
            initial: Duration::from_millis(1),
            max: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    #[test]
    fn status_codes_classify_as_retryable() {
        for code in [408, 429, 500, 502, 503, 504, 522, 524] {
            let err = anyhow::anyhow!("openai error {code}: try later");
            assert!(is_retryable_error(&err), "{code} must be retryable");
        }
        assert!(!is_retryable_error(&anyhow::anyhow!("openai error 401: bad key")));
        assert!(!is_retryable_error(&anyhow::anyhow!("openai error 400: bad request")));
    }

    #[test]
    fn transient_phrases_classify_as_retryable() {
        assert!(is_retryable_error(&anyhow::anyhow!("fetch failed: socket closed")));
        assert!(is_retryable_error(&anyhow::anyhow!("Incomplete JSON segment at EOF")));
        assert!(is_retryable_error(&anyhow::anyhow!("connection reset by peer")));
        assert!(!is_retryable_error(&anyhow::anyhow!("model not found")));
    }

    #[test]
    fn aborts_are_never_retryable() {
        let err = anyhow::Error::new(OrchestratorError::aborted());
        assert!(!is_retryable_error(&err));
    }

    #[test]
    fn backoff_grows_exponentially_within_jitter() {
        let opts = RetryOptions {
            max_retries: 5,
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
        };
        let d1 = backoff_delay(&opts, 1).as_secs_f64();
        let d3 = backoff_delay(&opts, 3).as_secs_f64();
        assert!((0.9..=1.1).contains(&d1), "attempt 1 ≈ 1s, got {d1}");
        assert!((3.6..=4.4).contains(&d3), "attempt 3 ≈ 4s, got {d3}");
    }

    #[test]
    fn backoff_is_capped_at_max() {
        let opts = RetryOptions {
            max_retries: 10,
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
        };
        let d = backoff_delay(&opts, 10).as_secs_f64();
        assert!(d <= 33.0, "cap 30s plus jitter, got {d}");
    }

    #[tokio::test]
    async fn unary_retry_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = retry(&fast(), None, || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("fetch failed")
                }
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unary_retry_gives_up_on_permanent_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: anyhow::Result<()> = retry(&fast(), None, || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("invalid api key")
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "permanent errors are not retried");
    }

    #[tokio::test]
    async fn stream_retries_before_first_item() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let stream = retry_stream(fast(), None, move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("connection reset")
                }
                let events: Vec<anyhow::Result<StreamEvent>> =
                    vec![Ok(StreamEvent::delta("m", "ok", 0))];
                Ok(Box::pin(futures::stream::iter(events)) as EventStream)
            })
        });
        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stream_error_after_first_item_propagates() {
        let stream = retry_stream(fast(), None, move || {
            Box::pin(async move {
                let events: Vec<anyhow::Result<StreamEvent>> = vec![
                    Ok(StreamEvent::delta("m", "first", 0)),
                    Err(anyhow::anyhow!("connection reset")),
                ];
                Ok(Box::pin(futures::stream::iter(events)) as EventStream)
            })
        });
        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(events[1].is_err(), "mid-stream errors must not restart the stream");
    }

    #[tokio::test]
    async fn stream_retry_budget_is_finite() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let stream = retry_stream(fast(), None, move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("fetch failed")
            })
        });
        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_err());
        // 1 initial + 3 retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn abort_cancels_retry_sleep() {
        let token = CancellationToken::new();
        token.cancel();
        let opts = RetryOptions {
            max_retries: 3,
            initial: Duration::from_secs(60),
            max: Duration::from_secs(60),
            multiplier: 2.0,
        };
        let started = std::time::Instant::now();
        let result: anyhow::Result<()> =
            retry(&opts, Some(&token), || async { anyhow::bail!("fetch failed") }).await;
        assert!(started.elapsed() < Duration::from_secs(5), "abort must cut the sleep short");
        let err = result.unwrap_err();
        let oe = err.downcast_ref::<OrchestratorError>().expect("abort error expected");
        assert!(oe.is_abort());
    }
}
