// services/status_watcher.rs
//
// Bounded poll loop for an in-flight STK push: fixed 3-second interval, at
// most 20 attempts (60 seconds), early exit on a definite result. The loop is
// driven by a CancellationToken so it can be stopped from outside at any
// suspension point; timeout is not a failure, the payment may still complete
// through the callback.
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::Result;

pub const POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const MAX_POLL_ATTEMPTS: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StkQueryOutcome {
    Paid,
    Failed(String),
    Pending,
}

#[async_trait]
pub trait StkStatusSource: Send + Sync {
    async fn query_status(&self, checkout_request_id: &str) -> Result<StkQueryOutcome>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchResult {
    Paid,
    Failed(String),
    TimedOut,
    Cancelled,
}

pub async fn watch<S>(
    source: &S,
    checkout_request_id: &str,
    cancel: &CancellationToken,
    interval: Duration,
    max_attempts: u32,
) -> WatchResult
where
    S: StkStatusSource + ?Sized,
{
    for attempt in 1..=max_attempts {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("status watch for {} cancelled", checkout_request_id);
                return WatchResult::Cancelled;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        match source.query_status(checkout_request_id).await {
            Ok(StkQueryOutcome::Paid) => {
                info!(
                    "payment {} confirmed on attempt {}/{}",
                    checkout_request_id, attempt, max_attempts
                );
                return WatchResult::Paid;
            }
            Ok(StkQueryOutcome::Failed(reason)) => {
                info!("payment {} failed: {}", checkout_request_id, reason);
                return WatchResult::Failed(reason);
            }
            Ok(StkQueryOutcome::Pending) => {}
            // Transient query errors are swallowed; the next tick retries.
            Err(err) => warn!(
                "status query attempt {}/{} for {} errored: {}",
                attempt, max_attempts, checkout_request_id, err
            ),
        }
    }

    WatchResult::TimedOut
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    // Mock source that reports Pending until a configured attempt, then Paid.
    struct MockSource {
        calls: Arc<AtomicU32>,
        paid_on: u32,
    }

    #[async_trait]
    impl StkStatusSource for MockSource {
        async fn query_status(&self, _checkout_request_id: &str) -> Result<StkQueryOutcome> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.paid_on {
                Ok(StkQueryOutcome::Paid)
            } else {
                Ok(StkQueryOutcome::Pending)
            }
        }
    }

    struct FailingSource {
        calls: Arc<AtomicU32>,
        fail_on: u32,
    }

    #[async_trait]
    impl StkStatusSource for FailingSource {
        async fn query_status(&self, _checkout_request_id: &str) -> Result<StkQueryOutcome> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.fail_on {
                Ok(StkQueryOutcome::Failed("Request cancelled by user".to_string()))
            } else {
                Ok(StkQueryOutcome::Pending)
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn paid_on_attempt_19_stops_before_attempt_20() {
        let calls = Arc::new(AtomicU32::new(0));
        let source = MockSource {
            calls: calls.clone(),
            paid_on: 19,
        };
        let cancel = CancellationToken::new();

        let result = watch(&source, "ws_CO_TEST", &cancel, POLL_INTERVAL, MAX_POLL_ATTEMPTS).await;

        assert_eq!(result, WatchResult::Paid);
        assert_eq!(calls.load(Ordering::SeqCst), 19);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_exactly_max_attempts_then_times_out() {
        let calls = Arc::new(AtomicU32::new(0));
        let source = MockSource {
            calls: calls.clone(),
            paid_on: u32::MAX,
        };
        let cancel = CancellationToken::new();

        let result = watch(&source, "ws_CO_TEST", &cancel, POLL_INTERVAL, MAX_POLL_ATTEMPTS).await;

        assert_eq!(result, WatchResult::TimedOut);
        assert_eq!(calls.load(Ordering::SeqCst), MAX_POLL_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling_without_a_query() {
        let calls = Arc::new(AtomicU32::new(0));
        let source = MockSource {
            calls: calls.clone(),
            paid_on: u32::MAX,
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = watch(&source, "ws_CO_TEST", &cancel, POLL_INTERVAL, MAX_POLL_ATTEMPTS).await;

        assert_eq!(result, WatchResult::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn definite_failure_stops_the_loop() {
        let calls = Arc::new(AtomicU32::new(0));
        let source = FailingSource {
            calls: calls.clone(),
            fail_on: 3,
        };
        let cancel = CancellationToken::new();

        let result = watch(&source, "ws_CO_TEST", &cancel, POLL_INTERVAL, MAX_POLL_ATTEMPTS).await;

        assert_eq!(
            result,
            WatchResult::Failed("Request cancelled by user".to_string())
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
