use crate::config::EngineConfig;
use crate::domain::ids::{RequestId, TripId};
use crate::domain::ports::{RequestStoreRef, TripStoreRef};
use crate::domain::request::ParticipationRequest;
use crate::domain::trip::Trip;
use crate::error::{CarpoolError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Runs an idempotent read, retrying transient store failures with
/// exponential backoff. Any other error is returned immediately.
pub async fn read_with_retry<T, F, Fut>(retries: u32, backoff: Duration, mut read: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match read().await {
            Err(err) if err.kind().is_retryable() && attempt < retries => {
                let delay = backoff.saturating_mul(1 << attempt.min(16));
                attempt += 1;
                debug!(attempt, error = %err, ?delay, "retrying store read");
                tokio::time::sleep(delay).await;
            }
            outcome => return outcome,
        }
    }
}

/// Loads trips and requests by id, mapping absence to `NotFound`.
#[derive(Clone)]
pub struct StoreReader {
    trips: TripStoreRef,
    requests: RequestStoreRef,
    retries: u32,
    backoff: Duration,
}

impl StoreReader {
    pub fn new(trips: TripStoreRef, requests: RequestStoreRef, config: &EngineConfig) -> Self {
        Self {
            trips,
            requests,
            retries: config.read_retries,
            backoff: config.retry_backoff,
        }
    }

    pub async fn trip(&self, trip_id: TripId) -> Result<Trip> {
        read_with_retry(self.retries, self.backoff, || self.trips.get_trip(trip_id))
            .await?
            .ok_or_else(|| CarpoolError::NotFound(format!("trip {trip_id}")))
    }

    pub async fn request(&self, request_id: RequestId) -> Result<ParticipationRequest> {
        read_with_retry(self.retries, self.backoff, || {
            self.requests.get_by_id(request_id)
        })
        .await?
        .ok_or_else(|| CarpoolError::NotFound(format!("request {request_id}")))
    }

    /// Retries an arbitrary read with this reader's policy.
    pub async fn retrying<T, F, Fut>(&self, read: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        read_with_retry(self.retries, self.backoff, read).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = AtomicU32::new(0);
        let value = read_with_retry(3, Duration::from_millis(1), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CarpoolError::store("connection reset"))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = read_with_retry(2, Duration::from_millis(1), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CarpoolError::store("still down"))
        })
        .await;

        assert!(matches!(result, Err(CarpoolError::TransientStore(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_guard_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = read_with_retry(5, Duration::from_millis(1), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CarpoolError::NotFound("trip".into()))
        })
        .await;

        assert!(matches!(result, Err(CarpoolError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
