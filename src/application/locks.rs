use crate::domain::ids::TripId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Arc<Mutex<HashMap<TripId, Arc<AsyncMutex<()>>>>>;

/// One async mutex per trip, created on first use and dropped again once
/// nobody holds or waits for it.
///
/// Serializes seat-moving status changes and waiting-list promotion for a
/// trip. Seat counts themselves do not rely on this lock; they are guarded
/// by the store's compare-and-set.
#[derive(Debug, Default)]
pub struct TripLocks {
    locks: LockMap,
}

impl TripLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, trip_id: TripId) -> TripGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(trip_id).or_default().clone()
        };
        TripGuard {
            trip_id,
            locks: self.locks.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }
}

/// Held while a trip is locked. Dropping it unlocks the trip.
#[derive(Debug)]
pub struct TripGuard {
    trip_id: TripId,
    locks: LockMap,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TripGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Waiters clone the entry under the map lock, so a count of one means
        // nobody else is interested in this trip.
        if locks
            .get(&self.trip_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.trip_id);
        }
    }
}
