use super::reads::StoreReader;
use crate::domain::ids::TripId;
use crate::domain::ports::TripStoreRef;
use crate::error::{CarpoolError, Result};
use tracing::debug;

/// Compare-and-set rounds before a seat update gives up as contended.
const MAX_CAS_ATTEMPTS: u32 = 64;

/// Tracks available seats per trip.
///
/// Every change is a conditional write against the seat count that was just
/// read; a lost race re-reads and tries again, so concurrent callers never
/// overwrite each other's updates and the count never drops below zero.
#[derive(Clone)]
pub struct SeatLedger {
    trips: TripStoreRef,
    reader: StoreReader,
}

impl SeatLedger {
    pub fn new(trips: TripStoreRef, reader: StoreReader) -> Self {
        Self { trips, reader }
    }

    /// Takes one seat. Returns `false`, changing nothing, if the trip has no
    /// seats left or is no longer open for bookings.
    pub async fn try_reserve(&self, trip_id: TripId) -> Result<bool> {
        Ok(self.reserve(trip_id).await?.is_some())
    }

    /// Like [`try_reserve`](Self::try_reserve), returning the seats left after
    /// a successful reservation.
    pub async fn reserve(&self, trip_id: TripId) -> Result<Option<u32>> {
        self.take(trip_id, true).await
    }

    /// Takes back a seat released moments ago, whatever the trip's status.
    pub(crate) async fn reclaim(&self, trip_id: TripId) -> Result<Option<u32>> {
        self.take(trip_id, false).await
    }

    async fn take(&self, trip_id: TripId, bookable_only: bool) -> Result<Option<u32>> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let trip = self.reader.trip(trip_id).await?;
            if (bookable_only && !trip.is_active()) || trip.available_seats == 0 {
                return Ok(None);
            }
            let remaining = trip.available_seats - 1;
            if self
                .trips
                .conditional_update_seats(trip_id, trip.available_seats, remaining)
                .await?
            {
                debug!(%trip_id, remaining, "seat reserved");
                return Ok(Some(remaining));
            }
            debug!(%trip_id, "lost seat race on reserve, retrying");
        }
        Err(contended(trip_id))
    }

    /// Gives one seat back. Callers issue exactly one release per successful
    /// reservation.
    pub async fn release(&self, trip_id: TripId) -> Result<u32> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let trip = self.reader.trip(trip_id).await?;
            if trip.available_seats >= trip.capacity {
                return Err(CarpoolError::InvalidState(format!(
                    "trip {trip_id} already has all {} seats free",
                    trip.capacity
                )));
            }
            let restored = trip.available_seats + 1;
            if self
                .trips
                .conditional_update_seats(trip_id, trip.available_seats, restored)
                .await?
            {
                debug!(%trip_id, available = restored, "seat released");
                return Ok(restored);
            }
            debug!(%trip_id, "lost seat race on release, retrying");
        }
        Err(contended(trip_id))
    }

    pub async fn available(&self, trip_id: TripId) -> Result<u32> {
        Ok(self.reader.trip(trip_id).await?.available_seats)
    }
}

fn contended(trip_id: TripId) -> CarpoolError {
    CarpoolError::store(format!("seat count for trip {trip_id} is too contended"))
}
