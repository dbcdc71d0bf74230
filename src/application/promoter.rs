use super::dispatch;
use super::locks::TripLocks;
use super::reads::StoreReader;
use super::state_machine::apply_transition;
use crate::domain::events::CarpoolEvent;
use crate::domain::ids::{RequestId, TripId};
use crate::domain::ports::{NotificationSinkRef, RequestStoreRef};
use crate::domain::request::{ParticipationRequest, RequestStatus, Transition};
use crate::error::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Moves waiting-list requests back to `Pending`, oldest first, as seats free up.
///
/// This is the only promotion path: passenger cancellations, explicit checks
/// and the periodic sweep all come through [`promote_up_to`](Self::promote_up_to),
/// which holds the trip's lock from the seat read to the last status write.
/// Promotion does not reserve seats; the driver still has to accept. Until
/// they answer, a promoted request counts as an open offer on one of the free
/// seats, so the same seat is not offered twice.
pub struct WaitingListPromoter {
    requests: RequestStoreRef,
    notifier: NotificationSinkRef,
    reader: StoreReader,
    locks: Arc<TripLocks>,
    /// Promoted requests per trip that were still `Pending` at the last look.
    offers: Mutex<HashMap<TripId, HashSet<RequestId>>>,
}

impl WaitingListPromoter {
    pub fn new(
        requests: RequestStoreRef,
        notifier: NotificationSinkRef,
        reader: StoreReader,
        locks: Arc<TripLocks>,
    ) -> Self {
        Self {
            requests,
            notifier,
            reader,
            locks,
            offers: Mutex::default(),
        }
    }

    /// Promotes at most `n` requests, and never more than the free seats not
    /// already offered to earlier promotions that are still pending.
    pub async fn promote_up_to(
        &self,
        trip_id: TripId,
        n: u32,
    ) -> Result<Vec<ParticipationRequest>> {
        let guard = self.locks.lock(trip_id).await;

        let trip = self.reader.trip(trip_id).await?;
        if !trip.is_active() {
            self.offers.lock().await.remove(&trip_id);
            return Ok(Vec::new());
        }
        if n == 0 || trip.available_seats == 0 {
            return Ok(Vec::new());
        }

        let outstanding = self.outstanding_offers(trip_id).await?;
        let unclaimed = trip
            .available_seats
            .saturating_sub(u32::try_from(outstanding).unwrap_or(u32::MAX));
        let budget = n.min(unclaimed) as usize;
        if budget == 0 {
            return Ok(Vec::new());
        }

        let waiting = self
            .reader
            .retrying(|| {
                self.requests
                    .list_by_trip_and_status(trip_id, RequestStatus::WaitingList)
            })
            .await?;

        let mut promoted = Vec::with_capacity(budget);
        for request in waiting {
            if promoted.len() == budget {
                break;
            }
            match apply_transition(self.requests.as_ref(), &request, Transition::Promote, None)
                .await?
            {
                Some(updated) => promoted.push(updated),
                None => debug!(request = %request.id, "request left the waiting list concurrently"),
            }
        }
        if !promoted.is_empty() {
            self.offers
                .lock()
                .await
                .entry(trip_id)
                .or_default()
                .extend(promoted.iter().map(|r| r.id));
        }
        drop(guard);

        if !promoted.is_empty() {
            info!(
                %trip_id,
                promoted = promoted.len(),
                available_seats = trip.available_seats,
                "promoted waiting-list requests to pending"
            );
        }
        for request in &promoted {
            dispatch(
                self.notifier.as_ref(),
                CarpoolEvent::PromotedFromWaitingList {
                    request: request.id,
                    trip: trip_id,
                    passenger: request.passenger,
                },
            )
            .await;
        }
        Ok(promoted)
    }

    /// Forgets offers whose request is no longer `Pending` and counts the rest.
    ///
    /// Runs under the trip lock.
    async fn outstanding_offers(&self, trip_id: TripId) -> Result<usize> {
        if !self.offers.lock().await.contains_key(&trip_id) {
            return Ok(0);
        }
        let pending: HashSet<RequestId> = self
            .reader
            .retrying(|| {
                self.requests
                    .list_by_trip_and_status(trip_id, RequestStatus::Pending)
            })
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();

        let mut offers = self.offers.lock().await;
        let Some(open) = offers.get_mut(&trip_id) else {
            return Ok(0);
        };
        open.retain(|id| pending.contains(id));
        let count = open.len();
        if count == 0 {
            offers.remove(&trip_id);
        }
        Ok(count)
    }

    /// Drops open offers for trips that no longer take passengers.
    pub async fn forget_offers(&self, trips: impl IntoIterator<Item = TripId>) {
        let mut offers = self.offers.lock().await;
        for trip_id in trips {
            offers.remove(&trip_id);
        }
    }

    /// Promotes the oldest waiting request after a single seat was freed.
    pub async fn promote_one(&self, trip_id: TripId) -> Result<Option<ParticipationRequest>> {
        Ok(self.promote_up_to(trip_id, 1).await?.into_iter().next())
    }

    /// Promotes as many waiting requests as the trip has free seats.
    pub async fn check_waiting_list(&self, trip_id: TripId) -> Result<Vec<ParticipationRequest>> {
        let trip = self.reader.trip(trip_id).await?;
        self.promote_up_to(trip_id, trip.available_seats).await
    }
}
