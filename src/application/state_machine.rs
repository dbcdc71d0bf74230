use super::dispatch;
use super::locks::TripLocks;
use super::promoter::WaitingListPromoter;
use super::reads::StoreReader;
use super::seat_ledger::SeatLedger;
use crate::domain::events::CarpoolEvent;
use crate::domain::ids::{RequestId, TripId, UserId};
use crate::domain::location::LocationKey;
use crate::domain::ports::{
    ClockRef, LocationStoreRef, NotificationSinkRef, PassengerDirectoryRef, RequestStore,
    RequestStoreRef,
};
use crate::domain::request::{ParticipationRequest, RequestStatus, Transition};
use crate::domain::trip::TripStatus;
use crate::error::{CarpoolError, Result};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Applies `transition` to `request` as a conditional status write.
///
/// Fails with `InvalidState` when the edge does not exist from the request's
/// status. Returns `Ok(None)` when the stored status no longer matches the
/// snapshot, i.e. another caller moved the request first.
pub(crate) async fn apply_transition(
    requests: &dyn RequestStore,
    request: &ParticipationRequest,
    transition: Transition,
    reason: Option<String>,
) -> Result<Option<ParticipationRequest>> {
    let next = request.status.apply(transition).ok_or_else(|| {
        CarpoolError::InvalidState(format!(
            "cannot {transition:?} request {} in status {}",
            request.id, request.status
        ))
    })?;
    requests
        .conditional_update_status(request.id, request.status, next, reason)
        .await
}

/// Owns request status changes and keeps seat counts consistent with them.
pub struct RequestStateMachine {
    requests: RequestStoreRef,
    locations: LocationStoreRef,
    passengers: PassengerDirectoryRef,
    notifier: NotificationSinkRef,
    clock: ClockRef,
    reader: StoreReader,
    ledger: SeatLedger,
    promoter: Arc<WaitingListPromoter>,
    locks: Arc<TripLocks>,
}

/// Collaborators for [`RequestStateMachine::new`].
pub struct StateMachineParts {
    pub requests: RequestStoreRef,
    pub locations: LocationStoreRef,
    pub passengers: PassengerDirectoryRef,
    pub notifier: NotificationSinkRef,
    pub clock: ClockRef,
    pub reader: StoreReader,
    pub ledger: SeatLedger,
    pub promoter: Arc<WaitingListPromoter>,
    pub locks: Arc<TripLocks>,
}

impl RequestStateMachine {
    pub fn new(parts: StateMachineParts) -> Self {
        Self {
            requests: parts.requests,
            locations: parts.locations,
            passengers: parts.passengers,
            notifier: parts.notifier,
            clock: parts.clock,
            reader: parts.reader,
            ledger: parts.ledger,
            promoter: parts.promoter,
            locks: parts.locks,
        }
    }

    /// Opens a `Pending` request for a seat on the trip.
    pub async fn create_request(
        &self,
        trip_id: TripId,
        passenger: UserId,
        address: &str,
        postal_code: &str,
    ) -> Result<ParticipationRequest> {
        self.open(trip_id, passenger, address, postal_code, RequestStatus::Pending)
            .await
    }

    /// Puts the passenger straight onto the trip's waiting list.
    pub async fn join_waiting_list(
        &self,
        trip_id: TripId,
        passenger: UserId,
        address: &str,
        postal_code: &str,
    ) -> Result<ParticipationRequest> {
        self.open(
            trip_id,
            passenger,
            address,
            postal_code,
            RequestStatus::WaitingList,
        )
        .await
    }

    async fn open(
        &self,
        trip_id: TripId,
        passenger: UserId,
        address: &str,
        postal_code: &str,
        status: RequestStatus,
    ) -> Result<ParticipationRequest> {
        LocationKey::parse(address, postal_code)?;

        let trip = self.reader.trip(trip_id).await?;
        let known = self
            .reader
            .retrying(|| self.passengers.passenger_exists(passenger))
            .await?;
        if !known {
            return Err(CarpoolError::NotFound(format!("passenger {passenger}")));
        }
        if !trip.is_active() {
            return Err(CarpoolError::InvalidState(format!(
                "trip {trip_id} is {} and no longer takes requests",
                trip.status
            )));
        }
        let existing = self
            .reader
            .retrying(|| self.requests.find_by_trip_and_passenger(trip_id, passenger))
            .await?;
        if existing.is_some() {
            return Err(duplicate(trip_id, passenger));
        }

        let pickup = self.locations.find_or_create(address, postal_code).await?;
        let request =
            ParticipationRequest::new(trip_id, passenger, pickup.id, status, self.clock.now());
        // The existence check above is only a fast path; the insert decides.
        if !self.requests.insert_unique(request.clone()).await? {
            return Err(duplicate(trip_id, passenger));
        }

        info!(%trip_id, %passenger, request = %request.id, %status, "participation request created");
        Ok(request)
    }

    /// Accepts a pending request, taking one seat.
    ///
    /// Accepts for one trip run one at a time under the trip lock. When this
    /// takes the last seat, every other pending request for the trip is moved
    /// to the waiting list before the lock is released.
    pub async fn accept(&self, request_id: RequestId) -> Result<ParticipationRequest> {
        let trip_id = self.reader.request(request_id).await?.trip;
        let guard = self.locks.lock(trip_id).await;

        let request = self.reader.request(request_id).await?;
        if request.status.apply(Transition::Accept).is_none() {
            return Err(CarpoolError::InvalidState(format!(
                "only pending requests can be accepted; request {request_id} is {}",
                request.status
            )));
        }
        let trip = self.reader.trip(trip_id).await?;
        if !trip.is_active() {
            return Err(CarpoolError::InvalidState(format!(
                "trip {trip_id} is {}",
                trip.status
            )));
        }

        let Some(remaining) = self.ledger.reserve(trip_id).await? else {
            return Err(CarpoolError::InvalidState("no seats available".to_string()));
        };

        let accepted =
            match apply_transition(self.requests.as_ref(), &request, Transition::Accept, None).await
            {
                Ok(Some(accepted)) => accepted,
                Ok(None) => {
                    self.undo_reservation(trip_id).await;
                    return Err(CarpoolError::InvalidState(format!(
                        "request {request_id} changed while it was being accepted"
                    )));
                }
                Err(err) => {
                    self.undo_reservation(trip_id).await;
                    return Err(err);
                }
            };
        info!(%trip_id, request = %request_id, remaining, "request accepted");

        if remaining == 0
            && let Err(err) = self.waitlist_remaining_pending(trip_id, accepted.id).await
        {
            warn!(%trip_id, error = %err, "could not move pending requests to the waiting list");
        }
        drop(guard);

        dispatch(
            self.notifier.as_ref(),
            CarpoolEvent::RequestAccepted {
                request: accepted.id,
                trip: accepted.trip,
                passenger: accepted.passenger,
            },
        )
        .await;
        Ok(accepted)
    }

    async fn undo_reservation(&self, trip_id: TripId) {
        match self.ledger.release(trip_id).await {
            Ok(available) => warn!(%trip_id, available, "rolled back seat reservation"),
            Err(err) => {
                error!(%trip_id, error = %err, "failed to roll back seat reservation")
            }
        }
    }

    /// Runs with the trip lock held by `accept`.
    async fn waitlist_remaining_pending(&self, trip_id: TripId, accepted: RequestId) -> Result<()> {
        // A cancellation may have freed a seat since the reservation.
        if self.ledger.available(trip_id).await? > 0 {
            return Ok(());
        }
        let pending = self
            .reader
            .retrying(|| {
                self.requests
                    .list_by_trip_and_status(trip_id, RequestStatus::Pending)
            })
            .await?;

        let mut moved = 0usize;
        for request in pending.iter().filter(|r| r.id != accepted) {
            match apply_transition(self.requests.as_ref(), request, Transition::Demote, None).await?
            {
                Some(_) => moved += 1,
                None => debug!(request = %request.id, "pending request changed before demotion"),
            }
        }
        if moved > 0 {
            info!(%trip_id, moved, "trip is full, pending requests moved to the waiting list");
        }
        Ok(())
    }

    /// Rejects a pending request. Never touches seats.
    pub async fn reject(&self, request_id: RequestId, reason: &str) -> Result<ParticipationRequest> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(CarpoolError::InvalidState(
                "a rejection reason is required".to_string(),
            ));
        }
        let request = self.reader.request(request_id).await?;
        self.ensure_not_cancelled(request.trip).await?;
        let rejected = apply_transition(
            self.requests.as_ref(),
            &request,
            Transition::Reject,
            Some(reason.to_string()),
        )
        .await?
        .ok_or_else(|| concurrent_change(request_id))?;

        info!(trip = %rejected.trip, request = %request_id, %reason, "request rejected");
        dispatch(
            self.notifier.as_ref(),
            CarpoolEvent::RequestRejected {
                request: rejected.id,
                trip: rejected.trip,
                passenger: rejected.passenger,
                reason: reason.to_string(),
            },
        )
        .await;
        Ok(rejected)
    }

    /// Cancels an accepted request on the passenger's behalf, frees the seat
    /// and offers it to the oldest waiting passenger.
    ///
    /// The seat is released first, under the trip lock, and taken back if
    /// the status write does not go through; a failed call leaves the request
    /// `Accepted` with its seat so it can simply be retried.
    pub async fn cancel_by_passenger(&self, request_id: RequestId) -> Result<ParticipationRequest> {
        let trip_id = self.reader.request(request_id).await?.trip;
        let guard = self.locks.lock(trip_id).await;

        let request = self.reader.request(request_id).await?;
        if request.status != RequestStatus::Accepted {
            return Err(CarpoolError::InvalidState(format!(
                "only accepted requests can be cancelled; request {request_id} is {}",
                request.status
            )));
        }
        self.ensure_not_cancelled(trip_id).await?;

        let available = self.ledger.release(trip_id).await?;
        let cancelled = match apply_transition(
            self.requests.as_ref(),
            &request,
            Transition::CancelByPassenger,
            None,
        )
        .await
        {
            Ok(Some(cancelled)) => cancelled,
            Ok(None) => {
                self.undo_release(trip_id).await;
                return Err(concurrent_change(request_id));
            }
            Err(err) => {
                self.undo_release(trip_id).await;
                return Err(err);
            }
        };
        drop(guard);
        info!(%trip_id, request = %request_id, available, "passenger cancelled");

        dispatch(
            self.notifier.as_ref(),
            CarpoolEvent::RequestCancelled {
                request: cancelled.id,
                trip: cancelled.trip,
                passenger: cancelled.passenger,
            },
        )
        .await;

        // The periodic sweep picks this up again if it fails here.
        if let Err(err) = self.promoter.promote_one(trip_id).await {
            warn!(%trip_id, error = %err, "waiting-list promotion after cancellation failed");
        }
        Ok(cancelled)
    }

    async fn undo_release(&self, trip_id: TripId) {
        match self.ledger.reclaim(trip_id).await {
            Ok(Some(available)) => warn!(%trip_id, available, "rolled back seat release"),
            Ok(None) => error!(%trip_id, "released seat was taken before it could be reclaimed"),
            Err(err) => error!(%trip_id, error = %err, "failed to roll back seat release"),
        }
    }
}

impl RequestStateMachine {
    /// Requests on a cancelled trip only move through the cancellation cascade.
    async fn ensure_not_cancelled(&self, trip_id: TripId) -> Result<()> {
        let trip = self.reader.trip(trip_id).await?;
        if trip.status == TripStatus::Cancelled {
            return Err(CarpoolError::InvalidState(format!(
                "trip {trip_id} was cancelled by its driver"
            )));
        }
        Ok(())
    }
}

fn duplicate(trip_id: TripId, passenger: UserId) -> CarpoolError {
    CarpoolError::Conflict(format!(
        "passenger {passenger} already has a request for trip {trip_id}"
    ))
}

fn concurrent_change(request_id: RequestId) -> CarpoolError {
    CarpoolError::InvalidState(format!("request {request_id} was changed concurrently"))
}
