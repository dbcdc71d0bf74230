use super::dispatch;
use super::reads::StoreReader;
use super::state_machine::apply_transition;
use crate::domain::events::{CarpoolEvent, Penalty};
use crate::domain::ids::{TripId, UserId};
use crate::domain::ports::{NotificationSinkRef, PenaltySinkRef, RequestStoreRef, TripStoreRef};
use crate::domain::request::{ParticipationRequest, RequestStatus, Transition};
use crate::domain::trip::TripStatus;
use crate::error::{CarpoolError, Result};
use tracing::{debug, info, warn};

/// Attempts per request before the cascade reports it as not updated.
const CLOSE_ATTEMPTS: u32 = 3;

/// Result of a driver cancelling a trip.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CancellationOutcome {
    /// Pending or accepted requests closed by this call.
    pub affected_count: usize,
    /// Waiting-list requests closed by this call. Not counted as affected.
    pub waitlist_closed: usize,
    pub penalty_applied: bool,
    /// Passengers whose request could not be closed. Calling
    /// `cancel_trip` again finishes them.
    pub failed_passengers: Vec<UserId>,
}

impl CancellationOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed_passengers.is_empty()
    }
}

/// Cascades a driver's trip cancellation over every open request.
pub struct TripCancellationCoordinator {
    trips: TripStoreRef,
    requests: RequestStoreRef,
    penalties: PenaltySinkRef,
    notifier: NotificationSinkRef,
    reader: StoreReader,
}

impl TripCancellationCoordinator {
    pub fn new(
        trips: TripStoreRef,
        requests: RequestStoreRef,
        penalties: PenaltySinkRef,
        notifier: NotificationSinkRef,
        reader: StoreReader,
    ) -> Self {
        Self {
            trips,
            requests,
            penalties,
            notifier,
            reader,
        }
    }

    /// Cancels the trip for its driver.
    ///
    /// Safe to call again: on an already-cancelled trip it only closes the
    /// requests a previous call left open. The penalty sink records at most
    /// one penalty per trip, so a retry charges the driver only if an earlier
    /// call failed before it could.
    pub async fn cancel_trip(&self, trip_id: TripId, driver: UserId) -> Result<CancellationOutcome> {
        let trip = self.reader.trip(trip_id).await?;
        if trip.driver != driver {
            return Err(CarpoolError::Authorization(format!(
                "only the trip's driver can cancel trip {trip_id}"
            )));
        }

        let first_cancellation = match trip.status {
            TripStatus::Cancelled => false,
            status if status.is_cancellable() => {
                if self
                    .trips
                    .set_trip_status(trip_id, status, TripStatus::Cancelled)
                    .await?
                {
                    true
                } else {
                    // Someone else changed the status between our read and write.
                    let current = self.reader.trip(trip_id).await?;
                    if current.status != TripStatus::Cancelled {
                        return Err(CarpoolError::InvalidState(format!(
                            "trip {trip_id} changed to {} while cancelling",
                            current.status
                        )));
                    }
                    false
                }
            }
            status => {
                return Err(CarpoolError::InvalidState(format!(
                    "trip {trip_id} is {status} and cannot be cancelled"
                )));
            }
        };
        if first_cancellation {
            info!(%trip_id, %driver, "trip cancelled by driver");
        }

        let mut booked = self.open_requests(trip_id, RequestStatus::Pending).await?;
        booked.extend(self.open_requests(trip_id, RequestStatus::Accepted).await?);
        let waiting = self
            .open_requests(trip_id, RequestStatus::WaitingList)
            .await?;

        let mut outcome = CancellationOutcome::default();
        if booked.is_empty() && waiting.is_empty() {
            return Ok(outcome);
        }

        if !booked.is_empty() {
            let penalty = Penalty::trip_cancellation(driver, trip_id);
            match self.penalties.add_penalty(penalty).await {
                Ok(charged) => outcome.penalty_applied = charged,
                Err(err) => warn!(%trip_id, %driver, error = %err, "failed to record driver penalty"),
            }
        }

        for request in &booked {
            match self.close(request).await {
                Ok(true) => outcome.affected_count += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(%trip_id, passenger = %request.passenger, error = %err, "could not close request");
                    outcome.failed_passengers.push(request.passenger);
                }
            }
        }
        for request in &waiting {
            match self.close(request).await {
                Ok(true) => outcome.waitlist_closed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(%trip_id, passenger = %request.passenger, error = %err, "could not close waiting-list request");
                    outcome.failed_passengers.push(request.passenger);
                }
            }
        }

        info!(
            %trip_id,
            affected = outcome.affected_count,
            waitlist_closed = outcome.waitlist_closed,
            penalty = outcome.penalty_applied,
            failed = outcome.failed_passengers.len(),
            "trip cancellation cascade finished"
        );
        Ok(outcome)
    }

    async fn open_requests(
        &self,
        trip_id: TripId,
        status: RequestStatus,
    ) -> Result<Vec<ParticipationRequest>> {
        self.reader
            .retrying(|| self.requests.list_by_trip_and_status(trip_id, status))
            .await
    }

    /// Moves one request to `DriverCancelled`. Returns `false` if it had
    /// already reached a terminal status.
    async fn close(&self, request: &ParticipationRequest) -> Result<bool> {
        let mut snapshot = request.clone();
        for _ in 0..CLOSE_ATTEMPTS {
            if snapshot.status.is_terminal() {
                return Ok(false);
            }
            if let Some(closed) = apply_transition(
                self.requests.as_ref(),
                &snapshot,
                Transition::DriverCancel,
                None,
            )
            .await?
            {
                dispatch(
                    self.notifier.as_ref(),
                    CarpoolEvent::TripCancelledByDriver {
                        request: closed.id,
                        trip: closed.trip,
                        passenger: closed.passenger,
                    },
                )
                .await;
                return Ok(true);
            }
            debug!(request = %snapshot.id, "request moved during cascade, re-reading");
            snapshot = self.reader.request(snapshot.id).await?;
        }
        Err(CarpoolError::store(format!(
            "request {} kept changing during trip cancellation",
            request.id
        )))
    }
}
