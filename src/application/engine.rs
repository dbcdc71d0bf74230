use super::cancellation::{CancellationOutcome, TripCancellationCoordinator};
use super::locks::TripLocks;
use super::promoter::WaitingListPromoter;
use super::reads::StoreReader;
use super::seat_ledger::SeatLedger;
use super::state_machine::{RequestStateMachine, StateMachineParts};
use super::sweeper::WaitingListSweeper;
use crate::config::EngineConfig;
use crate::domain::ids::{RequestId, TripId, UserId};
use crate::domain::ports::{
    ClockRef, LocationStoreRef, NotificationSinkRef, PassengerDirectoryRef, PenaltySinkRef,
    RequestStoreRef, TripStoreRef,
};
use crate::domain::request::{ParticipationRequest, RequestStatus};
use crate::domain::trip::{Trip, TripStatus};
use crate::error::{CarpoolError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// The external collaborators the engine runs against.
#[derive(Clone)]
pub struct CarpoolServices {
    pub trips: TripStoreRef,
    pub requests: RequestStoreRef,
    pub locations: LocationStoreRef,
    pub passengers: PassengerDirectoryRef,
    pub notifier: NotificationSinkRef,
    pub penalties: PenaltySinkRef,
    pub clock: ClockRef,
}

/// Basic filters for listing bookable trips.
#[derive(Debug, Clone)]
pub struct TripFilter {
    pub min_seats: u32,
    /// Only trips departing on this (UTC) date.
    pub date: Option<NaiveDate>,
}

impl Default for TripFilter {
    fn default() -> Self {
        Self {
            min_seats: 1,
            date: None,
        }
    }
}

/// The main entry point for the carpool core.
///
/// `CarpoolEngine` is cheap to share behind an `Arc`; every operation is
/// safe to call concurrently from independent tasks.
pub struct CarpoolEngine {
    trips: TripStoreRef,
    requests: RequestStoreRef,
    clock: ClockRef,
    config: EngineConfig,
    reader: StoreReader,
    state_machine: RequestStateMachine,
    promoter: Arc<WaitingListPromoter>,
    coordinator: TripCancellationCoordinator,
}

impl CarpoolEngine {
    /// Creates a new `CarpoolEngine` over the given collaborators.
    pub fn new(services: CarpoolServices, config: EngineConfig) -> Self {
        let reader = StoreReader::new(services.trips.clone(), services.requests.clone(), &config);
        let locks = Arc::new(TripLocks::new());
        let ledger = SeatLedger::new(services.trips.clone(), reader.clone());
        let promoter = Arc::new(WaitingListPromoter::new(
            services.requests.clone(),
            services.notifier.clone(),
            reader.clone(),
            locks.clone(),
        ));
        let state_machine = RequestStateMachine::new(StateMachineParts {
            requests: services.requests.clone(),
            locations: services.locations,
            passengers: services.passengers,
            notifier: services.notifier.clone(),
            clock: services.clock.clone(),
            reader: reader.clone(),
            ledger,
            promoter: promoter.clone(),
            locks,
        });
        let coordinator = TripCancellationCoordinator::new(
            services.trips.clone(),
            services.requests.clone(),
            services.penalties,
            services.notifier,
            reader.clone(),
        );

        Self {
            trips: services.trips,
            requests: services.requests,
            clock: services.clock,
            config,
            reader,
            state_machine,
            promoter,
            coordinator,
        }
    }

    /// A sweeper sharing this engine's promotion path, ready to `spawn`.
    pub fn sweeper(&self) -> WaitingListSweeper {
        WaitingListSweeper::new(
            self.trips.clone(),
            self.promoter.clone(),
            self.config.sweep_interval,
        )
    }

    pub async fn create_trip(
        &self,
        driver: UserId,
        departure: DateTime<Utc>,
        arrival: DateTime<Utc>,
        seats: u32,
    ) -> Result<Trip> {
        self.publish_trip(Trip::new(driver, departure, arrival, seats))
            .await
    }

    /// Stores an already-built trip, e.g. one carrying an externally chosen id.
    pub async fn publish_trip(&self, trip: Trip) -> Result<Trip> {
        if trip.arrival < trip.departure {
            return Err(CarpoolError::Validation(
                "arrival must not be before departure".to_string(),
            ));
        }
        if trip.available_seats > trip.capacity || trip.status != TripStatus::Active {
            return Err(CarpoolError::Validation(format!(
                "trip {} must be published active with at most {} free seats",
                trip.id, trip.capacity
            )));
        }
        if self.trips.get_trip(trip.id).await?.is_some() {
            return Err(CarpoolError::Conflict(format!("trip {} already exists", trip.id)));
        }
        let driver = trip.driver;
        let seats = trip.available_seats;
        self.trips.insert_trip(trip.clone()).await?;
        info!(trip = %trip.id, %driver, seats, "trip published");

        if let Err(err) = self.promoter.check_waiting_list(trip.id).await {
            warn!(trip = %trip.id, error = %err, "waiting-list check after publishing failed");
        }
        Ok(trip)
    }

    /// Marks an active trip as under way.
    pub async fn start_trip(&self, trip_id: TripId, driver: UserId) -> Result<Trip> {
        self.advance_trip(trip_id, driver, TripStatus::Active, TripStatus::InProgress)
            .await
    }

    /// Marks a trip that is under way as completed.
    pub async fn complete_trip(&self, trip_id: TripId, driver: UserId) -> Result<Trip> {
        self.advance_trip(trip_id, driver, TripStatus::InProgress, TripStatus::Completed)
            .await
    }

    async fn advance_trip(
        &self,
        trip_id: TripId,
        driver: UserId,
        from: TripStatus,
        to: TripStatus,
    ) -> Result<Trip> {
        let trip = self.reader.trip(trip_id).await?;
        if trip.driver != driver {
            return Err(CarpoolError::Authorization(format!(
                "only the trip's driver can change trip {trip_id}"
            )));
        }
        if trip.status != from || !self.trips.set_trip_status(trip_id, from, to).await? {
            return Err(CarpoolError::InvalidState(format!(
                "trip {trip_id} must be {from} to become {to}"
            )));
        }
        info!(%trip_id, %from, %to, "trip status changed");
        self.reader.trip(trip_id).await
    }

    pub async fn create_request(
        &self,
        trip_id: TripId,
        passenger: UserId,
        address: &str,
        postal_code: &str,
    ) -> Result<ParticipationRequest> {
        self.state_machine
            .create_request(trip_id, passenger, address, postal_code)
            .await
    }

    pub async fn join_waiting_list(
        &self,
        trip_id: TripId,
        passenger: UserId,
        address: &str,
        postal_code: &str,
    ) -> Result<ParticipationRequest> {
        self.state_machine
            .join_waiting_list(trip_id, passenger, address, postal_code)
            .await
    }

    pub async fn accept(&self, request_id: RequestId) -> Result<ParticipationRequest> {
        self.state_machine.accept(request_id).await
    }

    pub async fn reject(&self, request_id: RequestId, reason: &str) -> Result<ParticipationRequest> {
        self.state_machine.reject(request_id, reason).await
    }

    pub async fn cancel_by_passenger(&self, request_id: RequestId) -> Result<ParticipationRequest> {
        self.state_machine.cancel_by_passenger(request_id).await
    }

    /// Promotes waiting passengers into free seats; returns the promoted requests.
    pub async fn check_waiting_list(&self, trip_id: TripId) -> Result<Vec<ParticipationRequest>> {
        self.promoter.check_waiting_list(trip_id).await
    }

    /// Promotes the oldest waiting request if a seat is unclaimed.
    pub async fn promote_one(&self, trip_id: TripId) -> Result<Option<ParticipationRequest>> {
        self.promoter.promote_one(trip_id).await
    }

    pub async fn cancel_trip(&self, trip_id: TripId, driver: UserId) -> Result<CancellationOutcome> {
        self.coordinator.cancel_trip(trip_id, driver).await
    }

    pub async fn get_trip(&self, trip_id: TripId) -> Result<Trip> {
        self.reader.trip(trip_id).await
    }

    pub async fn has_available_seats(&self, trip_id: TripId) -> Result<bool> {
        Ok(self.reader.trip(trip_id).await?.available_seats > 0)
    }

    pub async fn get_request(&self, request_id: RequestId) -> Result<ParticipationRequest> {
        self.reader.request(request_id).await
    }

    pub async fn find_request(
        &self,
        trip_id: TripId,
        passenger: UserId,
    ) -> Result<ParticipationRequest> {
        self.reader
            .retrying(|| self.requests.find_by_trip_and_passenger(trip_id, passenger))
            .await?
            .ok_or_else(|| {
                CarpoolError::NotFound(format!(
                    "request by passenger {passenger} for trip {trip_id}"
                ))
            })
    }

    pub async fn requests_for_trip(&self, trip_id: TripId) -> Result<Vec<ParticipationRequest>> {
        self.reader.trip(trip_id).await?;
        self.reader
            .retrying(|| self.requests.list_by_trip(trip_id))
            .await
    }

    pub async fn requests_for_passenger(
        &self,
        passenger: UserId,
    ) -> Result<Vec<ParticipationRequest>> {
        self.reader
            .retrying(|| self.requests.list_by_passenger(passenger))
            .await
    }

    /// Pending requests across all of the driver's trips, oldest first.
    pub async fn pending_requests_for_driver(
        &self,
        driver: UserId,
    ) -> Result<Vec<ParticipationRequest>> {
        let trips = self.reader.retrying(|| self.trips.list_trips()).await?;
        let mut pending = Vec::new();
        for trip in trips.iter().filter(|t| t.driver == driver) {
            let found = self
                .reader
                .retrying(|| {
                    self.requests
                        .list_by_trip_and_status(trip.id, RequestStatus::Pending)
                })
                .await?;
            pending.extend(found);
        }
        pending.sort_by_key(|r| (r.request_date, r.id));
        Ok(pending)
    }

    /// Active trips that have not left yet, soonest departure first.
    pub async fn available_trips(&self, filter: &TripFilter) -> Result<Vec<Trip>> {
        let now = self.clock.now();
        let trips = self.reader.retrying(|| self.trips.list_trips()).await?;
        let mut open: Vec<Trip> = trips
            .into_iter()
            .filter(|t| t.is_active() && t.departure > now)
            .filter(|t| t.available_seats >= filter.min_seats)
            .filter(|t| filter.date.is_none_or(|d| t.departure.date_naive() == d))
            .collect();
        open.sort_by_key(|t| t.departure);
        Ok(open)
    }

    /// Every trip with its requests, for reporting.
    pub async fn snapshot(&self) -> Result<Vec<(Trip, Vec<ParticipationRequest>)>> {
        let trips = self.reader.retrying(|| self.trips.list_trips()).await?;
        let mut report = Vec::with_capacity(trips.len());
        for trip in trips {
            let requests = self
                .reader
                .retrying(|| self.requests.list_by_trip(trip.id))
                .await?;
            report.push((trip, requests));
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::SteppingClock;
    use crate::infrastructure::in_memory::{
        InMemoryLocationStore, InMemoryPassengerDirectory, InMemoryPenaltyLedger,
        InMemoryRequestStore, InMemoryTripStore,
    };
    use crate::infrastructure::notify::LogNotifier;
    use chrono::Duration;

    fn engine() -> (CarpoolEngine, InMemoryPassengerDirectory) {
        let passengers = InMemoryPassengerDirectory::new();
        let services = CarpoolServices {
            trips: Arc::new(InMemoryTripStore::new()),
            requests: Arc::new(InMemoryRequestStore::new()),
            locations: Arc::new(InMemoryLocationStore::new()),
            passengers: Arc::new(passengers.clone()),
            notifier: Arc::new(LogNotifier),
            penalties: Arc::new(InMemoryPenaltyLedger::new()),
            clock: Arc::new(SteppingClock::default()),
        };
        (CarpoolEngine::new(services, EngineConfig::default()), passengers)
    }

    fn in_hours(hours: i64) -> DateTime<Utc> {
        Utc::now() + Duration::hours(hours)
    }

    #[tokio::test]
    async fn test_create_trip_rejects_arrival_before_departure() {
        let (engine, _) = engine();
        let err = engine
            .create_trip(UserId::new(), in_hours(3), in_hours(2), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, CarpoolError::Validation(_)));
    }

    #[tokio::test]
    async fn test_trip_lifecycle_requires_driver_and_order() {
        let (engine, _) = engine();
        let driver = UserId::new();
        let trip = engine
            .create_trip(driver, in_hours(1), in_hours(2), 3)
            .await
            .unwrap();

        let err = engine.complete_trip(trip.id, driver).await.unwrap_err();
        assert!(matches!(err, CarpoolError::InvalidState(_)));
        let err = engine.start_trip(trip.id, UserId::new()).await.unwrap_err();
        assert!(matches!(err, CarpoolError::Authorization(_)));

        let started = engine.start_trip(trip.id, driver).await.unwrap();
        assert_eq!(started.status, TripStatus::InProgress);
        let done = engine.complete_trip(trip.id, driver).await.unwrap();
        assert_eq!(done.status, TripStatus::Completed);

        let err = engine.cancel_trip(trip.id, driver).await.unwrap_err();
        assert!(matches!(err, CarpoolError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_available_trips_filters_and_orders() {
        let (engine, _) = engine();
        let driver = UserId::new();
        let later = engine
            .create_trip(driver, in_hours(48), in_hours(49), 2)
            .await
            .unwrap();
        let sooner = engine
            .create_trip(driver, in_hours(5), in_hours(6), 1)
            .await
            .unwrap();
        let cancelled = engine
            .create_trip(driver, in_hours(6), in_hours(7), 4)
            .await
            .unwrap();
        engine.cancel_trip(cancelled.id, driver).await.unwrap();
        engine
            .create_trip(driver, in_hours(-2), in_hours(-1), 4)
            .await
            .unwrap();

        let open = engine.available_trips(&TripFilter::default()).await.unwrap();
        let ids: Vec<TripId> = open.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![sooner.id, later.id]);

        let roomy = TripFilter {
            min_seats: 2,
            date: None,
        };
        let open = engine.available_trips(&roomy).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, later.id);

        let on_day = TripFilter {
            min_seats: 1,
            date: Some(later.departure.date_naive()),
        };
        let open = engine.available_trips(&on_day).await.unwrap();
        assert!(open.iter().all(|t| t.departure.date_naive() == later.departure.date_naive()));
        assert!(open.iter().any(|t| t.id == later.id));
    }

    #[tokio::test]
    async fn test_request_queries() {
        let (engine, passengers) = engine();
        let driver = UserId::new();
        let rider = UserId::new();
        passengers.register(rider).await;
        let first = engine
            .create_trip(driver, in_hours(1), in_hours(2), 2)
            .await
            .unwrap();
        let second = engine
            .create_trip(driver, in_hours(3), in_hours(4), 2)
            .await
            .unwrap();

        let a = engine
            .create_request(first.id, rider, "1 Main St", "1000-001")
            .await
            .unwrap();
        let b = engine
            .create_request(second.id, rider, "1 Main St", "1000-001")
            .await
            .unwrap();
        engine.accept(b.id).await.unwrap();

        assert!(engine.has_available_seats(first.id).await.unwrap());
        assert_eq!(engine.get_request(a.id).await.unwrap().status, RequestStatus::Pending);
        assert_eq!(engine.find_request(second.id, rider).await.unwrap().id, b.id);
        assert_eq!(engine.requests_for_passenger(rider).await.unwrap().len(), 2);
        assert_eq!(engine.requests_for_trip(first.id).await.unwrap().len(), 1);

        let pending = engine.pending_requests_for_driver(driver).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, a.id);

        let err = engine.requests_for_trip(TripId::new()).await.unwrap_err();
        assert!(matches!(err, CarpoolError::NotFound(_)));
    }
}
