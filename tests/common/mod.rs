#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hopmate::application::engine::{CarpoolEngine, CarpoolServices};
use hopmate::config::EngineConfig;
use hopmate::domain::events::CarpoolEvent;
use hopmate::domain::ids::{RequestId, TripId, UserId};
use hopmate::domain::ports::{
    NotificationSink, NotificationSinkRef, RequestStore, RequestStoreRef, TripStore, TripStoreRef,
};
use hopmate::domain::request::{ParticipationRequest, RequestStatus};
use hopmate::domain::trip::{Trip, TripStatus};
use hopmate::error::{CarpoolError, Result};
use hopmate::infrastructure::clock::SteppingClock;
use hopmate::infrastructure::in_memory::{
    InMemoryLocationStore, InMemoryPassengerDirectory, InMemoryPenaltyLedger,
    InMemoryRequestStore, InMemoryTripStore,
};
use hopmate::infrastructure::notify::ChannelNotifier;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;

pub const ADDRESS: &str = "Rua Augusta 10";
pub const POSTAL_CODE: &str = "1100-053";

pub fn test_config() -> EngineConfig {
    EngineConfig {
        read_retries: 3,
        retry_backoff: std::time::Duration::from_millis(1),
        sweep_interval: std::time::Duration::from_millis(20),
    }
}

/// An engine over in-memory stores, with handles to inspect them.
pub struct Harness {
    pub engine: Arc<CarpoolEngine>,
    pub trips: InMemoryTripStore,
    pub requests: InMemoryRequestStore,
    pub passengers: InMemoryPassengerDirectory,
    pub penalties: InMemoryPenaltyLedger,
    /// Sits between the engine and `trips`; injects nothing until asked.
    pub trip_faults: Arc<FlakyTripStore>,
    pub events: mpsc::UnboundedReceiver<CarpoolEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(|requests| requests, None)
    }

    /// Puts `wrap` between the engine and the request store.
    pub fn with_request_store(wrap: impl FnOnce(RequestStoreRef) -> RequestStoreRef) -> Self {
        Self::build(wrap, None)
    }

    pub fn flaky() -> (Self, Arc<FlakyRequestStore>) {
        let mut handle = None;
        let harness = Self::with_request_store(|inner| {
            let flaky = Arc::new(FlakyRequestStore::new(inner));
            handle = Some(flaky.clone());
            flaky as RequestStoreRef
        });
        let flaky = handle.expect("wrapper is installed during build");
        (harness, flaky)
    }

    pub fn with_notifier(notifier: NotificationSinkRef) -> Self {
        Self::build(|requests| requests, Some(notifier))
    }

    fn build(
        wrap: impl FnOnce(RequestStoreRef) -> RequestStoreRef,
        notifier: Option<NotificationSinkRef>,
    ) -> Self {
        let trips = InMemoryTripStore::new();
        let requests = InMemoryRequestStore::new();
        let passengers = InMemoryPassengerDirectory::new();
        let penalties = InMemoryPenaltyLedger::new();
        let (channel, events) = ChannelNotifier::channel();
        let notifier = notifier.unwrap_or_else(|| Arc::new(channel) as NotificationSinkRef);
        let trip_faults = Arc::new(FlakyTripStore::new(Arc::new(trips.clone())));

        let services = CarpoolServices {
            trips: trip_faults.clone() as TripStoreRef,
            requests: wrap(Arc::new(requests.clone())),
            locations: Arc::new(InMemoryLocationStore::new()),
            passengers: Arc::new(passengers.clone()),
            notifier,
            penalties: Arc::new(penalties.clone()),
            clock: Arc::new(SteppingClock::new(Utc::now(), Duration::seconds(1))),
        };

        Self {
            engine: Arc::new(CarpoolEngine::new(services, test_config())),
            trips,
            requests,
            passengers,
            penalties,
            trip_faults,
            events,
        }
    }

    pub async fn trip(&self, seats: u32) -> (Trip, UserId) {
        let driver = UserId::new();
        let departure = Utc::now() + Duration::days(1);
        let trip = self
            .engine
            .create_trip(driver, departure, departure + Duration::hours(2), seats)
            .await
            .expect("trip should be created");
        (trip, driver)
    }

    pub async fn passenger(&self) -> UserId {
        let user = UserId::new();
        self.passengers.register(user).await;
        user
    }

    pub async fn pending(&self, trip: TripId) -> ParticipationRequest {
        let passenger = self.passenger().await;
        self.engine
            .create_request(trip, passenger, ADDRESS, POSTAL_CODE)
            .await
            .expect("request should be created")
    }

    pub async fn waiting(&self, trip: TripId) -> ParticipationRequest {
        let passenger = self.passenger().await;
        self.engine
            .join_waiting_list(trip, passenger, ADDRESS, POSTAL_CODE)
            .await
            .expect("waiting-list entry should be created")
    }

    pub async fn status(&self, request: RequestId) -> RequestStatus {
        self.engine.get_request(request).await.unwrap().status
    }

    pub async fn seats(&self, trip: TripId) -> u32 {
        self.engine.get_trip(trip).await.unwrap().available_seats
    }

    pub fn drain_events(&mut self) -> Vec<CarpoolEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}

/// A notification sink that is always down.
pub struct FailingNotifier;

#[async_trait]
impl NotificationSink for FailingNotifier {
    async fn notify(&self, _event: CarpoolEvent) -> Result<()> {
        Err(CarpoolError::store("smtp relay unreachable"))
    }
}

/// Wraps a request store and injects faults on demand.
pub struct FlakyRequestStore {
    inner: RequestStoreRef,
    failing_reads: AtomicU32,
    failing_lists: AtomicU32,
    failing_updates: AtomicU32,
    stale_updates: AtomicU32,
}

impl FlakyRequestStore {
    pub fn new(inner: RequestStoreRef) -> Self {
        Self {
            inner,
            failing_reads: AtomicU32::new(0),
            failing_lists: AtomicU32::new(0),
            failing_updates: AtomicU32::new(0),
            stale_updates: AtomicU32::new(0),
        }
    }

    /// The next `n` lookups by id fail with a transient error.
    pub fn fail_reads(&self, n: u32) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    /// The next `n` listings by trip and status fail with a transient error.
    pub fn fail_lists(&self, n: u32) {
        self.failing_lists.store(n, Ordering::SeqCst);
    }

    /// The next `n` status updates fail with a transient error.
    pub fn fail_updates(&self, n: u32) {
        self.failing_updates.store(n, Ordering::SeqCst);
    }

    /// The next `n` status updates behave as if another caller won the race.
    pub fn lose_updates(&self, n: u32) {
        self.stale_updates.store(n, Ordering::SeqCst);
    }
}

fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl RequestStore for FlakyRequestStore {
    async fn insert_unique(&self, request: ParticipationRequest) -> Result<bool> {
        self.inner.insert_unique(request).await
    }

    async fn find_by_trip_and_passenger(
        &self,
        trip_id: TripId,
        passenger: UserId,
    ) -> Result<Option<ParticipationRequest>> {
        self.inner.find_by_trip_and_passenger(trip_id, passenger).await
    }

    async fn get_by_id(&self, request_id: RequestId) -> Result<Option<ParticipationRequest>> {
        if take(&self.failing_reads) {
            return Err(CarpoolError::store("read timed out"));
        }
        self.inner.get_by_id(request_id).await
    }

    async fn list_by_trip_and_status(
        &self,
        trip_id: TripId,
        status: RequestStatus,
    ) -> Result<Vec<ParticipationRequest>> {
        if take(&self.failing_lists) {
            return Err(CarpoolError::store("list timed out"));
        }
        self.inner.list_by_trip_and_status(trip_id, status).await
    }

    async fn list_by_trip(&self, trip_id: TripId) -> Result<Vec<ParticipationRequest>> {
        self.inner.list_by_trip(trip_id).await
    }

    async fn list_by_passenger(&self, passenger: UserId) -> Result<Vec<ParticipationRequest>> {
        self.inner.list_by_passenger(passenger).await
    }

    async fn conditional_update_status(
        &self,
        request_id: RequestId,
        expected: RequestStatus,
        new: RequestStatus,
        reason: Option<String>,
    ) -> Result<Option<ParticipationRequest>> {
        if take(&self.failing_updates) {
            return Err(CarpoolError::store("write timed out"));
        }
        if take(&self.stale_updates) {
            return Ok(None);
        }
        self.inner
            .conditional_update_status(request_id, expected, new, reason)
            .await
    }
}

/// Wraps a trip store and injects faults into seat writes on demand.
pub struct FlakyTripStore {
    inner: TripStoreRef,
    failing_seat_writes: AtomicU32,
}

impl FlakyTripStore {
    pub fn new(inner: TripStoreRef) -> Self {
        Self {
            inner,
            failing_seat_writes: AtomicU32::new(0),
        }
    }

    /// The next `n` seat-count writes fail with a transient error.
    pub fn fail_seat_writes(&self, n: u32) {
        self.failing_seat_writes.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl TripStore for FlakyTripStore {
    async fn insert_trip(&self, trip: Trip) -> Result<()> {
        self.inner.insert_trip(trip).await
    }

    async fn get_trip(&self, trip_id: TripId) -> Result<Option<Trip>> {
        self.inner.get_trip(trip_id).await
    }

    async fn list_trips(&self) -> Result<Vec<Trip>> {
        self.inner.list_trips().await
    }

    async fn conditional_update_seats(&self, trip_id: TripId, expected: u32, new: u32) -> Result<bool> {
        if take(&self.failing_seat_writes) {
            return Err(CarpoolError::store("seat write timed out"));
        }
        self.inner.conditional_update_seats(trip_id, expected, new).await
    }

    async fn set_trip_status(
        &self,
        trip_id: TripId,
        expected: TripStatus,
        new: TripStatus,
    ) -> Result<bool> {
        self.inner.set_trip_status(trip_id, expected, new).await
    }
}

pub fn in_days(days: i64) -> DateTime<Utc> {
    Utc::now() + Duration::days(days)
}
