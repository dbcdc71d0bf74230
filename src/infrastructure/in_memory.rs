use crate::domain::events::Penalty;
use crate::domain::ids::{RequestId, TripId, UserId};
use crate::domain::location::{Location, LocationKey};
use crate::domain::ports::{
    LocationStore, PassengerDirectory, PenaltySink, RequestStore, TripStore,
};
use crate::domain::request::{ParticipationRequest, RequestStatus};
use crate::domain::trip::{Trip, TripStatus};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory trip store.
///
/// Every compare-and-set runs under a single write-lock acquisition, so the
/// comparison and the write cannot interleave with another caller.
#[derive(Default, Clone)]
pub struct InMemoryTripStore {
    trips: Arc<RwLock<HashMap<TripId, Trip>>>,
}

impl InMemoryTripStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TripStore for InMemoryTripStore {
    async fn insert_trip(&self, trip: Trip) -> Result<()> {
        let mut trips = self.trips.write().await;
        trips.insert(trip.id, trip);
        Ok(())
    }

    async fn get_trip(&self, trip_id: TripId) -> Result<Option<Trip>> {
        let trips = self.trips.read().await;
        Ok(trips.get(&trip_id).cloned())
    }

    async fn list_trips(&self) -> Result<Vec<Trip>> {
        let trips = self.trips.read().await;
        let mut all: Vec<Trip> = trips.values().cloned().collect();
        all.sort_by_key(|t| (t.departure, t.id));
        Ok(all)
    }

    async fn conditional_update_seats(
        &self,
        trip_id: TripId,
        expected: u32,
        new: u32,
    ) -> Result<bool> {
        let mut trips = self.trips.write().await;
        match trips.get_mut(&trip_id) {
            Some(trip) if trip.available_seats == expected => {
                trip.available_seats = new;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_trip_status(
        &self,
        trip_id: TripId,
        expected: TripStatus,
        new: TripStatus,
    ) -> Result<bool> {
        let mut trips = self.trips.write().await;
        match trips.get_mut(&trip_id) {
            Some(trip) if trip.status == expected => {
                trip.status = new;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
struct RequestTable {
    by_id: HashMap<RequestId, ParticipationRequest>,
    by_pair: HashMap<(TripId, UserId), RequestId>,
}

/// A thread-safe in-memory request store with a (trip, passenger) index.
#[derive(Default, Clone)]
pub struct InMemoryRequestStore {
    table: Arc<RwLock<RequestTable>>,
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn fifo_order(requests: &mut [ParticipationRequest]) {
    requests.sort_by_key(|r| (r.request_date, r.id));
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn insert_unique(&self, request: ParticipationRequest) -> Result<bool> {
        let mut table = self.table.write().await;
        let pair = (request.trip, request.passenger);
        if table.by_pair.contains_key(&pair) {
            return Ok(false);
        }
        table.by_pair.insert(pair, request.id);
        table.by_id.insert(request.id, request);
        Ok(true)
    }

    async fn find_by_trip_and_passenger(
        &self,
        trip_id: TripId,
        passenger: UserId,
    ) -> Result<Option<ParticipationRequest>> {
        let table = self.table.read().await;
        Ok(table
            .by_pair
            .get(&(trip_id, passenger))
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn get_by_id(&self, request_id: RequestId) -> Result<Option<ParticipationRequest>> {
        let table = self.table.read().await;
        Ok(table.by_id.get(&request_id).cloned())
    }

    async fn list_by_trip_and_status(
        &self,
        trip_id: TripId,
        status: RequestStatus,
    ) -> Result<Vec<ParticipationRequest>> {
        let table = self.table.read().await;
        let mut found: Vec<ParticipationRequest> = table
            .by_id
            .values()
            .filter(|r| r.trip == trip_id && r.status == status)
            .cloned()
            .collect();
        fifo_order(&mut found);
        Ok(found)
    }

    async fn list_by_trip(&self, trip_id: TripId) -> Result<Vec<ParticipationRequest>> {
        let table = self.table.read().await;
        let mut found: Vec<ParticipationRequest> = table
            .by_id
            .values()
            .filter(|r| r.trip == trip_id)
            .cloned()
            .collect();
        fifo_order(&mut found);
        Ok(found)
    }

    async fn list_by_passenger(&self, passenger: UserId) -> Result<Vec<ParticipationRequest>> {
        let table = self.table.read().await;
        let mut found: Vec<ParticipationRequest> = table
            .by_id
            .values()
            .filter(|r| r.passenger == passenger)
            .cloned()
            .collect();
        fifo_order(&mut found);
        Ok(found)
    }

    async fn conditional_update_status(
        &self,
        request_id: RequestId,
        expected: RequestStatus,
        new: RequestStatus,
        reason: Option<String>,
    ) -> Result<Option<ParticipationRequest>> {
        let mut table = self.table.write().await;
        match table.by_id.get_mut(&request_id) {
            Some(request) if request.status == expected => {
                request.status = new;
                if reason.is_some() {
                    request.rejection_reason = reason;
                }
                Ok(Some(request.clone()))
            }
            _ => Ok(None),
        }
    }
}

/// Locations deduplicated by their normalized (address, postal code) pair.
#[derive(Default, Clone)]
pub struct InMemoryLocationStore {
    locations: Arc<RwLock<HashMap<LocationKey, Location>>>,
}

impl InMemoryLocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.locations.read().await.len()
    }
}

#[async_trait]
impl LocationStore for InMemoryLocationStore {
    async fn find_or_create(&self, address: &str, postal_code: &str) -> Result<Location> {
        let key = LocationKey::parse(address, postal_code)?;
        let mut locations = self.locations.write().await;
        let location = locations
            .entry(key)
            .or_insert_with(|| Location::new(address, postal_code));
        Ok(location.clone())
    }
}

/// Registered passengers.
#[derive(Default, Clone)]
pub struct InMemoryPassengerDirectory {
    passengers: Arc<RwLock<HashSet<UserId>>>,
}

impl InMemoryPassengerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, user: UserId) {
        self.passengers.write().await.insert(user);
    }
}

#[async_trait]
impl PassengerDirectory for InMemoryPassengerDirectory {
    async fn passenger_exists(&self, user: UserId) -> Result<bool> {
        Ok(self.passengers.read().await.contains(&user))
    }
}

/// Keeps every penalty issued, in order, and at most one per (user, trip).
#[derive(Default, Clone)]
pub struct InMemoryPenaltyLedger {
    penalties: Arc<RwLock<Vec<Penalty>>>,
}

impl InMemoryPenaltyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn penalties_for(&self, user: UserId) -> Vec<Penalty> {
        let penalties = self.penalties.read().await;
        penalties.iter().filter(|p| p.user == user).cloned().collect()
    }
}

#[async_trait]
impl PenaltySink for InMemoryPenaltyLedger {
    async fn add_penalty(&self, penalty: Penalty) -> Result<bool> {
        let mut penalties = self.penalties.write().await;
        if penalty.trip.is_some()
            && penalties
                .iter()
                .any(|p| p.user == penalty.user && p.trip == penalty.trip)
        {
            return Ok(false);
        }
        penalties.push(penalty);
        Ok(true)
    }
}
