use super::events::{CarpoolEvent, Penalty};
use super::ids::{RequestId, TripId, UserId};
use super::location::Location;
use super::request::{ParticipationRequest, RequestStatus};
use super::trip::{Trip, TripStatus};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Persistence for trips and their seat counts.
///
/// Seat counts and statuses are only changed through the compare-and-set
/// methods; implementations must perform the comparison and the write as a
/// single atomic step.
#[async_trait]
pub trait TripStore: Send + Sync {
    async fn insert_trip(&self, trip: Trip) -> Result<()>;
    async fn get_trip(&self, trip_id: TripId) -> Result<Option<Trip>>;
    async fn list_trips(&self) -> Result<Vec<Trip>>;
    /// Sets `available_seats` to `new` only if it currently equals `expected`.
    async fn conditional_update_seats(&self, trip_id: TripId, expected: u32, new: u32)
    -> Result<bool>;
    /// Sets the status to `new` only if it currently equals `expected`.
    async fn set_trip_status(
        &self,
        trip_id: TripId,
        expected: TripStatus,
        new: TripStatus,
    ) -> Result<bool>;
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Inserts the request unless one already exists for its (trip, passenger)
    /// pair. Returns `false` without writing on a duplicate.
    async fn insert_unique(&self, request: ParticipationRequest) -> Result<bool>;
    async fn find_by_trip_and_passenger(
        &self,
        trip_id: TripId,
        passenger: UserId,
    ) -> Result<Option<ParticipationRequest>>;
    async fn get_by_id(&self, request_id: RequestId) -> Result<Option<ParticipationRequest>>;
    /// Requests in `status` for the trip, oldest `request_date` first.
    async fn list_by_trip_and_status(
        &self,
        trip_id: TripId,
        status: RequestStatus,
    ) -> Result<Vec<ParticipationRequest>>;
    async fn list_by_trip(&self, trip_id: TripId) -> Result<Vec<ParticipationRequest>>;
    async fn list_by_passenger(&self, passenger: UserId) -> Result<Vec<ParticipationRequest>>;
    /// Moves the request from `expected` to `new`, storing `reason` when given.
    /// Returns the updated request, or `None` if the status was not `expected`.
    async fn conditional_update_status(
        &self,
        request_id: RequestId,
        expected: RequestStatus,
        new: RequestStatus,
        reason: Option<String>,
    ) -> Result<Option<ParticipationRequest>>;
}

#[async_trait]
pub trait LocationStore: Send + Sync {
    /// Returns the location matching the normalized pair, creating it if needed.
    async fn find_or_create(&self, address: &str, postal_code: &str) -> Result<Location>;
}

#[async_trait]
pub trait PassengerDirectory: Send + Sync {
    async fn passenger_exists(&self, user: UserId) -> Result<bool>;
}

/// Best-effort delivery of carpool events.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: CarpoolEvent) -> Result<()>;
}

#[async_trait]
pub trait PenaltySink: Send + Sync {
    /// Records the penalty. A penalty tied to a trip is recorded at most once
    /// per (user, trip); returns `false` if an equivalent one already exists.
    async fn add_penalty(&self, penalty: Penalty) -> Result<bool>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type TripStoreRef = Arc<dyn TripStore>;
pub type RequestStoreRef = Arc<dyn RequestStore>;
pub type LocationStoreRef = Arc<dyn LocationStore>;
pub type PassengerDirectoryRef = Arc<dyn PassengerDirectory>;
pub type NotificationSinkRef = Arc<dyn NotificationSink>;
pub type PenaltySinkRef = Arc<dyn PenaltySink>;
pub type ClockRef = Arc<dyn Clock>;
