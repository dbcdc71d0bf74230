use crate::domain::ids::{RequestId, TripId, UserId};
use crate::domain::ports::{RequestStore, TripStore};
use crate::domain::request::{ParticipationRequest, RequestStatus};
use crate::domain::trip::{Trip, TripStatus};
use crate::error::{CarpoolError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for storing trips and their seat counts.
pub const CF_TRIPS: &str = "trips";
/// Column Family for storing participation requests.
pub const CF_REQUESTS: &str = "requests";

/// A persistent store implementation using RocksDB.
///
/// Trips and requests live in separate Column Families, keyed by the raw
/// UUID bytes and stored as JSON. RocksDB has no compare-and-set, so every
/// conditional write runs its read-compare-write under one store-wide lock.
///
/// `Clone` shares both the underlying `Arc<DB>` and the write lock.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    writes: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path`, creating the
    /// "trips" and "requests" column families when missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_trips = ColumnFamilyDescriptor::new(CF_TRIPS, Options::default());
        let cf_requests = ColumnFamilyDescriptor::new(CF_REQUESTS, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_trips, cf_requests])?;

        Ok(Self {
            db: Arc::new(db),
            writes: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| CarpoolError::store(format!("{name} column family not found")))
    }

    fn load<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_pinned_cf(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save<T: Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let bytes = serde_json::to_vec(value)?;
        self.db.put_cf(cf, key, bytes)?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, bytes) = item?;
            values.push(serde_json::from_slice(&bytes)?);
        }
        Ok(values)
    }

    fn requests_where(
        &self,
        keep: impl Fn(&ParticipationRequest) -> bool,
    ) -> Result<Vec<ParticipationRequest>> {
        let mut found: Vec<ParticipationRequest> = self
            .scan::<ParticipationRequest>(CF_REQUESTS)?
            .into_iter()
            .filter(|r| keep(r))
            .collect();
        found.sort_by_key(|r| (r.request_date, r.id));
        Ok(found)
    }
}

#[async_trait]
impl TripStore for RocksDBStore {
    async fn insert_trip(&self, trip: Trip) -> Result<()> {
        let _guard = self.writes.lock().await;
        self.save(CF_TRIPS, trip.id.0.as_bytes(), &trip)
    }

    async fn get_trip(&self, trip_id: TripId) -> Result<Option<Trip>> {
        self.load(CF_TRIPS, trip_id.0.as_bytes())
    }

    async fn list_trips(&self) -> Result<Vec<Trip>> {
        let mut trips: Vec<Trip> = self.scan(CF_TRIPS)?;
        trips.sort_by_key(|t| (t.departure, t.id));
        Ok(trips)
    }

    async fn conditional_update_seats(
        &self,
        trip_id: TripId,
        expected: u32,
        new: u32,
    ) -> Result<bool> {
        let _guard = self.writes.lock().await;
        let Some(mut trip) = self.load::<Trip>(CF_TRIPS, trip_id.0.as_bytes())? else {
            return Ok(false);
        };
        if trip.available_seats != expected {
            return Ok(false);
        }
        trip.available_seats = new;
        self.save(CF_TRIPS, trip_id.0.as_bytes(), &trip)?;
        Ok(true)
    }

    async fn set_trip_status(
        &self,
        trip_id: TripId,
        expected: TripStatus,
        new: TripStatus,
    ) -> Result<bool> {
        let _guard = self.writes.lock().await;
        let Some(mut trip) = self.load::<Trip>(CF_TRIPS, trip_id.0.as_bytes())? else {
            return Ok(false);
        };
        if trip.status != expected {
            return Ok(false);
        }
        trip.status = new;
        self.save(CF_TRIPS, trip_id.0.as_bytes(), &trip)?;
        Ok(true)
    }
}

#[async_trait]
impl RequestStore for RocksDBStore {
    async fn insert_unique(&self, request: ParticipationRequest) -> Result<bool> {
        let _guard = self.writes.lock().await;
        let taken = self
            .scan::<ParticipationRequest>(CF_REQUESTS)?
            .iter()
            .any(|r| r.trip == request.trip && r.passenger == request.passenger);
        if taken {
            return Ok(false);
        }
        self.save(CF_REQUESTS, request.id.0.as_bytes(), &request)?;
        Ok(true)
    }

    async fn find_by_trip_and_passenger(
        &self,
        trip_id: TripId,
        passenger: UserId,
    ) -> Result<Option<ParticipationRequest>> {
        Ok(self
            .requests_where(|r| r.trip == trip_id && r.passenger == passenger)?
            .into_iter()
            .next())
    }

    async fn get_by_id(&self, request_id: RequestId) -> Result<Option<ParticipationRequest>> {
        self.load(CF_REQUESTS, request_id.0.as_bytes())
    }

    async fn list_by_trip_and_status(
        &self,
        trip_id: TripId,
        status: RequestStatus,
    ) -> Result<Vec<ParticipationRequest>> {
        self.requests_where(|r| r.trip == trip_id && r.status == status)
    }

    async fn list_by_trip(&self, trip_id: TripId) -> Result<Vec<ParticipationRequest>> {
        self.requests_where(|r| r.trip == trip_id)
    }

    async fn list_by_passenger(&self, passenger: UserId) -> Result<Vec<ParticipationRequest>> {
        self.requests_where(|r| r.passenger == passenger)
    }

    async fn conditional_update_status(
        &self,
        request_id: RequestId,
        expected: RequestStatus,
        new: RequestStatus,
        reason: Option<String>,
    ) -> Result<Option<ParticipationRequest>> {
        let _guard = self.writes.lock().await;
        let Some(mut request) =
            self.load::<ParticipationRequest>(CF_REQUESTS, request_id.0.as_bytes())?
        else {
            return Ok(None);
        };
        if request.status != expected {
            return Ok(None);
        }
        request.status = new;
        if reason.is_some() {
            request.rejection_reason = reason;
        }
        self.save(CF_REQUESTS, request_id.0.as_bytes(), &request)?;
        Ok(Some(request))
    }
}
