use super::ids::{TripId, UserId};
use crate::error::CarpoolError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a published trip. Persisted as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TripStatus {
    Active,
    InProgress,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub fn code(self) -> u8 {
        match self {
            TripStatus::Active => 1,
            TripStatus::InProgress => 2,
            TripStatus::Completed => 3,
            TripStatus::Cancelled => 4,
        }
    }

    /// Whether the driver may still cancel a trip in this status.
    pub fn is_cancellable(self) -> bool {
        matches!(self, TripStatus::Active | TripStatus::InProgress)
    }
}

impl From<TripStatus> for u8 {
    fn from(status: TripStatus) -> Self {
        status.code()
    }
}

impl TryFrom<u8> for TripStatus {
    type Error = CarpoolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(TripStatus::Active),
            2 => Ok(TripStatus::InProgress),
            3 => Ok(TripStatus::Completed),
            4 => Ok(TripStatus::Cancelled),
            other => Err(CarpoolError::Validation(format!(
                "unknown trip status code {other}"
            ))),
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TripStatus::Active => "Active",
            TripStatus::InProgress => "InProgress",
            TripStatus::Completed => "Completed",
            TripStatus::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// A trip published by a driver.
///
/// `available_seats` is only ever changed through the seat ledger's
/// compare-and-set operations on the trip store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: TripId,
    pub driver: UserId,
    pub departure: DateTime<Utc>,
    pub arrival: DateTime<Utc>,
    /// Seats offered when the trip was published.
    pub capacity: u32,
    pub available_seats: u32,
    pub status: TripStatus,
}

impl Trip {
    pub fn new(
        driver: UserId,
        departure: DateTime<Utc>,
        arrival: DateTime<Utc>,
        seats: u32,
    ) -> Self {
        Self {
            id: TripId::new(),
            driver,
            departure,
            arrival,
            capacity: seats,
            available_seats: seats,
            status: TripStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TripStatus::Active
    }
}
