use super::ids::{RequestId, TripId, UserId};
use serde::{Deserialize, Serialize};

/// Something a passenger or driver may want to hear about.
///
/// Emitted after the corresponding state change has been committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CarpoolEvent {
    RequestAccepted {
        request: RequestId,
        trip: TripId,
        passenger: UserId,
    },
    RequestRejected {
        request: RequestId,
        trip: TripId,
        passenger: UserId,
        reason: String,
    },
    PromotedFromWaitingList {
        request: RequestId,
        trip: TripId,
        passenger: UserId,
    },
    RequestCancelled {
        request: RequestId,
        trip: TripId,
        passenger: UserId,
    },
    TripCancelledByDriver {
        request: RequestId,
        trip: TripId,
        passenger: UserId,
    },
}

impl CarpoolEvent {
    pub fn passenger(&self) -> UserId {
        match self {
            CarpoolEvent::RequestAccepted { passenger, .. }
            | CarpoolEvent::RequestRejected { passenger, .. }
            | CarpoolEvent::PromotedFromWaitingList { passenger, .. }
            | CarpoolEvent::RequestCancelled { passenger, .. }
            | CarpoolEvent::TripCancelledByDriver { passenger, .. } => *passenger,
        }
    }
}

/// A penalty charged to a user, e.g. a driver who cancels a booked trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Penalty {
    pub user: UserId,
    /// The trip the penalty was charged for, if any. A user is charged at
    /// most once per trip.
    #[serde(default)]
    pub trip: Option<TripId>,
    /// Weight in hops.
    pub hops: u32,
    pub points: u32,
    pub description: String,
}

impl Penalty {
    pub const TRIP_CANCELLATION_HOPS: u32 = 10;
    pub const TRIP_CANCELLATION_POINTS: u32 = 100;

    pub fn trip_cancellation(driver: UserId, trip: TripId) -> Self {
        Self {
            user: driver,
            trip: Some(trip),
            hops: Self::TRIP_CANCELLATION_HOPS,
            points: Self::TRIP_CANCELLATION_POINTS,
            description: format!("Driver cancelled trip {trip} with booked passengers"),
        }
    }
}
