use super::ids::{LocationId, RequestId, TripId, UserId};
use crate::error::CarpoolError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a passenger's participation request. Persisted as its integer code.
///
/// ```text
///            ┌──Promote──┐
///            │           ▼
/// WaitingList(4) ◄─Demote─ Pending(1) ──Reject──► Rejected(3)
///                             │
///                           Accept
///                             ▼
///                        Accepted(2) ──CancelByPassenger──► Cancelled(5)
///
/// Pending | Accepted | WaitingList ──DriverCancel──► DriverCancelled(6)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
    WaitingList,
    /// Cancelled by the passenger.
    Cancelled,
    /// Closed because the driver cancelled the whole trip.
    DriverCancelled,
}

/// A named edge of the request state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Accept,
    Reject,
    CancelByPassenger,
    Promote,
    Demote,
    DriverCancel,
}

impl RequestStatus {
    pub fn code(self) -> u8 {
        match self {
            RequestStatus::Pending => 1,
            RequestStatus::Accepted => 2,
            RequestStatus::Rejected => 3,
            RequestStatus::WaitingList => 4,
            RequestStatus::Cancelled => 5,
            RequestStatus::DriverCancelled => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Rejected | RequestStatus::Cancelled | RequestStatus::DriverCancelled
        )
    }

    /// Returns the status reached by applying `transition`, or `None` when
    /// the edge does not exist from this status.
    pub fn apply(self, transition: Transition) -> Option<RequestStatus> {
        use RequestStatus::*;
        use Transition::*;

        match (self, transition) {
            (Pending, Accept) => Some(Accepted),
            (Pending, Reject) => Some(Rejected),
            (Pending, Demote) => Some(WaitingList),
            (Accepted, CancelByPassenger) => Some(Cancelled),
            (WaitingList, Promote) => Some(Pending),
            (Pending | Accepted | WaitingList, DriverCancel) => Some(DriverCancelled),
            (Pending, CancelByPassenger | Promote)
            | (Accepted, Accept | Reject | Promote | Demote)
            | (WaitingList, Accept | Reject | CancelByPassenger | Demote)
            | (Rejected | Cancelled | DriverCancelled, _) => None,
        }
    }

    /// Text shown to the passenger for a request in this status.
    pub fn passenger_message(self) -> &'static str {
        match self {
            RequestStatus::Pending => "Waiting for the driver to respond.",
            RequestStatus::Accepted => "Your seat is confirmed.",
            RequestStatus::Rejected => "The driver declined your request.",
            RequestStatus::WaitingList => "You are on the waiting list.",
            RequestStatus::Cancelled => "You cancelled this trip.",
            RequestStatus::DriverCancelled => "The driver cancelled this trip.",
        }
    }
}

impl From<RequestStatus> for u8 {
    fn from(status: RequestStatus) -> Self {
        status.code()
    }
}

impl TryFrom<u8> for RequestStatus {
    type Error = CarpoolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(RequestStatus::Pending),
            2 => Ok(RequestStatus::Accepted),
            3 => Ok(RequestStatus::Rejected),
            4 => Ok(RequestStatus::WaitingList),
            5 => Ok(RequestStatus::Cancelled),
            6 => Ok(RequestStatus::DriverCancelled),
            other => Err(CarpoolError::Validation(format!(
                "unknown request status code {other}"
            ))),
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestStatus::Pending => "Pending",
            RequestStatus::Accepted => "Accepted",
            RequestStatus::Rejected => "Rejected",
            RequestStatus::WaitingList => "WaitingList",
            RequestStatus::Cancelled => "Cancelled",
            RequestStatus::DriverCancelled => "DriverCancelled",
        };
        f.write_str(name)
    }
}

/// A passenger's request to ride on a trip.
///
/// There is at most one per (trip, passenger) pair and it is never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipationRequest {
    pub id: RequestId,
    pub trip: TripId,
    pub passenger: UserId,
    pub pickup: LocationId,
    pub status: RequestStatus,
    /// FIFO key for waiting-list promotion.
    pub request_date: DateTime<Utc>,
    pub rejection_reason: Option<String>,
}

impl ParticipationRequest {
    pub fn new(
        trip: TripId,
        passenger: UserId,
        pickup: LocationId,
        status: RequestStatus,
        request_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RequestId::new(),
            trip,
            passenger,
            pickup,
            status,
            request_date,
            rejection_reason: None,
        }
    }

    /// Passenger-facing copy, including the driver's reason on a rejection.
    pub fn passenger_message(&self) -> String {
        match (self.status, self.rejection_reason.as_deref()) {
            (RequestStatus::Rejected, Some(reason)) => {
                format!("The driver declined your request: {reason}.")
            }
            (status, _) => status.passenger_message().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RequestStatus::*;
    use Transition::*;

    const ALL: [RequestStatus; 6] = [
        Pending,
        Accepted,
        Rejected,
        WaitingList,
        Cancelled,
        DriverCancelled,
    ];

    #[test]
    fn test_legal_edges() {
        assert_eq!(Pending.apply(Accept), Some(Accepted));
        assert_eq!(Pending.apply(Reject), Some(Rejected));
        assert_eq!(Pending.apply(Demote), Some(WaitingList));
        assert_eq!(Accepted.apply(CancelByPassenger), Some(Cancelled));
        assert_eq!(WaitingList.apply(Promote), Some(Pending));
        assert_eq!(Accepted.apply(DriverCancel), Some(DriverCancelled));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for status in ALL.into_iter().filter(|s| s.is_terminal()) {
            for transition in [Accept, Reject, CancelByPassenger, Promote, Demote, DriverCancel] {
                assert_eq!(status.apply(transition), None, "{status} -> {transition:?}");
            }
        }
    }

    #[test]
    fn test_accepting_a_waiting_request_is_illegal() {
        assert_eq!(WaitingList.apply(Accept), None);
        assert_eq!(Pending.apply(CancelByPassenger), None);
    }

    #[test]
    fn test_two_distinct_cancellation_codes() {
        assert_eq!(Cancelled.code(), 5);
        assert_eq!(DriverCancelled.code(), 6);
        assert_ne!(Cancelled.passenger_message(), DriverCancelled.passenger_message());
        for status in ALL {
            assert_eq!(RequestStatus::try_from(status.code()).unwrap(), status);
        }
    }

    #[test]
    fn test_rejection_message_carries_reason() {
        let mut request = ParticipationRequest::new(
            TripId::new(),
            UserId::new(),
            LocationId::new(),
            Rejected,
            Utc::now(),
        );
        assert_eq!(request.passenger_message(), "The driver declined your request.");

        request.rejection_reason = Some("no luggage space".to_string());
        assert_eq!(
            request.passenger_message(),
            "The driver declined your request: no luggage space."
        );

        request.status = Accepted;
        assert_eq!(request.passenger_message(), "Your seat is confirmed.");
    }

    #[test]
    fn test_status_serializes_as_code() {
        let json = serde_json::to_string(&WaitingList).unwrap();
        assert_eq!(json, "4");
        assert!(serde_json::from_str::<RequestStatus>("7").is_err());
    }
}
