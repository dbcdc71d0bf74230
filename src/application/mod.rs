//! Application layer containing the seat-allocation and request-status logic.
//!
//! `CarpoolEngine` is the entry point used by an API layer. It wires the
//! `RequestStateMachine`, the `WaitingListPromoter` and the
//! `TripCancellationCoordinator` over shared store handles. Correctness under
//! concurrent callers rests on the stores' compare-and-set operations plus a
//! per-trip lock around accepts, passenger cancellations and waiting-list
//! reshuffles.

pub mod cancellation;
pub mod engine;
pub mod locks;
pub mod promoter;
pub mod reads;
pub mod seat_ledger;
pub mod state_machine;
pub mod sweeper;

use crate::domain::events::CarpoolEvent;
use crate::domain::ports::NotificationSink;
use tracing::warn;

/// Hands an event to the sink. Delivery failures are logged and swallowed:
/// the committed state change stands regardless.
pub(crate) async fn dispatch(sink: &dyn NotificationSink, event: CarpoolEvent) {
    let passenger = event.passenger();
    if let Err(err) = sink.notify(event).await {
        warn!(%passenger, error = %err, "notification delivery failed");
    }
}
