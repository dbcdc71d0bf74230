use crate::domain::events::CarpoolEvent;
use crate::domain::ports::NotificationSink;
use crate::error::{CarpoolError, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

/// Writes every event to the log. Stands in for email or push delivery.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, event: CarpoolEvent) -> Result<()> {
        match &event {
            CarpoolEvent::RequestAccepted { trip, passenger, .. } => {
                info!(%trip, %passenger, "notification: request accepted");
            }
            CarpoolEvent::RequestRejected {
                trip,
                passenger,
                reason,
                ..
            } => {
                info!(%trip, %passenger, %reason, "notification: request rejected");
            }
            CarpoolEvent::PromotedFromWaitingList { trip, passenger, .. } => {
                info!(%trip, %passenger, "notification: seat available, moved to pending");
            }
            CarpoolEvent::RequestCancelled { trip, passenger, .. } => {
                info!(%trip, %passenger, "notification: passenger cancelled");
            }
            CarpoolEvent::TripCancelledByDriver { trip, passenger, .. } => {
                info!(%trip, %passenger, "notification: driver cancelled the trip");
            }
        }
        Ok(())
    }
}

/// Forwards events to a channel consumed by a delivery worker.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<CarpoolEvent>,
}

impl ChannelNotifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CarpoolEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NotificationSink for ChannelNotifier {
    async fn notify(&self, event: CarpoolEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| CarpoolError::store("notification channel closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::{RequestId, TripId, UserId};

    #[tokio::test]
    async fn test_channel_notifier_delivers_in_order() {
        let (notifier, mut rx) = ChannelNotifier::channel();
        let trip = TripId::new();
        let passenger = UserId::new();
        let accepted = CarpoolEvent::RequestAccepted {
            request: RequestId::new(),
            trip,
            passenger,
        };
        let cancelled = CarpoolEvent::RequestCancelled {
            request: RequestId::new(),
            trip,
            passenger,
        };

        notifier.notify(accepted.clone()).await.unwrap();
        notifier.notify(cancelled.clone()).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), accepted);
        assert_eq!(rx.recv().await.unwrap(), cancelled);
    }

    #[tokio::test]
    async fn test_channel_notifier_reports_closed_receiver() {
        let (notifier, rx) = ChannelNotifier::channel();
        drop(rx);
        let event = CarpoolEvent::RequestAccepted {
            request: RequestId::new(),
            trip: TripId::new(),
            passenger: UserId::new(),
        };
        assert!(notifier.notify(event).await.is_err());
    }
}
