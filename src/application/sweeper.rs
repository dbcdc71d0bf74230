use super::promoter::WaitingListPromoter;
use crate::domain::ports::TripStoreRef;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Periodically offers free seats to waiting passengers on every open trip.
///
/// Goes through the same [`WaitingListPromoter`] as on-demand promotion, so a
/// sweep racing a cancellation cannot over-promote.
pub struct WaitingListSweeper {
    trips: TripStoreRef,
    promoter: Arc<WaitingListPromoter>,
    interval: Duration,
}

impl WaitingListSweeper {
    pub fn new(trips: TripStoreRef, promoter: Arc<WaitingListPromoter>, interval: Duration) -> Self {
        Self {
            trips,
            promoter,
            interval,
        }
    }

    /// One pass over all active trips with free seats. Returns how many
    /// requests were promoted. A failing trip is logged and skipped.
    pub async fn run_once(&self) -> Result<usize> {
        let (open, closed): (Vec<_>, Vec<_>) = self
            .trips
            .list_trips()
            .await?
            .into_iter()
            .partition(|t| t.is_active());
        self.promoter
            .forget_offers(closed.iter().map(|t| t.id))
            .await;
        let candidates: Vec<_> = open
            .into_iter()
            .filter(|t| t.available_seats > 0)
            .collect();

        let mut promoted = 0;
        for trip in &candidates {
            match self.promoter.check_waiting_list(trip.id).await {
                Ok(moved) => promoted += moved.len(),
                Err(err) => error!(trip = %trip.id, error = %err, "waiting-list check failed"),
            }
        }
        info!(
            trips = candidates.len(),
            promoted, "waiting-list sweep completed"
        );
        Ok(promoted)
    }

    /// Runs the sweep on its interval until the returned handle is shut down.
    /// The first pass starts immediately.
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let task = tokio::spawn(async move {
            info!(interval = ?self.interval, "waiting-list sweeper starting");
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.run_once().await {
                            error!(error = %err, "waiting-list sweep failed");
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("waiting-list sweeper stopping");
        });
        SweeperHandle { shutdown, task }
    }
}

pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signals the sweeper to stop and waits for the in-flight pass to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            error!(error = %err, "waiting-list sweeper task panicked");
        }
    }
}
