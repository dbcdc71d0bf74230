use super::command_reader::{CarpoolCommand, CommandOp};
use super::report_writer::ReportRow;
use crate::application::engine::CarpoolEngine;
use crate::domain::ids::{TripId, UserId};
use crate::domain::ports::ClockRef;
use crate::domain::trip::Trip;
use crate::error::{CarpoolError, Result};
use crate::infrastructure::in_memory::InMemoryPassengerDirectory;
use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Maps command-file labels to ids and back.
///
/// Ids are name-based UUIDs, so the same label names the same trip or user
/// across runs against a persistent store.
#[derive(Debug, Default)]
pub struct Labels {
    names: HashMap<Uuid, String>,
}

impl Labels {
    pub fn trip(&mut self, label: &str) -> TripId {
        TripId(self.resolve("trip", label))
    }

    pub fn user(&mut self, label: &str) -> UserId {
        UserId(self.resolve("user", label))
    }

    fn resolve(&mut self, kind: &str, label: &str) -> Uuid {
        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{kind}:{label}").as_bytes());
        self.names.entry(id).or_insert_with(|| label.to_string());
        id
    }

    /// The label an id was created from, or the id itself if it never
    /// appeared in this run.
    pub fn name(&self, id: Uuid) -> String {
        self.names.get(&id).cloned().unwrap_or_else(|| id.to_string())
    }
}

/// Runs batch commands against a [`CarpoolEngine`].
///
/// Users are registered as passengers the first time they ask for a seat.
pub struct ScenarioRunner {
    engine: Arc<CarpoolEngine>,
    passengers: InMemoryPassengerDirectory,
    clock: ClockRef,
    labels: Labels,
}

impl ScenarioRunner {
    pub fn new(
        engine: Arc<CarpoolEngine>,
        passengers: InMemoryPassengerDirectory,
        clock: ClockRef,
    ) -> Self {
        Self {
            engine,
            passengers,
            clock,
            labels: Labels::default(),
        }
    }

    pub async fn execute(&mut self, command: &CarpoolCommand) -> Result<()> {
        let trip_id = self.labels.trip(&command.trip);
        let user = command.user_label().map(|label| self.labels.user(label));

        match command.op {
            CommandOp::Trip => {
                let seats = command.seats.ok_or_else(|| {
                    CarpoolError::Validation(format!("trip {} needs seats", command.trip))
                })?;
                let departure = self.clock.now() + Duration::days(1);
                let mut trip = Trip::new(user?, departure, departure + Duration::hours(1), seats);
                trip.id = trip_id;
                self.engine.publish_trip(trip).await?;
            }
            CommandOp::Request | CommandOp::Waitlist => {
                let address = command.address.as_deref().unwrap_or_default();
                let postal_code = command.postal_code.as_deref().unwrap_or_default();
                let user = user?;
                self.passengers.register(user).await;
                if command.op == CommandOp::Request {
                    self.engine
                        .create_request(trip_id, user, address, postal_code)
                        .await?;
                } else {
                    self.engine
                        .join_waiting_list(trip_id, user, address, postal_code)
                        .await?;
                }
            }
            CommandOp::Accept => {
                let request = self.engine.find_request(trip_id, user?).await?;
                self.engine.accept(request.id).await?;
            }
            CommandOp::Reject => {
                let request = self.engine.find_request(trip_id, user?).await?;
                let reason = command.reason.as_deref().unwrap_or_default();
                self.engine.reject(request.id, reason).await?;
            }
            CommandOp::Cancel => {
                let request = self.engine.find_request(trip_id, user?).await?;
                self.engine.cancel_by_passenger(request.id).await?;
            }
            CommandOp::Check => {
                let promoted = self.engine.check_waiting_list(trip_id).await?;
                info!(trip = %command.trip, promoted = promoted.len(), "waiting list checked");
            }
            CommandOp::CancelTrip => {
                let outcome = self.engine.cancel_trip(trip_id, user?).await?;
                if !outcome.is_complete() {
                    let names: Vec<String> = outcome
                        .failed_passengers
                        .iter()
                        .map(|p| self.labels.name(p.0))
                        .collect();
                    return Err(CarpoolError::store(format!(
                        "trip {} cancelled but requests of {} are still open",
                        command.trip,
                        names.join(", ")
                    )));
                }
            }
            CommandOp::Start => {
                self.engine.start_trip(trip_id, user?).await?;
            }
            CommandOp::Complete => {
                self.engine.complete_trip(trip_id, user?).await?;
            }
        }
        Ok(())
    }

    /// Current state of every trip, one row per request.
    pub async fn report(&self) -> Result<Vec<ReportRow>> {
        let mut rows = Vec::new();
        for (trip, requests) in self.engine.snapshot().await? {
            let trip_label = self.labels.name(trip.id.0);
            if requests.is_empty() {
                rows.push(ReportRow {
                    trip: trip_label,
                    trip_status: trip.status.to_string(),
                    available_seats: trip.available_seats,
                    passenger: String::new(),
                    request_status: String::new(),
                    reason: String::new(),
                });
                continue;
            }
            for request in requests {
                rows.push(ReportRow {
                    trip: trip_label.clone(),
                    trip_status: trip.status.to_string(),
                    available_seats: trip.available_seats,
                    passenger: self.labels.name(request.passenger.0),
                    request_status: request.status.to_string(),
                    reason: request.rejection_reason.unwrap_or_default(),
                });
            }
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::engine::CarpoolServices;
    use crate::config::EngineConfig;
    use crate::domain::ports::PassengerDirectory;
    use crate::infrastructure::clock::SteppingClock;
    use crate::infrastructure::in_memory::{
        InMemoryLocationStore, InMemoryPenaltyLedger, InMemoryRequestStore, InMemoryTripStore,
    };
    use crate::infrastructure::notify::LogNotifier;

    fn runner() -> (ScenarioRunner, InMemoryPassengerDirectory) {
        let passengers = InMemoryPassengerDirectory::new();
        let clock: ClockRef = Arc::new(SteppingClock::default());
        let engine = CarpoolEngine::new(
            CarpoolServices {
                trips: Arc::new(InMemoryTripStore::new()),
                requests: Arc::new(InMemoryRequestStore::new()),
                locations: Arc::new(InMemoryLocationStore::new()),
                passengers: Arc::new(passengers.clone()),
                notifier: Arc::new(LogNotifier),
                penalties: Arc::new(InMemoryPenaltyLedger::new()),
                clock: clock.clone(),
            },
            EngineConfig::default(),
        );
        (
            ScenarioRunner::new(Arc::new(engine), passengers.clone(), clock),
            passengers,
        )
    }

    fn command(op: CommandOp, trip: &str, user: &str) -> CarpoolCommand {
        CarpoolCommand {
            op,
            trip: trip.to_string(),
            user: Some(user.to_string()),
            seats: None,
            address: None,
            postal_code: None,
            reason: None,
        }
    }

    #[tokio::test]
    async fn test_only_seat_seekers_become_passengers() {
        let (mut runner, passengers) = runner();
        let mut trip = command(CommandOp::Trip, "lisbon", "dora");
        trip.seats = Some(2);
        runner.execute(&trip).await.unwrap();

        let mut request = command(CommandOp::Request, "lisbon", "ana");
        request.address = Some("Rua Augusta 10".to_string());
        request.postal_code = Some("1100-053".to_string());
        runner.execute(&request).await.unwrap();

        let mut labels = Labels::default();
        assert!(!passengers.passenger_exists(labels.user("dora")).await.unwrap());
        assert!(passengers.passenger_exists(labels.user("ana")).await.unwrap());

        // The driver has no request of their own on the trip.
        let accept = command(CommandOp::Accept, "lisbon", "dora");
        assert!(runner.execute(&accept).await.is_err());
    }

    #[test]
    fn test_labels_are_stable_and_reversible() {
        let mut labels = Labels::default();
        let first = labels.trip("t1");
        assert_eq!(labels.trip("t1"), first);
        assert_ne!(labels.trip("t2"), first);
        // Same label, different kind.
        assert_ne!(labels.user("t1").0, first.0);

        assert_eq!(labels.name(first.0), "t1");
        let stranger = Uuid::new_v4();
        assert_eq!(labels.name(stranger), stranger.to_string());

        let mut fresh = Labels::default();
        assert_eq!(fresh.trip("t1"), first);
    }
}
