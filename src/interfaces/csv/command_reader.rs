use crate::error::{CarpoolError, Result};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOp {
    /// Publish a trip: `trip`, driver in `user`, `seats`.
    Trip,
    Request,
    Waitlist,
    Accept,
    Reject,
    /// Passenger cancels their accepted request.
    Cancel,
    Check,
    CancelTrip,
    Start,
    Complete,
}

/// One row of the command file. `trip` and `user` are free-form labels.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CarpoolCommand {
    pub op: CommandOp,
    pub trip: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub seats: Option<u32>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl CarpoolCommand {
    pub fn user_label(&self) -> Result<&str> {
        self.user
            .as_deref()
            .ok_or_else(|| CarpoolError::Validation(format!("{:?} needs a user", self.op)))
    }
}

/// Reads carpool commands from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record lengths,
/// so trailing empty columns may be left out.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes commands; a malformed row yields an error and
    /// the iterator moves on to the next one.
    pub fn commands(self) -> impl Iterator<Item = Result<CarpoolCommand>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(CarpoolError::from))
    }
}
