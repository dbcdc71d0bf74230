use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// One line of the final report: a request on a trip, or a trip with no
/// requests (empty passenger columns).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub trip: String,
    pub trip_status: String,
    pub available_seats: u32,
    pub passenger: String,
    pub request_status: String,
    pub reason: String,
}

pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_rows(&mut self, rows: impl IntoIterator<Item = ReportRow>) -> Result<()> {
        let mut written = false;
        for row in rows {
            self.writer.serialize(row)?;
            written = true;
        }
        if !written {
            self.writer.write_record([
                "trip",
                "trip_status",
                "available_seats",
                "passenger",
                "request_status",
                "reason",
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
