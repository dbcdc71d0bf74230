//! Batch interface: a CSV of carpool commands in, a CSV status report out.

pub mod command_reader;
pub mod report_writer;
pub mod scenario;
