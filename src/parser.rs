//! CSV ingestion for raw trip records.

use std::fs::File;
use std::io::Read;

use anyhow::{Context, Result};
use csv::{ReaderBuilder, Trim};
use tracing::{debug, info};

use crate::records::RawTripRecord;

#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub records: Vec<RawTripRecord>,
    /// Rows that could not be decoded into a record at all.
    pub unreadable_rows: usize,
}

/// Reads every trip row from the CSV file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read. Individual rows
/// that fail to decode are skipped and counted instead.
pub fn read_trips(path: &str) -> Result<IngestOutcome> {
    let file = File::open(path).with_context(|| format!("failed to open trip file '{path}'"))?;
    let outcome = read_trips_from(file)?;
    info!(
        path,
        records = outcome.records.len(),
        unreadable_rows = outcome.unreadable_rows,
        "Trips loaded"
    );
    Ok(outcome)
}

/// Reads trip rows from any CSV source with a header line.
pub fn read_trips_from<R: Read>(reader: R) -> Result<IngestOutcome> {
    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    let mut outcome = IngestOutcome::default();

    for (line, result) in rdr.deserialize::<RawTripRecord>().enumerate() {
        match result {
            Ok(record) => outcome.records.push(record),
            Err(e) if e.is_io_error() => return Err(e).context("failed to read trip rows"),
            Err(e) => {
                debug!(row = line + 1, error = %e, "Skipping unreadable row");
                outcome.unreadable_rows += 1;
            }
        }
    }

    Ok(outcome)
}
