//! CSV files for handing results to other tools.
//!
//! The firing position file is a single headerless `x,y,z` row in metres.
//! Detection exports carry a header row.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::DetectionRecord;
use crate::error::{Error, Result};
use crate::state::Position;

/// Write the firing position as one `x,y,z` row, replacing the file.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_firing_position(path: impl AsRef<Path>, position: &Position) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    writer.serialize(position.to_array())?;
    writer.flush()?;
    debug!(path = %path.display(), position = %position, "Wrote firing position");
    Ok(())
}

/// Read a firing position written by [`write_firing_position`].
///
/// # Errors
///
/// Returns an error if the file cannot be read or holds no valid row.
pub fn read_firing_position(path: impl AsRef<Path>) -> Result<Position> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    let row: [f64; 3] = reader
        .deserialize()
        .next()
        .ok_or_else(|| Error::internal(format!("{} has no position row", path.display())))??;
    Ok(Position::new(row[0], row[1], row[2]))
}

const DETECTION_HEADER: [&str; 7] = ["id", "mission_id", "timestamp", "x", "y", "z", "bbox_area"];

#[derive(Debug, Serialize, Deserialize)]
struct DetectionRow {
    id: Option<i64>,
    mission_id: i64,
    timestamp: String,
    x: f64,
    y: f64,
    z: f64,
    bbox_area: u64,
}

impl From<&DetectionRecord> for DetectionRow {
    fn from(record: &DetectionRecord) -> Self {
        Self {
            id: record.id,
            mission_id: record.mission_id,
            timestamp: record.timestamp.to_rfc3339(),
            x: record.position.x,
            y: record.position.y,
            z: record.position.z,
            bbox_area: record.bbox_area,
        }
    }
}

/// Write detections as CSV with a header row.
///
/// The header is written even when there are no detections.
/// Returns the number of rows written.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_detections<W: Write>(out: W, detections: &[DetectionRecord]) -> Result<usize> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(out);
    writer.write_record(DETECTION_HEADER)?;
    for record in detections {
        writer.serialize(DetectionRow::from(record))?;
    }
    writer.flush()?;
    Ok(detections.len())
}
