use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use weather_etl_core::{publish_file, staging_path};

use super::{ProcessedRecord, CANONICAL_COLUMNS};
use crate::EtlError;

/// Write records as CSV and publish them under `target` (or the next free
/// suffixed name). Nothing appears under the final name unless every row was
/// written and synced.
///
/// The header holds every canonical column present in at least one record;
/// cells a record lacks are left empty.
pub fn write_processed_file(
    target: &Path,
    records: &[ProcessedRecord],
) -> Result<PathBuf, EtlError> {
    if records.is_empty() {
        return Err(EtlError::MalformedInput(String::from(
            "refusing to write a processed file without records",
        )));
    }

    let rendered: Vec<Vec<(&'static str, String)>> =
        records.iter().map(ProcessedRecord::columns).collect();
    let header: Vec<&str> = CANONICAL_COLUMNS
        .into_iter()
        .filter(|column| {
            rendered
                .iter()
                .any(|row| row.iter().any(|(name, _)| name == column))
        })
        .collect();

    let staged = staging_path(target);
    if let Err(e) = write_csv(&staged, &header, &rendered) {
        // the staged file may not exist yet; nothing else to clean up
        let _ = fs::remove_file(&staged);
        return Err(e);
    }
    publish_file(&staged, target).map_err(|e| EtlError::io(target, e))
}

fn write_csv(
    path: &Path,
    header: &[&str],
    rows: &[Vec<(&'static str, String)>],
) -> Result<(), EtlError> {
    let to_io = |e: csv::Error| EtlError::io(path, io::Error::other(e));

    let mut writer = csv::Writer::from_path(path).map_err(to_io)?;
    writer.write_record(header).map_err(to_io)?;
    for row in rows {
        let cells = header.iter().map(|column| {
            row.iter()
                .find(|(name, _)| name == column)
                .map(|(_, value)| value.as_str())
                .unwrap_or("")
        });
        writer.write_record(cells).map_err(to_io)?;
    }

    let file: File = writer
        .into_inner()
        .map_err(|e| EtlError::io(path, io::Error::other(e.to_string())))?;
    file.sync_all().map_err(|e| EtlError::io(path, e))
}

/// Read every row of a processed file back into records.
pub fn read_processed_file(path: &Path) -> Result<Vec<ProcessedRecord>, EtlError> {
    let malformed = |e: csv::Error| {
        EtlError::MalformedInput(format!("processed file {}: {}", path.display(), e))
    };

    let file = File::open(path).map_err(|e| EtlError::io(path, e))?;
    let mut reader = csv::Reader::from_reader(file);
    let header = reader.headers().map_err(malformed)?.clone();

    let mut records = vec![];
    for row in reader.records() {
        let row = row.map_err(malformed)?;
        records.push(ProcessedRecord::from_columns(header.iter().zip(row.iter()))?);
    }
    Ok(records)
}
