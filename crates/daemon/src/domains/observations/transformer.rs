use slog::{debug, info, warn, Logger};
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

use super::{normalize, standardize, write_processed_file, ProcessedRecord, TransformRules};
use crate::EtlError;

/// Turns one raw current-weather file into one processed file.
pub struct Transformer {
    logger: Logger,
    rules: TransformRules,
}

impl Transformer {
    pub fn new(logger: Logger, rules: TransformRules) -> Self {
        Transformer { logger, rules }
    }

    pub fn transform_document(
        &self,
        document: &str,
        run_time: OffsetDateTime,
    ) -> Result<ProcessedRecord, EtlError> {
        let row = normalize(document)?;
        debug!(self.logger, "normalized document into {} columns", row.len());

        let row = standardize(row, &self.rules);
        debug!(self.logger, "standardized columns: {:?}", row.keys());

        let record = ProcessedRecord::from_row(&row, run_time)?;
        if record.has_unrepresentable_times() {
            warn!(
                self.logger,
                "some local times could not be represented and were marked invalid"
            );
        }
        Ok(record)
    }

    /// Transform the raw file at `raw_path` and publish the result at
    /// `processed_path`. The raw file is never modified, and on error no
    /// processed file is published.
    pub fn transform_file(
        &self,
        raw_path: &Path,
        processed_path: &Path,
        run_time: OffsetDateTime,
    ) -> Result<PathBuf, EtlError> {
        info!(self.logger, "transforming {}", raw_path.display());
        let document = fs::read_to_string(raw_path).map_err(|e| EtlError::io(raw_path, e))?;

        let record = self.transform_document(&document, run_time)?;
        let published = write_processed_file(processed_path, &[record])?;

        info!(self.logger, "processed data saved to {}", published.display());
        Ok(published)
    }
}
