use chrono::NaiveDateTime;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::obd::EngineSample;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Cannot append to {path}: {source}")]
    Append { path: PathBuf, source: csv::Error },
}

/// One logged line: `date, time, rpm, speed, throttle, load, fuel_status`.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRow {
    pub date: String,
    pub time: String,
    pub sample: EngineSample,
}

impl SampleRow {
    pub const FIELDS: usize = 7;

    pub fn new(at: NaiveDateTime, sample: EngineSample) -> Self {
        Self {
            date: at.format("%Y-%m-%d").to_string(),
            time: at.format("%H:%M:%S").to_string(),
            sample,
        }
    }

    pub fn fields(&self) -> [String; Self::FIELDS] {
        let s = &self.sample;
        [
            self.date.clone(),
            self.time.clone(),
            s.rpm.to_string(),
            s.speed.to_string(),
            s.throttle.to_string(),
            s.load.to_string(),
            s.fuel_status.to_string(),
        ]
    }
}

/// Appends `row` to `path`, creating the file if needed. No header is written.
pub fn append_row(path: &Path, row: &SampleRow) -> Result<(), StorageError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| StorageError::Open { path: path.to_path_buf(), source })?;

    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);

    let append_err = |source: csv::Error| StorageError::Append { path: path.to_path_buf(), source };
    wtr.write_record(row.fields()).map_err(append_err)?;
    wtr.flush()
        .map_err(|e| append_err(csv::Error::from(e)))?;
    Ok(())
}
