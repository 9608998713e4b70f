//! Day-keyed CSV log store.
//!
//! Every sample lands in the file of its UTC calendar day,
//! `<output_dir>/samples.YYYY-MM-DD.csv`. Files are opened lazily in append mode
//! and receive the header only when they are empty, so restarting the logger on
//! the same day continues the existing file.
//!
//! The store owns every writer it opens. Writers are buffered; call
//! [`DayLogStore::flush`] to push buffered rows to the OS. Handles are closed when
//! the store is dropped.

use crate::data::sample::{Sample, CSV_HEADER};
use crate::error::{AppResult, DaqError};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SECONDS_PER_DAY: i64 = 86_400;

/// UNIX timestamp of 00:00:00 UTC of the day containing `unix_timestamp`.
pub fn day_key(unix_timestamp: f64) -> i64 {
    (unix_timestamp.floor() as i64).div_euclid(SECONDS_PER_DAY) * SECONDS_PER_DAY
}

/// File name used for the day starting at `key`.
pub fn file_name_for_day(key: i64) -> String {
    let date = DateTime::<Utc>::from_timestamp(key, 0)
        .map(|dt| dt.date_naive())
        .unwrap_or(NaiveDate::MIN);
    format!("samples.{}.csv", date.format("%Y-%m-%d"))
}

/// Append-only CSV files, one per UTC day.
pub struct DayLogStore {
    location: PathBuf,
    // Key is the beginning of the day UNIX timestamp:
    files: BTreeMap<i64, csv::Writer<File>>,
}

impl DayLogStore {
    /// Create the store, making sure `location` exists.
    pub fn new(location: impl Into<PathBuf>) -> AppResult<Self> {
        let location = location.into();
        std::fs::create_dir_all(&location).map_err(|e| {
            DaqError::Storage(format!(
                "Failed to create output directory '{}': {}",
                location.display(),
                e
            ))
        })?;
        info!("Logging samples to '{}'", location.display());
        Ok(Self {
            location,
            files: BTreeMap::new(),
        })
    }

    /// Directory holding the CSV files.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Number of days with an open writer.
    pub fn open_files(&self) -> usize {
        self.files.len()
    }

    /// Append one row for `sample` to its day's file.
    pub fn write(&mut self, sample: &Sample) -> AppResult<()> {
        let key = day_key(sample.initiate_timestamp);
        let writer = match self.files.entry(key) {
            std::collections::btree_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::btree_map::Entry::Vacant(entry) => {
                let path = self.location.join(file_name_for_day(key));
                entry.insert(open_day_file(&path)?)
            }
        };
        writer.write_record(sample.to_record())?;
        Ok(())
    }

    /// Flush every open writer.
    pub fn flush(&mut self) -> AppResult<()> {
        for writer in self.files.values_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

fn open_day_file(path: &Path) -> AppResult<csv::Writer<File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            DaqError::Storage(format!("Failed to open '{}': {}", path.display(), e))
        })?;
    let is_new = file.metadata()?.len() == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    if is_new {
        writer.write_record(CSV_HEADER)?;
        writer.flush()?;
        info!("Created log file '{}'", path.display());
    } else {
        debug!("Appending to existing log file '{}'", path.display());
    }
    Ok(writer)
}
