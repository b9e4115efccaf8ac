use super::traits::TrajectoryError;
use crate::core::models::path::Path;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::Path as FsPath;

/// Summary of one trial path as recorded in an ensemble's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathRecord {
    pub cycle: u64,
    pub accepted: bool,
    pub status: String,
    pub generated: String,
    pub shoot_index: Option<usize>,
    pub length: usize,
    pub ordermin: f64,
    pub ordermax: f64,
}

impl PathRecord {
    pub fn from_path(path: &Path, cycle: u64, accepted: bool) -> Self {
        Self {
            cycle,
            accepted,
            status: path.status().map_or("---", |s| s.code()).to_string(),
            generated: path.generated().map_or("--", |g| g.code()).to_string(),
            shoot_index: path.generated().and_then(|g| g.shooting_index()),
            length: path.len(),
            ordermin: path.ordermin().map_or(f64::NAN, |(v, _)| v),
            ordermax: path.ordermax().map_or(f64::NAN, |(v, _)| v),
        }
    }
}

/// Append-only CSV log of trial paths.
pub struct PathLog {
    writer: csv::Writer<File>,
}

impl PathLog {
    /// Opens `path` for appending. A header row is written only to a new, empty file.
    pub fn open<P: AsRef<FsPath>>(path: P) -> Result<Self, TrajectoryError> {
        let path = path.as_ref();
        let fresh = path.metadata().map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let writer = csv::WriterBuilder::new()
            .has_headers(fresh)
            .from_writer(file);
        Ok(Self { writer })
    }

    pub fn append(&mut self, record: &PathRecord) -> Result<(), TrajectoryError> {
        self.writer.serialize(record)?;
        self.writer.flush()?;
        Ok(())
    }
}

pub fn read_path_log<P: AsRef<FsPath>>(path: P) -> Result<Vec<PathRecord>, TrajectoryError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        records.push(row?);
    }
    Ok(records)
}
