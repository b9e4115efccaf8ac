use super::traits::TrajectoryError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One row of the energy log an external engine writes alongside its trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyRecord {
    pub step: i64,
    pub time: f64,
    pub potential: Option<f64>,
    pub kinetic: Option<f64>,
}

impl EnergyRecord {
    /// The `(kinetic, potential)` pair in the order [`crate::core::models::path::Path::fill_energies`] takes.
    pub fn as_pair(&self) -> (Option<f64>, Option<f64>) {
        (self.kinetic, self.potential)
    }
}

/// Reads a `step,time,potential,kinetic` CSV log.
pub fn read_energy_log<P: AsRef<Path>>(path: P) -> Result<Vec<EnergyRecord>, TrajectoryError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        records.push(row?);
    }
    Ok(records)
}

pub fn write_energy_log<P: AsRef<Path>>(
    path: P,
    records: &[EnergyRecord],
) -> Result<(), TrajectoryError> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}
