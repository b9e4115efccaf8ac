use super::system::Snapshot;
use std::path::{Path, PathBuf};

/// Where the coordinates and velocities of a phase point live.
#[derive(Debug, Clone, PartialEq)]
pub enum Configuration {
    /// Frame `index` of a trajectory file written by an external engine.
    File { path: PathBuf, index: usize },
    /// Coordinates held in memory by the in-process engine.
    Memory(Snapshot),
}

impl Configuration {
    pub fn file_path(&self) -> Option<&Path> {
        match self {
            Configuration::File { path, .. } => Some(path),
            Configuration::Memory(_) => None,
        }
    }
}

/// One frame of a trajectory.
///
/// The stored configuration is always the raw output of the engine. When
/// `velocities_reversed` is set, the velocities describing the physical motion are the
/// stored velocities negated. This keeps file-backed frames immutable while still allowing
/// whole paths to be time-reversed.
#[derive(Debug, Clone, PartialEq)]
pub struct PhasePoint {
    pub config: Configuration,
    pub order: Vec<f64>,
    pub kinetic_energy: Option<f64>,
    pub potential_energy: Option<f64>,
    pub velocities_reversed: bool,
}

impl PhasePoint {
    pub fn new(config: Configuration, order: Vec<f64>) -> Self {
        Self {
            config,
            order,
            kinetic_energy: None,
            potential_energy: None,
            velocities_reversed: false,
        }
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self::new(Configuration::Memory(snapshot), Vec::new())
    }

    /// The first component of the order parameter, used for all interface tests.
    ///
    /// A point whose order has not been computed yet reports `NaN`, which fails every
    /// interface comparison.
    #[inline]
    pub fn order_value(&self) -> f64 {
        self.order.first().copied().unwrap_or(f64::NAN)
    }

    pub fn with_energies(mut self, kinetic: Option<f64>, potential: Option<f64>) -> Self {
        self.kinetic_energy = kinetic;
        self.potential_energy = potential;
        self
    }

    /// The same configuration with the opposite direction of time.
    pub fn time_reversed(&self) -> Self {
        let mut point = self.clone();
        point.velocities_reversed = !point.velocities_reversed;
        point
    }

    /// Total energy when both contributions are known.
    pub fn total_energy(&self) -> Option<f64> {
        Some(self.kinetic_energy? + self.potential_energy?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn order_value_is_nan_before_the_order_is_computed() {
        let p = PhasePoint::from_snapshot(Snapshot::new(vec![Vector3::zeros()], vec![]));
        assert!(p.order_value().is_nan());
    }

    #[test]
    fn time_reversed_toggles_only_the_flag() {
        let p = PhasePoint::new(
            Configuration::File {
                path: PathBuf::from("traj.trr"),
                index: 3,
            },
            vec![0.5, 1.0],
        );
        let r = p.time_reversed();
        assert!(r.velocities_reversed);
        assert_eq!(r.config, p.config);
        assert_eq!(r.order, p.order);
        assert_eq!(r.time_reversed(), p);
    }

    #[test]
    fn total_energy_requires_both_terms() {
        let p = PhasePoint::new(Configuration::Memory(Snapshot::new(vec![], vec![])), vec![0.0]);
        assert_eq!(p.total_energy(), None);
        let p = p.with_energies(Some(1.0), Some(-3.0));
        assert_eq!(p.total_energy(), Some(-2.0));
    }
}
