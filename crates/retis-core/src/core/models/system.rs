use nalgebra::{Matrix3, Vector3};

/// An in-memory configuration of the simulated system.
///
/// Positions and velocities always have one entry per particle. The box is optional
/// because in-process model systems are frequently non-periodic.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub positions: Vec<Vector3<f64>>,
    pub velocities: Vec<Vector3<f64>>,
    pub box_matrix: Option<Matrix3<f64>>,
}

impl Snapshot {
    /// Creates a snapshot, padding missing velocities with zeros.
    pub fn new(positions: Vec<Vector3<f64>>, mut velocities: Vec<Vector3<f64>>) -> Self {
        velocities.resize(positions.len(), Vector3::zeros());
        Self {
            positions,
            velocities,
            box_matrix: None,
        }
    }

    pub fn with_box(mut self, box_matrix: Matrix3<f64>) -> Self {
        self.box_matrix = Some(box_matrix);
        self
    }

    #[inline]
    pub fn natoms(&self) -> usize {
        self.positions.len()
    }

    /// Kinetic energy `sum(m v^2) / 2`. Particles beyond `masses.len()` get unit mass.
    pub fn kinetic_energy(&self, masses: &[f64]) -> f64 {
        self.velocities
            .iter()
            .enumerate()
            .map(|(i, v)| 0.5 * masses.get(i).copied().unwrap_or(1.0) * v.norm_squared())
            .sum()
    }

    pub fn reverse_velocities(&mut self) {
        for v in &mut self.velocities {
            *v = -*v;
        }
    }

    pub fn with_reversed_velocities(&self) -> Self {
        let mut copy = self.clone();
        copy.reverse_velocities();
        copy
    }

    /// Removes the center-of-mass velocity.
    pub fn zero_momentum(&mut self, masses: &[f64]) {
        let mut momentum = Vector3::zeros();
        let mut total_mass = 0.0;
        for (i, v) in self.velocities.iter().enumerate() {
            let m = masses.get(i).copied().unwrap_or(1.0);
            momentum += m * v;
            total_mass += m;
        }
        if total_mass <= 0.0 {
            return;
        }
        let com_velocity = momentum / total_mass;
        for v in &mut self.velocities {
            *v -= com_velocity;
        }
    }
}
