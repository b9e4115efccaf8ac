//! Order parameters: pure functions mapping a configuration to a progress coordinate.
//!
//! Only the calling contract matters to the sampling machinery. The stock
//! implementations here cover the model systems the in-process engine is used with;
//! anything more elaborate is supplied by implementing [`OrderParameter`].

use crate::core::models::system::Snapshot;
use nalgebra::Vector3;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("Particle index {index} is out of range for a system of {natoms} particles")]
    ParticleOutOfRange { index: usize, natoms: usize },

    #[error("Dimension {0} is out of range (expected 0, 1 or 2)")]
    InvalidDimension(usize),

    #[error("Particle {index} has no velocity (snapshot carries {count})")]
    MissingVelocity { index: usize, count: usize },
}

/// Computes the order parameter of a configuration.
///
/// The first component of the returned vector is the one compared against interfaces.
/// Implementations receive the physical velocities, i.e. any velocity reversal recorded
/// on a phase point has already been applied.
pub trait OrderParameter: Send + Sync {
    fn calculate(&self, snapshot: &Snapshot) -> Result<Vec<f64>, OrderError>;

    /// Whether the value changes when the velocities are negated.
    ///
    /// Reversing a path only needs to recompute orders for such parameters.
    fn velocity_dependent(&self) -> bool {
        false
    }

    fn description(&self) -> String;
}

/// One Cartesian component of one particle's position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub index: usize,
    pub dim: usize,
    pub periodic: bool,
}

impl Position {
    pub fn new(index: usize, dim: usize) -> Self {
        Self {
            index,
            dim,
            periodic: false,
        }
    }
}

impl OrderParameter for Position {
    fn calculate(&self, snapshot: &Snapshot) -> Result<Vec<f64>, OrderError> {
        check_dim(self.dim)?;
        let position = particle(snapshot, self.index)?;
        let mut value = position[self.dim];
        if self.periodic {
            if let Some(length) = box_length(snapshot, self.dim) {
                value -= (value / length).floor() * length;
            }
        }
        Ok(vec![value])
    }

    fn description(&self) -> String {
        format!("position of particle {} along axis {}", self.index, self.dim)
    }
}

/// Distance between two particles, with an optional second component giving the
/// rate of change of that distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Distance {
    pub first: usize,
    pub second: usize,
    pub periodic: bool,
    pub with_velocity: bool,
}

impl OrderParameter for Distance {
    fn calculate(&self, snapshot: &Snapshot) -> Result<Vec<f64>, OrderError> {
        let a = particle(snapshot, self.first)?;
        let b = particle(snapshot, self.second)?;
        let mut delta = b - a;
        if self.periodic {
            for dim in 0..3 {
                if let Some(length) = box_length(snapshot, dim) {
                    delta[dim] -= (delta[dim] / length).round() * length;
                }
            }
        }
        let distance = delta.norm();
        if !self.with_velocity {
            return Ok(vec![distance]);
        }
        let relative = velocity(snapshot, self.second)? - velocity(snapshot, self.first)?;
        let rate = if distance > 0.0 {
            delta.dot(&relative) / distance
        } else {
            0.0
        };
        Ok(vec![distance, rate])
    }

    fn velocity_dependent(&self) -> bool {
        self.with_velocity
    }

    fn description(&self) -> String {
        format!("distance between particles {} and {}", self.first, self.second)
    }
}

/// One Cartesian component of one particle's velocity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Velocity {
    pub index: usize,
    pub dim: usize,
}

impl OrderParameter for Velocity {
    fn calculate(&self, snapshot: &Snapshot) -> Result<Vec<f64>, OrderError> {
        check_dim(self.dim)?;
        particle(snapshot, self.index)?;
        Ok(vec![velocity(snapshot, self.index)?[self.dim]])
    }

    fn velocity_dependent(&self) -> bool {
        true
    }

    fn description(&self) -> String {
        format!("velocity of particle {} along axis {}", self.index, self.dim)
    }
}

fn check_dim(dim: usize) -> Result<(), OrderError> {
    if dim < 3 {
        Ok(())
    } else {
        Err(OrderError::InvalidDimension(dim))
    }
}

fn particle(snapshot: &Snapshot, index: usize) -> Result<&Vector3<f64>, OrderError> {
    snapshot
        .positions
        .get(index)
        .ok_or(OrderError::ParticleOutOfRange {
            index,
            natoms: snapshot.natoms(),
        })
}

fn velocity(snapshot: &Snapshot, index: usize) -> Result<&Vector3<f64>, OrderError> {
    snapshot
        .velocities
        .get(index)
        .ok_or(OrderError::MissingVelocity {
            index,
            count: snapshot.velocities.len(),
        })
}

fn box_length(snapshot: &Snapshot, dim: usize) -> Option<f64> {
    snapshot
        .box_matrix
        .map(|b| b[(dim, dim)])
        .filter(|&l| l > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3;

    fn pair() -> Snapshot {
        Snapshot::new(
            vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(3.0, 4.0, 0.0)],
            vec![Vector3::zeros(), Vector3::new(3.0, 4.0, 0.0)],
        )
    }

    #[test]
    fn position_reads_the_requested_component() {
        let order = Position::new(1, 1);
        assert_eq!(order.calculate(&pair()).unwrap(), vec![4.0]);
        assert!(!order.velocity_dependent());
    }

    #[test]
    fn position_wraps_into_the_box_when_periodic() {
        let snapshot = pair().with_box(Matrix3::from_diagonal_element(3.0));
        let order = Position {
            index: 1,
            dim: 1,
            periodic: true,
        };
        let value = order.calculate(&snapshot).unwrap()[0];
        assert!((value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn out_of_range_particles_and_axes_are_errors() {
        assert_eq!(
            Position::new(5, 0).calculate(&pair()),
            Err(OrderError::ParticleOutOfRange { index: 5, natoms: 2 })
        );
        assert_eq!(
            Position::new(0, 3).calculate(&pair()),
            Err(OrderError::InvalidDimension(3))
        );
    }

    #[test]
    fn distance_reports_separation_and_rate() {
        let order = Distance {
            first: 0,
            second: 1,
            periodic: false,
            with_velocity: true,
        };
        let value = order.calculate(&pair()).unwrap();
        assert!((value[0] - 5.0).abs() < 1e-12);
        assert!((value[1] - 5.0).abs() < 1e-12);
        assert!(order.velocity_dependent());
    }

    #[test]
    fn distance_uses_minimum_image_when_periodic() {
        let snapshot = pair().with_box(Matrix3::from_diagonal_element(5.0));
        let order = Distance {
            first: 0,
            second: 1,
            periodic: true,
            with_velocity: false,
        };
        let value = order.calculate(&snapshot).unwrap()[0];
        assert!((value - (4.0f64 + 1.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn short_velocity_arrays_are_errors() {
        let snapshot = Snapshot {
            positions: pair().positions,
            velocities: vec![Vector3::zeros()],
            box_matrix: None,
        };
        let missing = Err(OrderError::MissingVelocity { index: 1, count: 1 });
        assert_eq!(Velocity { index: 1, dim: 0 }.calculate(&snapshot), missing);
        let distance = Distance {
            first: 0,
            second: 1,
            periodic: false,
            with_velocity: true,
        };
        assert_eq!(distance.calculate(&snapshot), missing);
    }

    #[test]
    fn velocity_order_changes_sign_with_reversed_velocities() {
        let order = Velocity { index: 1, dim: 0 };
        let forward = order.calculate(&pair()).unwrap()[0];
        let backward = order.calculate(&pair().with_reversed_velocities()).unwrap()[0];
        assert_eq!(forward, -backward);
    }
}
