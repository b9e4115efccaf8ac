use super::{EngineAdapter, draw_velocities, effective_snapshot};
use crate::core::models::interfaces::Interfaces;
use crate::core::models::path::Path;
use crate::core::models::phasepoint::{Configuration, PhasePoint};
use crate::core::models::status::PathStatus;
use crate::core::models::system::Snapshot;
use crate::core::order::OrderParameter;
use crate::core::rng::RandomSource;
use crate::engine::config::{InternalSettings, TisSettings};
use crate::engine::error::EngineError;
use crate::engine::propagator::propagate_with;
use nalgebra::Vector3;
use std::path::Path as FsPath;

/// One-dimensional model potentials acting on the x coordinate of every particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Potential {
    Free,
    /// `k (x - center)^2 / 2`
    Harmonic { k: f64, center: f64 },
    /// `a x^4 - b (x - c)^2`
    DoubleWell { a: f64, b: f64, c: f64 },
}

impl Potential {
    fn energy(&self, x: f64) -> f64 {
        match *self {
            Potential::Free => 0.0,
            Potential::Harmonic { k, center } => 0.5 * k * (x - center).powi(2),
            Potential::DoubleWell { a, b, c } => a * x.powi(4) - b * (x - c).powi(2),
        }
    }

    fn force(&self, x: f64) -> f64 {
        match *self {
            Potential::Free => 0.0,
            Potential::Harmonic { k, center } => -k * (x - center),
            Potential::DoubleWell { a, b, c } => -(4.0 * a * x.powi(3) - 2.0 * b * (x - c)),
        }
    }

    pub fn potential_energy(&self, snapshot: &Snapshot) -> f64 {
        snapshot.positions.iter().map(|r| self.energy(r.x)).sum()
    }

    pub fn forces(&self, snapshot: &Snapshot) -> Vec<Vector3<f64>> {
        snapshot
            .positions
            .iter()
            .map(|r| Vector3::new(self.force(r.x), 0.0, 0.0))
            .collect()
    }
}

/// In-process velocity Verlet integrator holding configurations in memory.
#[derive(Debug, Clone)]
pub struct InternalEngine {
    settings: InternalSettings,
    masses: Vec<f64>,
    beta: f64,
}

impl InternalEngine {
    pub fn new(settings: InternalSettings, masses: Vec<f64>, beta: f64) -> Self {
        Self {
            settings,
            masses,
            beta,
        }
    }

    fn mass(&self, i: usize) -> f64 {
        self.masses.get(i).copied().unwrap_or(1.0)
    }

    fn verlet(&self, snapshot: &mut Snapshot) {
        let dt = self.settings.timestep;
        let mut forces = self.settings.potential.forces(snapshot);
        for _ in 0..self.settings.subcycles {
            for (i, (v, f)) in snapshot.velocities.iter_mut().zip(&forces).enumerate() {
                *v += *f * (0.5 * dt / self.mass(i));
            }
            for (r, v) in snapshot.positions.iter_mut().zip(&snapshot.velocities) {
                *r += *v * dt;
            }
            forces = self.settings.potential.forces(snapshot);
            for (i, (v, f)) in snapshot.velocities.iter_mut().zip(&forces).enumerate() {
                *v += *f * (0.5 * dt / self.mass(i));
            }
        }
    }

    fn point_from(
        &self,
        snapshot: Snapshot,
        order: &dyn OrderParameter,
    ) -> Result<PhasePoint, EngineError> {
        let values = order.calculate(&snapshot)?;
        let kinetic = snapshot.kinetic_energy(&self.masses);
        let potential = self.settings.potential.potential_energy(&snapshot);
        Ok(PhasePoint::new(Configuration::Memory(snapshot), values)
            .with_energies(Some(kinetic), Some(potential)))
    }
}

impl EngineAdapter for InternalEngine {
    fn name(&self) -> &'static str {
        "internal"
    }

    fn snapshot(&self, point: &PhasePoint) -> Result<Snapshot, EngineError> {
        effective_snapshot(point)
    }

    fn step(
        &mut self,
        point: &PhasePoint,
        order: &dyn OrderParameter,
    ) -> Result<PhasePoint, EngineError> {
        let mut snapshot = self.snapshot(point)?;
        self.verlet(&mut snapshot);
        self.point_from(snapshot, order)
    }

    fn propagate(
        &mut self,
        path: &mut Path,
        initial: &PhasePoint,
        order: &dyn OrderParameter,
        interfaces: &Interfaces,
        reverse: bool,
    ) -> Result<(bool, PathStatus), EngineError> {
        let mut start = if reverse {
            initial.time_reversed()
        } else {
            initial.clone()
        };
        start.order = self.calculate_order(&start, order)?;
        propagate_with(path, start, interfaces, |point| self.step(point, order))
    }

    fn generate_velocities(
        &mut self,
        point: &PhasePoint,
        order: &dyn OrderParameter,
        rng: &mut dyn RandomSource,
        settings: &TisSettings,
    ) -> Result<(PhasePoint, f64, f64), EngineError> {
        let mut snapshot = self.snapshot(point)?;
        let old_kinetic = snapshot.kinetic_energy(&self.masses);
        draw_velocities(&mut snapshot, &self.masses, self.beta, rng, settings);
        let new_point = self.point_from(snapshot, order)?;
        let kinetic = new_point.kinetic_energy.unwrap_or_default();
        Ok((new_point, kinetic - old_kinetic, kinetic))
    }

    fn set_exe_dir(&mut self, _dir: &FsPath) -> Result<(), EngineError> {
        Ok(())
    }

    fn clean_up(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::order::Position;
    use crate::core::rng::testing::ScriptedRandom;
    use crate::engine::config::TisSettingsBuilder;

    pub(crate) fn engine(potential: Potential, timestep: f64) -> InternalEngine {
        InternalEngine::new(
            InternalSettings {
                timestep,
                subcycles: 1,
                potential,
            },
            vec![1.0],
            1.0,
        )
    }

    /// A single particle on the x axis moving with velocity `vx`.
    pub(crate) fn particle(x: f64, vx: f64) -> PhasePoint {
        let snapshot = Snapshot::new(vec![Vector3::new(x, 0.0, 0.0)], vec![Vector3::new(vx, 0.0, 0.0)]);
        let order = vec![x];
        PhasePoint::new(Configuration::Memory(snapshot), order)
    }

    #[test]
    fn free_particle_moves_ballistically() {
        let mut engine = engine(Potential::Free, 0.1);
        let next = engine.step(&particle(0.0, 1.0), &Position::new(0, 0)).unwrap();
        assert!((next.order_value() - 0.1).abs() < 1e-12);
        assert_eq!(next.kinetic_energy, Some(0.5));
        assert_eq!(next.potential_energy, Some(0.0));
    }

    #[test]
    fn harmonic_oscillator_conserves_energy() {
        let mut engine = engine(Potential::Harmonic { k: 1.0, center: 0.0 }, 0.01);
        let order = Position::new(0, 0);
        let frames = engine.integrate(&particle(1.0, 0.0), &order, 500).unwrap();
        let initial = 0.5;
        for frame in &frames {
            let total = frame.total_energy().unwrap();
            assert!((total - initial).abs() < 1e-3, "energy drifted to {total}");
        }
        assert!(frames.iter().any(|f| f.order_value() < 0.0));
    }

    #[test]
    fn double_well_pushes_towards_the_minima() {
        let well = Potential::DoubleWell { a: 1.0, b: 2.0, c: 0.0 };
        assert!(well.force(0.1) > 0.0);
        assert!(well.force(-0.1) < 0.0);
        assert!(well.force(2.0) < 0.0);
        assert_eq!(well.energy(1.0), -1.0);
    }

    #[test]
    fn reversed_propagation_runs_backwards_in_time() {
        let mut engine = engine(Potential::Free, 0.25);
        let interfaces = Interfaces::new(-1.0, 0.0, 1.0).unwrap();
        let mut path = Path::new(20);
        let (success, status) = engine
            .propagate(&mut path, &particle(0.0, 1.0), &Position::new(0, 0), &interfaces, true)
            .unwrap();
        assert!(success);
        assert_eq!(status, PathStatus::Accepted);
        assert_eq!(path.len(), 5);
        assert!((path.last().unwrap().order_value() + 1.0).abs() < 1e-12);
        assert!(path.first().unwrap().velocities_reversed);
        assert!(!path.last().unwrap().velocities_reversed);

        let forward = path.reversed();
        let first = engine.snapshot(forward.first().unwrap()).unwrap();
        assert!((first.velocities[0].x - 1.0).abs() < 1e-12);
    }

    #[test]
    fn generated_velocities_report_the_kinetic_energy_change() {
        let mut engine = engine(Potential::Free, 0.1);
        let settings = TisSettingsBuilder::new().maxlength(10).build().unwrap();
        let mut rng = ScriptedRandom::new(&[], &[2.0, 0.0, 0.0]);
        let (point, dek, kinetic) = engine
            .generate_velocities(&particle(0.3, 1.0), &Position::new(0, 0), &mut rng, &settings)
            .unwrap();
        assert_eq!(kinetic, 2.0);
        assert_eq!(dek, 1.5);
        assert_eq!(point.order, vec![0.3]);
        assert!(!point.velocities_reversed);
    }
}
