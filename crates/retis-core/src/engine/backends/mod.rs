//! Dynamics engines: the in-process integrator and the two external-program drivers.

pub mod continuous;
pub mod internal;
pub mod stepwise;

use super::config::{EngineSettings, TisSettings};
use super::error::EngineError;
use crate::core::io::trr::read_trr_frame;
use crate::core::models::interfaces::Interfaces;
use crate::core::models::path::Path;
use crate::core::models::phasepoint::{Configuration, PhasePoint};
use crate::core::models::status::PathStatus;
use crate::core::models::system::Snapshot;
use crate::core::order::OrderParameter;
use crate::core::rng::RandomSource;
use std::path::Path as FsPath;

pub use continuous::ContinuousEngine;
pub use internal::{InternalEngine, Potential};
pub use stepwise::StepwiseEngine;

/// The capability every dynamics backend provides to the sampling algorithms.
///
/// Points handed to an engine follow the velocity sign convention of [`PhasePoint`]:
/// the engine always integrates the effective velocities.
pub trait EngineAdapter: Send {
    fn name(&self) -> &'static str;

    /// Loads the effective configuration of `point`, with any velocity reversal applied.
    fn snapshot(&self, point: &PhasePoint) -> Result<Snapshot, EngineError>;

    fn calculate_order(
        &self,
        point: &PhasePoint,
        order: &dyn OrderParameter,
    ) -> Result<Vec<f64>, EngineError> {
        let snapshot = self.snapshot(point)?;
        Ok(order.calculate(&snapshot)?)
    }

    /// Advances `point` by one stored frame.
    fn step(
        &mut self,
        point: &PhasePoint,
        order: &dyn OrderParameter,
    ) -> Result<PhasePoint, EngineError>;

    /// Advances `point` by `steps` stored frames, returning every intermediate frame.
    fn integrate(
        &mut self,
        point: &PhasePoint,
        order: &dyn OrderParameter,
        steps: usize,
    ) -> Result<Vec<PhasePoint>, EngineError> {
        let mut frames = Vec::with_capacity(steps);
        let mut current = point.clone();
        for _ in 0..steps {
            current = self.step(&current, order)?;
            frames.push(current.clone());
        }
        Ok(frames)
    }

    /// Fills `path` from `initial` until the stopping rule fires.
    ///
    /// With `reverse` the integration starts from the negated effective velocities of
    /// `initial`. Returns whether an outer interface was reached and the matching status.
    fn propagate(
        &mut self,
        path: &mut Path,
        initial: &PhasePoint,
        order: &dyn OrderParameter,
        interfaces: &Interfaces,
        reverse: bool,
    ) -> Result<(bool, PathStatus), EngineError>;

    /// Draws new velocities for `point`.
    ///
    /// Returns the new point with its order recomputed, the change in kinetic energy and
    /// the new kinetic energy.
    fn generate_velocities(
        &mut self,
        point: &PhasePoint,
        order: &dyn OrderParameter,
        rng: &mut dyn RandomSource,
        settings: &TisSettings,
    ) -> Result<(PhasePoint, f64, f64), EngineError>;

    /// Directory external programs run in and engine files are written to.
    fn set_exe_dir(&mut self, dir: &FsPath) -> Result<(), EngineError>;

    /// Removes scratch files. Trajectories referenced by paths are kept.
    fn clean_up(&mut self) -> Result<(), EngineError>;
}

/// Creates the engine described by `settings`.
pub fn build_engine(settings: &EngineSettings, masses: &[f64], beta: f64) -> Box<dyn EngineAdapter> {
    match settings {
        EngineSettings::Internal(s) => Box::new(InternalEngine::new(s.clone(), masses.to_vec(), beta)),
        EngineSettings::Stepwise(s) => Box::new(StepwiseEngine::new(s.clone(), masses.to_vec(), beta)),
        EngineSettings::Continuous(s) => {
            Box::new(ContinuousEngine::new(s.clone(), masses.to_vec(), beta))
        }
    }
}

/// Draws velocities in place.
///
/// Aimless moves replace every velocity with a Maxwell-Boltzmann draw. Otherwise each
/// component is perturbed by a normal deviate of width `sigma_v`.
pub(crate) fn draw_velocities(
    snapshot: &mut Snapshot,
    masses: &[f64],
    beta: f64,
    rng: &mut dyn RandomSource,
    settings: &TisSettings,
) {
    let sigma_v = settings.sigma_v.unwrap_or(0.0);
    for (i, v) in snapshot.velocities.iter_mut().enumerate() {
        let mass = masses.get(i).copied().unwrap_or(1.0);
        if settings.aimless {
            let width = (1.0 / (beta * mass)).sqrt();
            for k in 0..3 {
                v[k] = width * rng.normal();
            }
        } else {
            for k in 0..3 {
                v[k] += sigma_v * rng.normal();
            }
        }
    }
    if settings.zero_momentum {
        snapshot.zero_momentum(masses);
    }
}

/// Reads the raw frame a file-backed configuration points at.
pub(crate) fn load_configuration(config: &Configuration) -> Result<Snapshot, EngineError> {
    match config {
        Configuration::Memory(snapshot) => Ok(snapshot.clone()),
        Configuration::File { path, index } => Ok(read_trr_frame(path, *index)?.to_snapshot()),
    }
}

/// Raw configuration with the point's velocity flag applied.
pub(crate) fn effective_snapshot(point: &PhasePoint) -> Result<Snapshot, EngineError> {
    let mut snapshot = load_configuration(&point.config)?;
    if point.velocities_reversed {
        snapshot.reverse_velocities();
    }
    Ok(snapshot)
}

/// Substitutes `{name}` placeholders in argument templates.
pub(crate) fn render_args(templates: &[String], values: &[(&str, String)]) -> Vec<String> {
    templates
        .iter()
        .map(|template| {
            values.iter().fold(template.clone(), |arg, (name, value)| {
                arg.replace(&format!("{{{name}}}"), value)
            })
        })
        .collect()
}
