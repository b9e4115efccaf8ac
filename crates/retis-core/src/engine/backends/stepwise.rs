use super::{EngineAdapter, draw_velocities, effective_snapshot, render_args};
use crate::core::io::energy::read_energy_log;
use crate::core::io::trr::{TrrFrame, append_trr_frame, read_trr_file, write_trr_file};
use crate::core::models::interfaces::Interfaces;
use crate::core::models::path::Path;
use crate::core::models::phasepoint::{Configuration, PhasePoint};
use crate::core::models::status::PathStatus;
use crate::core::models::system::Snapshot;
use crate::core::order::OrderParameter;
use crate::core::rng::RandomSource;
use crate::engine::config::{ExternalSettings, TisSettings};
use crate::engine::error::EngineError;
use crate::engine::process::ProcessHandle;
use crate::engine::propagator::propagate_with;
use std::fs;
use std::path::{Path as FsPath, PathBuf};
use tracing::{debug, trace};

const STEP_INPUT: &str = "step-input.trr";
const STEP_OUTPUT: &str = "step-output.trr";
const STEP_ENERGY: &str = "step-energy.csv";

struct RunFile {
    trajectory: PathBuf,
    frames: usize,
}

/// Drives an external program that is started once for every stored frame.
///
/// Each invocation reads a single-frame TRR input, integrates `subcycles` steps and writes a
/// single-frame TRR output plus a one-row energy log. Outputs are collected in one
/// trajectory file per propagation.
pub struct StepwiseEngine {
    settings: ExternalSettings,
    masses: Vec<f64>,
    beta: f64,
    exe_dir: Option<PathBuf>,
    counter: u64,
    run: Option<RunFile>,
}

impl StepwiseEngine {
    pub fn new(settings: ExternalSettings, masses: Vec<f64>, beta: f64) -> Self {
        Self {
            settings,
            masses,
            beta,
            exe_dir: None,
            counter: 0,
            run: None,
        }
    }

    fn exe_dir(&self) -> Result<&FsPath, EngineError> {
        self.exe_dir
            .as_deref()
            .ok_or_else(|| EngineError::Internal("stepwise engine has no working directory".into()))
    }

    fn next_name(&mut self, prefix: &str) -> Result<PathBuf, EngineError> {
        self.counter += 1;
        Ok(self.exe_dir()?.join(format!("{prefix}-{:05}.trr", self.counter)))
    }

    fn start_run(&mut self) -> Result<(), EngineError> {
        let trajectory = self.next_name("run")?;
        fs::write(&trajectory, b"")?;
        debug!(trajectory = %trajectory.display(), "Starting stepwise run");
        self.run = Some(RunFile {
            trajectory,
            frames: 0,
        });
        Ok(())
    }

    fn execute(&self, dir: &FsPath, input: &FsPath) -> Result<(TrrFrame, (Option<f64>, Option<f64>)), EngineError> {
        let output = dir.join(STEP_OUTPUT);
        let energy = dir.join(STEP_ENERGY);
        for stale in [&output, &energy] {
            if stale.exists() {
                fs::remove_file(stale)?;
            }
        }
        let args = render_args(
            &self.settings.args,
            &[
                ("input", input.display().to_string()),
                ("output", output.display().to_string()),
                ("energy", energy.display().to_string()),
                ("steps", self.settings.subcycles.to_string()),
                ("timestep", self.settings.timestep.to_string()),
            ],
        );
        ProcessHandle::start(&self.settings.program, &args, dir)?.wait()?;

        if !output.exists() {
            return Err(EngineError::MissingOutput { path: output });
        }
        let frame = read_trr_file(&output)?
            .pop()
            .ok_or_else(|| EngineError::MissingOutput {
                path: output.clone(),
            })?;
        let energies = if energy.exists() {
            read_energy_log(&energy)?
                .last()
                .map(|record| record.as_pair())
                .unwrap_or_default()
        } else {
            trace!("No energy log for this step");
            (None, None)
        };
        Ok((frame, energies))
    }
}

impl EngineAdapter for StepwiseEngine {
    fn name(&self) -> &'static str {
        "stepwise"
    }

    fn snapshot(&self, point: &PhasePoint) -> Result<Snapshot, EngineError> {
        effective_snapshot(point)
    }

    fn step(
        &mut self,
        point: &PhasePoint,
        order: &dyn OrderParameter,
    ) -> Result<PhasePoint, EngineError> {
        if self.run.is_none() {
            self.start_run()?;
        }
        let dir = self.exe_dir()?.to_path_buf();
        let input = dir.join(STEP_INPUT);
        let snapshot = self.snapshot(point)?;
        write_trr_file(
            &input,
            &[TrrFrame::from_snapshot(&snapshot, 0, 0.0)],
            self.settings.double_precision,
        )?;

        let (frame, (kinetic, potential)) = self.execute(&dir, &input)?;
        let run = self
            .run
            .as_mut()
            .ok_or_else(|| EngineError::Internal("stepwise run vanished".into()))?;
        append_trr_frame(&run.trajectory, &frame, self.settings.double_precision)?;
        let index = run.frames;
        run.frames += 1;

        let next = frame.to_snapshot();
        let values = order.calculate(&next)?;
        let kinetic = kinetic.or_else(|| Some(next.kinetic_energy(&self.masses)));
        Ok(PhasePoint::new(
            Configuration::File {
                path: run.trajectory.clone(),
                index,
            },
            values,
        )
        .with_energies(kinetic, potential))
    }

    fn propagate(
        &mut self,
        path: &mut Path,
        initial: &PhasePoint,
        order: &dyn OrderParameter,
        interfaces: &Interfaces,
        reverse: bool,
    ) -> Result<(bool, PathStatus), EngineError> {
        self.start_run()?;
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
        let kinetic = snapshot.kinetic_energy(&self.masses);

        let file = self.next_name("genvel")?;
        write_trr_file(
            &file,
            &[TrrFrame::from_snapshot(&snapshot, 0, 0.0)],
            self.settings.double_precision,
        )?;
        let values = order.calculate(&snapshot)?;
        let new_point = PhasePoint::new(Configuration::File { path: file, index: 0 }, values)
            .with_energies(Some(kinetic), point.potential_energy);
        Ok((new_point, kinetic - old_kinetic, kinetic))
    }

    fn set_exe_dir(&mut self, dir: &FsPath) -> Result<(), EngineError> {
        fs::create_dir_all(dir)?;
        self.exe_dir = Some(dir.to_path_buf());
        self.run = None;
        Ok(())
    }

    fn clean_up(&mut self) -> Result<(), EngineError> {
        let Some(dir) = self.exe_dir.as_deref() else {
            return Ok(());
        };
        for name in [STEP_INPUT, STEP_OUTPUT, STEP_ENERGY, "stdout.txt", "stderr.txt"] {
            let file = dir.join(name);
            if file.exists() {
                fs::remove_file(&file)?;
            }
        }
        self.run = None;
        Ok(())
    }
}
