use super::{EngineAdapter, draw_velocities, effective_snapshot, render_args};
use crate::core::io::energy::read_energy_log;
use crate::core::io::trr::{TrrDecoder, TrrFrame, read_trr_file, write_trr_file};
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
use crate::engine::propagator::{StepSignal, add_point};
use crate::engine::streaming::{RunSpec, StreamingRunner};
use std::fs;
use std::path::{Path as FsPath, PathBuf};
use tracing::{debug, warn};

/// Drives an external program that is started once per propagation and streams frames.
///
/// The program receives the initial frame as `{input}`, integrates `{steps}` steps and
/// writes one frame every `subcycles` steps to `{trajectory}`, beginning with the initial
/// frame. Frames are consumed while the program is still running, and the program is
/// stopped as soon as the path is complete.
pub struct ContinuousEngine {
    settings: ExternalSettings,
    masses: Vec<f64>,
    beta: f64,
    exe_dir: Option<PathBuf>,
    counter: u64,
    scratch: Vec<PathBuf>,
}

impl ContinuousEngine {
    pub fn new(settings: ExternalSettings, masses: Vec<f64>, beta: f64) -> Self {
        Self {
            settings,
            masses,
            beta,
            exe_dir: None,
            counter: 0,
            scratch: Vec::new(),
        }
    }

    fn exe_dir(&self) -> Result<&FsPath, EngineError> {
        self.exe_dir.as_deref().ok_or_else(|| {
            EngineError::Internal("continuous engine has no working directory".into())
        })
    }

    fn next_id(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    fn write_frame(&self, file: &FsPath, snapshot: &Snapshot) -> Result<(), EngineError> {
        write_trr_file(
            file,
            &[TrrFrame::from_snapshot(snapshot, 0, 0.0)],
            self.settings.double_precision,
        )?;
        Ok(())
    }

    fn back_fill_energies(&self, path: &mut Path, start: usize, energy: &FsPath) -> Result<(), EngineError> {
        if !energy.exists() {
            debug!(energy = %energy.display(), "No energy log written; energies stay empty");
            return Ok(());
        }
        let records = read_energy_log(energy)?;
        let expected = path.len() - start;
        if records.len() < expected {
            debug!(
                rows = records.len(),
                frames = expected,
                "Energy log is shorter than the trajectory"
            );
        }
        path.fill_energies(start, records.iter().map(|r| r.as_pair()))?;
        Ok(())
    }
}

impl EngineAdapter for ContinuousEngine {
    fn name(&self) -> &'static str {
        "continuous"
    }

    fn snapshot(&self, point: &PhasePoint) -> Result<Snapshot, EngineError> {
        effective_snapshot(point)
    }

    /// Runs the program for one stored frame.
    ///
    /// Used by the kick initiation; propagation streams a whole path from one invocation.
    fn step(
        &mut self,
        point: &PhasePoint,
        order: &dyn OrderParameter,
    ) -> Result<PhasePoint, EngineError> {
        let id = self.next_id();
        let dir = self.exe_dir()?.to_path_buf();
        let input = dir.join(format!("step-{id:05}-input.trr"));
        let trajectory = dir.join(format!("step-{id:05}.trr"));
        let energy = dir.join(format!("step-{id:05}-energy.csv"));
        self.write_frame(&input, &self.snapshot(point)?)?;
        self.scratch.extend([input.clone(), energy.clone()]);

        let args = render_args(
            &self.settings.args,
            &[
                ("input", input.display().to_string()),
                ("trajectory", trajectory.display().to_string()),
                ("energy", energy.display().to_string()),
                ("steps", self.settings.subcycles.to_string()),
                ("timestep", self.settings.timestep.to_string()),
            ],
        );
        ProcessHandle::start(&self.settings.program, &args, &dir)?.wait()?;
        if !trajectory.exists() {
            return Err(EngineError::MissingOutput { path: trajectory });
        }
        let frames = read_trr_file(&trajectory)?;
        let index = frames.len().checked_sub(1).ok_or_else(|| EngineError::MissingOutput {
            path: trajectory.clone(),
        })?;
        let next = frames[index].to_snapshot();
        let values = order.calculate(&next)?;
        let kinetic = next.kinetic_energy(&self.masses);
        let potential = if energy.exists() {
            read_energy_log(&energy)?.get(index).and_then(|r| r.potential)
        } else {
            None
        };
        Ok(PhasePoint::new(Configuration::File { path: trajectory, index }, values)
            .with_energies(Some(kinetic), potential))
    }

    fn propagate(
        &mut self,
        path: &mut Path,
        initial: &PhasePoint,
        order: &dyn OrderParameter,
        interfaces: &Interfaces,
        reverse: bool,
    ) -> Result<(bool, PathStatus), EngineError> {
        if path.is_full() {
            return Ok(StepSignal::Exhausted.outcome());
        }
        let id = self.next_id();
        let dir = self.exe_dir()?.to_path_buf();
        let input = dir.join(format!("run-{id:05}-input.trr"));
        let trajectory = dir.join(format!("run-{id:05}.trr"));
        let energy = dir.join(format!("run-{id:05}-energy.csv"));

        let start = if reverse {
            initial.time_reversed()
        } else {
            initial.clone()
        };
        self.write_frame(&input, &self.snapshot(&start)?)?;
        self.scratch.extend([input.clone(), energy.clone()]);

        let remaining = path.maxlen() - path.len();
        let steps = remaining * self.settings.subcycles;
        let spec = RunSpec {
            program: self.settings.program.clone(),
            args: render_args(
                &self.settings.args,
                &[
                    ("input", input.display().to_string()),
                    ("trajectory", trajectory.display().to_string()),
                    ("energy", energy.display().to_string()),
                    ("steps", steps.to_string()),
                    ("timestep", self.settings.timestep.to_string()),
                ],
            ),
            cwd: dir,
            trajectory: trajectory.clone(),
            expected: Vec::new(),
            poll_interval: self.settings.poll_interval,
            stop_timeout: self.settings.stop_timeout,
        };
        debug!(run = id, steps, reverse, "Launching continuous propagation");

        let first_index = path.len();
        let mut signal = StepSignal::Continue;
        let mut runner = StreamingRunner::start(&spec, TrrDecoder)?;
        let mut index = 0;
        while let Some(frame) = runner.next_frame()? {
            let snapshot = frame.to_snapshot();
            let values = order.calculate(&snapshot)?;
            let point = PhasePoint::new(
                Configuration::File {
                    path: trajectory.clone(),
                    index,
                },
                values,
            )
            .with_energies(Some(snapshot.kinetic_energy(&self.masses)), None);
            index += 1;
            signal = add_point(path, point, interfaces)?;
            if signal.is_stop() {
                break;
            }
        }
        runner.stop()?;
        drop(runner);

        if !signal.is_stop() {
            warn!(
                run = id,
                frames = index,
                "Program finished before the path was complete"
            );
            return Err(EngineError::MissingOutput { path: trajectory });
        }
        self.back_fill_energies(path, first_index, &energy)?;
        Ok(signal.outcome())
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

        let id = self.next_id();
        let file = self.exe_dir()?.join(format!("genvel-{id:05}.trr"));
        self.write_frame(&file, &snapshot)?;
        let values = order.calculate(&snapshot)?;
        let new_point = PhasePoint::new(Configuration::File { path: file, index: 0 }, values)
            .with_energies(Some(kinetic), point.potential_energy);
        Ok((new_point, kinetic - old_kinetic, kinetic))
    }

    fn set_exe_dir(&mut self, dir: &FsPath) -> Result<(), EngineError> {
        fs::create_dir_all(dir)?;
        self.exe_dir = Some(dir.to_path_buf());
        Ok(())
    }

    fn clean_up(&mut self) -> Result<(), EngineError> {
        for file in self.scratch.drain(..) {
            if file.exists() {
                fs::remove_file(&file)?;
            }
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::io::trr::read_trr_frame;
    use crate::core::order::Position;
    use nalgebra::Vector3;
    use std::time::Duration;
    use tempfile::tempdir;

    fn frame_at(x: f64) -> TrrFrame {
        let snapshot = Snapshot::new(vec![Vector3::new(x, 0.0, 0.0)], vec![Vector3::new(1.0, 0.0, 0.0)]);
        TrrFrame::from_snapshot(&snapshot, 0, 0.0)
    }

    /// A stand-in MD program replaying a prepared trajectory one frame at a time.
    fn replaying_engine(dir: &FsPath, orders: &[f64], tail: &str) -> ContinuousEngine {
        let mut script = String::from(
            "printf 'step,time,potential,kinetic\\n' > \"$2\"\n: > \"$1\"\n",
        );
        for (i, &x) in orders.iter().enumerate() {
            let name = dir.join(format!("frame{i}.trr"));
            write_trr_file(&name, &[frame_at(x)], false).unwrap();
            script.push_str(&format!(
                "printf '{i},0.0,{pot},\\n' >> \"$2\"\ncat '{}' >> \"$1\"\nsleep 0.02\n",
                name.display(),
                pot = -(i as f64)
            ));
        }
        script.push_str(tail);
        let script_path = dir.join("md.sh");
        fs::write(&script_path, script).unwrap();

        let mut settings = ExternalSettings::new(
            "sh",
            vec![
                script_path.display().to_string(),
                "{trajectory}".into(),
                "{energy}".into(),
                "{input}".into(),
            ],
        );
        settings.poll_interval = Duration::from_millis(10);
        settings.stop_timeout = Duration::from_secs(5);
        let mut engine = ContinuousEngine::new(settings, vec![1.0], 1.0);
        engine.set_exe_dir(&dir.join("work")).unwrap();
        engine
    }

    fn start_point() -> PhasePoint {
        let snapshot = Snapshot::new(vec![Vector3::zeros()], vec![Vector3::new(1.0, 0.0, 0.0)]);
        PhasePoint::new(Configuration::Memory(snapshot), vec![0.0])
    }

    fn interfaces() -> Interfaces {
        Interfaces::new(-1.0, 0.0, 1.0).unwrap()
    }

    #[test]
    fn propagation_stops_the_program_once_an_interface_is_reached() {
        let dir = tempdir().unwrap();
        let orders = [0.0, 0.3, 0.6, 0.9, 1.2, 1.5, 1.8];
        let mut engine = replaying_engine(dir.path(), &orders, "sleep 30\n");
        let mut path = Path::new(50);
        let started = std::time::Instant::now();
        let (success, status) = engine
            .propagate(&mut path, &start_point(), &Position::new(0, 0), &interfaces(), false)
            .unwrap();
        assert!(success);
        assert_eq!(status, PathStatus::Accepted);
        assert_eq!(path.len(), 5);
        assert!(started.elapsed() < Duration::from_secs(20));
        assert!(path.energies_filled());
        assert_eq!(path.point(3).unwrap().potential_energy, Some(-3.0));
        assert_eq!(path.point(4).unwrap().kinetic_energy, Some(0.5));
    }

    #[test]
    fn path_length_limit_ends_the_run() {
        let dir = tempdir().unwrap();
        let orders = [0.0, 0.1, 0.2, 0.3, 0.4];
        let mut engine = replaying_engine(dir.path(), &orders, "sleep 30\n");
        let mut path = Path::new(3);
        let (success, status) = engine
            .propagate(&mut path, &start_point(), &Position::new(0, 0), &interfaces(), false)
            .unwrap();
        assert!(!success);
        assert_eq!(status.code(), "MAXLENGTH");
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn reverse_propagation_writes_a_velocity_reversed_input() {
        let dir = tempdir().unwrap();
        let mut engine = replaying_engine(dir.path(), &[0.0, 1.1], "");
        let mut path = Path::new(10);
        engine
            .propagate(&mut path, &start_point(), &Position::new(0, 0), &interfaces(), true)
            .unwrap();
        let input = dir.path().join("work").join("run-00001-input.trr");
        let frame = read_trr_frame(&input, 0).unwrap();
        assert_eq!(frame.velocities.unwrap()[0].x, -1.0);
    }

    #[test]
    fn a_run_ending_early_is_a_retryable_error() {
        let dir = tempdir().unwrap();
        let mut engine = replaying_engine(dir.path(), &[0.0, 0.1], "exit 0\n");
        let mut path = Path::new(10);
        let err = engine
            .propagate(&mut path, &start_point(), &Position::new(0, 0), &interfaces(), false)
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn a_crashing_program_is_reported_as_process_failure() {
        let dir = tempdir().unwrap();
        let mut engine = replaying_engine(dir.path(), &[0.0, 0.1], "exit 9\n");
        let mut path = Path::new(10);
        let err = engine
            .propagate(&mut path, &start_point(), &Position::new(0, 0), &interfaces(), false)
            .unwrap_err();
        assert!(matches!(err, EngineError::ProcessFailed { code: Some(9), .. }));
    }

    #[test]
    fn clean_up_removes_inputs_but_keeps_trajectories() {
        let dir = tempdir().unwrap();
        let mut engine = replaying_engine(dir.path(), &[0.0, 1.1], "");
        let mut path = Path::new(10);
        engine
            .propagate(&mut path, &start_point(), &Position::new(0, 0), &interfaces(), false)
            .unwrap();
        engine.clean_up().unwrap();
        let work = dir.path().join("work");
        assert!(!work.join("run-00001-input.trr").exists());
        assert!(work.join("run-00001.trr").exists());
    }
}
