use super::error::EngineError;
use crate::core::io::pathlog::{PathLog, PathRecord};
use crate::core::models::interfaces::{Interfaces, Side};
use crate::core::models::path::Path;
use crate::core::models::phasepoint::Configuration;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path as FsPath, PathBuf};
use tracing::{debug, info};

const LOG_FILE: &str = "pathensemble.csv";
const DESCRIPTOR_FILE: &str = "ensemble.toml";

/// On-disk layout of one ensemble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsembleDirectories {
    pub root: PathBuf,
    /// Paths set aside while an initial path is being repaired.
    pub generate: PathBuf,
    /// Trajectory files of the current accepted path.
    pub accepted: PathBuf,
    /// Working directory of the ensemble's engine.
    pub traj: PathBuf,
}

impl EnsembleDirectories {
    pub fn new(base: &FsPath, name: &str) -> Self {
        let root = base.join(name);
        Self {
            generate: root.join("generate"),
            accepted: root.join("accepted"),
            traj: root.join("traj"),
            root,
        }
    }

    fn create(&self) -> Result<(), EngineError> {
        for dir in [&self.root, &self.generate, &self.accepted, &self.traj] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct EnsembleDescriptor<'a> {
    name: &'a str,
    interfaces: [f64; 3],
    start_condition: Side,
}

/// Counts of trial outcomes for one ensemble.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcceptanceStats {
    pub trials: u64,
    pub accepted: u64,
    /// Trials per status code.
    pub by_status: BTreeMap<String, u64>,
    /// Trials per move type.
    pub by_move: BTreeMap<String, u64>,
}

impl AcceptanceStats {
    pub fn record(&mut self, path: &Path, accepted: bool) {
        self.trials += 1;
        if accepted {
            self.accepted += 1;
        }
        let status = path.status().map_or("---", |s| s.code());
        *self.by_status.entry(status.to_string()).or_default() += 1;
        let generated = path.generated().map_or("--", |g| g.code());
        *self.by_move.entry(generated.to_string()).or_default() += 1;
    }

    pub fn acceptance_ratio(&self) -> f64 {
        if self.trials == 0 {
            0.0
        } else {
            self.accepted as f64 / self.trials as f64
        }
    }
}

/// A TIS path ensemble: its interfaces, its storage and its current path.
pub struct PathEnsemble {
    name: String,
    interfaces: Interfaces,
    start_condition: Side,
    dirs: EnsembleDirectories,
    log: PathLog,
    current: Option<Path>,
    stats: AcceptanceStats,
    stored: u64,
}

impl PathEnsemble {
    /// Creates the ensemble's directories, descriptor and path log under `base`.
    pub fn create(
        base: &FsPath,
        name: &str,
        interfaces: Interfaces,
        start_condition: Side,
    ) -> Result<Self, EngineError> {
        let dirs = EnsembleDirectories::new(base, name);
        dirs.create()?;

        let descriptor = EnsembleDescriptor {
            name,
            interfaces: interfaces.as_array(),
            start_condition,
        };
        let text = toml::to_string(&descriptor)
            .map_err(|e| EngineError::Internal(format!("cannot describe ensemble {name}: {e}")))?;
        fs::write(dirs.root.join(DESCRIPTOR_FILE), text)?;

        let log = PathLog::open(dirs.root.join(LOG_FILE))?;
        debug!(ensemble = name, %interfaces, root = %dirs.root.display(), "Created path ensemble");
        Ok(Self {
            name: name.to_string(),
            interfaces,
            start_condition,
            dirs,
            log,
            current: None,
            stats: AcceptanceStats::default(),
            stored: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interfaces(&self) -> &Interfaces {
        &self.interfaces
    }

    pub fn start_condition(&self) -> Side {
        self.start_condition
    }

    pub fn directories(&self) -> &EnsembleDirectories {
        &self.dirs
    }

    /// The last accepted path.
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref()
    }

    pub fn stats(&self) -> &AcceptanceStats {
        &self.stats
    }

    /// Logs a trial and, if accepted, makes it the current path.
    pub fn add_path(&mut self, path: Path, accepted: bool, cycle: u64) -> Result<(), EngineError> {
        self.log
            .append(&PathRecord::from_path(&path, cycle, accepted))?;
        self.stats.record(&path, accepted);
        if accepted {
            let previous = self.current.replace(path);
            if let Some(previous) = previous {
                self.discard_stored(&previous)?;
            }
        }
        Ok(())
    }

    /// Copies the files `path` references into `generate/` and returns the repointed path.
    pub fn move_path_to_generated(&mut self, path: &Path) -> Result<Path, EngineError> {
        self.stored += 1;
        let target = self.dirs.generate.join(format!("{:06}", self.stored));
        let moved = relocate(path, &target)?;
        debug!(ensemble = %self.name, target = %target.display(), "Moved path to generate storage");
        Ok(moved)
    }

    /// Copies the files `path` references into `accepted/` and returns the repointed path.
    pub fn store_accepted(&mut self, path: &Path) -> Result<Path, EngineError> {
        self.stored += 1;
        let target = self.dirs.accepted.join(format!("{:06}", self.stored));
        relocate(path, &target)
    }

    /// Removes storage under `accepted/` that only `previous` referenced.
    fn discard_stored(&self, previous: &Path) -> Result<(), EngineError> {
        let still_used: Vec<&FsPath> = self
            .current
            .iter()
            .flat_map(|p| p.points())
            .filter_map(|p| p.config.file_path())
            .collect();
        let mut dirs: Vec<&FsPath> = previous
            .points()
            .iter()
            .filter_map(|p| p.config.file_path())
            .filter_map(FsPath::parent)
            .filter(|dir| dir.starts_with(&self.dirs.accepted) && *dir != self.dirs.accepted)
            .collect();
        dirs.sort();
        dirs.dedup();
        for dir in dirs {
            if still_used.iter().any(|file| file.starts_with(dir)) {
                continue;
            }
            if dir.exists() {
                fs::remove_dir_all(dir)?;
            }
        }
        Ok(())
    }

    /// Deletes files in `traj/` that the current path does not reference.
    ///
    /// Trials that were rejected, or accepted and copied into `accepted/`, leave their
    /// engine output behind; this runs after every cycle so the directory stays bounded.
    pub fn prune_engine_files(&self) -> Result<usize, EngineError> {
        let referenced: Vec<&FsPath> = self
            .current
            .iter()
            .flat_map(|p| p.points())
            .filter_map(|p| p.config.file_path())
            .collect();
        let mut removed = 0;
        for entry in fs::read_dir(&self.dirs.traj)? {
            let file = entry?.path();
            if !file.is_file() || referenced.contains(&file.as_path()) {
                continue;
            }
            fs::remove_file(&file)?;
            removed += 1;
        }
        if removed > 0 {
            debug!(ensemble = %self.name, removed, "Pruned engine files");
        }
        Ok(removed)
    }

    pub fn log_summary(&self) {
        info!(
            ensemble = %self.name,
            trials = self.stats.trials,
            accepted = self.stats.accepted,
            ratio = self.stats.acceptance_ratio(),
            "Ensemble statistics"
        );
    }
}

/// Copies every trajectory file `path` references into `target`, keeping file names.
fn relocate(path: &Path, target: &FsPath) -> Result<Path, EngineError> {
    fs::create_dir_all(target)?;
    let mut copied: HashMap<PathBuf, PathBuf> = HashMap::new();
    path.map_configurations(|config| match config {
        Configuration::Memory(snapshot) => Ok(Configuration::Memory(snapshot.clone())),
        Configuration::File { path: source, index } => {
            let dest = match copied.get(source) {
                Some(dest) => dest.clone(),
                None => {
                    let name = source.file_name().ok_or_else(|| {
                        EngineError::Internal(format!(
                            "trajectory path '{}' has no file name",
                            source.display()
                        ))
                    })?;
                    let dest = target.join(name);
                    if *source != dest {
                        fs::copy(source, &dest)?;
                    }
                    copied.insert(source.clone(), dest.clone());
                    dest
                }
            };
            Ok(Configuration::File {
                path: dest,
                index: *index,
            })
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::pathlog::read_path_log;
    use crate::core::io::trr::{TrrFrame, write_trr_file};
    use crate::core::models::phasepoint::PhasePoint;
    use crate::core::models::status::{Generated, PathStatus, Rejection};
    use crate::core::models::system::Snapshot;
    use nalgebra::Vector3;
    use tempfile::tempdir;

    fn ensemble(base: &FsPath) -> PathEnsemble {
        PathEnsemble::create(
            base,
            "001",
            Interfaces::new(-1.0, -0.5, 1.0).unwrap(),
            Side::Left,
        )
        .unwrap()
    }

    fn file_path(dir: &FsPath, name: &str, orders: &[f64]) -> Path {
        let file = dir.join(name);
        let frames: Vec<TrrFrame> = orders
            .iter()
            .map(|&x| {
                TrrFrame::from_snapshot(&Snapshot::new(vec![Vector3::new(x, 0.0, 0.0)], vec![]), 0, 0.0)
            })
            .collect();
        write_trr_file(&file, &frames, false).unwrap();
        let points = orders.iter().enumerate().map(|(index, &x)| {
            PhasePoint::new(
                Configuration::File {
                    path: file.clone(),
                    index,
                },
                vec![x],
            )
        });
        Path::from_points(points, 10).unwrap()
    }

    #[test]
    fn create_lays_out_directories_and_descriptor() {
        let dir = tempdir().unwrap();
        let ensemble = ensemble(dir.path());
        let dirs = ensemble.directories();
        for d in [&dirs.generate, &dirs.accepted, &dirs.traj] {
            assert!(d.is_dir());
        }
        let descriptor = fs::read_to_string(dirs.root.join(DESCRIPTOR_FILE)).unwrap();
        let parsed: toml::Table = toml::from_str(&descriptor).unwrap();
        assert_eq!(parsed["name"].as_str(), Some("001"));
        assert_eq!(parsed["start-condition"].as_str(), Some("L"));
    }

    #[test]
    fn add_path_logs_every_trial_and_keeps_the_last_accepted() {
        let dir = tempdir().unwrap();
        let mut ensemble = ensemble(dir.path());
        let accepted = file_path(dir.path(), "a.trr", &[-1.1, 0.0, 1.2])
            .freeze(PathStatus::Accepted, Some(Generated::Kick));
        let rejected = file_path(dir.path(), "b.trr", &[-1.1, -0.8, -1.2])
            .freeze(Rejection::NoCrossing.into(), Some(Generated::TimeReversal));

        ensemble.add_path(accepted.clone(), true, 0).unwrap();
        ensemble.add_path(rejected, false, 1).unwrap();

        assert_eq!(ensemble.current_path(), Some(&accepted));
        let stats = ensemble.stats();
        assert_eq!((stats.trials, stats.accepted), (2, 1));
        assert_eq!(stats.by_status["NCR"], 1);
        assert_eq!(stats.by_move["ki"], 1);
        assert_eq!(stats.acceptance_ratio(), 0.5);

        let log = read_path_log(ensemble.directories().root.join(LOG_FILE)).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].status, "NCR");
        assert!(!log[1].accepted);
    }

    #[test]
    fn stored_paths_reference_copies_of_their_files() {
        let dir = tempdir().unwrap();
        let mut ensemble = ensemble(dir.path());
        let path = file_path(dir.path(), "run.trr", &[-1.1, 0.0, 1.2]);

        let moved = ensemble.move_path_to_generated(&path).unwrap();
        let file = moved.first().unwrap().config.file_path().unwrap();
        assert!(file.starts_with(&ensemble.directories().generate));
        assert!(file.exists());
        assert_eq!(moved.len(), path.len());
        assert_eq!(moved.point(2).unwrap().order, vec![1.2]);

        let stored = ensemble.store_accepted(&path).unwrap();
        let file = stored.last().unwrap().config.file_path().unwrap();
        assert!(file.starts_with(&ensemble.directories().accepted));
    }

    #[test]
    fn pruning_keeps_only_files_of_the_current_path() {
        let dir = tempdir().unwrap();
        let mut ensemble = ensemble(dir.path());
        let traj = ensemble.directories().traj.clone();
        let current = file_path(&traj, "run-00002.trr", &[-1.1, 0.0, 1.2])
            .freeze(PathStatus::Accepted, None);
        let rejected = file_path(&traj, "run-00001.trr", &[-1.1, -0.8, -1.2])
            .freeze(Rejection::NoCrossing.into(), None);
        fs::write(traj.join("genvel-00003.trr"), b"").unwrap();
        ensemble.add_path(current, true, 0).unwrap();
        ensemble.add_path(rejected, false, 1).unwrap();

        assert_eq!(ensemble.prune_engine_files().unwrap(), 2);
        let left: Vec<PathBuf> = fs::read_dir(&traj).unwrap().map(|e| e.unwrap().path()).collect();
        assert_eq!(left, vec![traj.join("run-00002.trr")]);
        assert_eq!(ensemble.prune_engine_files().unwrap(), 0);
    }

    #[test]
    fn replacing_the_accepted_path_discards_its_old_storage() {
        let dir = tempdir().unwrap();
        let mut ensemble = ensemble(dir.path());
        let first = ensemble
            .store_accepted(&file_path(dir.path(), "one.trr", &[-1.1, 0.0, 1.2]))
            .unwrap()
            .freeze(PathStatus::Accepted, None);
        let old_dir = first.first().unwrap().config.file_path().unwrap().parent().unwrap().to_path_buf();
        ensemble.add_path(first, true, 0).unwrap();

        let second = ensemble
            .store_accepted(&file_path(dir.path(), "two.trr", &[-1.1, 0.3, 1.2]))
            .unwrap()
            .freeze(PathStatus::Accepted, None);
        ensemble.add_path(second, true, 1).unwrap();
        assert!(!old_dir.exists());
        let current = ensemble.current_path().unwrap();
        assert!(current.first().unwrap().config.file_path().unwrap().exists());
    }
}
