use crate::core::io::trr::read_trr_frame;
use crate::core::models::interfaces::Interfaces;
use crate::core::models::path::Path;
use crate::core::models::phasepoint::PhasePoint;
use crate::core::models::status::Rejection;
use crate::core::order::OrderParameter;
use crate::core::rng::RandomGenerator;
use crate::engine::backends::{EngineAdapter, build_engine};
use crate::engine::config::{InitialConfiguration, InitiationSettings, KickFrom, SimulationConfig, TisSettings};
use crate::engine::context::SessionContext;
use crate::engine::ensemble::PathEnsemble;
use crate::engine::error::EngineError;
use crate::engine::initiation::{initiate_ensemble, point_closest_below};
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::tis::make_tis_step;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, info_span, instrument, warn};

/// Outcome of one ensemble after the TIS cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleSummary {
    pub name: String,
    pub interfaces: Interfaces,
    /// Trials including the initial path, which is logged as cycle 0.
    pub trials: u64,
    pub accepted: u64,
    pub acceptance_ratio: f64,
    pub by_status: BTreeMap<String, u64>,
    pub initial_length: usize,
    pub final_length: usize,
    pub directory: PathBuf,
}

/// Read-only state every ensemble shares.
struct Shared<'a> {
    order: &'a dyn OrderParameter,
    beta: f64,
    tis: &'a TisSettings,
    initiation: &'a InitiationSettings,
    reporter: &'a ProgressReporter<'a>,
}

/// One ensemble with the engine and random stream it owns exclusively.
struct EnsembleRun {
    ensemble: PathEnsemble,
    engine: Box<dyn EngineAdapter>,
    rng: RandomGenerator,
    initial_length: usize,
}

impl EnsembleRun {
    fn initiate(&mut self, start: &PhasePoint, shared: &Shared<'_>) -> Result<Path, EngineError> {
        let _span = info_span!("ensemble", name = %self.ensemble.name()).entered();
        let mut ctx = SessionContext::new(
            self.engine.as_mut(),
            shared.order,
            &mut self.rng,
            shared.beta,
            shared.tis,
            shared.initiation,
            shared.reporter,
        );
        let path = initiate_ensemble(&mut self.ensemble, start, &mut ctx)?;
        self.initial_length = path.len();
        Ok(path)
    }

    fn sample(&mut self, cycles: u64, shared: &Shared<'_>) -> Result<(), EngineError> {
        let _span = info_span!("ensemble", name = %self.ensemble.name()).entered();
        let interfaces = *self.ensemble.interfaces();
        let mut ctx = SessionContext::new(
            self.engine.as_mut(),
            shared.order,
            &mut self.rng,
            shared.beta,
            shared.tis,
            shared.initiation,
            shared.reporter,
        );

        for cycle in 1..=cycles {
            let current = self.ensemble.current_path().cloned().ok_or_else(|| {
                EngineError::Internal(format!("ensemble {} has no current path", self.ensemble.name()))
            })?;
            let trial = match make_tis_step(&current, &interfaces, &mut ctx, shared.tis) {
                Ok(trial) => trial,
                Err(e) if e.is_retryable() => {
                    warn!(cycle, error = %e, "Engine failure, keeping the current path");
                    current.freeze(Rejection::EngineFailure.into(), None)
                }
                Err(e) => return Err(e),
            };

            let accepted = trial.status().is_some_and(|status| status.is_accepted());
            if accepted {
                let stored = self.ensemble.store_accepted(&trial)?;
                self.ensemble.add_path(stored, true, cycle)?;
            } else {
                self.ensemble.add_path(trial, false, cycle)?;
            }
            ctx.engine.clean_up()?;
            self.ensemble.prune_engine_files()?;
            shared.reporter.report(Progress::TaskIncrement);
        }
        Ok(())
    }

    fn summary(&self) -> EnsembleSummary {
        let stats = self.ensemble.stats();
        EnsembleSummary {
            name: self.ensemble.name().to_string(),
            interfaces: *self.ensemble.interfaces(),
            trials: stats.trials,
            accepted: stats.accepted,
            acceptance_ratio: stats.acceptance_ratio(),
            by_status: stats.by_status.clone(),
            initial_length: self.initial_length,
            final_length: self.ensemble.current_path().map_or(0, Path::len),
            directory: self.ensemble.directories().root.clone(),
        }
    }
}

/// Applies `f` to every ensemble, in parallel when the `parallel` feature is enabled.
fn for_each_ensemble<F>(runs: &mut [EnsembleRun], f: F) -> Result<(), EngineError>
where
    F: Fn(&mut EnsembleRun) -> Result<(), EngineError> + Send + Sync,
{
    #[cfg(not(feature = "parallel"))]
    let iterator = runs.iter_mut();

    #[cfg(feature = "parallel")]
    let iterator = runs.par_iter_mut();

    iterator.map(f).collect()
}

/// Runs a complete TIS simulation: one ensemble per interface but the last, each
/// initiated by kicking and then sampled for `config.cycles` trial moves.
#[instrument(skip_all, name = "tis_workflow")]
pub fn run(
    config: &SimulationConfig,
    reporter: &ProgressReporter,
) -> Result<Vec<EnsembleSummary>, EngineError> {
    // === Phase 1: Preparation ===
    reporter.report(Progress::PhaseStart {
        name: "Preparation",
    });
    let start = load_initial_point(&config.system.initial)?;
    let order = config.order.build();
    let beta = config.system.beta();
    let mut runs = config
        .ensembles()
        .into_iter()
        .enumerate()
        .map(|(index, (name, interfaces))| {
            let ensemble = PathEnsemble::create(
                &config.output_dir,
                &name,
                interfaces,
                config.tis.start_condition,
            )?;
            Ok(EnsembleRun {
                ensemble,
                engine: build_engine(&config.engine, &config.system.masses, beta),
                rng: RandomGenerator::seeded(config.seed.wrapping_add(index as u64)),
                initial_length: 0,
            })
        })
        .collect::<Result<Vec<_>, EngineError>>()?;
    info!(
        ensembles = runs.len(),
        engine = %config.engine.kind(),
        order = %order.description(),
        "Prepared path ensembles."
    );
    reporter.report(Progress::PhaseFinish);

    let shared = Shared {
        order: order.as_ref(),
        beta,
        tis: &config.tis,
        initiation: &config.initiation,
        reporter,
    };

    // === Phase 2: Initiation ===
    reporter.report(Progress::PhaseStart {
        name: "Initiation",
    });
    match config.initiation.kick_from {
        KickFrom::Initial => for_each_ensemble(&mut runs, |run| {
            run.initiate(&start, &shared).map(|_| ())
        })?,
        KickFrom::Previous => initiate_from_previous(&mut runs, start, &shared)?,
    }
    reporter.report(Progress::PhaseFinish);

    // === Phase 3: TIS cycles ===
    reporter.report(Progress::PhaseStart { name: "Sampling" });
    reporter.report(Progress::TaskStart {
        total_steps: config.cycles * runs.len() as u64,
    });
    for_each_ensemble(&mut runs, |run| run.sample(config.cycles, &shared))?;
    reporter.report(Progress::TaskFinish);
    reporter.report(Progress::PhaseFinish);

    // === Phase 4: Summary ===
    for run in &runs {
        run.ensemble.log_summary();
    }
    let summaries: Vec<EnsembleSummary> = runs.iter().map(EnsembleRun::summary).collect();
    info!(ensembles = summaries.len(), "Workflow complete.");
    Ok(summaries)
}

/// Initiates the ensembles in order, each from the point of the earlier initial paths
/// closest to and below its middle interface.
fn initiate_from_previous(
    runs: &mut [EnsembleRun],
    mut start: PhasePoint,
    shared: &Shared<'_>,
) -> Result<(), EngineError> {
    let mut initial_paths: Vec<Path> = Vec::with_capacity(runs.len());
    for run in runs.iter_mut() {
        let middle = run.ensemble.interfaces().middle();
        if let Some(point) = point_closest_below(&initial_paths, middle) {
            info!(ensemble = %run.ensemble.name(), order = point.order_value(), "Kicking from previous initial path");
            start = point.clone();
        }
        initial_paths.push(run.initiate(&start, shared)?);
    }
    Ok(())
}

fn load_initial_point(initial: &InitialConfiguration) -> Result<PhasePoint, EngineError> {
    let snapshot = match initial {
        InitialConfiguration::Snapshot(snapshot) => snapshot.clone(),
        InitialConfiguration::File(path) => read_trr_frame(path, 0)?.to_snapshot(),
    };
    Ok(PhasePoint::from_snapshot(snapshot))
}
