use super::config::TisSettings;
use super::context::SessionContext;
use super::ensemble::PathEnsemble;
use super::error::EngineError;
use super::progress::Progress;
use super::tis::{TisMove, TrialMove, reverse_path};
use crate::core::models::interfaces::{Interfaces, Side};
use crate::core::models::path::{InterfaceCheck, Path};
use crate::core::models::phasepoint::PhasePoint;
use crate::core::models::status::{Generated, PathStatus};
use tracing::{debug, info, instrument, warn};

/// What to do with a freshly kicked path, decided from where it starts and ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Classification {
    Accept,
    Reverse,
    Repair,
}

fn classify(check: &InterfaceCheck, start_condition: Side) -> Result<Classification, EngineError> {
    if check.start == Some(start_condition) {
        Ok(Classification::Accept)
    } else if check.end == Some(start_condition) {
        Ok(Classification::Reverse)
    } else if check.start.is_some() && check.start == check.end {
        Ok(Classification::Repair)
    } else {
        Err(EngineError::InitiationInconsistent {
            start: check.start,
            end: check.end,
        })
    }
}

fn exhausted(patience: Option<usize>, attempts: usize) -> bool {
    patience.is_some_and(|limit| attempts >= limit)
}

fn order_min(path: &Path) -> f64 {
    path.ordermin().map_or(f64::NAN, |(value, _)| value)
}

fn order_max(path: &Path) -> f64 {
    path.ordermax().map_or(f64::NAN, |(value, _)| value)
}

/// Whether `trial` brings the repaired path closer to the start-condition interface
/// while still crossing the middle one.
fn improved(trial: &Path, current: &Path, interfaces: &Interfaces, start_condition: Side) -> bool {
    match start_condition {
        Side::Left => {
            order_min(trial) < order_min(current) && order_max(trial) > interfaces.middle()
        }
        Side::Right => {
            order_max(trial) > order_max(current) && order_min(trial) < interfaces.middle()
        }
    }
}

/// Whether a repaired path has reached beyond the start-condition interface.
fn check_ok(path: &Path, interfaces: &Interfaces, start_condition: Side) -> bool {
    match start_condition {
        Side::Left => order_min(path) < interfaces.left(),
        Side::Right => order_max(path) > interfaces.right(),
    }
}

/// Kicks `start` with fresh velocities until one step crosses `middle`.
///
/// Returns the points just before and just after the crossing, connected by a single
/// engine step. A kick that moves away from the interface is undone.
pub fn kick_across_middle(
    start: &PhasePoint,
    middle: f64,
    ctx: &mut SessionContext<'_>,
) -> Result<(PhasePoint, PhasePoint), EngineError> {
    let settings = TisSettings {
        aimless: true,
        ..ctx.tis.clone()
    };
    let mut point = start.clone();
    point.order = ctx.engine.calculate_order(&point, ctx.order)?;
    info!(order = point.order_value(), middle, "Kicking towards the middle interface");

    let mut kicks = 0;
    loop {
        if exhausted(ctx.initiation.kick_patience, kicks) {
            return Err(EngineError::InitiationAbandoned {
                stage: "kick",
                attempts: kicks,
            });
        }
        kicks += 1;

        let (kicked, _, _) = ctx
            .engine
            .generate_velocities(&point, ctx.order, ctx.rng, &settings)?;
        let prev = kicked.order_value();
        let next = ctx.engine.step(&kicked, ctx.order)?;
        let curr = next.order_value();

        if curr == middle {
            point = kicked;
        } else if (prev < middle && middle < curr) || (curr < middle && middle < prev) {
            info!(prev, curr, kicks, "Crossing found");
            return Ok((kicked, next));
        } else if (prev <= curr && curr <= middle) || (middle <= curr && curr <= prev) {
            point = next;
        } else {
            point = kicked;
        }
    }
}

/// Repairs a path that starts and ends on the wrong side with relaxed TIS moves.
///
/// A trial replaces the current path only if it is accepted and moves the order
/// extreme towards the start-condition interface, so progress never goes backwards.
/// Each new current path is set aside in the ensemble's `generate/` storage once.
pub fn fix_path_by_tis<M: TrialMove>(
    path: Path,
    ensemble: &mut PathEnsemble,
    ctx: &mut SessionContext<'_>,
    mover: &mut M,
) -> Result<Path, EngineError> {
    let settings = ctx.tis.for_repair();
    let interfaces = *ensemble.interfaces();
    let start_condition = ensemble.start_condition();
    debug!(ensemble = %ensemble.name(), "Repairing initial path with TIS moves");

    let mut current = path;
    let mut backup = true;
    let mut trials = 0;
    loop {
        if exhausted(ctx.initiation.repair_patience, trials) {
            return Err(EngineError::InitiationAbandoned {
                stage: "repair",
                attempts: trials,
            });
        }
        if backup {
            current = ensemble.move_path_to_generated(&current)?;
            backup = false;
        }
        trials += 1;

        let trial = match mover.attempt(&current, &interfaces, ctx, &settings) {
            Ok(trial) => trial,
            Err(e) if e.is_retryable() => {
                warn!(error = %e, trials, "Repair move failed, retrying");
                continue;
            }
            Err(e) => return Err(e),
        };
        if !trial.status().is_some_and(PathStatus::is_accepted) {
            debug!(status = ?trial.status(), "Repair move rejected");
            continue;
        }
        if improved(&trial, &current, &interfaces, start_condition) {
            debug!(
                ordermin = order_min(&trial),
                ordermax = order_max(&trial),
                "Repair move improved the path"
            );
            current = trial;
            backup = true;
        }
        if check_ok(&current, &interfaces, start_condition) {
            info!(trials, length = current.len(), "Initial path repaired");
            return Ok(current.freeze(PathStatus::Accepted, Some(Generated::Kick)));
        }
    }
}

/// One kick-propagate-classify attempt. `None` means the candidate was discarded.
fn attempt_kick_path(
    start: &PhasePoint,
    ensemble: &mut PathEnsemble,
    ctx: &mut SessionContext<'_>,
) -> Result<Option<Path>, EngineError> {
    let interfaces = *ensemble.interfaces();
    let maxlength = ctx.tis.maxlength;
    let (previous, current) = kick_across_middle(start, interfaces.middle(), ctx)?;

    let mut forward = Path::new(maxlength);
    let (reached, status) = ctx
        .engine
        .propagate(&mut forward, &current, ctx.order, &interfaces, false)?;
    if !reached {
        debug!(%status, "Forward propagation from the kick failed");
        return Ok(None);
    }
    let mut back = Path::new(maxlength);
    let (reached, status) = ctx
        .engine
        .propagate(&mut back, &previous, ctx.order, &interfaces, true)?;
    if !reached {
        debug!(%status, "Backward propagation from the kick failed");
        return Ok(None);
    }

    let candidate = Path::paste(&back, &forward, false, back.len() + forward.len())?;
    if candidate.len() >= maxlength {
        debug!(length = candidate.len(), maxlength, "Kicked path is too long");
        return Ok(None);
    }

    let check = candidate.check_interfaces(&interfaces);
    let path = match classify(&check, ensemble.start_condition())? {
        Classification::Accept => candidate,
        Classification::Reverse => {
            debug!("Reversing kicked path to match the start condition");
            reverse_path(&candidate, &*ctx.engine, ctx.order)?
        }
        Classification::Repair => {
            info!(start = ?check.start, "Kicked path starts and ends on the wrong side");
            fix_path_by_tis(candidate, ensemble, ctx, &mut TisMove)?
        }
    };
    Ok(Some(path.freeze(PathStatus::Accepted, Some(Generated::Kick))))
}

/// Generates an initial path for `ensemble` by kicking `start` across the middle
/// interface and integrating both ways.
///
/// Failed propagations, over-long candidates and retryable engine errors start a new
/// attempt, bounded by `attempt_patience` when one is configured.
pub fn generate_initial_path_kick(
    ensemble: &mut PathEnsemble,
    start: &PhasePoint,
    ctx: &mut SessionContext<'_>,
) -> Result<Path, EngineError> {
    let mut attempts = 0;
    loop {
        if exhausted(ctx.initiation.attempt_patience, attempts) {
            return Err(EngineError::InitiationAbandoned {
                stage: "attempt",
                attempts,
            });
        }
        attempts += 1;
        ctx.reporter.status(format!(
            "Ensemble {}: kick attempt {attempts}",
            ensemble.name()
        ));
        match attempt_kick_path(start, ensemble, ctx) {
            Ok(Some(path)) => {
                info!(ensemble = %ensemble.name(), attempts, length = path.len(), "Initial path generated");
                return Ok(path);
            }
            Ok(None) => continue,
            Err(e) if e.is_retryable() => {
                warn!(ensemble = %ensemble.name(), error = %e, attempts, "Kick attempt failed, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Initiates `ensemble` from `start` and records the initial path as cycle 0.
///
/// The engine works in the ensemble's `traj/` directory; the accepted path is copied
/// into `accepted/` and the engine's scratch files are removed afterwards.
#[instrument(skip_all, name = "initiate", fields(ensemble = %ensemble.name()))]
pub fn initiate_ensemble(
    ensemble: &mut PathEnsemble,
    start: &PhasePoint,
    ctx: &mut SessionContext<'_>,
) -> Result<Path, EngineError> {
    ctx.engine.set_exe_dir(&ensemble.directories().traj)?;
    ctx.reporter.report(Progress::Message(format!(
        "Initiating ensemble {} by kicking",
        ensemble.name()
    )));
    let path = generate_initial_path_kick(ensemble, start, ctx)?;
    let stored = ensemble.store_accepted(&path)?;
    ensemble.add_path(stored.clone(), true, 0)?;
    ctx.engine.clean_up()?;
    ensemble.prune_engine_files()?;
    Ok(stored)
}

/// The point of `paths` closest to `middle` from below.
///
/// Used to start the next ensemble from an earlier initial path instead of the
/// configured system.
pub fn point_closest_below<'p>(
    paths: impl IntoIterator<Item = &'p Path>,
    middle: f64,
) -> Option<&'p PhasePoint> {
    let mut best: Option<(&PhasePoint, f64)> = None;
    for point in paths.into_iter().flat_map(|path| path.points()) {
        let distance = middle - point.order_value();
        if distance >= 0.0 && best.is_none_or(|(_, d)| distance <= d) {
            best = Some((point, distance));
        }
    }
    best.map(|(point, _)| point)
}
