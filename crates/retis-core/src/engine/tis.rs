use super::backends::EngineAdapter;
use super::config::TisSettings;
use super::context::SessionContext;
use super::error::EngineError;
use crate::core::models::interfaces::Interfaces;
use crate::core::models::path::Path;
use crate::core::models::phasepoint::PhasePoint;
use crate::core::models::status::{Generated, PathStatus, Rejection};
use crate::core::order::OrderParameter;
use tracing::{debug, trace};

/// Produces a trial path from the current one.
///
/// The repair loop of the initiation is written against this trait so that its
/// termination can be exercised with scripted moves.
pub trait TrialMove {
    fn attempt(
        &mut self,
        path: &Path,
        interfaces: &Interfaces,
        ctx: &mut SessionContext<'_>,
        settings: &TisSettings,
    ) -> Result<Path, EngineError>;
}

/// The regular TIS move: time reversal with probability `freq`, shooting otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct TisMove;

impl TrialMove for TisMove {
    fn attempt(
        &mut self,
        path: &Path,
        interfaces: &Interfaces,
        ctx: &mut SessionContext<'_>,
        settings: &TisSettings,
    ) -> Result<Path, EngineError> {
        make_tis_step(path, interfaces, ctx, settings)
    }
}

/// Performs one TIS trial move on `path`.
///
/// The returned path is frozen with the move's status and provenance. Whether the
/// ensemble adopts it is decided by the caller from that status.
pub fn make_tis_step(
    path: &Path,
    interfaces: &Interfaces,
    ctx: &mut SessionContext<'_>,
    settings: &TisSettings,
) -> Result<Path, EngineError> {
    if ctx.rng.uniform() < settings.freq {
        time_reversal(path, interfaces, ctx, settings)
    } else {
        shoot(path, interfaces, ctx, settings)
    }
}

/// Reverses the path in time.
///
/// Accepted iff the reversed path starts on the side given by `start_condition`.
pub fn time_reversal(
    path: &Path,
    interfaces: &Interfaces,
    ctx: &mut SessionContext<'_>,
    settings: &TisSettings,
) -> Result<Path, EngineError> {
    let trial = reverse_path(path, &*ctx.engine, ctx.order)?;
    let status = if trial.start_side(interfaces) == Some(settings.start_condition) {
        PathStatus::Accepted
    } else {
        Rejection::BackwardWrongInterface.into()
    };
    debug!(status = %status, length = trial.len(), "Time reversal");
    Ok(trial.freeze(status, Some(Generated::TimeReversal)))
}

/// The time-reversed path, with orders recomputed when they depend on velocities.
pub fn reverse_path(
    path: &Path,
    engine: &dyn EngineAdapter,
    order: &dyn OrderParameter,
) -> Result<Path, EngineError> {
    let mut reversed = path.reversed();
    refresh_orders(&mut reversed, engine, order)?;
    Ok(reversed)
}

fn refresh_orders(
    path: &mut Path,
    engine: &dyn EngineAdapter,
    order: &dyn OrderParameter,
) -> Result<(), EngineError> {
    if !order.velocity_dependent() {
        return Ok(());
    }
    let orders = path
        .points()
        .iter()
        .map(|point| engine.calculate_order(point, order))
        .collect::<Result<Vec<_>, _>>()?;
    path.set_orders(orders)?;
    Ok(())
}

fn rejected_at(point: PhasePoint, maxlen: usize, rejection: Rejection, generated: Generated) -> Result<Path, EngineError> {
    let path = Path::from_points([point], maxlen.max(1))?;
    Ok(path.freeze(rejection.into(), Some(generated)))
}

/// The shooting move.
///
/// A point is picked uniformly among the interior points of `path`, given new
/// velocities and integrated backward and forward in time. The two halves are pasted
/// into the trial path.
pub fn shoot(
    path: &Path,
    interfaces: &Interfaces,
    ctx: &mut SessionContext<'_>,
    settings: &TisSettings,
) -> Result<Path, EngineError> {
    let length = path.len();
    if length < 3 {
        return Err(EngineError::Internal(format!(
            "cannot shoot from a path of {length} points"
        )));
    }
    let index = ctx.rng.index(1, length - 1);
    let origin = path
        .point(index)
        .ok_or_else(|| EngineError::Internal(format!("shooting index {index} out of range")))?;

    let (point, dek, _) = ctx
        .engine
        .generate_velocities(origin, ctx.order, ctx.rng, settings)?;
    let order_value = point.order_value();
    let mut generated = Generated::Shooting {
        order: order_value,
        index,
        backward_len: 0,
    };
    trace!(index, order = order_value, dek, "Shooting point");

    if !settings.aimless {
        let threshold = (-ctx.beta * dek).exp();
        if ctx.rng.uniform() > threshold {
            return rejected_at(point, settings.maxlength, Rejection::MomentaChange, generated);
        }
    }
    if !interfaces.contains_for_shooting(order_value) {
        return rejected_at(point, settings.maxlength, Rejection::KickedOutside, generated);
    }

    let maxlen = if settings.allow_maxlength {
        settings.maxlength
    } else {
        let u = ctx.rng.uniform();
        if u > 0.0 {
            let drawn = ((length - 2) as f64 / u).floor();
            if drawn < settings.maxlength as f64 {
                (drawn as usize + 2).min(settings.maxlength)
            } else {
                settings.maxlength
            }
        } else {
            settings.maxlength
        }
    };

    let mut back = Path::new(maxlen - 1);
    let (reached, _) = ctx
        .engine
        .propagate(&mut back, &point, ctx.order, interfaces, true)?;
    if !reached {
        let rejection = if back.len() >= settings.maxlength - 1 {
            Rejection::BackwardExceedsMax
        } else {
            Rejection::BackwardTooLong
        };
        return Ok(back.reversed().freeze(rejection.into(), Some(generated)));
    }
    if back.end_side(interfaces) != Some(settings.start_condition) {
        return Ok(back
            .reversed()
            .freeze(Rejection::BackwardWrongInterface.into(), Some(generated)));
    }

    let forward_limit = maxlen - back.len() + usize::from(settings.paste_overlap);
    let mut forward = Path::new(forward_limit);
    let (reached, _) = ctx
        .engine
        .propagate(&mut forward, &point, ctx.order, interfaces, false)?;
    generated = Generated::Shooting {
        order: order_value,
        index,
        backward_len: back.len() - 1,
    };
    let mut trial = Path::paste(&back, &forward, settings.paste_overlap, maxlen)?;
    refresh_orders(&mut trial, &*ctx.engine, ctx.order)?;

    let status: PathStatus = if !reached {
        if trial.len() >= settings.maxlength {
            Rejection::ForwardExceedsMax.into()
        } else {
            Rejection::ForwardTooLong.into()
        }
    } else if !trial.check_interfaces(interfaces).crossed_middle() {
        Rejection::NoCrossing.into()
    } else {
        PathStatus::Accepted
    };
    debug!(
        status = %status,
        index,
        backward = back.len(),
        forward = forward.len(),
        length = trial.len(),
        "Shooting move"
    );
    Ok(trial.freeze(status, Some(generated)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::models::interfaces::Side;
    use crate::core::models::phasepoint::Configuration;
    use crate::core::models::system::Snapshot;
    use crate::core::order::Position;
    use crate::core::rng::testing::ScriptedRandom;
    use crate::engine::backends::internal::tests::engine;
    use crate::engine::backends::{InternalEngine, Potential};
    use crate::engine::config::{InitiationSettings, TisSettingsBuilder};
    use crate::engine::progress::ProgressReporter;
    use nalgebra::Vector3;

    pub(crate) fn point(x: f64, vx: f64) -> PhasePoint {
        let snapshot = Snapshot::new(vec![Vector3::new(x, 0.0, 0.0)], vec![Vector3::new(vx, 0.0, 0.0)]);
        PhasePoint::new(Configuration::Memory(snapshot), vec![x])
    }

    pub(crate) fn path_of(xs: &[f64], vx: f64) -> Path {
        Path::from_points(xs.iter().map(|&x| point(x, vx)), 100).unwrap()
    }

    pub(crate) fn interfaces() -> Interfaces {
        Interfaces::new(-1.0, 0.0, 1.0).unwrap()
    }

    /// Runs `f` with a context over a free-particle engine stepping 0.25 time units.
    pub(crate) fn with_context<R>(
        engine: &mut InternalEngine,
        rng: &mut ScriptedRandom,
        f: impl FnOnce(&mut SessionContext<'_>) -> R,
    ) -> R {
        let order = Position::new(0, 0);
        let tis = TisSettingsBuilder::new().maxlength(100).build().unwrap();
        let initiation = InitiationSettings::default();
        let reporter = ProgressReporter::new();
        let mut ctx = SessionContext::new(engine, &order, rng, 1.0, &tis, &initiation, &reporter);
        f(&mut ctx)
    }

    fn crossing_path() -> Path {
        path_of(&[-1.1, -0.6, -0.1, 0.4, 0.9, 1.4], 2.0)
    }

    fn tis(maxlength: usize) -> TisSettingsBuilder {
        TisSettingsBuilder::new().maxlength(maxlength)
    }

    #[test]
    fn shooting_produces_an_accepted_crossing_path() {
        let mut engine = engine(Potential::Free, 0.25);
        let mut rng = ScriptedRandom::new(&[0.5, 0.01], &[2.0, 0.0, 0.0]);
        let settings = tis(100).build().unwrap();
        let trial = with_context(&mut engine, &mut rng, |ctx| {
            shoot(&crossing_path(), &interfaces(), ctx, &settings)
        })
        .unwrap();

        assert_eq!(trial.status(), Some(PathStatus::Accepted));
        assert_eq!(trial.len(), 7);
        assert_eq!(trial.start_side(&interfaces()), Some(Side::Left));
        assert_eq!(trial.end_side(&interfaces()), Some(Side::Right));
        match trial.generated() {
            Some(Generated::Shooting {
                index,
                backward_len,
                order,
            }) => {
                assert_eq!(index, 3);
                assert_eq!(backward_len, 3);
                assert!((order - 0.4).abs() < 1e-12);
            }
            other => panic!("unexpected provenance {other:?}"),
        }
        let first = engine.snapshot(trial.first().unwrap()).unwrap();
        assert!((first.velocities[0].x - 2.0).abs() < 1e-12);
    }

    #[test]
    fn overlapping_paste_drops_the_duplicate_shooting_point() {
        let mut engine = engine(Potential::Free, 0.25);
        let mut rng = ScriptedRandom::new(&[0.5, 0.01], &[2.0, 0.0, 0.0]);
        let settings = tis(100).paste_overlap(true).build().unwrap();
        let trial = with_context(&mut engine, &mut rng, |ctx| {
            shoot(&crossing_path(), &interfaces(), ctx, &settings)
        })
        .unwrap();
        assert_eq!(trial.status(), Some(PathStatus::Accepted));
        assert_eq!(trial.len(), 6);
    }

    #[test]
    fn point_outside_the_shooting_band_is_kicked_outside() {
        let mut engine = engine(Potential::Free, 0.25);
        let mut rng = ScriptedRandom::new(&[0.0], &[]);
        let settings = tis(100).build().unwrap();
        let trial = with_context(&mut engine, &mut rng, |ctx| {
            shoot(&path_of(&[-1.1, 1.5, 0.3, 1.2], 1.0), &interfaces(), ctx, &settings)
        })
        .unwrap();
        assert_eq!(trial.status().map(PathStatus::code), Some("KOB"));
        assert_eq!(trial.len(), 1);
    }

    #[test]
    fn large_kinetic_energy_gain_is_a_momenta_change_rejection() {
        let mut engine = engine(Potential::Free, 0.25);
        let mut rng = ScriptedRandom::new(&[0.5, 0.9], &[1.0, 0.0, 0.0]);
        let settings = tis(100).aimless(false).sigma_v(1.0).build().unwrap();
        let trial = with_context(&mut engine, &mut rng, |ctx| {
            shoot(&crossing_path(), &interfaces(), ctx, &settings)
        })
        .unwrap();
        assert_eq!(trial.status().map(PathStatus::code), Some("MCR"));
    }

    #[test]
    fn slow_backward_half_is_too_long() {
        let mut engine = engine(Potential::Free, 0.25);
        let mut rng = ScriptedRandom::new(&[0.5, 0.9], &[0.5, 0.0, 0.0]);
        let settings = tis(100).build().unwrap();
        let trial = with_context(&mut engine, &mut rng, |ctx| {
            shoot(&crossing_path(), &interfaces(), ctx, &settings)
        })
        .unwrap();
        assert_eq!(trial.status().map(PathStatus::code), Some("BTL"));
        assert_eq!(trial.len(), 5);
    }

    #[test]
    fn backward_half_hitting_the_hard_limit_exceeds_max() {
        let mut engine = engine(Potential::Free, 0.25);
        let mut rng = ScriptedRandom::new(&[0.8], &[2.0, 0.0, 0.0]);
        let settings = tis(5).allow_maxlength(true).build().unwrap();
        let trial = with_context(&mut engine, &mut rng, |ctx| {
            shoot(&crossing_path(), &interfaces(), ctx, &settings)
        })
        .unwrap();
        assert_eq!(trial.status().map(PathStatus::code), Some("BTX"));
    }

    #[test]
    fn backward_half_ending_on_the_wrong_side_is_rejected() {
        let mut engine = engine(Potential::Free, 0.25);
        let mut rng = ScriptedRandom::new(&[0.5, 0.01], &[-2.0, 0.0, 0.0]);
        let settings = tis(100).build().unwrap();
        let trial = with_context(&mut engine, &mut rng, |ctx| {
            shoot(&crossing_path(), &interfaces(), ctx, &settings)
        })
        .unwrap();
        assert_eq!(trial.status().map(PathStatus::code), Some("BWI"));
    }

    #[test]
    fn forward_half_running_out_of_room_is_too_long() {
        let mut engine = engine(Potential::Free, 0.25);
        let mut rng = ScriptedRandom::new(&[0.5, 0.9], &[2.0, 0.0, 0.0]);
        let settings = tis(100).build().unwrap();
        let trial = with_context(&mut engine, &mut rng, |ctx| {
            shoot(&crossing_path(), &interfaces(), ctx, &settings)
        })
        .unwrap();
        assert_eq!(trial.status().map(PathStatus::code), Some("FTL"));
        assert_eq!(trial.len(), 6);
    }

    #[test]
    fn trial_not_reaching_the_middle_is_no_crossing() {
        let mut engine = engine(Potential::Harmonic { k: 1.0, center: -1.2 }, 0.01);
        let mut rng = ScriptedRandom::new(&[], &[0.5, 0.0, 0.0]);
        let settings = tis(2000).allow_maxlength(true).build().unwrap();
        let trial = with_context(&mut engine, &mut rng, |ctx| {
            shoot(&path_of(&[-1.1, -0.6, 0.4], 0.0), &interfaces(), ctx, &settings)
        })
        .unwrap();
        assert_eq!(trial.status().map(PathStatus::code), Some("NCR"));
        assert_eq!(trial.start_side(&interfaces()), Some(Side::Left));
        assert_eq!(trial.end_side(&interfaces()), Some(Side::Left));
    }

    #[test]
    fn time_reversal_accepts_only_paths_starting_at_the_start_condition() {
        let mut engine = engine(Potential::Free, 0.25);
        let mut rng = ScriptedRandom::constant(0.5, 1.0);
        let settings = tis(100).build().unwrap();

        let crossing = with_context(&mut engine, &mut rng, |ctx| {
            time_reversal(&crossing_path(), &interfaces(), ctx, &settings)
        })
        .unwrap();
        assert_eq!(crossing.status().map(PathStatus::code), Some("BWI"));

        let returning = path_of(&[-1.2, -0.5, 0.2, -0.4, -1.3], 1.0);
        let reversed = with_context(&mut engine, &mut rng, |ctx| {
            time_reversal(&returning, &interfaces(), ctx, &settings)
        })
        .unwrap();
        assert_eq!(reversed.status(), Some(PathStatus::Accepted));
        assert_eq!(reversed.generated(), Some(Generated::TimeReversal));
        assert_eq!(reversed.first().unwrap().order_value(), -1.3);
        assert!(reversed.points().iter().all(|p| p.velocities_reversed));
    }

    #[test]
    fn tis_step_chooses_time_reversal_with_probability_freq() {
        let mut engine = engine(Potential::Free, 0.25);
        let mut rng = ScriptedRandom::new(&[0.2], &[]);
        let settings = tis(100).freq(0.5).build().unwrap();
        let trial = with_context(&mut engine, &mut rng, |ctx| {
            TisMove.attempt(&crossing_path(), &interfaces(), ctx, &settings)
        })
        .unwrap();
        assert_eq!(trial.generated(), Some(Generated::TimeReversal));
    }

    #[test]
    fn velocity_dependent_orders_are_recomputed_on_reversal() {
        let engine = engine(Potential::Free, 0.25);
        let velocity = crate::core::order::Velocity { index: 0, dim: 0 };
        let mut path = path_of(&[-1.1, 0.2, 1.3], 2.0);
        let orders = vec![vec![2.0]; 3];
        path.set_orders(orders).unwrap();
        let reversed = reverse_path(&path, &engine, &velocity).unwrap();
        assert!(reversed.points().iter().all(|p| p.order == vec![-2.0]));
    }
}
