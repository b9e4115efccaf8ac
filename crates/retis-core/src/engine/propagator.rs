use super::error::EngineError;
use crate::core::models::interfaces::Interfaces;
use crate::core::models::path::{Path, PathError};
use crate::core::models::phasepoint::PhasePoint;
use crate::core::models::status::{PathStatus, Rejection};
use tracing::trace;

/// Outcome of adding one point to a path under construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepSignal {
    /// Keep integrating.
    Continue,
    /// The point lies at or beyond an outer interface.
    Reached,
    /// The path is full and the point did not reach an outer interface.
    Exhausted,
}

impl StepSignal {
    pub fn is_stop(self) -> bool {
        self != StepSignal::Continue
    }

    /// The `(success, status)` pair reported by a finished propagation.
    pub fn outcome(self) -> (bool, PathStatus) {
        match self {
            StepSignal::Reached => (true, PathStatus::Accepted),
            StepSignal::Continue | StepSignal::Exhausted => {
                (false, PathStatus::Rejected(Rejection::MaxLength))
            }
        }
    }
}

/// Appends `point` and applies the stopping rule.
///
/// Reaching `left` or `right` wins over the length limit, so a crossing on the last
/// allowed point is a success.
pub fn add_point(
    path: &mut Path,
    point: PhasePoint,
    interfaces: &Interfaces,
) -> Result<StepSignal, PathError> {
    let order = point.order_value();
    path.append(point)?;
    let signal = if order <= interfaces.left() || order >= interfaces.right() {
        StepSignal::Reached
    } else if path.is_full() {
        StepSignal::Exhausted
    } else {
        StepSignal::Continue
    };
    trace!(length = path.len(), order, ?signal, "Added point");
    Ok(signal)
}

/// Drives a step-by-step integrator until the stopping rule fires.
///
/// `start` is added first; `advance` produces each following point from the last one.
/// A path that is already full when called reports failure without integrating.
pub fn propagate_with<F>(
    path: &mut Path,
    start: PhasePoint,
    interfaces: &Interfaces,
    mut advance: F,
) -> Result<(bool, PathStatus), EngineError>
where
    F: FnMut(&PhasePoint) -> Result<PhasePoint, EngineError>,
{
    if path.is_full() {
        return Ok(StepSignal::Exhausted.outcome());
    }
    let mut current = start;
    loop {
        let next_input = current.clone();
        let signal = add_point(path, current, interfaces)?;
        if signal.is_stop() {
            return Ok(signal.outcome());
        }
        current = advance(&next_input)?;
    }
}
