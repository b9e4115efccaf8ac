use super::interfaces::{Interfaces, Side};
use super::phasepoint::{Configuration, PhasePoint};
use super::status::{Generated, PathStatus};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("Path is frozen with status {status} and cannot be modified")]
    Frozen { status: PathStatus },

    #[error("Path is full: maximum length {maxlen} reached")]
    Full { maxlen: usize },

    #[error("Energies have already been back-filled for this path")]
    EnergiesAlreadyFilled,

    #[error("Expected {expected} points, found {found}")]
    LengthMismatch { expected: usize, found: usize },
}

/// Result of classifying a path against a set of interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceCheck {
    /// Side of the first point, if it lies at or beyond an outer interface.
    pub start: Option<Side>,
    /// Side of the last point, if it lies at or beyond an outer interface.
    pub end: Option<Side>,
    /// For `[left, middle, right]`: whether `ordermin < interface <= ordermax`.
    pub crossed: [bool; 3],
}

impl InterfaceCheck {
    #[inline]
    pub fn crossed_middle(&self) -> bool {
        self.crossed[1]
    }
}

/// An ordered, bounded, append-only sequence of phase points.
///
/// A path is built by exactly one owner (the propagator filling it, or a paste/reverse
/// operation creating it) and becomes read-only once a status is attached with
/// [`Path::freeze`]. The order-parameter extrema are cached while appending so that
/// interface tests never rescan the points.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    points: Vec<PhasePoint>,
    maxlen: usize,
    status: Option<PathStatus>,
    generated: Option<Generated>,
    ordermin: Option<(f64, usize)>,
    ordermax: Option<(f64, usize)>,
    energies_filled: bool,
}

impl Path {
    pub fn new(maxlen: usize) -> Self {
        Self {
            points: Vec::new(),
            maxlen,
            status: None,
            generated: None,
            ordermin: None,
            ordermax: None,
            energies_filled: false,
        }
    }

    pub fn from_points(
        points: impl IntoIterator<Item = PhasePoint>,
        maxlen: usize,
    ) -> Result<Self, PathError> {
        let mut path = Self::new(maxlen);
        for point in points {
            path.append(point)?;
        }
        Ok(path)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[inline]
    pub fn maxlen(&self) -> usize {
        self.maxlen
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.points.len() >= self.maxlen
    }

    pub fn points(&self) -> &[PhasePoint] {
        &self.points
    }

    pub fn point(&self, index: usize) -> Option<&PhasePoint> {
        self.points.get(index)
    }

    pub fn first(&self) -> Option<&PhasePoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&PhasePoint> {
        self.points.last()
    }

    pub fn status(&self) -> Option<PathStatus> {
        self.status
    }

    pub fn generated(&self) -> Option<Generated> {
        self.generated
    }

    pub fn is_frozen(&self) -> bool {
        self.status.is_some()
    }

    /// Smallest first order-parameter component and the index where it occurs.
    pub fn ordermin(&self) -> Option<(f64, usize)> {
        self.ordermin
    }

    /// Largest first order-parameter component and the index where it occurs.
    pub fn ordermax(&self) -> Option<(f64, usize)> {
        self.ordermax
    }

    pub fn energies_filled(&self) -> bool {
        self.energies_filled
    }

    /// Appends a point, enforcing the freeze and length invariants.
    pub fn append(&mut self, point: PhasePoint) -> Result<(), PathError> {
        self.ensure_mutable()?;
        if self.points.len() >= self.maxlen {
            return Err(PathError::Full {
                maxlen: self.maxlen,
            });
        }
        let index = self.points.len();
        let value = point.order_value();
        if self.ordermin.is_none_or(|(min, _)| value < min) {
            self.ordermin = Some((value, index));
        }
        if self.ordermax.is_none_or(|(max, _)| value > max) {
            self.ordermax = Some((value, index));
        }
        self.points.push(point);
        Ok(())
    }

    pub fn set_generated(&mut self, generated: Generated) -> Result<(), PathError> {
        self.ensure_mutable()?;
        self.generated = Some(generated);
        Ok(())
    }

    /// Attaches the final status. The path is read-only afterwards.
    pub fn freeze(mut self, status: PathStatus, generated: Option<Generated>) -> Self {
        if generated.is_some() {
            self.generated = generated;
        }
        self.status = Some(status);
        self
    }

    /// Back-fills energies onto the points starting at `start`. Allowed exactly once.
    ///
    /// Returns the number of points that received a value. Entries that do not map
    /// onto a point are ignored.
    pub fn fill_energies(
        &mut self,
        start: usize,
        energies: impl IntoIterator<Item = (Option<f64>, Option<f64>)>,
    ) -> Result<usize, PathError> {
        self.ensure_mutable()?;
        if self.energies_filled {
            return Err(PathError::EnergiesAlreadyFilled);
        }
        let mut filled = 0;
        for (point, (kinetic, potential)) in self.points.iter_mut().skip(start).zip(energies) {
            if kinetic.is_some() {
                point.kinetic_energy = kinetic;
            }
            if potential.is_some() {
                point.potential_energy = potential;
            }
            filled += 1;
        }
        self.energies_filled = true;
        Ok(filled)
    }

    /// Replaces the order parameter of every point, e.g. after a velocity-dependent
    /// order parameter was invalidated by a reversal.
    pub fn set_orders(&mut self, orders: Vec<Vec<f64>>) -> Result<(), PathError> {
        self.ensure_mutable()?;
        if orders.len() != self.points.len() {
            return Err(PathError::LengthMismatch {
                expected: self.points.len(),
                found: orders.len(),
            });
        }
        let points = std::mem::take(&mut self.points);
        let maxlen = self.maxlen;
        let generated = self.generated;
        *self = Self::new(maxlen);
        self.generated = generated;
        for (mut point, order) in points.into_iter().zip(orders) {
            point.order = order;
            self.append(point)?;
        }
        Ok(())
    }

    pub fn check_interfaces(&self, interfaces: &Interfaces) -> InterfaceCheck {
        let start = self
            .first()
            .and_then(|p| interfaces.side_of(p.order_value()));
        let end = self.last().and_then(|p| interfaces.side_of(p.order_value()));
        let mut crossed = [false; 3];
        if let (Some((min, _)), Some((max, _))) = (self.ordermin, self.ordermax) {
            for (flag, lambda) in crossed.iter_mut().zip(interfaces.as_array()) {
                *flag = min < lambda && lambda <= max;
            }
        }
        InterfaceCheck {
            start,
            end,
            crossed,
        }
    }

    pub fn start_side(&self, interfaces: &Interfaces) -> Option<Side> {
        self.check_interfaces(interfaces).start
    }

    pub fn end_side(&self, interfaces: &Interfaces) -> Option<Side> {
        self.check_interfaces(interfaces).end
    }

    /// The time-reversed path: points in opposite order with every velocity flag toggled.
    ///
    /// The result carries no status so it can be classified afresh.
    pub fn reversed(&self) -> Self {
        let mut path = Self::new(self.maxlen.max(self.points.len()));
        for point in self.points.iter().rev() {
            path.push_unchecked(point.time_reversed());
        }
        path
    }

    /// Joins a backward-propagated half and a forward half into one path.
    ///
    /// `back` is stored in backward time, so it is reversed before `forward` is appended.
    /// With `overlap` the two halves share their first point and the duplicate copy
    /// from `forward` is dropped.
    pub fn paste(
        back: &Path,
        forward: &Path,
        overlap: bool,
        maxlen: usize,
    ) -> Result<Self, PathError> {
        let skip = usize::from(overlap && !back.is_empty());
        let total = back.len() + forward.len().saturating_sub(skip);
        if total > maxlen {
            return Err(PathError::Full { maxlen });
        }
        let mut path = Self::new(maxlen);
        for point in back.points.iter().rev() {
            path.push_unchecked(point.time_reversed());
        }
        for point in forward.points.iter().skip(skip) {
            path.push_unchecked(point.clone());
        }
        Ok(path)
    }

    /// Copy of this path with every configuration passed through `relocate`.
    ///
    /// Status and provenance are preserved; used when moving trajectory files between
    /// storage directories.
    pub fn map_configurations<E>(
        &self,
        mut relocate: impl FnMut(&Configuration) -> Result<Configuration, E>,
    ) -> Result<Self, E> {
        let mut copy = self.clone();
        for point in &mut copy.points {
            point.config = relocate(&point.config)?;
        }
        Ok(copy)
    }

    fn push_unchecked(&mut self, point: PhasePoint) {
        let index = self.points.len();
        let value = point.order_value();
        if self.ordermin.is_none_or(|(min, _)| value < min) {
            self.ordermin = Some((value, index));
        }
        if self.ordermax.is_none_or(|(max, _)| value > max) {
            self.ordermax = Some((value, index));
        }
        self.points.push(point);
    }

    fn ensure_mutable(&self) -> Result<(), PathError> {
        match self.status {
            Some(status) => Err(PathError::Frozen { status }),
            None => Ok(()),
        }
    }
}
