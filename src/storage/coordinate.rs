use crate::error::ScanError;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// A position in an N-dimensional integer space, one component per dimension.
///
/// Ordering is lexicographic (row-major), which is also the natural cell
/// iteration order within a chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    axes: SmallVec<[i64; 4]>,
}

impl Coordinate {
    pub fn from_slice(axes: &[i64]) -> Self {
        Self {
            axes: SmallVec::from_slice(axes),
        }
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.axes
    }

    pub fn dims(&self) -> usize {
        self.axes.len()
    }

    pub fn get(&self, axis: usize) -> Option<i64> {
        self.axes.get(axis).copied()
    }

    pub fn with_axis(&self, axis: usize, value: i64) -> Coordinate {
        let mut axes = self.axes.clone();
        if let Some(slot) = axes.get_mut(axis) {
            *slot = value;
        }
        Coordinate { axes }
    }
}

impl From<Vec<i64>> for Coordinate {
    fn from(axes: Vec<i64>) -> Self {
        Self { axes: axes.into() }
    }
}

impl<const N: usize> From<[i64; N]> for Coordinate {
    fn from(axes: [i64; N]) -> Self {
        Self::from_slice(&axes)
    }
}

impl FromIterator<i64> for Coordinate {
    fn from_iter<T: IntoIterator<Item = i64>>(iter: T) -> Self {
        Self {
            axes: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, v) in self.axes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, "}}")
    }
}

/// Inclusive axis-aligned hyper-rectangle. `start[i] <= end[i]` on every axis.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CoordinateRange {
    start: Coordinate,
    end: Coordinate,
}

impl CoordinateRange {
    pub fn new(start: Coordinate, end: Coordinate) -> Result<Self, ScanError> {
        if start.dims() == 0 {
            return Err(ScanError::Validation(
                "coordinate range needs at least one dimension".into(),
            ));
        }
        if start.dims() != end.dims() {
            return Err(ScanError::Validation(format!(
                "coordinate range bounds disagree on dimensionality: {start} vs {end}"
            )));
        }
        if let Some(axis) = (0..start.dims()).find(|&i| start.axes[i] > end.axes[i]) {
            return Err(ScanError::Validation(format!(
                "coordinate range start {start} exceeds end {end} on axis {axis}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> &Coordinate {
        &self.start
    }

    pub fn end(&self) -> &Coordinate {
        &self.end
    }

    pub fn dims(&self) -> usize {
        self.start.dims()
    }

    pub fn axis_bounds(&self, axis: usize) -> Option<(i64, i64)> {
        Some((self.start.get(axis)?, self.end.get(axis)?))
    }

    pub fn contains(&self, coord: &Coordinate) -> bool {
        coord.dims() == self.dims()
            && coord
                .axes
                .iter()
                .zip(self.start.axes.iter().zip(self.end.axes.iter()))
                .all(|(c, (lo, hi))| lo <= c && c <= hi)
    }

    pub fn intersects(&self, other: &CoordinateRange) -> bool {
        other.dims() == self.dims()
            && (0..self.dims()).all(|i| {
                self.start.axes[i] <= other.end.axes[i] && other.start.axes[i] <= self.end.axes[i]
            })
    }

    /// True when every point of `other` lies inside `self`.
    pub fn covers(&self, other: &CoordinateRange) -> bool {
        other.dims() == self.dims()
            && (0..self.dims()).all(|i| {
                self.start.axes[i] <= other.start.axes[i] && other.end.axes[i] <= self.end.axes[i]
            })
    }

    pub fn intersection(&self, other: &CoordinateRange) -> Option<CoordinateRange> {
        if !self.intersects(other) {
            return None;
        }
        let start = (0..self.dims())
            .map(|i| self.start.axes[i].max(other.start.axes[i]))
            .collect();
        let end = (0..self.dims())
            .map(|i| self.end.axes[i].min(other.end.axes[i]))
            .collect();
        Some(CoordinateRange { start, end })
    }

    /// Returns a copy bounded to `[lo, hi]` along `axis`.
    pub fn with_axis(&self, axis: usize, lo: i64, hi: i64) -> Result<CoordinateRange, ScanError> {
        if axis >= self.dims() {
            return Err(ScanError::Validation(format!(
                "axis {axis} out of bounds for {}-dimensional range",
                self.dims()
            )));
        }
        CoordinateRange::new(self.start.with_axis(axis, lo), self.end.with_axis(axis, hi))
    }

    pub(crate) fn to_axis_bounds(&self) -> Vec<(i64, i64)> {
        self.start
            .axes
            .iter()
            .zip(self.end.axes.iter())
            .map(|(lo, hi)| (*lo, *hi))
            .collect()
    }

    /// Caller guarantees `lo <= hi` for every pair and at least one pair.
    pub(crate) fn from_axis_bounds(bounds: &[(i64, i64)]) -> CoordinateRange {
        debug_assert!(!bounds.is_empty() && bounds.iter().all(|(lo, hi)| lo <= hi));
        CoordinateRange {
            start: bounds.iter().map(|(lo, _)| *lo).collect(),
            end: bounds.iter().map(|(_, hi)| *hi).collect(),
        }
    }

    /// Bounding box of two ranges of equal dimensionality.
    pub(crate) fn hull(&self, other: &CoordinateRange) -> CoordinateRange {
        let start = (0..self.dims())
            .map(|i| self.start.axes[i].min(other.start.axes[i]))
            .collect();
        let end = (0..self.dims())
            .map(|i| self.end.axes[i].max(other.end.axes[i]))
            .collect();
        CoordinateRange { start, end }
    }
}

impl fmt::Display for CoordinateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}
