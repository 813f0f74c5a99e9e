//! Coalesced sets of axis-aligned coordinate ranges.
//!
//! A [`SpatialRangeSet`] accepts ranges in any order, overlapping or not, and
//! is frozen by [`SpatialRangeSet::build_index`]. Indexing merges ranges whose
//! union is itself a box, drops ranges covered by another range, and sorts
//! what remains along the axis that best separates the ranges so that
//! membership lookups only visit nearby candidates.

use crate::error::ScanError;
use crate::storage::coordinate::{Coordinate, CoordinateRange};
use std::collections::BTreeMap;

type Bounds = Vec<(i64, i64)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpatialRangeSet {
    dims: usize,
    ranges: Vec<CoordinateRange>,
    index: Option<RangeIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RangeIndex {
    axis: usize,
    /// `max_end[i]` is the largest end on `axis` among `ranges[..=i]`.
    max_end: Vec<i64>,
}

impl SpatialRangeSet {
    pub fn new(dims: usize) -> Result<Self, ScanError> {
        if dims == 0 {
            return Err(ScanError::Validation(
                "spatial range set needs at least one dimension".into(),
            ));
        }
        Ok(Self {
            dims,
            ranges: Vec::new(),
            index: None,
        })
    }

    /// Builds and indexes a set in one step.
    pub fn from_ranges<I>(dims: usize, ranges: I) -> Result<Self, ScanError>
    where
        I: IntoIterator<Item = CoordinateRange>,
    {
        let mut set = Self::new(dims)?;
        for range in ranges {
            set.insert(range)?;
        }
        set.build_index();
        Ok(set)
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn insert(&mut self, range: CoordinateRange) -> Result<(), ScanError> {
        if self.index.is_some() {
            return Err(ScanError::Validation(
                "spatial range set is frozen after build_index".into(),
            ));
        }
        if range.dims() != self.dims {
            return Err(ScanError::Validation(format!(
                "range {range} has {} dimensions, set has {}",
                range.dims(),
                self.dims
            )));
        }
        self.ranges.push(range);
        Ok(())
    }

    /// Freezes the set. Calling it again is a no-op.
    pub fn build_index(&mut self) {
        if self.index.is_some() {
            return;
        }
        let bounds: Vec<Bounds> = self
            .ranges
            .iter()
            .map(CoordinateRange::to_axis_bounds)
            .collect();
        let canonical = canonicalize(bounds, self.dims);
        let axis = most_selective_axis(&canonical, self.dims);
        let (ranges, max_end) = sort_for_lookup(canonical, axis);
        self.ranges = ranges;
        self.index = Some(RangeIndex { axis, max_end });
    }

    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn ranges(&self) -> Result<&[CoordinateRange], ScanError> {
        self.require_index()?;
        Ok(&self.ranges)
    }

    pub fn contains(&self, coord: &Coordinate) -> Result<bool, ScanError> {
        let index = self.require_index()?;
        if coord.dims() != self.dims {
            return Err(ScanError::Validation(format!(
                "coordinate {coord} has {} dimensions, set has {}",
                coord.dims(),
                self.dims
            )));
        }
        let at = coord.as_slice()[index.axis];
        Ok(self
            .candidates(index, at, at)
            .any(|range| range.contains(coord)))
    }

    /// True when some stored range shares at least one point with `range`.
    pub fn intersects(&self, range: &CoordinateRange) -> Result<bool, ScanError> {
        let index = self.require_index()?;
        let Some((lo, hi)) = range.axis_bounds(index.axis) else {
            return Ok(false);
        };
        Ok(self.candidates(index, lo, hi).any(|r| r.intersects(range)))
    }

    /// True when a single stored range contains all of `range`.
    pub fn covers(&self, range: &CoordinateRange) -> Result<bool, ScanError> {
        let index = self.require_index()?;
        let Some((lo, hi)) = range.axis_bounds(index.axis) else {
            return Ok(false);
        };
        Ok(self.candidates(index, lo, hi).any(|r| r.covers(range)))
    }

    /// Smallest range enclosing every stored range.
    pub fn bounding_box(&self) -> Result<Option<CoordinateRange>, ScanError> {
        self.require_index()?;
        let mut iter = self.ranges.iter();
        let Some(first) = iter.next() else {
            return Ok(None);
        };
        Ok(Some(iter.fold(first.clone(), |acc, r| acc.hull(r))))
    }

    fn require_index(&self) -> Result<&RangeIndex, ScanError> {
        self.index.as_ref().ok_or(ScanError::IndexNotBuilt)
    }

    /// Ranges whose extent on the index axis may overlap `[lo, hi]`.
    fn candidates<'a>(
        &'a self,
        index: &'a RangeIndex,
        lo: i64,
        hi: i64,
    ) -> impl Iterator<Item = &'a CoordinateRange> + 'a {
        let axis = index.axis;
        let upper = self
            .ranges
            .partition_point(|r| r.start().as_slice()[axis] <= hi);
        (0..upper)
            .rev()
            .take_while(move |&i| index.max_end[i] >= lo)
            .map(move |i| &self.ranges[i])
    }
}

fn canonicalize(mut bounds: Vec<Bounds>, dims: usize) -> Vec<Bounds> {
    bounds.sort();
    bounds.dedup();
    loop {
        let before = bounds.len();
        for axis in 0..dims {
            bounds = merge_along_axis(bounds, axis);
        }
        bounds = drop_covered(bounds, dims);
        if bounds.len() == before {
            return bounds;
        }
    }
}

/// Merges ranges that agree on every axis except `axis` and overlap or touch on it.
fn merge_along_axis(bounds: Vec<Bounds>, axis: usize) -> Vec<Bounds> {
    let mut groups: BTreeMap<Bounds, Vec<(i64, i64)>> = BTreeMap::new();
    for b in bounds {
        let interval = b[axis];
        let mut key = b;
        key[axis] = (0, 0);
        groups.entry(key).or_default().push(interval);
    }
    let mut out = Vec::new();
    for (key, mut intervals) in groups {
        intervals.sort_unstable();
        let mut current = intervals[0];
        for (lo, hi) in intervals.into_iter().skip(1) {
            if lo <= current.1.saturating_add(1) {
                current.1 = current.1.max(hi);
            } else {
                out.push(with_interval(&key, axis, current));
                current = (lo, hi);
            }
        }
        out.push(with_interval(&key, axis, current));
    }
    out.sort();
    out
}

fn with_interval(key: &Bounds, axis: usize, interval: (i64, i64)) -> Bounds {
    let mut b = key.clone();
    b[axis] = interval;
    b
}

fn drop_covered(bounds: Vec<Bounds>, dims: usize) -> Vec<Bounds> {
    if bounds.len() < 2 {
        return bounds;
    }
    let axis = most_selective_axis(&bounds, dims);
    let mut order: Vec<usize> = (0..bounds.len()).collect();
    order.sort_by(|&a, &b| bounds[a][axis].cmp(&bounds[b][axis]).then(bounds[a].cmp(&bounds[b])));
    let mut max_end = Vec::with_capacity(order.len());
    let mut running = i64::MIN;
    for &i in &order {
        running = running.max(bounds[i][axis].1);
        max_end.push(running);
    }
    let covers = |outer: &Bounds, inner: &Bounds| {
        outer
            .iter()
            .zip(inner)
            .all(|(o, i)| o.0 <= i.0 && i.1 <= o.1)
    };
    let mut covered = vec![false; bounds.len()];
    for &i in &order {
        let (lo, hi) = bounds[i][axis];
        let upper = order.partition_point(|&j| bounds[j][axis].0 <= lo);
        covered[i] = (0..upper)
            .rev()
            .take_while(|&k| max_end[k] >= hi)
            .map(|k| order[k])
            .any(|j| j != i && covers(&bounds[j], &bounds[i]));
    }
    bounds
        .into_iter()
        .zip(covered)
        .filter_map(|(b, c)| (!c).then_some(b))
        .collect()
}

/// Axis with the most distinct extents; ties go to the lowest axis.
fn most_selective_axis(bounds: &[Bounds], dims: usize) -> usize {
    (0..dims)
        .map(|axis| {
            let mut extents: Vec<(i64, i64)> = bounds.iter().map(|b| b[axis]).collect();
            extents.sort_unstable();
            extents.dedup();
            (extents.len(), std::cmp::Reverse(axis))
        })
        .max()
        .map(|(_, std::cmp::Reverse(axis))| axis)
        .unwrap_or(0)
}

fn sort_for_lookup(mut bounds: Vec<Bounds>, axis: usize) -> (Vec<CoordinateRange>, Vec<i64>) {
    bounds.sort_by(|a, b| a[axis].cmp(&b[axis]).then(a.cmp(b)));
    let mut max_end = Vec::with_capacity(bounds.len());
    let mut running = i64::MIN;
    for b in &bounds {
        running = running.max(b[axis].1);
        max_end.push(running);
    }
    let ranges = bounds
        .iter()
        .map(|b| CoordinateRange::from_axis_bounds(b))
        .collect();
    (ranges, max_end)
}
