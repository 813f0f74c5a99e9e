//! Read-only views that hide unauthorized cells of a base array.

pub mod cursor;
pub mod join;

pub use cursor::{ScanCursor, collect_cells};
pub use join::PermissionJoinView;

use crate::catalog::schema::ArraySchema;
use crate::catalog::types::Cell;
use crate::error::ScanError;
use crate::spatial::SpatialRangeSet;
use crate::storage::coordinate::Coordinate;
use crate::storage::{ArrayHandle, Chunk, ChunkIter};
use std::sync::Arc;

/// Base array restricted to an indexed set of authorized ranges. Keeps the
/// base schema; cells outside every range do not exist in the view.
#[derive(Debug)]
pub struct FilteredArrayView {
    base: Arc<dyn ArrayHandle>,
    ranges: SpatialRangeSet,
}

impl FilteredArrayView {
    pub fn new(base: Arc<dyn ArrayHandle>, ranges: SpatialRangeSet) -> Result<Self, ScanError> {
        if !ranges.is_indexed() {
            return Err(ScanError::IndexNotBuilt);
        }
        let schema = base.schema();
        if ranges.dims() != schema.dims() {
            return Err(ScanError::Validation(format!(
                "range set has {} dimensions, array '{}' has {}",
                ranges.dims(),
                schema.qualified_name(),
                schema.dims()
            )));
        }
        if !schema.is_bounded() {
            return Err(ScanError::schema(
                schema.qualified_name(),
                "unbounded arrays cannot be filtered",
            ));
        }
        Ok(Self { base, ranges })
    }

    pub fn ranges(&self) -> &SpatialRangeSet {
        &self.ranges
    }

    pub fn base(&self) -> &Arc<dyn ArrayHandle> {
        &self.base
    }

    // The set is indexed and matches the base dimensionality, so range
    // queries below cannot fail.
    fn authorized(&self, coord: &Coordinate) -> bool {
        self.ranges.contains(coord).unwrap_or(false)
    }

    fn filter_chunk(&self, chunk: Chunk) -> Option<Chunk> {
        if !self.ranges.intersects(&chunk.bounds).unwrap_or(false) {
            return None;
        }
        if self.ranges.covers(&chunk.bounds).unwrap_or(false) {
            return (!chunk.is_empty()).then_some(chunk);
        }
        let filtered = chunk.retain(|coord| self.authorized(coord));
        (!filtered.is_empty()).then_some(filtered)
    }
}

impl ArrayHandle for FilteredArrayView {
    fn schema(&self) -> &ArraySchema {
        self.base.schema()
    }

    fn chunks(&self) -> ChunkIter<'_> {
        Box::new(
            self.base
                .chunks()
                .filter_map(move |chunk| self.filter_chunk(chunk)),
        )
    }

    fn get(&self, coord: &Coordinate) -> Option<Cell> {
        if !self.authorized(coord) {
            return None;
        }
        self.base.get(coord)
    }
}
