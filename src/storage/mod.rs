pub mod coordinate;
pub mod mem;

use crate::catalog::schema::ArraySchema;
use crate::catalog::types::{Cell, Value};
use crate::error::{ResourceType, ScanError};
use crate::storage::coordinate::{Coordinate, CoordinateRange};
use im::OrdMap;
use std::fmt;
use std::sync::Arc;

/// One chunk of an array: its origin, the cells it may hold, and the cells it does hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub position: Coordinate,
    pub bounds: CoordinateRange,
    pub cells: OrdMap<Coordinate, Cell>,
}

impl Chunk {
    pub fn empty(position: Coordinate, bounds: CoordinateRange) -> Self {
        Self {
            position,
            bounds,
            cells: OrdMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Coordinate, &Cell)> {
        self.cells.iter()
    }

    /// Copy of this chunk keeping only cells accepted by `keep`.
    pub fn retain<F>(&self, mut keep: F) -> Chunk
    where
        F: FnMut(&Coordinate) -> bool,
    {
        Chunk {
            position: self.position.clone(),
            bounds: self.bounds.clone(),
            cells: self
                .cells
                .iter()
                .filter(|(coord, _)| keep(coord))
                .map(|(coord, cell)| (coord.clone(), cell.clone()))
                .collect(),
        }
    }

    pub fn restricted_to(&self, range: &CoordinateRange) -> Chunk {
        self.retain(|coord| range.contains(coord))
    }
}

pub type ChunkIter<'a> = Box<dyn Iterator<Item = Chunk> + 'a>;
pub type CellIter<'a> = Box<dyn Iterator<Item = (Coordinate, Value)> + 'a>;

/// Read-only access to a chunked array. Chunks come in ascending position order
/// and cells within a chunk in ascending coordinate order.
pub trait ArrayHandle: Send + Sync + fmt::Debug {
    fn schema(&self) -> &ArraySchema;

    fn chunks(&self) -> ChunkIter<'_>;

    fn get(&self, coord: &Coordinate) -> Option<Cell>;

    /// Chunks overlapping `range`, each trimmed to the cells inside it. Chunks
    /// left empty are skipped.
    fn chunks_within(&self, range: &CoordinateRange) -> ChunkIter<'_> {
        let range = range.clone();
        Box::new(self.chunks().filter_map(move |chunk| {
            if !chunk.bounds.intersects(&range) {
                return None;
            }
            let trimmed = if range.covers(&chunk.bounds) {
                chunk
            } else {
                chunk.restricted_to(&range)
            };
            (!trimmed.is_empty()).then_some(trimmed)
        }))
    }

    /// `(coordinate, value)` pairs of one attribute in natural order.
    fn iterate(&self, attribute: &str) -> Result<CellIter<'_>, ScanError> {
        let idx = self.schema().attribute_index(attribute).ok_or_else(|| {
            ScanError::not_found(
                ResourceType::Attribute,
                format!("{}.{attribute}", self.schema().qualified_name()),
            )
        })?;
        Ok(Box::new(self.chunks().flat_map(move |chunk| {
            chunk.cells.into_iter().map(move |(coord, cell)| {
                let value = cell.values.get(idx).cloned().unwrap_or(Value::Null);
                (coord, value)
            })
        })))
    }
}

/// Storage collaborator: opens arrays described by catalog schemas.
pub trait ArrayStore: Send + Sync {
    fn open_for_read(&self, schema: &ArraySchema) -> Result<Arc<dyn ArrayHandle>, ScanError>;
}
