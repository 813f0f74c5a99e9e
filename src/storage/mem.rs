use crate::catalog::schema::ArraySchema;
use crate::catalog::types::Cell;
use crate::error::ScanError;
use crate::storage::coordinate::Coordinate;
use crate::storage::{ArrayHandle, ArrayStore, Chunk, ChunkIter};
use im::OrdMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Chunked in-memory array. Cloning is cheap: chunks are persistent maps.
#[derive(Debug, Clone)]
pub struct MemArray {
    schema: ArraySchema,
    chunks: OrdMap<Coordinate, Chunk>,
}

impl MemArray {
    pub fn new(schema: ArraySchema) -> Result<Self, ScanError> {
        schema.validate()?;
        if schema.is_autochunked() {
            return Err(ScanError::schema(
                schema.qualified_name(),
                "auto-chunked arrays not supported",
            ));
        }
        Ok(Self {
            schema,
            chunks: OrdMap::new(),
        })
    }

    pub fn insert(&mut self, coord: Coordinate, cell: Cell) -> Result<(), ScanError> {
        let position = self.schema.chunk_position(&coord)?;
        let bounds = self.schema.chunk_bounds(&position)?;
        if !self.schema.full_extent()?.contains(&coord) {
            return Err(ScanError::Validation(format!(
                "coordinate {coord} is outside array '{}'",
                self.schema.qualified_name()
            )));
        }
        if cell.values.len() != self.schema.attributes.len() {
            return Err(ScanError::Validation(format!(
                "cell at {coord} has {} values, array '{}' has {} attributes",
                cell.values.len(),
                self.schema.qualified_name(),
                self.schema.attributes.len()
            )));
        }
        for (value, attr) in cell.values.iter().zip(&self.schema.attributes) {
            if !value.matches_type(attr.attr_type) {
                return Err(ScanError::Validation(format!(
                    "attribute '{}' expects {}, got {value:?}",
                    attr.name, attr.attr_type
                )));
            }
        }
        let mut chunk = self
            .chunks
            .get(&position)
            .cloned()
            .unwrap_or_else(|| Chunk::empty(position.clone(), bounds));
        chunk.cells.insert(coord, cell);
        self.chunks.insert(position, chunk);
        Ok(())
    }

    pub fn with_cells<I>(mut self, cells: I) -> Result<Self, ScanError>
    where
        I: IntoIterator<Item = (Coordinate, Cell)>,
    {
        for (coord, cell) in cells {
            self.insert(coord, cell)?;
        }
        Ok(self)
    }

    pub fn remove(&mut self, coord: &Coordinate) -> Option<Cell> {
        let position = self.schema.chunk_position(coord).ok()?;
        let mut chunk = self.chunks.get(&position).cloned()?;
        let removed = chunk.cells.remove(coord);
        if chunk.cells.is_empty() {
            self.chunks.remove(&position);
        } else {
            self.chunks.insert(position, chunk);
        }
        removed
    }

    pub fn cell_count(&self) -> usize {
        self.chunks.values().map(Chunk::len).sum()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Deals chunks round-robin (in position order) onto `workers` shards.
    pub fn partition(&self, workers: usize) -> Vec<MemArray> {
        let workers = workers.max(1);
        let mut shards: Vec<MemArray> = (0..workers)
            .map(|_| MemArray {
                schema: self.schema.clone(),
                chunks: OrdMap::new(),
            })
            .collect();
        for (i, (position, chunk)) in self.chunks.iter().enumerate() {
            shards[i % workers]
                .chunks
                .insert(position.clone(), chunk.clone());
        }
        shards
    }
}

impl ArrayHandle for MemArray {
    fn schema(&self) -> &ArraySchema {
        &self.schema
    }

    fn chunks(&self) -> ChunkIter<'_> {
        Box::new(self.chunks.values().cloned())
    }

    fn get(&self, coord: &Coordinate) -> Option<Cell> {
        let position = self.schema.chunk_position(coord).ok()?;
        self.chunks.get(&position)?.cells.get(coord).cloned()
    }
}

/// Local array storage of one worker, keyed by array id and version.
#[derive(Debug, Default)]
pub struct MemArrayStore {
    arrays: RwLock<HashMap<(u64, u64), Arc<MemArray>>>,
}

impl MemArrayStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `array` under its schema's id and version, replacing any previous copy.
    pub fn put(&self, array: MemArray) -> Arc<MemArray> {
        let key = (array.schema.id, array.schema.version);
        let array = Arc::new(array);
        self.arrays.write().insert(key, Arc::clone(&array));
        array
    }
}

impl ArrayStore for MemArrayStore {
    fn open_for_read(&self, schema: &ArraySchema) -> Result<Arc<dyn ArrayHandle>, ScanError> {
        if let Some(array) = self.arrays.read().get(&(schema.id, schema.version)) {
            return Ok(Arc::clone(array) as Arc<dyn ArrayHandle>);
        }
        // Nothing stored locally for this version: the local shard is empty.
        Ok(Arc::new(MemArray::new(schema.clone())?))
    }
}
