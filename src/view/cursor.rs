use crate::catalog::types::Cell;
use crate::error::ScanError;
use crate::query::context::QueryContext;
use crate::storage::coordinate::Coordinate;
use crate::storage::{ArrayHandle, ChunkIter};

type CellsOfChunk = Box<dyn Iterator<Item = (Coordinate, Cell)>>;

/// Lazy cell iteration over any array handle. The query's cancellation flag is
/// checked before each chunk is read; once cancellation is observed the cursor
/// yields a single `Cancelled` error and then ends.
pub struct ScanCursor<'a> {
    handle: &'a dyn ArrayHandle,
    ctx: &'a QueryContext,
    chunks: ChunkIter<'a>,
    current: Option<CellsOfChunk>,
    chunks_read: usize,
    finished: bool,
}

impl<'a> ScanCursor<'a> {
    pub fn new(handle: &'a dyn ArrayHandle, ctx: &'a QueryContext) -> Self {
        Self {
            handle,
            ctx,
            chunks: handle.chunks(),
            current: None,
            chunks_read: 0,
            finished: false,
        }
    }

    /// Starts over from the first chunk.
    pub fn restart(&mut self) {
        self.chunks = self.handle.chunks();
        self.current = None;
        self.chunks_read = 0;
        self.finished = false;
    }

    pub fn chunks_read(&self) -> usize {
        self.chunks_read
    }
}

impl Iterator for ScanCursor<'_> {
    type Item = Result<(Coordinate, Cell), ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(cells) = self.current.as_mut() {
                if let Some(item) = cells.next() {
                    return Some(Ok(item));
                }
                self.current = None;
            }
            if self.finished {
                return None;
            }
            if let Err(err) = self.ctx.check_cancelled() {
                self.finished = true;
                return Some(Err(err));
            }
            match self.chunks.next() {
                Some(chunk) => {
                    self.chunks_read += 1;
                    self.current = Some(Box::new(chunk.cells.into_iter()));
                }
                None => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }
}

/// Drains a handle into memory, stopping at the first error.
pub fn collect_cells(
    handle: &dyn ArrayHandle,
    ctx: &QueryContext,
) -> Result<Vec<(Coordinate, Cell)>, ScanError> {
    ScanCursor::new(handle, ctx).collect()
}
