use crate::access::resolver::{AuthorizedKeySet, PermissionLayout};
use crate::catalog::schema::{ArraySchema, AttributeDef};
use crate::catalog::types::{Cell, Value};
use crate::error::ScanError;
use crate::query::context::QueryContext;
use crate::storage::coordinate::Coordinate;
use crate::storage::{ArrayHandle, Chunk, ChunkIter};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Positional join of a base array with one user's slice of its permission
/// array on the protected-key dimension.
///
/// The output has the base dimensions and the base attributes followed by the
/// permission attributes. A base cell appears only when its key is granted.
/// Keys granted on another worker whose permission cells are not stored
/// locally join with nulls.
#[derive(Debug)]
pub struct PermissionJoinView {
    base: Arc<dyn ArrayHandle>,
    schema: ArraySchema,
    key_axis: usize,
    grants: BTreeMap<i64, Cell>,
}

impl PermissionJoinView {
    pub fn new(
        base: Arc<dyn ArrayHandle>,
        key_axis: usize,
        permissions: &dyn ArrayHandle,
        layout: PermissionLayout,
        user_id: i64,
        authorized: &AuthorizedKeySet,
        ctx: &QueryContext,
    ) -> Result<Self, ScanError> {
        let base_schema = base.schema();
        if key_axis >= base_schema.dims() {
            return Err(ScanError::Validation(format!(
                "key axis {key_axis} out of bounds for array '{}'",
                base_schema.qualified_name()
            )));
        }
        let perm_schema = permissions.schema();
        let schema = joined_schema(base_schema, perm_schema);

        let mut grants: BTreeMap<i64, Cell> = BTreeMap::new();
        let extent = perm_schema.full_extent()?;
        let user_in_extent = extent
            .axis_bounds(layout.user_axis)
            .is_some_and(|(lo, hi)| lo <= user_id && user_id <= hi);
        if user_in_extent {
            let slice = extent.with_axis(layout.user_axis, user_id, user_id)?;
            for chunk in permissions.chunks_within(&slice) {
                ctx.check_cancelled()?;
                for (coord, cell) in chunk.iter() {
                    let Some(key) = coord.get(layout.key_axis) else {
                        continue;
                    };
                    let granted = cell
                        .value(layout.grant_attribute)
                        .is_some_and(|v| v.is_true());
                    if granted && authorized.contains(key) {
                        grants.entry(key).or_insert_with(|| cell.clone());
                    }
                }
            }
        }
        let nulls = Cell::from_values(vec![Value::Null; perm_schema.attributes.len()]);
        for &key in authorized.keys() {
            grants.entry(key).or_insert_with(|| nulls.clone());
        }

        Ok(Self {
            base,
            schema,
            key_axis,
            grants,
        })
    }

    pub fn granted_keys(&self) -> impl Iterator<Item = i64> + '_ {
        self.grants.keys().copied()
    }

    fn join_chunk(&self, chunk: Chunk) -> Option<Chunk> {
        let (lo, hi) = chunk.bounds.axis_bounds(self.key_axis)?;
        if self.grants.range(lo..=hi).next().is_none() {
            return None;
        }
        let cells = chunk
            .cells
            .iter()
            .filter_map(|(coord, cell)| {
                let grant = self.grants.get(&coord.get(self.key_axis)?)?;
                Some((coord.clone(), cell.joined(grant)))
            })
            .collect();
        let joined = Chunk {
            position: chunk.position,
            bounds: chunk.bounds,
            cells,
        };
        (!joined.is_empty()).then_some(joined)
    }
}

/// Base attributes, then permission attributes. A permission attribute whose
/// name is taken by a base attribute becomes `<permission array>.<attr>`.
fn joined_schema(base: &ArraySchema, permissions: &ArraySchema) -> ArraySchema {
    let mut schema = base.clone();
    for attr in &permissions.attributes {
        let name = if base.attribute_index(&attr.name).is_some() {
            format!("{}.{}", permissions.name, attr.name)
        } else {
            attr.name.clone()
        };
        schema.attributes.push(AttributeDef {
            name,
            attr_type: attr.attr_type,
            nullable: true,
        });
    }
    schema
}

impl ArrayHandle for PermissionJoinView {
    fn schema(&self) -> &ArraySchema {
        &self.schema
    }

    fn chunks(&self) -> ChunkIter<'_> {
        Box::new(
            self.base
                .chunks()
                .filter_map(move |chunk| self.join_chunk(chunk)),
        )
    }

    fn get(&self, coord: &Coordinate) -> Option<Cell> {
        let grant = self.grants.get(&coord.get(self.key_axis)?)?;
        self.base.get(coord).map(|cell| cell.joined(grant))
    }
}
