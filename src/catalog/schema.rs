use crate::catalog::types::AttributeType;
use crate::error::ScanError;
use crate::storage::coordinate::{Coordinate, CoordinateRange};
use serde::{Deserialize, Serialize};

/// Semantic role of a dimension in access control.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DimensionTag {
    User,
    ProtectedKey,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DimensionDef {
    pub name: String,
    pub start: i64,
    /// `None` means the dimension is unbounded (`*`).
    pub end: Option<i64>,
    /// `None` means the chunk interval is not resolved yet (auto-chunked).
    pub chunk_interval: Option<u64>,
    #[serde(default)]
    pub tag: Option<DimensionTag>,
}

impl DimensionDef {
    pub fn new(name: impl Into<String>, start: i64, end: i64, chunk_interval: u64) -> Self {
        Self {
            name: name.into(),
            start,
            end: Some(end),
            chunk_interval: Some(chunk_interval),
            tag: None,
        }
    }

    pub fn tagged(mut self, tag: DimensionTag) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.end = None;
        self
    }

    pub fn autochunked(mut self) -> Self {
        self.chunk_interval = None;
        self
    }

    /// Declared upper bound, with unbounded dimensions reaching `i64::MAX`.
    pub fn high(&self) -> i64 {
        self.end.unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttributeDef {
    pub name: String,
    pub attr_type: AttributeType,
    pub nullable: bool,
}

impl AttributeDef {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            nullable: true,
        }
    }
}

/// How an array's chunks are spread across workers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Distribution {
    #[default]
    HashPartitioned,
    RowCyclic,
    Replicated,
    /// Partitioning is not known to the optimizer (e.g. degraded reads).
    Undefined,
    Uninitialized,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArraySchema {
    pub id: u64,
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub version: u64,
    pub dimensions: Vec<DimensionDef>,
    pub attributes: Vec<AttributeDef>,
    #[serde(default)]
    pub transient: bool,
    #[serde(default)]
    pub distribution: Distribution,
}

impl ArraySchema {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: 0,
            namespace: namespace.into(),
            name: name.into(),
            version: 0,
            dimensions: Vec::new(),
            attributes: Vec::new(),
            transient: false,
            distribution: Distribution::default(),
        }
    }

    pub fn dimension(mut self, dim: DimensionDef) -> Self {
        self.dimensions.push(dim);
        self
    }

    pub fn attribute(mut self, attr: AttributeDef) -> Self {
        self.attributes.push(attr);
        self
    }

    pub fn with_distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = distribution;
        self
    }

    pub fn as_transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    pub fn dims(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_autochunked(&self) -> bool {
        self.dimensions.iter().any(|d| d.chunk_interval.is_none())
    }

    pub fn is_bounded(&self) -> bool {
        self.dimensions.iter().all(|d| d.end.is_some())
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    /// Locates the dimension playing `tag`: an explicitly tagged dimension wins,
    /// otherwise an untagged dimension named `fallback_name`.
    pub fn role_axis(&self, tag: DimensionTag, fallback_name: &str) -> Option<usize> {
        self.dimensions
            .iter()
            .position(|d| d.tag == Some(tag))
            .or_else(|| {
                self.dimensions
                    .iter()
                    .position(|d| d.tag.is_none() && d.name == fallback_name)
            })
    }

    pub fn low_boundary(&self) -> Coordinate {
        self.dimensions.iter().map(|d| d.start).collect()
    }

    pub fn high_boundary(&self) -> Coordinate {
        self.dimensions.iter().map(DimensionDef::high).collect()
    }

    /// The whole declared coordinate space of the array.
    pub fn full_extent(&self) -> Result<CoordinateRange, ScanError> {
        CoordinateRange::new(self.low_boundary(), self.high_boundary())
            .map_err(|e| ScanError::schema(self.qualified_name(), e.to_string()))
    }

    /// Position (origin) of the chunk holding `coord`.
    pub fn chunk_position(&self, coord: &Coordinate) -> Result<Coordinate, ScanError> {
        if coord.dims() != self.dims() {
            return Err(ScanError::Validation(format!(
                "coordinate {coord} has {} dimensions, array '{}' has {}",
                coord.dims(),
                self.qualified_name(),
                self.dims()
            )));
        }
        let mut origin = Vec::with_capacity(self.dims());
        for (dim, value) in self.dimensions.iter().zip(coord.as_slice()) {
            let interval = dim.chunk_interval.ok_or_else(|| {
                ScanError::schema(self.qualified_name(), "auto-chunked arrays not supported")
            })?;
            let offset = (*value as i128 - dim.start as i128).div_euclid(interval as i128);
            origin.push((dim.start as i128 + offset * interval as i128) as i64);
        }
        Ok(Coordinate::from(origin))
    }

    /// Cells covered by the chunk whose origin is `position`, clipped to the extent.
    pub fn chunk_bounds(&self, position: &Coordinate) -> Result<CoordinateRange, ScanError> {
        let mut end = Vec::with_capacity(self.dims());
        for (dim, origin) in self.dimensions.iter().zip(position.as_slice()) {
            let interval = dim.chunk_interval.ok_or_else(|| {
                ScanError::schema(self.qualified_name(), "auto-chunked arrays not supported")
            })?;
            let last = (*origin as i128 + interval as i128 - 1).min(dim.high() as i128);
            end.push(last as i64);
        }
        CoordinateRange::new(position.clone(), Coordinate::from(end))
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        if self.dimensions.is_empty() {
            return Err(ScanError::schema(
                self.qualified_name(),
                "array needs at least one dimension",
            ));
        }
        for (i, dim) in self.dimensions.iter().enumerate() {
            if self.dimensions[..i].iter().any(|d| d.name == dim.name) {
                return Err(ScanError::schema(
                    self.qualified_name(),
                    format!("duplicate dimension '{}'", dim.name),
                ));
            }
            if dim.high() < dim.start {
                return Err(ScanError::schema(
                    self.qualified_name(),
                    format!("dimension '{}' ends before it starts", dim.name),
                ));
            }
            if dim.chunk_interval == Some(0) {
                return Err(ScanError::schema(
                    self.qualified_name(),
                    format!("dimension '{}' has a zero chunk interval", dim.name),
                ));
            }
        }
        for tag in [DimensionTag::User, DimensionTag::ProtectedKey] {
            if self.dimensions.iter().filter(|d| d.tag == Some(tag)).count() > 1 {
                return Err(ScanError::schema(
                    self.qualified_name(),
                    format!("more than one dimension tagged {tag:?}"),
                ));
            }
        }
        for (i, attr) in self.attributes.iter().enumerate() {
            if self.attributes[..i].iter().any(|a| a.name == attr.name) {
                return Err(ScanError::schema(
                    self.qualified_name(),
                    format!("duplicate attribute '{}'", attr.name),
                ));
            }
        }
        Ok(())
    }
}
