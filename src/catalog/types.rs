use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AttributeType {
    Boolean,
    Integer,
    Float,
    Text,
}

impl std::fmt::Display for AttributeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeType::Boolean => write!(f, "bool"),
            AttributeType::Integer => write!(f, "int64"),
            AttributeType::Float => write!(f, "double"),
            AttributeType::Text => write!(f, "string"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(CompactString),
    Null,
}

/// Attribute values of one array cell, in schema attribute order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cell {
    pub values: Vec<Value>,
}

impl Cell {
    pub fn from_values(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn value(&self, attribute_idx: usize) -> Option<&Value> {
        self.values.get(attribute_idx)
    }

    /// Appends `other`'s values after this cell's values.
    pub fn joined(&self, other: &Cell) -> Cell {
        let mut values = Vec::with_capacity(self.values.len() + other.values.len());
        values.extend(self.values.iter().cloned());
        values.extend(other.values.iter().cloned());
        Cell { values }
    }
}

impl Value {
    pub fn text(s: &str) -> Self {
        Value::Text(CompactString::from(s))
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Value::Boolean(true))
    }

    pub fn matches_type(&self, ty: AttributeType) -> bool {
        matches!(
            (self, ty),
            (Value::Null, _)
                | (Value::Boolean(_), AttributeType::Boolean)
                | (Value::Integer(_), AttributeType::Integer)
                | (Value::Float(_), AttributeType::Float)
                | (Value::Text(_), AttributeType::Text)
        )
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) => 2,
            Value::Float(_) => 3,
            Value::Text(_) => 4,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank_cmp = self.kind_rank().cmp(&other.kind_rank());
        if rank_cmp != Ordering::Equal {
            return rank_cmp;
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}
