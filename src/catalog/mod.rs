pub mod schema;
pub mod types;

use crate::catalog::schema::ArraySchema;
use crate::error::{ResourceType, ScanError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Which version of an array a reference selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ArrayVersion {
    #[default]
    Latest,
    At(u64),
    /// `name@*`: every version at once. Not scannable.
    All,
}

/// A possibly namespace-qualified, possibly versioned array name as written by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayRef {
    pub namespace: Option<String>,
    pub name: String,
    pub version: ArrayVersion,
}

impl ArrayRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
            version: ArrayVersion::Latest,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn at_version(mut self, version: ArrayVersion) -> Self {
        self.version = version;
        self
    }

    /// Parses `name`, `ns.name`, `name@3` and `ns.name@*`.
    pub fn parse(text: &str) -> Result<Self, ScanError> {
        let (qualified, version) = match text.split_once('@') {
            None => (text, ArrayVersion::Latest),
            Some((q, "*")) => (q, ArrayVersion::All),
            Some((q, v)) => {
                let parsed = v
                    .parse::<u64>()
                    .map_err(|_| ScanError::Validation(format!("invalid array version '{v}'")))?;
                (q, ArrayVersion::At(parsed))
            }
        };
        let (namespace, name) = match qualified.split_once('.') {
            Some((ns, name)) => (Some(ns.to_string()), name),
            None => (None, qualified),
        };
        validate_identifier(name, "array name")?;
        if let Some(ns) = &namespace {
            validate_identifier(ns, "namespace")?;
        }
        Ok(Self {
            namespace,
            name: name.to_string(),
            version,
        })
    }

    pub fn namespace_or<'a>(&'a self, default_namespace: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default_namespace)
    }
}

impl fmt::Display for ArrayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ns) = &self.namespace {
            write!(f, "{ns}.")?;
        }
        write!(f, "{}", self.name)?;
        match self.version {
            ArrayVersion::Latest => Ok(()),
            ArrayVersion::At(v) => write!(f, "@{v}"),
            ArrayVersion::All => write!(f, "@*"),
        }
    }
}

/// Catalog collaborator: resolves array names to schemas.
pub trait Catalog: Send + Sync {
    fn resolve(
        &self,
        namespace: &str,
        name: &str,
        version: ArrayVersion,
    ) -> Result<ArraySchema, ScanError>;
}

/// Versioned array catalog held in memory.
#[derive(Debug)]
pub struct InMemoryCatalog {
    arrays: RwLock<HashMap<(String, String), BTreeMap<u64, ArraySchema>>>,
    next_id: AtomicU64,
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            arrays: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Stores a new version of `schema`. The array id is stable across versions.
    pub fn register(&self, mut schema: ArraySchema) -> Result<ArraySchema, ScanError> {
        validate_identifier(&schema.namespace, "namespace")?;
        validate_identifier(&schema.name, "array name")?;
        schema.validate()?;
        let mut arrays = self.arrays.write();
        let versions = arrays
            .entry((schema.namespace.clone(), schema.name.clone()))
            .or_default();
        match versions.last_key_value() {
            Some((last, existing)) => {
                schema.id = existing.id;
                schema.version = last + 1;
            }
            None => {
                schema.id = self.next_id.fetch_add(1, Ordering::Relaxed);
                schema.version = 1;
            }
        }
        versions.insert(schema.version, schema.clone());
        Ok(schema)
    }

    pub fn drop_array(&self, namespace: &str, name: &str) -> bool {
        self.arrays
            .write()
            .remove(&(namespace.to_string(), name.to_string()))
            .is_some()
    }

    pub fn list_arrays(&self, namespace: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .arrays
            .read()
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }
}

impl Catalog for InMemoryCatalog {
    fn resolve(
        &self,
        namespace: &str,
        name: &str,
        version: ArrayVersion,
    ) -> Result<ArraySchema, ScanError> {
        let arrays = self.arrays.read();
        if !arrays.keys().any(|(ns, _)| ns == namespace) {
            return Err(ScanError::not_found(ResourceType::Namespace, namespace));
        }
        let versions = arrays
            .get(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| ScanError::not_found(ResourceType::Array, format!("{namespace}.{name}")))?;
        let found = match version {
            ArrayVersion::Latest => versions.last_key_value().map(|(_, s)| s),
            ArrayVersion::At(v) => versions.get(&v),
            ArrayVersion::All => {
                return Err(ScanError::Validation(format!(
                    "cannot resolve all versions of '{namespace}.{name}' to one schema"
                )));
            }
        };
        found.cloned().ok_or_else(|| {
            ScanError::not_found(
                ResourceType::Array,
                format!("{namespace}.{name}@{}", version_label(version)),
            )
        })
    }
}

fn version_label(version: ArrayVersion) -> String {
    match version {
        ArrayVersion::Latest => "latest".into(),
        ArrayVersion::At(v) => v.to_string(),
        ArrayVersion::All => "*".into(),
    }
}

fn validate_identifier(value: &str, what: &str) -> Result<(), ScanError> {
    if value.is_empty() {
        return Err(ScanError::Validation(format!("{what} must not be empty")));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ScanError::Validation(format!(
            "{what} '{value}' may only contain ASCII letters, digits and '_'"
        )));
    }
    Ok(())
}
