use crate::error::ScanError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Rights model consulted before any cell-level filtering happens.
///
/// - `Database`/`Admin` implies every other right.
/// - `Namespace`/`Read` implies `Namespace`/`List` on the same namespace.
/// - Namespace rights never spill into other namespaces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Resource {
    Database,
    Namespace(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
    Admin,
    Read,
    List,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Right {
    pub resource: Resource,
    pub action: Action,
}

impl Right {
    pub fn db_admin() -> Self {
        Self {
            resource: Resource::Database,
            action: Action::Admin,
        }
    }

    pub fn namespace_read(namespace: impl Into<String>) -> Self {
        Self {
            resource: Resource::Namespace(namespace.into()),
            action: Action::Read,
        }
    }

    pub fn namespace_list(namespace: impl Into<String>) -> Self {
        Self {
            resource: Resource::Namespace(namespace.into()),
            action: Action::List,
        }
    }

    fn implies(&self, required: &Right) -> bool {
        if self == required || *self == Right::db_admin() {
            return true;
        }
        self.resource == required.resource
            && self.action == Action::Read
            && required.action == Action::List
    }
}

/// Authenticated identity of the scan's caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallerContext {
    pub caller_id: String,
    /// Coordinate of this caller along the permission array's user dimension.
    pub user_id: i64,
}

impl CallerContext {
    pub fn new(caller_id: impl Into<String>, user_id: i64) -> Self {
        Self {
            caller_id: caller_id.into(),
            user_id,
        }
    }
}

/// Rights service collaborator. A returned error is treated by callers as
/// "not granted".
pub trait AccessControl: Send + Sync {
    fn check_rights(&self, caller: &CallerContext, required: &Right) -> Result<bool, ScanError>;
}

/// Grant table held in memory, keyed by caller id.
#[derive(Debug, Default)]
pub struct StaticAccessControl {
    grants: RwLock<HashMap<String, BTreeSet<Right>>>,
}

impl StaticAccessControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, caller_id: &str, right: Right) {
        self.grants
            .write()
            .entry(caller_id.to_string())
            .or_default()
            .insert(right);
    }

    pub fn revoke(&self, caller_id: &str, right: &Right) {
        if let Some(set) = self.grants.write().get_mut(caller_id) {
            set.remove(right);
        }
    }

    pub fn with_grant(self, caller_id: &str, right: Right) -> Self {
        self.grant(caller_id, right);
        self
    }
}

impl AccessControl for StaticAccessControl {
    fn check_rights(&self, caller: &CallerContext, required: &Right) -> Result<bool, ScanError> {
        let grants = self.grants.read();
        let Some(granted) = grants.get(&caller.caller_id) else {
            return Ok(false);
        };
        Ok(granted.iter().any(|g| g.implies(required)))
    }
}
