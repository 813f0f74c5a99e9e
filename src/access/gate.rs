use crate::access::collapse::collapse_to_ranges;
use crate::access::resolver::{AuthorizedKeySet, PermissionResolver};
use crate::catalog::schema::{ArraySchema, DimensionTag};
use crate::config::{ElevatedAccessPolicy, SecureScanConfig};
use crate::error::ScanError;
use crate::exchange::ReplicationExchange;
use crate::permission::{AccessControl, CallerContext, Right};
use crate::query::context::QueryContext;
use crate::storage::ArrayHandle;
use crate::storage::coordinate::CoordinateRange;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Right that let a caller skip cell-level filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElevatedGrant {
    DbAdmin,
    NamespaceRead,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Unrestricted { via: ElevatedGrant },
    RestrictedBySpatialFilter { ranges: Vec<CoordinateRange> },
    Denied,
}

impl AccessDecision {
    pub fn is_restricted(&self) -> bool {
        matches!(self, AccessDecision::RestrictedBySpatialFilter { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    CheckingElevated,
    CheckingUserPermissions,
    Unrestricted,
    RestrictedBySpatialFilter,
    Denied,
}

impl GateState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GateState::Unrestricted | GateState::RestrictedBySpatialFilter | GateState::Denied
        )
    }
}

/// Axis of the target array that permission keys restrict.
pub fn target_key_axis(config: &SecureScanConfig, schema: &ArraySchema) -> Result<usize, ScanError> {
    schema
        .role_axis(DimensionTag::ProtectedKey, &config.key_dimension)
        .ok_or_else(|| {
            ScanError::schema(
                schema.qualified_name(),
                format!(
                    "array has no protected-key dimension (tag or '{}')",
                    config.key_dimension
                ),
            )
        })
}

/// Decides how much of an array one caller may see.
///
/// ```text
/// CheckingElevated ──elevated──▶ Unrestricted
///        │
///        ▼
/// CheckingUserPermissions ──keys──▶ RestrictedBySpatialFilter
///        │
///        └──no keys──▶ Denied
/// ```
pub struct AccessDecisionGate<'a> {
    config: &'a SecureScanConfig,
    rights: &'a dyn AccessControl,
    caller: &'a CallerContext,
    state: GateState,
}

impl<'a> AccessDecisionGate<'a> {
    pub fn new(
        config: &'a SecureScanConfig,
        rights: &'a dyn AccessControl,
        caller: &'a CallerContext,
    ) -> Self {
        Self {
            config,
            rights,
            caller,
            state: GateState::CheckingElevated,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Leaves `CheckingElevated`. Returns the grant when the caller bypasses filtering.
    pub fn check_elevated(&mut self, namespace: &str) -> Result<Option<ElevatedGrant>, ScanError> {
        self.expect_state(GateState::CheckingElevated)?;
        if self.holds(&Right::db_admin()) {
            warn!(
                caller = %self.caller.caller_id,
                namespace,
                "database admin bypassing cell-level access control"
            );
            self.transition(GateState::Unrestricted);
            return Ok(Some(ElevatedGrant::DbAdmin));
        }
        if self.config.elevated_access == ElevatedAccessPolicy::AdminOrNamespaceRead
            && self.holds(&Right::namespace_read(namespace))
        {
            info!(
                caller = %self.caller.caller_id,
                namespace,
                "namespace read right bypasses cell-level access control"
            );
            self.transition(GateState::Unrestricted);
            return Ok(Some(ElevatedGrant::NamespaceRead));
        }
        self.transition(GateState::CheckingUserPermissions);
        Ok(None)
    }

    /// Leaves `CheckingUserPermissions` given the caller's resolved keys.
    pub fn decide_from_keys(
        &mut self,
        keys: &AuthorizedKeySet,
        target: &ArraySchema,
        key_axis: usize,
    ) -> Result<AccessDecision, ScanError> {
        self.expect_state(GateState::CheckingUserPermissions)?;
        let ranges = collapse_to_ranges(keys.keys(), target, key_axis)?;
        if ranges.is_empty() {
            info!(
                caller = %self.caller.caller_id,
                user_id = self.caller.user_id,
                array = %target.qualified_name(),
                "no permissions in scanned array"
            );
            self.transition(GateState::Denied);
            return Ok(AccessDecision::Denied);
        }
        debug!(
            keys = keys.len(),
            ranges = ranges.len(),
            "collapsed authorized keys"
        );
        self.transition(GateState::RestrictedBySpatialFilter);
        Ok(AccessDecision::RestrictedBySpatialFilter { ranges })
    }

    /// Runs the whole machine: elevated check, local permission resolution,
    /// the exchange round in which workers agree on both, collapse.
    pub fn decide(
        &mut self,
        target: &ArraySchema,
        permissions: &dyn ArrayHandle,
        exchange: &dyn ReplicationExchange,
        ctx: &QueryContext,
    ) -> Result<AccessDecision, ScanError> {
        let resolver = PermissionResolver::new(self.config);
        let elevated = self.check_elevated(&target.namespace)?;
        let local = match elevated {
            Some(_) => Ok(AuthorizedKeySet::default()),
            None => resolver.resolve(self.caller.user_id, permissions, ctx),
        };
        let agreed = resolver.agree(self.caller.user_id, elevated, local, exchange, ctx)?;
        if let Some(via) = agreed.elevated {
            return Ok(AccessDecision::Unrestricted { via });
        }
        let key_axis = target_key_axis(self.config, target)?;
        self.decide_from_keys(&agreed.keys, target, key_axis)
    }

    fn holds(&self, right: &Right) -> bool {
        match self.rights.check_rights(self.caller, right) {
            Ok(granted) => granted,
            Err(err) => {
                warn!(
                    caller = %self.caller.caller_id,
                    ?right,
                    error = %err,
                    "rights check failed, treating as not granted"
                );
                false
            }
        }
    }

    fn expect_state(&self, expected: GateState) -> Result<(), ScanError> {
        if self.state != expected {
            return Err(ScanError::Validation(format!(
                "access gate is in state {:?}, expected {expected:?}",
                self.state
            )));
        }
        Ok(())
    }

    fn transition(&mut self, next: GateState) {
        debug!(
            caller = %self.caller.caller_id,
            from = ?self.state,
            to = ?next,
            "access gate transition"
        );
        self.state = next;
    }
}
