use crate::access::gate::ElevatedGrant;
use crate::catalog::schema::{ArraySchema, DimensionTag, Distribution};
use crate::catalog::types::AttributeType;
use crate::config::SecureScanConfig;
use crate::error::ScanError;
use crate::exchange::ReplicationExchange;
use crate::query::context::QueryContext;
use crate::storage::ArrayHandle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Protected-key values one user may read, ascending and without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedKeySet {
    keys: Vec<i64>,
}

impl AuthorizedKeySet {
    pub fn from_keys<I: IntoIterator<Item = i64>>(keys: I) -> Self {
        let set: BTreeSet<i64> = keys.into_iter().collect();
        Self {
            keys: set.into_iter().collect(),
        }
    }

    pub fn keys(&self) -> &[i64] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: i64) -> bool {
        self.keys.binary_search(&key).is_ok()
    }
}

/// Where the roles of a permission array live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionLayout {
    pub user_axis: usize,
    pub key_axis: usize,
    pub grant_attribute: usize,
}

/// What the workers of one query settled on in the exchange round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerAgreement {
    /// Set when every worker found the caller elevated in the same way.
    pub elevated: Option<ElevatedGrant>,
    /// Union of every worker's keys. Empty when `elevated` is set.
    pub keys: AuthorizedKeySet,
}

/// One worker's contribution to the exchange round.
#[derive(Debug, Serialize, Deserialize)]
struct PartialGrants {
    query_id: u64,
    worker: usize,
    user_id: i64,
    elevated: Option<ElevatedGrant>,
    /// Local keys, or the reason the worker could not resolve them.
    outcome: Result<AuthorizedKeySet, String>,
}

/// Turns a user's slice of a permission array into the keys they may read.
#[derive(Debug, Clone, Copy)]
pub struct PermissionResolver<'a> {
    config: &'a SecureScanConfig,
}

impl<'a> PermissionResolver<'a> {
    pub fn new(config: &'a SecureScanConfig) -> Self {
        Self { config }
    }

    pub fn layout(&self, schema: &ArraySchema) -> Result<PermissionLayout, ScanError> {
        let user_axis = schema
            .role_axis(DimensionTag::User, &self.config.user_dimension)
            .ok_or_else(|| {
                ScanError::schema(
                    schema.qualified_name(),
                    format!(
                        "permission array has no user dimension (tag or '{}')",
                        self.config.user_dimension
                    ),
                )
            })?;
        let key_axis = schema
            .role_axis(DimensionTag::ProtectedKey, &self.config.key_dimension)
            .ok_or_else(|| {
                ScanError::schema(
                    schema.qualified_name(),
                    format!(
                        "permission array has no protected-key dimension (tag or '{}')",
                        self.config.key_dimension
                    ),
                )
            })?;
        if user_axis == key_axis {
            return Err(ScanError::schema(
                schema.qualified_name(),
                "user and protected-key roles resolve to the same dimension",
            ));
        }
        let grant_attribute = match &self.config.grant_attribute {
            Some(name) => {
                let idx = schema.attribute_index(name).ok_or_else(|| {
                    ScanError::schema(
                        schema.qualified_name(),
                        format!("grant attribute '{name}' not found"),
                    )
                })?;
                if schema.attributes[idx].attr_type != AttributeType::Boolean {
                    return Err(ScanError::schema(
                        schema.qualified_name(),
                        format!("grant attribute '{name}' is not boolean"),
                    ));
                }
                idx
            }
            None => schema
                .attributes
                .iter()
                .position(|a| a.attr_type == AttributeType::Boolean)
                .ok_or_else(|| {
                    ScanError::schema(
                        schema.qualified_name(),
                        "permission array has no boolean grant attribute",
                    )
                })?,
        };
        Ok(PermissionLayout {
            user_axis,
            key_axis,
            grant_attribute,
        })
    }

    /// Keys granted to `user_id` in the locally stored part of `permissions`.
    pub fn resolve(
        &self,
        user_id: i64,
        permissions: &dyn ArrayHandle,
        ctx: &QueryContext,
    ) -> Result<AuthorizedKeySet, ScanError> {
        let schema = permissions.schema();
        let layout = self.layout(schema)?;
        let extent = schema.full_extent()?;
        let Some((lo, hi)) = extent.axis_bounds(layout.user_axis) else {
            return Ok(AuthorizedKeySet::default());
        };
        if user_id < lo || user_id > hi {
            debug!(
                user_id,
                array = %schema.qualified_name(),
                "user outside permission array extent"
            );
            return Ok(AuthorizedKeySet::default());
        }
        let slice = extent.with_axis(layout.user_axis, user_id, user_id)?;

        let mut keys = BTreeSet::new();
        let mut chunks_scanned = 0usize;
        for chunk in permissions.chunks_within(&slice) {
            ctx.check_cancelled()?;
            chunks_scanned += 1;
            for (coord, cell) in chunk.iter() {
                let granted = cell
                    .value(layout.grant_attribute)
                    .is_some_and(|v| v.is_true());
                if !granted {
                    continue;
                }
                if let Some(key) = coord.get(layout.key_axis) {
                    keys.insert(key);
                }
            }
            self.check_limit(keys.len())?;
        }
        debug!(
            user_id,
            worker = ctx.worker_id,
            array = %schema.qualified_name(),
            chunks_scanned,
            keys = keys.len(),
            "permission scan complete"
        );
        Ok(AuthorizedKeySet {
            keys: keys.into_iter().collect(),
        })
    }

    /// Like [`resolve`](Self::resolve), but the result covers every worker's
    /// part of a partitioned permission array.
    pub fn resolve_replicated(
        &self,
        user_id: i64,
        permissions: &dyn ArrayHandle,
        exchange: &dyn ReplicationExchange,
        ctx: &QueryContext,
    ) -> Result<AuthorizedKeySet, ScanError> {
        let local = self.resolve(user_id, permissions, ctx);
        if permissions.schema().distribution == Distribution::Replicated
            || exchange.worker_count() <= 1
        {
            return local;
        }
        self.agree(user_id, None, local, exchange, ctx)
            .map(|agreement| agreement.keys)
    }

    /// Runs the exchange round in which all workers of a query settle the
    /// caller's elevated grant and the union of their keys.
    ///
    /// Every worker takes part even when its own resolve failed, so a local
    /// error reaches the peers as a `SyncFailure` instead of a timeout. The
    /// failing worker returns its original error.
    pub fn agree(
        &self,
        user_id: i64,
        elevated: Option<ElevatedGrant>,
        local: Result<AuthorizedKeySet, ScanError>,
        exchange: &dyn ReplicationExchange,
        ctx: &QueryContext,
    ) -> Result<WorkerAgreement, ScanError> {
        if exchange.worker_count() <= 1 {
            return Ok(WorkerAgreement {
                elevated,
                keys: local?,
            });
        }

        let outcome = match &local {
            Ok(keys) => Ok(keys.clone()),
            Err(err) => Err(err.to_string()),
        };
        let payload = rmp_serde::to_vec(&PartialGrants {
            query_id: ctx.query_id,
            worker: ctx.worker_id,
            user_id,
            elevated,
            outcome,
        })
        .map_err(|e| ScanError::Encode(e.to_string()))?;
        let collected = exchange.broadcast_and_collect(payload, self.config.exchange_timeout());
        local?;
        let partials = collected?;
        if partials.len() != exchange.worker_count() {
            return Err(ScanError::sync_failure(format!(
                "expected {} partial grant sets, received {}",
                exchange.worker_count(),
                partials.len()
            )));
        }

        let mut merged = BTreeSet::new();
        for bytes in &partials {
            let partial: PartialGrants =
                rmp_serde::from_slice(bytes).map_err(|e| ScanError::Decode(e.to_string()))?;
            if partial.query_id != ctx.query_id || partial.user_id != user_id {
                return Err(ScanError::sync_failure(format!(
                    "worker {} resolved user {} of query {} while worker {} resolved user {user_id} of query {}",
                    partial.worker, partial.user_id, partial.query_id, ctx.worker_id, ctx.query_id
                )));
            }
            let keys = partial.outcome.map_err(|reason| {
                ScanError::sync_failure(format!(
                    "worker {} could not resolve permissions: {reason}",
                    partial.worker
                ))
            })?;
            if partial.elevated != elevated {
                return Err(ScanError::sync_failure(format!(
                    "worker {} decided elevated access {:?}, worker {} decided {elevated:?}",
                    partial.worker, partial.elevated, ctx.worker_id
                )));
            }
            if elevated.is_none() {
                merged.extend(keys.keys);
                self.check_limit(merged.len())?;
            }
        }
        debug!(
            user_id,
            worker = ctx.worker_id,
            partials = partials.len(),
            elevated = ?elevated,
            keys = merged.len(),
            "workers agreed on access"
        );
        Ok(WorkerAgreement {
            elevated,
            keys: AuthorizedKeySet {
                keys: merged.into_iter().collect(),
            },
        })
    }

    fn check_limit(&self, count: usize) -> Result<(), ScanError> {
        if count > self.config.max_authorized_keys {
            return Err(ScanError::Validation(format!(
                "authorized key set exceeds {} keys",
                self.config.max_authorized_keys
            )));
        }
        Ok(())
    }
}
