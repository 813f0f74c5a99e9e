pub mod access;
pub mod catalog;
pub mod config;
pub mod error;
pub mod exchange;
pub mod permission;
pub mod query;
pub mod spatial;
pub mod storage;
pub mod view;

use crate::access::gate::{AccessDecision, AccessDecisionGate, target_key_axis};
use crate::access::resolver::{AuthorizedKeySet, PermissionLayout, PermissionResolver};
use crate::catalog::schema::{ArraySchema, DimensionTag};
use crate::catalog::{ArrayRef, ArrayVersion, Catalog};
use crate::config::{FilterStrategy, SecureScanConfig};
use crate::error::ScanError;
use crate::exchange::{LocalExchange, ReplicationExchange};
use crate::permission::{AccessControl, CallerContext, Right};
use crate::query::context::QueryContext;
use crate::query::planner::{PlanInputs, ScanPlan, build_scan_plan, output_distribution};
use crate::spatial::SpatialRangeSet;
use crate::storage::{ArrayHandle, ArrayStore};
use crate::view::{FilteredArrayView, PermissionJoinView};
use std::sync::Arc;
use tracing::{debug, info};

pub use crate::access::gate::ElevatedGrant;
pub use crate::error::ScanErrorCode;

const NO_PERMISSIONS_REASON: &str = "user has no permissions in the scanned array";

/// Cell-level access control over array scans.
///
/// One engine serves any number of scans. In a multi-worker deployment every
/// worker owns an engine wired to its own store and exchange endpoint, and all
/// workers of a query call [`SecureScan::scan`] for the same caller and array.
pub struct SecureScan {
    config: SecureScanConfig,
    catalog: Arc<dyn Catalog>,
    rights: Arc<dyn AccessControl>,
    store: Arc<dyn ArrayStore>,
    exchange: Arc<dyn ReplicationExchange>,
}

/// Result of a successful scan: what was decided and the array the caller may read.
#[derive(Debug)]
pub struct SecureScanOutput {
    pub decision: AccessDecision,
    pub view: Arc<dyn ArrayHandle>,
    pub plan: ScanPlan,
}

struct PreparedScan {
    target: ArraySchema,
    permissions: ArraySchema,
    key_axis: usize,
    layout: PermissionLayout,
}

struct Decided {
    prepared: PreparedScan,
    decision: AccessDecision,
    /// Present once permissions were resolved, i.e. the caller was not elevated.
    resolved: Option<(Arc<dyn ArrayHandle>, AuthorizedKeySet)>,
}

impl SecureScan {
    pub fn new(
        config: SecureScanConfig,
        catalog: Arc<dyn Catalog>,
        rights: Arc<dyn AccessControl>,
        store: Arc<dyn ArrayStore>,
        exchange: Arc<dyn ReplicationExchange>,
    ) -> Result<Self, ScanError> {
        config.validate()?;
        info!(
            permissions_namespace = %config.permissions_namespace,
            elevated_access = ?config.elevated_access,
            filter_strategy = ?config.filter_strategy,
            allow_transient_arrays = config.allow_transient_arrays,
            exchange_timeout_ms = config.exchange_timeout_ms,
            workers = exchange.worker_count(),
            "secure scan engine ready"
        );
        Ok(Self {
            config,
            catalog,
            rights,
            store,
            exchange,
        })
    }

    /// Engine for a single-worker deployment.
    pub fn local(
        config: SecureScanConfig,
        catalog: Arc<dyn Catalog>,
        rights: Arc<dyn AccessControl>,
        store: Arc<dyn ArrayStore>,
    ) -> Result<Self, ScanError> {
        Self::new(config, catalog, rights, store, Arc::new(LocalExchange))
    }

    pub fn config(&self) -> &SecureScanConfig {
        &self.config
    }

    /// Opens `array` for `caller`, hiding every cell they are not authorized to see.
    pub fn scan(
        &self,
        caller: &CallerContext,
        array: &ArrayRef,
        ctx: &QueryContext,
    ) -> Result<SecureScanOutput, ScanError> {
        let Decided {
            prepared,
            decision,
            resolved,
        } = self.decide(caller, array, ctx)?;
        let view: Arc<dyn ArrayHandle> = match (&decision, resolved) {
            (AccessDecision::Denied, _) => {
                return Err(ScanError::AccessDenied {
                    caller: caller.caller_id.clone(),
                    array: prepared.target.qualified_name(),
                    reason: NO_PERMISSIONS_REASON.into(),
                });
            }
            (AccessDecision::Unrestricted { .. }, _) => self.store.open_for_read(&prepared.target)?,
            (AccessDecision::RestrictedBySpatialFilter { ranges }, resolved) => {
                let base = self.store.open_for_read(&prepared.target)?;
                match self.config.filter_strategy {
                    FilterStrategy::RangeRestriction => {
                        let set = SpatialRangeSet::from_ranges(
                            prepared.target.dims(),
                            ranges.iter().cloned(),
                        )?;
                        Arc::new(FilteredArrayView::new(base, set)?)
                    }
                    FilterStrategy::PermissionJoin => {
                        let (permissions, keys) = resolved.ok_or_else(|| {
                            ScanError::Validation("restricted scan without resolved keys".into())
                        })?;
                        Arc::new(PermissionJoinView::new(
                            base,
                            prepared.key_axis,
                            permissions.as_ref(),
                            prepared.layout,
                            caller.user_id,
                            &keys,
                            ctx,
                        )?)
                    }
                }
            }
        };
        let plan = self.plan(caller, &prepared, &decision, ctx)?;
        debug!(
            caller = %caller.caller_id,
            array = %plan.array,
            outcome = ?plan.outcome,
            ranges = plan.range_count,
            "secure scan prepared"
        );
        Ok(SecureScanOutput {
            decision,
            view,
            plan,
        })
    }

    /// Plan of the scan `caller` would run, including a denial, without
    /// building a view. Runs the same exchange as [`scan`](Self::scan).
    pub fn explain(
        &self,
        caller: &CallerContext,
        array: &ArrayRef,
        ctx: &QueryContext,
    ) -> Result<ScanPlan, ScanError> {
        let decided = self.decide(caller, array, ctx)?;
        self.plan(caller, &decided.prepared, &decided.decision, ctx)
    }

    /// Right the enclosing query must hold on the array's namespace: `Read`
    /// when the caller has it, otherwise `List`, since the scan itself
    /// filters what a lister may see.
    pub fn required_namespace_right(&self, caller: &CallerContext, array: &ArrayRef) -> Right {
        let namespace = array.namespace_or(&self.config.default_namespace);
        let read = Right::namespace_read(namespace);
        match self.rights.check_rights(caller, &read) {
            Ok(true) => read,
            _ => Right::namespace_list(namespace),
        }
    }

    fn decide(
        &self,
        caller: &CallerContext,
        array: &ArrayRef,
        ctx: &QueryContext,
    ) -> Result<Decided, ScanError> {
        let prepared = self.prepare(array, ctx)?;
        let resolver = PermissionResolver::new(&self.config);
        let mut gate = AccessDecisionGate::new(&self.config, self.rights.as_ref(), caller);
        let elevated = gate.check_elevated(&prepared.target.namespace)?;
        let mut permissions = None;
        let local = match elevated {
            Some(_) => Ok(AuthorizedKeySet::default()),
            None => self
                .store
                .open_for_read(&prepared.permissions)
                .and_then(|handle| {
                    let keys = resolver.resolve(caller.user_id, handle.as_ref(), ctx);
                    permissions = Some(handle);
                    keys
                }),
        };
        // Every worker joins this round, whatever happened locally.
        let agreed = resolver.agree(
            caller.user_id,
            elevated,
            local,
            self.exchange.as_ref(),
            ctx,
        )?;
        if let Some(via) = agreed.elevated {
            return Ok(Decided {
                prepared,
                decision: AccessDecision::Unrestricted { via },
                resolved: None,
            });
        }
        let decision = gate.decide_from_keys(&agreed.keys, &prepared.target, prepared.key_axis)?;
        Ok(Decided {
            prepared,
            decision,
            resolved: permissions.map(|handle| (handle, agreed.keys)),
        })
    }

    fn prepare(&self, array: &ArrayRef, ctx: &QueryContext) -> Result<PreparedScan, ScanError> {
        if array.version == ArrayVersion::All {
            return Err(ScanError::schema(
                array.to_string(),
                "version selector '@*' cannot be scanned",
            ));
        }
        let namespace = array.namespace_or(&self.config.default_namespace);
        let target = self.catalog.resolve(namespace, &array.name, array.version)?;
        let name = target.qualified_name();
        if target.is_autochunked() {
            return Err(ScanError::schema(name, "auto-chunked arrays not supported"));
        }
        if target.transient && !self.config.allow_transient_arrays {
            return Err(ScanError::schema(name, "temporary arrays not supported"));
        }
        let key_axis = target_key_axis(&self.config, &target)?;
        if !target.is_bounded() {
            return Err(ScanError::schema(name, "unbounded arrays not supported"));
        }
        output_distribution(&target, ctx)?;

        let permissions = self.catalog.resolve(
            &self.config.permissions_namespace,
            &target.name,
            ArrayVersion::Latest,
        )?;
        let layout = PermissionResolver::new(&self.config).layout(&permissions)?;
        let target_key = &target.dimensions[key_axis];
        let permission_key = &permissions.dimensions[layout.key_axis];
        // Tagged on both sides, the dimensions pair up by role; otherwise by name.
        let both_tagged = target_key.tag == Some(DimensionTag::ProtectedKey)
            && permission_key.tag == Some(DimensionTag::ProtectedKey);
        if !both_tagged && target_key.name != permission_key.name {
            let (target_key, permission_key) = (&target_key.name, &permission_key.name);
            return Err(ScanError::schema(
                permissions.qualified_name(),
                format!(
                    "protected-key dimension '{permission_key}' does not match '{target_key}' of '{name}'"
                ),
            ));
        }
        Ok(PreparedScan {
            target,
            permissions,
            key_axis,
            layout,
        })
    }

    fn plan(
        &self,
        caller: &CallerContext,
        prepared: &PreparedScan,
        decision: &AccessDecision,
        ctx: &QueryContext,
    ) -> Result<ScanPlan, ScanError> {
        let exchange_workers = self.exchange.worker_count();
        let permissions_array = prepared.permissions.qualified_name();
        let inputs = PlanInputs {
            permissions_array: &permissions_array,
            user_id: caller.user_id,
            strategy: self.config.filter_strategy,
            exchange_workers,
            key_axis: Some(prepared.key_axis),
        };
        build_scan_plan(&prepared.target, decision, &inputs, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::SecureScan;
    use crate::catalog::schema::{ArraySchema, AttributeDef, DimensionDef};
    use crate::catalog::types::{AttributeType, Cell, Value};
    use crate::catalog::{ArrayRef, InMemoryCatalog};
    use crate::config::SecureScanConfig;
    use crate::error::{ScanError, ScanErrorCode};
    use crate::permission::{CallerContext, Right, StaticAccessControl};
    use crate::query::context::QueryContext;
    use crate::storage::{ArrayHandle, ArrayStore};
    use crate::storage::coordinate::Coordinate;
    use crate::storage::mem::{MemArray, MemArrayStore};
    use std::sync::Arc;

    /// Serves permission arrays but has lost every shard of the data arrays.
    struct DataShardsOffline(MemArrayStore);

    impl ArrayStore for DataShardsOffline {
        fn open_for_read(&self, schema: &ArraySchema) -> Result<Arc<dyn ArrayHandle>, ScanError> {
            if schema.namespace == "permissions" {
                return self.0.open_for_read(schema);
            }
            Err(ScanError::Storage {
                message: format!("no local shard of '{}'", schema.qualified_name()),
            })
        }
    }

    fn arrays() -> (Arc<InMemoryCatalog>, MemArrayStore) {
        let catalog = Arc::new(InMemoryCatalog::new());
        let store = MemArrayStore::new();
        let target = catalog
            .register(
                ArraySchema::new("public", "genomes")
                    .dimension(DimensionDef::new("dataset_id", 1, 10, 4))
                    .attribute(AttributeDef::new("value", AttributeType::Integer)),
            )
            .expect("target");
        let perms = catalog
            .register(
                ArraySchema::new("permissions", "genomes")
                    .dimension(DimensionDef::new("user_id", 0, 9, 5))
                    .dimension(DimensionDef::new("dataset_id", 1, 10, 4))
                    .attribute(AttributeDef::new("access", AttributeType::Boolean)),
            )
            .expect("permissions");
        store.put(
            MemArray::new(target)
                .expect("array")
                .with_cells((1..=10).map(|k| {
                    (
                        Coordinate::from([k]),
                        Cell::from_values(vec![Value::Integer(k)]),
                    )
                }))
                .expect("cells"),
        );
        store.put(
            MemArray::new(perms)
                .expect("array")
                .with_cells([(
                    Coordinate::from([1, 3]),
                    Cell::from_values(vec![Value::Boolean(true)]),
                )])
                .expect("cells"),
        );
        (catalog, store)
    }

    fn engine(rights: StaticAccessControl) -> SecureScan {
        let (catalog, store) = arrays();
        SecureScan::local(
            SecureScanConfig::default(),
            catalog,
            Arc::new(rights),
            Arc::new(store),
        )
        .expect("engine")
    }

    #[test]
    fn denial_is_reported_before_the_data_array_is_opened() {
        let (catalog, store) = arrays();
        let engine = SecureScan::local(
            SecureScanConfig::default(),
            catalog,
            Arc::new(StaticAccessControl::new()),
            Arc::new(DataShardsOffline(store)),
        )
        .expect("engine");
        let array = ArrayRef::new("genomes");
        let ctx = QueryContext::new(1);

        let err = engine
            .scan(&CallerContext::new("bob", 2), &array, &ctx)
            .expect_err("denied");
        assert_eq!(err.code(), ScanErrorCode::AccessDenied);

        // A granted caller does need the data and hits the storage error.
        let err = engine
            .scan(&CallerContext::new("alice", 1), &array, &ctx)
            .expect_err("offline");
        assert_eq!(err.code(), ScanErrorCode::Storage);
    }

    #[test]
    fn restricted_caller_sees_only_granted_cells() {
        let engine = engine(StaticAccessControl::new());
        let out = engine
            .scan(
                &CallerContext::new("alice", 1),
                &ArrayRef::new("genomes"),
                &QueryContext::new(1),
            )
            .expect("scan");
        assert!(out.decision.is_restricted());
        let cells: Vec<Coordinate> = out
            .view
            .chunks()
            .flat_map(|c| c.cells.keys().cloned().collect::<Vec<_>>())
            .collect();
        assert_eq!(cells, vec![Coordinate::from([3])]);
    }

    #[test]
    fn caller_without_grants_is_denied() {
        let engine = engine(StaticAccessControl::new());
        let err = engine
            .scan(
                &CallerContext::new("bob", 2),
                &ArrayRef::new("genomes"),
                &QueryContext::new(1),
            )
            .expect_err("denied");
        assert_eq!(err.code(), ScanErrorCode::AccessDenied);
        assert!(err.to_string().contains("no permissions in the scanned array"));
    }

    #[test]
    fn required_right_depends_on_namespace_read() {
        let rights = StaticAccessControl::new().with_grant("reader", Right::namespace_read("public"));
        let engine = engine(rights);
        let array = ArrayRef::new("genomes");
        assert_eq!(
            engine.required_namespace_right(&CallerContext::new("reader", 1), &array),
            Right::namespace_read("public")
        );
        assert_eq!(
            engine.required_namespace_right(&CallerContext::new("alice", 1), &array),
            Right::namespace_list("public")
        );
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SecureScanConfig {
            exchange_timeout_ms: 0,
            ..SecureScanConfig::default()
        };
        let result = SecureScan::local(
            config,
            Arc::new(InMemoryCatalog::new()),
            Arc::new(StaticAccessControl::new()),
            Arc::new(MemArrayStore::new()),
        );
        let Err(err) = result else {
            panic!("zero timeout accepted");
        };
        assert_eq!(err.code(), ScanErrorCode::InvalidConfig);
    }
}
