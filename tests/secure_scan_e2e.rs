use secure_scan::access::gate::{AccessDecision, ElevatedGrant};
use secure_scan::catalog::schema::{
    ArraySchema, AttributeDef, DimensionDef, DimensionTag, Distribution,
};
use secure_scan::catalog::types::{AttributeType, Cell, Value};
use secure_scan::catalog::{ArrayRef, ArrayVersion, Catalog, InMemoryCatalog};
use secure_scan::config::{ElevatedAccessPolicy, FilterStrategy, SecureScanConfig};
use secure_scan::error::ScanErrorCode;
use secure_scan::permission::{CallerContext, Right, StaticAccessControl};
use secure_scan::query::context::QueryContext;
use secure_scan::query::planner::{PlanOutcome, ScanStage};
use secure_scan::storage::{ArrayHandle, ArrayStore};
use secure_scan::storage::coordinate::Coordinate;
use secure_scan::storage::mem::{MemArray, MemArrayStore};
use secure_scan::view::{ScanCursor, collect_cells};
use secure_scan::SecureScan;
use std::collections::BTreeSet;
use std::sync::Arc;

const SAMPLES: i64 = 4;
const KEYS: i64 = 10;

struct Fixture {
    engine: SecureScan,
    catalog: Arc<InMemoryCatalog>,
    store: Arc<MemArrayStore>,
}

fn genomes_schema(name: &str) -> ArraySchema {
    ArraySchema::new("public", name)
        .dimension(DimensionDef::new("sample", 0, SAMPLES - 1, 2))
        .dimension(DimensionDef::new("dataset_id", 1, KEYS, 3))
        .attribute(AttributeDef::new("value", AttributeType::Integer))
        .attribute(AttributeDef::new("label", AttributeType::Text))
}

fn permissions_schema(name: &str) -> ArraySchema {
    ArraySchema::new("permissions", name)
        .dimension(DimensionDef::new("user_id", 0, 9, 5))
        .dimension(DimensionDef::new("dataset_id", 1, KEYS, 3))
        .attribute(AttributeDef::new("access", AttributeType::Boolean))
}

fn base_cell(sample: i64, key: i64) -> Cell {
    Cell::from_values(vec![
        Value::Integer(sample * 100 + key),
        Value::text(&format!("s{sample}-d{key}")),
    ])
}

fn publish(
    catalog: &InMemoryCatalog,
    store: &MemArrayStore,
    name: &str,
    grants: &[(i64, i64, bool)],
) {
    let target = catalog.register(genomes_schema(name)).expect("register target");
    let perms = catalog
        .register(permissions_schema(name))
        .expect("register permissions");
    let cells = (0..SAMPLES)
        .flat_map(|s| (1..=KEYS).map(move |k| (Coordinate::from([s, k]), base_cell(s, k))));
    store.put(
        MemArray::new(target)
            .expect("target array")
            .with_cells(cells)
            .expect("target cells"),
    );
    store.put(
        MemArray::new(perms)
            .expect("permission array")
            .with_cells(grants.iter().map(|&(user, key, granted)| {
                (
                    Coordinate::from([user, key]),
                    Cell::from_values(vec![Value::Boolean(granted)]),
                )
            }))
            .expect("permission cells"),
    );
}

fn fixture_with(config: SecureScanConfig, rights: StaticAccessControl) -> Fixture {
    let catalog = Arc::new(InMemoryCatalog::new());
    let store = Arc::new(MemArrayStore::new());
    publish(
        &catalog,
        &store,
        "genomes",
        &[
            (7, 2, true),
            (7, 5, true),
            (7, 6, true),
            (7, 7, true),
            (7, 8, false),
            (3, 1, true),
            (3, 10, true),
        ],
    );
    let engine = SecureScan::local(
        config,
        catalog.clone(),
        Arc::new(rights),
        store.clone(),
    )
    .expect("engine");
    Fixture {
        engine,
        catalog,
        store,
    }
}

fn fixture() -> Fixture {
    fixture_with(SecureScanConfig::default(), StaticAccessControl::new())
}

fn keys_of(cells: &[(Coordinate, Cell)]) -> BTreeSet<i64> {
    cells.iter().map(|(c, _)| c.as_slice()[1]).collect()
}

#[test]
fn admin_sees_the_whole_array() {
    let f = fixture_with(
        SecureScanConfig::default(),
        StaticAccessControl::new().with_grant("root", Right::db_admin()),
    );
    let ctx = QueryContext::new(1);
    let out = f
        .engine
        .scan(&CallerContext::new("root", 0), &ArrayRef::new("genomes"), &ctx)
        .expect("scan");
    assert_eq!(
        out.decision,
        AccessDecision::Unrestricted {
            via: ElevatedGrant::DbAdmin
        }
    );
    assert_eq!(out.plan.stages, vec![ScanStage::ElevatedCheck]);

    // Same cells in the same order as the base array, whatever the
    // permission table holds (including nothing at all).
    publish(&f.catalog, &f.store, "ungranted", &[]);
    for name in ["genomes", "ungranted"] {
        let out = f
            .engine
            .scan(&CallerContext::new("root", 0), &ArrayRef::new(name), &ctx)
            .expect("scan");
        let schema = f
            .catalog
            .resolve("public", name, ArrayVersion::Latest)
            .expect("schema");
        let base = f.store.open_for_read(&schema).expect("base");
        let seen = collect_cells(out.view.as_ref(), &ctx).expect("view cells");
        let expected = collect_cells(base.as_ref(), &ctx).expect("base cells");
        assert_eq!(expected.len(), (SAMPLES * KEYS) as usize);
        assert_eq!(seen, expected);
    }
}

#[test]
fn restricted_scan_is_sound_and_complete_across_chunk_boundaries() {
    let f = fixture();
    let ctx = QueryContext::new(1);
    let out = f
        .engine
        .scan(&CallerContext::new("alice", 7), &ArrayRef::new("genomes"), &ctx)
        .expect("scan");
    let AccessDecision::RestrictedBySpatialFilter { ranges } = &out.decision else {
        panic!("expected a restricted scan, got {:?}", out.decision);
    };
    assert_eq!(ranges.len(), 2);

    let cells = collect_cells(out.view.as_ref(), &ctx).expect("cells");
    assert_eq!(keys_of(&cells), BTreeSet::from([2, 5, 6, 7]));
    assert_eq!(cells.len(), (SAMPLES * 4) as usize);
    for (coord, cell) in &cells {
        let [s, k] = coord.as_slice() else {
            panic!("two-dimensional coordinate expected");
        };
        assert_eq!(cell, &base_cell(*s, *k));
    }

    assert_eq!(out.view.get(&Coordinate::from([2, 6])), Some(base_cell(2, 6)));
    assert_eq!(out.view.get(&Coordinate::from([2, 8])), None);
    assert_eq!(out.view.get(&Coordinate::from([2, 1])), None);
    assert_eq!(out.view.schema().attributes.len(), 2);

    assert_eq!(out.plan.outcome, PlanOutcome::Restricted);
    assert_eq!(out.plan.boundaries.low, Coordinate::from([0, 2]));
    assert_eq!(out.plan.boundaries.high, Coordinate::from([SAMPLES - 1, 7]));
}

#[test]
fn iterate_projects_one_attribute_of_the_filtered_view() {
    let f = fixture();
    let out = f
        .engine
        .scan(
            &CallerContext::new("carol", 3),
            &ArrayRef::new("genomes"),
            &QueryContext::new(1),
        )
        .expect("scan");
    let values: Vec<(Coordinate, Value)> = out.view.iterate("value").expect("iterate").collect();
    let keys: BTreeSet<i64> = values.iter().map(|(c, _)| c.as_slice()[1]).collect();
    assert_eq!(keys, BTreeSet::from([1, 10]));
    assert!(values.contains(&(Coordinate::from([3, 10]), Value::Integer(310))));
    let err = out.view.iterate("missing").err().expect("unknown attribute");
    assert_eq!(err.code(), ScanErrorCode::AttributeNotFound);
}

#[test]
fn caller_without_grants_is_denied() {
    let f = fixture();
    let ctx = QueryContext::new(1);
    let caller = CallerContext::new("mallory", 4);
    let err = f
        .engine
        .scan(&caller, &ArrayRef::new("genomes"), &ctx)
        .expect_err("denied");
    assert_eq!(err.code(), ScanErrorCode::AccessDenied);
    assert!(err.to_string().contains("user has no permissions in the scanned array"));

    let plan = f
        .engine
        .explain(&caller, &ArrayRef::new("genomes"), &ctx)
        .expect("explain");
    assert_eq!(plan.outcome, PlanOutcome::Denied);
    assert_eq!(plan.stages.last(), Some(&ScanStage::Collapse));
}

#[test]
fn namespace_reader_bypass_follows_policy() {
    let rights = || StaticAccessControl::new().with_grant("reader", Right::namespace_read("public"));
    // The reader holds no permission cells at all.
    let caller = CallerContext::new("reader", 9);
    let ctx = QueryContext::new(1);

    let f = fixture_with(SecureScanConfig::default(), rights());
    let out = f
        .engine
        .scan(&caller, &ArrayRef::new("genomes"), &ctx)
        .expect("bypass");
    assert_eq!(
        out.decision,
        AccessDecision::Unrestricted {
            via: ElevatedGrant::NamespaceRead
        }
    );

    let strict = fixture_with(SecureScanConfig::strict(), rights());
    let err = strict
        .engine
        .scan(&caller, &ArrayRef::new("genomes"), &ctx)
        .expect_err("no bypass under admin-only policy");
    assert_eq!(err.code(), ScanErrorCode::AccessDenied);
    assert_eq!(
        SecureScanConfig::strict().elevated_access,
        ElevatedAccessPolicy::AdminOnly
    );
}

#[test]
fn join_mode_returns_the_same_cells_with_permission_attributes() {
    let ctx = QueryContext::new(1);
    let caller = CallerContext::new("alice", 7);
    let ranged = fixture();
    let joined = fixture_with(
        SecureScanConfig::default().with_filter_strategy(FilterStrategy::PermissionJoin),
        StaticAccessControl::new(),
    );

    let ranged_out = ranged
        .engine
        .scan(&caller, &ArrayRef::new("genomes"), &ctx)
        .expect("range scan");
    let joined_out = joined
        .engine
        .scan(&caller, &ArrayRef::new("genomes"), &ctx)
        .expect("join scan");
    assert_eq!(
        joined_out.plan.stages.last(),
        Some(&ScanStage::PermissionJoin)
    );

    let ranged_cells = collect_cells(ranged_out.view.as_ref(), &ctx).expect("ranged");
    let joined_cells = collect_cells(joined_out.view.as_ref(), &ctx).expect("joined");
    let ranged_coords: Vec<&Coordinate> = ranged_cells.iter().map(|(c, _)| c).collect();
    let joined_coords: Vec<&Coordinate> = joined_cells.iter().map(|(c, _)| c).collect();
    assert_eq!(ranged_coords, joined_coords);

    let names: Vec<&str> = joined_out
        .view
        .schema()
        .attributes
        .iter()
        .map(|a| a.name.as_str())
        .collect();
    assert_eq!(names, vec!["value", "label", "access"]);
    for (coord, cell) in &joined_cells {
        let [s, k] = coord.as_slice() else {
            panic!("two-dimensional coordinate expected");
        };
        assert_eq!(cell, &base_cell(*s, *k).joined(&Cell::from_values(vec![Value::Boolean(true)])));
    }
}

#[test]
fn schema_prechecks_reject_unscannable_arrays() {
    let f = fixture();
    let caller = CallerContext::new("alice", 7);
    let ctx = QueryContext::new(1);
    let scan_err = |array: ArrayRef| {
        f.engine
            .scan(&caller, &array, &ctx)
            .expect_err("scan should fail")
    };

    let err = scan_err(ArrayRef::new("genomes").at_version(ArrayVersion::All));
    assert_eq!(err.code(), ScanErrorCode::Schema);

    let err = scan_err(ArrayRef::new("nothing"));
    assert_eq!(err.code(), ScanErrorCode::ArrayNotFound);
    let err = scan_err(ArrayRef::new("genomes").in_namespace("elsewhere"));
    assert_eq!(err.code(), ScanErrorCode::NamespaceNotFound);

    let mut auto = genomes_schema("auto");
    auto.dimensions[0].chunk_interval = None;
    f.catalog.register(auto).expect("register");
    let err = scan_err(ArrayRef::new("auto"));
    assert!(err.to_string().contains("auto-chunked arrays not supported"));

    f.catalog
        .register(genomes_schema("tmp").as_transient())
        .expect("register");
    let err = scan_err(ArrayRef::new("tmp"));
    assert!(err.to_string().contains("temporary arrays not supported"));

    f.catalog
        .register(
            ArraySchema::new("public", "nokey")
                .dimension(DimensionDef::new("sample", 0, 3, 2))
                .attribute(AttributeDef::new("value", AttributeType::Integer)),
        )
        .expect("register");
    let err = scan_err(ArrayRef::new("nokey"));
    assert_eq!(err.code(), ScanErrorCode::Schema);

    let mut open = genomes_schema("open");
    open.dimensions[0].end = None;
    f.catalog.register(open).expect("register");
    let err = scan_err(ArrayRef::new("open"));
    assert!(err.to_string().contains("unbounded"));

    // Protected but without a permission array.
    f.catalog.register(genomes_schema("orphan")).expect("register");
    let err = scan_err(ArrayRef::new("orphan"));
    assert_eq!(err.code(), ScanErrorCode::ArrayNotFound);

    f.catalog.register(genomes_schema("renamed")).expect("register");
    f.catalog
        .register(
            ArraySchema::new("permissions", "renamed")
                .dimension(DimensionDef::new("user_id", 0, 9, 5))
                .dimension(
                    DimensionDef::new("study", 1, KEYS, 3)
                        .tagged(DimensionTag::ProtectedKey),
                )
                .attribute(AttributeDef::new("access", AttributeType::Boolean)),
        )
        .expect("register");
    let err = scan_err(ArrayRef::new("renamed"));
    assert_eq!(err.code(), ScanErrorCode::Schema);
    assert!(err.to_string().contains("does not match"));
}

#[test]
fn tagged_key_dimensions_pair_up_by_role() {
    let f = fixture();
    let target = f
        .catalog
        .register(
            ArraySchema::new("public", "studies")
                .dimension(DimensionDef::new("sample", 0, SAMPLES - 1, 2))
                .dimension(DimensionDef::new("study_id", 1, KEYS, 3).tagged(DimensionTag::ProtectedKey))
                .attribute(AttributeDef::new("value", AttributeType::Integer))
                .attribute(AttributeDef::new("label", AttributeType::Text)),
        )
        .expect("register target");
    let perms = f
        .catalog
        .register(
            ArraySchema::new("permissions", "studies")
                .dimension(DimensionDef::new("user_id", 0, 9, 5))
                .dimension(DimensionDef::new("dataset", 1, KEYS, 3).tagged(DimensionTag::ProtectedKey))
                .attribute(AttributeDef::new("access", AttributeType::Boolean)),
        )
        .expect("register permissions");
    let cells = (0..SAMPLES)
        .flat_map(|s| (1..=KEYS).map(move |k| (Coordinate::from([s, k]), base_cell(s, k))));
    f.store
        .put(MemArray::new(target).expect("array").with_cells(cells).expect("cells"));
    f.store.put(
        MemArray::new(perms)
            .expect("array")
            .with_cells([(
                Coordinate::from([7, 4]),
                Cell::from_values(vec![Value::Boolean(true)]),
            )])
            .expect("cells"),
    );

    let ctx = QueryContext::new(1);
    let out = f
        .engine
        .scan(&CallerContext::new("alice", 7), &ArrayRef::new("studies"), &ctx)
        .expect("scan");
    let cells = collect_cells(out.view.as_ref(), &ctx).expect("cells");
    assert_eq!(keys_of(&cells), BTreeSet::from([4]));
    assert_eq!(cells.len(), SAMPLES as usize);
}

#[test]
fn transient_arrays_are_allowed_by_configuration() {
    let f = fixture_with(SecureScanConfig::development(), StaticAccessControl::new());
    let target = f
        .catalog
        .register(genomes_schema("scratch").as_transient())
        .expect("register");
    let perms = f
        .catalog
        .register(permissions_schema("scratch"))
        .expect("register");
    f.store.put(
        MemArray::new(target)
            .expect("array")
            .with_cells([(Coordinate::from([0, 1]), base_cell(0, 1))])
            .expect("cells"),
    );
    f.store.put(
        MemArray::new(perms)
            .expect("array")
            .with_cells([(
                Coordinate::from([5, 1]),
                Cell::from_values(vec![Value::Boolean(true)]),
            )])
            .expect("cells"),
    );
    let ctx = QueryContext::new(1);
    let out = f
        .engine
        .scan(&CallerContext::new("dev", 5), &ArrayRef::parse("public.scratch").expect("parse"), &ctx)
        .expect("scan");
    assert_eq!(collect_cells(out.view.as_ref(), &ctx).expect("cells").len(), 1);
}

#[test]
fn older_versions_stay_scannable() {
    let f = fixture();
    let ctx = QueryContext::new(1);
    let v2 = f
        .catalog
        .register(genomes_schema("genomes"))
        .expect("second version");
    assert_eq!(v2.version, 2);
    // Version 2 is registered but holds no cells yet.
    let caller = CallerContext::new("alice", 7);
    let latest = f
        .engine
        .scan(&caller, &ArrayRef::new("genomes"), &ctx)
        .expect("latest");
    assert!(collect_cells(latest.view.as_ref(), &ctx).expect("cells").is_empty());
    let first = f
        .engine
        .scan(&caller, &ArrayRef::parse("public.genomes@1").expect("parse"), &ctx)
        .expect("first");
    assert_eq!(
        collect_cells(first.view.as_ref(), &ctx).expect("cells").len(),
        (SAMPLES * 4) as usize
    );
}

#[test]
fn degraded_reads_report_undefined_distribution() {
    let f = fixture();
    let caller = CallerContext::new("alice", 7);
    let degraded = QueryContext::new(1).with_degraded_read(true);
    let plan = f
        .engine
        .explain(&caller, &ArrayRef::new("genomes"), &degraded)
        .expect("explain");
    assert_eq!(plan.distribution, Distribution::Undefined);

    f.catalog
        .register(genomes_schema("mirrored").with_distribution(Distribution::Replicated))
        .expect("register");
    f.catalog
        .register(permissions_schema("mirrored"))
        .expect("register");
    let err = f
        .engine
        .scan(&caller, &ArrayRef::new("mirrored"), &degraded)
        .expect_err("replicated in degraded mode");
    assert_eq!(err.code(), ScanErrorCode::Schema);
}

#[test]
fn cancellation_ends_the_cursor_at_a_chunk_boundary() {
    let f = fixture();
    let ctx = QueryContext::new(1);
    let out = f
        .engine
        .scan(&CallerContext::new("alice", 7), &ArrayRef::new("genomes"), &ctx)
        .expect("scan");
    let mut cursor = ScanCursor::new(out.view.as_ref(), &ctx);
    cursor.next().expect("first cell").expect("ok");
    ctx.cancel_handle().cancel();
    let rest: Vec<_> = cursor.collect();
    let last = rest.last().expect("cancellation reported");
    assert_eq!(
        last.as_ref().expect_err("cancelled").code(),
        ScanErrorCode::Cancelled
    );
    assert!(rest[..rest.len() - 1].iter().all(Result::is_ok));

    let err = f
        .engine
        .scan(&CallerContext::new("alice", 7), &ArrayRef::new("genomes"), &ctx)
        .expect_err("cancelled before the permission scan");
    assert_eq!(err.code(), ScanErrorCode::Cancelled);
}
