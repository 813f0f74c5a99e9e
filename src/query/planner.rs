use crate::access::gate::{AccessDecision, ElevatedGrant};
use crate::catalog::schema::{ArraySchema, Distribution};
use crate::config::FilterStrategy;
use crate::error::ScanError;
use crate::query::context::QueryContext;
use crate::storage::coordinate::Coordinate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanNode {
    Scan {
        array: String,
    },
    PermissionScan {
        array: String,
        user_id: i64,
    },
    Exchange {
        workers: usize,
        child: Box<PlanNode>,
    },
    Collapse {
        ranges: usize,
        child: Box<PlanNode>,
    },
    RangeFilter {
        input: Box<PlanNode>,
        ranges: Box<PlanNode>,
    },
    PermissionJoin {
        input: Box<PlanNode>,
        permissions: Box<PlanNode>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStage {
    ElevatedCheck,
    PermissionScan,
    Exchange,
    Collapse,
    RangeFilter,
    PermissionJoin,
}

/// How the decision came out, without the ranges themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOutcome {
    Unrestricted(ElevatedGrant),
    Restricted,
    Denied,
}

/// Declared low and high corners of a scan's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundaries {
    pub low: Coordinate,
    pub high: Coordinate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPlan {
    pub array: String,
    pub outcome: PlanOutcome,
    pub root: PlanNode,
    pub stages: Vec<ScanStage>,
    pub range_count: usize,
    pub distribution: Distribution,
    pub boundaries: Boundaries,
}

/// Partitioning the scan output advertises to the rest of the query.
///
/// Degraded reads cannot promise the stored partitioning, so it becomes
/// `Undefined`; replicated arrays are refused there because every surviving
/// replica would emit the same cells.
pub fn output_distribution(
    schema: &ArraySchema,
    ctx: &QueryContext,
) -> Result<Distribution, ScanError> {
    match schema.distribution {
        Distribution::Uninitialized => Err(ScanError::Validation(format!(
            "array '{}' has no distribution",
            schema.qualified_name()
        ))),
        Distribution::Replicated if ctx.degraded_read => Err(ScanError::schema(
            schema.qualified_name(),
            "arrays with replicated distribution are not supported in degraded mode",
        )),
        _ if ctx.degraded_read => Ok(Distribution::Undefined),
        other => Ok(other),
    }
}

/// Declared extent of `schema`; a restricted scan narrows the key axis to
/// the authorized ranges.
pub fn output_boundaries(
    schema: &ArraySchema,
    decision: &AccessDecision,
    key_axis: Option<usize>,
) -> Boundaries {
    let mut low: Vec<i64> = schema.low_boundary().as_slice().to_vec();
    let mut high: Vec<i64> = schema.high_boundary().as_slice().to_vec();
    if let (AccessDecision::RestrictedBySpatialFilter { ranges }, Some(axis)) = (decision, key_axis)
    {
        let hull = ranges
            .iter()
            .filter_map(|r| r.axis_bounds(axis))
            .reduce(|a, b| (a.0.min(b.0), a.1.max(b.1)));
        if let Some((lo, hi)) = hull {
            let lo = lo.max(low[axis]);
            let hi = hi.min(high[axis]);
            if lo <= hi {
                low[axis] = lo;
                high[axis] = hi;
            }
        }
    }
    Boundaries {
        low: Coordinate::from(low),
        high: Coordinate::from(high),
    }
}

/// Inputs of [`build_scan_plan`] that come from the engine rather than the schema.
#[derive(Debug, Clone)]
pub struct PlanInputs<'a> {
    pub permissions_array: &'a str,
    pub user_id: i64,
    pub strategy: FilterStrategy,
    /// Workers taking part in the exchange round that settles the decision;
    /// 1 when no exchange happens.
    pub exchange_workers: usize,
    pub key_axis: Option<usize>,
}

pub fn build_scan_plan(
    target: &ArraySchema,
    decision: &AccessDecision,
    inputs: &PlanInputs<'_>,
    ctx: &QueryContext,
) -> Result<ScanPlan, ScanError> {
    let array = target.qualified_name();
    let distribution = output_distribution(target, ctx)?;
    let boundaries = output_boundaries(target, decision, inputs.key_axis);
    let scan = PlanNode::Scan {
        array: array.clone(),
    };
    let mut stages = vec![ScanStage::ElevatedCheck];

    let (outcome, root, range_count) = match decision {
        AccessDecision::Unrestricted { via } => {
            if inputs.exchange_workers > 1 {
                stages.push(ScanStage::Exchange);
            }
            (PlanOutcome::Unrestricted(*via), scan, 0)
        }
        AccessDecision::RestrictedBySpatialFilter { ranges } => {
            let keys = permission_subplan(&mut stages, inputs, ranges.len());
            let root = match inputs.strategy {
                FilterStrategy::RangeRestriction => {
                    stages.push(ScanStage::RangeFilter);
                    PlanNode::RangeFilter {
                        input: Box::new(scan),
                        ranges: Box::new(keys),
                    }
                }
                FilterStrategy::PermissionJoin => {
                    stages.push(ScanStage::PermissionJoin);
                    PlanNode::PermissionJoin {
                        input: Box::new(scan),
                        permissions: Box::new(keys),
                    }
                }
            };
            (PlanOutcome::Restricted, root, ranges.len())
        }
        AccessDecision::Denied => {
            let keys = permission_subplan(&mut stages, inputs, 0);
            (PlanOutcome::Denied, keys, 0)
        }
    };

    Ok(ScanPlan {
        array,
        outcome,
        root,
        stages,
        range_count,
        distribution,
        boundaries,
    })
}

fn permission_subplan(stages: &mut Vec<ScanStage>, inputs: &PlanInputs<'_>, ranges: usize) -> PlanNode {
    stages.push(ScanStage::PermissionScan);
    let mut node = PlanNode::PermissionScan {
        array: inputs.permissions_array.to_string(),
        user_id: inputs.user_id,
    };
    if inputs.exchange_workers > 1 {
        stages.push(ScanStage::Exchange);
        node = PlanNode::Exchange {
            workers: inputs.exchange_workers,
            child: Box::new(node),
        };
    }
    stages.push(ScanStage::Collapse);
    PlanNode::Collapse {
        ranges,
        child: Box::new(node),
    }
}
