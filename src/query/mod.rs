pub mod context;
pub mod planner;

pub use context::{CancelHandle, QueryContext};
pub use planner::{
    Boundaries, PlanInputs, PlanNode, PlanOutcome, ScanPlan, ScanStage, build_scan_plan,
    output_boundaries, output_distribution,
};
