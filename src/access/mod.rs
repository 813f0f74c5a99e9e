//! Cell-level authorization: who bypasses filtering, which keys everyone
//! else may read, and the ranges those keys collapse into.

pub mod collapse;
pub mod gate;
pub mod resolver;

pub use collapse::{KeyInterval, collapse_intervals, collapse_to_ranges};
pub use gate::{AccessDecision, AccessDecisionGate, ElevatedGrant, GateState};
pub use resolver::{AuthorizedKeySet, PermissionLayout, PermissionResolver};
