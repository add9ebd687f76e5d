//! Network optimizer: load/driver assignment with a network-wide objective.
//!
//! This module provides:
//!
//! - **Compatibility filters**: equipment, hours of service, time windows,
//!   hard preferences
//! - **Pair scoring**: the efficiency weight each feasible pairing carries
//!   into the objective
//! - **MIP assignment**: at-most-one constraints both ways, solved through
//!   `good_lp` with deterministic tie-breaking
//!
//! Infeasibility is not an error: the optimizer returns an empty assignment
//! with a reason instead.

pub mod types;
pub mod compat;
pub mod optimizer;

pub use compat::{check_pair, pair_geometry, required_minutes, score_pair, Incompatibility, PairGeometry};
pub use optimizer::optimize;
pub use types::{
    LoadMatch, MatchingOutcome, MatchingProblem, MatchingWeights, NetworkMetrics,
    OptimizationConstraint, PairScore,
};
