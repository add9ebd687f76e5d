//! MIP assignment over candidate (driver, load) pairs.
//!
//! Decision variables are binary `x_{d,l}` relaxed to [0, 1]; the at-most-one
//! constraints form an assignment polytope whose LP relaxation has integral
//! vertices, so extraction rounds at 0.5 without a branch-and-bound pass.
//! Equal-objective solutions are tie-broken inside the objective: lower
//! empty-miles percentage first, then lexicographic driver order.

use std::collections::HashMap;

use good_lp::solvers::clarabel::clarabel;
use good_lp::{constraint, variable, variables, Expression, Solution, SolverModel, Variable};
use tracing::debug;

use crate::control::RunControl;
use crate::domain::{Driver, Load};
use crate::error::EngineResult;

use super::compat::{check_pair, score_pair, PairGeometry};
use super::types::{
    LoadMatch, MatchingOutcome, MatchingProblem, NetworkMetrics, OptimizationConstraint,
    PairScore, REVENUE_PER_MILE_USD,
};

/// Objective nudge that prefers lower empty-ratio solutions among equals.
const EMPTY_TIEBREAK: f64 = 1e-6;
/// Objective nudge that prefers earlier driver ids among remaining equals.
const ORDER_TIEBREAK: f64 = 1e-9;
/// A relaxed binary above this is an accepted assignment.
const ROUNDING_THRESHOLD: f64 = 0.5;

struct Candidate {
    driver_idx: usize,
    load_idx: usize,
    geometry: PairGeometry,
    score: PairScore,
}

/// Run one matching pass. Infeasibility and an empty candidate set return an
/// empty outcome with a reason; only infrastructure problems are errors.
pub fn optimize(
    problem: &MatchingProblem,
    control: &mut dyn RunControl,
) -> EngineResult<MatchingOutcome> {
    control.checkpoint()?;
    let loads = filtered_loads(problem);
    let drivers = filtered_drivers(problem);
    control.progress(10);

    // Drivers sorted by id so the order tie-break is stable regardless of
    // repository iteration order.
    let mut driver_order: Vec<usize> = (0..drivers.len()).collect();
    driver_order.sort_by(|a, b| drivers[*a].id.cmp(&drivers[*b].id));
    let rank_of_driver: HashMap<usize, usize> = driver_order
        .iter()
        .enumerate()
        .map(|(rank, idx)| (*idx, rank))
        .collect();

    let mut candidates: Vec<Candidate> = Vec::new();
    for (load_idx, load) in loads.iter().enumerate() {
        for (driver_idx, driver) in drivers.iter().enumerate() {
            if let Ok(geometry) = check_pair(driver, load, problem.speed_mph, problem.now) {
                let score = score_pair(driver, load, geometry, &problem.weights, problem.speed_mph);
                candidates.push(Candidate { driver_idx, load_idx, geometry, score });
            }
        }
        control.checkpoint()?;
    }
    control.progress(35);
    debug!(
        loads = loads.len(),
        drivers = drivers.len(),
        candidates = candidates.len(),
        "candidate generation complete"
    );

    if candidates.is_empty() {
        return Ok(MatchingOutcome {
            matches: Vec::new(),
            metrics: empty_metrics(&loads, &drivers),
            reason: Some("no compatible driver/load pairs".into()),
        });
    }

    // Decision variable per candidate, binary relaxed to [0, 1].
    let mut vars = variables!();
    let mut pair_vars: Vec<Variable> = Vec::with_capacity(candidates.len());
    let mut objective = Expression::from(0.0);
    for candidate in &candidates {
        let x = vars.add(variable().min(0.0).max(1.0));
        let rank = rank_of_driver[&candidate.driver_idx] as f64;
        let weight = candidate.score.total
            + (1.0 - candidate.score.empty_ratio) * EMPTY_TIEBREAK
            - rank * ORDER_TIEBREAK;
        objective += weight * x;
        pair_vars.push(x);
    }

    let mut per_load: HashMap<usize, Expression> = HashMap::new();
    let mut per_driver: HashMap<usize, Expression> = HashMap::new();
    for (candidate, x) in candidates.iter().zip(pair_vars.iter()) {
        *per_load
            .entry(candidate.load_idx)
            .or_insert_with(|| Expression::from(0.0)) += *x;
        *per_driver
            .entry(candidate.driver_idx)
            .or_insert_with(|| Expression::from(0.0)) += *x;
    }

    let mut model = vars.maximise(objective).using(clarabel);
    for (_, expr) in per_load {
        model = model.with(constraint!(expr <= 1.0));
    }
    for (_, expr) in per_driver {
        model = model.with(constraint!(expr <= 1.0));
    }
    control.checkpoint()?;
    control.progress(55);

    let solution = match model.solve() {
        Ok(solution) => solution,
        Err(e) => {
            return Ok(MatchingOutcome {
                matches: Vec::new(),
                metrics: empty_metrics(&loads, &drivers),
                reason: Some(format!("no feasible assignment: {e:?}")),
            });
        }
    };
    control.checkpoint()?;
    control.progress(80);

    // Mean deadhead per load over its feasible drivers, the baseline for
    // empty-miles-saved.
    let mut baseline: HashMap<usize, (f64, usize)> = HashMap::new();
    for candidate in &candidates {
        let entry = baseline.entry(candidate.load_idx).or_insert((0.0, 0));
        entry.0 += candidate.geometry.empty_mi;
        entry.1 += 1;
    }

    let mut matches: Vec<LoadMatch> = candidates
        .iter()
        .zip(pair_vars.iter())
        .filter(|(_, x)| solution.value(**x) > ROUNDING_THRESHOLD)
        .map(|(candidate, _)| {
            let driver = &drivers[candidate.driver_idx];
            let load = &loads[candidate.load_idx];
            let (sum, count) = baseline[&candidate.load_idx];
            let mean_empty = sum / count as f64;
            LoadMatch {
                driver_id: driver.id.clone(),
                load_id: load.id.clone(),
                score: candidate.score.total,
                empty_miles: candidate.geometry.empty_mi,
                loaded_miles: candidate.geometry.loaded_mi,
                empty_miles_saved: mean_empty - candidate.geometry.empty_mi,
                network_contribution: candidate.score.network_component,
                estimated_earnings_usd: candidate.geometry.loaded_mi * REVENUE_PER_MILE_USD,
                breakdown: candidate.score,
            }
        })
        .collect();
    matches.sort_by(|a, b| a.driver_id.cmp(&b.driver_id));

    let metrics = build_metrics(&loads, &drivers, &matches);
    control.progress(100);
    Ok(MatchingOutcome {
        matches,
        metrics,
        reason: None,
    })
}

fn filtered_loads(problem: &MatchingProblem) -> Vec<Load> {
    problem
        .loads
        .iter()
        .filter(|load| {
            problem.constraints.iter().all(|c| match c {
                OptimizationConstraint::MaxWeightLbs { value, .. } => load.weight_lbs <= *value,
                OptimizationConstraint::RequiredEquipment { value, .. } => {
                    load.required_equipment == *value
                }
                OptimizationConstraint::Region { value, .. } => {
                    load.region.as_deref() == Some(value.as_str())
                }
                OptimizationConstraint::MinHosMinutes { .. } => true,
            })
        })
        .cloned()
        .collect()
}

fn filtered_drivers(problem: &MatchingProblem) -> Vec<Driver> {
    problem
        .drivers
        .iter()
        .filter(|driver| {
            problem.constraints.iter().all(|c| match c {
                OptimizationConstraint::MinHosMinutes { value, .. } => {
                    driver.driving_minutes_remaining >= *value
                }
                OptimizationConstraint::RequiredEquipment { value, .. } => {
                    driver.equipment == *value
                }
                OptimizationConstraint::Region { value, .. } => {
                    driver.region.as_deref() == Some(value.as_str())
                }
                OptimizationConstraint::MaxWeightLbs { .. } => true,
            })
        })
        .cloned()
        .collect()
}

fn empty_metrics(loads: &[Load], drivers: &[Driver]) -> NetworkMetrics {
    NetworkMetrics {
        total_loads: loads.len(),
        total_drivers: drivers.len(),
        ..Default::default()
    }
}

fn build_metrics(loads: &[Load], drivers: &[Driver], matches: &[LoadMatch]) -> NetworkMetrics {
    let loaded: f64 = matches.iter().map(|m| m.loaded_miles).sum();
    let empty: f64 = matches.iter().map(|m| m.empty_miles).sum();
    let total = loaded + empty;
    let empty_pct = if total > 0.0 { empty / total * 100.0 } else { 0.0 };
    NetworkMetrics {
        total_loads: loads.len(),
        matched_loads: matches.len(),
        total_drivers: drivers.len(),
        matched_drivers: matches.len(),
        total_miles: total,
        loaded_miles: loaded,
        empty_miles: empty,
        empty_miles_pct: empty_pct,
        efficiency_score: if total > 0.0 { loaded / total * 100.0 } else { 0.0 },
    }
}
