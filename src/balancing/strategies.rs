//! # Selection Strategies
//!
//! The instance-selection algorithms. All of them are pure functions over
//! the current candidate slice plus a shared atomic cursor; the balancer
//! passes in candidates that are already filtered to ready, non-shutting-
//! down instances.
//!
//! The weighted algorithm does not materialize a virtual pool. It walks the
//! same sequence a pool of `sum(weights)` slots would produce, but via a
//! prefix-sum table and binary search, so memory stays O(n) for arbitrary
//! weights.

use crate::balancing::instance::Instance;
use crate::core::types::BalancingAlgorithm;
use metrics::counter;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Select a candidate index, or `None` for an empty slice.
///
/// The cursor is shared across selections and never reset on membership
/// changes; every selection applies modulo the current candidate count, so
/// a stale offset skews fairness by at most one lap.
pub(crate) fn select_index(
    algorithm: BalancingAlgorithm,
    candidates: &[Arc<Instance>],
    cursor: &AtomicUsize,
    weights: &HashMap<String, u32>,
    default_weight: u32,
) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }
    if candidates.len() == 1 {
        // Single candidate: balancing is invisible regardless of algorithm.
        return Some(0);
    }

    let index = match algorithm {
        BalancingAlgorithm::None => 0,
        BalancingAlgorithm::RoundRobin => round_robin(candidates.len(), cursor),
        BalancingAlgorithm::LeastConnections => least_connections(candidates),
        BalancingAlgorithm::Weighted => weighted(candidates, cursor, weights, default_weight),
        BalancingAlgorithm::HealthAware => health_aware(candidates),
    };

    counter!("balancer_selections").increment(1);
    debug!(
        instance = %candidates[index].id(),
        algorithm = ?algorithm,
        "selected instance"
    );
    Some(index)
}

fn round_robin(len: usize, cursor: &AtomicUsize) -> usize {
    cursor.fetch_add(1, Ordering::Relaxed) % len
}

/// Smallest outstanding count wins; ties keep the earliest candidate.
fn least_connections(candidates: &[Arc<Instance>]) -> usize {
    let mut best = 0;
    let mut best_outstanding = candidates[0].outstanding();
    for (index, candidate) in candidates.iter().enumerate().skip(1) {
        let outstanding = candidate.outstanding();
        if outstanding < best_outstanding {
            best = index;
            best_outstanding = outstanding;
        }
    }
    best
}

/// Round-robin over a weight-proportional virtual pool, realized as a
/// cursor position mapped through prefix sums.
fn weighted(
    candidates: &[Arc<Instance>],
    cursor: &AtomicUsize,
    weights: &HashMap<String, u32>,
    default_weight: u32,
) -> usize {
    let mut prefix = Vec::with_capacity(candidates.len());
    let mut total: u64 = 0;
    for candidate in candidates {
        let weight = weights
            .get(candidate.id())
            .copied()
            .unwrap_or(default_weight) as u64;
        total += weight;
        prefix.push(total);
    }

    if total == 0 {
        // No positive weights configured: plain round-robin, unmodified.
        return round_robin(candidates.len(), cursor);
    }

    let position = (cursor.fetch_add(1, Ordering::Relaxed) as u64) % total;
    // First prefix strictly greater than the position owns the slot.
    prefix.partition_point(|&p| p <= position)
}

/// Highest available-capacity score wins; ties keep the earliest candidate.
fn health_aware(candidates: &[Arc<Instance>]) -> usize {
    let mut best = 0;
    let mut best_score = candidates[0].available_capacity();
    for (index, candidate) in candidates.iter().enumerate().skip(1) {
        let score = candidate.available_capacity();
        if score > best_score {
            best = index;
            best_score = score;
        }
    }
    best
}
