//! # Fallback Target Resolution
//!
//! Builds and orders the candidate list the router walks when a primary
//! target is unhealthy, overloaded or fails delivery. Candidates come from
//! three independent config sources, are combined in priority order with
//! duplicates removed, and are then reordered by the configured strategy.

use crate::core::config::FallbackRoutingConfig;
use crate::core::types::{FallbackStrategy, OperationResult};
use crate::directory::TargetDirectory;
use std::collections::HashSet;

/// Resolve the deduplicated candidate list for `primary`.
///
/// Priority order of the sources: targets configured for the primary id,
/// then targets for the result's operation type, then targets for the
/// result's recommended action and performance grade. First occurrence
/// wins on duplicates.
pub fn resolve_candidates(
    config: &FallbackRoutingConfig,
    primary: &str,
    result: &OperationResult,
) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    let mut extend = |targets: Option<&Vec<String>>| {
        if let Some(targets) = targets {
            for target in targets {
                if seen.insert(target.clone()) {
                    candidates.push(target.clone());
                }
            }
        }
    };

    extend(config.fallback_targets.get(primary));
    extend(config.operation_type_fallbacks.get(&result.op_type));
    if let Some(penalty) = &result.penalty {
        extend(config.condition_fallbacks.get(&penalty.recommended_action));
        extend(config.condition_fallbacks.get(&penalty.performance_grade));
    }
    candidates
}

/// Reorder `candidates` according to `strategy`.
///
/// Sorts are stable, so targets that compare equal keep their resolution
/// priority.
pub fn order_candidates(
    strategy: FallbackStrategy,
    mut candidates: Vec<String>,
    directory: &TargetDirectory,
) -> Vec<String> {
    if candidates.len() < 2 {
        return candidates;
    }
    match strategy {
        FallbackStrategy::Sequential => {}
        FallbackStrategy::RoundRobin => {
            let offset = chrono::Utc::now().timestamp() as usize % candidates.len();
            candidates.rotate_left(offset);
        }
        FallbackStrategy::HealthBased => {
            candidates.sort_by(|a, b| {
                directory
                    .health(b)
                    .partial_cmp(&directory.health(a))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        FallbackStrategy::LoadBased => {
            candidates.sort_by_key(|target| directory.load(target));
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Operation, PenaltyInfo};
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    fn result_with_penalty() -> OperationResult {
        let mut result =
            OperationResult::from_operation(&Operation::new("transform"), "parser", false);
        result.penalty = Some(PenaltyInfo {
            recommended_action: "reroute".to_string(),
            performance_grade: "D".to_string(),
            penalty_factor: 0.5,
        });
        result
    }

    #[test]
    fn test_candidates_combined_in_priority_order_and_deduplicated() {
        let config = FallbackRoutingConfig {
            enabled: true,
            fallback_targets: HashMap::from([(
                "analytics".to_string(),
                vec!["backup-analytics".to_string(), "archiver".to_string()],
            )]),
            operation_type_fallbacks: HashMap::from([(
                "transform".to_string(),
                vec!["archiver".to_string(), "transformer-b".to_string()],
            )]),
            condition_fallbacks: HashMap::from([
                ("reroute".to_string(), vec!["overflow-pool".to_string()]),
                ("D".to_string(), vec!["backup-analytics".to_string()]),
            ]),
            ..Default::default()
        };

        let candidates = resolve_candidates(&config, "analytics", &result_with_penalty());
        assert_eq!(
            candidates,
            vec!["backup-analytics", "archiver", "transformer-b", "overflow-pool"]
        );
    }

    #[test]
    fn test_no_sources_yields_empty_list() {
        let config = FallbackRoutingConfig {
            enabled: true,
            ..Default::default()
        };
        let result = OperationResult::from_operation(&Operation::new("transform"), "parser", true);
        assert!(resolve_candidates(&config, "analytics", &result).is_empty());
    }

    #[tokio::test]
    async fn test_health_based_ordering_is_descending() {
        let directory = TargetDirectory::new();
        for (target, health) in [("a", 0.6), ("b", 0.9), ("c", 0.7)] {
            let (tx, _rx) = mpsc::channel(10);
            directory.register(target, tx);
            directory.set_health(target, health);
        }

        let ordered = order_candidates(
            FallbackStrategy::HealthBased,
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            &directory,
        );
        assert_eq!(ordered, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_load_based_ordering_is_ascending() {
        let directory = TargetDirectory::new();
        // Occupancy: a 5/10 (High), b 0/10 (Normal), c 3/10 (Warning).
        for (target, fill) in [("a", 5usize), ("b", 0), ("c", 3)] {
            let (tx, rx) = mpsc::channel(10);
            directory.register(target, tx.clone());
            for _ in 0..fill {
                tx.try_send(OperationResult::from_operation(
                    &Operation::new("noop"),
                    "src",
                    true,
                ))
                .unwrap();
            }
            // Keep the receivers alive for the duration of the test.
            std::mem::forget(rx);
        }

        let ordered = order_candidates(
            FallbackStrategy::LoadBased,
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            &directory,
        );
        assert_eq!(ordered, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_sequential_keeps_resolution_order() {
        let directory = TargetDirectory::new();
        let ordered = order_candidates(
            FallbackStrategy::Sequential,
            vec!["x".to_string(), "y".to_string()],
            &directory,
        );
        assert_eq!(ordered, vec!["x", "y"]);
    }
}
