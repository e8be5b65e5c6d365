//! # Persisted State Shapes
//!
//! Serializable snapshots exchanged with the external state-persistence
//! collaborator. The core exposes enough state to be serialized and accepts
//! the same shape back to resume.
//!
//! Timestamps are encoded as elapsed durations rather than wall-clock
//! times: a restored balancer honors the remainder of a scaling cooldown and
//! a restored breaker the remainder of its open timeout, instead of
//! restarting either from zero.

use crate::core::circuit_breaker::BreakerState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Snapshot of one circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    /// State at snapshot time.
    pub state: BreakerState,

    /// Consecutive failures observed in the current state.
    pub consecutive_failures: u32,

    /// Consecutive successes observed in the current state.
    pub consecutive_successes: u32,

    /// Milliseconds elapsed since the last state transition.
    pub since_transition_ms: u64,
}

/// Snapshot of one component's load balancer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerSnapshot {
    /// Logical component id.
    pub component: String,

    /// Instance count at snapshot time.
    pub instance_count: usize,

    /// Shared round-robin cursor value.
    pub round_robin_index: usize,

    /// Effective weight per instance id.
    pub instance_weights: HashMap<String, u32>,

    /// Capacity health score per instance id.
    pub instance_health: HashMap<String, f64>,

    /// Milliseconds since the last scale-up, if one has happened.
    pub since_scale_up_ms: Option<u64>,

    /// Milliseconds since the last scale-down, if one has happened.
    pub since_scale_down_ms: Option<u64>,
}

/// Complete control-plane snapshot handed to the persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ControlPlaneSnapshot {
    /// One entry per component balancer.
    pub balancers: Vec<BalancerSnapshot>,

    /// Breaker state keyed by downstream target id.
    pub breakers: HashMap<String, BreakerSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_roundtrip() {
        let snapshot = ControlPlaneSnapshot {
            balancers: vec![BalancerSnapshot {
                component: "parser".to_string(),
                instance_count: 3,
                round_robin_index: 17,
                instance_weights: HashMap::from([("parser-0".to_string(), 2)]),
                instance_health: HashMap::from([("parser-0".to_string(), 0.9)]),
                since_scale_up_ms: Some(45_000),
                since_scale_down_ms: None,
            }],
            breakers: HashMap::from([(
                "analytics".to_string(),
                BreakerSnapshot {
                    state: BreakerState::Open,
                    consecutive_failures: 5,
                    consecutive_successes: 0,
                    since_transition_ms: 12_000,
                },
            )]),
        };

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: ControlPlaneSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.balancers[0].round_robin_index, 17);
        assert_eq!(parsed.balancers[0].since_scale_up_ms, Some(45_000));
        assert_eq!(parsed.breakers["analytics"].state, BreakerState::Open);
    }
}
