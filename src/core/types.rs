//! # Core Types
//!
//! Fundamental data structures shared by every component of the control
//! plane: units of work, their completion records, queue severity levels and
//! the algorithm/strategy selectors consumed from configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Totally ordered severity for queue occupancy.
///
/// Derived from the occupancy ratio of a bounded queue via
/// [`BufferStatus::from_ratio`]. The ordering matters: load-based fallback
/// ordering sorts candidates ascending by this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferStatus {
    Normal,
    Warning,
    High,
    Overflow,
    Critical,
    Emergency,
}

impl BufferStatus {
    /// Map a queue occupancy ratio in `[0, 1]` to a severity level.
    ///
    /// Breakpoints: `<0.2` Normal, `<0.4` Warning, `<0.6` High,
    /// `<0.8` Overflow, `<0.9` Critical, otherwise Emergency.
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio < 0.2 {
            Self::Normal
        } else if ratio < 0.4 {
            Self::Warning
        } else if ratio < 0.6 {
            Self::High
        } else if ratio < 0.8 {
            Self::Overflow
        } else if ratio < 0.9 {
            Self::Critical
        } else {
            Self::Emergency
        }
    }
}

/// A unit of work flowing through the topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// Unique operation id.
    pub id: String,

    /// Operation type, matched against decision graph conditions.
    pub op_type: String,

    /// Opaque payload handed to the processing engine.
    pub payload: serde_json::Value,

    /// Scheduling priority, 0 (lowest) to 10.
    pub priority: u8,

    /// Correlation id of the request this operation belongs to.
    pub request_id: Option<String>,

    /// Flow this operation participates in, used to pick a decision graph.
    pub flow_id: Option<String>,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Operation {
    /// Create a new operation of the given type with a generated id.
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            op_type: op_type.into(),
            payload: serde_json::Value::Null,
            priority: 5,
            request_id: None,
            flow_id: None,
            created_at: Utc::now(),
        }
    }

    /// Attach a payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Set the scheduling priority.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Associate the operation with a flow.
    pub fn with_flow(mut self, flow_id: impl Into<String>) -> Self {
        self.flow_id = Some(flow_id.into());
        self
    }
}

/// Penalty information attached to a result by an upstream quality monitor.
///
/// Used as routing-condition input: fallback targets can be keyed on the
/// recommended action or the performance grade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PenaltyInfo {
    /// Recommended action, e.g. `"throttle"` or `"reroute"`.
    pub recommended_action: String,

    /// Performance grade, e.g. `"A"` through `"F"`.
    pub performance_grade: String,

    /// Multiplicative penalty applied to the producing component's score.
    pub penalty_factor: f64,
}

/// Completion record for an [`Operation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    /// Id of the completed operation.
    pub operation_id: String,

    /// Operation type, carried over for routing condition matching.
    pub op_type: String,

    /// Whether processing succeeded.
    pub success: bool,

    /// Whether processing hit its deadline before finishing.
    pub timed_out: bool,

    /// Cache outcome, when the processing engine consulted a cache.
    pub cache_hit: Option<bool>,

    /// Priority inherited from the operation.
    pub priority: u8,

    /// Component that produced this result; doubles as the current
    /// decision-graph node id during routing.
    pub component: String,

    /// Correlation id of the enclosing request.
    pub request_id: Option<String>,

    /// Flow this result belongs to.
    pub flow_id: Option<String>,

    /// Free-form numeric metrics reported by the processing engine.
    pub metrics: HashMap<String, f64>,

    /// Optional penalty information from a quality monitor.
    pub penalty: Option<PenaltyInfo>,

    /// Completion timestamp.
    pub completed_at: DateTime<Utc>,
}

impl OperationResult {
    /// Build a result for `operation` produced by `component`.
    pub fn from_operation(operation: &Operation, component: impl Into<String>, success: bool) -> Self {
        Self {
            operation_id: operation.id.clone(),
            op_type: operation.op_type.clone(),
            success,
            timed_out: false,
            cache_hit: None,
            priority: operation.priority,
            component: component.into(),
            request_id: operation.request_id.clone(),
            flow_id: operation.flow_id.clone(),
            metrics: HashMap::new(),
            penalty: None,
            completed_at: Utc::now(),
        }
    }

    /// Whether this result satisfies a named domain condition.
    ///
    /// Condition names are the ones decision graphs may use:
    /// `success`, `failure`, `timeout`, `cache_hit`, `cache_miss`,
    /// `high_priority`. Unknown names never match.
    pub fn matches_condition(&self, condition: &str) -> bool {
        match condition {
            "success" => self.success,
            "failure" => !self.success,
            "timeout" => self.timed_out,
            "cache_hit" => self.cache_hit == Some(true),
            "cache_miss" => self.cache_hit == Some(false),
            "high_priority" => self.priority >= 8,
            _ => false,
        }
    }
}

/// Instance-selection algorithm for a component's load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalancingAlgorithm {
    /// No balancing: the single candidate is returned as-is.
    None,
    /// Shared index incremented on every selection, modulo candidate count.
    #[default]
    RoundRobin,
    /// Smallest outstanding (submitted minus completed) count wins.
    LeastConnections,
    /// Round-robin over a weight-proportional virtual pool.
    Weighted,
    /// Highest available-capacity health score wins.
    HealthAware,
}

/// Ordering applied to the deduplicated fallback candidate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    /// Configured order, unchanged.
    #[default]
    Sequential,
    /// Rotated by an offset derived from the current time.
    RoundRobin,
    /// Descending by directory health score.
    HealthBased,
    /// Ascending by directory buffer severity.
    LoadBased,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_status_breakpoints() {
        assert_eq!(BufferStatus::from_ratio(0.0), BufferStatus::Normal);
        assert_eq!(BufferStatus::from_ratio(0.19), BufferStatus::Normal);
        assert_eq!(BufferStatus::from_ratio(0.2), BufferStatus::Warning);
        assert_eq!(BufferStatus::from_ratio(0.45), BufferStatus::High);
        assert_eq!(BufferStatus::from_ratio(0.7), BufferStatus::Overflow);
        assert_eq!(BufferStatus::from_ratio(0.85), BufferStatus::Critical);
        assert_eq!(BufferStatus::from_ratio(0.95), BufferStatus::Emergency);
        assert_eq!(BufferStatus::from_ratio(1.0), BufferStatus::Emergency);
    }

    #[test]
    fn test_buffer_status_total_order() {
        assert!(BufferStatus::Normal < BufferStatus::Warning);
        assert!(BufferStatus::Warning < BufferStatus::High);
        assert!(BufferStatus::High < BufferStatus::Overflow);
        assert!(BufferStatus::Overflow < BufferStatus::Critical);
        assert!(BufferStatus::Critical < BufferStatus::Emergency);
    }

    #[test]
    fn test_condition_matching() {
        let op = Operation::new("transform").with_priority(9);
        let mut result = OperationResult::from_operation(&op, "parser", true);
        assert!(result.matches_condition("success"));
        assert!(!result.matches_condition("failure"));
        assert!(result.matches_condition("high_priority"));
        assert!(!result.matches_condition("cache_hit"));
        assert!(!result.matches_condition("nonsense"));

        result.success = false;
        result.timed_out = true;
        result.cache_hit = Some(false);
        assert!(result.matches_condition("failure"));
        assert!(result.matches_condition("timeout"));
        assert!(result.matches_condition("cache_miss"));
    }
}
