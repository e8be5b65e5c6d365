//! # Configuration Module
//!
//! Plain structured configuration for the control plane. There is no file
//! loading or CLI surface here: embedding applications construct these
//! structs directly (or deserialize them from whatever format they use) and
//! hand them to the component constructors.
//!
//! All durations deserialize from human-readable strings ("2m", "500ms")
//! via `humantime-serde`. Every section has a `validate()` that returns a
//! configuration error with a precise message rather than panicking later.

use crate::core::error::{ControlPlaneError, ControlResult};
use crate::core::types::{BalancingAlgorithm, FallbackStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Load balancer configuration for one logical component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancingConfig {
    /// Instance selection algorithm.
    pub algorithm: BalancingAlgorithm,

    /// Lower bound on the instance count.
    pub min_instances: usize,

    /// Upper bound on the instance count.
    pub max_instances: usize,

    /// Bounded inbound queue capacity per instance.
    pub queue_capacity: usize,

    /// Auto-scaling control loop settings.
    pub auto_scaling: AutoScalingConfig,

    /// Per-instance integer weights for the weighted algorithm.
    #[serde(default)]
    pub instance_weights: HashMap<String, u32>,

    /// Weight assigned to instances absent from `instance_weights`.
    pub default_weight: u32,
}

impl Default for LoadBalancingConfig {
    fn default() -> Self {
        Self {
            algorithm: BalancingAlgorithm::RoundRobin,
            min_instances: 1,
            max_instances: 4,
            queue_capacity: 64,
            auto_scaling: AutoScalingConfig::default(),
            instance_weights: HashMap::new(),
            default_weight: 1,
        }
    }
}

impl LoadBalancingConfig {
    /// Validate bounds and weights.
    pub fn validate(&self) -> ControlResult<()> {
        if self.min_instances == 0 {
            return Err(ControlPlaneError::config("min_instances must be at least 1"));
        }
        if self.min_instances > self.max_instances {
            return Err(ControlPlaneError::config(format!(
                "min_instances ({}) exceeds max_instances ({})",
                self.min_instances, self.max_instances
            )));
        }
        if self.queue_capacity == 0 {
            return Err(ControlPlaneError::config("queue_capacity must be at least 1"));
        }
        if self.default_weight == 0 {
            return Err(ControlPlaneError::config("default_weight must be positive"));
        }
        for (instance, weight) in &self.instance_weights {
            if *weight == 0 {
                return Err(ControlPlaneError::config(format!(
                    "instance weight for {} must be positive",
                    instance
                )));
            }
        }
        Ok(())
    }
}

/// Auto-scaling thresholds and cooldowns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoScalingConfig {
    /// Whether the scaling loop runs at all.
    pub enabled: bool,

    /// Period of the scaling loop.
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,

    /// Average queue occupancy above which one instance is added.
    pub scale_up_threshold: f64,

    /// Average queue occupancy below which one instance is removed.
    pub scale_down_threshold: f64,

    /// Minimum time between two scale-ups.
    #[serde(with = "humantime_serde")]
    pub scale_up_cooldown: Duration,

    /// Minimum time between two scale-downs.
    #[serde(with = "humantime_serde")]
    pub scale_down_cooldown: Duration,
}

impl Default for AutoScalingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval: Duration::from_secs(10),
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            scale_up_cooldown: Duration::from_secs(120),
            scale_down_cooldown: Duration::from_secs(300),
        }
    }
}

impl AutoScalingConfig {
    /// Validate threshold ordering.
    pub fn validate(&self) -> ControlResult<()> {
        if !(0.0..=1.0).contains(&self.scale_up_threshold)
            || !(0.0..=1.0).contains(&self.scale_down_threshold)
        {
            return Err(ControlPlaneError::config(
                "scaling thresholds must be within [0, 1]",
            ));
        }
        if self.scale_down_threshold >= self.scale_up_threshold {
            return Err(ControlPlaneError::config(format!(
                "scale_down_threshold ({}) must be below scale_up_threshold ({})",
                self.scale_down_threshold, self.scale_up_threshold
            )));
        }
        Ok(())
    }
}

/// Circuit breaker tuning, shared by all breakers created by one manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,

    /// Consecutive successes in half-open before the breaker closes.
    pub success_threshold: u32,

    /// How long an open breaker rejects calls before admitting a trial.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Retry budget for callers that retry around the breaker.
    pub max_retries: u32,

    /// Base delay for those retries.
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_millis(200),
        }
    }
}

impl CircuitBreakerConfig {
    /// Validate thresholds.
    pub fn validate(&self) -> ControlResult<()> {
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err(ControlPlaneError::config(
                "circuit breaker thresholds must be positive",
            ));
        }
        Ok(())
    }
}

/// Fallback routing configuration for the output router.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FallbackRoutingConfig {
    /// Master switch; when false the router never consults fallbacks.
    pub enabled: bool,

    /// Fallback targets keyed by primary target id.
    #[serde(default)]
    pub fallback_targets: HashMap<String, Vec<String>>,

    /// Fallback targets keyed by operation type.
    #[serde(default)]
    pub operation_type_fallbacks: HashMap<String, Vec<String>>,

    /// Fallback targets keyed by penalty condition (recommended action or
    /// performance grade).
    #[serde(default)]
    pub condition_fallbacks: HashMap<String, Vec<String>>,

    /// Upper bound on delivery attempts; `None` means all candidates.
    pub max_fallback_attempts: Option<usize>,

    /// Delay inserted between attempts (not before the first).
    #[serde(with = "humantime_serde", default)]
    pub fallback_delay: Duration,

    /// Ordering applied to the combined candidate list.
    pub fallback_strategy: FallbackStrategy,
}

impl FallbackRoutingConfig {
    /// Validate attempt bounds.
    pub fn validate(&self) -> ControlResult<()> {
        if let Some(0) = self.max_fallback_attempts {
            return Err(ControlPlaneError::config(
                "max_fallback_attempts must be positive when set",
            ));
        }
        Ok(())
    }
}

/// Backpressure behavior for the output router's dispatch path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackpressureConfig {
    /// Retry budget for delivery retried around backpressure.
    pub max_retries: u32,

    /// Base delay for those retries.
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,

    /// Full backpressure delay; severity scales this down
    /// (High applies a quarter, Critical a half, Emergency the full delay).
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Health score below which a target is treated as unhealthy.
    pub circuit_breaker_threshold: f64,

    /// How often external health feeds are expected to refresh.
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(200),
            base_delay: Duration::from_millis(200),
            circuit_breaker_threshold: 0.5,
            health_check_interval: Duration::from_secs(5),
        }
    }
}

impl BackpressureConfig {
    /// Validate the health threshold.
    pub fn validate(&self) -> ControlResult<()> {
        if !(0.0..=1.0).contains(&self.circuit_breaker_threshold) {
            return Err(ControlPlaneError::config(
                "circuit_breaker_threshold must be within [0, 1]",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_balancing_defaults_are_valid() {
        assert!(LoadBalancingConfig::default().validate().is_ok());
        assert!(AutoScalingConfig::default().validate().is_ok());
        assert!(CircuitBreakerConfig::default().validate().is_ok());
        assert!(FallbackRoutingConfig::default().validate().is_ok());
        assert!(BackpressureConfig::default().validate().is_ok());
    }

    #[test]
    fn test_bounds_validation() {
        let config = LoadBalancingConfig {
            min_instances: 5,
            max_instances: 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = LoadBalancingConfig {
            default_weight: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut config = LoadBalancingConfig::default();
        config.instance_weights.insert("parser-0".to_string(), 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_validation() {
        let config = AutoScalingConfig {
            scale_up_threshold: 0.3,
            scale_down_threshold: 0.8,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = FallbackRoutingConfig {
            max_fallback_attempts: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_serde_roundtrip() {
        let config = AutoScalingConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: AutoScalingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.scale_up_cooldown, Duration::from_secs(120));
        assert_eq!(parsed.scale_down_cooldown, Duration::from_secs(300));
    }
}
