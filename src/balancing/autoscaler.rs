//! # Auto-Scaler
//!
//! The scaling decision is a pure function over the observed load sample and
//! the cooldown bookkeeping, so the control rules are testable without a
//! clock or a runtime. The periodic loop that feeds it lives here too and is
//! driven by the balancer's root cancellation token.

use crate::balancing::balancer::ComponentBalancer;
use crate::core::config::AutoScalingConfig;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::debug;

/// Outcome of one scaling tick. Up and down are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingDecision {
    ScaleUp,
    ScaleDown,
    Hold,
}

/// Decide whether to scale, given the average queue occupancy across
/// non-shutting-down instances and the current instance count.
///
/// Scale up requires occupancy above the threshold, headroom below the max,
/// and the scale-up cooldown to have elapsed; scale down is symmetric with
/// its own threshold, floor and cooldown. When neither rule fires the
/// balancer holds.
pub fn evaluate(
    avg_occupancy: f64,
    instance_count: usize,
    min_instances: usize,
    max_instances: usize,
    config: &AutoScalingConfig,
    now: Instant,
    last_scale_up: Option<Instant>,
    last_scale_down: Option<Instant>,
) -> ScalingDecision {
    let up_cooldown_over = last_scale_up
        .map(|at| now.duration_since(at) >= config.scale_up_cooldown)
        .unwrap_or(true);
    let down_cooldown_over = last_scale_down
        .map(|at| now.duration_since(at) >= config.scale_down_cooldown)
        .unwrap_or(true);

    if avg_occupancy > config.scale_up_threshold
        && instance_count < max_instances
        && up_cooldown_over
    {
        ScalingDecision::ScaleUp
    } else if avg_occupancy < config.scale_down_threshold
        && instance_count > min_instances
        && down_cooldown_over
    {
        ScalingDecision::ScaleDown
    } else {
        ScalingDecision::Hold
    }
}

/// Spawn the periodic scaling loop for `balancer`.
pub(crate) fn spawn(balancer: Arc<ComponentBalancer>) -> JoinHandle<()> {
    let interval = balancer.config().auto_scaling.check_interval;
    let cancel = balancer.cancel_token();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let decision = balancer.scaling_tick();
                    debug!(component = %balancer.component(), decision = ?decision, "scaling tick");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> AutoScalingConfig {
        AutoScalingConfig {
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_scale_up_on_high_occupancy() {
        let now = Instant::now();
        assert_eq!(
            evaluate(0.85, 2, 1, 4, &config(), now, None, None),
            ScalingDecision::ScaleUp
        );
        // At the threshold itself the balancer holds; the rule is strict.
        assert_eq!(
            evaluate(0.8, 2, 1, 4, &config(), now, None, None),
            ScalingDecision::Hold
        );
    }

    #[test]
    fn test_scale_down_on_low_occupancy() {
        let now = Instant::now();
        assert_eq!(
            evaluate(0.1, 3, 1, 4, &config(), now, None, None),
            ScalingDecision::ScaleDown
        );
        assert_eq!(
            evaluate(0.3, 3, 1, 4, &config(), now, None, None),
            ScalingDecision::Hold
        );
    }

    #[test]
    fn test_bounds_are_never_left() {
        let now = Instant::now();
        // Already at max: hold regardless of load.
        assert_eq!(
            evaluate(0.99, 4, 1, 4, &config(), now, None, None),
            ScalingDecision::Hold
        );
        // Already at min: hold regardless of idleness.
        assert_eq!(
            evaluate(0.0, 1, 1, 4, &config(), now, None, None),
            ScalingDecision::Hold
        );
    }

    #[test]
    fn test_cooldowns_suppress_repeat_actions() {
        let cfg = config();
        let now = Instant::now();

        // A scale-up one minute ago blocks another (2 minute cooldown).
        let recent_up = now.checked_sub(Duration::from_secs(60)).unwrap();
        assert_eq!(
            evaluate(0.9, 2, 1, 4, &cfg, now, Some(recent_up), None),
            ScalingDecision::Hold
        );
        let old_up = now.checked_sub(Duration::from_secs(121)).unwrap();
        assert_eq!(
            evaluate(0.9, 2, 1, 4, &cfg, now, Some(old_up), None),
            ScalingDecision::ScaleUp
        );

        // A scale-down four minutes ago blocks another (5 minute cooldown).
        let recent_down = now.checked_sub(Duration::from_secs(240)).unwrap();
        assert_eq!(
            evaluate(0.1, 3, 1, 4, &cfg, now, None, Some(recent_down)),
            ScalingDecision::Hold
        );
        let old_down = now.checked_sub(Duration::from_secs(301)).unwrap();
        assert_eq!(
            evaluate(0.1, 3, 1, 4, &cfg, now, None, Some(old_down)),
            ScalingDecision::ScaleDown
        );
    }

    #[test]
    fn test_up_cooldown_does_not_block_down() {
        let cfg = config();
        let now = Instant::now();
        let recent_up = now.checked_sub(Duration::from_secs(10)).unwrap();
        assert_eq!(
            evaluate(0.05, 3, 1, 4, &cfg, now, Some(recent_up), None),
            ScalingDecision::ScaleDown
        );
    }
}
