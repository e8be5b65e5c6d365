//! # Circuit Breaker
//!
//! Per-target failure isolation following the classic three-state machine:
//!
//! - **Closed**: calls pass through; consecutive failures are counted and the
//!   breaker opens at the failure threshold. Any success resets the counter.
//! - **Open**: calls fail fast without being invoked. Once the configured
//!   timeout has elapsed, the next call is admitted as a trial and the
//!   breaker moves to half-open.
//! - **HalfOpen**: consecutive successes close the breaker at the success
//!   threshold; any failure reopens it immediately.
//!
//! State is mutated only through [`CircuitBreaker::execute`] (and the
//! [`CircuitBreaker::can_execute`] probe, which performs the timed
//! open-to-half-open transition). The [`CircuitBreakerManager`] lazily
//! creates one independently lockable breaker per downstream target.

use crate::core::config::CircuitBreakerConfig;
use crate::core::error::{ControlPlaneError, ControlResult};
use crate::core::state::BreakerSnapshot;
use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_transition: Instant,
}

impl BreakerInner {
    fn transition(&mut self, state: BreakerState, now: Instant) {
        self.state = state;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.last_transition = now;
    }
}

/// Failure-isolation state machine for a single downstream target.
pub struct CircuitBreaker {
    target: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker for `target`.
    pub fn new(target: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            target: target.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_transition: Instant::now(),
            }),
        }
    }

    /// The downstream target this breaker guards.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Current state.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Fast-fail probe: whether the next call would be admitted.
    ///
    /// An open breaker whose timeout has elapsed transitions to half-open
    /// here; the admitted call is the recovery trial. Callers use this to
    /// skip costly setup when the target is known to be isolated.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let now = Instant::now();
                if now.duration_since(inner.last_transition) >= self.config.timeout {
                    inner.transition(BreakerState::HalfOpen, now);
                    debug!(target = %self.target, "circuit breaker half-open, admitting trial call");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Run `f` under this breaker.
    ///
    /// Fails fast with [`ControlPlaneError::CircuitOpen`] without invoking
    /// `f` when the breaker is open and its timeout has not elapsed. The
    /// fast-fail is therefore always distinguishable from an action-level
    /// failure, which surfaces the action's own error.
    pub async fn execute<T, F, Fut>(&self, f: F) -> ControlResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ControlResult<T>>,
    {
        if !self.can_execute() {
            counter!("circuit_breaker_fast_fails").increment(1);
            return Err(ControlPlaneError::CircuitOpen {
                target: self.target.clone(),
            });
        }

        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
                inner.consecutive_successes = inner.consecutive_successes.saturating_add(1);
            }
            BreakerState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.transition(BreakerState::Closed, Instant::now());
                    counter!("circuit_breaker_closed").increment(1);
                    debug!(target = %self.target, "circuit breaker closed after recovery");
                }
            }
            // A success while open means the state was forced externally
            // between the probe and the record; leave the breaker open.
            BreakerState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_successes = 0;
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.transition(BreakerState::Open, Instant::now());
                    counter!("circuit_breaker_opened").increment(1);
                    warn!(target = %self.target, "circuit breaker opened");
                }
            }
            BreakerState::HalfOpen => {
                inner.transition(BreakerState::Open, Instant::now());
                counter!("circuit_breaker_opened").increment(1);
                warn!(target = %self.target, "circuit breaker reopened by trial failure");
            }
            BreakerState::Open => {}
        }
    }

    /// Export state for the external persistence collaborator.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            since_transition_ms: inner.last_transition.elapsed().as_millis() as u64,
        }
    }

    /// Restore previously exported state.
    ///
    /// The snapshot carries elapsed time, so an open breaker resumes with
    /// its timeout already partially served instead of restarting it.
    pub fn restore(&self, snapshot: &BreakerSnapshot) {
        let mut inner = self.inner.lock();
        inner.state = snapshot.state;
        inner.consecutive_failures = snapshot.consecutive_failures;
        inner.consecutive_successes = snapshot.consecutive_successes;
        inner.last_transition = Instant::now()
            .checked_sub(Duration::from_millis(snapshot.since_transition_ms))
            .unwrap_or_else(Instant::now);
    }
}

/// Thread-safe lazy registry of one breaker per downstream target.
pub struct CircuitBreakerManager {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerManager {
    /// Create a manager; breakers are created on first reference.
    pub fn new(config: CircuitBreakerConfig) -> ControlResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            breakers: DashMap::new(),
        })
    }

    /// Get the breaker for `target`, creating it if needed.
    pub fn breaker(&self, target: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(target, self.config.clone())))
            .clone()
    }

    /// Run `f` under the breaker for `target`.
    pub async fn execute_with_breaker<T, F, Fut>(&self, target: &str, f: F) -> ControlResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ControlResult<T>>,
    {
        let breaker = self.breaker(target);
        breaker.execute(f).await
    }

    /// Whether a call to `target` would currently be admitted.
    ///
    /// Not a pure read: the probe performs the timed open-to-half-open
    /// transition, so polling it can move an expired open breaker to
    /// half-open (see [`CircuitBreaker::can_execute`]).
    pub fn can_execute(&self, target: &str) -> bool {
        self.breaker(target).can_execute()
    }

    /// Current state of every breaker, keyed by target id.
    ///
    /// A state observed here can differ from one reported before an
    /// intervening `can_execute` probe, which may have admitted a trial.
    pub fn breaker_states(&self) -> HashMap<String, BreakerState> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect()
    }

    /// Snapshot every breaker, keyed by target id.
    pub fn snapshot(&self) -> HashMap<String, BreakerSnapshot> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }

    /// Restore breakers from a snapshot map, creating missing ones.
    pub fn restore(&self, snapshots: &HashMap<String, BreakerSnapshot>) {
        for (target, snapshot) in snapshots {
            self.breaker(target).restore(snapshot);
        }
    }
}
