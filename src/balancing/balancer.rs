//! # Component Balancer
//!
//! Owns the set of running instances of one logical component. Every unit
//! of work submitted to the component goes through `submit`, which selects
//! an instance with the configured algorithm and performs a non-blocking
//! enqueue. The balancer also runs the auto-scaling loop and performs
//! graceful, timeout-bounded shutdown.
//!
//! Locking policy: the instance list and weight map sit behind one
//! `parking_lot::RwLock` each; the round-robin cursor and the accepting
//! flag are atomics. No lock is ever held across a queue send or a breaker
//! call.

use crate::balancing::autoscaler::{self, ScalingDecision};
use crate::balancing::instance::{Instance, OperationProcessor};
use crate::balancing::strategies;
use crate::core::config::LoadBalancingConfig;
use crate::core::error::{ControlPlaneError, ControlResult};
use crate::core::state::BalancerSnapshot;
use crate::core::types::{Operation, OperationResult};
use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How often a draining instance is polled for idleness.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Grace period for an instance removed by scale-down to finish its queue.
const SCALE_DOWN_DRAIN_GRACE: Duration = Duration::from_secs(30);

/// Load balancer for one logical component.
pub struct ComponentBalancer {
    component: String,
    config: LoadBalancingConfig,
    processor: Arc<dyn OperationProcessor>,
    results: mpsc::Sender<OperationResult>,

    instances: RwLock<Vec<Arc<Instance>>>,
    weights: RwLock<HashMap<String, u32>>,
    weight_sum: AtomicU64,
    cursor: AtomicUsize,

    accepting: AtomicBool,
    cancel: CancellationToken,

    last_scale_up: Mutex<Option<Instant>>,
    last_scale_down: Mutex<Option<Instant>>,
    instance_seq: AtomicU64,
    scaler: Mutex<Option<JoinHandle<()>>>,
}

impl ComponentBalancer {
    /// Create a balancer, start `min_instances` instances, and start the
    /// auto-scaling loop when it is enabled.
    ///
    /// Finished results from every instance are forwarded to `results`,
    /// which is typically the inbound queue of the component's output
    /// router.
    pub fn new(
        component: impl Into<String>,
        config: LoadBalancingConfig,
        processor: Arc<dyn OperationProcessor>,
        results: mpsc::Sender<OperationResult>,
    ) -> ControlResult<Arc<Self>> {
        config.validate()?;
        config.auto_scaling.validate()?;

        let balancer = Arc::new(Self {
            component: component.into(),
            config,
            processor,
            results,
            instances: RwLock::new(Vec::new()),
            weights: RwLock::new(HashMap::new()),
            weight_sum: AtomicU64::new(0),
            cursor: AtomicUsize::new(0),
            accepting: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            last_scale_up: Mutex::new(None),
            last_scale_down: Mutex::new(None),
            instance_seq: AtomicU64::new(0),
            scaler: Mutex::new(None),
        });

        for _ in 0..balancer.config.min_instances {
            balancer.add_instance();
        }

        if balancer.config.auto_scaling.enabled {
            let handle = autoscaler::spawn(balancer.clone());
            *balancer.scaler.lock() = Some(handle);
        }

        info!(
            component = %balancer.component,
            instances = balancer.instance_count(),
            algorithm = ?balancer.config.algorithm,
            "component balancer started"
        );
        Ok(balancer)
    }

    /// Logical component id this balancer serves.
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Balancer configuration.
    pub fn config(&self) -> &LoadBalancingConfig {
        &self.config
    }

    /// Root cancellation token; instance tokens are children of it.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current instance count.
    pub fn instance_count(&self) -> usize {
        self.instances.read().len()
    }

    /// Sum of all currently-assigned instance weights.
    pub fn weight_sum(&self) -> u64 {
        self.weight_sum.load(Ordering::Acquire)
    }

    /// Submit one operation to the component.
    ///
    /// Selection failures and full-queue rejections surface synchronously;
    /// nothing is retried here. After shutdown begins every submission is
    /// rejected with a shutting-down error.
    pub fn submit(&self, operation: Operation) -> ControlResult<()> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(ControlPlaneError::ShuttingDown {
                component: self.component.clone(),
            });
        }
        let instance = self.select()?;
        instance.try_submit(operation)
    }

    /// Select an instance for the next unit of work.
    ///
    /// Candidates are instances that are ready and not shutting down; if
    /// none remain the selection fails.
    pub fn select(&self) -> ControlResult<Arc<Instance>> {
        let instances = self.instances.read();
        let candidates: Vec<Arc<Instance>> = instances
            .iter()
            .filter(|instance| instance.is_candidate())
            .cloned()
            .collect();
        drop(instances);

        let weights = self.weights.read();
        let index = strategies::select_index(
            self.config.algorithm,
            &candidates,
            &self.cursor,
            &weights,
            self.config.default_weight,
        )
        .ok_or_else(|| ControlPlaneError::NoHealthyInstances {
            component: self.component.clone(),
        })?;
        Ok(candidates[index].clone())
    }

    fn add_instance(&self) -> Arc<Instance> {
        let seq = self.instance_seq.fetch_add(1, Ordering::AcqRel);
        let id = format!("{}-{}", self.component, seq);
        let weight = self
            .config
            .instance_weights
            .get(&id)
            .copied()
            .unwrap_or(self.config.default_weight);

        let instance = Instance::spawn(
            id.clone(),
            self.config.queue_capacity,
            self.processor.clone(),
            self.results.clone(),
            &self.cancel,
        );

        self.instances.write().push(instance.clone());
        self.weights.write().insert(id.clone(), weight);
        self.weight_sum.fetch_add(weight as u64, Ordering::AcqRel);
        gauge!("balancer_instances").set(self.instance_count() as f64);
        debug!(component = %self.component, instance = %id, weight, "instance added");
        instance
    }

    /// Remove `instance` from the selectable set and drain it in the
    /// background. The instance stops accepting work immediately; its queue
    /// gets a bounded grace period to empty before the worker is stopped.
    fn retire_instance(&self, instance: Arc<Instance>) {
        {
            let mut instances = self.instances.write();
            instances.retain(|candidate| candidate.id() != instance.id());
        }
        if let Some(weight) = self.weights.write().remove(instance.id()) {
            self.weight_sum.fetch_sub(weight as u64, Ordering::AcqRel);
        }
        gauge!("balancer_instances").set(self.instance_count() as f64);

        instance.begin_shutdown();
        tokio::spawn(async move {
            let drained = drain_until_idle(&instance, SCALE_DOWN_DRAIN_GRACE).await;
            if !drained {
                warn!(instance = %instance.id(), "drain grace expired, stopping with queued work");
            }
            if tokio::time::timeout(DRAIN_POLL_INTERVAL * 10, instance.stop())
                .await
                .is_err()
            {
                instance.force_stop();
            }
        });
    }

    /// Run one scaling evaluation and apply the decision.
    ///
    /// Public so embedding applications (and tests) can drive scaling
    /// manually; the periodic loop calls this on every tick.
    pub fn scaling_tick(&self) -> ScalingDecision {
        let (avg_occupancy, count) = {
            let instances = self.instances.read();
            let active: Vec<_> = instances
                .iter()
                .filter(|instance| !instance.is_shutting_down())
                .collect();
            if active.is_empty() {
                return ScalingDecision::Hold;
            }
            let total: f64 = active.iter().map(|instance| instance.occupancy()).sum();
            (total / active.len() as f64, active.len())
        };

        let now = Instant::now();
        let decision = autoscaler::evaluate(
            avg_occupancy,
            count,
            self.config.min_instances,
            self.config.max_instances,
            &self.config.auto_scaling,
            now,
            *self.last_scale_up.lock(),
            *self.last_scale_down.lock(),
        );

        match decision {
            ScalingDecision::ScaleUp => {
                self.add_instance();
                *self.last_scale_up.lock() = Some(now);
                counter!("balancer_scale_ups").increment(1);
                info!(component = %self.component, avg_occupancy, "scaled up");
            }
            ScalingDecision::ScaleDown => {
                if let Some(least_loaded) = self.least_loaded_instance() {
                    self.retire_instance(least_loaded);
                    *self.last_scale_down.lock() = Some(now);
                    counter!("balancer_scale_downs").increment(1);
                    info!(component = %self.component, avg_occupancy, "scaled down");
                }
            }
            ScalingDecision::Hold => {}
        }
        decision
    }

    fn least_loaded_instance(&self) -> Option<Arc<Instance>> {
        let instances = self.instances.read();
        instances
            .iter()
            .filter(|instance| !instance.is_shutting_down())
            .min_by(|a, b| {
                a.occupancy()
                    .partial_cmp(&b.occupancy())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.outstanding().cmp(&b.outstanding()))
            })
            .cloned()
    }

    /// Graceful, timeout-bounded shutdown.
    ///
    /// Immediately rejects new submissions, cancels the root token (which
    /// tells every instance worker to finish up), then concurrently waits
    /// for each instance to quiesce, polling every 100 ms with half the
    /// timeout as the per-instance drain bound. A top-level timer bounds the
    /// whole operation: anything still running when it fires is
    /// force-stopped without further waiting.
    pub async fn stop(&self, timeout: Duration) -> ControlResult<()> {
        if self.accepting.swap(false, Ordering::AcqRel) {
            info!(component = %self.component, "shutdown initiated");
        }
        self.cancel.cancel();

        let scaler = self.scaler.lock().take();
        if let Some(handle) = scaler {
            handle.abort();
        }

        let instances: Vec<Arc<Instance>> = self.instances.read().clone();
        let drain_bound = timeout / 2;
        let shutdown = async {
            let drains = instances.iter().map(|instance| async {
                instance.begin_shutdown();
                drain_until_idle(instance, drain_bound).await;
                instance.stop().await;
            });
            futures::future::join_all(drains).await;
        };

        if tokio::time::timeout(timeout, shutdown).await.is_err() {
            warn!(component = %self.component, "shutdown timeout expired, force-stopping");
            for instance in &instances {
                instance.force_stop();
            }
        }

        self.instances.write().clear();
        self.weights.write().clear();
        self.weight_sum.store(0, Ordering::Release);
        gauge!("balancer_instances").set(0.0);
        info!(component = %self.component, "shutdown complete");
        Ok(())
    }

    /// Export balancer state for the external persistence collaborator.
    pub fn snapshot(&self) -> BalancerSnapshot {
        let instances = self.instances.read();
        let instance_health = instances
            .iter()
            .map(|instance| (instance.id().to_string(), instance.capacity_score()))
            .collect();
        BalancerSnapshot {
            component: self.component.clone(),
            instance_count: instances.len(),
            round_robin_index: self.cursor.load(Ordering::Acquire),
            instance_weights: self.weights.read().clone(),
            instance_health,
            since_scale_up_ms: self
                .last_scale_up
                .lock()
                .map(|at| at.elapsed().as_millis() as u64),
            since_scale_down_ms: self
                .last_scale_down
                .lock()
                .map(|at| at.elapsed().as_millis() as u64),
        }
    }

    /// Resume from a snapshot.
    ///
    /// The cursor and cooldown clocks are restored (cooldowns keep their
    /// already-elapsed time rather than restarting), health scores are
    /// re-applied where the instance id still exists, and the instance
    /// count is adjusted toward the snapshot within the configured bounds.
    pub fn restore(&self, snapshot: &BalancerSnapshot) {
        self.cursor
            .store(snapshot.round_robin_index, Ordering::Release);

        let now = Instant::now();
        *self.last_scale_up.lock() = snapshot
            .since_scale_up_ms
            .and_then(|ms| now.checked_sub(Duration::from_millis(ms)));
        *self.last_scale_down.lock() = snapshot
            .since_scale_down_ms
            .and_then(|ms| now.checked_sub(Duration::from_millis(ms)));

        let target = snapshot
            .instance_count
            .clamp(self.config.min_instances, self.config.max_instances);
        while self.instance_count() < target {
            self.add_instance();
        }
        while self.instance_count() > target {
            if let Some(least_loaded) = self.least_loaded_instance() {
                self.retire_instance(least_loaded);
            } else {
                break;
            }
        }

        let instances = self.instances.read();
        for instance in instances.iter() {
            if let Some(score) = snapshot.instance_health.get(instance.id()) {
                instance.set_capacity_score(*score);
            }
        }
    }
}

/// Poll `instance` for idleness until it quiesces or `bound` elapses.
/// Returns whether the instance went idle in time.
async fn drain_until_idle(instance: &Arc<Instance>, bound: Duration) -> bool {
    let deadline = Instant::now() + bound;
    while Instant::now() < deadline {
        if instance.is_idle() {
            return true;
        }
        tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
    }
    instance.is_idle()
}
