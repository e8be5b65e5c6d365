//! # Output Router
//!
//! Consumes finished results and moves them to their next hop. Resolution
//! order: decision graph (with sub-flows) picks the next component, the
//! target directory supplies health and load, the target's circuit breaker
//! wraps the actual delivery, and fallback routing steps in when the
//! primary is unhealthy, overloaded or fails.
//!
//! The delivery primitive is a single non-blocking enqueue onto the
//! target's bounded queue. A full queue is an immediate failure; retries
//! happen one level up, through fallback or breaker re-entry, never in
//! place.

use crate::core::circuit_breaker::CircuitBreakerManager;
use crate::core::config::{BackpressureConfig, FallbackRoutingConfig};
use crate::core::error::{ControlPlaneError, ControlResult};
use crate::core::types::{BufferStatus, OperationResult};
use crate::directory::TargetDirectory;
use crate::routing::fallback;
use crate::routing::graph::{self, DecisionGraph, NextHop};
use dashmap::DashMap;
use metrics::counter;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Flow id used when a result does not name one.
const DEFAULT_FLOW: &str = "default";

/// Routes finished results for one component.
pub struct OutputRouter {
    component: String,
    directory: Arc<TargetDirectory>,
    breakers: Arc<CircuitBreakerManager>,
    graphs: DashMap<String, Arc<DecisionGraph>>,
    default_graph: Arc<DecisionGraph>,
    fallback: FallbackRoutingConfig,
    backpressure: BackpressureConfig,
    sink: mpsc::Sender<OperationResult>,
    cancel: CancellationToken,
}

impl OutputRouter {
    /// Create a router attached to `component`.
    ///
    /// `sink` is the terminal output queue for results whose flow ends.
    pub fn new(
        component: impl Into<String>,
        directory: Arc<TargetDirectory>,
        breakers: Arc<CircuitBreakerManager>,
        fallback: FallbackRoutingConfig,
        backpressure: BackpressureConfig,
        sink: mpsc::Sender<OperationResult>,
    ) -> ControlResult<Self> {
        fallback.validate()?;
        backpressure.validate()?;
        Ok(Self {
            component: component.into(),
            directory,
            breakers,
            graphs: DashMap::new(),
            default_graph: Arc::new(DecisionGraph::terminal(DEFAULT_FLOW)),
            fallback,
            backpressure,
            sink,
            cancel: CancellationToken::new(),
        })
    }

    /// Component this router is attached to.
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Cancellation token stopping the worker loop and pending delays.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Register (or replace) the decision graph for its flow.
    pub fn register_flow(&self, graph: DecisionGraph) -> ControlResult<()> {
        graph.validate()?;
        self.graphs
            .insert(graph.flow_id.clone(), Arc::new(graph));
        Ok(())
    }

    fn graph_for(&self, flow: &str) -> Arc<DecisionGraph> {
        self.graphs
            .get(flow)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| self.default_graph.clone())
    }

    /// Route one finished result to its next hop or the terminal sink.
    pub async fn route(&self, result: OperationResult) -> ControlResult<()> {
        let flow = result
            .flow_id
            .clone()
            .unwrap_or_else(|| DEFAULT_FLOW.to_string());
        let request_id = result
            .request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        match self.resolve_next(&flow, &result.component, &result, &request_id)? {
            Some(target) => self.dispatch(result, &target).await,
            None => self.deliver_to_sink(result),
        }
    }

    /// Walk the decision graph (and any sub-flows) to the next component.
    ///
    /// Each visited flow id is recorded; re-entering one fails fast instead
    /// of recursing, so a self-referencing sub-flow cannot loop forever.
    fn resolve_next(
        &self,
        flow: &str,
        node: &str,
        result: &OperationResult,
        request_id: &str,
    ) -> ControlResult<Option<String>> {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(flow.to_string());

        let mut graph = self.graph_for(flow);
        let mut node = node.to_string();
        let mut request_id = request_id.to_string();

        loop {
            match graph::evaluate(&graph, &node, result)? {
                NextHop::Component(component) => return Ok(Some(component)),
                NextHop::EndOfFlow => return Ok(None),
                NextHop::SubFlow(sub) => {
                    if !visited.insert(sub.clone()) {
                        return Err(ControlPlaneError::GraphCycle { flow: sub });
                    }
                    request_id = format!("{request_id}:{sub}");
                    debug!(request_id = %request_id, flow = %sub, "entering sub-flow");
                    graph = self.graph_for(&sub);
                    node = graph.start_node.clone();
                }
            }
        }
    }

    fn deliver_to_sink(&self, result: OperationResult) -> ControlResult<()> {
        self.sink.try_send(result).map_err(|_| {
            counter!("router_sink_rejections").increment(1);
            ControlPlaneError::SinkFull
        })
    }

    /// Dispatch a result to `target` with gating, backpressure and
    /// breaker-wrapped delivery.
    async fn dispatch(&self, result: OperationResult, target: &str) -> ControlResult<()> {
        let health = self.directory.health(target);
        if health < self.backpressure.circuit_breaker_threshold {
            return self.handle_unhealthy(result, target, health).await;
        }

        let load = self.directory.load(target);
        if load == BufferStatus::Emergency {
            return self.handle_overloaded(result, target).await;
        }
        self.backpressure_delay(load).await;

        match self.deliver_with_breaker(&result, target).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(target = %target, error = %err, "delivery failed");
                if self.fallback.enabled {
                    self.try_fallback(&result, target).await
                } else {
                    Err(err)
                }
            }
        }
    }

    /// A target below the health threshold: fallback first, then one last
    /// breaker-wrapped attempt at the primary.
    async fn handle_unhealthy(
        &self,
        result: OperationResult,
        target: &str,
        health: f64,
    ) -> ControlResult<()> {
        warn!(target = %target, health, "target unhealthy, rerouting");
        counter!("router_unhealthy_reroutes").increment(1);

        let fallback_err = if self.fallback.enabled {
            match self.try_fallback(&result, target).await {
                Ok(()) => return Ok(()),
                Err(err) => Some(err),
            }
        } else {
            None
        };

        self.deliver_with_breaker(&result, target)
            .await
            .map_err(|retry_err| fallback_err.unwrap_or(retry_err))
    }

    /// A target at Emergency severity: fallback first, then the full
    /// backpressure delay and one last breaker-wrapped attempt.
    async fn handle_overloaded(&self, result: OperationResult, target: &str) -> ControlResult<()> {
        warn!(target = %target, "target overloaded, rerouting");
        counter!("router_overload_reroutes").increment(1);

        let fallback_err = if self.fallback.enabled {
            match self.try_fallback(&result, target).await {
                Ok(()) => return Ok(()),
                Err(err) => Some(err),
            }
        } else {
            None
        };

        self.backpressure_delay(BufferStatus::Emergency).await;
        self.deliver_with_breaker(&result, target)
            .await
            .map_err(|retry_err| fallback_err.unwrap_or(retry_err))
    }

    /// Sleep proportionally to the target's load severity. The delay races
    /// the router's cancellation token so shutdown is never held up by a
    /// pending backpressure wait.
    async fn backpressure_delay(&self, load: BufferStatus) {
        let factor = match load {
            BufferStatus::High => 0.25,
            BufferStatus::Critical => 0.5,
            BufferStatus::Emergency => 1.0,
            _ => return,
        };
        let delay = self.backpressure.base_delay.mul_f64(factor);
        self.sleep_cancellable(delay).await;
    }

    async fn sleep_cancellable(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }

    /// Single non-blocking delivery attempt, wrapped in the target's
    /// circuit breaker. A fast-fail from an open breaker never touches the
    /// target's queue.
    async fn deliver_with_breaker(
        &self,
        result: &OperationResult,
        target: &str,
    ) -> ControlResult<()> {
        let channel = self
            .directory
            .channel(target)
            .ok_or_else(|| ControlPlaneError::UnknownTarget {
                target: target.to_string(),
            })?;
        let payload = result.clone();
        let target_owned = target.to_string();

        self.breakers
            .execute_with_breaker(target, move || async move {
                channel.try_send(payload).map_err(|err| match err {
                    TrySendError::Full(_) => ControlPlaneError::QueueFull {
                        target: target_owned.clone(),
                    },
                    TrySendError::Closed(_) => ControlPlaneError::UnknownTarget {
                        target: target_owned.clone(),
                    },
                })
            })
            .await
            .map(|()| {
                counter!("router_deliveries").increment(1);
            })
    }

    /// Walk the ordered fallback candidates for `primary`.
    ///
    /// Candidates below the health threshold or at Emergency severity are
    /// skipped without consuming an attempt. The inter-attempt delay is
    /// inserted between tries, not before the first. Exhausting the list is
    /// a hard error naming the primary target.
    async fn try_fallback(&self, result: &OperationResult, primary: &str) -> ControlResult<()> {
        let candidates = fallback::resolve_candidates(&self.fallback, primary, result);
        let ordered = fallback::order_candidates(
            self.fallback.fallback_strategy,
            candidates,
            &self.directory,
        );
        let max_attempts = self
            .fallback
            .max_fallback_attempts
            .unwrap_or(ordered.len());

        let mut attempts = 0;
        for target in &ordered {
            if attempts >= max_attempts {
                break;
            }
            let health = self.directory.health(target);
            if health < self.backpressure.circuit_breaker_threshold {
                debug!(target = %target, health, "skipping unhealthy fallback candidate");
                continue;
            }
            if self.directory.load(target) == BufferStatus::Emergency {
                debug!(target = %target, "skipping overloaded fallback candidate");
                continue;
            }

            if attempts > 0 {
                self.sleep_cancellable(self.fallback.fallback_delay).await;
            }
            attempts += 1;

            match self.deliver_with_breaker(result, target).await {
                Ok(()) => {
                    counter!("router_fallback_deliveries").increment(1);
                    debug!(primary = %primary, target = %target, "fallback delivery succeeded");
                    return Ok(());
                }
                Err(err) => {
                    debug!(target = %target, error = %err, "fallback attempt failed");
                }
            }
        }

        counter!("router_fallback_exhausted").increment(1);
        Err(ControlPlaneError::FallbackExhausted {
            primary: primary.to_string(),
            attempts,
        })
    }

    /// Spawn the worker loop: consume results and route each one.
    ///
    /// Routing errors are logged and do not stop the loop; failure of one
    /// target never blocks delivery to others.
    pub fn spawn(self: Arc<Self>, mut results: mpsc::Receiver<OperationResult>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    maybe = results.recv() => match maybe {
                        Some(result) => {
                            if let Err(err) = self.route(result).await {
                                counter!("router_failures").increment(1);
                                warn!(component = %self.component, error = %err, "routing failed");
                            }
                        }
                        None => break,
                    },
                }
            }
            debug!(component = %self.component, "output router stopped");
        })
    }
}
