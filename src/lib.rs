//! # Topology Control
//!
//! Control plane for a multi-component service topology. Each logical
//! component gets a load balancer that spreads work across a dynamic set
//! of instances, an auto-scaler that grows and shrinks that set from
//! queue occupancy, and an output router that moves finished results to
//! the next component through decision graphs, per-target circuit
//! breakers and fallback routing.
//!
//! The crate is a library: it owns selection, scaling, routing and
//! failure handling, while the embedding application supplies the actual
//! operation processors and the component queues.

/// Error types, configuration, circuit breakers and shared data
/// structures used by every other module.
pub mod core;

/// The target directory: name to channel and health registry that the
/// router consults for every delivery.
pub mod directory;

/// Instance selection, the auto-scaling loop and instance lifecycle.
pub mod balancing;

/// Decision graphs, fallback resolution and the output router.
pub mod routing;

pub use crate::core::circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerManager};
pub use crate::core::config::{
    AutoScalingConfig, BackpressureConfig, CircuitBreakerConfig, FallbackRoutingConfig,
    LoadBalancingConfig,
};
pub use crate::core::error::{ControlPlaneError, ControlResult};
pub use crate::core::state::ControlPlaneSnapshot;
pub use crate::core::types::{
    BalancingAlgorithm, BufferStatus, FallbackStrategy, Operation, OperationResult,
};
pub use crate::balancing::{ComponentBalancer, OperationProcessor};
pub use crate::directory::TargetDirectory;
pub use crate::routing::{DecisionGraph, GraphNode, OutputRouter};
