//! Instance selection and lifecycle: the per-component load balancer, its
//! selection strategies, the auto-scaling loop and the instance workers.

pub mod autoscaler;
pub mod balancer;
pub mod instance;
pub mod strategies;

pub use autoscaler::{evaluate as evaluate_scaling, ScalingDecision};
pub use balancer::ComponentBalancer;
pub use instance::{Instance, OperationProcessor};
