//! Core building blocks: typed errors and the recovery taxonomy,
//! configuration surface, shared data types, the per-target circuit breaker
//! and the persisted-state snapshot shapes.

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod state;
pub mod types;
