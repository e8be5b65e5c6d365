//! Result routing: decision graphs, fallback target resolution, and the
//! output router that moves finished results to their next component.

pub mod fallback;
pub mod graph;
pub mod router;

pub use graph::{DecisionGraph, GraphNode, NextHop};
pub use router::OutputRouter;
