//! # Target Directory
//!
//! Registry mapping a component id to its deliverable queue handle, a health
//! score and a load severity. The output router consults it before every
//! dispatch; external health feeds push scores into it.
//!
//! Lookups for unknown ids are deliberately conservative: health reads as
//! 0.0 and load as [`BufferStatus::Emergency`], so the router treats an
//! unregistered target as undeliverable rather than healthy by accident.
//! No lock is held across a queue send; the maps only guard handle and
//! score lookups.

use crate::core::types::{BufferStatus, OperationResult};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Queue handle to a target component's bounded inbound queue.
pub type TargetChannel = mpsc::Sender<OperationResult>;

/// Thread-safe directory of routable targets.
#[derive(Default)]
pub struct TargetDirectory {
    channels: DashMap<String, TargetChannel>,
    health: DashMap<String, f64>,
}

impl TargetDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target's queue handle. Replaces any previous handle and
    /// starts the target at full health.
    pub fn register(&self, id: impl Into<String>, channel: TargetChannel) {
        let id = id.into();
        debug!(target = %id, "registered target");
        self.health.insert(id.clone(), 1.0);
        self.channels.insert(id, channel);
    }

    /// Remove a target entirely.
    pub fn unregister(&self, id: &str) {
        debug!(target = %id, "unregistered target");
        self.channels.remove(id);
        self.health.remove(id);
    }

    /// Queue handle for `id`, if registered.
    pub fn channel(&self, id: &str) -> Option<TargetChannel> {
        self.channels.get(id).map(|entry| entry.value().clone())
    }

    /// Health score in `[0, 1]`; unknown targets read as 0.0.
    pub fn health(&self, id: &str) -> f64 {
        self.health.get(id).map(|entry| *entry.value()).unwrap_or(0.0)
    }

    /// Update a target's health score, clamped to `[0, 1]`.
    /// Updates for unregistered ids are dropped.
    pub fn set_health(&self, id: &str, score: f64) {
        match self.health.get_mut(id) {
            Some(mut entry) => *entry.value_mut() = score.clamp(0.0, 1.0),
            None => debug!(target = %id, "dropped health update for unregistered target"),
        }
    }

    /// Current load severity, derived from queue occupancy.
    /// Unknown targets read as Emergency.
    pub fn load(&self, id: &str) -> BufferStatus {
        match self.channels.get(id) {
            Some(entry) => {
                let sender = entry.value();
                let max = sender.max_capacity();
                if max == 0 {
                    return BufferStatus::Emergency;
                }
                let occupied = max - sender.capacity();
                BufferStatus::from_ratio(occupied as f64 / max as f64)
            }
            None => BufferStatus::Emergency,
        }
    }

    /// All registered target ids.
    pub fn targets(&self) -> Vec<String> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_target_is_conservative() {
        let directory = TargetDirectory::new();
        assert_eq!(directory.health("ghost"), 0.0);
        assert_eq!(directory.load("ghost"), BufferStatus::Emergency);
        assert!(directory.channel("ghost").is_none());

        // A health update cannot resurrect an unregistered id.
        directory.set_health("ghost", 0.9);
        assert_eq!(directory.health("ghost"), 0.0);
    }

    #[tokio::test]
    async fn test_register_and_health_updates() {
        let directory = TargetDirectory::new();
        let (tx, _rx) = mpsc::channel(10);
        directory.register("analytics", tx);

        assert_eq!(directory.health("analytics"), 1.0);
        directory.set_health("analytics", 0.4);
        assert_eq!(directory.health("analytics"), 0.4);
        directory.set_health("analytics", 7.0);
        assert_eq!(directory.health("analytics"), 1.0);

        directory.unregister("analytics");
        assert_eq!(directory.health("analytics"), 0.0);
    }

    #[tokio::test]
    async fn test_load_tracks_occupancy() {
        let directory = TargetDirectory::new();
        let (tx, mut _rx) = mpsc::channel(10);
        directory.register("analytics", tx.clone());

        assert_eq!(directory.load("analytics"), BufferStatus::Normal);

        for _ in 0..5 {
            tx.try_send(OperationResult::from_operation(
                &crate::core::types::Operation::new("noop"),
                "source",
                true,
            ))
            .unwrap();
        }
        // 5 of 10 slots occupied.
        assert_eq!(directory.load("analytics"), BufferStatus::High);

        for _ in 0..5 {
            tx.try_send(OperationResult::from_operation(
                &crate::core::types::Operation::new("noop"),
                "source",
                true,
            ))
            .unwrap();
        }
        assert_eq!(directory.load("analytics"), BufferStatus::Emergency);
    }
}
