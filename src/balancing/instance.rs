//! # Instance
//!
//! A single running instance of a logical component: a bounded inbound
//! queue, a worker task driving the (opaque) processing engine, and the
//! lock-free flags the selection hot path reads.
//!
//! The three boolean flags are independent atomics rather than fields under
//! a mutex: they are read on every selection by every producer but written
//! rarely, and the selection path must never contend on a lock.

use crate::core::error::{ControlPlaneError, ControlResult};
use crate::core::types::{Operation, OperationResult};
use async_trait::async_trait;
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Seam to the processing engine that consumes operations.
///
/// Engines are opaque to the control plane: the worker hands over an
/// operation and gets back a completion record, nothing more.
#[async_trait]
pub trait OperationProcessor: Send + Sync {
    /// Process one operation on behalf of `instance_id`.
    async fn process(&self, instance_id: &str, operation: Operation) -> OperationResult;
}

/// A running instance owned exclusively by its component balancer.
pub struct Instance {
    id: String,
    sender: mpsc::Sender<Operation>,
    queue_capacity: usize,

    // Read-hot, write-rare cross-worker signals.
    ready: AtomicBool,
    shutting_down: AtomicBool,
    processing: AtomicBool,

    submitted: AtomicU64,
    completed: AtomicU64,

    /// Externally fed capacity score in [0, 1].
    capacity_score: RwLock<f64>,

    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Instance {
    /// Create the instance and spawn its worker task.
    ///
    /// The worker loops on the bounded inbound queue and the instance's
    /// cancellation token (a child of the balancer's root token). On
    /// cancellation it drains what is already queued, finishes the in-flight
    /// operation, and exits; it never abandons accepted work on its own.
    pub fn spawn(
        id: impl Into<String>,
        queue_capacity: usize,
        processor: Arc<dyn OperationProcessor>,
        results: mpsc::Sender<OperationResult>,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        let id = id.into();
        let (tx, rx) = mpsc::channel(queue_capacity);
        let instance = Arc::new(Self {
            id,
            sender: tx,
            queue_capacity,
            ready: AtomicBool::new(true),
            shutting_down: AtomicBool::new(false),
            processing: AtomicBool::new(false),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            capacity_score: RwLock::new(1.0),
            cancel: parent.child_token(),
            worker: Mutex::new(None),
        });

        let handle = tokio::spawn(Self::worker_loop(instance.clone(), rx, processor, results));
        *instance.worker.lock() = Some(handle);
        instance
    }

    async fn worker_loop(
        instance: Arc<Instance>,
        mut rx: mpsc::Receiver<Operation>,
        processor: Arc<dyn OperationProcessor>,
        results: mpsc::Sender<OperationResult>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = instance.cancel.cancelled() => {
                    // Cancellation means "finish up": drain what is already
                    // queued before exiting.
                    while let Ok(operation) = rx.try_recv() {
                        instance.run_one(&processor, &results, operation).await;
                    }
                    break;
                }
                maybe = rx.recv() => match maybe {
                    Some(operation) => instance.run_one(&processor, &results, operation).await,
                    None => break,
                },
            }
        }
        instance.ready.store(false, Ordering::Release);
        debug!(instance = %instance.id, "instance worker exited");
    }

    async fn run_one(
        &self,
        processor: &Arc<dyn OperationProcessor>,
        results: &mpsc::Sender<OperationResult>,
        operation: Operation,
    ) {
        self.processing.store(true, Ordering::Release);
        let result = processor.process(&self.id, operation).await;
        counter!("instance_operations_processed").increment(1);

        // Forwarding blocks only on router backpressure; no lock is held.
        if results.send(result).await.is_err() {
            warn!(instance = %self.id, "results channel closed, dropping result");
        }
        self.completed.fetch_add(1, Ordering::AcqRel);
        self.processing.store(false, Ordering::Release);
    }

    /// Instance id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Non-blocking submission onto the bounded inbound queue.
    pub fn try_submit(&self, operation: Operation) -> ControlResult<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(ControlPlaneError::ShuttingDown {
                component: self.id.clone(),
            });
        }
        self.sender.try_send(operation).map_err(|_| ControlPlaneError::QueueFull {
            target: self.id.clone(),
        })?;
        self.submitted.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Eligible for selection: ready and not shutting down.
    pub fn is_candidate(&self) -> bool {
        self.ready.load(Ordering::Acquire) && !self.shutting_down.load(Ordering::Acquire)
    }

    /// Operations submitted but not yet completed.
    pub fn outstanding(&self) -> u64 {
        self.submitted
            .load(Ordering::Acquire)
            .saturating_sub(self.completed.load(Ordering::Acquire))
    }

    /// Currently queued operation count.
    pub fn queued(&self) -> usize {
        self.queue_capacity - self.sender.capacity()
    }

    /// Queue occupancy ratio in `[0, 1]`.
    pub fn occupancy(&self) -> f64 {
        self.queued() as f64 / self.queue_capacity as f64
    }

    /// Raw capacity score from the external health feed.
    pub fn capacity_score(&self) -> f64 {
        *self.capacity_score.read()
    }

    /// Update the capacity score, clamped to `[0, 1]`.
    pub fn set_capacity_score(&self, score: f64) {
        *self.capacity_score.write() = score.clamp(0.0, 1.0);
    }

    /// Available-capacity health score: the fed score discounted by how
    /// full the inbound queue is. This is what health-aware selection ranks.
    pub fn available_capacity(&self) -> f64 {
        self.capacity_score() * (1.0 - self.occupancy())
    }

    /// Whether the instance has fully quiesced: empty queue, no in-flight
    /// operation, and every accepted submission accounted for.
    pub fn is_idle(&self) -> bool {
        self.queued() == 0 && !self.processing.load(Ordering::Acquire) && self.outstanding() == 0
    }

    /// Stop accepting new work; the worker keeps draining.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.ready.store(false, Ordering::Release);
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Cancel the worker and wait for it to exit.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.await.is_err() {
                warn!(instance = %self.id, "instance worker aborted or panicked");
            }
        }
    }

    /// Abort the worker without waiting. Used when the graceful deadline
    /// has already fired.
    pub fn force_stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
            warn!(instance = %self.id, "instance force-stopped");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::time::Duration;

    /// Processor that succeeds after an optional fixed delay.
    pub struct EchoProcessor {
        pub delay: Duration,
    }

    #[async_trait]
    impl OperationProcessor for EchoProcessor {
        async fn process(&self, instance_id: &str, operation: Operation) -> OperationResult {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            OperationResult::from_operation(&operation, instance_id, true)
        }
    }

    /// Processor that never completes; used to exercise forced shutdown.
    pub struct HangingProcessor;

    #[async_trait]
    impl OperationProcessor for HangingProcessor {
        async fn process(&self, instance_id: &str, operation: Operation) -> OperationResult {
            futures::future::pending::<()>().await;
            OperationResult::from_operation(&operation, instance_id, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_submit_process_and_counters() {
        let root = CancellationToken::new();
        let (results_tx, mut results_rx) = mpsc::channel(16);
        let instance = Instance::spawn(
            "parser-0",
            8,
            Arc::new(EchoProcessor { delay: Duration::ZERO }),
            results_tx,
            &root,
        );

        instance.try_submit(Operation::new("tokenize")).unwrap();
        let result = results_rx.recv().await.unwrap();
        assert!(result.success);
        assert_eq!(result.component, "parser-0");

        // Give the counter store a beat after the forward.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(instance.outstanding(), 0);
        assert!(instance.is_idle());
        instance.stop().await;
    }

    #[tokio::test]
    async fn test_queue_full_is_synchronous_error() {
        let root = CancellationToken::new();
        let (results_tx, _results_rx) = mpsc::channel(16);
        let instance = Instance::spawn(
            "parser-0",
            2,
            Arc::new(HangingProcessor),
            results_tx,
            &root,
        );

        // One operation hangs in the processor; two more fill the queue.
        for _ in 0..3 {
            instance.try_submit(Operation::new("tokenize")).unwrap();
            // Yield so the worker task can pull the first operation into the
            // (hanging) processor before the queue is measured as full.
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        let err = instance.try_submit(Operation::new("tokenize")).unwrap_err();
        assert!(matches!(err, ControlPlaneError::QueueFull { .. }));
        instance.force_stop();
    }

    #[tokio::test]
    async fn test_shutdown_flag_rejects_submissions() {
        let root = CancellationToken::new();
        let (results_tx, _results_rx) = mpsc::channel(16);
        let instance = Instance::spawn(
            "parser-0",
            8,
            Arc::new(EchoProcessor { delay: Duration::ZERO }),
            results_tx,
            &root,
        );

        instance.begin_shutdown();
        assert!(!instance.is_candidate());
        let err = instance.try_submit(Operation::new("tokenize")).unwrap_err();
        assert!(matches!(err, ControlPlaneError::ShuttingDown { .. }));
        instance.stop().await;
    }

    #[tokio::test]
    async fn test_cancellation_drains_queued_work() {
        let root = CancellationToken::new();
        let (results_tx, mut results_rx) = mpsc::channel(16);
        let instance = Instance::spawn(
            "parser-0",
            8,
            Arc::new(EchoProcessor { delay: Duration::from_millis(5) }),
            results_tx,
            &root,
        );

        for _ in 0..4 {
            instance.try_submit(Operation::new("tokenize")).unwrap();
        }
        root.cancel();

        // All four queued operations still produce results.
        for _ in 0..4 {
            assert!(results_rx.recv().await.is_some());
        }
        instance.stop().await;
    }
}
