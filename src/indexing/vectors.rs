//! Parallel embedding computation.
//!
//! Accepts batch tasks, runs them against the provider on a bounded pool,
//! and hands back futures. Tracks throughput over a rolling window and
//! classifies throttling from the provider's callback events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::embeddings::EmbeddingProvider;

use super::stats::RateWindow;
use super::throttle::{ThrottleDetector, ThrottlingStatus};
use super::types::{BatchResult, BatchTask, FileMetadata};

/// Snapshot of embedding performance for the progress display.
#[derive(Debug, Clone)]
pub struct VectorStats {
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub total_processing_time: Duration,
    pub average_processing_time: Duration,
    pub active_workers: usize,
    pub queue_depth: usize,
    pub embeddings_per_second: f64,
    pub throttling: ThrottlingStatus,
    pub client_wait_total: Duration,
    pub server_throttle_count: u64,
}

struct Counters {
    submitted: u64,
    completed: u64,
    failed: u64,
    total_processing: Duration,
    window: RateWindow,
}

/// Schedules batch embedding tasks on a bounded worker pool.
pub struct VectorCalculationManager {
    provider: Arc<dyn EmbeddingProvider>,
    permits: Arc<Semaphore>,
    thread_count: usize,
    cancel: CancellationToken,
    counters: Arc<Mutex<Counters>>,
    throttle: Arc<ThrottleDetector>,
    task_counter: AtomicU64,
}

impl VectorCalculationManager {
    /// `thread_count` bounds concurrent provider calls; `cancel` is the
    /// pipeline-wide cancellation flag shared with the file manager.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        thread_count: usize,
        cancel: CancellationToken,
        throttle_window: Duration,
        throughput_window: Duration,
    ) -> Arc<Self> {
        let throttle = Arc::new(ThrottleDetector::new(throttle_window));

        // The provider reports rate-limiter sleeps and server pushback
        // through this callback; the manager is the sole consumer.
        let detector = Arc::clone(&throttle);
        provider.set_throttling_callback(Box::new(move |event| detector.record(event)));

        info!(
            "Initialized vector calculation manager with {} workers for provider '{}'",
            thread_count,
            provider.provider_name()
        );

        Arc::new(Self {
            provider,
            permits: Arc::new(Semaphore::new(thread_count.max(1))),
            thread_count: thread_count.max(1),
            cancel,
            counters: Arc::new(Mutex::new(Counters {
                submitted: 0,
                completed: 0,
                failed: 0,
                total_processing: Duration::ZERO,
                window: RateWindow::new(throughput_window),
            })),
            throttle,
            task_counter: AtomicU64::new(0),
        })
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Request cancellation: queued tasks resolve as cancelled, in-flight
    /// provider calls run to completion.
    pub fn request_cancellation(&self) {
        self.cancel.cancel();
        info!("Vector calculation cancellation requested");
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Submit a batch for embedding. Never blocks: the returned handle
    /// resolves to the batch result, a cancelled result if cancellation was
    /// already requested.
    pub fn submit_batch(
        self: &Arc<Self>,
        texts: &[String],
        metadata: &FileMetadata,
    ) -> JoinHandle<BatchResult> {
        let task_id = self.task_counter.fetch_add(1, Ordering::Relaxed);
        let task = BatchTask::new(task_id, texts, metadata);

        if self.cancel.is_cancelled() {
            return tokio::spawn(async move { BatchResult::cancelled(&task) });
        }

        {
            let mut counters = self.lock_counters();
            counters.submitted += 1;
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.run_task(task).await })
    }

    async fn run_task(&self, task: BatchTask) -> BatchResult {
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                self.record_completion(Duration::ZERO, true);
                return BatchResult::cancelled(&task);
            }
        };

        // Tasks that were queued when the flag went up resolve here; a task
        // past this point always finishes its provider call.
        if self.cancel.is_cancelled() {
            self.record_completion(Duration::ZERO, true);
            return BatchResult::cancelled(&task);
        }

        let started = Instant::now();
        match self.provider.embed(task.texts()).await {
            Ok(embeddings) if embeddings.len() == task.texts().len() => {
                let elapsed = started.elapsed();
                self.record_completion(elapsed, false);
                debug!(
                    "Embedded batch {} ({} texts) in {:.2}s",
                    task.task_id(),
                    task.texts().len(),
                    elapsed.as_secs_f64()
                );
                BatchResult::ok(&task, embeddings, elapsed)
            }
            Ok(embeddings) => {
                let elapsed = started.elapsed();
                self.record_completion(elapsed, true);
                let message = format!(
                    "provider returned {} embeddings for {} texts",
                    embeddings.len(),
                    task.texts().len()
                );
                error!("Batch {} failed: {}", task.task_id(), message);
                BatchResult::err(&task, message, elapsed)
            }
            Err(e) => {
                let elapsed = started.elapsed();
                self.record_completion(elapsed, true);
                error!("Batch {} failed: {:#}", task.task_id(), e);
                BatchResult::err(&task, format!("{:#}", e), elapsed)
            }
        }
    }

    fn record_completion(&self, processing: Duration, failed: bool) {
        let mut counters = self.lock_counters();
        counters.completed += 1;
        if failed {
            counters.failed += 1;
        } else {
            counters.total_processing += processing;
        }
        let completed = counters.completed;
        counters.window.record(completed);
    }

    /// Current performance snapshot, including throttling classification.
    pub fn stats(&self) -> VectorStats {
        let mut counters = self.lock_counters();
        let in_flight = (counters.submitted - counters.completed) as usize;
        let succeeded = counters.completed - counters.failed;
        let average = if succeeded > 0 {
            counters.total_processing / succeeded as u32
        } else {
            Duration::ZERO
        };
        let embeddings_per_second = counters.window.rate();
        let (client_wait_total, server_throttle_count) = self.throttle.totals();

        VectorStats {
            tasks_submitted: counters.submitted,
            tasks_completed: counters.completed,
            tasks_failed: counters.failed,
            total_processing_time: counters.total_processing,
            average_processing_time: average,
            active_workers: in_flight.min(self.thread_count),
            queue_depth: in_flight,
            embeddings_per_second,
            throttling: self.throttle.classify(),
            client_wait_total,
            server_throttle_count,
        }
    }

    /// Wait until every submitted task has completed, up to `timeout`.
    pub async fn wait_for_all_tasks(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.stats().queue_depth == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    fn lock_counters(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
