//! The worker pool: pulls jobs off the [`PriorityQueue`], runs them
//! through validate/execute/retry, and routes terminal failures to the
//! dead-letter queue (`spec.md` §4.3).
//!
//! Grounded on `executor.py::JobExecutor._worker`/`_execute_job`: a fixed
//! pool of loops pulling from the shared queue, each attempt timed and
//! wrapped in the same validate -> execute -> classify-failure sequence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::dead_letter::{DeadLetterEntry, DeadLetterQueue};
use crate::job::{JobContext, JobExecution, JobHandler, JobResult, JobStatus};
use crate::metrics::{ExecutionEvent, ExecutionOutcome, MetricsCollector};
use crate::queue::PriorityQueue;
use crate::registry::JobRegistry;
use crate::retry::RetryManager;
use crate::store::{QueueMessageStore, QueueMessageUpdate};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub worker_count: usize,
    /// Used when a job's metadata does not set its own `timeout_seconds`.
    pub default_timeout_seconds: Option<u64>,
    /// How long an idle worker waits before polling the queue again.
    pub idle_poll_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            default_timeout_seconds: None,
            idle_poll_interval: Duration::from_millis(50),
        }
    }
}

/// Drives the worker pool. Construct behind an `Arc` so `start` can clone
/// it into each worker's spawned task.
pub struct Executor {
    registry: Arc<JobRegistry>,
    queue: Arc<PriorityQueue>,
    store: Arc<dyn QueueMessageStore>,
    dead_letter: Arc<DeadLetterQueue>,
    metrics: Arc<MetricsCollector>,
    retry: RetryManager,
    config: ExecutorConfig,
    running: AtomicBool,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Executor {
    pub fn new(
        registry: Arc<JobRegistry>,
        queue: Arc<PriorityQueue>,
        store: Arc<dyn QueueMessageStore>,
        dead_letter: Arc<DeadLetterQueue>,
        metrics: Arc<MetricsCollector>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            queue,
            store,
            dead_letter,
            metrics,
            retry: RetryManager::new(),
            config,
            running: AtomicBool::new(false),
            handles: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn worker_count(&self) -> usize {
        self.config.worker_count
    }

    /// Spawn `config.worker_count` worker loops. Idempotent: calling
    /// `start` again while already running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(workers = self.config.worker_count, "starting executor");
        let mut handles = self.handles.lock();
        for worker_id in 0..self.config.worker_count {
            let executor = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                executor.worker_loop(worker_id).await;
            }));
        }
    }

    /// Signal every worker loop to exit after its current job, without
    /// waiting for them to finish. Use [`Executor::shutdown`] to await.
    pub fn stop(&self) {
        tracing::info!("stopping executor");
        self.running.store(false, Ordering::Release);
    }

    pub async fn shutdown(&self) {
        self.stop();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        let _ = futures::future::join_all(handles).await;
        tracing::info!("executor_stopped");
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        let worker_name = format!("worker-{worker_id}");
        while self.running.load(Ordering::Acquire) {
            match self.queue.dequeue().await {
                Some((execution, permit)) => {
                    self.run_one(execution, permit, &worker_name).await;
                }
                None => {
                    tokio::time::sleep(self.config.idle_poll_interval).await;
                }
            }
        }
    }

    async fn run_one(
        &self,
        execution: JobExecution,
        permit: tokio::sync::OwnedSemaphorePermit,
        worker_name: &str,
    ) {
        let job_id = execution.id;
        let job_type = execution.job_type.clone();
        let started = std::time::Instant::now();

        let Some(metadata) = self.registry.get_metadata(&job_type) else {
            tracing::error!(job_id = %job_id, job_type = %job_type, "no metadata for job type at execution time");
            drop(permit);
            return;
        };
        let Some(handler) = self.registry.get_handler(&job_type) else {
            tracing::error!(job_id = %job_id, job_type = %job_type, "no handler for job type at execution time");
            drop(permit);
            return;
        };

        self.metrics.record_start(&job_type);

        let ctx = JobContext {
            job_type: job_type.clone(),
            execution_id: job_id,
            attempt: execution.attempt,
            max_retries: metadata.max_retries,
            worker_name: worker_name.to_string(),
            timeout_seconds: metadata.timeout_seconds.or(self.config.default_timeout_seconds),
            priority: metadata.priority,
            message: execution.message.clone(),
            metadata: std::collections::HashMap::new(),
        };

        if !handler.validate(&ctx).await {
            tracing::warn!(job_id = %job_id, job_type = %job_type, "validation failed, not retried");
            let results = vec![JobResult::failed("validation failed")];
            self.finish_success(execution, results, permit, started).await;
            return;
        }

        let outcome = match ctx.timeout_seconds {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), handler.execute(&ctx))
                .await
                .unwrap_or_else(|_| Err(crate::error::Error::Timeout {
                    job_id: job_id.to_string(),
                    timeout_secs: secs,
                }
                .into())),
            None => handler.execute(&ctx).await,
        };

        match outcome {
            Ok(results) => self.finish_success(execution, results, permit, started).await,
            Err(error) => {
                if let Some(recovered) = handler.handle_error(&error, &ctx).await {
                    tracing::info!(job_id = %job_id, job_type = %job_type, "handler recovered from error");
                    self.finish_success(execution, recovered, permit, started).await;
                    return;
                }

                let retryable = handler.should_retry(&error, &ctx).await;
                let within_budget = self.retry.should_retry(execution.attempt, metadata.max_retries);

                if retryable && within_budget {
                    self.schedule_retry(execution, &metadata, error.to_string(), permit, started)
                        .await;
                } else {
                    self.finish_failed(execution, &metadata, error.to_string(), true, permit, started)
                        .await;
                }
            }
        }

        handler.post_execution_cleanup(&ctx, &[]).await;
    }

    async fn finish_success(
        &self,
        mut execution: JobExecution,
        results: Vec<JobResult>,
        permit: tokio::sync::OwnedSemaphorePermit,
        started: std::time::Instant,
    ) {
        let job_id = execution.id;
        execution.status = JobStatus::Completed;
        execution.completed_at = Some(chrono::Utc::now());
        execution.result = Some(results);
        self.queue.update_execution(job_id, |e| *e = execution.clone());
        self.queue.release(&execution.job_type, job_id);
        drop(permit);

        let update = QueueMessageUpdate {
            processed: Some(true),
            result: execution.result.clone(),
        };
        if let Err(e) = self.store.update(job_id, update).await {
            tracing::warn!(job_id = %job_id, error = %e, "failed to persist store message result");
        }

        self.metrics.record(ExecutionEvent {
            job_id,
            job_type: execution.job_type,
            outcome: ExecutionOutcome::Success,
            duration_ms: started.elapsed().as_millis() as u64,
            recorded_at: chrono::Utc::now(),
        });
    }

    async fn schedule_retry(
        &self,
        mut execution: JobExecution,
        metadata: &crate::job::JobMetadata,
        error_message: String,
        permit: tokio::sync::OwnedSemaphorePermit,
        started: std::time::Instant,
    ) {
        let job_id = execution.id;
        let attempt = execution.attempt;
        let retry_after = self.retry.retry_after(metadata, attempt);
        let delay = (retry_after - chrono::Utc::now()).num_seconds().max(0) as u64;

        execution.attempt += 1;
        execution.status = JobStatus::Retrying;
        execution.error = Some(error_message);
        execution.retry_after = Some(retry_after);
        self.queue.update_execution(job_id, |e| *e = execution.clone());
        self.queue.release(&execution.job_type, job_id);
        drop(permit);

        self.metrics.record(ExecutionEvent {
            job_id,
            job_type: execution.job_type.clone(),
            outcome: ExecutionOutcome::Retried,
            duration_ms: started.elapsed().as_millis() as u64,
            recorded_at: chrono::Utc::now(),
        });

        let queue = Arc::clone(&self.queue);
        let priority = metadata.priority;
        tracing::info!(job_id = %job_id, delay_seconds = delay, attempt, "scheduling retry");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(delay)).await;
            queue.requeue_for_retry(execution, priority);
        });
    }

    async fn finish_failed(
        &self,
        mut execution: JobExecution,
        metadata: &crate::job::JobMetadata,
        error_message: String,
        dead_letter_eligible: bool,
        permit: tokio::sync::OwnedSemaphorePermit,
        started: std::time::Instant,
    ) {
        let job_id = execution.id;
        execution.status = JobStatus::Failed;
        execution.completed_at = Some(chrono::Utc::now());
        execution.error = Some(error_message.clone());
        execution.result = Some(vec![JobResult::failed("job failed").with_error(&error_message)]);
        self.queue.update_execution(job_id, |e| *e = execution.clone());
        self.queue.release(&execution.job_type, job_id);
        drop(permit);

        let outcome = if dead_letter_eligible && metadata.dead_letter_enabled {
            self.dead_letter.add(DeadLetterEntry {
                id: job_id,
                job_type: execution.job_type.clone(),
                attempts: execution.attempt,
                last_error: error_message,
                quarantined_at: chrono::Utc::now(),
                payload: execution.message.payload.clone(),
            });
            self.queue.update_execution(job_id, |e| e.status = JobStatus::DeadLetter);
            ExecutionOutcome::DeadLettered
        } else {
            ExecutionOutcome::Failure
        };

        let update = QueueMessageUpdate {
            processed: Some(true),
            result: execution.result.clone(),
        };
        if let Err(e) = self.store.update(job_id, update).await {
            tracing::warn!(job_id = %job_id, error = %e, "failed to persist store message result");
        }

        self.metrics.record(ExecutionEvent {
            job_id,
            job_type: execution.job_type,
            outcome,
            duration_ms: started.elapsed().as_millis() as u64,
            recorded_at: chrono::Utc::now(),
        });
    }
}
