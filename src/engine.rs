//! The `Engine` aggregate: wires registry, queue, executor, scheduler,
//! metrics, and dead-letter behind the control surface named in
//! `spec.md` §6.3.
//!
//! Grounded on `job_manager.py::JobManager`: a single object holding the
//! executor, metrics collector, and performance monitor, exposing
//! `start`/`stop`/`get_executor_stats`/`get_job_metrics`/
//! `get_system_health`/`get_job_details`/`trigger_job_execution`. The
//! Python original reaches these through module-level singletons
//! (`get_executor()`, `get_metrics_collector()`); per the REDESIGN FLAGS
//! in `spec.md` §9, this crate reifies them as one aggregate constructed
//! once and passed by reference instead of package-level mutable state.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::config::{ConfigResolver, EngineConfig};
use crate::dead_letter::DeadLetterQueue;
use crate::error::{Error, Result};
use crate::executor::{Executor, ExecutorConfig};
use crate::job::{JobHandler, JobMetadata, JobPriority, JobType};
use crate::metrics::{HealthState, JobMetrics, MetricsCollector, PerformanceAlert, PerformanceMonitor, SystemHealth};
use crate::queue::{DedupStats, PriorityQueue};
use crate::registry::JobRegistry;
use crate::scheduler::Scheduler;
use crate::store::{QueueMessage, QueueMessageFilter, QueueMessageStore};

/// Snapshot returned by [`Engine::get_executor_stats`] (`spec.md` §6.3).
#[derive(Debug, Clone)]
pub struct ExecutorStats {
    pub running: bool,
    pub worker_count: usize,
    pub dead_letter_count: usize,
    pub active_jobs: HashMap<String, usize>,
    pub pending_jobs: HashMap<String, usize>,
    pub total_active: usize,
    pub total_pending: usize,
}

/// Detail view for one job type, combining its metadata with its current
/// metrics (`job_manager.py::JobManager.get_job_details`).
#[derive(Debug, Clone)]
pub struct JobDetails {
    pub metadata: JobMetadata,
    pub metrics: JobMetrics,
    pub dedup: Option<DedupStats>,
}

/// Constructor bundle so callers don't have to thread five `Arc`s through
/// `Engine::new` positionally.
pub struct EngineParts {
    pub store: Arc<dyn QueueMessageStore>,
    pub config: Arc<dyn ConfigResolver>,
    pub executor_config: ExecutorConfig,
}

impl Default for EngineParts {
    fn default() -> Self {
        Self {
            store: Arc::new(crate::store::InMemoryStore::new()),
            config: Arc::new(EngineConfig::default()),
            executor_config: ExecutorConfig::default(),
        }
    }
}

/// The engine: registry + queue + executor + scheduler + metrics + DLQ,
/// constructed once per process and shared by reference
/// (`spec.md` §9 "Global singletons" REDESIGN FLAG).
pub struct Engine {
    registry: Arc<JobRegistry>,
    queue: Arc<PriorityQueue>,
    store: Arc<dyn QueueMessageStore>,
    dead_letter: Arc<DeadLetterQueue>,
    metrics: Arc<MetricsCollector>,
    performance_monitor: PerformanceMonitor,
    executor: Arc<Executor>,
    scheduler: Arc<Scheduler>,
}

impl Engine {
    pub fn new(registry: Arc<JobRegistry>, parts: EngineParts) -> Self {
        let queue = Arc::new(PriorityQueue::new(Arc::clone(&registry)));
        let dead_letter = Arc::new(DeadLetterQueue::default());
        let metrics = Arc::new(MetricsCollector::default());

        let executor = Arc::new(Executor::new(
            Arc::clone(&registry),
            Arc::clone(&queue),
            Arc::clone(&parts.store),
            Arc::clone(&dead_letter),
            Arc::clone(&metrics),
            parts.executor_config,
        ));

        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&registry),
            Arc::clone(&queue),
            Arc::clone(&parts.store),
            parts.config,
            crate::config::SchedulerConfig::default(),
        ));

        Self {
            registry,
            queue,
            store: parts.store,
            dead_letter,
            metrics,
            performance_monitor: PerformanceMonitor::default(),
            executor,
            scheduler,
        }
    }

    /// Register a handler before the engine starts. Delegates to
    /// [`JobRegistry::register`]; callers must register every job type
    /// before calling [`Engine::start`], which freezes the registry.
    pub fn register(&self, metadata: JobMetadata, handler: Arc<dyn JobHandler>) -> Result<()> {
        self.registry.register(metadata, handler)
    }

    /// Freeze the registry, start the worker pool, and start the
    /// scheduler loop. Mirrors `job_manager.py::JobManager.start`'s
    /// sequence: validate dependencies, start the executor, then start
    /// the APScheduler loop. Worker count is fixed by the
    /// [`ExecutorConfig`] passed to [`Engine::new`].
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let unresolved = self.registry.validate_dependencies();
        if let Some(job_type) = unresolved.into_iter().next() {
            return Err(Error::UnregisteredJobType { job_type });
        }
        self.registry.freeze();

        self.executor.start();

        let scheduler = Arc::clone(&self.scheduler);
        tokio::spawn(async move {
            if let Err(e) = scheduler.run().await {
                tracing::error!(error = %e, "scheduler loop exited with error");
            }
        });

        tracing::info!("engine started");
        Ok(())
    }

    /// Stop the scheduler and await executor shutdown.
    pub async fn stop(&self) {
        self.scheduler.stop();
        self.executor.shutdown().await;
        tracing::info!("engine stopped");
    }

    /// On start, read the store for every registered type's unprocessed
    /// messages and enqueue them (`spec.md` §6.3,
    /// `executor.py::JobExecutor.enqueue_pending_jobs`).
    pub async fn enqueue_pending_jobs(&self) -> Result<u32> {
        let mut enqueued = 0u32;
        for metadata in self.registry.list_enabled() {
            let pending = self
                .store
                .list(QueueMessageFilter {
                    job_type: Some(metadata.job_type.value().to_string()),
                    processed: Some(false),
                    available_before: None,
                    limit: None,
                })
                .await?;

            for message in pending {
                match self.queue.enqueue(message).await {
                    Ok(Some(_)) => enqueued += 1,
                    Ok(None) => {}
                    Err(e) => tracing::error!(job_type = %metadata.job_type, error = %e, "failed to enqueue pending job"),
                }
            }
        }
        if enqueued > 0 {
            tracing::info!(enqueued, "pending jobs enqueue complete");
        }
        Ok(enqueued)
    }

    /// Synthesize and enqueue one message for `job_type` right now,
    /// bypassing the scheduler's timer (`spec.md` §6.3
    /// `trigger_job_execution`).
    pub async fn trigger_job(&self, job_type: impl Into<JobType>) -> Result<Option<Uuid>> {
        let job_type = job_type.into();
        let metadata = self
            .registry
            .get_metadata(&job_type)
            .ok_or_else(|| Error::UnregisteredJobType {
                job_type: job_type.value().to_string(),
            })?;

        let message = QueueMessage::new(
            job_type.value(),
            metadata.priority,
            serde_json::json!({"scheduled_execution": true, "triggered_at": chrono::Utc::now()}),
        );
        self.store.insert(message.clone()).await?;
        self.queue.enqueue(message).await
    }

    pub fn get_executor_stats(&self) -> ExecutorStats {
        let dedup = self.queue.dedup_stats();
        let mut active_jobs = HashMap::new();
        let mut pending_jobs = HashMap::new();
        let mut total_active = 0usize;
        let mut total_pending = 0usize;

        for stat in &dedup {
            active_jobs.insert(stat.job_type.value().to_string(), stat.active);
            pending_jobs.insert(stat.job_type.value().to_string(), stat.pending);
            total_active += stat.active;
            total_pending += stat.pending;
        }

        ExecutorStats {
            running: self.executor.is_running(),
            worker_count: self.executor.worker_count(),
            dead_letter_count: self.dead_letter.len(),
            active_jobs,
            pending_jobs,
            total_active,
            total_pending,
        }
    }

    pub fn get_job_metrics(&self, job_type: Option<&JobType>) -> HashMap<JobType, JobMetrics> {
        match job_type {
            Some(jt) => {
                let mut map = HashMap::new();
                map.insert(jt.clone(), self.metrics.metrics_for(jt));
                map
            }
            None => self.metrics.all_metrics(),
        }
    }

    /// Per-type issue-count health verdict (`spec.md` §4.7,
    /// `monitoring.py::MetricsCollector.get_health_status`).
    pub fn get_system_health(&self) -> SystemHealth {
        self.metrics.health()
    }

    pub fn is_healthy(&self) -> bool {
        self.get_system_health().state == HealthState::Healthy
    }

    /// Fixed-threshold alerts, a separate collaborator from
    /// [`Engine::get_system_health`] (`spec.md` §4.7,
    /// `monitoring.py::PerformanceMonitor`).
    pub fn get_performance_alerts(&self) -> Vec<PerformanceAlert> {
        self.performance_monitor.evaluate(&self.metrics.all_metrics())
    }

    /// Detailed view of one registered job type
    /// (`job_manager.py::JobManager.get_job_details`).
    pub fn get_job_details(&self, job_type: &JobType) -> Option<JobDetails> {
        let metadata = self.registry.get_metadata(job_type)?;
        let metrics = self.metrics.metrics_for(job_type);
        let dedup = self
            .queue
            .dedup_stats()
            .into_iter()
            .find(|s| &s.job_type == job_type);
        Some(JobDetails { metadata, metrics, dedup })
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<PriorityQueue> {
        &self.queue
    }

    pub fn dead_letter(&self) -> &Arc<DeadLetterQueue> {
        &self.dead_letter
    }

    pub fn store(&self) -> &Arc<dyn QueueMessageStore> {
        &self.store
    }
}
