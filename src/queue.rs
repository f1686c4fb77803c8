//! The priority queue: five bounded FIFO bands, per-type concurrency
//! slots, and the two-stage deduplication policy (`spec.md` §4.2).
//!
//! Grounded on `executor.py::PriorityQueue` (one `asyncio.Queue` per
//! priority, `active`/`pending` id sets, per-type locks and semaphores),
//! recast onto `tokio::sync::Semaphore` for slots and `dashmap::DashMap`
//! for per-type state instead of a module-level dict of asyncio
//! primitives.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};
use crate::job::{JobExecution, JobPriority, JobStatus, JobType};
use crate::registry::JobRegistry;
use crate::store::QueueMessage;

/// Per-job-type concurrency and dedup bookkeeping. One instance is
/// created lazily the first time a job type is enqueued.
struct TypeState {
    semaphore: Arc<Semaphore>,
    enqueue_lock: AsyncMutex<()>,
    pending_ids: Mutex<HashSet<uuid::Uuid>>,
    active_ids: Mutex<HashSet<uuid::Uuid>>,
}

impl TypeState {
    fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            enqueue_lock: AsyncMutex::new(()),
            pending_ids: Mutex::new(HashSet::new()),
            active_ids: Mutex::new(HashSet::new()),
        }
    }
}

/// Snapshot of dedup-relevant counters for one job type, surfaced through
/// `Engine::get_executor_stats` (`SPEC_FULL.md` §C.1).
#[derive(Debug, Clone)]
pub struct DedupStats {
    pub job_type: JobType,
    pub pending: usize,
    pub active: usize,
    pub aggressive: bool,
}

/// Priority-ordered, type-concurrency-limited, deduplicating job queue.
pub struct PriorityQueue {
    registry: Arc<JobRegistry>,
    bands: DashMap<u8, Mutex<VecDeque<uuid::Uuid>>>,
    executions: DashMap<uuid::Uuid, JobExecution>,
    type_states: DashMap<JobType, Arc<TypeState>>,
    depth: AtomicUsize,
}

impl PriorityQueue {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        let bands = DashMap::new();
        for priority in JobPriority::descending() {
            bands.insert(priority as u8, Mutex::new(VecDeque::new()));
        }
        Self {
            registry,
            bands,
            executions: DashMap::new(),
            type_states: DashMap::new(),
            depth: AtomicUsize::new(0),
        }
    }

    fn type_state(&self, job_type: &JobType, max_concurrent: usize) -> Arc<TypeState> {
        self.type_states
            .entry(job_type.clone())
            .or_insert_with(|| Arc::new(TypeState::new(max_concurrent)))
            .clone()
    }

    /// Admit a message into the queue, or skip it as a duplicate.
    /// Returns `Ok(None)` when the message was deduplicated away.
    pub async fn enqueue(&self, message: QueueMessage) -> Result<Option<uuid::Uuid>> {
        let job_type = message.job_type_ref();
        let metadata = self
            .registry
            .get_metadata(&job_type)
            .ok_or_else(|| Error::UnregisteredJobType {
                job_type: job_type.value().to_string(),
            })?;

        let state = self.type_state(&job_type, metadata.max_concurrent);
        let _enqueue_guard = state.enqueue_lock.lock().await;

        // Only monitoring-style types with `aggressiveDeduplication` ever
        // get deduplicated (`spec.md` §4.2's `shouldDeduplicate`); every
        // other job type always returns `false` here, even for identical
        // payloads.
        let duplicate = metadata.aggressive_dedup
            && (!state.pending_ids.lock().is_empty() || !state.active_ids.lock().is_empty());

        if duplicate {
            tracing::debug!(job_type = %job_type, "enqueue deduplicated");
            return Ok(None);
        }

        let execution = JobExecution::new(message, job_type.clone(), metadata.max_retries + 1);
        let id = execution.id;

        state.pending_ids.lock().insert(id);
        self.executions.insert(id, execution);

        let band = self
            .bands
            .get(&(metadata.priority as u8))
            .expect("all priority bands are initialized in PriorityQueue::new");
        band.lock().push_back(id);
        self.depth.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(job_id = %id, job_type = %job_type, priority = %metadata.priority, "enqueued");
        Ok(Some(id))
    }

    /// Pop the next runnable job, scanning bands `CRITICAL -> LOW`
    /// (`spec.md` §4.2). Within a band, the first id whose type currently
    /// has a free concurrency slot wins; ids it steps over are left in
    /// place for the next call. Returns the execution plus the semaphore
    /// permit the caller must hold for the duration of the attempt.
    pub async fn dequeue(&self) -> Option<(JobExecution, OwnedSemaphorePermit)> {
        for priority in JobPriority::descending() {
            let band = self.bands.get(&(priority as u8))?;
            let mut deque = band.lock();
            let len = deque.len();

            for _ in 0..len {
                let id = deque.pop_front()?;
                let Some(execution) = self.executions.get(&id).map(|e| e.value().clone()) else {
                    continue;
                };
                let Some(metadata) = self.registry.get_metadata(&execution.job_type) else {
                    continue;
                };
                let state = self.type_state(&execution.job_type, metadata.max_concurrent);

                let permit = match state.semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        deque.push_back(id);
                        continue;
                    }
                };

                if metadata.aggressive_dedup && !state.active_ids.lock().is_empty() {
                    drop(permit);
                    deque.push_back(id);
                    continue;
                }

                state.pending_ids.lock().remove(&id);
                state.active_ids.lock().insert(id);
                self.depth.fetch_sub(1, Ordering::Relaxed);

                let mut execution = execution;
                execution.status = JobStatus::Running;
                execution.started_at = Some(chrono::Utc::now());
                self.executions.insert(id, execution.clone());

                return Some((execution, permit));
            }
        }
        None
    }

    /// Release a job's active slot after an attempt finishes (success,
    /// terminal failure, or re-enqueue as a retry).
    pub fn release(&self, job_type: &JobType, id: uuid::Uuid) {
        if let Some(state) = self.type_states.get(job_type) {
            state.active_ids.lock().remove(&id);
        }
    }

    pub fn update_execution(&self, id: uuid::Uuid, f: impl FnOnce(&mut JobExecution)) {
        if let Some(mut entry) = self.executions.get_mut(&id) {
            f(entry.value_mut());
        }
    }

    pub fn get_execution(&self, id: uuid::Uuid) -> Option<JobExecution> {
        self.executions.get(&id).map(|e| e.value().clone())
    }

    /// Re-admit a failed execution for a retry. Always enqueues at
    /// `metadata.priority`, never the band the execution was originally
    /// popped from (binding resolution, `SPEC_FULL.md` §D).
    pub fn requeue_for_retry(&self, mut execution: JobExecution, priority: JobPriority) {
        let id = execution.id;
        execution.status = JobStatus::Pending;
        execution.started_at = None;

        if let Some(state) = self.type_states.get(&execution.job_type) {
            state.active_ids.lock().remove(&id);
            state.pending_ids.lock().insert(id);
        }

        self.executions.insert(id, execution);
        let band = self
            .bands
            .get(&(priority as u8))
            .expect("all priority bands are initialized in PriorityQueue::new");
        band.lock().push_back(id);
        self.depth.fetch_add(1, Ordering::Relaxed);
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn dedup_stats(&self) -> Vec<DedupStats> {
        self.type_states
            .iter()
            .map(|entry| {
                let job_type = entry.key().clone();
                let aggressive = self
                    .registry
                    .get_metadata(&job_type)
                    .map(|m| m.aggressive_dedup)
                    .unwrap_or(false);
                DedupStats {
                    job_type,
                    pending: entry.value().pending_ids.lock().len(),
                    active: entry.value().active_ids.lock().len(),
                    aggressive,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobContext, JobHandler, JobMetadata, JobResult};
    use async_trait::async_trait;

    struct NoopHandler;

    #[async_trait]
    impl JobHandler for NoopHandler {
        async fn execute(&self, _ctx: &JobContext) -> anyhow::Result<Vec<JobResult>> {
            Ok(vec![JobResult::ok("noop")])
        }
    }

    fn registry_with(metadata: JobMetadata) -> Arc<JobRegistry> {
        let registry = Arc::new(JobRegistry::new());
        registry.register(metadata, Arc::new(NoopHandler)).unwrap();
        registry
    }

    #[tokio::test]
    async fn enqueue_then_dequeue_round_trips() {
        let metadata = JobMetadata::new("wallet_sync", "Wallet Sync");
        let registry = registry_with(metadata.clone());
        let queue = PriorityQueue::new(registry);

        let message = QueueMessage::new("wallet_sync", JobPriority::Normal, serde_json::json!({"n": 1}));
        let id = queue.enqueue(message).await.unwrap().unwrap();

        let (execution, permit) = queue.dequeue().await.unwrap();
        assert_eq!(execution.id, id);
        assert_eq!(execution.status, JobStatus::Running);
        drop(permit);
    }

    #[tokio::test]
    async fn higher_priority_dequeues_first() {
        let registry = Arc::new(JobRegistry::new());
        registry
            .register(JobMetadata::new("low_job", "Low").priority(JobPriority::Low), Arc::new(NoopHandler))
            .unwrap();
        registry
            .register(
                JobMetadata::new("critical_job", "Critical").priority(JobPriority::Critical),
                Arc::new(NoopHandler),
            )
            .unwrap();
        let queue = PriorityQueue::new(registry);

        queue
            .enqueue(QueueMessage::new("low_job", JobPriority::Low, serde_json::json!({})))
            .await
            .unwrap();
        queue
            .enqueue(QueueMessage::new("critical_job", JobPriority::Critical, serde_json::json!({})))
            .await
            .unwrap();

        let (execution, _permit) = queue.dequeue().await.unwrap();
        assert_eq!(execution.job_type.value(), "critical_job");
    }

    #[tokio::test]
    async fn aggressive_dedup_rejects_second_enqueue_while_pending() {
        let metadata = JobMetadata::new("chain_monitor", "Chain Monitor").aggressive_dedup();
        let registry = registry_with(metadata);
        let queue = PriorityQueue::new(registry);

        let first = queue
            .enqueue(QueueMessage::new("chain_monitor", JobPriority::Normal, serde_json::json!({"t": 1})))
            .await
            .unwrap();
        assert!(first.is_some());

        let second = queue
            .enqueue(QueueMessage::new("chain_monitor", JobPriority::Normal, serde_json::json!({"t": 2})))
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn non_aggressive_type_is_never_deduplicated() {
        let metadata = JobMetadata::new("webhook_dispatch", "Webhook Dispatch");
        let registry = registry_with(metadata);
        let queue = PriorityQueue::new(registry);

        let first = queue
            .enqueue(QueueMessage::new("webhook_dispatch", JobPriority::Normal, serde_json::json!({"id": 1})))
            .await
            .unwrap();
        // Even an identical payload must be admitted: `shouldDeduplicate`
        // only ever returns true for aggressive, monitoring-style types
        // (`spec.md` §4.2).
        let second = queue
            .enqueue(QueueMessage::new("webhook_dispatch", JobPriority::Normal, serde_json::json!({"id": 1})))
            .await
            .unwrap();

        assert!(first.is_some());
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn concurrency_slot_blocks_second_dequeue_of_same_type() {
        let metadata = JobMetadata::new("single_slot_job", "Single Slot").max_concurrent(1);
        let registry = registry_with(metadata);
        let queue = PriorityQueue::new(registry);

        queue
            .enqueue(QueueMessage::new("single_slot_job", JobPriority::Normal, serde_json::json!({"a": 1})))
            .await
            .unwrap();
        queue
            .enqueue(QueueMessage::new("single_slot_job", JobPriority::Normal, serde_json::json!({"a": 2})))
            .await
            .unwrap();

        let (_execution, _permit) = queue.dequeue().await.unwrap();
        assert!(queue.dequeue().await.is_none());
    }
}
