//! Drives recurring jobs onto the queue on a timer (`spec.md` §4.6).
//!
//! Grounded on `rustpress-jobs::scheduler::Scheduler`'s `RwLock` +
//! `AtomicBool` run-loop shape, but replaces its per-task cron
//! definitions with one timer per registered job type, gated by a
//! [`ConfigResolver`] instead of hardcoded enable flags, and replaces
//! `job_manager.py`'s hardcoded `["tweet", "discord", "stx_transfer"]`
//! message-draining list with the `SourceMode` on each job's metadata.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;

use crate::config::{ConfigResolver, SchedulerConfig};
use crate::error::Result;
use crate::job::{JobType, SourceMode};
use crate::queue::PriorityQueue;
use crate::registry::JobRegistry;
use crate::store::{QueueMessageFilter, QueueMessageStore};

struct TimerState {
    next_run: DateTime<Utc>,
}

/// Ticks every registered, enabled job type and enqueues work for it.
pub struct Scheduler {
    registry: Arc<JobRegistry>,
    queue: Arc<PriorityQueue>,
    store: Arc<dyn QueueMessageStore>,
    config: Arc<dyn ConfigResolver>,
    scheduler_config: SchedulerConfig,
    timers: RwLock<HashMap<JobType, TimerState>>,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(
        registry: Arc<JobRegistry>,
        queue: Arc<PriorityQueue>,
        store: Arc<dyn QueueMessageStore>,
        config: Arc<dyn ConfigResolver>,
        scheduler_config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            queue,
            store,
            config,
            scheduler_config,
            timers: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Drive `tick` on `scheduler_config.tick_interval_seconds` until
    /// [`Scheduler::stop`] is called.
    pub async fn run(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!("scheduler started");
        let interval = StdDuration::from_secs(self.scheduler_config.tick_interval_seconds.max(1));
        while self.running.load(Ordering::Acquire) {
            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "scheduler tick failed");
            }
            tokio::time::sleep(interval).await;
        }
        tracing::info!("scheduler stopped");
        Ok(())
    }

    /// Check every registered, enabled job type and enqueue work for the
    /// ones that are due. Returns the number of messages enqueued. Public
    /// so tests (and `Engine::enqueue_pending_jobs`, §6.3) can drive a
    /// single pass without running the full loop.
    pub async fn tick(&self) -> Result<u32> {
        let now = Utc::now();
        let due: Vec<_> = self
            .registry
            .list_all()
            .into_iter()
            .filter(|metadata| self.config.resolve_enabled(metadata.job_type.value(), metadata))
            .filter(|metadata| self.is_due(&metadata.job_type, now))
            .collect();

        let mut dispatched = 0u32;
        for metadata in due {
            self.mark_run(&metadata.job_type, &metadata, now);

            match metadata.source_mode {
                SourceMode::Timer => {
                    let message = crate::store::QueueMessage::new(
                        metadata.job_type.value(),
                        metadata.priority,
                        serde_json::json!({"scheduled_execution": true, "triggered_at": now}),
                    );
                    if let Err(e) = self.store.insert(message.clone()).await {
                        tracing::warn!(job_type = %metadata.job_type, error = %e, "failed to record synthesized tick in store");
                    }
                    match self.queue.enqueue(message).await {
                        Ok(Some(_)) => dispatched += 1,
                        Ok(None) => tracing::debug!(job_type = %metadata.job_type, "tick deduplicated"),
                        Err(e) => tracing::error!(job_type = %metadata.job_type, error = %e, "failed to enqueue scheduled tick"),
                    }
                }
                SourceMode::Store => {
                    let pending = self
                        .store
                        .list(QueueMessageFilter {
                            job_type: Some(metadata.job_type.value().to_string()),
                            processed: Some(false),
                            available_before: Some(now),
                            limit: Some(metadata.batch_size as usize),
                        })
                        .await?;

                    for message in pending {
                        match self.queue.enqueue(message).await {
                            Ok(Some(_)) => dispatched += 1,
                            Ok(None) => {}
                            Err(e) => tracing::error!(job_type = %metadata.job_type, error = %e, "failed to enqueue store-sourced message"),
                        }
                    }
                }
            }
        }

        Ok(dispatched)
    }

    /// Due if `now` has reached `next_run`, unless it's overdue by more
    /// than `misfire_grace_seconds` — a tick that late is dropped rather
    /// than dispatched, and the timer is re-armed from `now` so it doesn't
    /// keep misfiring every subsequent tick (`spec.md` §4.6).
    fn is_due(&self, job_type: &JobType, now: DateTime<Utc>) -> bool {
        let mut timers = self.timers.write();
        let state = timers.entry(job_type.clone()).or_insert_with(|| TimerState {
            next_run: now,
        });
        if now < state.next_run {
            return false;
        }
        let overdue = now - state.next_run;
        let grace = ChronoDuration::seconds(self.scheduler_config.misfire_grace_seconds as i64);
        if overdue > grace {
            tracing::warn!(
                job_type = %job_type,
                overdue_seconds = overdue.num_seconds(),
                grace_seconds = self.scheduler_config.misfire_grace_seconds,
                "tick missed its misfire grace window, dropping"
            );
            state.next_run = now;
            return false;
        }
        true
    }

    /// Reset a job's timer from `now`, not from its last scheduled
    /// `next_run`. If the process was asleep through several missed
    /// intervals, this coalesces them into the single tick that just ran
    /// instead of replaying each missed interval back to back
    /// (`SPEC_FULL.md` §C.7).
    fn mark_run(&self, job_type: &JobType, metadata: &crate::job::JobMetadata, now: DateTime<Utc>) {
        let interval = self.config.resolve_interval_seconds(job_type.value(), metadata);
        let mut timers = self.timers.write();
        timers.insert(
            job_type.clone(),
            TimerState {
                next_run: now + ChronoDuration::seconds(interval as i64),
            },
        );
    }
}
