//! End-to-end scenarios from `spec.md` §8, run against the real
//! [`Engine`] and the in-memory [`QueueMessageStore`]. Timing-sensitive
//! assertions use short real sleeps rather than `tokio::time::pause`,
//! matching the style of the timing tests already in `src/executor.rs`.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use jobforge::{
    Engine, EngineParts, Error, ExecutorConfig, JobContext, JobHandler, JobMetadata, JobPriority,
    JobResult, JobStatus, JobType,
};

fn new_engine(executor_config: ExecutorConfig) -> Arc<Engine> {
    let registry = Arc::new(jobforge::JobRegistry::new());
    Arc::new(Engine::new(
        registry,
        EngineParts {
            executor_config,
            ..EngineParts::default()
        },
    ))
}

fn fast_executor_config(worker_count: usize) -> ExecutorConfig {
    ExecutorConfig {
        worker_count,
        default_timeout_seconds: None,
        idle_poll_interval: Duration::from_millis(5),
    }
}

struct AlwaysSucceeds;

#[async_trait]
impl JobHandler for AlwaysSucceeds {
    async fn execute(&self, _ctx: &JobContext) -> anyhow::Result<Vec<JobResult>> {
        Ok(vec![JobResult::ok("ok")])
    }
}

struct AlwaysFails {
    retryable: bool,
}

#[async_trait]
impl JobHandler for AlwaysFails {
    async fn execute(&self, _ctx: &JobContext) -> anyhow::Result<Vec<JobResult>> {
        Err(anyhow::anyhow!("handler always fails"))
    }

    async fn should_retry(&self, _error: &anyhow::Error, _ctx: &JobContext) -> bool {
        self.retryable
    }
}

struct FailsOnceThenSucceeds {
    calls: AtomicU32,
}

#[async_trait]
impl JobHandler for FailsOnceThenSucceeds {
    async fn execute(&self, _ctx: &JobContext) -> anyhow::Result<Vec<JobResult>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(anyhow::anyhow!("first attempt is transient"))
        } else {
            Ok(vec![JobResult::ok("recovered")])
        }
    }

    async fn should_retry(&self, _error: &anyhow::Error, _ctx: &JobContext) -> bool {
        true
    }
}

struct ConcurrencyTracker {
    current: AtomicUsize,
    peak: AtomicUsize,
    sleep: Duration,
}

#[async_trait]
impl JobHandler for ConcurrencyTracker {
    async fn execute(&self, _ctx: &JobContext) -> anyhow::Result<Vec<JobResult>> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.sleep).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![JobResult::ok("done")])
    }
}

struct OrderLoggingHandler {
    label: &'static str,
    sleep: Duration,
    order: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl JobHandler for OrderLoggingHandler {
    async fn execute(&self, _ctx: &JobContext) -> anyhow::Result<Vec<JobResult>> {
        self.order.lock().unwrap().push(self.label);
        if !self.sleep.is_zero() {
            tokio::time::sleep(self.sleep).await;
        }
        Ok(vec![JobResult::ok(self.label)])
    }
}

/// Scenario 1: basic run. `maxConcurrent=1, maxRetries=0, priority=NORMAL`,
/// handler returns a single successful result. Enqueue one message, expect
/// it COMPLETED with the store marked processed.
#[tokio::test]
async fn scenario_basic_run_completes_and_marks_store_processed() {
    let engine = new_engine(fast_executor_config(1));
    engine
        .register(JobMetadata::new("echo", "Echo").max_retries(0), Arc::new(AlwaysSucceeds))
        .unwrap();
    engine.start().unwrap();

    let id = engine.trigger_job("echo").await.unwrap().expect("not deduplicated");
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.stop().await;

    let execution = engine.queue().get_execution(id).unwrap();
    assert_eq!(execution.status, JobStatus::Completed);

    let message = engine.store().get(id).await.unwrap().unwrap();
    assert!(message.processed);
    let result = message.result.expect("result persisted to the store");
    assert!(result[0].success);

    let metrics = engine.get_job_metrics(Some(&JobType::get_or_create("echo")));
    let metrics = metrics.values().next().unwrap();
    assert_eq!(metrics.total_runs, 1);
    assert_eq!(metrics.successes, 1);
}

/// Scenario 2: retry then succeed. First attempt fails with a retryable
/// error, second succeeds. Expect two attempts and a COMPLETED execution.
#[tokio::test]
async fn scenario_retry_then_succeed() {
    let engine = new_engine(fast_executor_config(1));
    let mut metadata = JobMetadata::new("flaky", "Flaky").max_retries(3);
    metadata.retry_delay_seconds = 0;
    engine
        .register(metadata, Arc::new(FailsOnceThenSucceeds { calls: AtomicU32::new(0) }))
        .unwrap();
    engine.start().unwrap();

    let id = engine.trigger_job("flaky").await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    engine.stop().await;

    let execution = engine.queue().get_execution(id).unwrap();
    assert_eq!(execution.status, JobStatus::Completed);
    assert_eq!(execution.attempt, 2);

    let metrics = engine.get_job_metrics(Some(&JobType::get_or_create("flaky")));
    let metrics = metrics.values().next().unwrap();
    assert_eq!(metrics.retries, 1);
    assert_eq!(metrics.successes, 1);
}

/// Scenario 3: dead-letter. Handler always raises, `maxRetries=2`. Expect
/// three attempts, the execution DEAD_LETTER, the DLQ holding it, and the
/// store message marked processed with a failure result.
#[tokio::test]
async fn scenario_exhausted_retries_reach_dead_letter() {
    let engine = new_engine(fast_executor_config(1));
    let mut metadata = JobMetadata::new("always_fails", "Always Fails").max_retries(2);
    metadata.retry_delay_seconds = 0;
    engine
        .register(metadata, Arc::new(AlwaysFails { retryable: true }))
        .unwrap();
    engine.start().unwrap();

    let id = engine.trigger_job("always_fails").await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    engine.stop().await;

    let execution = engine.queue().get_execution(id).unwrap();
    assert_eq!(execution.status, JobStatus::DeadLetter);
    assert!(engine.dead_letter().get(id).is_some());

    let message = engine.store().get(id).await.unwrap().unwrap();
    assert!(message.processed);
    let result = message.result.expect("failure result persisted to the store");
    assert!(!result[0].success);

    let metrics = engine.get_job_metrics(Some(&JobType::get_or_create("always_fails")));
    let metrics = metrics.values().next().unwrap();
    assert_eq!(metrics.dead_lettered, 1);
    assert_eq!(metrics.failures, 3);
}

/// Scenario 4: concurrency cap. `maxConcurrent=2`, five jobs that each
/// hold their slot briefly. Peak concurrent running executions must never
/// exceed 2, and all five eventually complete.
#[tokio::test]
async fn scenario_concurrency_cap_bounds_parallel_executions() {
    let engine = new_engine(fast_executor_config(5));
    let tracker = Arc::new(ConcurrencyTracker {
        current: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
        sleep: Duration::from_millis(80),
    });
    engine
        .register(
            JobMetadata::new("bounded", "Bounded").max_concurrent(2),
            tracker.clone(),
        )
        .unwrap();
    engine.start().unwrap();

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(engine.trigger_job("bounded").await.unwrap().unwrap());
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    engine.stop().await;

    assert!(tracker.peak.load(Ordering::SeqCst) <= 2);
    for id in ids {
        let execution = engine.queue().get_execution(id).unwrap();
        assert_eq!(execution.status, JobStatus::Completed);
    }
}

/// Scenario 5: priority preemption. With a single worker, a HIGH job
/// submitted after a LOW job must still be dispatched ahead of a second
/// LOW job submitted around the same time.
#[tokio::test]
async fn scenario_high_priority_dispatches_before_low_priority() {
    let engine = new_engine(fast_executor_config(1));
    let order = Arc::new(Mutex::new(Vec::new()));

    engine
        .register(
            JobMetadata::new("low_job", "Low").priority(JobPriority::Low).max_concurrent(2),
            Arc::new(OrderLoggingHandler { label: "low", sleep: Duration::from_millis(60), order: order.clone() }),
        )
        .unwrap();
    engine
        .register(
            JobMetadata::new("high_job", "High").priority(JobPriority::High).max_concurrent(2),
            Arc::new(OrderLoggingHandler { label: "high", sleep: Duration::ZERO, order: order.clone() }),
        )
        .unwrap();
    engine.start().unwrap();

    // L occupies the single worker first.
    engine.trigger_job("low_job").await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    // While L is running, queue a second LOW and a HIGH.
    engine.trigger_job("low_job").await.unwrap();
    engine.trigger_job("high_job").await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    engine.stop().await;

    let log = order.lock().unwrap().clone();
    let high_pos = log.iter().position(|l| *l == "high").expect("high ran");
    let second_low_pos = log.iter().rposition(|l| *l == "low").expect("low ran");
    assert!(high_pos < second_low_pos, "expected high to dispatch before the second low: {log:?}");
}

/// Scenario 6: dedup under aggressive mode. A monitoring-style type with
/// `aggressive_dedup` set collapses a rapid-fire burst of submissions
/// down to a single queued/running instance.
#[tokio::test]
async fn scenario_aggressive_dedup_collapses_a_burst() {
    let engine = new_engine(fast_executor_config(1));
    engine
        .register(
            JobMetadata::new("chain_monitor", "Chain Monitor").aggressive_dedup(),
            Arc::new(AlwaysSucceeds),
        )
        .unwrap();

    let mut accepted = 0;
    for _ in 0..5 {
        if engine.trigger_job("chain_monitor").await.unwrap().is_some() {
            accepted += 1;
        }
    }

    assert_eq!(accepted, 1, "only the first of a rapid burst should be admitted");
}

/// Boundary: `maxRetries=0` means a single attempt, then straight to
/// dead-letter on any failure.
#[tokio::test]
async fn boundary_zero_max_retries_dead_letters_after_one_attempt() {
    let engine = new_engine(fast_executor_config(1));
    engine
        .register(
            JobMetadata::new("no_retry", "No Retry").max_retries(0),
            Arc::new(AlwaysFails { retryable: true }),
        )
        .unwrap();
    engine.start().unwrap();

    let id = engine.trigger_job("no_retry").await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.stop().await;

    let execution = engine.queue().get_execution(id).unwrap();
    assert_eq!(execution.status, JobStatus::DeadLetter);
    assert_eq!(execution.attempt, 1);
}

/// `triggerJob` against an unregistered type fails fast with
/// `UnregisteredJobType` rather than silently no-op'ing.
#[tokio::test]
async fn unregistered_job_type_is_rejected_at_trigger_time() {
    let engine = new_engine(fast_executor_config(1));
    let err = engine.trigger_job("never_registered").await.unwrap_err();
    assert!(matches!(err, Error::UnregisteredJobType { .. }));
}
