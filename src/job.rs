//! Core job vocabulary: interned job types, priorities, metadata, the
//! handler trait, and the context handed to a handler on each attempt.
//!
//! Grounded on `app/services/infrastructure/job_management/base.py`
//! (`JobType`, `JobContext`, `BaseTask`) and `decorators.py`
//! (`JobPriority`, `JobMetadata`) from the original Python service, recast
//! as an interned newtype and a trait instead of a runtime-patched class
//! hierarchy (see REDESIGN FLAGS in `spec.md` §9).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::store::QueueMessage;

/// Process-wide intern table for [`JobType`]. Created lazily, never
/// destroyed, per the data model in `spec.md` §3.
static JOB_TYPE_TABLE: Lazy<DashMap<String, JobType>> = Lazy::new(DashMap::new);

/// An interned identifier for a class of work.
///
/// Equality and hashing are by the lowercase string value. There is no
/// hardcoded enum of job types — any string can be registered at runtime,
/// mirroring the original's `JobType.get_or_create`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct JobType(Arc<str>);

impl JobType {
    /// Look up or intern a job type by its string value (case-insensitive).
    pub fn get_or_create(value: impl AsRef<str>) -> Self {
        let lower = value.as_ref().to_lowercase();
        if let Some(existing) = JOB_TYPE_TABLE.get(&lower) {
            return existing.clone();
        }
        let job_type = JobType(Arc::from(lower.as_str()));
        JOB_TYPE_TABLE
            .entry(lower)
            .or_insert_with(|| job_type.clone());
        job_type
    }

    /// The interned lowercase value, e.g. `"chain_state_monitor"`.
    pub fn value(&self) -> &str {
        &self.0
    }

    /// Upper-cased display form, e.g. `"CHAIN_STATE_MONITOR"`.
    pub fn name(&self) -> String {
        self.0.to_uppercase()
    }

    /// All job types interned so far, across the whole process.
    pub fn list_all() -> Vec<JobType> {
        JOB_TYPE_TABLE.iter().map(|e| e.value().clone()).collect()
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JobType({})", self.0)
    }
}

impl From<&str> for JobType {
    fn from(value: &str) -> Self {
        JobType::get_or_create(value)
    }
}

impl From<String> for JobType {
    fn from(value: String) -> Self {
        JobType::get_or_create(value)
    }
}

/// Execution priority. Variants are declared in ascending order so that
/// `JobPriority::descending()` (used by the dequeue loop, §4.2) can walk
/// `CRITICAL -> LOW` with a plain `.rev()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low = 1,
    Normal = 2,
    Medium = 3,
    High = 4,
    Critical = 5,
}

impl JobPriority {
    /// All five bands, `CRITICAL` first — the dequeue scan order in §4.2.
    pub fn descending() -> [JobPriority; 5] {
        [
            JobPriority::Critical,
            JobPriority::High,
            JobPriority::Medium,
            JobPriority::Normal,
            JobPriority::Low,
        ]
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobPriority::Low => "low",
            JobPriority::Normal => "normal",
            JobPriority::Medium => "medium",
            JobPriority::High => "high",
            JobPriority::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Where the scheduler should look for work on a tick for this job type
/// (`spec.md` §9 Open Questions: generalization of the hardcoded
/// `tweet|discord|stx_transfer` draining list in `job_manager.py`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// Synthesize a fresh message on every tick.
    Timer,
    /// Only enqueue when the store has an unprocessed message of this type.
    Store,
}

/// Declarative descriptor for a job class. Registered once at startup and
/// immutable thereafter (`spec.md` §3, §4.1).
#[derive(Debug, Clone)]
pub struct JobMetadata {
    pub job_type: JobType,
    pub name: String,
    pub description: String,
    pub version: String,

    pub enabled: bool,
    pub interval_seconds: u64,
    pub source_mode: SourceMode,
    pub priority: JobPriority,

    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub timeout_seconds: Option<u64>,

    pub max_concurrent: usize,
    pub batch_size: u32,

    pub requires_wallet: bool,
    pub requires_twitter: bool,
    pub requires_discord: bool,
    pub requires_blockchain: bool,
    pub requires_ai: bool,
    pub dependencies: Vec<String>,

    pub dead_letter_enabled: bool,
    pub preserve_order: bool,
    pub idempotent: bool,

    /// Aggressive stacking prevention: reject a new enqueue outright while
    /// any pending or active execution of this type already exists,
    /// regardless of payload. Intended for continuously-ticking monitoring
    /// jobs where a second in-flight instance is pure waste rather than a
    /// correctness problem (`spec.md` §4.2's dedup policy).
    pub aggressive_dedup: bool,

    pub config_overrides: HashMap<String, serde_json::Value>,
}

impl JobMetadata {
    /// Start a builder-style metadata record for `job_type`. Every field
    /// besides `job_type`/`name` takes a sensible default so callers only
    /// spell out what differs, matching the teacher's builder methods
    /// (`queue.rs::with_tenant`, `scheduler.rs::with_check_interval`).
    pub fn new(job_type: impl Into<JobType>, name: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            name: name.into(),
            description: String::new(),
            version: "1.0.0".to_string(),
            enabled: true,
            interval_seconds: 60,
            source_mode: SourceMode::Timer,
            priority: JobPriority::Normal,
            max_retries: 3,
            retry_delay_seconds: 30,
            timeout_seconds: None,
            max_concurrent: 1,
            batch_size: 10,
            requires_wallet: false,
            requires_twitter: false,
            requires_discord: false,
            requires_blockchain: false,
            requires_ai: false,
            dependencies: Vec::new(),
            dead_letter_enabled: true,
            preserve_order: false,
            idempotent: false,
            aggressive_dedup: false,
            config_overrides: HashMap::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn interval_seconds(mut self, seconds: u64) -> Self {
        self.interval_seconds = seconds;
        self
    }

    pub fn source_mode(mut self, mode: SourceMode) -> Self {
        self.source_mode = mode;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retry_delay_seconds(mut self, seconds: u64) -> Self {
        self.retry_delay_seconds = seconds;
        self
    }

    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    /// Mark this job type for aggressive, stacking-preventing deduplication
    /// (the "monitoring job" dedup policy in `spec.md` §4.2).
    pub fn aggressive_dedup(mut self) -> Self {
        self.aggressive_dedup = true;
        self
    }
}

/// Runtime status of a [`JobExecution`] (`spec.md` §3, invariant 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Retrying,
    DeadLetter,
}

/// Context handed to a handler for a single attempt (`spec.md` §4.3 step 2).
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_type: JobType,
    pub execution_id: Uuid,
    pub attempt: u32,
    pub max_retries: u32,
    pub worker_name: String,
    pub timeout_seconds: Option<u64>,
    pub priority: JobPriority,
    pub message: QueueMessage,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Outcome of one unit of work performed by a handler (`spec.md` §6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "serde_json::Value::is_null", default)]
    pub data: serde_json::Value,
}

impl JobResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn with_error(mut self, error: impl std::fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Polymorphic unit of work bound to a [`JobType`] (`spec.md` §6.2).
///
/// Grounded on `BaseTask` in `base.py`: `validate` gates execution,
/// `execute` does the work, `should_retry` classifies a failure, and
/// `handle_error`/`post_execution_cleanup` give a handler a last chance at
/// recovery and best-effort teardown. All but `execute` have defaults.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Cheap pre-flight check. A `false` return short-circuits with a
    /// single failed [`JobResult`] and is not retried (§4.3 step 4).
    async fn validate(&self, _ctx: &JobContext) -> bool {
        true
    }

    /// The unit of work.
    async fn execute(&self, ctx: &JobContext) -> anyhow::Result<Vec<JobResult>>;

    /// Opt-in classification of whether an execution error is worth
    /// retrying. Defaults to transient I/O errors only, mirroring
    /// `BaseTask._should_retry_on_error`'s `ConnectionError`/`TimeoutError`
    /// default.
    async fn should_retry(&self, error: &anyhow::Error, _ctx: &JobContext) -> bool {
        error
            .downcast_ref::<Error>()
            .map(Error::is_transient)
            .unwrap_or(false)
    }

    /// Last-chance recovery. Returning `Some(results)` overrides the
    /// default failure path and is treated as if `execute` had returned
    /// those results.
    async fn handle_error(
        &self,
        _error: &anyhow::Error,
        _ctx: &JobContext,
    ) -> Option<Vec<JobResult>> {
        None
    }

    /// Best-effort cleanup; failures are logged at WARN and discarded
    /// (`spec.md` §7).
    async fn post_execution_cleanup(&self, _ctx: &JobContext, _results: &[JobResult]) {}
}

/// Runtime shadow of a [`QueueMessage`] while the engine owns it
/// (`spec.md` §3).
#[derive(Debug, Clone)]
pub struct JobExecution {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub attempt: u32,
    pub max_attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_after: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<Vec<JobResult>>,
    pub message: QueueMessage,
}

impl JobExecution {
    pub fn new(message: QueueMessage, job_type: JobType, max_attempts: u32) -> Self {
        Self {
            id: message.id,
            job_type,
            status: JobStatus::Pending,
            attempt: 1,
            max_attempts,
            started_at: None,
            completed_at: None,
            retry_after: None,
            error: None,
            result: None,
            message,
        }
    }
}
