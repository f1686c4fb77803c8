//! # JobForge
//!
//! A priority- and type-aware in-process job execution engine: a
//! [`JobRegistry`] of typed handlers, a deduplicating [`PriorityQueue`]
//! with per-type concurrency slots, an [`Executor`] worker pool that
//! retries with backoff and quarantines terminal failures in a
//! [`DeadLetterQueue`], a [`Scheduler`] that synthesizes recurring work,
//! and a [`MetricsCollector`] paired with a [`PerformanceMonitor`] for
//! observability. [`Engine`] wires all of it together behind one control
//! surface.

pub mod config;
pub mod dead_letter;
pub mod engine;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod job;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod store;

pub use config::{ConfigResolver, EngineConfig, JobOverride, SchedulerConfig};
pub use dead_letter::{DeadLetterEntry, DeadLetterQueue};
pub use engine::{Engine, EngineParts, ExecutorStats, JobDetails};
pub use error::{Error, Result};
pub use executor::{Executor, ExecutorConfig};
pub use handlers::{ClosureHandler, ComposedValidator, EchoHandler, MonitoringProbeHandler};
pub use job::{
    JobContext, JobExecution, JobHandler, JobMetadata, JobPriority, JobResult, JobStatus,
    JobType, SourceMode,
};
pub use metrics::{
    ExecutionEvent, ExecutionOutcome, HealthState, JobMetrics, MetricsCollector, NullSampler,
    PerformanceAlert, PerformanceMonitor, PerformanceThresholds, SystemHealth, SystemSampler,
    SystemSnapshot,
};
pub use queue::{DedupStats, PriorityQueue};
pub use registry::JobRegistry;
pub use retry::RetryManager;
pub use store::{InMemoryStore, QueueMessage, QueueMessageFilter, QueueMessageStore, QueueMessageUpdate};

#[cfg(feature = "postgres-store")]
pub use store::postgres::PostgresStore;
