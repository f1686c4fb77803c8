//! Execution metrics, a bounded event log, and threshold-based health
//! derivation (`spec.md` §4.7).
//!
//! Grounded on `monitoring.py::MetricsCollector`/`PerformanceMonitor`, kept
//! as two distinct collaborators here just as in the original: a ring
//! buffer of recent execution events trimmed 20% at a time once it hits its
//! cap, per-type rolling counters with a per-type issue-count health
//! verdict (`MetricsCollector`), and a separate fixed-threshold alerting
//! pass over the same counters (`PerformanceMonitor`). `SystemMetrics`,
//! gated on `psutil` in the original, becomes an injectable
//! [`SystemSampler`] trait here so the crate never takes a hard dependency
//! on a platform-sampling library.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::job::JobType;

/// Cap on the in-memory event ring buffer, matching
/// `monitoring.py::MetricsCollector.max_events`.
const MAX_EVENTS: usize = 10_000;
/// Fraction of the buffer dropped from the front once it overflows.
const TRIM_FRACTION: f64 = 0.2;

/// A type is excluded from a health issue past its staleness window, or
/// from `MetricsCollector`'s error-rate issue, before it has run this many
/// times (`spec.md` §4.7).
const MIN_SAMPLE_FOR_ERROR_ISSUE: u64 = 10;
const ERROR_ISSUE_RATE: f64 = 0.5;
const STALE_AFTER_HOURS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success,
    Failure,
    Retried,
    DeadLettered,
}

/// A single recorded attempt, the unit stored in the ring buffer.
#[derive(Debug, Clone)]
pub struct ExecutionEvent {
    pub job_id: Uuid,
    pub job_type: JobType,
    pub outcome: ExecutionOutcome,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Rolling counters for one job type (`spec.md` §3's `JobMetrics` row).
/// Monotonic except `current_running`, which returns to zero once nothing
/// of that type is in flight.
#[derive(Debug, Clone, Default)]
pub struct JobMetrics {
    pub total_runs: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries: u64,
    pub dead_lettered: u64,
    pub total_duration_ms: u64,
    pub min_duration_ms: Option<u64>,
    pub max_duration_ms: Option<u64>,
    pub current_running: usize,
    pub max_concurrent_reached: usize,
    pub last_execution_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl JobMetrics {
    pub fn average_duration_ms(&self) -> f64 {
        if self.total_runs == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.total_runs as f64
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.total_runs == 0 {
            0.0
        } else {
            self.failures as f64 / self.total_runs as f64
        }
    }

    pub fn dead_letter_rate(&self) -> f64 {
        if self.total_runs == 0 {
            0.0
        } else {
            self.dead_lettered as f64 / self.total_runs as f64
        }
    }
}

/// Three-state health verdict (`monitoring.py
/// ::MetricsCollector.get_health_status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Verdict plus the per-type issues that produced it (`spec.md` §4.7).
#[derive(Debug, Clone)]
pub struct SystemHealth {
    pub state: HealthState,
    pub reasons: Vec<String>,
}

/// A point-in-time resource snapshot. Populated by whatever
/// [`SystemSampler`] the embedding application plugs in.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub open_file_descriptors: Option<u64>,
}

/// Pluggable system resource sampler (`SPEC_FULL.md` §C.8). The engine
/// core carries no platform-sampling dependency; embedders that want real
/// numbers provide their own implementation.
pub trait SystemSampler: Send + Sync {
    fn sample(&self) -> SystemSnapshot;
}

/// Default sampler used when nothing else is configured. Always reports
/// an empty snapshot.
pub struct NullSampler;

impl SystemSampler for NullSampler {
    fn sample(&self) -> SystemSnapshot {
        SystemSnapshot::default()
    }
}

/// Collects execution events and rolling per-type metrics, and derives a
/// per-type issue-count health verdict from them (`spec.md` §4.7).
pub struct MetricsCollector {
    events: RwLock<VecDeque<ExecutionEvent>>,
    per_type: RwLock<HashMap<JobType, JobMetrics>>,
    sampler: Box<dyn SystemSampler>,
}

impl MetricsCollector {
    pub fn new(sampler: Box<dyn SystemSampler>) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            per_type: RwLock::new(HashMap::new()),
            sampler,
        }
    }

    /// Mark one more execution of `job_type` as having started, for
    /// `current_running`/`max_concurrent_reached` tracking. Call before
    /// dispatching to a handler; [`MetricsCollector::record`] balances it
    /// once the attempt finishes.
    pub fn record_start(&self, job_type: &JobType) {
        let mut per_type = self.per_type.write();
        let entry = per_type.entry(job_type.clone()).or_default();
        entry.current_running += 1;
        entry.max_concurrent_reached = entry.max_concurrent_reached.max(entry.current_running);
    }

    /// `failures` counts every failed attempt, including ones that go on
    /// to retry — `retries`/`dead_lettered` are additional counters on top
    /// of it, not alternatives to it (`spec.md` §4.3 step 7a).
    pub fn record(&self, event: ExecutionEvent) {
        {
            let mut per_type = self.per_type.write();
            let entry = per_type.entry(event.job_type.clone()).or_default();
            entry.total_runs += 1;
            entry.total_duration_ms += event.duration_ms;
            entry.min_duration_ms = Some(match entry.min_duration_ms {
                Some(min) => min.min(event.duration_ms),
                None => event.duration_ms,
            });
            entry.max_duration_ms = Some(match entry.max_duration_ms {
                Some(max) => max.max(event.duration_ms),
                None => event.duration_ms,
            });
            entry.current_running = entry.current_running.saturating_sub(1);
            entry.last_execution_at = Some(event.recorded_at);

            match event.outcome {
                ExecutionOutcome::Success => {
                    entry.successes += 1;
                    entry.last_success_at = Some(event.recorded_at);
                }
                ExecutionOutcome::Failure => {
                    entry.failures += 1;
                    entry.last_failure_at = Some(event.recorded_at);
                }
                ExecutionOutcome::Retried => {
                    entry.failures += 1;
                    entry.retries += 1;
                    entry.last_failure_at = Some(event.recorded_at);
                }
                ExecutionOutcome::DeadLettered => {
                    entry.failures += 1;
                    entry.dead_lettered += 1;
                    entry.last_failure_at = Some(event.recorded_at);
                }
            }
        }

        let mut events = self.events.write();
        if events.len() >= MAX_EVENTS {
            let drop_count = (MAX_EVENTS as f64 * TRIM_FRACTION) as usize;
            for _ in 0..drop_count.max(1) {
                events.pop_front();
            }
            tracing::debug!(dropped = drop_count, "trimmed execution event ring buffer");
        }
        events.push_back(event);
    }

    pub fn metrics_for(&self, job_type: &JobType) -> JobMetrics {
        self.per_type.read().get(job_type).cloned().unwrap_or_default()
    }

    pub fn all_metrics(&self) -> HashMap<JobType, JobMetrics> {
        self.per_type.read().clone()
    }

    pub fn recent_events(&self, limit: usize) -> Vec<ExecutionEvent> {
        let events = self.events.read();
        events.iter().rev().take(limit).cloned().collect()
    }

    /// Per-type issue-count health verdict (`spec.md` §4.7): an issue is
    /// recorded for a type with `total>10 AND failed/total>0.5`, or whose
    /// `last_execution` is older than 2h. `healthy` with zero issues,
    /// `degraded` at 1-2, `unhealthy` at 3 or more.
    pub fn health(&self) -> SystemHealth {
        let per_type = self.per_type.read();
        let now = Utc::now();
        let mut reasons = Vec::new();

        for (job_type, metrics) in per_type.iter() {
            if metrics.total_runs > MIN_SAMPLE_FOR_ERROR_ISSUE && metrics.error_rate() > ERROR_ISSUE_RATE {
                reasons.push(format!(
                    "{job_type}: error rate {:.2} over {} runs",
                    metrics.error_rate(),
                    metrics.total_runs
                ));
            }
            if let Some(last) = metrics.last_execution_at {
                if now - last > ChronoDuration::hours(STALE_AFTER_HOURS) {
                    reasons.push(format!("{job_type}: last execution at {last} is stale"));
                }
            }
        }

        let state = match reasons.len() {
            0 => HealthState::Healthy,
            1 | 2 => HealthState::Degraded,
            _ => HealthState::Unhealthy,
        };

        SystemHealth { state, reasons }
    }

    pub fn system_snapshot(&self) -> SystemSnapshot {
        self.sampler.sample()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(Box::new(NullSampler))
    }
}

/// One threshold breach surfaced by [`PerformanceMonitor::evaluate`].
#[derive(Debug, Clone)]
pub struct PerformanceAlert {
    pub job_type: JobType,
    pub reason: String,
}

/// Tunable alert thresholds (`spec.md` §4.7).
#[derive(Debug, Clone)]
pub struct PerformanceThresholds {
    pub failure_rate: f64,
    pub avg_duration_ms: f64,
    pub dead_letter_rate: f64,
    pub min_sample: u64,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            failure_rate: 0.30,
            avg_duration_ms: 300_000.0,
            dead_letter_rate: 0.10,
            min_sample: 5,
        }
    }
}

/// A separate collaborator from [`MetricsCollector`]: evaluates the same
/// per-type counters against fixed alerting thresholds rather than the
/// issue-count health verdict (`monitoring.py::PerformanceMonitor`).
/// Types below `min_sample` total runs are excluded from every alert.
pub struct PerformanceMonitor {
    thresholds: PerformanceThresholds,
}

impl PerformanceMonitor {
    pub fn new(thresholds: PerformanceThresholds) -> Self {
        Self { thresholds }
    }

    pub fn evaluate(&self, metrics: &HashMap<JobType, JobMetrics>) -> Vec<PerformanceAlert> {
        let mut alerts = Vec::new();
        for (job_type, m) in metrics {
            if m.total_runs < self.thresholds.min_sample {
                continue;
            }
            if m.error_rate() > self.thresholds.failure_rate {
                alerts.push(PerformanceAlert {
                    job_type: job_type.clone(),
                    reason: format!(
                        "failure rate {:.2} exceeds {:.2}",
                        m.error_rate(),
                        self.thresholds.failure_rate
                    ),
                });
            }
            if m.average_duration_ms() > self.thresholds.avg_duration_ms {
                alerts.push(PerformanceAlert {
                    job_type: job_type.clone(),
                    reason: format!(
                        "average duration {:.0}ms exceeds {:.0}ms",
                        m.average_duration_ms(),
                        self.thresholds.avg_duration_ms
                    ),
                });
            }
            if m.dead_letter_rate() > self.thresholds.dead_letter_rate {
                alerts.push(PerformanceAlert {
                    job_type: job_type.clone(),
                    reason: format!(
                        "dead-letter rate {:.2} exceeds {:.2}",
                        m.dead_letter_rate(),
                        self.thresholds.dead_letter_rate
                    ),
                });
            }
        }
        alerts
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(PerformanceThresholds::default())
    }
}
