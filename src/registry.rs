//! The job registry: the single place handlers and their metadata are
//! registered, frozen, and looked up (`spec.md` §4.1).
//!
//! Grounded on `decorators.py::JobRegistry` (a classmethod-based registry
//! keyed by job type with `_tasks`/`_metadata` dicts), recast as an
//! instance guarded by `parking_lot::RwLock` instead of class-level mutable
//! state, and on `rustpress-jobs::scheduler::Scheduler`'s
//! `RwLock<Vec<ScheduledTask>>` + `AtomicBool` freeze idiom.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::job::{JobHandler, JobMetadata, JobPriority, JobType};

struct Registration {
    metadata: JobMetadata,
    handler: Arc<dyn JobHandler>,
}

/// Holds every known job type's metadata and handler.
///
/// Registration is allowed only before [`JobRegistry::freeze`] is called;
/// after that, `register` returns [`Error::DuplicateHandler`]. This mirrors
/// the original's implicit assumption that all `@job`-decorated tasks are
/// imported before the executor starts, made explicit instead of relying
/// on import order.
pub struct JobRegistry {
    entries: RwLock<HashMap<JobType, Registration>>,
    frozen: AtomicBool,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            frozen: AtomicBool::new(false),
        }
    }

    /// Register a handler for `metadata.job_type`. Idempotent by job type:
    /// re-registering before [`JobRegistry::freeze`] overwrites the prior
    /// entry, with a warning logged on replacement, matching
    /// `JobRegistry.register`'s "last registration wins" semantics
    /// (`spec.md` §4.1). Only fails, with [`Error::DuplicateHandler`], when
    /// called after the registry has been frozen.
    pub fn register(&self, metadata: JobMetadata, handler: Arc<dyn JobHandler>) -> Result<()> {
        if self.frozen.load(Ordering::Acquire) {
            return Err(Error::DuplicateHandler {
                job_type: metadata.job_type.value().to_string(),
            });
        }
        let mut entries = self.entries.write();
        if entries.contains_key(&metadata.job_type) {
            tracing::warn!(job_type = %metadata.job_type, "replacing existing job registration");
        } else {
            tracing::info!(job_type = %metadata.job_type, "registered job type");
        }
        entries.insert(metadata.job_type.clone(), Registration { metadata, handler });
        Ok(())
    }

    /// Stop accepting new registrations. Safe to call more than once.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    pub fn get_metadata(&self, job_type: &JobType) -> Option<JobMetadata> {
        self.entries.read().get(job_type).map(|r| r.metadata.clone())
    }

    pub fn get_handler(&self, job_type: &JobType) -> Option<Arc<dyn JobHandler>> {
        self.entries.read().get(job_type).map(|r| r.handler.clone())
    }

    /// All registered, enabled job types, in no particular order.
    pub fn list_enabled(&self) -> Vec<JobMetadata> {
        self.entries
            .read()
            .values()
            .filter(|r| r.metadata.enabled)
            .map(|r| r.metadata.clone())
            .collect()
    }

    pub fn list_all(&self) -> Vec<JobMetadata> {
        self.entries.read().values().map(|r| r.metadata.clone()).collect()
    }

    /// Registered job types grouped by priority band, highest first.
    /// Grounded on `decorators.py::get_jobs_by_priority`.
    pub fn jobs_by_priority(&self) -> Vec<(JobPriority, Vec<JobMetadata>)> {
        let entries = self.entries.read();
        JobPriority::descending()
            .into_iter()
            .map(|priority| {
                let jobs = entries
                    .values()
                    .filter(|r| r.metadata.priority == priority)
                    .map(|r| r.metadata.clone())
                    .collect();
                (priority, jobs)
            })
            .collect()
    }

    /// Verify that every `dependencies` entry on every registered job names
    /// another registered job type. Grounded on
    /// `decorators.py::JobRegistry.validate_dependencies`. Returns every
    /// unresolved dependency name rather than bailing on the first one
    /// (`spec.md` §4.1: "returns a list of unresolved dependency names").
    pub fn validate_dependencies(&self) -> Vec<String> {
        let entries = self.entries.read();
        let mut issues = Vec::new();
        for registration in entries.values() {
            for dep in &registration.metadata.dependencies {
                let dep_type = JobType::get_or_create(dep);
                if !entries.contains_key(&dep_type) {
                    issues.push(dep.clone());
                }
            }
        }
        issues
    }
}
