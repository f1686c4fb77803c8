//! In-memory dead-letter quarantine (`spec.md` §4.5).
//!
//! Grounded on `executor.py::DeadLetterQueue`: a bounded map of job id to
//! its terminal failure record, with FIFO eviction once the cap is hit.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::job::JobType;

/// A permanently-failed execution, quarantined after exhausting retries.
#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub job_type: JobType,
    pub attempts: u32,
    pub last_error: String,
    pub quarantined_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Bounded FIFO quarantine. Defaults to the 1000-entry cap used by
/// `executor.py::DeadLetterQueue.__init__`.
pub struct DeadLetterQueue {
    capacity: usize,
    order: RwLock<VecDeque<Uuid>>,
    entries: RwLock<std::collections::HashMap<Uuid, DeadLetterEntry>>,
}

impl DeadLetterQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: RwLock::new(VecDeque::new()),
            entries: RwLock::new(std::collections::HashMap::new()),
        }
    }

    pub fn add(&self, entry: DeadLetterEntry) {
        let mut order = self.order.write();
        let mut entries = self.entries.write();

        if entries.len() >= self.capacity {
            if let Some(oldest) = order.pop_front() {
                entries.remove(&oldest);
                tracing::warn!(job_id = %oldest, "dead letter queue full, evicting oldest entry");
            }
        }

        tracing::error!(job_id = %entry.id, job_type = %entry.job_type, attempts = entry.attempts, "job dead-lettered");
        order.push_back(entry.id);
        entries.insert(entry.id, entry);
    }

    pub fn get(&self, id: Uuid) -> Option<DeadLetterEntry> {
        self.entries.read().get(&id).cloned()
    }

    pub fn remove(&self, id: Uuid) -> Option<DeadLetterEntry> {
        let removed = self.entries.write().remove(&id);
        if removed.is_some() {
            self.order.write().retain(|existing| *existing != id);
        }
        removed
    }

    pub fn list(&self) -> Vec<DeadLetterEntry> {
        self.order
            .read()
            .iter()
            .filter_map(|id| self.entries.read().get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(1000)
    }
}
