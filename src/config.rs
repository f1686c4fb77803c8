//! Typed configuration overrides for the scheduler.
//!
//! Replaces the Python original's dynamic attribute lookup
//! (`job_manager.py::_get_job_enabled`/`_get_job_interval`, which reads
//! `getattr(config.scheduler, f"{job_type}_enabled", default)`) with an
//! explicit trait, per the REDESIGN FLAGS in `spec.md` §9: no reflection,
//! no string-built attribute names, just a lookup table checked in typed
//! code.

use std::collections::HashMap;

use crate::job::JobMetadata;

/// Per-job-type overrides an operator can supply without touching the
/// compiled-in [`JobMetadata`] defaults.
#[derive(Debug, Clone, Default)]
pub struct JobOverride {
    pub enabled: Option<bool>,
    pub interval_seconds: Option<u64>,
}

/// Resolves the effective scheduling config for a job type by layering an
/// override on top of its registered metadata. Implemented as a trait so
/// an embedder can back it with env vars, a config file, or a database
/// row instead of the in-memory map [`EngineConfig`] provides.
pub trait ConfigResolver: Send + Sync {
    fn resolve_enabled(&self, job_type: &str, metadata: &JobMetadata) -> bool;
    fn resolve_interval_seconds(&self, job_type: &str, metadata: &JobMetadata) -> u64;
}

/// Engine-wide configuration: a flat map of per-job-type overrides plus
/// the scheduler's own tunables.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub overrides: HashMap<String, JobOverride>,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the scheduler's tick loop wakes to check for due jobs.
    pub tick_interval_seconds: u64,
    /// A tick more than this many seconds late is treated as overdue and
    /// coalesced into a single run rather than run once per missed
    /// interval (`SPEC_FULL.md` §C.7).
    pub misfire_grace_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 5,
            misfire_grace_seconds: 60,
        }
    }
}

impl EngineConfig {
    pub fn set_override(&mut self, job_type: impl Into<String>, over: JobOverride) {
        self.overrides.insert(job_type.into(), over);
    }
}

impl ConfigResolver for EngineConfig {
    fn resolve_enabled(&self, job_type: &str, metadata: &JobMetadata) -> bool {
        self.overrides
            .get(job_type)
            .and_then(|o| o.enabled)
            .unwrap_or(metadata.enabled)
    }

    fn resolve_interval_seconds(&self, job_type: &str, metadata: &JobMetadata) -> u64 {
        self.overrides
            .get(job_type)
            .and_then(|o| o.interval_seconds)
            .unwrap_or(metadata.interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobType;

    #[test]
    fn override_takes_precedence_over_metadata_default() {
        let mut config = EngineConfig::default();
        config.set_override(
            "tweet_poster",
            JobOverride {
                enabled: Some(false),
                interval_seconds: Some(120),
            },
        );

        let metadata = JobMetadata::new(JobType::get_or_create("tweet_poster"), "Tweet Poster");
        assert!(!config.resolve_enabled("tweet_poster", &metadata));
        assert_eq!(config.resolve_interval_seconds("tweet_poster", &metadata), 120);
    }

    #[test]
    fn falls_back_to_metadata_when_no_override() {
        let config = EngineConfig::default();
        let metadata = JobMetadata::new(JobType::get_or_create("wallet_sync"), "Wallet Sync");
        assert!(config.resolve_enabled("wallet_sync", &metadata));
        assert_eq!(
            config.resolve_interval_seconds("wallet_sync", &metadata),
            metadata.interval_seconds
        );
    }
}
