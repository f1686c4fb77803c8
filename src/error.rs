//! Unified error type for the job engine, using thiserror.

use thiserror::Error;

/// The unified error type for JobForge operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("job type already registered and registry is frozen: {job_type}")]
    DuplicateHandler { job_type: String },

    #[error("job type not registered: {job_type}")]
    UnregisteredJobType { job_type: String },

    #[error("no slot available for job type {job_type} within {waited_ms}ms")]
    SlotUnavailable { job_type: String, waited_ms: u64 },

    #[error("queue message store error: {message}")]
    Store {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("job {job_id} exceeded timeout of {timeout_secs}s")]
    Timeout { job_id: String, timeout_secs: u64 },

    #[error("scheduler error: {message}")]
    Scheduler { message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn store(message: impl Into<String>) -> Self {
        Error::Store {
            message: message.into(),
            source: None,
        }
    }

    pub fn store_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Store {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether this class of error is worth classifying as transient for a
    /// handler's default `should_retry` implementation (§6.2).
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Store { .. } | Error::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
