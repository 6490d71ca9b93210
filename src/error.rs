//! Typed errors for the places where callers branch on the failure kind.
//!
//! Application plumbing (CLI, config, ingestion internals) uses
//! [`anyhow::Result`]; these enums exist for the LLM call path, the job
//! store, and the ingestion boundary of the orchestrator.

use thiserror::Error;

/// Failures surfaced by the [`ResilientInvoker`](crate::invoker::ResilientInvoker).
///
/// Rate-limit and authentication failures never appear here directly: they
/// are absorbed by rotation and retry, and only show up as
/// [`LlmError::ExhaustedRetries`] once every attempt has been used.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The credential pool is empty.
    #[error("no LLM API keys configured (set {env_var} to a comma-separated list)")]
    Configuration { env_var: String },

    /// Every attempt failed with a rate-limit or authentication error.
    #[error("max retries exceeded after {attempts} attempts; all API keys might be exhausted")]
    ExhaustedRetries { attempts: u32 },

    /// A non-retryable failure from the unit of work, propagated as-is.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Failures from the [`JobStore`](crate::store::JobStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no job registered for '{0}'")]
    NotFound(String),

    /// The job was resubmitted; this run no longer owns the record.
    #[error("job '{0}' was superseded by a newer submission")]
    Superseded(String),

    #[error("job '{id}' still has unresolved fields: {}", fields.join(", "))]
    Unresolved { id: String, fields: Vec<&'static str> },
}

/// Ingestion failed; fatal to the whole job.
#[derive(Debug, Error)]
#[error("ingestion failed for {url}: {source:#}")]
pub struct IngestionError {
    pub url: String,
    #[source]
    pub source: anyhow::Error,
}
