//! Job orchestration: cache lookup, ingestion, concurrent analyses.
//!
//! A run moves a job through `pending → processing → completed | failed`.
//! The six result fields are produced by independent tokio tasks that report
//! back over an mpsc channel; the run loop is the only writer to the
//! [`JobStore`], and it writes each field the moment its task finishes so
//! pollers see results arrive one by one.

use anyhow::Result;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::analysis::{AnalysisBackend, AnalysisKind, Analyzer};
use crate::cache::ResultCache;
use crate::config::Config;
use crate::error::{IngestionError, StoreError};
use crate::index::IndexStore;
use crate::ingest::{GitIngestor, Ingestor};
use crate::invoker::ResilientInvoker;
use crate::keys::KeyRotator;
use crate::llm::http_client;
use crate::models::{repo_id_from_url, AnalysisField, Ingested, Job};
use crate::parser::parse_json_list;
use crate::store::{Generation, JobStore};

/// What a finished task hands to the writer loop.
enum Outcome {
    /// Raw LLM text, parsed or wrapped according to the field.
    Raw(String),
    /// A value ready to store as-is.
    Ready(Value),
}

type TaskResult = (AnalysisField, Result<Outcome, String>);

#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<JobStore>,
    cache: Arc<ResultCache>,
    ingestor: Arc<dyn Ingestor>,
    analyses: Arc<dyn AnalysisBackend>,
    commit_limit: usize,
}

impl Orchestrator {
    pub fn new(
        store: Arc<JobStore>,
        cache: Arc<ResultCache>,
        ingestor: Arc<dyn Ingestor>,
        analyses: Arc<dyn AnalysisBackend>,
        commit_limit: usize,
    ) -> Self {
        Self {
            store,
            cache,
            ingestor,
            analyses,
            commit_limit,
        }
    }

    /// Production wiring: git ingestion, the in-process index, and the
    /// chat-completions backend with keys from the environment.
    pub fn from_config(config: &Config) -> Result<Self> {
        let keys = Arc::new(KeyRotator::from_env(&config.llm.api_keys_env));
        let invoker =
            ResilientInvoker::new(keys, config.llm.max_retries, config.llm.retry_pause());
        let http = http_client(&config.llm)?;

        let index = Arc::new(IndexStore::new());
        let ingestor = Arc::new(GitIngestor::new(config.ingest.clone(), index.clone()));
        let analyses = Arc::new(Analyzer::new(index, invoker, config.llm.clone(), http));

        Ok(Self::new(
            Arc::new(JobStore::new()),
            Arc::new(ResultCache::new(&config.cache.dir)),
            ingestor,
            analyses,
            config.ingest.commit_limit,
        ))
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn analyses(&self) -> &Arc<dyn AnalysisBackend> {
        &self.analyses
    }

    /// Register a `pending` job for `url` and start it in the background.
    ///
    /// Returns the repository id immediately. Fails only when no id can be
    /// derived from the URL.
    pub fn submit(&self, url: &str, branch: Option<String>) -> Result<String> {
        let repo_id = repo_id_from_url(url)
            .ok_or_else(|| anyhow::anyhow!("cannot derive a repository id from '{}'", url))?;

        let generation = self.store.register(&repo_id);
        tracing::info!(repo_id = %repo_id, url, "analysis submitted");

        let this = self.clone();
        let id = repo_id.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            this.run(&id, generation, &url, branch.as_deref()).await;
        });

        Ok(repo_id)
    }

    /// Drive one job to a terminal state. Never returns an error: every
    /// failure ends up on the job record. A run whose `generation` has been
    /// superseded by a resubmission stops writing and caches nothing.
    pub async fn run(&self, repo_id: &str, generation: Generation, url: &str, branch: Option<&str>) {
        match self.drive(repo_id, generation, url, branch).await {
            Ok(()) => {}
            Err(StoreError::Superseded(_)) => {
                tracing::info!(repo_id, "run superseded by a newer submission; results discarded");
            }
            Err(e) => tracing::error!(repo_id, error = %e, "could not record job outcome"),
        }
    }

    async fn drive(
        &self,
        repo_id: &str,
        generation: Generation,
        url: &str,
        branch: Option<&str>,
    ) -> Result<(), StoreError> {
        if let Some(job) = self.cache.load(repo_id) {
            tracing::info!(repo_id, "serving cached results");
            return self.store.restore(repo_id, generation, job);
        }

        self.store.begin(repo_id, generation)?;

        let ingested = match self.ingestor.process_repository(url, branch).await {
            Ok(ingested) => ingested,
            Err(source) => {
                let err = IngestionError {
                    url: url.to_string(),
                    source,
                };
                tracing::error!(repo_id, error = %err, "ingestion failed");
                return self.store.mark_failed(repo_id, generation, err.to_string());
            }
        };
        tracing::info!(
            repo_id,
            files = ingested.files_indexed,
            chunks = ingested.chunks_indexed,
            "repository ingested"
        );

        match self.fan_out(repo_id, generation, url, &ingested).await {
            Ok(job) => {
                tracing::info!(repo_id, "analysis completed");
                self.cache.save(repo_id, &job);
                Ok(())
            }
            Err(StoreError::Superseded(id)) => Err(StoreError::Superseded(id)),
            Err(e) => {
                tracing::error!(repo_id, error = %e, "analysis failed");
                self.store.mark_failed(repo_id, generation, e.to_string())
            }
        }
    }

    async fn fan_out(
        &self,
        repo_id: &str,
        generation: Generation,
        url: &str,
        ingested: &Ingested,
    ) -> Result<Job, StoreError> {
        let (tx, mut rx) = mpsc::channel::<TaskResult>(AnalysisField::ALL.len());

        for kind in AnalysisKind::ALL {
            let analyses = self.analyses.clone();
            let id = ingested.repo_id.clone();
            let tree = ingested.file_tree.clone();
            spawn_task(tx.clone(), kind.field(), async move {
                analyses.run(kind, &id, &tree).await.map(Outcome::Raw)
            });
        }

        let ingestor = self.ingestor.clone();
        let url = url.to_string();
        let limit = self.commit_limit;
        spawn_task(tx.clone(), AnalysisField::Commits, async move {
            let commits = ingestor.recent_commits(&url, limit).await?;
            Ok(Outcome::Ready(serde_json::to_value(commits)?))
        });
        drop(tx);

        while let Some((field, outcome)) = rx.recv().await {
            let value = match outcome {
                Ok(Outcome::Raw(text)) if field.is_json_list() => parse_json_list(&text),
                Ok(Outcome::Raw(text)) => Value::String(text),
                Ok(Outcome::Ready(value)) => value,
                Err(message) => {
                    tracing::warn!(repo_id, field = %field, error = %message, "task failed; storing default");
                    field.fallback(&message)
                }
            };
            self.store.set_field(repo_id, generation, field, value)?;
            tracing::debug!(repo_id, field = %field, "field resolved");
        }

        self.store.mark_completed(repo_id, generation)
    }
}

/// Run `fut` on its own task and report its outcome for `field`. Errors and
/// panics both become an error message.
fn spawn_task<F>(tx: mpsc::Sender<TaskResult>, field: AnalysisField, fut: F)
where
    F: Future<Output = Result<Outcome>> + Send + 'static,
{
    tokio::spawn(async move {
        let outcome = match tokio::spawn(fut).await {
            Ok(Ok(out)) => Ok(out),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(join) => Err(join_error_message(join)),
        };
        // The receiver is gone only if the run already failed.
        let _ = tx.send((field, outcome)).await;
    });
}

fn join_error_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return format!("task cancelled: {}", err);
    }
    let payload = err.into_panic();
    let detail = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    format!("task panicked: {}", detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_error_message_from_panic() {
        let err = tokio::spawn(async { panic!("boom") }).await.unwrap_err();
        assert_eq!(join_error_message(err), "task panicked: boom");

        let err = tokio::spawn(async { panic!("{} {}", "formatted", 1) })
            .await
            .unwrap_err();
        assert_eq!(join_error_message(err), "task panicked: formatted 1");
    }
}
