//! Ingestion pipeline: clone → file tree → filter → chunk → index.
//!
//! The orchestrator only sees the [`Ingestor`] trait, so tests (and other
//! deployments) can swap the git-backed pipeline for anything that yields a
//! repository id and a file-tree snapshot.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::chunk::chunk_text;
use crate::config::IngestConfig;
use crate::git;
use crate::index::IndexStore;
use crate::models::{repo_id_from_url, Chunk, Commit, Ingested};

/// Source of indexed repositories and their commit history.
#[async_trait]
pub trait Ingestor: Send + Sync {
    /// Clone, chunk and index the repository, returning its id and file tree.
    async fn process_repository(&self, url: &str, branch: Option<&str>) -> Result<Ingested>;

    /// The `limit` most recent commits of the repository.
    async fn recent_commits(&self, url: &str, limit: usize) -> Result<Vec<Commit>>;
}

/// [`Ingestor`] backed by the `git` CLI and the in-process [`IndexStore`].
pub struct GitIngestor {
    config: IngestConfig,
    index: Arc<IndexStore>,
}

impl GitIngestor {
    pub fn new(config: IngestConfig, index: Arc<IndexStore>) -> Self {
        Self { config, index }
    }
}

#[async_trait]
impl Ingestor for GitIngestor {
    async fn process_repository(&self, url: &str, branch: Option<&str>) -> Result<Ingested> {
        let repo_id = repo_id_from_url(url)
            .ok_or_else(|| anyhow::anyhow!("cannot derive a repository id from '{}'", url))?;

        let url = url.to_string();
        let branch = branch.map(str::to_string);
        let config = self.config.clone();
        let id = repo_id.clone();

        let (file_tree, files_indexed, chunks) = tokio::task::spawn_blocking(move || {
            scan_repository(&url, branch.as_deref(), &config, &id)
        })
        .await
        .context("ingestion worker panicked")??;

        let chunks_indexed = self.index.replace_collection(&repo_id, chunks);
        tracing::info!(repo_id = %repo_id, files_indexed, chunks_indexed, "indexed repository");

        Ok(Ingested {
            repo_id,
            file_tree,
            files_indexed,
            chunks_indexed,
        })
    }

    async fn recent_commits(&self, url: &str, limit: usize) -> Result<Vec<Commit>> {
        let url = url.to_string();
        tokio::task::spawn_blocking(move || {
            let tmp = tempfile::tempdir().context("Failed to create temp dir")?;
            let dest = tmp.path().join("repo");
            git::clone_repository(&url, None, Some(limit), false, &dest)?;
            git::read_commits(&dest, limit)
        })
        .await
        .context("commit reader panicked")?
    }
}

/// Blocking half of ingestion. The temporary clone is removed on return.
fn scan_repository(
    url: &str,
    branch: Option<&str>,
    config: &IngestConfig,
    repo_id: &str,
) -> Result<(String, usize, Vec<Chunk>)> {
    let tmp = tempfile::tempdir().context("Failed to create temp dir for clone")?;
    let root = tmp.path().join(repo_id);
    git::clone_repository(url, branch, Some(1), true, &root)?;

    let file_tree = git::generate_file_tree(&root);
    let files = git::collect_source_files(&root, &config.extensions)?;
    tracing::debug!(repo_id, files = files.len(), "loaded source files");

    let mut chunks = Vec::new();
    for (relative, path) in &files {
        // Binary or non-UTF-8 files are skipped rather than failing the job.
        let Ok(body) = std::fs::read_to_string(path) else {
            tracing::debug!(file = %relative, "skipping unreadable file");
            continue;
        };
        chunks.extend(chunk_text(
            relative,
            &body,
            config.chunk_size,
            config.chunk_overlap,
        ));
    }

    Ok((file_tree, files.len(), chunks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::test_support::sample_repo;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_process_local_repository() {
        let tmp = TempDir::new().unwrap();
        let repo = sample_repo(tmp.path());
        let index = Arc::new(IndexStore::new());
        let ingestor = GitIngestor::new(IngestConfig::default(), index.clone());

        let ingested = ingestor
            .process_repository(repo.to_str().unwrap(), None)
            .await
            .unwrap();

        assert_eq!(ingested.repo_id, "sample");
        assert!(ingested.file_tree.starts_with("/\n"));
        assert!(ingested.file_tree.contains("helpers.py"));
        assert_eq!(ingested.files_indexed, 3);
        assert_eq!(index.chunk_count("sample"), ingested.chunks_indexed);

        let hits = index.search("sample", "helper", 5).unwrap();
        assert_eq!(hits[0].source, "src/utils/helpers.py");
    }

    #[tokio::test]
    async fn test_recent_commits_local() {
        let tmp = TempDir::new().unwrap();
        let repo = sample_repo(tmp.path());
        let ingestor = GitIngestor::new(IngestConfig::default(), Arc::new(IndexStore::new()));

        let commits = ingestor
            .recent_commits(repo.to_str().unwrap(), 10)
            .await
            .unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[1].message, "Initial commit");
    }

    #[tokio::test]
    async fn test_missing_repository_fails() {
        let tmp = TempDir::new().unwrap();
        let ingestor = GitIngestor::new(IngestConfig::default(), Arc::new(IndexStore::new()));
        let missing = tmp.path().join("missing");
        let err = ingestor
            .process_repository(missing.to_str().unwrap(), None)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("git clone failed"));
    }
}
