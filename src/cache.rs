//! On-disk cache of completed jobs, one JSON file per repository.
//!
//! A cache hit short-circuits the whole pipeline. Entries never expire; a
//! stale result is served until its file is removed (`git-sense cache
//! clear <repo_id>`). Nothing here returns an error to the orchestrator:
//! I/O and decode failures are logged and treated as a miss or a skipped
//! write.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::models::Job;

pub struct ResultCache {
    dir: PathBuf,
}

impl ResultCache {
    /// Open the cache rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to create cache directory");
        }
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, repo_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", repo_id))
    }

    /// Persist a job. Failures are logged and swallowed.
    pub fn save(&self, repo_id: &str, job: &Job) {
        match self.try_save(repo_id, job) {
            Ok(()) => tracing::debug!(repo_id, "saved results to cache"),
            Err(e) => tracing::warn!(repo_id, error = %format!("{:#}", e), "failed to save cache"),
        }
    }

    /// Load a cached job, or `None` on a miss or any failure.
    pub fn load(&self, repo_id: &str) -> Option<Job> {
        let path = self.path_for(repo_id);
        if !path.exists() {
            return None;
        }
        match self.try_load(&path) {
            Ok(job) => Some(job),
            Err(e) => {
                tracing::warn!(repo_id, error = %format!("{:#}", e), "failed to load cache");
                None
            }
        }
    }

    /// Delete a cached entry. Returns whether a file was removed.
    pub fn remove(&self, repo_id: &str) -> Result<bool> {
        let path = self.path_for(repo_id);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
        Ok(true)
    }

    /// Repository identifiers that have a cache entry, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read cache directory {}", self.dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn try_save(&self, repo_id: &str, job: &Job) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(repo_id);
        let tmp = self.dir.join(format!(".{}.json.tmp", repo_id));
        let body = serde_json::to_vec_pretty(job)?;
        std::fs::write(&tmp, body).with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move cache file into {}", path.display()))?;
        Ok(())
    }

    fn try_load(&self, path: &Path) -> Result<Job> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let job = serde_json::from_str(&content)
            .with_context(|| format!("Corrupt cache file {}", path.display()))?;
        Ok(job)
    }
}
