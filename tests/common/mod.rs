//! Fake collaborators shared by the integration tests.
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::DateTime;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use git_sense::analysis::{AnalysisBackend, AnalysisKind};
use git_sense::cache::ResultCache;
use git_sense::ingest::Ingestor;
use git_sense::models::{repo_id_from_url, Commit, Ingested, Job};
use git_sense::orchestrator::Orchestrator;
use git_sense::store::JobStore;

pub const FILE_TREE: &str = "/\n    app.py\n    README.md";

pub fn sample_commits() -> Vec<Commit> {
    vec![
        Commit {
            hash: "a1b2c3d".to_string(),
            message: "Fix login query".to_string(),
            author: "Dana".to_string(),
            date: DateTime::parse_from_rfc3339("2024-05-02T09:30:00+02:00").unwrap(),
        },
        Commit {
            hash: "0f9e8d7".to_string(),
            message: "Initial commit".to_string(),
            author: "Dana".to_string(),
            date: DateTime::parse_from_rfc3339("2024-05-01T12:00:00+00:00").unwrap(),
        },
    ]
}

#[derive(Default)]
pub struct FakeIngestor {
    fail: Option<String>,
    pub ingest_calls: AtomicUsize,
    pub commit_calls: AtomicUsize,
}

impl FakeIngestor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail: Some(message.to_string()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Ingestor for FakeIngestor {
    async fn process_repository(&self, url: &str, _branch: Option<&str>) -> Result<Ingested> {
        self.ingest_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail {
            anyhow::bail!("{}", message);
        }
        let repo_id = repo_id_from_url(url).unwrap();
        Ok(Ingested {
            repo_id,
            file_tree: FILE_TREE.to_string(),
            files_indexed: 2,
            chunks_indexed: 2,
        })
    }

    async fn recent_commits(&self, _url: &str, limit: usize) -> Result<Vec<Commit>> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        Ok(sample_commits().into_iter().take(limit).collect())
    }
}

/// How the fake backend answers one analysis kind.
pub enum Behavior {
    Reply(String),
    Fail(String),
    Panic,
    /// Wait for the notify, then reply.
    Gated(Arc<Notify>, String),
}

pub fn default_reply(kind: AnalysisKind) -> String {
    match kind {
        AnalysisKind::Bugs => {
            r#"[{"file": "app.py", "line": 3, "description": "SQL injection", "severity": "High"}]"#
                .to_string()
        }
        AnalysisKind::Suggestions => r#"[{"file": "app.py", "description": "Long function", "suggestion": "Split it"}]"#.to_string(),
        AnalysisKind::Readme => "# Demo\n\nA demo app.".to_string(),
        AnalysisKind::Structure => "- **App**: `app.py` serves requests".to_string(),
        AnalysisKind::FileSummaries => {
            r#"[{"file": "app.py", "summary": "Entry point."}]"#.to_string()
        }
    }
}

#[derive(Default)]
pub struct FakeBackend {
    overrides: Vec<(AnalysisKind, Behavior)>,
    indexed: Vec<String>,
    ask_fails: bool,
    pub run_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: AnalysisKind, behavior: Behavior) -> Self {
        self.overrides.push((kind, behavior));
        self
    }

    pub fn indexed(mut self, repo_id: &str) -> Self {
        self.indexed.push(repo_id.to_string());
        self
    }

    pub fn failing_ask(mut self) -> Self {
        self.ask_fails = true;
        self
    }
}

#[async_trait]
impl AnalysisBackend for FakeBackend {
    async fn run(&self, kind: AnalysisKind, _repo_id: &str, _file_tree: &str) -> Result<String> {
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        match self.overrides.iter().find(|(k, _)| *k == kind) {
            None => Ok(default_reply(kind)),
            Some((_, Behavior::Reply(text))) => Ok(text.clone()),
            Some((_, Behavior::Fail(message))) => Err(anyhow::anyhow!("{}", message)),
            Some((_, Behavior::Panic)) => panic!("backend exploded"),
            Some((_, Behavior::Gated(gate, text))) => {
                gate.notified().await;
                Ok(text.clone())
            }
        }
    }

    async fn ask(&self, repo_id: &str, question: &str) -> Result<String> {
        if self.ask_fails {
            anyhow::bail!("max retries exceeded after 3 attempts");
        }
        Ok(format!("{} answers: {}", repo_id, question))
    }

    fn is_indexed(&self, repo_id: &str) -> bool {
        self.indexed.iter().any(|id| id == repo_id)
    }
}

pub fn orchestrator(
    cache: &std::path::Path,
    ingestor: Arc<FakeIngestor>,
    backend: Arc<FakeBackend>,
) -> Orchestrator {
    Orchestrator::new(
        Arc::new(JobStore::new()),
        Arc::new(ResultCache::new(cache)),
        ingestor,
        backend,
        10,
    )
}

/// Poll the store until the job reaches a terminal state.
pub async fn wait_for_terminal(store: &JobStore, repo_id: &str) -> Job {
    for _ in 0..500 {
        if let Some(job) = store.get(repo_id) {
            if job.status.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job '{}' did not finish within 5 seconds", repo_id);
}
