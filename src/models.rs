//! Core data models shared by the store, the cache, and the HTTP API.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of an analysis job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One analysis run's evolving state and results.
///
/// Every result field stays `null` until its task resolves, so pollers can
/// render whatever has arrived so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub status: JobStatus,
    #[serde(default)]
    pub bugs: Option<Value>,
    #[serde(default)]
    pub suggestions: Option<Value>,
    #[serde(default)]
    pub readme: Option<Value>,
    #[serde(default)]
    pub structure: Option<Value>,
    #[serde(default)]
    pub file_summaries: Option<Value>,
    #[serde(default)]
    pub commits: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            bugs: None,
            suggestions: None,
            readme: None,
            structure: None,
            file_summaries: None,
            commits: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(JobStatus::Failed)
        }
    }

    pub fn field(&self, field: AnalysisField) -> Option<&Value> {
        match field {
            AnalysisField::Bugs => self.bugs.as_ref(),
            AnalysisField::Suggestions => self.suggestions.as_ref(),
            AnalysisField::Readme => self.readme.as_ref(),
            AnalysisField::Structure => self.structure.as_ref(),
            AnalysisField::FileSummaries => self.file_summaries.as_ref(),
            AnalysisField::Commits => self.commits.as_ref(),
        }
    }

    pub fn set(&mut self, field: AnalysisField, value: Value) {
        let slot = match field {
            AnalysisField::Bugs => &mut self.bugs,
            AnalysisField::Suggestions => &mut self.suggestions,
            AnalysisField::Readme => &mut self.readme,
            AnalysisField::Structure => &mut self.structure,
            AnalysisField::FileSummaries => &mut self.file_summaries,
            AnalysisField::Commits => &mut self.commits,
        };
        *slot = Some(value);
    }

    /// Names of the result fields that have not been written yet.
    pub fn unresolved(&self) -> Vec<&'static str> {
        AnalysisField::ALL
            .iter()
            .filter(|f| self.field(**f).is_none())
            .map(|f| f.name())
            .collect()
    }
}

/// The six result fields of a [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisField {
    Bugs,
    Suggestions,
    Readme,
    Structure,
    FileSummaries,
    Commits,
}

impl AnalysisField {
    pub const ALL: [AnalysisField; 6] = [
        AnalysisField::Bugs,
        AnalysisField::Suggestions,
        AnalysisField::Readme,
        AnalysisField::Structure,
        AnalysisField::FileSummaries,
        AnalysisField::Commits,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AnalysisField::Bugs => "bugs",
            AnalysisField::Suggestions => "suggestions",
            AnalysisField::Readme => "readme",
            AnalysisField::Structure => "structure",
            AnalysisField::FileSummaries => "file_summaries",
            AnalysisField::Commits => "commits",
        }
    }

    /// Fields whose LLM answer is parsed as a JSON array.
    pub fn is_json_list(self) -> bool {
        matches!(
            self,
            AnalysisField::Bugs | AnalysisField::Suggestions | AnalysisField::FileSummaries
        )
    }

    /// Value written when the field's task fails.
    pub fn fallback(self, error: &str) -> Value {
        match self {
            AnalysisField::Readme | AnalysisField::Structure => {
                Value::String(format!("Error: {}", error))
            }
            _ => Value::Array(Vec::new()),
        }
    }
}

impl std::fmt::Display for AnalysisField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of the commit history field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// Abbreviated (7 character) commit hash.
    pub hash: String,
    pub message: String,
    pub author: String,
    pub date: DateTime<FixedOffset>,
}

/// Result of ingesting a repository.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub repo_id: String,
    /// Text rendering of the checked-out file tree.
    pub file_tree: String,
    pub files_indexed: usize,
    pub chunks_indexed: usize,
}

/// A chunk of an indexed source file.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Path relative to the repository root.
    pub source: String,
    /// Position of the chunk within its file, starting at 0.
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`; identical chunks are indexed once.
    pub hash: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    pub repo_url: String,
    #[serde(default)]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub message: String,
    pub repo_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub repo_id: String,
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub repo_id: String,
    pub answer: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushRequest {
    pub repo_url: String,
    pub file_path: String,
    pub content: String,
    pub commit_message: String,
    #[serde(default = "default_push_branch")]
    pub branch: String,
}

fn default_push_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResponse {
    pub success: bool,
    pub message: String,
}

/// Derive the repository identifier from its URL: the last path segment
/// with any `.git` suffix removed.
///
/// Returns `None` when the result is empty or contains characters that are
/// unsafe in a cache file name.
pub fn repo_id_from_url(url: &str) -> Option<String> {
    let segment = url.trim().trim_end_matches('/').rsplit(['/', ':']).next()?;
    let id = segment.strip_suffix(".git").unwrap_or(segment);

    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    valid.then(|| id.to_string())
}
