//! Retrieval-augmented analysis queries.
//!
//! Each [`AnalysisKind`] pairs a fixed prompt template with a retrieval
//! query and a top-K. [`Analyzer`] fetches context from the repository's
//! collection, then asks the LLM through the
//! [`ResilientInvoker`](crate::invoker::ResilientInvoker), which builds a
//! fresh [`RetrievalQa`] unit for every key it tries.
//!
//! | Kind | Top-K | Output |
//! |------|-------|--------|
//! | bugs | 10 | JSON list, ≤ 10 items |
//! | suggestions | 5 | JSON list, ≤ 5 items |
//! | readme | 5 | Markdown |
//! | structure | 10 | Markdown + raw file tree |
//! | file summaries | 10 | JSON list, ≤ 15 items |

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::LlmConfig;
use crate::index::{format_context, IndexStore};
use crate::invoker::{ResilientInvoker, UnitOfWork};
use crate::llm::ChatClient;
use crate::models::AnalysisField;

/// File trees longer than this are cut before going into the prompt.
pub const MAX_TREE_CHARS: usize = 2000;
const TRUNCATION_MARKER: &str = "\n... (truncated)";
const ASK_TOP_K: usize = 8;

/// The five LLM-backed analyses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisKind {
    Bugs,
    Suggestions,
    Readme,
    Structure,
    FileSummaries,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 5] = [
        AnalysisKind::Bugs,
        AnalysisKind::Suggestions,
        AnalysisKind::Readme,
        AnalysisKind::Structure,
        AnalysisKind::FileSummaries,
    ];

    /// Job field this analysis fills.
    pub fn field(self) -> AnalysisField {
        match self {
            AnalysisKind::Bugs => AnalysisField::Bugs,
            AnalysisKind::Suggestions => AnalysisField::Suggestions,
            AnalysisKind::Readme => AnalysisField::Readme,
            AnalysisKind::Structure => AnalysisField::Structure,
            AnalysisKind::FileSummaries => AnalysisField::FileSummaries,
        }
    }

    pub fn top_k(self) -> usize {
        match self {
            AnalysisKind::Bugs => 10,
            AnalysisKind::Suggestions => 5,
            AnalysisKind::Readme => 5,
            AnalysisKind::Structure => 10,
            AnalysisKind::FileSummaries => 10,
        }
    }

    /// Question sent to the retriever (and, for most kinds, to the LLM).
    pub fn query(self) -> &'static str {
        match self {
            AnalysisKind::Bugs => "Find security vulnerabilities, bugs, and errors in the code.",
            AnalysisKind::Suggestions => {
                "Identify code quality improvements and refactoring opportunities."
            }
            AnalysisKind::Readme => "Generate a README.md for this project.",
            AnalysisKind::Structure => "Describe the repository structure and architecture.",
            AnalysisKind::FileSummaries => "Summarize key files in the repository.",
        }
    }

    /// Prompt template with `{context}` and `{question}` placeholders.
    pub fn template(self) -> &'static str {
        match self {
            AnalysisKind::Bugs => BUGS_PROMPT,
            AnalysisKind::Suggestions => SUGGESTIONS_PROMPT,
            AnalysisKind::Readme => README_PROMPT,
            AnalysisKind::Structure => STRUCTURE_PROMPT,
            AnalysisKind::FileSummaries => FILE_SUMMARIES_PROMPT,
        }
    }
}

const BUGS_PROMPT: &str = r#"You are an expert code security and quality analyzer.
Analyze the following code snippets from a repository.
Identify potential security vulnerabilities (e.g., XSS, SQL injection, hardcoded secrets) and major logical bugs.

Context:
{context}

Question: {question}

For each issue found, provide:
1. The file name (if available in context).
2. The line number (approximate).
3. A description of the issue.
4. Severity (High/Medium/Low).

**CRITICAL INSTRUCTIONS:**
- Output MUST be a valid JSON list of objects.
- Keys: "file", "line", "description", "severity".
- Do NOT include markdown formatting (no ```json).
- If no issues are found, return [].
- Limit to the top 10 most critical issues to avoid response truncation.
- Ensure the JSON is well-formed and closed properly.
"#;

const SUGGESTIONS_PROMPT: &str = r#"You are a senior software engineer.
Analyze the following code snippets.
Identify areas for architecture improvement, code quality, and refactoring.
Focus on readability, performance, and maintainability.

Context:
{context}

Question: {question}

**CRITICAL INSTRUCTIONS:**
- Output MUST be a valid JSON list of objects.
- Keys: "file", "description", "suggestion".
- Do NOT include markdown formatting.
- Limit to the top 5 most impactful suggestions.
- Ensure the JSON is well-formed.
"#;

const README_PROMPT: &str = r#"You are a technical writer.
Based on the following code snippets, generate a comprehensive README.md file.
Include sections: Introduction, Features, Tech Stack, and Installation (inferred).

Context:
{context}

Question: {question}

Output the README content in Markdown format.
"#;

const STRUCTURE_PROMPT: &str = r#"You are a software architect.
Based on the provided code snippets and the user's question (which may contain the file tree), describe the high-level structure and architecture of the repository.

**Instructions:**
- Use a clear, bullet-point format.
- Group files by their role (e.g., **Data**, **Model**, **Utils**).
- Explain the flow of data or execution briefly.
- Keep it concise and easy to read.
- Do NOT just list files; explain their purpose.

Context:
{context}

Question: {question}

Output the description in Markdown format.
"#;

const FILE_SUMMARIES_PROMPT: &str = r#"You are a code analyst.
Based on the provided code snippets, identify the most important files and provide a one-sentence summary for each.

Context:
{context}

Question: {question}

**CRITICAL INSTRUCTIONS:**
- Output MUST be a valid JSON list of objects.
- Keys: "file", "summary".
- Do NOT include markdown formatting.
- Limit to the top 15 files.
- Ensure the JSON is well-formed.
"#;

const ASK_PROMPT: &str = r#"You are an assistant answering questions about a code repository.
Use only the code snippets below. If the answer is not in the snippets, say you don't know.

Context:
{context}

Question: {question}

Answer in Markdown.
"#;

/// Fill the `{context}` and `{question}` placeholders in one pass over the
/// template. Placeholder text inside the inserted values is left alone.
pub fn render_prompt(template: &str, context: &str, question: &str) -> String {
    let mut out = String::with_capacity(template.len() + context.len() + question.len());
    let mut rest = template;

    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("{context}") {
            out.push_str(context);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{question}") {
            out.push_str(question);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

/// Cut a file tree to [`MAX_TREE_CHARS`] characters, marking the cut.
pub fn truncate_tree(tree: &str) -> String {
    if tree.chars().count() <= MAX_TREE_CHARS {
        return tree.to_string();
    }
    let mut cut: String = tree.chars().take(MAX_TREE_CHARS).collect();
    cut.push_str(TRUNCATION_MARKER);
    cut
}

/// Answer for the structure analysis: the model's description followed by
/// the complete file tree as a fenced block.
pub fn append_file_tree(answer: &str, file_tree: &str) -> String {
    format!("{}\n\n## File Tree\n```text\n{}\n```", answer, file_tree)
}

/// Producer of raw analysis text for the orchestrator.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Run one analysis over an indexed repository and return the raw text.
    async fn run(&self, kind: AnalysisKind, repo_id: &str, file_tree: &str) -> Result<String>;

    /// Free-form question over an indexed repository.
    async fn ask(&self, repo_id: &str, question: &str) -> Result<String>;

    /// Whether `repo_id` can be queried in this process.
    fn is_indexed(&self, repo_id: &str) -> bool;
}

/// Unit of work: one retrieval-augmented chat call bound to a single key.
pub struct RetrievalQa {
    client: ChatClient,
    template: &'static str,
    context: Arc<str>,
}

#[async_trait]
impl UnitOfWork for RetrievalQa {
    async fn invoke(&self, query: &str) -> Result<String> {
        let prompt = render_prompt(self.template, &self.context, query);
        self.client.complete(&prompt).await
    }
}

/// [`AnalysisBackend`] over the in-process index and a chat-completions API.
pub struct Analyzer {
    index: Arc<IndexStore>,
    invoker: ResilientInvoker,
    llm: LlmConfig,
    http: reqwest::Client,
}

impl Analyzer {
    pub fn new(
        index: Arc<IndexStore>,
        invoker: ResilientInvoker,
        llm: LlmConfig,
        http: reqwest::Client,
    ) -> Self {
        Self {
            index,
            invoker,
            llm,
            http,
        }
    }

    async fn retrieval_qa(
        &self,
        repo_id: &str,
        template: &'static str,
        retrieval_query: &str,
        question: &str,
        k: usize,
    ) -> Result<String> {
        let chunks = self
            .index
            .search(repo_id, retrieval_query, k)
            .ok_or_else(|| anyhow::anyhow!("repository '{}' not found in index", repo_id))?;
        let context: Arc<str> = Arc::from(format_context(&chunks));

        let answer = self
            .invoker
            .invoke(
                |key| RetrievalQa {
                    client: ChatClient::new(&self.llm, key, self.http.clone()),
                    template,
                    context: context.clone(),
                },
                question,
            )
            .await?;
        Ok(answer)
    }
}

#[async_trait]
impl AnalysisBackend for Analyzer {
    async fn run(&self, kind: AnalysisKind, repo_id: &str, file_tree: &str) -> Result<String> {
        tracing::debug!(repo_id, kind = ?kind, "running analysis");

        if kind == AnalysisKind::Structure {
            let question = format!(
                "{} Here is the file tree:\n{}",
                kind.query(),
                truncate_tree(file_tree)
            );
            let answer = self
                .retrieval_qa(repo_id, kind.template(), kind.query(), &question, kind.top_k())
                .await?;
            return Ok(append_file_tree(&answer, file_tree));
        }

        self.retrieval_qa(repo_id, kind.template(), kind.query(), kind.query(), kind.top_k())
            .await
    }

    async fn ask(&self, repo_id: &str, question: &str) -> Result<String> {
        self.retrieval_qa(repo_id, ASK_PROMPT, question, question, ASK_TOP_K)
            .await
    }

    fn is_indexed(&self, repo_id: &str) -> bool {
        self.index.contains(repo_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_tree_short_untouched() {
        let tree = "/\n    a.py";
        assert_eq!(truncate_tree(tree), tree);
    }

    #[test]
    fn test_truncate_tree_long() {
        let tree = "x".repeat(MAX_TREE_CHARS + 1);
        let cut = truncate_tree(&tree);
        assert!(cut.ends_with("\n... (truncated)"));
        assert_eq!(cut.chars().count(), MAX_TREE_CHARS + TRUNCATION_MARKER.len());
    }

    #[test]
    fn test_truncate_tree_multibyte_boundary() {
        let tree = "é".repeat(MAX_TREE_CHARS + 10);
        let cut = truncate_tree(&tree);
        assert!(cut.starts_with(&"é".repeat(MAX_TREE_CHARS)));
    }

    #[test]
    fn test_append_file_tree() {
        let out = append_file_tree("- **Core**: main loop", "/\n    main.rs");
        assert_eq!(
            out,
            "- **Core**: main loop\n\n## File Tree\n```text\n/\n    main.rs\n```"
        );
    }

    #[test]
    fn test_templates_have_placeholders() {
        for kind in AnalysisKind::ALL {
            let t = kind.template();
            assert!(t.contains("{context}"), "{:?}", kind);
            assert!(t.contains("{question}"), "{:?}", kind);
        }
        let rendered = render_prompt(BUGS_PROMPT, "CTX", "Q?");
        assert!(rendered.contains("Context:\nCTX"));
        assert!(rendered.contains("Question: Q?"));
    }

    #[test]
    fn test_render_prompt_leaves_placeholders_in_values() {
        let template = "Context:\n{context}\n\nQuestion: {question}\nKeep {braces}.";
        let context = "msg = \"{question} was asked\".format(question=q)";
        let question = "Why is {context} here?";
        assert_eq!(
            render_prompt(template, context, question),
            "Context:\nmsg = \"{question} was asked\".format(question=q)\n\n\
             Question: Why is {context} here?\nKeep {braces}."
        );
    }

    #[test]
    fn test_kind_fields_are_distinct() {
        let mut fields: Vec<&str> = AnalysisKind::ALL.iter().map(|k| k.field().name()).collect();
        fields.sort_unstable();
        fields.dedup();
        assert_eq!(fields.len(), 5);
        assert!(!fields.contains(&"commits"));
    }
}
