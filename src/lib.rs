//! # Git Sense
//!
//! Repository analysis service: point it at a Git URL and it returns bug
//! reports, improvement suggestions, a generated README, an architecture
//! overview, per-file summaries, and recent commit history.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌─────────────┐   ┌───────────┐
//! │   HTTP   │──▶│Orchestrator│──▶│  Ingestion  │──▶│   Index   │
//! │  (axum)  │   │  fan-out   │   │ clone+chunk │   │ per repo  │
//! └────┬─────┘   └─────┬──────┘   └─────────────┘   └─────┬─────┘
//!      │               │ 6 tasks                          │
//!      ▼               ▼                                  ▼
//! ┌──────────┐   ┌────────────┐   ┌─────────────┐   ┌───────────┐
//! │ JobStore │◀──│   Parser   │◀──│  Invoker    │◀──│ Analyses  │
//! │ + cache  │   │  tolerant  │   │ key rotation│   │  prompts  │
//! └──────────┘   └────────────┘   └─────────────┘   └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export GROQ_API_KEYS=key1,key2
//! git-sense serve
//! curl -X POST localhost:8000/analyze -d '{"repo_url": "https://github.com/org/repo"}' \
//!      -H 'content-type: application/json'
//! curl localhost:8000/results/repo
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Job, request and response types |
//! | [`error`] | Typed errors |
//! | [`keys`] | API key rotation |
//! | [`invoker`] | Retry with key rotation |
//! | [`llm`] | Chat-completions client |
//! | [`parser`] | Tolerant JSON-list parsing of LLM output |
//! | [`git`] | `git` CLI wrappers |
//! | [`chunk`] | Text chunking |
//! | [`index`] | In-process retrieval index |
//! | [`ingest`] | Clone, chunk and index a repository |
//! | [`analysis`] | Retrieval-augmented analyses |
//! | [`store`] | Job store |
//! | [`cache`] | On-disk result cache |
//! | [`orchestrator`] | Job lifecycle and fan-out |
//! | [`server`] | HTTP API |

pub mod analysis;
pub mod cache;
pub mod chunk;
pub mod config;
pub mod error;
pub mod git;
pub mod index;
pub mod ingest;
pub mod invoker;
pub mod keys;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod server;
pub mod store;
