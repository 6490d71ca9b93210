//! # Git Sense CLI (`git-sense`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `git-sense serve` | Start the HTTP API |
//! | `git-sense analyze <repo_url>` | Run one analysis in-process and print the job |
//! | `git-sense cache list` | List cached repositories |
//! | `git-sense cache show <id>` | Print a cached job |
//! | `git-sense cache clear <id>` | Delete a cached job so the next run re-analyzes |
//!
//! API keys are read from the environment variable named by
//! `[llm].api_keys_env` (default `GROQ_API_KEYS`), comma separated.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use git_sense::cache::ResultCache;
use git_sense::config::{self, Config};
use git_sense::models::repo_id_from_url;
use git_sense::orchestrator::Orchestrator;
use git_sense::server;

/// Git Sense: LLM-assisted repository analysis.
#[derive(Parser)]
#[command(name = "git-sense", version)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/git-sense.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Analyze a repository in the foreground and print the resulting job.
    Analyze {
        /// Git URL (or local path) of the repository.
        repo_url: String,

        /// Branch to analyze instead of the remote default.
        #[arg(long)]
        branch: Option<String>,
    },

    /// Inspect or clear the result cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List repository ids with cached results.
    List,
    /// Print the cached job for a repository.
    Show { repo_id: String },
    /// Remove the cached job for a repository.
    Clear { repo_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("git_sense=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => server::run_server(&cfg).await?,
        Commands::Analyze { repo_url, branch } => analyze(&cfg, &repo_url, branch).await?,
        Commands::Cache { action } => cache_command(&cfg, action)?,
    }

    Ok(())
}

async fn analyze(cfg: &Config, repo_url: &str, branch: Option<String>) -> anyhow::Result<()> {
    let Some(repo_id) = repo_id_from_url(repo_url) else {
        bail!("cannot derive a repository id from '{}'", repo_url);
    };

    let orchestrator = Orchestrator::from_config(cfg)?;
    let generation = orchestrator.store().register(&repo_id);
    orchestrator
        .run(&repo_id, generation, repo_url, branch.as_deref())
        .await;

    let job = orchestrator
        .store()
        .get(&repo_id)
        .context("job disappeared from the store")?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

fn cache_command(cfg: &Config, action: CacheAction) -> anyhow::Result<()> {
    let cache = ResultCache::new(&cfg.cache.dir);
    match action {
        CacheAction::List => {
            let ids = cache.list()?;
            if ids.is_empty() {
                println!("No cached results in {}", cache.dir().display());
            }
            for id in ids {
                println!("{}", id);
            }
        }
        CacheAction::Show { repo_id } => match cache.load(&repo_id) {
            Some(job) => println!("{}", serde_json::to_string_pretty(&job)?),
            None => bail!("no cached results for '{}'", repo_id),
        },
        CacheAction::Clear { repo_id } => {
            if cache.remove(&repo_id)? {
                println!("Removed cached results for {}", repo_id);
            } else {
                println!("No cached results for {}", repo_id);
            }
        }
    }
    Ok(())
}
