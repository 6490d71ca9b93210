//! Thin wrappers around the `git` CLI.
//!
//! Cloning, commit history, the file-tree snapshot used by the structure
//! analysis, and pushing a generated file back to a remote. Everything here
//! is blocking; async callers go through `tokio::task::spawn_blocking`.

use anyhow::{bail, Context, Result};
use chrono::DateTime;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

use crate::config::PushConfig;
use crate::models::{Commit, PushResponse};

/// Run `git <args>` in `dir` and return stdout.
fn run_git(dir: Option<&Path>, args: &[&str]) -> Result<String> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    // Never block on a credential prompt inside a server.
    cmd.env("GIT_TERMINAL_PROMPT", "0");

    let output = cmd
        .output()
        .with_context(|| "Failed to execute 'git'. Is git installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let sub = args
            .iter()
            .find(|a| !a.starts_with('-') && !a.contains('='))
            .copied()
            .unwrap_or("");
        bail!("git {} failed: {}", sub, stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Clone `url` into `dest` (which must not exist or be empty).
///
/// `depth` makes a shallow clone; `checkout = false` skips populating the
/// working tree, which is all commit history needs.
pub fn clone_repository(
    url: &str,
    branch: Option<&str>,
    depth: Option<usize>,
    checkout: bool,
    dest: &Path,
) -> Result<()> {
    let dest_str = dest.to_string_lossy().to_string();
    let depth_str = depth.map(|d| d.max(1).to_string());

    let mut args = vec!["clone", "--quiet"];
    if let Some(branch) = branch {
        args.extend(["--branch", branch, "--single-branch"]);
    }
    if let Some(depth) = depth_str.as_deref() {
        args.extend(["--depth", depth]);
    }
    if !checkout {
        args.push("--no-checkout");
    }
    args.extend(["--", url, dest_str.as_str()]);

    tracing::info!(url, dest = %dest.display(), "cloning repository");
    run_git(None, &args)?;
    Ok(())
}

/// Most recent `limit` commits reachable from HEAD.
pub fn read_commits(repo_dir: &Path, limit: usize) -> Result<Vec<Commit>> {
    let max_count = format!("--max-count={}", limit);
    let out = run_git(
        Some(repo_dir),
        &["log", &max_count, "--format=%H%x1f%an%x1f%cI%x1f%B%x1e"],
    )?;

    let mut commits = Vec::new();
    for record in out.split('\x1e') {
        let record = record.trim_start_matches('\n');
        if record.trim().is_empty() {
            continue;
        }
        let mut parts = record.splitn(4, '\x1f');
        let (Some(hash), Some(author), Some(date), Some(message)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            bail!("unexpected git log record: {:?}", record);
        };

        let date = DateTime::parse_from_rfc3339(date.trim())
            .with_context(|| format!("invalid commit date '{}'", date))?;

        commits.push(Commit {
            hash: hash.chars().take(7).collect(),
            message: message.trim().to_string(),
            author: author.to_string(),
            date,
        });
    }

    Ok(commits)
}

/// Text rendering of the tree under `root`: `/` first, then each directory
/// as `name/` and each file as `name`, indented four spaces per level.
/// Files come before subdirectories; `.git` is skipped.
pub fn generate_file_tree(root: &Path) -> String {
    let mut lines = Vec::new();

    let walker = WalkDir::new(root)
        .sort_by(|a, b| {
            (a.file_type().is_dir(), a.file_name()).cmp(&(b.file_type().is_dir(), b.file_name()))
        })
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker.flatten() {
        let depth = entry.depth();
        let indent = " ".repeat(4 * depth);
        let name = entry.file_name().to_string_lossy();
        if depth == 0 {
            lines.push("/".to_string());
        } else if entry.file_type().is_dir() {
            lines.push(format!("{}{}/", indent, name));
        } else {
            lines.push(format!("{}{}", indent, name));
        }
    }

    lines.join("\n")
}

/// Files under `root` whose extension is in the allow-list, as
/// `(relative path, absolute path)` sorted by relative path.
pub fn collect_source_files(root: &Path, extensions: &[String]) -> Result<Vec<(String, PathBuf)>> {
    let patterns: Vec<String> = extensions
        .iter()
        .map(|ext| format!("**/*.{}", ext.trim_start_matches('.')))
        .collect();
    let include_set = build_globset(&patterns)?;
    let exclude_set = build_globset(&[
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
    ])?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push((rel_str, path.to_path_buf()));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// Branch names follow `git check-ref-format --branch`. A leading `-` is
/// rejected so the name can never be read as an option.
fn is_valid_branch_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && !name.starts_with('/')
        && !name.ends_with('/')
        && !name.ends_with('.')
        && !name.ends_with(".lock")
        && name != "@"
        && !name.contains("..")
        && !name.contains("//")
        && !name.contains("@{")
        && !name.split('/').any(|part| part.starts_with('.'))
        && !name
            .chars()
            .any(|c| c.is_ascii_control() || c.is_whitespace() || "~^:?*[\\".contains(c))
}

/// Clone `url`, write `content` to `file_path` on `branch`, commit and push.
///
/// The branch is created when the remote does not have it. An unchanged
/// file is reported as an unsuccessful push rather than an error.
pub fn push_file(
    url: &str,
    file_path: &str,
    content: &str,
    commit_message: &str,
    branch: &str,
    author: &PushConfig,
) -> Result<PushResponse> {
    let relative = Path::new(file_path);
    if file_path.is_empty()
        || !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
    {
        bail!("file_path must be a relative path inside the repository: '{}'", file_path);
    }
    if !is_valid_branch_name(branch) {
        bail!("invalid branch name '{}'", branch);
    }

    let tmp = tempfile::tempdir().context("Failed to create temp dir for push")?;
    let repo = tmp.path().join("repo");
    clone_repository(url, None, None, true, &repo)?;

    let remote_ref = format!("origin/{}", branch);
    if run_git(Some(&repo), &["rev-parse", "--verify", "--quiet", &remote_ref]).is_ok() {
        run_git(Some(&repo), &["checkout", "--quiet", branch])?;
    } else {
        run_git(Some(&repo), &["checkout", "--quiet", "-b", branch])?;
    }

    let full_path = repo.join(relative);
    if let Some(parent) = full_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(&full_path, content)
        .with_context(|| format!("Failed to write {}", full_path.display()))?;

    run_git(Some(&repo), &["add", "--", file_path])?;
    let status = run_git(Some(&repo), &["status", "--porcelain"])?;
    if status.trim().is_empty() {
        tracing::info!(url, file_path, "no changes to commit");
        return Ok(PushResponse {
            success: false,
            message: "No changes to commit.".to_string(),
        });
    }

    let name_cfg = format!("user.name={}", author.author_name);
    let email_cfg = format!("user.email={}", author.author_email);
    run_git(
        Some(&repo),
        &["-c", &name_cfg, "-c", &email_cfg, "commit", "--quiet", "-m", commit_message],
    )?;

    let refspec = format!("{}:{}", branch, branch);
    run_git(Some(&repo), &["push", "--quiet", "origin", &refspec])?;
    tracing::info!(url, file_path, branch, "pushed file");

    Ok(PushResponse {
        success: true,
        message: "Successfully pushed to repository.".to_string(),
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
