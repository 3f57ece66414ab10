#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
    sync::Arc,
};

use anyhow::{Context, Result, ensure};
use libtether::{
    checkin::{CheckinOptions, CheckinOutcome, CheckinTask},
    remote::RemoteClient,
    task::{CancellationToken, NullSink, Progress, TaskExecutor, TaskStatus},
};
use tempfile::TempDir;

/// Run a git command inside `repo_path`, ensuring it succeeds.
pub fn git(repo_path: &Path, args: &[&str]) -> Result<()> {
    let output = Command::new("git")
        .current_dir(repo_path)
        .args(args)
        .output()
        .with_context(|| format!("failed to run git {}", args.join(" ")))?;

    ensure!(
        output.status.success(),
        "git command failed: git {}\nstdout: {}\nstderr: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    Ok(())
}

/// Initialise a new repository at `repo_path` with a README commit.
pub fn init_repository(repo_path: &Path) -> Result<()> {
    if !repo_path.exists() {
        fs::create_dir_all(repo_path)?;
    }

    git(repo_path, &["init", "-b", "main"])?;
    git(repo_path, &["config", "user.email", "test@example.com"])?;
    git(repo_path, &["config", "user.name", "Test User"])?;

    fs::write(repo_path.join("README.md"), "# Test Project")?;
    git(repo_path, &["add", "README.md"])?;
    git(repo_path, &["commit", "-m", "Initial commit"])?;

    Ok(())
}

/// Create a temporary repository with the provided name relative to the temp dir.
pub fn create_repo(repo_name: &str) -> Result<(TempDir, PathBuf)> {
    let temp_dir = TempDir::new()?;
    let repo_path = temp_dir.path().join(repo_name);
    init_repository(&repo_path)?;
    Ok((temp_dir, repo_path))
}

/// Write `content` to `file` and commit it, returning the new commit id.
pub fn commit_file(repo_path: &Path, file: &str, content: &str, message: &str) -> Result<String> {
    if let Some(parent) = Path::new(file).parent() {
        fs::create_dir_all(repo_path.join(parent))?;
    }
    fs::write(repo_path.join(file), content)?;
    git(repo_path, &["add", "."])?;
    git(repo_path, &["commit", "-m", message])?;
    head(repo_path)
}

/// Current head commit of the repository.
pub fn head(repo_path: &Path) -> Result<String> {
    Ok(libtether::git::head_commit(repo_path)?)
}

/// Run a checkin against `remote` with a silent progress tree.
pub fn run_checkin(
    repo_path: &Path,
    remote: &dyn RemoteClient,
    server_path: &str,
    options: CheckinOptions,
) -> Result<(TaskStatus, Option<CheckinOutcome>)> {
    run_checkin_with(repo_path, remote, server_path, options, CancellationToken::new())
}

/// Run a checkin with an externally controlled cancellation token.
pub fn run_checkin_with(
    repo_path: &Path,
    remote: &dyn RemoteClient,
    server_path: &str,
    options: CheckinOptions,
    cancel: CancellationToken,
) -> Result<(TaskStatus, Option<CheckinOutcome>)> {
    let mut task = CheckinTask::new(repo_path, remote, server_path, options)?;
    let progress = Progress::new(Arc::new(NullSink), cancel);
    let status = TaskExecutor::new().execute(&mut task, progress);
    let outcome = task.outcome().cloned();
    Ok((status, outcome))
}

/// Number of changeset records in a directory store.
pub fn changeset_count(store_root: &Path) -> Result<usize> {
    let dir = store_root.join("changesets");
    if !dir.exists() {
        return Ok(0);
    }
    let count = fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "toml"))
        .count();
    Ok(count)
}
