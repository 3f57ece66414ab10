#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

use anyhow::{Context, Result, ensure};
use tempfile::TempDir;

/// Return the path to the compiled `tether` binary for integration-style tests.
pub fn tether_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_tether"))
}

/// Run a git command inside `repo_path`, ensuring it succeeds.
pub fn git(repo_path: &Path, args: &[&str]) -> Result<Output> {
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

    Ok(output)
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

/// Write `content` to `file` and commit it.
pub fn commit_file(repo_path: &Path, file: &str, content: &str, message: &str) -> Result<()> {
    if let Some(parent) = Path::new(file).parent() {
        fs::create_dir_all(repo_path.join(parent))?;
    }
    fs::write(repo_path.join(file), content)?;
    git(repo_path, &["add", "."])?;
    git(repo_path, &["commit", "-m", message])?;
    Ok(())
}

/// Run `tether` inside the repository and return the raw output.
pub fn run_tether(repo_path: &Path, args: &[&str]) -> Result<Output> {
    Command::new(tether_binary())
        .current_dir(repo_path)
        .args(args)
        .output()
        .with_context(|| format!("failed to run tether {}", args.join(" ")))
}

/// Run `tether`, asserting a successful exit.
pub fn run_tether_ok(repo_path: &Path, args: &[&str]) -> Result<Output> {
    let output = run_tether(repo_path, args)?;
    ensure!(
        output.status.success(),
        "tether {} failed\nstdout: {}\nstderr: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(output)
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
