use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

use anyhow::{Context, Result};

/// Run a git command with the given arguments in the specified directory.
/// Returns the output if successful, otherwise returns an error with the full command details.
fn run_git(repo_path: &Path, args: &[&str]) -> Result<Output> {
    let output = Command::new("git")
        .current_dir(repo_path)
        .args(args)
        .output()
        .with_context(|| format!("Failed to execute git command: git {}", args.join(" ")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let command = format!("git {}", args.join(" "));
        anyhow::bail!("Git command failed: {}\nError: {}", command, stderr.trim());
    }

    Ok(output)
}

/// Run a git command and return its stdout as a trimmed string.
fn run_git_string(repo_path: &Path, args: &[&str]) -> Result<String> {
    let output = run_git(repo_path, args)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Walk up from `start_dir` to find the nearest repository root containing a `.git` entry.
pub fn find_root(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir;
    loop {
        if current.join(".git").exists() {
            return Some(current.to_path_buf());
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}

/// Resolve the repository's git directory (handles worktrees and submodules).
pub fn git_dir(repo_path: &Path) -> Result<PathBuf> {
    let dir = run_git_string(repo_path, &["rev-parse", "--git-dir"])?;
    let dir = PathBuf::from(dir);
    if dir.is_absolute() {
        Ok(dir)
    } else {
        Ok(repo_path.join(dir))
    }
}

/// Resolve `rev` to a full commit hash.
pub fn rev_parse(repo_path: &Path, rev: &str) -> Result<String> {
    run_git_string(repo_path, &["rev-parse", "--verify", &format!("{rev}^{{commit}}")])
}

/// Resolve the current head commit.
pub fn head_commit(repo_path: &Path) -> Result<String> {
    rev_parse(repo_path, "HEAD")
}

/// Render the short display form of a commit id.
pub fn abbreviate(repo_path: &Path, commit: &str) -> Result<String> {
    run_git_string(repo_path, &["rev-parse", "--short", commit])
}

/// Read the full commit message of `commit`.
pub fn commit_message(repo_path: &Path, commit: &str) -> Result<String> {
    let output = run_git(repo_path, &["log", "-1", "--format=%B", commit])?;
    Ok(String::from_utf8_lossy(&output.stdout)
        .trim_end()
        .to_string())
}

/// Check whether `ancestor` is an ancestor of (or equal to) `descendant`.
pub fn is_ancestor(repo_path: &Path, ancestor: &str, descendant: &str) -> Result<bool> {
    let status = Command::new("git")
        .current_dir(repo_path)
        .args(["merge-base", "--is-ancestor", ancestor, descendant])
        .status()
        .with_context(|| "Failed to execute git merge-base --is-ancestor")?;

    match status.code() {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        Some(code) => anyhow::bail!("git merge-base --is-ancestor failed with exit code {code}"),
        None => anyhow::bail!("git merge-base --is-ancestor terminated by signal"),
    }
}

/// A commit together with its parent ids, as reported by `git rev-list --parents`.
#[derive(Debug, Clone)]
pub struct CommitNode {
    /// Full commit hash.
    pub id: String,
    /// Parent hashes; empty for a root commit, more than one for a merge.
    pub parents: Vec<String>,
}

/// Enumerate `head` and all of its ancestors with their parent links,
/// newest first in topological order.
pub fn rev_list_parents(repo_path: &Path, head: &str) -> Result<Vec<CommitNode>> {
    let output = run_git(repo_path, &["rev-list", "--parents", "--topo-order", head])?;
    let output_str = String::from_utf8_lossy(&output.stdout);

    let mut nodes = Vec::new();
    for line in output_str.lines() {
        let mut ids = line.split_whitespace().map(str::to_string);
        let Some(id) = ids.next() else {
            continue;
        };
        nodes.push(CommitNode {
            id,
            parents: ids.collect(),
        });
    }

    Ok(nodes)
}

/// File-level status reported by a tree diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// The file exists only in the newer snapshot.
    Added,
    /// The file exists in both snapshots with different content.
    Modified,
    /// The file exists only in the older snapshot.
    Deleted,
    /// The file moved between the snapshots.
    Renamed,
}

/// One file-level operation between two commit snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    /// Status of the change.
    pub status: FileStatus,
    /// Path in the newer snapshot (the older snapshot for deletions).
    pub path: String,
    /// Previous path, for renames.
    pub previous_path: Option<String>,
}

/// Diff two commit snapshots into file-level operations, with rename detection.
pub fn diff_tree(repo_path: &Path, from: &str, to: &str) -> Result<Vec<FileChange>> {
    let output = run_git(
        repo_path,
        &["diff-tree", "--name-status", "-r", "-M", "--no-commit-id", from, to],
    )?;
    let output_str = String::from_utf8_lossy(&output.stdout);

    let mut changes = Vec::new();
    for line in output_str.lines() {
        let mut fields = line.split('\t');
        let Some(status) = fields.next() else {
            continue;
        };
        let first = fields.next();
        let second = fields.next();

        let change = match (status.chars().next(), first, second) {
            (Some('A'), Some(path), _) => FileChange {
                status: FileStatus::Added,
                path: path.to_string(),
                previous_path: None,
            },
            // Typechanges materialize the same way content edits do.
            (Some('M') | Some('T'), Some(path), _) => FileChange {
                status: FileStatus::Modified,
                path: path.to_string(),
                previous_path: None,
            },
            (Some('D'), Some(path), _) => FileChange {
                status: FileStatus::Deleted,
                path: path.to_string(),
                previous_path: None,
            },
            (Some('R'), Some(old), Some(new)) => FileChange {
                status: FileStatus::Renamed,
                path: new.to_string(),
                previous_path: Some(old.to_string()),
            },
            _ => anyhow::bail!("Unrecognized diff-tree entry: {line}"),
        };
        changes.push(change);
    }

    Ok(changes)
}

/// List every file path present in a commit snapshot.
pub fn ls_tree(repo_path: &Path, commit: &str) -> Result<Vec<String>> {
    let output = run_git(repo_path, &["ls-tree", "-r", "--name-only", commit])?;
    let output_str = String::from_utf8_lossy(&output.stdout);

    Ok(output_str
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|path| !path.is_empty())
        .collect())
}

/// Write the content of `path` at `commit` to `dest`, creating parent directories.
pub fn show_file(repo_path: &Path, commit: &str, path: &str, dest: &Path) -> Result<()> {
    let output = run_git(repo_path, &["show", &format!("{commit}:{path}")])?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    fs::write(dest, &output.stdout)
        .with_context(|| format!("Failed to write {}", dest.display()))?;
    Ok(())
}
