use std::path::{Path, PathBuf};

use crate::{
    error::{Result, git_error},
    git::{self, FileStatus},
    remote::{ChangeKind, PendingChange},
    task::{Progress, Task, TaskStatus},
    walker::CommitDelta,
};

/// Signal code reported when a delta produces no pending changes.
pub const NOTHING_TO_PEND: i32 = 1;

/// Compute the pending changes for one delta and stage their content into
/// `working_dir`.
///
/// A delta with no `from` is a full-snapshot import: every file becomes an
/// add. An empty result is valid and means the delta is a no-op.
pub fn pend_delta(
    repo: &Path,
    delta: &CommitDelta,
    working_dir: &Path,
) -> Result<Vec<PendingChange>> {
    let Some(from) = &delta.from else {
        let files = git::ls_tree(repo, &delta.to).map_err(|e| git_error(&e))?;
        let mut changes = Vec::with_capacity(files.len());
        for path in files {
            stage(repo, &delta.to, &path, working_dir)?;
            changes.push(PendingChange {
                path,
                kind: ChangeKind::Add,
            });
        }
        return Ok(changes);
    };

    let mut changes = Vec::new();
    for file_change in git::diff_tree(repo, from, &delta.to).map_err(|e| git_error(&e))? {
        let path = file_change.path;
        let kind = match file_change.status {
            FileStatus::Added => ChangeKind::Add,
            FileStatus::Modified => ChangeKind::Edit,
            FileStatus::Deleted => {
                changes.push(PendingChange {
                    path,
                    kind: ChangeKind::Delete,
                });
                continue;
            }
            FileStatus::Renamed => ChangeKind::Rename {
                from: file_change.previous_path.unwrap_or_default(),
            },
        };
        stage(repo, &delta.to, &path, working_dir)?;
        changes.push(PendingChange { path, kind });
    }
    Ok(changes)
}

/// Materialize one file from a commit snapshot into the working folder.
fn stage(repo: &Path, commit: &str, path: &str, working_dir: &Path) -> Result<()> {
    git::show_file(repo, commit, path, &working_dir.join(path)).map_err(|e| git_error(&e))
}

/// Computes and stages the pending changes for a single delta.
///
/// Reports [`NOTHING_TO_PEND`] for a no-op delta; the computed changes are
/// taken by the caller after a successful run.
pub struct PendTask {
    /// Repository to read snapshots from.
    repo: PathBuf,
    /// The delta to materialize.
    delta: CommitDelta,
    /// Working folder to stage content into.
    working_dir: PathBuf,
    /// Computed changes, present after a successful non-empty run.
    changes: Option<Vec<PendingChange>>,
}

impl PendTask {
    /// Create a pend task for one delta.
    pub fn new(repo: &Path, delta: &CommitDelta, working_dir: &Path) -> Self {
        Self {
            repo: repo.to_path_buf(),
            delta: delta.clone(),
            working_dir: working_dir.to_path_buf(),
            changes: None,
        }
    }

    /// Take the computed changes, leaving the task empty.
    pub fn take_changes(&mut self) -> Vec<PendingChange> {
        self.changes.take().unwrap_or_default()
    }
}

impl Task for PendTask {
    fn name(&self) -> String {
        "pend changes".to_string()
    }

    fn run(&mut self, progress: &Progress) -> TaskStatus {
        progress.begin("Pending changes", None);
        match pend_delta(&self.repo, &self.delta, &self.working_dir) {
            Ok(changes) if changes.is_empty() => TaskStatus::ok_with_code(NOTHING_TO_PEND),
            Ok(changes) => {
                self.changes = Some(changes);
                TaskStatus::ok()
            }
            Err(error) => TaskStatus::from_error(error),
        }
    }
}
