use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    dirstore::validate_store_path,
    error::{Result, TetherError, git_error},
    git,
    map::{ChangesetCommitMap, Reconcile},
    pend::{NOTHING_TO_PEND, PendTask},
    remote::{CheckinRequest, PendingChange, RemoteClient, RemoteWorkspace, WorkItemLink},
    task::{Progress, Task, TaskExecutor, TaskStatus},
    walker::{self, WalkMode},
};

/// Signal code reported when there is nothing to synchronize.
pub const ALREADY_UP_TO_DATE: i32 = 1;

/// Number of deltas submitted when deep history is not requested.
pub const SHALLOW_DEPTH: usize = 1;

/// Options controlling a checkin run.
#[derive(Debug, Clone)]
pub struct CheckinOptions {
    /// Replay every commit instead of squashing to a bounded depth.
    pub deep: bool,
    /// Cap on the number of submitted deltas; older history is collapsed.
    pub depth: Option<usize>,
    /// Hold an advisory lock on the server path for the duration of the run.
    pub lock: bool,
    /// Collapse merge ancestry automatically even in deep mode.
    pub autosquash: bool,
    /// Commit id prefixes naming the parent to follow at merges (deep mode).
    pub squash_ids: Vec<String>,
    /// Work items to link to the final changeset.
    pub work_items: Vec<WorkItemLink>,
    /// Bypass the store's gated-submission policy.
    pub override_gated: bool,
    /// Override the comment of the final changeset.
    pub comment: Option<String>,
}

impl Default for CheckinOptions {
    fn default() -> Self {
        Self {
            deep: false,
            depth: None,
            lock: true,
            autosquash: false,
            squash_ids: Vec::new(),
            work_items: Vec::new(),
            override_gated: false,
            comment: None,
        }
    }
}

/// What a successful checkin run accomplished.
#[derive(Debug, Clone)]
pub struct CheckinOutcome {
    /// Number of deltas submitted as changesets.
    pub commits_checked_in: usize,
    /// Number of no-op deltas skipped.
    pub deltas_skipped: usize,
    /// Id of the last created changeset.
    pub last_changeset: i64,
    /// Commit the last changeset corresponds to.
    pub last_commit: String,
}

/// Owns the run's ephemeral workspace and optional server path lock.
///
/// Teardown is guaranteed on every exit path: dropping the guard releases the
/// lock (a failure is logged, never surfaced) and disposes the workspace.
pub struct WorkspaceGuard {
    /// The owned workspace.
    workspace: Box<dyn RemoteWorkspace>,
    /// Path the advisory lock was taken on.
    server_path: String,
    /// Whether the lock is currently held.
    locked: bool,
}

impl WorkspaceGuard {
    /// Create a workspace and optionally lock the server path.
    ///
    /// A lock failure disposes the just-created workspace before returning.
    pub fn acquire(remote: &dyn RemoteClient, server_path: &str, lock: bool) -> Result<Self> {
        let workspace = remote.create_workspace("tether")?;
        let mut guard = Self {
            workspace,
            server_path: server_path.to_string(),
            locked: false,
        };
        if lock {
            guard.workspace.lock(server_path)?;
            guard.locked = true;
        }
        Ok(guard)
    }

    /// Path of the workspace's working folder.
    pub fn working_dir(&self) -> PathBuf {
        self.workspace.working_dir().to_path_buf()
    }

    /// Mutable access to the owned workspace.
    pub fn workspace_mut(&mut self) -> &mut dyn RemoteWorkspace {
        self.workspace.as_mut()
    }

    /// Reset the working folder to an empty state.
    pub fn reset_working_dir(&self) -> Result<()> {
        let dir = self.workspace.working_dir();
        fs::remove_dir_all(dir)?;
        fs::create_dir_all(dir)?;
        Ok(())
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        if self.locked
            && let Err(error) = self.workspace.unlock(&self.server_path)
        {
            tracing::warn!(path = %self.server_path, %error, "failed to release server path lock during teardown");
        }
        if let Err(error) = self.workspace.dispose() {
            tracing::warn!(%error, "failed to dispose workspace during teardown");
        }
    }
}

/// Submits one staged change set to the store as a single changeset.
struct SubmitChangesTask<'a> {
    /// Workspace holding the staged content.
    workspace: &'a mut dyn RemoteWorkspace,
    /// Server path the changes apply under.
    server_path: &'a str,
    /// The changes to submit.
    changes: &'a [PendingChange],
    /// Changeset comment.
    comment: &'a str,
    /// Work items to link.
    work_items: &'a [WorkItemLink],
    /// Bypass gated submission.
    override_gated: bool,
    /// Id assigned by the store, present after a successful run.
    changeset: Option<i64>,
}

impl Task for SubmitChangesTask<'_> {
    fn name(&self) -> String {
        "checkin changes".to_string()
    }

    fn run(&mut self, progress: &Progress) -> TaskStatus {
        progress.begin("Checking in", None);
        let request = CheckinRequest {
            changes: self.changes,
            comment: self.comment,
            work_items: self.work_items,
            override_gated: self.override_gated,
        };
        match self.workspace.checkin(self.server_path, &request) {
            Ok(id) => {
                self.changeset = Some(id);
                TaskStatus::ok()
            }
            Err(error) => TaskStatus::from_error(error),
        }
    }
}

/// Top-level synchronization task: replay local history since the last
/// bridged commit into the store, one changeset per delta.
///
/// The run is a straight-line state machine: reconcile, acquire workspace
/// (and optionally a lock), walk, submit per delta oldest to newest, clean
/// up. Earlier submissions are never rolled back; the first failure stops the
/// loop and teardown still runs.
pub struct CheckinTask<'a> {
    /// Repository root.
    repo: PathBuf,
    /// The changeset store.
    remote: &'a dyn RemoteClient,
    /// Target server path.
    server_path: String,
    /// Run options.
    options: CheckinOptions,
    /// Result of the last successful run.
    outcome: Option<CheckinOutcome>,
}

impl<'a> CheckinTask<'a> {
    /// Create a checkin task, validating inputs before any remote
    /// interaction.
    pub fn new(
        repo_dir: &Path,
        remote: &'a dyn RemoteClient,
        server_path: &str,
        options: CheckinOptions,
    ) -> Result<Self> {
        validate_store_path(server_path)?;
        let repo = git::find_root(repo_dir).ok_or_else(|| {
            TetherError::Validation(format!("not a git repository: {}", repo_dir.display()))
        })?;
        Ok(Self {
            repo,
            remote,
            server_path: server_path.to_string(),
            options,
            outcome: None,
        })
    }

    /// What the last successful run accomplished, if anything was submitted.
    pub fn outcome(&self) -> Option<&CheckinOutcome> {
        self.outcome.as_ref()
    }

    /// Maximum number of deltas to submit for this run.
    fn effective_depth(&self) -> usize {
        if self.options.deep {
            self.options.depth.unwrap_or(usize::MAX)
        } else {
            self.options.depth.unwrap_or(SHALLOW_DEPTH)
        }
    }

    /// Walk mode for this run. Shallow runs never need guidance: history is
    /// squashed no matter which path is taken.
    fn walk_mode(&self) -> WalkMode {
        if self.options.autosquash || !self.options.deep {
            WalkMode::AutoSquash
        } else {
            WalkMode::Guided {
                squash_ids: self.options.squash_ids.clone(),
            }
        }
    }

    /// Short display form of a commit, falling back to a fixed-width prefix.
    fn short(&self, commit: &str) -> String {
        git::abbreviate(&self.repo, commit)
            .unwrap_or_else(|_| commit.chars().take(10).collect())
    }

    /// The run body; any error is converted to a status at the boundary.
    fn run_inner(&mut self, progress: &Progress) -> Result<TaskStatus> {
        progress.begin(&format!("Checking in to {}", self.server_path), None);

        if progress.cancelled() {
            return Err(TetherError::Cancelled);
        }

        let head = git::head_commit(&self.repo).map_err(|e| git_error(&e))?;
        let map = ChangesetCommitMap::new(&self.repo)?;

        let since = match map.reconcile(&self.repo, self.remote, &self.server_path, &head)? {
            Reconcile::UpToDate { .. } => {
                return Ok(TaskStatus::ok_with_code(ALREADY_UP_TO_DATE));
            }
            Reconcile::FirstSync => None,
            Reconcile::Resume { since } => Some(since),
        };

        progress.set_detail(Some("examining repository"));
        let deltas = walker::walk(&self.repo, since.as_deref(), &head, &self.walk_mode())?;
        let deltas = walker::limit_depth(deltas, self.effective_depth());
        progress.set_detail(None);

        if deltas.is_empty() {
            return Ok(TaskStatus::ok_with_code(ALREADY_UP_TO_DATE));
        }

        // From here on the guard owns the workspace and, when requested, the
        // server path lock; teardown runs on every exit path below.
        let mut guard = WorkspaceGuard::acquire(self.remote, &self.server_path, self.options.lock)?;
        let working_dir = guard.working_dir();
        let executor = TaskExecutor::new();

        progress.set_total(deltas.len() as u64 * 2);

        let mut checked_in = 0usize;
        let mut skipped = 0usize;
        let mut last: Option<(i64, String)> = None;

        for (index, delta) in deltas.iter().enumerate() {
            if progress.cancelled() {
                return Err(TetherError::Cancelled);
            }
            let is_last = index + 1 == deltas.len();
            progress.set_detail(Some(&format!("commit {}", self.short(&delta.to))));

            // Save space: the working folder is rebuilt for every delta.
            if index > 0
                && let Err(error) = guard.reset_working_dir()
            {
                tracing::warn!(%error, "could not reset the working folder");
            }

            let mut pend = PendTask::new(&self.repo, delta, &working_dir);
            let pend_status = executor.execute(&mut pend, progress.subtask(1));
            if !pend_status.is_ok() {
                return Ok(pend_status);
            }
            if pend_status.code() == Some(NOTHING_TO_PEND) {
                skipped += 1;
                progress.advance(1);
                continue;
            }
            let changes = pend.take_changes();

            let comment = match (&self.options.comment, is_last) {
                (Some(comment), true) => comment.clone(),
                _ => git::commit_message(&self.repo, &delta.to).map_err(|e| git_error(&e))?,
            };
            let work_items: &[WorkItemLink] = if is_last {
                &self.options.work_items
            } else {
                &[]
            };

            let mut submit = SubmitChangesTask {
                workspace: guard.workspace_mut(),
                server_path: &self.server_path,
                changes: &changes,
                comment: &comment,
                work_items,
                override_gated: self.options.override_gated,
                changeset: None,
            };
            let submit_status = executor.execute(&mut submit, progress.subtask(1));
            if !submit_status.is_ok() {
                return Ok(submit_status);
            }
            let changeset = submit.changeset.ok_or_else(|| {
                TetherError::Remote("submission reported no changeset id".to_string())
            })?;

            map.record(&delta.to, changeset)?;
            progress.message(&format!(
                "Checked in commit {} as changeset {changeset}",
                self.short(&delta.to)
            ));
            checked_in += 1;
            last = Some((changeset, delta.to.clone()));
        }

        let Some((last_changeset, last_commit)) = last else {
            // Every delta pended empty: nothing was actually submitted.
            return Ok(TaskStatus::ok_with_code(ALREADY_UP_TO_DATE));
        };

        self.outcome = Some(CheckinOutcome {
            commits_checked_in: checked_in,
            deltas_skipped: skipped,
            last_changeset,
            last_commit,
        });
        Ok(TaskStatus::ok())
    }
}

impl Task for CheckinTask<'_> {
    fn name(&self) -> String {
        "checkin".to_string()
    }

    fn run(&mut self, progress: &Progress) -> TaskStatus {
        match self.run_inner(progress) {
            Ok(status) => status,
            Err(error) => TaskStatus::from_error(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::ItemInfo;

    /// Remote that refuses everything; only used for constructor checks.
    struct InertRemote;

    impl RemoteClient for InertRemote {
        fn authenticated_user(&self) -> String {
            "inert".to_string()
        }

        fn query_items(
            &self,
            _path: &str,
            _recursive: bool,
            _include_deleted: bool,
        ) -> Result<Vec<ItemInfo>> {
            Ok(Vec::new())
        }

        fn latest_changeset(&self, _path: &str) -> Result<Option<i64>> {
            Ok(None)
        }

        fn create_workspace(&self, _prefix: &str) -> Result<Box<dyn RemoteWorkspace>> {
            Err(TetherError::Remote("inert".to_string()))
        }
    }

    #[test]
    fn new_rejects_invalid_server_paths() {
        let remote = InertRemote;
        let err = CheckinTask::new(
            Path::new("/nonexistent"),
            &remote,
            "",
            CheckinOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TetherError::Validation(_)));
    }

    #[test]
    fn new_rejects_non_repositories() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = InertRemote;
        let err = CheckinTask::new(tmp.path(), &remote, "proj", CheckinOptions::default())
            .unwrap_err();
        assert!(matches!(err, TetherError::Validation(_)));
    }

    #[test]
    fn depth_defaults_follow_the_mode() {
        let tmp = tempfile::tempdir().unwrap();
        std::process::Command::new("git")
            .current_dir(tmp.path())
            .args(["init", "-b", "main"])
            .output()
            .unwrap();
        let remote = InertRemote;

        let shallow =
            CheckinTask::new(tmp.path(), &remote, "proj", CheckinOptions::default()).unwrap();
        assert_eq!(shallow.effective_depth(), SHALLOW_DEPTH);
        assert!(matches!(shallow.walk_mode(), WalkMode::AutoSquash));

        let deep = CheckinTask::new(
            tmp.path(),
            &remote,
            "proj",
            CheckinOptions {
                deep: true,
                ..CheckinOptions::default()
            },
        )
        .unwrap();
        assert_eq!(deep.effective_depth(), usize::MAX);
        assert!(matches!(deep.walk_mode(), WalkMode::Guided { .. }));

        let bounded = CheckinTask::new(
            tmp.path(),
            &remote,
            "proj",
            CheckinOptions {
                depth: Some(4),
                ..CheckinOptions::default()
            },
        )
        .unwrap();
        assert_eq!(bounded.effective_depth(), 4);
    }
}
