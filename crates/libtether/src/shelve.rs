use std::{
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    error::{Result, TetherError},
    git,
    remote::{Bundle, PendingChange, RemoteWorkspace, WorkItemLink},
    task::{Progress, Task, TaskStatus},
};

/// Packages an already-computed pending change set into a named bundle on
/// the store.
///
/// Bundles are a review-only side channel: this task never writes to the
/// changeset-commit map, and the store applies the bundle atomically, so no
/// cleanup is needed beyond normal status handling.
pub struct ShelveTask<'a> {
    /// Repository the originating commit lives in.
    repo: PathBuf,
    /// Workspace holding the staged content.
    workspace: &'a mut dyn RemoteWorkspace,
    /// Server path the changes apply under.
    server_path: String,
    /// Commit supplying the bundle comment.
    commit: String,
    /// The changes to bundle.
    changes: Vec<PendingChange>,
    /// Bundle name.
    name: String,
    /// Authoring identity.
    owner: String,
    /// Work items to reference from the bundle.
    work_items: Vec<WorkItemLink>,
    /// Overwrite an existing bundle of the same name.
    replace: bool,
}

impl<'a> ShelveTask<'a> {
    /// Create a shelve task, validating inputs before any remote interaction.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo_dir: &Path,
        workspace: &'a mut dyn RemoteWorkspace,
        server_path: &str,
        commit: &str,
        changes: Vec<PendingChange>,
        name: &str,
        owner: &str,
        replace: bool,
    ) -> Result<Self> {
        if changes.is_empty() {
            return Err(TetherError::Validation(
                "nothing to shelve: the pending change set is empty".to_string(),
            ));
        }
        if name.is_empty() {
            return Err(TetherError::Validation(
                "shelveset name must not be empty".to_string(),
            ));
        }
        if commit.is_empty() {
            return Err(TetherError::Validation(
                "shelving requires a source commit".to_string(),
            ));
        }
        Ok(Self {
            repo: repo_dir.to_path_buf(),
            workspace,
            server_path: server_path.to_string(),
            commit: commit.to_string(),
            changes,
            name: name.to_string(),
            owner: owner.to_string(),
            work_items: Vec::new(),
            replace,
        })
    }

    /// Attach work items to the bundle.
    pub fn set_work_items(&mut self, work_items: Vec<WorkItemLink>) {
        self.work_items = work_items;
    }
}

impl Task for ShelveTask<'_> {
    fn name(&self) -> String {
        "shelve".to_string()
    }

    fn run(&mut self, progress: &Progress) -> TaskStatus {
        progress.begin(&format!("Shelving {} changes", self.changes.len()), None);

        let comment = match git::commit_message(&self.repo, &self.commit) {
            Ok(comment) => comment,
            Err(error) => return TaskStatus::from_error(TetherError::Git(error.to_string())),
        };

        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let bundle = Bundle {
            name: self.name.clone(),
            owner: self.owner.clone(),
            comment,
            work_items: self.work_items.clone(),
            created_at,
        };

        match self
            .workspace
            .shelve(&self.server_path, &bundle, &self.changes, self.replace)
        {
            Ok(()) => TaskStatus::ok(),
            Err(error) => TaskStatus::from_error(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{ChangeKind, CheckinRequest};

    /// Workspace stub for constructor validation.
    struct InertWorkspace {
        /// Fake working folder path.
        dir: PathBuf,
    }

    impl RemoteWorkspace for InertWorkspace {
        fn working_dir(&self) -> &Path {
            &self.dir
        }

        fn lock(&mut self, _path: &str) -> Result<()> {
            Ok(())
        }

        fn unlock(&mut self, _path: &str) -> Result<()> {
            Ok(())
        }

        fn checkin(&mut self, _server_path: &str, _request: &CheckinRequest<'_>) -> Result<i64> {
            Err(TetherError::Remote("inert".to_string()))
        }

        fn shelve(
            &mut self,
            _server_path: &str,
            _bundle: &Bundle,
            _changes: &[PendingChange],
            _replace: bool,
        ) -> Result<()> {
            Ok(())
        }

        fn dispose(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn new_rejects_empty_change_sets() {
        let mut workspace = InertWorkspace {
            dir: PathBuf::from("/tmp"),
        };
        let err = ShelveTask::new(
            Path::new("."),
            &mut workspace,
            "proj",
            "abc123",
            Vec::new(),
            "bundle",
            "tester",
            false,
        )
        .unwrap_err();
        assert!(matches!(err, TetherError::Validation(_)));
    }

    #[test]
    fn new_rejects_missing_names() {
        let mut workspace = InertWorkspace {
            dir: PathBuf::from("/tmp"),
        };
        let changes = vec![PendingChange {
            path: "a.txt".to_string(),
            kind: ChangeKind::Add,
        }];
        let err = ShelveTask::new(
            Path::new("."),
            &mut workspace,
            "proj",
            "abc123",
            changes,
            "",
            "tester",
            false,
        )
        .unwrap_err();
        assert!(matches!(err, TetherError::Validation(_)));
    }
}
