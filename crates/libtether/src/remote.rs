use std::path::Path;

use crate::error::Result;

/// File-level operation kinds awaiting submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    /// The path is new in this submission.
    Add,
    /// The path's content changed.
    Edit,
    /// The path is removed by this submission.
    Delete,
    /// The path moved; content may have changed as well.
    Rename {
        /// Path the item previously lived at.
        from: String,
    },
}

/// A single file-level operation awaiting submission.
///
/// Paths are relative to the server path of the submission. For adds, edits,
/// and renames, the new content is staged at the same relative path inside
/// the workspace's working folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    /// Path relative to the submission's server path.
    pub path: String,
    /// The operation to perform.
    pub kind: ChangeKind,
}

/// Action to perform on a linked work item when a changeset is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkItemAction {
    /// Associate the work item with the changeset.
    Associate,
    /// Resolve the work item when the changeset is created.
    Resolve,
}

/// Link between a submission and an external tracking record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItemLink {
    /// Work item identifier.
    pub id: u32,
    /// What to do with the work item.
    pub action: WorkItemAction,
}

/// An item that exists under a server path.
#[derive(Debug, Clone)]
pub struct ItemInfo {
    /// Full server-side path of the item.
    pub server_path: String,
    /// Whether the item is a folder.
    pub is_folder: bool,
}

/// One changeset submission.
#[derive(Debug)]
pub struct CheckinRequest<'a> {
    /// Ordered file operations to apply.
    pub changes: &'a [PendingChange],
    /// Changeset comment.
    pub comment: &'a str,
    /// Work items to link to the new changeset.
    pub work_items: &'a [WorkItemLink],
    /// Bypass the store's gated-submission policy.
    pub override_gated: bool,
}

/// A named, replaceable container of pending changes held for review.
///
/// Bundles are a non-authoritative side channel: they are never recorded in
/// the changeset-commit map.
#[derive(Debug, Clone)]
pub struct Bundle {
    /// Bundle name, unique per owner.
    pub name: String,
    /// Authoring identity.
    pub owner: String,
    /// Comment carried over from the originating commit.
    pub comment: String,
    /// Work items referenced by the bundle.
    pub work_items: Vec<WorkItemLink>,
    /// Unix timestamp (seconds) of creation.
    pub created_at: u64,
}

/// Client-side view of the centralized changeset store.
pub trait RemoteClient {
    /// Identity that submissions and bundles are authored as.
    fn authenticated_user(&self) -> String;

    /// List items under `path`, optionally recursing and including items in a
    /// deleted state where the store tracks them.
    fn query_items(&self, path: &str, recursive: bool, include_deleted: bool)
    -> Result<Vec<ItemInfo>>;

    /// Highest changeset id that touched `path`, or `None` when the path does
    /// not exist on the store.
    fn latest_changeset(&self, path: &str) -> Result<Option<i64>>;

    /// Create an ephemeral workspace with a private working folder. The
    /// caller exclusively owns the workspace for one run and must dispose it.
    fn create_workspace(&self, prefix: &str) -> Result<Box<dyn RemoteWorkspace>>;
}

/// An exclusively-owned, ephemeral checkout area on the store.
pub trait RemoteWorkspace {
    /// Private on-disk working folder where submission content is staged.
    fn working_dir(&self) -> &Path;

    /// Acquire an advisory exclusive lock on a server path. The lock guards
    /// against other clients of the store, not against this process.
    fn lock(&mut self, path: &str) -> Result<()>;

    /// Release a previously acquired lock on `path`.
    fn unlock(&mut self, path: &str) -> Result<()>;

    /// Submit the staged pending changes under `server_path` as one
    /// changeset, returning its new id. Fails with
    /// [`crate::TetherError::GatedCheckin`] when the store gates submissions
    /// and the request does not override.
    fn checkin(&mut self, server_path: &str, request: &CheckinRequest<'_>) -> Result<i64>;

    /// Create (or, with `replace`, overwrite) a named bundle of the staged
    /// pending changes under `server_path`.
    fn shelve(
        &mut self,
        server_path: &str,
        bundle: &Bundle,
        changes: &[PendingChange],
        replace: bool,
    ) -> Result<()>;

    /// Tear the workspace down, releasing held locks and removing the
    /// working folder. Idempotent.
    fn dispose(&mut self) -> Result<()>;
}
