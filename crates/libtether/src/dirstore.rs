use std::{
    env, fs,
    fs::OpenOptions,
    io,
    path::{Path, PathBuf},
    process,
};

use fs4::FileExt;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::{
    error::{Result, TetherError},
    remote::{
        Bundle, ChangeKind, CheckinRequest, ItemInfo, PendingChange, RemoteClient, RemoteWorkspace,
        WorkItemAction, WorkItemLink,
    },
};

/// Subdirectory holding the current snapshot tree.
const TREE_DIR: &str = "tree";
/// Subdirectory holding one record file per changeset.
const CHANGESETS_DIR: &str = "changesets";
/// Subdirectory holding shelveset records and content.
const SHELVESETS_DIR: &str = "shelvesets";
/// Subdirectory holding advisory path lock files.
const LOCKS_DIR: &str = "locks";
/// Store settings file.
const STORE_FILE: &str = "store.toml";
/// Store mutation lock file.
const STORE_LOCK: &str = "store.lock";

/// Store settings persisted at the store root.
#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    /// Id assigned to the next submitted changeset.
    next_changeset: i64,
    /// Whether submissions are gated and require an explicit override.
    #[serde(default)]
    gated: bool,
}

/// A file operation as recorded in a changeset or shelveset file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordedChange {
    /// Path relative to the submission's server path.
    path: String,
    /// Operation kind: `add`, `edit`, `delete`, or `rename`.
    kind: String,
    /// Previous path, for renames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    renamed_from: Option<String>,
}

/// A work-item link as recorded in a changeset or shelveset file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordedWorkItem {
    /// Work item identifier.
    id: u32,
    /// Link action: `associate` or `resolve`.
    action: String,
}

/// Record file written for every submitted changeset.
#[derive(Debug, Serialize, Deserialize)]
struct ChangesetFile {
    /// Changeset id.
    id: i64,
    /// Authoring identity.
    owner: String,
    /// Changeset comment.
    comment: String,
    /// Full store paths touched by this changeset.
    items: Vec<String>,
    /// The submitted operations.
    changes: Vec<RecordedChange>,
    /// Linked work items.
    #[serde(default)]
    work_items: Vec<RecordedWorkItem>,
}

/// Record file written for a shelveset.
#[derive(Debug, Serialize, Deserialize)]
struct ShelvesetFile {
    /// Shelveset name.
    name: String,
    /// Authoring identity.
    owner: String,
    /// Comment carried from the originating commit.
    comment: String,
    /// Unix timestamp (seconds) of creation.
    created_at: u64,
    /// Server path the changes apply under.
    server_path: String,
    /// The shelved operations.
    changes: Vec<RecordedChange>,
    /// Linked work items.
    #[serde(default)]
    work_items: Vec<RecordedWorkItem>,
}

/// Holds the store mutation lock for the duration of a submission.
struct StoreMutation {
    /// The lock file handle.
    file: fs::File,
}

impl StoreMutation {
    /// Take the exclusive store mutation lock.
    fn lock(root: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(root.join(STORE_LOCK))
            .map_err(store_io)?;
        file.lock_exclusive().map_err(store_io)?;
        Ok(Self { file })
    }
}

impl Drop for StoreMutation {
    #[allow(clippy::let_underscore_must_use)]
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// A changeset store backed by a plain directory.
///
/// The store keeps the current snapshot under `tree/`, one toml record per
/// changeset under `changesets/`, shelvesets under `shelvesets/`, and fs4
/// advisory lock files under `locks/`. It implements the same capability
/// contract a networked store client would.
pub struct DirStore {
    /// Store root directory.
    root: PathBuf,
}

impl DirStore {
    /// Initialize a fresh store at `root`. Fails if one already exists there.
    pub fn init(root: &Path) -> Result<Self> {
        let store_file = root.join(STORE_FILE);
        if store_file.exists() {
            return Err(TetherError::Remote(format!(
                "a store already exists at {}",
                root.display()
            )));
        }
        for dir in [TREE_DIR, CHANGESETS_DIR, SHELVESETS_DIR, LOCKS_DIR] {
            fs::create_dir_all(root.join(dir))?;
        }
        let store = Self {
            root: root.to_path_buf(),
        };
        store.write_settings(&StoreFile {
            next_changeset: 1,
            gated: false,
        })?;
        Ok(store)
    }

    /// Open an existing store at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        if !root.join(STORE_FILE).exists() {
            return Err(TetherError::Remote(format!(
                "no store found at {}",
                root.display()
            )));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Enable or disable gated submissions.
    pub fn set_gated(&self, gated: bool) -> Result<()> {
        let _lock = StoreMutation::lock(&self.root)?;
        let mut settings = self.read_settings()?;
        settings.gated = gated;
        self.write_settings(&settings)
    }

    /// Read the store settings file.
    fn read_settings(&self) -> Result<StoreFile> {
        let path = self.root.join(STORE_FILE);
        let contents = fs::read_to_string(&path)
            .map_err(|e| TetherError::Remote(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&contents)
            .map_err(|e| TetherError::Remote(format!("failed to parse {}: {e}", path.display())))
    }

    /// Write the store settings file.
    fn write_settings(&self, settings: &StoreFile) -> Result<()> {
        let path = self.root.join(STORE_FILE);
        let encoded = toml::to_string(settings)
            .map_err(|e| TetherError::Remote(format!("failed to encode store settings: {e}")))?;
        fs::write(&path, encoded)
            .map_err(|e| TetherError::Remote(format!("failed to write {}: {e}", path.display())))?;
        Ok(())
    }

    /// Absolute filesystem path of a store path inside the snapshot tree.
    fn tree_path(&self, store_path: &str) -> PathBuf {
        self.root.join(TREE_DIR).join(store_path)
    }

    /// Read every changeset record, unordered.
    fn changeset_records(&self) -> Result<Vec<ChangesetFile>> {
        let dir = self.root.join(CHANGESETS_DIR);
        let mut records = Vec::new();
        if !dir.exists() {
            return Ok(records);
        }
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "toml") {
                continue;
            }
            let contents = fs::read_to_string(&path).map_err(|e| {
                TetherError::Remote(format!("failed to read {}: {e}", path.display()))
            })?;
            let record = toml::from_str(&contents).map_err(|e| {
                TetherError::Remote(format!("failed to parse {}: {e}", path.display()))
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

impl RemoteClient for DirStore {
    fn authenticated_user(&self) -> String {
        env::var("USER")
            .or_else(|_| env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string())
    }

    fn query_items(
        &self,
        path: &str,
        recursive: bool,
        _include_deleted: bool,
    ) -> Result<Vec<ItemInfo>> {
        validate_store_path(path)?;
        let base = self.tree_path(path);
        let mut items = Vec::new();

        if base.is_file() {
            items.push(ItemInfo {
                server_path: path.to_string(),
                is_folder: false,
            });
            return Ok(items);
        }
        if !base.is_dir() {
            return Ok(items);
        }

        items.push(ItemInfo {
            server_path: path.to_string(),
            is_folder: true,
        });
        collect_items(&base, path, recursive, &mut items)?;
        Ok(items)
    }

    fn latest_changeset(&self, path: &str) -> Result<Option<i64>> {
        validate_store_path(path)?;
        if !self.tree_path(path).exists() {
            return Ok(None);
        }

        let prefix = format!("{path}/");
        let latest = self
            .changeset_records()?
            .into_iter()
            .filter(|record| {
                record
                    .items
                    .iter()
                    .any(|item| item == path || item.starts_with(&prefix))
            })
            .map(|record| record.id)
            .max();
        Ok(latest)
    }

    fn create_workspace(&self, prefix: &str) -> Result<Box<dyn RemoteWorkspace>> {
        let work = tempfile::Builder::new()
            .prefix(&format!("{prefix}-{}-", process::id()))
            .tempdir()
            .map_err(store_io)?;
        let work_path = work.path().to_path_buf();
        Ok(Box::new(DirWorkspace {
            root: self.root.clone(),
            work: Some(work),
            work_path,
            held: Vec::new(),
        }))
    }
}

/// Workspace bound to a [`DirStore`], holding a private working folder and
/// any advisory path locks taken through it.
struct DirWorkspace {
    /// Store root directory.
    root: PathBuf,
    /// Working folder handle; `None` once disposed.
    work: Option<TempDir>,
    /// Working folder path, kept past disposal for `working_dir`.
    work_path: PathBuf,
    /// Advisory locks held by this workspace.
    held: Vec<(String, fs::File)>,
}

impl DirWorkspace {
    /// Filesystem path of the lock file for a store path.
    fn lock_file_path(&self, path: &str) -> PathBuf {
        let encoded = path.replace('/', "__");
        self.root.join(LOCKS_DIR).join(format!("{encoded}.lock"))
    }

    /// Stage a file from the working folder into the snapshot tree.
    fn place(&self, tree: &Path, change: &PendingChange) -> Result<()> {
        let source = self.work_path.join(&change.path);
        if !source.is_file() {
            return Err(TetherError::Remote(format!(
                "no staged content for pending change: {}",
                change.path
            )));
        }
        let dest = tree.join(&change.path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&source, &dest)?;
        Ok(())
    }
}

impl RemoteWorkspace for DirWorkspace {
    fn working_dir(&self) -> &Path {
        &self.work_path
    }

    fn lock(&mut self, path: &str) -> Result<()> {
        validate_store_path(path)?;
        let lock_path = self.lock_file_path(path);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(store_io)?;

        if let Err(error) = file.try_lock_exclusive() {
            if error.kind() == io::ErrorKind::WouldBlock {
                return Err(TetherError::Remote(format!(
                    "server path {path} is locked by another client"
                )));
            }
            return Err(store_io(error));
        }

        self.held.push((path.to_string(), file));
        Ok(())
    }

    fn unlock(&mut self, path: &str) -> Result<()> {
        let Some(index) = self.held.iter().position(|(held, _)| held == path) else {
            return Err(TetherError::Remote(format!(
                "server path {path} is not locked by this workspace"
            )));
        };
        let (_, file) = self.held.remove(index);
        file.unlock().map_err(store_io)?;
        Ok(())
    }

    fn checkin(&mut self, server_path: &str, request: &CheckinRequest<'_>) -> Result<i64> {
        validate_store_path(server_path)?;
        if request.changes.is_empty() {
            return Err(TetherError::Remote(
                "refusing to create an empty changeset".to_string(),
            ));
        }

        let _mutation = StoreMutation::lock(&self.root)?;
        let store = DirStore {
            root: self.root.clone(),
        };
        let mut settings = store.read_settings()?;
        if settings.gated && !request.override_gated {
            return Err(TetherError::GatedCheckin);
        }

        let tree = store.tree_path(server_path);
        fs::create_dir_all(&tree)?;

        let mut items = vec![server_path.to_string()];
        for change in request.changes {
            validate_relative_path(&change.path)?;
            match &change.kind {
                ChangeKind::Add | ChangeKind::Edit => self.place(&tree, change)?,
                ChangeKind::Delete => {
                    let target = tree.join(&change.path);
                    if !target.is_file() {
                        return Err(TetherError::Remote(format!(
                            "cannot delete missing item: {}",
                            change.path
                        )));
                    }
                    fs::remove_file(&target)?;
                    prune_empty_dirs(target.parent(), &tree)?;
                }
                ChangeKind::Rename { from } => {
                    validate_relative_path(from)?;
                    let old = tree.join(from);
                    if !old.is_file() {
                        return Err(TetherError::Remote(format!(
                            "cannot rename missing item: {from}"
                        )));
                    }
                    fs::remove_file(&old)?;
                    prune_empty_dirs(old.parent(), &tree)?;
                    self.place(&tree, change)?;
                    items.push(store_path(server_path, from));
                }
            }
            items.push(store_path(server_path, &change.path));
        }

        let id = settings.next_changeset;
        let record = ChangesetFile {
            id,
            owner: store.authenticated_user(),
            comment: request.comment.to_string(),
            items,
            changes: request.changes.iter().map(record_change).collect(),
            work_items: request.work_items.iter().map(record_work_item).collect(),
        };
        let record_path = self.root.join(CHANGESETS_DIR).join(format!("{id}.toml"));
        let encoded = toml::to_string(&record)
            .map_err(|e| TetherError::Remote(format!("failed to encode changeset record: {e}")))?;
        fs::write(&record_path, encoded).map_err(|e| {
            TetherError::Remote(format!("failed to write {}: {e}", record_path.display()))
        })?;

        settings.next_changeset = id + 1;
        store.write_settings(&settings)?;
        Ok(id)
    }

    fn shelve(
        &mut self,
        server_path: &str,
        bundle: &Bundle,
        changes: &[PendingChange],
        replace: bool,
    ) -> Result<()> {
        validate_store_path(server_path)?;
        validate_bundle_name(&bundle.name)?;
        if changes.is_empty() {
            return Err(TetherError::Remote(
                "refusing to shelve an empty change set".to_string(),
            ));
        }

        let _mutation = StoreMutation::lock(&self.root)?;
        let record_path = self
            .root
            .join(SHELVESETS_DIR)
            .join(format!("{}.toml", bundle.name));
        let content_dir = self.root.join(SHELVESETS_DIR).join(&bundle.name);

        if record_path.exists() && !replace {
            return Err(TetherError::Remote(format!(
                "shelveset '{}' already exists (pass replace to overwrite)",
                bundle.name
            )));
        }
        if content_dir.exists() {
            fs::remove_dir_all(&content_dir)?;
        }

        for change in changes {
            validate_relative_path(&change.path)?;
            if matches!(change.kind, ChangeKind::Delete) {
                continue;
            }
            let source = self.work_path.join(&change.path);
            if !source.is_file() {
                return Err(TetherError::Remote(format!(
                    "no staged content for pending change: {}",
                    change.path
                )));
            }
            let dest = content_dir.join(&change.path);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&source, &dest)?;
        }

        let record = ShelvesetFile {
            name: bundle.name.clone(),
            owner: bundle.owner.clone(),
            comment: bundle.comment.clone(),
            created_at: bundle.created_at,
            server_path: server_path.to_string(),
            changes: changes.iter().map(record_change).collect(),
            work_items: bundle.work_items.iter().map(record_work_item).collect(),
        };
        let encoded = toml::to_string(&record)
            .map_err(|e| TetherError::Remote(format!("failed to encode shelveset record: {e}")))?;
        fs::write(&record_path, encoded).map_err(|e| {
            TetherError::Remote(format!("failed to write {}: {e}", record_path.display()))
        })?;
        Ok(())
    }

    fn dispose(&mut self) -> Result<()> {
        let mut first_error = None;
        for (_, file) in self.held.drain(..) {
            if let Err(error) = file.unlock() {
                first_error.get_or_insert(store_io(error));
            }
        }
        if let Some(work) = self.work.take()
            && let Err(error) = work.close()
        {
            first_error.get_or_insert(TetherError::Io(error));
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Walk a snapshot directory collecting item infos.
fn collect_items(
    dir: &Path,
    store_prefix: &str,
    recursive: bool,
    items: &mut Vec<ItemInfo>,
) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        let child_path = store_path(store_prefix, &name);
        if entry.file_type()?.is_dir() {
            items.push(ItemInfo {
                server_path: child_path.clone(),
                is_folder: true,
            });
            if recursive {
                collect_items(&entry.path(), &child_path, recursive, items)?;
            }
        } else {
            items.push(ItemInfo {
                server_path: child_path,
                is_folder: false,
            });
        }
    }
    Ok(())
}

/// Join a store path with a relative child path.
fn store_path(prefix: &str, child: &str) -> String {
    format!("{prefix}/{child}")
}

/// Remove now-empty directories from `start` up to (excluding) `boundary`.
fn prune_empty_dirs(start: Option<&Path>, boundary: &Path) -> Result<()> {
    let mut current = start;
    while let Some(dir) = current {
        if dir == boundary || !dir.starts_with(boundary) {
            break;
        }
        let is_empty = fs::read_dir(dir)?.next().is_none();
        if !is_empty {
            break;
        }
        fs::remove_dir(dir)?;
        current = dir.parent();
    }
    Ok(())
}

/// Validate a store path: relative, slash-separated, no traversal.
pub fn validate_store_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(TetherError::Validation(
            "server path must not be empty".to_string(),
        ));
    }
    if path.starts_with('/') || path.ends_with('/') {
        return Err(TetherError::Validation(format!(
            "server path must be relative with no trailing slash: {path}"
        )));
    }
    if path.contains('\\') {
        return Err(TetherError::Validation(format!(
            "server path must use forward slashes: {path}"
        )));
    }
    if path.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
        return Err(TetherError::Validation(format!(
            "server path contains invalid components: {path}"
        )));
    }
    Ok(())
}

/// Validate a path relative to a server path (a pending change path).
fn validate_relative_path(path: &str) -> Result<()> {
    validate_store_path(path)
}

/// Validate a shelveset name: letters, numbers, hyphens, and underscores.
fn validate_bundle_name(name: &str) -> Result<()> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(TetherError::Validation(format!(
            "shelveset names can only contain letters, numbers, hyphens, and underscores: '{name}'"
        )));
    }
    Ok(())
}

/// Convert a change into its recorded form.
fn record_change(change: &PendingChange) -> RecordedChange {
    let (kind, renamed_from) = match &change.kind {
        ChangeKind::Add => ("add", None),
        ChangeKind::Edit => ("edit", None),
        ChangeKind::Delete => ("delete", None),
        ChangeKind::Rename { from } => ("rename", Some(from.clone())),
    };
    RecordedChange {
        path: change.path.clone(),
        kind: kind.to_string(),
        renamed_from,
    }
}

/// Convert a work-item link into its recorded form.
fn record_work_item(link: &WorkItemLink) -> RecordedWorkItem {
    RecordedWorkItem {
        id: link.id,
        action: match link.action {
            WorkItemAction::Associate => "associate".to_string(),
            WorkItemAction::Resolve => "resolve".to_string(),
        },
    }
}

/// Map an IO error to a remote error.
#[allow(clippy::needless_pass_by_value)]
fn store_io(err: io::Error) -> TetherError {
    TetherError::Remote(format!("IO error: {err}"))
}
