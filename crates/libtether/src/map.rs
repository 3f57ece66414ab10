use std::{
    fs,
    fs::OpenOptions,
    io,
    path::{Path, PathBuf},
};

use fs4::FileExt;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, TetherError, git_error},
    git,
    remote::RemoteClient,
};

/// One recorded correspondence between a server changeset and a local commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesetRecord {
    /// Server-assigned changeset id.
    pub changeset: i64,
    /// Mapped local commit. `None` means the changeset was created outside
    /// this bridge.
    pub commit: Option<String>,
}

/// On-disk shape of the map file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct MapFile {
    /// Recorded mappings, oldest first.
    #[serde(default)]
    entries: Vec<ChangesetRecord>,
}

/// Holds the map's file lock for the duration of a mutation.
struct MapLock {
    /// The lock file handle.
    file: fs::File,
}

impl Drop for MapLock {
    #[allow(clippy::let_underscore_must_use)]
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Result of reconciling local history against the store before a checkin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconcile {
    /// Nothing has been bridged yet; the next run performs a full import.
    FirstSync,
    /// The head commit is already the newest changeset on the store.
    UpToDate {
        /// The changeset the head commit maps to.
        changeset: i64,
    },
    /// Resume replay from the given previously-bridged commit.
    Resume {
        /// Last commit both sides agree on.
        since: String,
    },
}

/// Append-only, monotonic map between local commits and server changesets.
///
/// The map lives next to the repository under `.git/tether/` and is guarded
/// by an exclusive file lock, so concurrent local invocations cannot corrupt
/// it.
pub struct ChangesetCommitMap {
    /// Directory containing the map file and its lock.
    dir: PathBuf,
}

impl ChangesetCommitMap {
    /// Directory name under the repository's git directory.
    pub const DIR_NAME: &'static str = "tether";

    /// Open (or lazily create) the map for the repository at `repo_dir`.
    pub fn new(repo_dir: &Path) -> Result<Self> {
        let git_dir = git::git_dir(repo_dir).map_err(|e| git_error(&e))?;
        Ok(Self {
            dir: git_dir.join(Self::DIR_NAME),
        })
    }

    /// Path of the persisted map file.
    fn map_path(&self) -> PathBuf {
        self.dir.join("map.toml")
    }

    /// Path of the map's lock file.
    fn lock_path(&self) -> PathBuf {
        self.dir.join("map.lock")
    }

    /// Take the exclusive map lock.
    fn lock(&self) -> Result<MapLock> {
        fs::create_dir_all(&self.dir)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path())
            .map_err(map_io)?;
        file.lock_exclusive().map_err(map_io)?;
        Ok(MapLock { file })
    }

    /// Read the map file; a missing file is an empty map.
    fn load(&self) -> Result<MapFile> {
        let path = self.map_path();
        if !path.exists() {
            return Ok(MapFile::default());
        }
        let contents = fs::read_to_string(&path)
            .map_err(|e| TetherError::Map(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&contents)
            .map_err(|e| TetherError::Map(format!("failed to parse {}: {e}", path.display())))
    }

    /// Persist the map file.
    fn store(&self, file: &MapFile) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.map_path();
        let encoded = toml::to_string(file)
            .map_err(|e| TetherError::Map(format!("failed to encode map: {e}")))?;
        fs::write(&path, encoded)
            .map_err(|e| TetherError::Map(format!("failed to write {}: {e}", path.display())))?;
        Ok(())
    }

    /// Record a new `(commit, changeset)` mapping.
    ///
    /// Append-only: the commit must not already be mapped and the changeset
    /// id must exceed every recorded one.
    pub fn record(&self, commit: &str, changeset: i64) -> Result<()> {
        let _lock = self.lock()?;
        let mut file = self.load()?;

        if let Some(existing) = file
            .entries
            .iter()
            .find(|e| e.commit.as_deref() == Some(commit))
        {
            return Err(TetherError::Map(format!(
                "commit {commit} is already mapped to changeset {}",
                existing.changeset
            )));
        }
        if let Some(last) = file.entries.last()
            && changeset <= last.changeset
        {
            return Err(TetherError::Map(format!(
                "changeset ids must be strictly increasing (got {changeset}, last recorded {})",
                last.changeset
            )));
        }

        file.entries.push(ChangesetRecord {
            changeset,
            commit: Some(commit.to_string()),
        });
        self.store(&file)
    }

    /// All recorded mappings, oldest first.
    pub fn entries(&self) -> Result<Vec<ChangesetRecord>> {
        Ok(self.load()?.entries)
    }

    /// The most recently recorded mapping, or `None` for an empty map.
    pub fn last_bridged(&self) -> Result<Option<ChangesetRecord>> {
        let file = self.load()?;
        Ok(file
            .entries
            .iter()
            .rev()
            .find(|e| e.commit.is_some())
            .cloned())
    }

    /// Commit mapped to `changeset`, if the bridge created it.
    pub fn commit_for(&self, changeset: i64) -> Result<Option<String>> {
        let file = self.load()?;
        Ok(file
            .entries
            .iter()
            .find(|e| e.changeset == changeset)
            .and_then(|e| e.commit.clone()))
    }

    /// The store's newest changeset touching `path`, cross-referenced against
    /// the map. The record's `commit` is `None` when the changeset was not
    /// created by this bridge.
    pub fn latest_on_server(
        &self,
        remote: &dyn RemoteClient,
        path: &str,
    ) -> Result<Option<ChangesetRecord>> {
        let Some(changeset) = remote.latest_changeset(path)? else {
            return Ok(None);
        };
        Ok(Some(ChangesetRecord {
            changeset,
            commit: self.commit_for(changeset)?,
        }))
    }

    /// Pre-checkin reconciliation of local history against the store.
    ///
    /// Fails with a precondition error before any remote mutation when the
    /// target is not empty on first sync, when the store's newest changeset
    /// at `server_path` is unknown to the map (or local history has diverged
    /// from it), or when the server path has been deleted.
    pub fn reconcile(
        &self,
        repo_dir: &Path,
        remote: &dyn RemoteClient,
        server_path: &str,
        head: &str,
    ) -> Result<Reconcile> {
        let last_bridged = self.last_bridged()?;
        let latest = self.latest_on_server(remote, server_path)?;

        if last_bridged.is_none() {
            // Never checked in before: the target must be empty or absent.
            let items = remote.query_items(server_path, true, true)?;
            let only_the_folder_itself =
                items.len() == 1 && items[0].server_path == server_path && items[0].is_folder;
            if !items.is_empty() && !only_the_folder_itself {
                return Err(TetherError::NonEmptyTarget {
                    path: server_path.to_string(),
                });
            }
            return Ok(Reconcile::FirstSync);
        }

        let Some(latest) = latest else {
            // We bridged history to this path before, but it is gone now.
            return Err(TetherError::ServerPathDeleted {
                path: server_path.to_string(),
            });
        };

        let Some(since) = latest.commit else {
            // The newest changeset was made outside this bridge.
            return Err(TetherError::NotFastForward {
                changeset: latest.changeset,
            });
        };

        if since == head {
            return Ok(Reconcile::UpToDate {
                changeset: latest.changeset,
            });
        }

        if !git::is_ancestor(repo_dir, &since, head).map_err(|e| git_error(&e))? {
            return Err(TetherError::NotFastForward {
                changeset: latest.changeset,
            });
        }

        Ok(Reconcile::Resume { since })
    }
}

/// Map an IO error to a map error.
#[allow(clippy::needless_pass_by_value)]
fn map_io(err: io::Error) -> TetherError {
    TetherError::Map(format!("IO error: {err}"))
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use tempfile::TempDir;

    use super::*;
    use crate::remote::{ItemInfo, RemoteWorkspace};

    /// Remote stub returning canned answers for reconciliation queries.
    struct StubRemote {
        items: Vec<ItemInfo>,
        latest: Option<i64>,
    }

    impl RemoteClient for StubRemote {
        fn authenticated_user(&self) -> String {
            "stub".to_string()
        }

        fn query_items(
            &self,
            _path: &str,
            _recursive: bool,
            _include_deleted: bool,
        ) -> Result<Vec<ItemInfo>> {
            Ok(self.items.clone())
        }

        fn latest_changeset(&self, _path: &str) -> Result<Option<i64>> {
            Ok(self.latest)
        }

        fn create_workspace(&self, _prefix: &str) -> Result<Box<dyn RemoteWorkspace>> {
            Err(TetherError::Remote("stub has no workspaces".to_string()))
        }
    }

    fn run_git(repo: &Path, args: &[&str]) {
        let output = Command::new("git")
            .current_dir(repo)
            .args(args)
            .output()
            .unwrap();
        assert!(output.status.success(), "git {} failed", args.join(" "));
    }

    fn setup_repo() -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().to_path_buf();
        run_git(&repo, &["init", "-b", "main"]);
        run_git(&repo, &["config", "user.email", "test@example.com"]);
        run_git(&repo, &["config", "user.name", "Test User"]);
        (tmp, repo)
    }

    fn commit(repo: &Path, file: &str, content: &str, message: &str) -> String {
        fs::write(repo.join(file), content).unwrap();
        run_git(repo, &["add", "."]);
        run_git(repo, &["commit", "-m", message]);
        git::head_commit(repo).unwrap()
    }

    #[test]
    fn record_and_read_back() {
        let (_tmp, repo) = setup_repo();
        commit(&repo, "a.txt", "1", "a");
        let map = ChangesetCommitMap::new(&repo).unwrap();

        assert!(map.last_bridged().unwrap().is_none());

        map.record("c1", 10).unwrap();
        map.record("c2", 11).unwrap();

        let last = map.last_bridged().unwrap().unwrap();
        assert_eq!(last.changeset, 11);
        assert_eq!(last.commit.as_deref(), Some("c2"));

        assert_eq!(map.commit_for(10).unwrap().as_deref(), Some("c1"));
        assert_eq!(map.commit_for(12).unwrap(), None);
        assert_eq!(map.entries().unwrap().len(), 2);
    }

    #[test]
    fn record_rejects_duplicate_commit() {
        let (_tmp, repo) = setup_repo();
        commit(&repo, "a.txt", "1", "a");
        let map = ChangesetCommitMap::new(&repo).unwrap();

        map.record("c1", 10).unwrap();
        let err = map.record("c1", 11).unwrap_err();
        assert!(matches!(err, TetherError::Map(_)));
    }

    #[test]
    fn record_rejects_non_increasing_changesets() {
        let (_tmp, repo) = setup_repo();
        commit(&repo, "a.txt", "1", "a");
        let map = ChangesetCommitMap::new(&repo).unwrap();

        map.record("c1", 10).unwrap();
        assert!(map.record("c2", 10).is_err());
        assert!(map.record("c2", 9).is_err());
        map.record("c2", 11).unwrap();
    }

    #[test]
    fn reconcile_first_sync_requires_empty_target() {
        let (_tmp, repo) = setup_repo();
        let head = commit(&repo, "a.txt", "1", "a");
        let map = ChangesetCommitMap::new(&repo).unwrap();

        let empty = StubRemote {
            items: Vec::new(),
            latest: None,
        };
        assert_eq!(
            map.reconcile(&repo, &empty, "proj/app", &head).unwrap(),
            Reconcile::FirstSync
        );

        // The target folder itself may exist as long as it is empty.
        let folder_only = StubRemote {
            items: vec![ItemInfo {
                server_path: "proj/app".to_string(),
                is_folder: true,
            }],
            latest: None,
        };
        assert_eq!(
            map.reconcile(&repo, &folder_only, "proj/app", &head).unwrap(),
            Reconcile::FirstSync
        );

        let populated = StubRemote {
            items: vec![ItemInfo {
                server_path: "proj/app/file.txt".to_string(),
                is_folder: false,
            }],
            latest: Some(3),
        };
        let err = map.reconcile(&repo, &populated, "proj/app", &head).unwrap_err();
        assert!(matches!(err, TetherError::NonEmptyTarget { .. }));
    }

    #[test]
    fn reconcile_detects_out_of_band_changesets() {
        let (_tmp, repo) = setup_repo();
        let head = commit(&repo, "a.txt", "1", "a");
        let map = ChangesetCommitMap::new(&repo).unwrap();
        map.record(&head, 5).unwrap();

        let remote = StubRemote {
            items: Vec::new(),
            latest: Some(6),
        };
        let err = map.reconcile(&repo, &remote, "proj/app", &head).unwrap_err();
        assert!(matches!(err, TetherError::NotFastForward { changeset: 6 }));
    }

    #[test]
    fn reconcile_detects_deleted_server_path() {
        let (_tmp, repo) = setup_repo();
        let head = commit(&repo, "a.txt", "1", "a");
        let map = ChangesetCommitMap::new(&repo).unwrap();
        map.record(&head, 5).unwrap();

        let remote = StubRemote {
            items: Vec::new(),
            latest: None,
        };
        let err = map.reconcile(&repo, &remote, "proj/app", &head).unwrap_err();
        assert!(matches!(err, TetherError::ServerPathDeleted { .. }));
    }

    #[test]
    fn reconcile_reports_up_to_date() {
        let (_tmp, repo) = setup_repo();
        let head = commit(&repo, "a.txt", "1", "a");
        let map = ChangesetCommitMap::new(&repo).unwrap();
        map.record(&head, 5).unwrap();

        let remote = StubRemote {
            items: Vec::new(),
            latest: Some(5),
        };
        assert_eq!(
            map.reconcile(&repo, &remote, "proj/app", &head).unwrap(),
            Reconcile::UpToDate { changeset: 5 }
        );
    }

    #[test]
    fn reconcile_resumes_from_bridged_ancestor() {
        let (_tmp, repo) = setup_repo();
        let first = commit(&repo, "a.txt", "1", "a");
        let head = commit(&repo, "a.txt", "2", "b");
        let map = ChangesetCommitMap::new(&repo).unwrap();
        map.record(&first, 5).unwrap();

        let remote = StubRemote {
            items: Vec::new(),
            latest: Some(5),
        };
        assert_eq!(
            map.reconcile(&repo, &remote, "proj/app", &head).unwrap(),
            Reconcile::Resume { since: first }
        );
    }

    #[test]
    fn reconcile_rejects_diverged_local_history() {
        let (_tmp, repo) = setup_repo();
        let base = commit(&repo, "a.txt", "1", "base");
        let mapped = commit(&repo, "a.txt", "2", "mapped");

        // Head diverges from the mapped commit.
        run_git(&repo, &["checkout", "-b", "other", &base]);
        let head = commit(&repo, "b.txt", "x", "divergent");

        let map = ChangesetCommitMap::new(&repo).unwrap();
        map.record(&mapped, 5).unwrap();

        let remote = StubRemote {
            items: Vec::new(),
            latest: Some(5),
        };
        let err = map.reconcile(&repo, &remote, "proj/app", &head).unwrap_err();
        assert!(matches!(err, TetherError::NotFastForward { changeset: 5 }));
    }
}
