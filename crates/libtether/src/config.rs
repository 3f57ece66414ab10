use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{git, map::ChangesetCommitMap};

/// Persisted bridge configuration, stored under the repository's git
/// directory next to the changeset-commit map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Filesystem path of the changeset store.
    pub store: PathBuf,
    /// Server path history is checked in to.
    pub server_path: String,
    /// Default to deep history replication.
    #[serde(default)]
    pub deep: bool,
    /// Default cap on the number of submitted deltas.
    #[serde(default)]
    pub depth: Option<usize>,
}

impl BridgeConfig {
    /// File name of the persisted configuration.
    pub const FILE_NAME: &'static str = "config.toml";

    /// Path of the configuration file for a repository.
    fn config_path(repo_dir: &Path) -> Result<PathBuf> {
        let git_dir = git::git_dir(repo_dir)?;
        Ok(git_dir
            .join(ChangesetCommitMap::DIR_NAME)
            .join(Self::FILE_NAME))
    }

    /// Read the configuration, returning `None` when the repository has not
    /// been configured.
    pub fn load(repo_dir: &Path) -> Result<Option<Self>> {
        let path = Self::config_path(repo_dir)?;
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(Some(config))
    }

    /// Persist the configuration, creating the directory if needed.
    pub fn save(&self, repo_dir: &Path) -> Result<()> {
        let path = Self::config_path(repo_dir)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }

        let encoded = toml::to_string(self).context("Failed to encode configuration")?;
        fs::write(&path, encoded)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use tempfile::TempDir;

    use super::*;

    fn setup_repo() -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().to_path_buf();
        let output = Command::new("git")
            .current_dir(&repo)
            .args(["init", "-b", "main"])
            .output()
            .unwrap();
        assert!(output.status.success());
        (tmp, repo)
    }

    #[test]
    fn config_round_trip() {
        let (_tmp, repo) = setup_repo();

        let config = BridgeConfig {
            store: PathBuf::from("/srv/store"),
            server_path: "proj/app".to_string(),
            deep: true,
            depth: Some(12),
        };

        config.save(&repo).unwrap();
        let loaded = BridgeConfig::load(&repo).unwrap().unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn missing_config_returns_none() {
        let (_tmp, repo) = setup_repo();
        assert!(BridgeConfig::load(&repo).unwrap().is_none());
    }
}
