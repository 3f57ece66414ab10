use std::{fs, path::Path};

use anyhow::{Context, Result};
use libtether::{
    config::BridgeConfig,
    dirstore::{DirStore, validate_store_path},
};
use tether_term::Output;

use crate::ui::emit;

/// Run the `tether configure` command logic.
pub fn configure_command(
    repo_dir: &Path,
    output: &dyn Output,
    store: &str,
    server_path: &str,
    deep: bool,
    depth: Option<usize>,
) -> Result<()> {
    validate_store_path(server_path)?;

    let store_dir = Path::new(store);
    if store_dir.join("store.toml").exists() {
        DirStore::open(store_dir)?;
    } else {
        fs::create_dir_all(store_dir)
            .with_context(|| format!("Failed to create store directory {store}"))?;
        DirStore::init(store_dir)?;
        emit(output.message(&format!("Initialized a new changeset store at {store}")))?;
    }

    let store_dir = fs::canonicalize(store_dir)
        .with_context(|| format!("Failed to resolve store directory {store}"))?;

    let config = BridgeConfig {
        store: store_dir,
        server_path: server_path.to_string(),
        deep,
        depth,
    };
    config.save(repo_dir)?;

    emit(output.success(&format!(
        "Configured checkins to {server_path} on {}",
        config.store.display()
    )))?;
    Ok(())
}
