use std::{path::Path, sync::Arc};

use anyhow::{Result, anyhow};
use libtether::{
    checkin::WorkspaceGuard,
    config::BridgeConfig,
    dirstore::DirStore,
    git,
    map::ChangesetCommitMap,
    pend::pend_delta,
    remote::RemoteClient,
    shelve::ShelveTask,
    task::{CancellationToken, NullSink, Progress, ProgressSink, TaskExecutor},
    walker::CommitDelta,
};
use tether_term::Output;

use crate::{args::parse_work_items, progress::TermSink, ui::emit};

/// Run the `tether shelve` command logic.
pub fn shelve_command(
    repo_dir: &Path,
    output: &dyn Output,
    quiet: bool,
    name: &str,
    replace: bool,
    work_items: &[String],
) -> Result<()> {
    let config = BridgeConfig::load(repo_dir)?.ok_or_else(|| {
        anyhow!("repository is not configured; run 'tether configure <STORE> <SERVER_PATH>' first")
    })?;
    let store = DirStore::open(&config.store)?;
    let work_items = parse_work_items(work_items)?;

    let head = git::head_commit(repo_dir)?;
    let map = ChangesetCommitMap::new(repo_dir)?;
    let since = map.last_bridged()?.and_then(|record| record.commit);

    let mut guard = WorkspaceGuard::acquire(&store, &config.server_path, false)?;
    let working_dir = guard.working_dir();

    let spinner = output.spinner("Computing pending changes...");
    let delta = CommitDelta {
        from: since,
        to: head.clone(),
    };
    let changes = match pend_delta(repo_dir, &delta, &working_dir) {
        Ok(changes) => changes,
        Err(error) => {
            spinner.finish_fail("Failed to compute pending changes");
            return Err(error.into());
        }
    };
    if changes.is_empty() {
        spinner.finish_success("Nothing to shelve");
        return Ok(());
    }
    spinner.finish_success(&format!("{} pending changes", changes.len()));

    let owner = store.authenticated_user();
    let mut task = ShelveTask::new(
        repo_dir,
        guard.workspace_mut(),
        &config.server_path,
        &head,
        changes,
        name,
        &owner,
        replace,
    )?;
    task.set_work_items(work_items);

    let sink: Arc<dyn ProgressSink> = if quiet {
        Arc::new(NullSink)
    } else {
        Arc::new(TermSink::new())
    };
    let progress = Progress::new(sink, CancellationToken::new());
    let status = TaskExecutor::new().execute(&mut task, progress);
    status.into_result()?;

    emit(output.success(&format!("Shelved pending changes as '{name}'")))?;
    Ok(())
}
