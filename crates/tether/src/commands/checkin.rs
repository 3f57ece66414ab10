use std::{path::Path, sync::Arc};

use anyhow::{Result, anyhow};
use libtether::{
    checkin::{ALREADY_UP_TO_DATE, CheckinOptions, CheckinTask},
    config::BridgeConfig,
    dirstore::DirStore,
    git,
    task::{CancellationToken, NullSink, Progress, ProgressSink, TaskExecutor},
};
use tether_term::Output;

use crate::{args::parse_work_items, progress::TermSink, ui::emit};

/// Parameters for the `tether checkin` command.
pub struct CheckinInvocation {
    /// Replay every commit since the last sync.
    pub deep: bool,
    /// Force shallow squashing even if the configuration defaults to deep.
    pub shallow: bool,
    /// Cap on the number of changesets created by this run.
    pub depth: Option<usize>,
    /// Skip the advisory server path lock.
    pub no_lock: bool,
    /// Collapse merge ancestry automatically in deep mode.
    pub autosquash: bool,
    /// Merge parents to follow, as commit id prefixes.
    pub squash: Vec<String>,
    /// Raw work item arguments.
    pub work_items: Vec<String>,
    /// Bypass gated submission.
    pub bypass_gate: bool,
    /// Comment override for the final changeset.
    pub message: Option<String>,
}

/// Run the `tether checkin` command logic.
pub fn checkin_command(
    repo_dir: &Path,
    output: &dyn Output,
    quiet: bool,
    invocation: CheckinInvocation,
) -> Result<()> {
    let config = BridgeConfig::load(repo_dir)?.ok_or_else(|| {
        anyhow!("repository is not configured; run 'tether configure <STORE> <SERVER_PATH>' first")
    })?;
    let store = DirStore::open(&config.store)?;

    let deep = if invocation.shallow {
        false
    } else {
        invocation.deep || config.deep
    };
    let options = CheckinOptions {
        deep,
        depth: invocation.depth.or(config.depth),
        lock: !invocation.no_lock,
        autosquash: invocation.autosquash,
        squash_ids: invocation.squash,
        work_items: parse_work_items(&invocation.work_items)?,
        override_gated: invocation.bypass_gate,
        comment: invocation.message,
    };

    let mut task = CheckinTask::new(repo_dir, &store, &config.server_path, options)?;
    let sink: Arc<dyn ProgressSink> = if quiet {
        Arc::new(NullSink)
    } else {
        Arc::new(TermSink::new())
    };
    let progress = Progress::new(sink, CancellationToken::new());
    let status = TaskExecutor::new().execute(&mut task, progress);

    let code = status.into_result()?;
    if code == Some(ALREADY_UP_TO_DATE) {
        emit(output.message("Already up to date."))?;
        return Ok(());
    }

    match task.outcome() {
        Some(outcome) if outcome.commits_checked_in == 1 => {
            emit(output.success(&format!(
                "Checked in commit {} as changeset {}",
                short(repo_dir, &outcome.last_commit),
                outcome.last_changeset
            )))?;
        }
        Some(outcome) => {
            emit(output.success(&format!(
                "Checked in {} commits; latest changeset is {}",
                outcome.commits_checked_in, outcome.last_changeset
            )))?;
        }
        None => {
            emit(output.message("Nothing to check in."))?;
        }
    }
    Ok(())
}

/// Short display form of a commit id, tolerating display-only failures.
fn short(repo_dir: &Path, commit: &str) -> String {
    git::abbreviate(repo_dir, commit).unwrap_or_else(|_| commit.chars().take(10).collect())
}
