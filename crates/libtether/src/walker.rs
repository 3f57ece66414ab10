use std::{collections::HashMap, path::Path};

use crate::{
    error::{Result, TetherError, git_error},
    git,
};

/// A snapshot-to-snapshot step produced by walking the commit graph.
///
/// `from == None` denotes a full-snapshot import. Deltas are produced oldest
/// to newest and consumed once by the checkin loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitDelta {
    /// Older snapshot, or `None` for a full import.
    pub from: Option<String>,
    /// Newer snapshot.
    pub to: String,
}

/// How merge commits are handled during a walk.
#[derive(Debug, Clone)]
pub enum WalkMode {
    /// Collapse a merge's entire ancestry back to the running since point
    /// into a single delta. Side-branch history is not preserved.
    AutoSquash,
    /// Walk every commit individually; a merge must be disambiguated by one
    /// of the guidance ids (matched as hex prefixes against its parents).
    Guided {
        /// Commit id prefixes naming the parent to follow at each merge.
        squash_ids: Vec<String>,
    },
}

/// Produce the ordered delta sequence spanning `since` to `head`.
///
/// The implied path is total: every intervening commit is accounted for
/// exactly once, either individually or inside a squashed delta.
pub fn walk(
    repo: &Path,
    since: Option<&str>,
    head: &str,
    mode: &WalkMode,
) -> Result<Vec<CommitDelta>> {
    if since == Some(head) {
        return Ok(Vec::new());
    }
    let Some(since) = since else {
        return Ok(vec![CommitDelta {
            from: None,
            to: head.to_string(),
        }]);
    };

    let nodes = git::rev_list_parents(repo, head).map_err(|e| git_error(&e))?;
    let parents: HashMap<&str, &[String]> = nodes
        .iter()
        .map(|n| (n.id.as_str(), n.parents.as_slice()))
        .collect();

    match mode {
        WalkMode::AutoSquash => auto_squash_walk(since, head, &parents),
        WalkMode::Guided { squash_ids } => guided_walk(since, head, &parents, squash_ids),
    }
}

/// Walk the first-parent chain backward from `head`, collapsing everything
/// older than the newest merge commit into one delta.
fn auto_squash_walk(
    since: &str,
    head: &str,
    parents: &HashMap<&str, &[String]>,
) -> Result<Vec<CommitDelta>> {
    // Non-merge commits newer than the stop point, newest first.
    let mut chain: Vec<String> = Vec::new();
    let mut cursor = head.to_string();
    let merge_boundary: Option<String>;

    loop {
        if cursor == since {
            merge_boundary = None;
            break;
        }
        let commit_parents = lookup_parents(parents, &cursor, head)?;
        if commit_parents.len() > 1 {
            merge_boundary = Some(cursor);
            break;
        }
        match commit_parents.first() {
            Some(parent) => {
                let parent = parent.clone();
                chain.push(cursor);
                cursor = parent;
            }
            None => return Err(unreachable_history(since, head)),
        }
    }

    let mut deltas = Vec::with_capacity(chain.len() + 1);
    let mut start = since.to_string();
    if let Some(merge) = merge_boundary {
        deltas.push(CommitDelta {
            from: Some(start),
            to: merge.clone(),
        });
        start = merge;
    }
    deltas.extend(chain_to_deltas(start, chain));
    Ok(deltas)
}

/// Walk every commit backward from `head`, requiring guidance at merges.
fn guided_walk(
    since: &str,
    head: &str,
    parents: &HashMap<&str, &[String]>,
    squash_ids: &[String],
) -> Result<Vec<CommitDelta>> {
    let mut chain: Vec<String> = Vec::new();
    let mut cursor = head.to_string();

    while cursor != since {
        let commit_parents = lookup_parents(parents, &cursor, head)?;
        let next = match commit_parents {
            [] => return Err(unreachable_history(since, head)),
            [parent] => parent.clone(),
            multiple => multiple
                .iter()
                .find(|p| {
                    squash_ids
                        .iter()
                        .any(|guide| !guide.is_empty() && p.starts_with(guide.as_str()))
                })
                .cloned()
                .ok_or_else(|| TetherError::AmbiguousMerge {
                    commit: cursor.clone(),
                })?,
        };
        chain.push(cursor);
        cursor = next;
    }

    Ok(chain_to_deltas(since.to_string(), chain))
}

/// Turn a newest-first commit chain into consecutive deltas from `start`.
fn chain_to_deltas(start: String, chain: Vec<String>) -> Vec<CommitDelta> {
    let mut deltas = Vec::with_capacity(chain.len());
    let mut running = start;
    for commit in chain.into_iter().rev() {
        deltas.push(CommitDelta {
            from: Some(running.clone()),
            to: commit.clone(),
        });
        running = commit;
    }
    deltas
}

/// Look up a commit's parents, failing when the commit is not in the walk set.
fn lookup_parents<'a>(
    parents: &HashMap<&str, &'a [String]>,
    commit: &str,
    head: &str,
) -> Result<&'a [String]> {
    parents
        .get(commit)
        .copied()
        .ok_or_else(|| TetherError::Git(format!("commit {commit} is not reachable from {head}")))
}

/// Error for a walk that bottomed out at a root without meeting `since`.
fn unreachable_history(since: &str, head: &str) -> TetherError {
    TetherError::Git(format!("history of {head} does not reach {since}"))
}

/// Collapse an over-long delta sequence to at most `depth` deltas.
///
/// The newest `depth - 1` deltas are kept verbatim; everything older is
/// collapsed into one synthetic delta from the sequence's original first
/// `from` to the oldest kept delta's `from`. The overall span is preserved:
/// the first output delta starts where the input started and the last ends at
/// head. A `depth` below 1 is treated as 1.
pub fn limit_depth(deltas: Vec<CommitDelta>, depth: usize) -> Vec<CommitDelta> {
    let depth = depth.max(1);
    if deltas.len() <= depth {
        return deltas;
    }

    let first_from = deltas[0].from.clone();
    let kept = &deltas[deltas.len() - (depth - 1)..];
    let boundary_to = match kept.first() {
        Some(delta) => delta
            .from
            .clone()
            .unwrap_or_else(|| delta.to.clone()),
        // Degenerate depth of 1: the single remaining delta spans to head.
        None => deltas[deltas.len() - 1].to.clone(),
    };

    let mut pruned = Vec::with_capacity(depth);
    pruned.push(CommitDelta {
        from: first_from,
        to: boundary_to,
    });
    pruned.extend(kept.iter().cloned());
    pruned
}
