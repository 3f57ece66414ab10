use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Parser, Subcommand};
use libtether::remote::{WorkItemAction, WorkItemLink};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("color_mode")
        .args(["color", "no_color"])
))]
/// Top-level CLI options for tether.
pub struct Cli {
    /// Override the repository directory (defaults to current git project)
    #[arg(long, global = true, value_name = "DIR")]
    pub repo_dir: Option<String>,

    /// Enable colored output
    #[arg(long, global = true)]
    pub color: bool,

    /// Disable colored output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Suppress all output
    #[arg(long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    /// The primary command to execute.
    pub command: Commands,
}

#[derive(Subcommand)]
/// CLI subcommands supported by tether.
pub enum Commands {
    /// Point the repository at a changeset store and server path
    Configure {
        /// Directory of the changeset store (created if missing)
        store: String,

        /// Server path to check history in to
        server_path: String,

        /// Default to deep history replication
        #[arg(long)]
        deep: bool,

        /// Default cap on the number of changesets per run
        #[arg(long, value_name = "N")]
        depth: Option<usize>,
    },

    /// Replay local commits into the store as changesets
    Checkin {
        /// Replay every commit since the last sync
        #[arg(long, conflicts_with = "shallow")]
        deep: bool,

        /// Squash all pending history into a single changeset
        #[arg(long)]
        shallow: bool,

        /// Cap the number of changesets created by this run
        #[arg(long, value_name = "N")]
        depth: Option<usize>,

        /// Do not lock the server path for the duration of the run
        #[arg(long = "no-lock")]
        no_lock: bool,

        /// Collapse merge ancestry automatically in deep mode
        #[arg(long)]
        autosquash: bool,

        /// Parent commit to follow at a merge (can be repeated)
        #[arg(long = "squash", value_name = "COMMIT")]
        squash: Vec<String>,

        /// Work item to link, as ID or ID:resolve (can be repeated)
        #[arg(long = "work-item", value_name = "ID[:ACTION]")]
        work_items: Vec<String>,

        /// Bypass the store's gated submission policy
        #[arg(long = "bypass-gate")]
        bypass_gate: bool,

        /// Override the comment of the final changeset
        #[arg(long, value_name = "MSG")]
        message: Option<String>,
    },

    /// Bundle the pending delta into a named shelveset for review
    Shelve {
        /// Overwrite an existing shelveset of the same name
        #[arg(long)]
        replace: bool,

        /// Work item to reference, as ID or ID:resolve (can be repeated)
        #[arg(long = "work-item", value_name = "ID[:ACTION]")]
        work_items: Vec<String>,

        /// Name of the shelveset
        name: String,
    },
}

/// Parse a work item argument of the form `ID` or `ID:ACTION`.
pub fn parse_work_item(value: &str) -> Result<WorkItemLink> {
    let (id, action) = match value.split_once(':') {
        Some((id, action)) => (id, action),
        None => (value, "associate"),
    };

    let id: u32 = id
        .parse()
        .with_context(|| format!("invalid work item id: '{id}'"))?;
    let action = match action {
        "associate" => WorkItemAction::Associate,
        "resolve" => WorkItemAction::Resolve,
        other => bail!("invalid work item action: '{other}' (expected 'associate' or 'resolve')"),
    };

    Ok(WorkItemLink { id, action })
}

/// Parse a list of work item arguments.
pub fn parse_work_items(values: &[String]) -> Result<Vec<WorkItemLink>> {
    values.iter().map(|value| parse_work_item(value)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_items_parse_with_and_without_actions() {
        assert_eq!(
            parse_work_item("42").unwrap(),
            WorkItemLink {
                id: 42,
                action: WorkItemAction::Associate,
            }
        );
        assert_eq!(
            parse_work_item("7:resolve").unwrap(),
            WorkItemLink {
                id: 7,
                action: WorkItemAction::Resolve,
            }
        );
        assert_eq!(
            parse_work_item("7:associate").unwrap(),
            WorkItemLink {
                id: 7,
                action: WorkItemAction::Associate,
            }
        );
    }

    #[test]
    fn bad_work_items_are_rejected() {
        assert!(parse_work_item("abc").is_err());
        assert!(parse_work_item("7:close").is_err());
        assert!(parse_work_item("").is_err());
    }
}
