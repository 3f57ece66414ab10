use std::{io, result::Result as StdResult};

use thiserror::Error;

/// Custom Result type for tether operations.
pub type Result<T> = StdResult<T, TetherError>;

/// Tether-specific error types.
#[derive(Error, Debug)]
pub enum TetherError {
    /// A constructor received malformed input (missing identifiers or paths).
    #[error("Invalid input: {0}")]
    Validation(String),

    /// A merge commit could not be walked without caller guidance.
    #[error("Merge commit {commit} has multiple parents; pass the parent to follow as squash guidance")]
    AmbiguousMerge {
        /// The merge commit that needs disambiguation.
        commit: String,
    },

    /// First sync requires the target server path to be empty or absent.
    #[error("Cannot check in to non-empty server path: {path}")]
    NonEmptyTarget {
        /// The offending server path.
        path: String,
    },

    /// The newest changeset at the server path was not created by this bridge,
    /// or local history has diverged from the last bridged commit.
    #[error("Not fast-forward: changeset {changeset} does not correspond to local history; fetch and reconcile first")]
    NotFastForward {
        /// The server changeset that local history does not account for.
        changeset: i64,
    },

    /// The server path no longer exists although history was bridged to it.
    #[error("Server path no longer exists: {path}")]
    ServerPathDeleted {
        /// The missing server path.
        path: String,
    },

    /// A remote store operation failed.
    #[error("Remote operation failed: {0}")]
    Remote(String),

    /// A submission was rejected by the store's gated-submission policy.
    #[error("Checkin rejected by gated submission policy")]
    GatedCheckin,

    /// A git command failed.
    #[error("Git error: {0}")]
    Git(String),

    /// The changeset-commit map rejected an update or is unreadable.
    #[error("Changeset map error: {0}")]
    Map(String),

    /// The operation was cancelled.
    #[error("Cancelled")]
    Cancelled,

    /// An underlying I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TetherError {
    /// Return the recommended process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Cancelled => 130,
            Self::Validation(_) | Self::AmbiguousMerge { .. } => 2,
            Self::NonEmptyTarget { .. } | Self::NotFastForward { .. } | Self::ServerPathDeleted { .. } => 3,
            Self::Remote(_) | Self::GatedCheckin => 4,
            Self::Git(_) => 5,
            Self::Map(_) => 6,
            _ => 1,
        }
    }

    /// Whether this error is a pre-flight precondition failure, raised before
    /// any remote mutation.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::NonEmptyTarget { .. } | Self::NotFastForward { .. } | Self::ServerPathDeleted { .. }
        )
    }
}

/// Map git plumbing errors into a [`TetherError::Git`].
pub(crate) fn git_error(error: &anyhow::Error) -> TetherError {
    TetherError::Git(error.to_string())
}
