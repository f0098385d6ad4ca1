//! Mounter error types.
//!
//! Every failure surfaced by the mount lifecycle is a [`MounterError`].  The
//! variants carry plain strings so errors stay [`Clone`] and can be handed
//! back to the orchestrator unmodified.

use thiserror::Error;

/// Unified error type for mounter operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MounterError {
    /// Persisting connection secrets failed.
    #[error("failed to write credentials to {path}: {reason}")]
    CredentialWrite {
        /// Credential file that could not be written.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The translation tool failed to start, exited non-zero, or its mount
    /// never appeared.
    #[error("{command} mount failed: {reason}")]
    Invocation {
        /// Command that was invoked.
        command: String,
        /// Human-readable failure reason, including tool output when present.
        reason: String,
    },

    /// The OS rejected a bind mount.
    #[error("bind mount {source_path} -> {target_path} failed: {reason}")]
    BindMount {
        /// Existing path being aliased.
        source_path: String,
        /// Alias path.
        target_path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// Tearing down a mount point failed for a reason other than "not mounted".
    #[error("cleanup of mount point {path} failed: {reason}")]
    Cleanup {
        /// Mount point being torn down.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// Removing a directory after unmount failed for a reason other than
    /// "already absent".
    #[error("failed to remove directory {path}: {reason}")]
    DirectoryRemoval {
        /// Directory that could not be removed.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// A staging or target directory could not be created.
    #[error("failed to prepare directory {path}: {reason}")]
    PrepareDirectory {
        /// Directory that could not be created.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// A lifecycle operation was called in a state that does not allow it.
    #[error("volume {volume_id}: cannot {operation} while {state}")]
    InvalidTransition {
        /// Volume whose lifecycle rejected the call.
        volume_id: String,
        /// Current lifecycle state.
        state: String,
        /// Rejected operation.
        operation: String,
    },

    /// An option template referenced a placeholder with no resolver under
    /// the strict policy.
    #[error("unknown option placeholder ${{{name}}}")]
    UnknownPlaceholder {
        /// Placeholder name as written between the braces.
        name: String,
    },

    /// A publish or unpublish referenced a volume this node never staged.
    #[error("volume {0} is not staged on this node")]
    VolumeNotStaged(String),

    /// The caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl MounterError {
    /// Create a [`MounterError::CredentialWrite`] for `path`.
    pub fn credential_write<E: std::fmt::Display>(path: impl AsRef<std::path::Path>, e: E) -> Self {
        Self::CredentialWrite {
            path: path.as_ref().display().to_string(),
            reason: e.to_string(),
        }
    }

    /// Create a [`MounterError::Invocation`] for `command`.
    pub fn invocation<E: std::fmt::Display>(command: &str, e: E) -> Self {
        Self::Invocation {
            command: command.to_owned(),
            reason: e.to_string(),
        }
    }

    /// Create a [`MounterError::Cleanup`] for `path`.
    pub fn cleanup<E: std::fmt::Display>(path: impl AsRef<std::path::Path>, e: E) -> Self {
        Self::Cleanup {
            path: path.as_ref().display().to_string(),
            reason: e.to_string(),
        }
    }

    /// Create a [`MounterError::DirectoryRemoval`] for `path`.
    pub fn directory_removal<E: std::fmt::Display>(
        path: impl AsRef<std::path::Path>,
        e: E,
    ) -> Self {
        Self::DirectoryRemoval {
            path: path.as_ref().display().to_string(),
            reason: e.to_string(),
        }
    }
}
