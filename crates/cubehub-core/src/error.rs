//! Crate-wide error taxonomy.
//!
//! Permission and lock failures are raised before any persister call, so they
//! never leave side effects. [`BranchMergeError`] is the one partial-success
//! path: `commit_branch` durably commits the non-conflicted cubes before
//! raising it with the surviving conflict set.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::branch::MergeConflict;
use crate::permissions::Action;
use crate::persister::PersisterError;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RepoError {
    /// Null/empty/malformed caller input: bad `AppId` tuple, bad cube name,
    /// empty batch, same-name duplicate, and the like.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// What was wrong with the input.
        message: String,
    },

    /// Mutation attempted against a RELEASE (frozen) workspace.
    #[error("cannot mutate release application: {app_id}")]
    ReleaseImmutable {
        /// The offending `AppId` cache key.
        app_id: String,
    },

    /// Version `0.0.0` is reserved for system-configuration cubes and is
    /// rejected by release and move operations.
    #[error("version 0.0.0 is reserved for system configuration ({operation})")]
    SystemVersionReserved {
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// The acting user lacks permission for the resource/action pair.
    #[error("user '{user}' is not permitted to {action} resource '{resource}'")]
    PermissionDenied {
        /// The acting user.
        user: String,
        /// The resource that was requested.
        resource: String,
        /// The action that was requested.
        action: Action,
    },

    /// The application-wide advisory lock is held by another user.
    #[error("application is locked by user '{owner}'")]
    LockBlocked {
        /// The current lock owner.
        owner: String,
    },

    /// An operation that requires the caller to hold the lock was invoked
    /// without holding it.
    #[error("user '{user}' does not hold the application lock (owner: {owner:?})")]
    LockNotHeld {
        /// The acting user.
        user: String,
        /// The current owner, if any.
        owner: Option<String>,
    },

    /// The repository is in an invalid configuration: no persister, missing
    /// bootstrap cube, a classpath cube yielding a non-loader value.
    #[error("invalid state: {message}")]
    State {
        /// Description of the broken state.
        message: String,
    },

    /// A resource URL or classpath entry could not be resolved.
    #[error("resource error: {message}")]
    Resource {
        /// Description of the failure.
        message: String,
    },

    /// Failure inside the durable store.
    #[error(transparent)]
    Persister(#[from] PersisterError),

    /// One or more cubes could not be three-way merged.
    #[error(transparent)]
    Merge(#[from] BranchMergeError),
}

impl RepoError {
    /// Shorthand for an [`RepoError::InvalidInput`].
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Shorthand for a [`RepoError::State`].
    pub(crate) fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }
}

/// Raised when a branch commit or update leaves unresolved merge conflicts.
///
/// Carries one [`MergeConflict`] per cube that could not be merged, keyed by
/// cube name.
#[derive(Debug)]
pub struct BranchMergeError {
    /// Conflict descriptions keyed by cube name.
    pub errors: BTreeMap<String, MergeConflict>,
}

impl fmt::Display for BranchMergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.errors.keys().map(String::as_str).collect();
        write!(
            f,
            "{} cube(s) could not be merged: {}",
            self.errors.len(),
            names.join(", ")
        )
    }
}

impl std::error::Error for BranchMergeError {}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RepoError>;
