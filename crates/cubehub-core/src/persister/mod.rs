//! The durable-store port.
//!
//! The repository consumes a revision store through [`Persister`] and never
//! commits to a storage technology. Revisions are append-only rows keyed by
//! `(AppId, cube name)`; a negative revision number is a tombstone.
//! [`MemoryPersister`] is the in-process implementation backing the test
//! suite.

mod memory;

pub use memory::MemoryPersister;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use thiserror::Error;

use crate::appid::{AppId, Status};
use crate::cube::{Cube, CubeInfo};

/// Errors raised by the durable store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PersisterError {
    /// Storage-level failure (connectivity, corruption, constraint).
    #[error("persister backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },

    /// The named cube has no live revision in the workspace.
    #[error("cube '{name}' does not exist in {app_id}")]
    CubeNotFound {
        /// The workspace searched.
        app_id: String,
        /// The cube name requested.
        name: String,
    },

    /// A revision lookup (by id or fingerprint) found nothing.
    #[error("revision not found: {detail}")]
    RevisionNotFound {
        /// What was looked up.
        detail: String,
    },

    /// The target name already holds a live revision.
    #[error("cube '{name}' already exists")]
    AlreadyExists {
        /// The conflicting name.
        name: String,
    },

    /// A fingerprint precondition failed (head moved under the caller).
    #[error("fingerprint mismatch on '{name}': expected {expected}, found {actual}")]
    ShaMismatch {
        /// The cube name.
        name: String,
        /// The fingerprint the caller expected.
        expected: String,
        /// The fingerprint actually stored.
        actual: String,
    },
}

/// Result alias for persister operations.
pub type PersisterResult<T> = Result<T, PersisterError>;

/// Search filtering and population options.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    /// Attach each revision's simple-JSON rendering to the result.
    pub include_cube_data: bool,
    /// Populate `test_data` on each result.
    pub include_test_data: bool,
    /// Populate `notes` on each result.
    pub include_notes: bool,
    /// Return only tombstoned records.
    pub deleted_records_only: bool,
    /// Return only live records.
    pub active_records_only: bool,
    /// Return only records carrying uncommitted changes.
    pub changed_records_only: bool,
    /// Treat the name pattern as an exact (case-insensitive) name.
    pub exact_match_name: bool,
}

impl SearchOptions {
    /// Only live records.
    #[must_use]
    pub const fn active_only() -> Self {
        Self {
            active_records_only: true,
            include_cube_data: false,
            include_test_data: false,
            include_notes: false,
            deleted_records_only: false,
            changed_records_only: false,
            exact_match_name: false,
        }
    }

    /// Only records with uncommitted changes, tombstones included.
    #[must_use]
    pub const fn changed_only() -> Self {
        Self {
            changed_records_only: true,
            include_cube_data: false,
            include_test_data: false,
            include_notes: false,
            deleted_records_only: false,
            active_records_only: false,
            exact_match_name: false,
        }
    }
}

/// The durable revision store consumed by the repository.
///
/// Mutating operations take the acting user for audit purposes. Within one
/// workspace the store linearises mutations; the repository performs its
/// cache maintenance after each successful call.
pub trait Persister: Send + Sync {
    /// Loads the live revision of a cube, or `None` when absent or
    /// tombstoned.
    fn load_cube(&self, app_id: &AppId, name: &str) -> PersisterResult<Option<Arc<dyn Cube>>>;

    /// Loads a specific revision by its opaque id.
    fn load_cube_by_id(&self, id: &str) -> PersisterResult<Arc<dyn Cube>>;

    /// Loads the revision of a cube whose fingerprint matches: the
    /// three-way merge base fetch.
    fn load_cube_by_sha1(
        &self,
        app_id: &AppId,
        name: &str,
        sha1: &str,
    ) -> PersisterResult<Option<Arc<dyn Cube>>>;

    /// Searches the newest revision of every cube in a workspace.
    fn search(
        &self,
        app_id: &AppId,
        name_pattern: Option<&str>,
        content_pattern: Option<&str>,
        options: &SearchOptions,
    ) -> PersisterResult<Vec<CubeInfo>>;

    /// Full revision history of one cube, oldest first.
    fn get_revisions(&self, app_id: &AppId, name: &str) -> PersisterResult<Vec<CubeInfo>>;

    /// Inserts a new revision holding the cube's current content. A no-op
    /// when the live revision already carries the same fingerprint.
    fn update_cube(&self, app_id: &AppId, cube: &Arc<dyn Cube>, user: &str) -> PersisterResult<()>;

    /// Copies a live cube to a new name and/or workspace as a fresh lineage.
    fn duplicate_cube(
        &self,
        old_app_id: &AppId,
        new_app_id: &AppId,
        old_name: &str,
        new_name: &str,
        user: &str,
    ) -> PersisterResult<()>;

    /// Renames a live cube: tombstones the old name and starts a fresh
    /// lineage under the new name.
    fn rename_cube(
        &self,
        app_id: &AppId,
        old_name: &str,
        new_name: &str,
        user: &str,
    ) -> PersisterResult<()>;

    /// Tombstones each named cube; `allow_hard` physically removes history.
    fn delete_cubes(
        &self,
        app_id: &AppId,
        names: &[String],
        allow_hard: bool,
        user: &str,
    ) -> PersisterResult<()>;

    /// Restores tombstoned cubes by inserting fresh positive revisions.
    fn restore_cubes(&self, app_id: &AppId, names: &[String], user: &str) -> PersisterResult<()>;

    /// Reverts branch cubes to the head revision they diverged from, or
    /// removes never-committed cubes outright.
    fn rollback_cubes(&self, app_id: &AppId, names: &[String], user: &str) -> PersisterResult<()>;

    /// Commits the identified branch revisions to head in bulk. Results are
    /// returned in id order.
    fn commit_cubes(
        &self,
        app_id: &AppId,
        ids: &[String],
        user: &str,
    ) -> PersisterResult<Vec<CubeInfo>>;

    /// Writes a merged cube as the new head revision and synchronises the
    /// branch record with it.
    fn commit_merged_cube_to_head(
        &self,
        app_id: &AppId,
        cube: &Arc<dyn Cube>,
        user: &str,
    ) -> PersisterResult<CubeInfo>;

    /// Writes a merged cube into the branch, recording the head fingerprint
    /// it was merged against.
    fn commit_merged_cube_to_branch(
        &self,
        app_id: &AppId,
        cube: &Arc<dyn Cube>,
        head_sha1: &str,
        user: &str,
    ) -> PersisterResult<CubeInfo>;

    /// Pulls the identified head revisions into the branch in bulk. Results
    /// are returned in id order.
    fn pull_to_branch(
        &self,
        app_id: &AppId,
        ids: &[String],
        user: &str,
    ) -> PersisterResult<Vec<CubeInfo>>;

    /// Fast-forward: re-points a branch revision's head fingerprint without
    /// creating a new revision.
    fn update_branch_cube_head_sha1(&self, id: &str, head_sha1: &str) -> PersisterResult<()>;

    /// Copies the newest revision of every cube from one branch to another.
    /// Copying out of HEAD records each source fingerprint as the new
    /// branch's merge ancestor.
    fn copy_branch(&self, src: &AppId, dst: &AppId) -> PersisterResult<usize>;

    /// Moves every revision of a branch to another version.
    fn move_branch(&self, app_id: &AppId, new_version: &str) -> PersisterResult<usize>;

    /// Freezes the HEAD of a version by moving its revisions to RELEASE
    /// status.
    fn release_cubes(&self, app_id: &AppId, new_snap_version: &str) -> PersisterResult<usize>;

    /// Resolves a conflict by keeping the branch content and adopting the
    /// current head fingerprint as the new merge ancestor.
    fn merge_accept_mine(&self, app_id: &AppId, name: &str, user: &str)
        -> PersisterResult<CubeInfo>;

    /// Resolves a conflict by overwriting the branch with head content. The
    /// caller passes the head fingerprint it observed; a mismatch fails.
    fn merge_accept_theirs(
        &self,
        app_id: &AppId,
        name: &str,
        head_sha1: &str,
        user: &str,
    ) -> PersisterResult<CubeInfo>;

    /// Application names known for a tenant.
    fn get_app_names(&self, tenant: &str) -> PersisterResult<Vec<String>>;

    /// Versions known for a tenant/app, grouped by status.
    fn get_versions(
        &self,
        tenant: &str,
        app: &str,
    ) -> PersisterResult<BTreeMap<Status, Vec<String>>>;

    /// Branch labels present under the workspace's version.
    fn get_branches(&self, app_id: &AppId) -> PersisterResult<BTreeSet<String>>;

    /// Physically removes a branch and its history. HEAD is rejected.
    fn delete_branch(&self, app_id: &AppId) -> PersisterResult<()>;

    /// Replaces the commit notes on the live revision.
    fn update_notes(&self, app_id: &AppId, name: &str, notes: &str) -> PersisterResult<()>;

    /// Reads the commit notes of the live revision.
    fn get_notes(&self, app_id: &AppId, name: &str) -> PersisterResult<String>;

    /// Replaces the attached test data on the live revision.
    fn update_test_data(&self, app_id: &AppId, name: &str, data: &str) -> PersisterResult<()>;

    /// Reads the attached test data of the live revision.
    fn get_test_data(&self, app_id: &AppId, name: &str) -> PersisterResult<String>;
}
