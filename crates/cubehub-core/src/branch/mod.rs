//! Branch lifecycle engine: diff, commit, update, three-way merge.
//!
//! A branch cube records the head fingerprint it diverged from
//! (`head_sha1`). Committing pushes branch content to head; updating pulls
//! head content into the branch. Whenever both sides moved, the engine
//! attempts a three-way merge with the common ancestor fetched by that
//! fingerprint; incompatible delta sets surface as [`MergeConflict`]s inside
//! a [`BranchMergeError`].
//!
//! `commit_branch` deliberately commits the non-conflicted subset before
//! raising: conflicts never block unrelated cubes, and callers retry only
//! the failed set.


use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::appid::AppId;
use crate::cube::{ChangeType, Cube, CubeInfo};
use crate::delta::{Delta, DeltaProcessor};
use crate::error::{BranchMergeError, RepoError, Result};
use crate::persister::{Persister, SearchOptions};

/// Description of one unmergeable cube.
#[derive(Debug, Clone)]
pub struct MergeConflict {
    /// Why the merge failed.
    pub message: String,
    /// Branch-side fingerprint, when a branch revision exists.
    pub sha1: Option<String>,
    /// The ancestor fingerprint the branch recorded.
    pub head_sha1: Option<String>,
    /// The visible difference between the two sides.
    pub diff: Vec<Delta>,
}

/// Classifies one changed branch record against its head counterpart.
///
/// `None` means there is nothing to do for this cube.
pub(crate) fn classify(branch: &CubeInfo, head: Option<&CubeInfo>) -> Option<ChangeType> {
    let Some(head) = head else {
        // Never seen by head. A tombstoned record that head never saw is a
        // no-op.
        return (branch.revision >= 0).then_some(ChangeType::Created);
    };
    match branch.head_sha1.as_deref() {
        // Someone created the same name in head independently.
        None => Some(ChangeType::Conflict),
        Some(anchor) if anchor == head.sha1 => {
            if branch.sha1 == head.sha1 {
                match (branch.is_tombstone(), head.is_tombstone()) {
                    (true, false) => Some(ChangeType::Deleted),
                    (false, true) => Some(ChangeType::Restored),
                    _ => None, // in sync
                }
            } else {
                Some(ChangeType::Updated)
            }
        }
        Some(_) => Some(ChangeType::Conflict),
    }
}

fn by_name(infos: Vec<CubeInfo>) -> HashMap<String, CubeInfo> {
    infos
        .into_iter()
        .map(|info| (info.name.to_lowercase(), info))
        .collect()
}

/// Orchestrates branch synchronisation against the persister.
pub struct BranchEngine<'a> {
    persister: &'a dyn Persister,
    deltas: &'a dyn DeltaProcessor,
}

enum MergeOutcome {
    Merged(Arc<dyn Cube>),
    /// Both sides are effectively identical; only the ancestor must move.
    Identical,
    Conflict(MergeConflict),
}

impl<'a> BranchEngine<'a> {
    /// Builds an engine over the repository's ports.
    #[must_use]
    pub fn new(persister: &'a dyn Persister, deltas: &'a dyn DeltaProcessor) -> Self {
        Self { persister, deltas }
    }

    /// Computes the change list of a branch against HEAD.
    ///
    /// # Errors
    ///
    /// Rejects the HEAD branch itself with [`RepoError::InvalidInput`].
    pub fn diff_against_head(&self, app_id: &AppId) -> Result<Vec<CubeInfo>> {
        if app_id.is_head() {
            return Err(RepoError::invalid("cannot get branch changes from HEAD"));
        }
        let head_id = app_id.as_head();
        let changed =
            self.persister
                .search(app_id, None, None, &SearchOptions::changed_only())?;
        let head = by_name(
            self.persister
                .search(&head_id, None, None, &SearchOptions::default())?,
        );

        let mut out = Vec::new();
        for mut info in changed {
            if let Some(change_type) = classify(&info, head.get(&info.name.to_lowercase())) {
                info.change_type = Some(change_type);
                out.push(info);
            }
        }
        Ok(out)
    }

    /// Commits the supplied changed cubes to HEAD, three-way merging where
    /// head moved underneath the branch.
    ///
    /// Non-conflicted cubes are durably committed even when conflicts
    /// remain; surviving conflicts are raised afterwards as
    /// [`BranchMergeError`].
    pub fn commit_branch(
        &self,
        app_id: &AppId,
        infos: &[CubeInfo],
        user: &str,
    ) -> Result<Vec<CubeInfo>> {
        if app_id.is_head() {
            return Err(RepoError::invalid("cannot commit HEAD onto itself"));
        }
        let head_id = app_id.as_head();
        let head = by_name(
            self.persister
                .search(&head_id, None, None, &SearchOptions::default())?,
        );

        let mut queued: Vec<(String, ChangeType)> = Vec::new();
        let mut committed = Vec::new();
        let mut conflicts: BTreeMap<String, MergeConflict> = BTreeMap::new();

        for info in infos {
            let head_info = head.get(&info.name.to_lowercase());
            match classify(info, head_info) {
                None => {}
                Some(ChangeType::Conflict) => {
                    let head_info = head_info.expect("conflicts only arise against a head record");
                    match self.try_merge(app_id, info, head_info, false)? {
                        MergeOutcome::Merged(merged) => {
                            let mut merged_info = self.persister.commit_merged_cube_to_head(
                                app_id,
                                &merged,
                                user,
                            )?;
                            merged_info.change_type = Some(ChangeType::Updated);
                            tracing::info!(
                                app_id = %app_id,
                                cube = %info.name,
                                "auto-merged branch cube into head"
                            );
                            committed.push(merged_info);
                        }
                        MergeOutcome::Identical => {
                            self.persister
                                .update_branch_cube_head_sha1(&info.id, &head_info.sha1)?;
                        }
                        MergeOutcome::Conflict(conflict) => {
                            conflicts.insert(info.name.clone(), conflict);
                        }
                    }
                }
                Some(change_type) => queued.push((info.id.clone(), change_type)),
            }
        }

        if !queued.is_empty() {
            let ids: Vec<String> = queued.iter().map(|(id, _)| id.clone()).collect();
            let mut bulk = self.persister.commit_cubes(app_id, &ids, user)?;
            for (info, (_, change_type)) in bulk.iter_mut().zip(&queued) {
                info.change_type = Some(*change_type);
            }
            committed.extend(bulk);
        }

        if conflicts.is_empty() {
            Ok(committed)
        } else {
            Err(BranchMergeError { errors: conflicts }.into())
        }
    }

    /// Pulls HEAD into the branch: fast-forwards unchanged cubes, re-points
    /// ancestors where content already matches, and three-way merges where
    /// both sides moved.
    pub fn update_branch(&self, app_id: &AppId, user: &str) -> Result<Vec<CubeInfo>> {
        if app_id.is_head() {
            return Err(RepoError::invalid("cannot update HEAD from itself"));
        }
        let head_id = app_id.as_head();
        let head_infos = self
            .persister
            .search(&head_id, None, None, &SearchOptions::default())?;
        let branch = by_name(
            self.persister
                .search(app_id, None, None, &SearchOptions::default())?,
        );
        self.pull_from(app_id, &head_id, head_infos, &branch, user)
    }

    /// The [`BranchEngine::update_branch`] algorithm scoped to one cube
    /// against an arbitrary other branch.
    pub fn update_branch_cube(
        &self,
        app_id: &AppId,
        name: &str,
        other_branch: &str,
        user: &str,
    ) -> Result<Vec<CubeInfo>> {
        let other_id = app_id.as_branch(other_branch);
        if other_id == *app_id {
            return Err(RepoError::invalid("cannot update a branch from itself"));
        }
        let options = SearchOptions {
            exact_match_name: true,
            ..SearchOptions::default()
        };
        let other_infos = self.persister.search(&other_id, Some(name), None, &options)?;
        if other_infos.is_empty() {
            return Err(RepoError::invalid(format!(
                "cube '{name}' does not exist in branch '{other_branch}'"
            )));
        }
        let branch = by_name(self.persister.search(app_id, Some(name), None, &options)?);
        self.pull_from(app_id, &other_id, other_infos, &branch, user)
    }

    /// Shared pull path: classifies each source record against the branch
    /// and applies pulls, fast-forwards, and merges.
    fn pull_from(
        &self,
        app_id: &AppId,
        source_id: &AppId,
        source_infos: Vec<CubeInfo>,
        branch: &HashMap<String, CubeInfo>,
        user: &str,
    ) -> Result<Vec<CubeInfo>> {
        let mut pulls: Vec<(String, ChangeType)> = Vec::new();
        let mut updated = Vec::new();
        let mut conflicts: BTreeMap<String, MergeConflict> = BTreeMap::new();

        for source in &source_infos {
            match branch.get(&source.name.to_lowercase()) {
                None => {
                    if !source.is_tombstone() {
                        pulls.push((source.id.clone(), ChangeType::Created));
                    }
                }
                Some(mine) if !mine.changed => {
                    let diverged = mine.sha1 != source.sha1
                        || mine.is_tombstone() != source.is_tombstone();
                    if diverged {
                        let change_type = if source.is_tombstone() {
                            ChangeType::Deleted
                        } else {
                            ChangeType::Updated
                        };
                        pulls.push((source.id.clone(), change_type));
                    }
                }
                Some(mine) => {
                    if mine.sha1 == source.sha1 {
                        if mine.head_sha1.as_deref() != Some(source.sha1.as_str()) {
                            // Same content on both sides: silently adopt the
                            // new ancestor, no new revision.
                            self.persister
                                .update_branch_cube_head_sha1(&mine.id, &source.sha1)?;
                        }
                    } else if mine.head_sha1.as_deref() == Some(source.sha1.as_str()) {
                        // Branch is strictly ahead; commit is the other
                        // direction.
                    } else {
                        match self.try_merge(app_id, mine, source, true)? {
                            MergeOutcome::Merged(merged) => {
                                let mut info = self.persister.commit_merged_cube_to_branch(
                                    app_id,
                                    &merged,
                                    &source.sha1,
                                    user,
                                )?;
                                info.change_type = Some(ChangeType::Updated);
                                tracing::info!(
                                    app_id = %app_id,
                                    cube = %source.name,
                                    source = %source_id,
                                    "auto-merged head changes into branch"
                                );
                                updated.push(info);
                            }
                            MergeOutcome::Identical => {
                                self.persister
                                    .update_branch_cube_head_sha1(&mine.id, &source.sha1)?;
                            }
                            MergeOutcome::Conflict(conflict) => {
                                conflicts.insert(source.name.clone(), conflict);
                            }
                        }
                    }
                }
            }
        }

        if !pulls.is_empty() {
            let ids: Vec<String> = pulls.iter().map(|(id, _)| id.clone()).collect();
            let mut bulk = self.persister.pull_to_branch(app_id, &ids, user)?;
            for (info, (_, change_type)) in bulk.iter_mut().zip(&pulls) {
                info.change_type = Some(*change_type);
            }
            updated.extend(bulk);
        }

        if conflicts.is_empty() {
            Ok(updated)
        } else {
            Err(BranchMergeError { errors: conflicts }.into())
        }
    }

    /// Attempts the three-way merge of one cube.
    ///
    /// The base is the revision whose fingerprint equals the branch record's
    /// ancestor; a never-merged cube gets a synthesized empty base with the
    /// same axes so first-time merges of independently created cubes can
    /// still succeed.
    fn try_merge(
        &self,
        app_id: &AppId,
        mine: &CubeInfo,
        theirs: &CubeInfo,
        reverse: bool,
    ) -> Result<MergeOutcome> {
        if mine.sha1 == theirs.sha1 {
            return Ok(MergeOutcome::Identical);
        }
        if mine.is_tombstone() {
            return Ok(MergeOutcome::Conflict(MergeConflict {
                message: format!(
                    "cube '{}' was deleted in this branch but changed on the other side",
                    mine.name
                ),
                sha1: Some(mine.sha1.clone()),
                head_sha1: mine.head_sha1.clone(),
                diff: Vec::new(),
            }));
        }
        if theirs.is_tombstone() {
            return Ok(MergeOutcome::Conflict(MergeConflict {
                message: format!(
                    "cube '{}' was changed in this branch but deleted on the other side",
                    mine.name
                ),
                sha1: Some(mine.sha1.clone()),
                head_sha1: mine.head_sha1.clone(),
                diff: Vec::new(),
            }));
        }

        let mine_cube = self.persister.load_cube_by_id(&mine.id)?;
        let their_cube = self.persister.load_cube_by_id(&theirs.id)?;

        let base: Arc<dyn Cube> = match mine.head_sha1.as_deref() {
            Some(anchor) => {
                let head_id = app_id.as_head();
                let from_head =
                    self.persister
                        .load_cube_by_sha1(&head_id, &mine.name, anchor)?;
                match from_head {
                    Some(base) => base,
                    None => self
                        .persister
                        .load_cube_by_sha1(&theirs.app_id, &mine.name, anchor)?
                        .ok_or_else(|| RepoError::state(format!(
                            "merge ancestor {anchor} of '{}' is gone",
                            mine.name
                        )))?,
                }
            }
            None => {
                // Both sides created this cube independently; merge from an
                // empty cube with the branch's axes.
                let empty = mine_cube.duplicate(mine_cube.name());
                empty.clear_cells();
                empty
            }
        };

        let my_delta = self.deltas.delta(base.as_ref(), mine_cube.as_ref());
        let their_delta = self.deltas.delta(base.as_ref(), their_cube.as_ref());

        if self.deltas.are_compatible(&my_delta, &their_delta, reverse) {
            let merged = mine_cube.duplicate(mine_cube.name());
            self.deltas.merge(merged.as_ref(), &their_delta)?;
            return Ok(MergeOutcome::Merged(merged));
        }

        let diff = self.deltas.describe(mine_cube.as_ref(), their_cube.as_ref());
        if diff.is_empty() {
            return Ok(MergeOutcome::Identical);
        }
        Ok(MergeOutcome::Conflict(MergeConflict {
            message: format!("cube '{}' has conflicting changes", mine.name),
            sha1: Some(mine.sha1.clone()),
            head_sha1: mine.head_sha1.clone(),
            diff,
        }))
    }
}
