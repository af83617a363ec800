//! In-process revision store.
//!
//! Keeps append-only revision rows per `(AppId, cube name)`, the way a SQL
//! persister keeps revision records. This is the reference backend for the
//! test suite and for embedders that do not need durability.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use uuid::Uuid;

use super::{Persister, PersisterError, PersisterResult, SearchOptions};
use crate::appid::{AppId, Status};
use crate::cube::{Cube, CubeInfo};
use crate::glob;

#[derive(Clone)]
struct Row {
    id: String,
    app_id: AppId,
    name: String,
    revision: i64,
    cube: Arc<dyn Cube>,
    sha1: String,
    head_sha1: Option<String>,
    changed: bool,
    notes: String,
    test_data: String,
}

impl Row {
    fn is_tombstone(&self) -> bool {
        self.revision < 0
    }

    fn to_info(&self, options: &SearchOptions) -> CubeInfo {
        CubeInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            revision: self.revision,
            sha1: self.sha1.clone(),
            head_sha1: self.head_sha1.clone(),
            changed: self.changed,
            notes: options.include_notes.then(|| self.notes.clone()),
            test_data: options.include_test_data.then(|| self.test_data.clone()),
            app_id: self.app_id.clone(),
            change_type: None,
            cube_json: options.include_cube_data.then(|| self.cube.to_json()),
        }
    }
}

/// Per-name revision history, oldest first.
type History = Vec<Row>;

#[derive(Default)]
struct State {
    tables: HashMap<AppId, BTreeMap<String, History>>,
}

/// In-memory [`Persister`] implementation.
#[derive(Default)]
pub struct MemoryPersister {
    state: RwLock<State>,
}

impl MemoryPersister {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(name: &str) -> String {
    name.to_lowercase()
}

fn snapshot(cube: &Arc<dyn Cube>, app_id: &AppId) -> Arc<dyn Cube> {
    let copy = cube.duplicate(cube.name());
    copy.set_app_id(app_id.clone());
    copy
}

fn next_revision(history: &History) -> i64 {
    history.last().map_or(0, |row| row.revision.abs() + 1)
}

fn new_row(
    app_id: &AppId,
    cube: &Arc<dyn Cube>,
    revision: i64,
    head_sha1: Option<String>,
    changed: bool,
    notes: String,
    test_data: String,
) -> Row {
    let copy = snapshot(cube, app_id);
    Row {
        id: Uuid::new_v4().to_string(),
        app_id: app_id.clone(),
        name: copy.name().to_string(),
        revision,
        sha1: copy.sha1(),
        head_sha1,
        changed,
        notes,
        test_data,
        cube: copy,
    }
}

impl State {
    fn history(&self, app_id: &AppId, name: &str) -> Option<&History> {
        self.tables.get(app_id).and_then(|t| t.get(&key(name)))
    }

    fn history_mut(&mut self, app_id: &AppId, name: &str) -> &mut History {
        self.tables
            .entry(app_id.clone())
            .or_default()
            .entry(key(name))
            .or_default()
    }

    fn latest(&self, app_id: &AppId, name: &str) -> Option<&Row> {
        self.history(app_id, name).and_then(|h| h.last())
    }

    fn live(&self, app_id: &AppId, name: &str) -> Option<&Row> {
        self.latest(app_id, name).filter(|row| !row.is_tombstone())
    }

    fn require_live(&self, app_id: &AppId, name: &str) -> PersisterResult<&Row> {
        self.live(app_id, name)
            .ok_or_else(|| PersisterError::CubeNotFound {
                app_id: app_id.cache_key(),
                name: name.to_string(),
            })
    }

    fn row_by_id(&self, id: &str) -> Option<&Row> {
        self.tables
            .values()
            .flat_map(|table| table.values())
            .flat_map(|history| history.iter())
            .find(|row| row.id == id)
    }

    fn row_by_id_mut(&mut self, id: &str) -> Option<&mut Row> {
        self.tables
            .values_mut()
            .flat_map(|table| table.values_mut())
            .flat_map(|history| history.iter_mut())
            .find(|row| row.id == id)
    }
}

impl MemoryPersister {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Commits one branch row to head and synchronises the branch record.
    fn commit_row(state: &mut State, branch_id: &AppId, row_id: &str) -> PersisterResult<CubeInfo> {
        let head_id = branch_id.as_head();
        let (name, branch_sha, tombstone, cube, notes, test_data, branch_info) = {
            let row = state
                .row_by_id(row_id)
                .ok_or_else(|| PersisterError::RevisionNotFound {
                    detail: format!("id {row_id}"),
                })?;
            (
                row.name.clone(),
                row.sha1.clone(),
                row.is_tombstone(),
                Arc::clone(&row.cube),
                row.notes.clone(),
                row.test_data.clone(),
                row.to_info(&SearchOptions::default()),
            )
        };

        let head_live_sha = state.live(&head_id, &name).map(|r| r.sha1.clone());
        let write_to_head = if tombstone {
            // Deleting a cube head never saw needs no head tombstone.
            head_live_sha.is_some()
        } else {
            // Head may already carry this content; then only the branch
            // record moves.
            head_live_sha.as_deref() != Some(branch_sha.as_str())
        };

        let info = if write_to_head {
            let head_history = state.history_mut(&head_id, &name);
            let rev = if tombstone {
                -next_revision(head_history)
            } else {
                next_revision(head_history)
            };
            let row = new_row(&head_id, &cube, rev, None, false, notes, test_data);
            let info = row.to_info(&SearchOptions::default());
            head_history.push(row);
            info
        } else {
            branch_info
        };

        if let Some(row) = state.row_by_id_mut(row_id) {
            row.changed = false;
            row.head_sha1 = Some(branch_sha);
        }
        Ok(info)
    }
}

impl Persister for MemoryPersister {
    fn load_cube(&self, app_id: &AppId, name: &str) -> PersisterResult<Option<Arc<dyn Cube>>> {
        let state = self.read();
        Ok(state
            .live(app_id, name)
            .map(|row| snapshot(&row.cube, app_id)))
    }

    fn load_cube_by_id(&self, id: &str) -> PersisterResult<Arc<dyn Cube>> {
        let state = self.read();
        state
            .row_by_id(id)
            .map(|row| snapshot(&row.cube, &row.app_id))
            .ok_or_else(|| PersisterError::RevisionNotFound {
                detail: format!("id {id}"),
            })
    }

    fn load_cube_by_sha1(
        &self,
        app_id: &AppId,
        name: &str,
        sha1: &str,
    ) -> PersisterResult<Option<Arc<dyn Cube>>> {
        let state = self.read();
        Ok(state.history(app_id, name).and_then(|history| {
            history
                .iter()
                .rev()
                .find(|row| row.sha1 == sha1)
                .map(|row| snapshot(&row.cube, app_id))
        }))
    }

    fn search(
        &self,
        app_id: &AppId,
        name_pattern: Option<&str>,
        content_pattern: Option<&str>,
        options: &SearchOptions,
    ) -> PersisterResult<Vec<CubeInfo>> {
        let state = self.read();
        let Some(table) = state.tables.get(app_id) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for history in table.values() {
            let Some(row) = history.last() else { continue };
            if options.active_records_only && row.is_tombstone() {
                continue;
            }
            if options.deleted_records_only && !row.is_tombstone() {
                continue;
            }
            if options.changed_records_only && !row.changed {
                continue;
            }
            if let Some(pattern) = name_pattern {
                let hit = if options.exact_match_name {
                    row.name.eq_ignore_ascii_case(pattern)
                } else {
                    glob::matches(pattern, &row.name)
                };
                if !hit {
                    continue;
                }
            }
            if let Some(pattern) = content_pattern {
                let body = serde_json::to_string(&row.cube.to_json()).unwrap_or_default();
                if !glob::matches(&format!("*{pattern}*"), &body) {
                    continue;
                }
            }
            out.push(row.to_info(options));
        }
        Ok(out)
    }

    fn get_revisions(&self, app_id: &AppId, name: &str) -> PersisterResult<Vec<CubeInfo>> {
        let state = self.read();
        let history = state
            .history(app_id, name)
            .ok_or_else(|| PersisterError::CubeNotFound {
                app_id: app_id.cache_key(),
                name: name.to_string(),
            })?;
        Ok(history
            .iter()
            .map(|row| row.to_info(&SearchOptions::default()))
            .collect())
    }

    fn update_cube(&self, app_id: &AppId, cube: &Arc<dyn Cube>, _user: &str) -> PersisterResult<()> {
        let mut state = self.write();
        let name = cube.name().to_string();
        let (prev_head_sha1, prev_notes, prev_test_data, live_sha) = state
            .latest(app_id, &name)
            .map(|row| {
                (
                    row.head_sha1.clone(),
                    row.notes.clone(),
                    row.test_data.clone(),
                    (!row.is_tombstone()).then(|| row.sha1.clone()),
                )
            })
            .unwrap_or_default();

        if live_sha.as_deref() == Some(cube.sha1().as_str()) {
            return Ok(()); // identical content, no new revision
        }

        let history = state.history_mut(app_id, &name);
        let rev = next_revision(history);
        history.push(new_row(
            app_id,
            cube,
            rev,
            prev_head_sha1,
            true,
            prev_notes,
            prev_test_data,
        ));
        Ok(())
    }

    fn duplicate_cube(
        &self,
        old_app_id: &AppId,
        new_app_id: &AppId,
        old_name: &str,
        new_name: &str,
        _user: &str,
    ) -> PersisterResult<()> {
        let mut state = self.write();
        let source = Arc::clone(&state.require_live(old_app_id, old_name)?.cube);
        if state.live(new_app_id, new_name).is_some() {
            return Err(PersisterError::AlreadyExists {
                name: new_name.to_string(),
            });
        }
        let copy = source.duplicate(new_name);
        let history = state.history_mut(new_app_id, new_name);
        let rev = next_revision(history);
        history.push(new_row(new_app_id, &copy, rev, None, true, String::new(), String::new()));
        Ok(())
    }

    fn rename_cube(
        &self,
        app_id: &AppId,
        old_name: &str,
        new_name: &str,
        _user: &str,
    ) -> PersisterResult<()> {
        let mut state = self.write();
        let (src_cube, src_head_sha1) = {
            let row = state.require_live(app_id, old_name)?;
            (Arc::clone(&row.cube), row.head_sha1.clone())
        };
        if state.live(app_id, new_name).is_some() {
            return Err(PersisterError::AlreadyExists {
                name: new_name.to_string(),
            });
        }

        let old_history = state.history_mut(app_id, old_name);
        let tombstone_rev = -next_revision(old_history);
        old_history.push(new_row(
            app_id,
            &src_cube,
            tombstone_rev,
            src_head_sha1,
            true,
            String::new(),
            String::new(),
        ));

        let renamed = src_cube.duplicate(new_name);
        let new_history = state.history_mut(app_id, new_name);
        let rev = next_revision(new_history);
        new_history.push(new_row(app_id, &renamed, rev, None, true, String::new(), String::new()));
        Ok(())
    }

    fn delete_cubes(
        &self,
        app_id: &AppId,
        names: &[String],
        allow_hard: bool,
        _user: &str,
    ) -> PersisterResult<()> {
        let mut state = self.write();
        for name in names {
            let (cube, head_sha1) = {
                let row = state.require_live(app_id, name)?;
                (Arc::clone(&row.cube), row.head_sha1.clone())
            };
            if allow_hard {
                if let Some(table) = state.tables.get_mut(app_id) {
                    table.remove(&key(name));
                }
                continue;
            }
            let history = state.history_mut(app_id, name);
            let rev = -next_revision(history);
            history.push(new_row(app_id, &cube, rev, head_sha1, true, String::new(), String::new()));
        }
        Ok(())
    }

    fn restore_cubes(&self, app_id: &AppId, names: &[String], _user: &str) -> PersisterResult<()> {
        let mut state = self.write();
        for name in names {
            let (cube, head_sha1) = {
                let row = state.latest(app_id, name).filter(|r| r.is_tombstone()).ok_or_else(
                    || PersisterError::RevisionNotFound {
                        detail: format!("no tombstone of '{name}' to restore in {}", app_id.cache_key()),
                    },
                )?;
                (Arc::clone(&row.cube), row.head_sha1.clone())
            };
            let history = state.history_mut(app_id, name);
            let rev = next_revision(history);
            history.push(new_row(app_id, &cube, rev, head_sha1, true, String::new(), String::new()));
        }
        Ok(())
    }

    fn rollback_cubes(&self, app_id: &AppId, names: &[String], _user: &str) -> PersisterResult<()> {
        let head_id = app_id.as_head();
        let mut state = self.write();
        for name in names {
            let Some(latest) = state.latest(app_id, name) else {
                return Err(PersisterError::CubeNotFound {
                    app_id: app_id.cache_key(),
                    name: name.clone(),
                });
            };
            let Some(anchor) = latest.head_sha1.clone() else {
                // Never committed: rollback erases the cube entirely.
                if let Some(table) = state.tables.get_mut(app_id) {
                    table.remove(&key(name));
                }
                continue;
            };
            let head_row = state
                .history(&head_id, name)
                .and_then(|h| h.iter().rev().find(|row| row.sha1 == anchor))
                .cloned()
                .ok_or_else(|| PersisterError::RevisionNotFound {
                    detail: format!("head revision {anchor} of '{name}'"),
                })?;
            let history = state.history_mut(app_id, name);
            let rev = if head_row.is_tombstone() {
                -next_revision(history)
            } else {
                next_revision(history)
            };
            history.push(new_row(
                app_id,
                &head_row.cube,
                rev,
                Some(anchor),
                false,
                String::new(),
                String::new(),
            ));
        }
        Ok(())
    }

    fn commit_cubes(
        &self,
        app_id: &AppId,
        ids: &[String],
        _user: &str,
    ) -> PersisterResult<Vec<CubeInfo>> {
        let mut state = self.write();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(Self::commit_row(&mut state, app_id, id)?);
        }
        Ok(out)
    }

    fn commit_merged_cube_to_head(
        &self,
        app_id: &AppId,
        cube: &Arc<dyn Cube>,
        _user: &str,
    ) -> PersisterResult<CubeInfo> {
        let head_id = app_id.as_head();
        let name = cube.name().to_string();
        let merged_sha = cube.sha1();
        let mut state = self.write();

        let head_history = state.history_mut(&head_id, &name);
        let rev = next_revision(head_history);
        let head_row = new_row(&head_id, cube, rev, None, false, String::new(), String::new());
        let info = head_row.to_info(&SearchOptions::default());
        head_history.push(head_row);

        // The branch record adopts the merged content and is now in sync.
        let branch_history = state.history_mut(app_id, &name);
        let rev = next_revision(branch_history);
        branch_history.push(new_row(
            app_id,
            cube,
            rev,
            Some(merged_sha),
            false,
            String::new(),
            String::new(),
        ));
        Ok(info)
    }

    fn commit_merged_cube_to_branch(
        &self,
        app_id: &AppId,
        cube: &Arc<dyn Cube>,
        head_sha1: &str,
        _user: &str,
    ) -> PersisterResult<CubeInfo> {
        let mut state = self.write();
        let history = state.history_mut(app_id, cube.name());
        let rev = next_revision(history);
        let row = new_row(
            app_id,
            cube,
            rev,
            Some(head_sha1.to_string()),
            true,
            String::new(),
            String::new(),
        );
        let info = row.to_info(&SearchOptions::default());
        history.push(row);
        Ok(info)
    }

    fn pull_to_branch(
        &self,
        app_id: &AppId,
        ids: &[String],
        _user: &str,
    ) -> PersisterResult<Vec<CubeInfo>> {
        let mut state = self.write();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let head_row = state
                .row_by_id(id)
                .cloned()
                .ok_or_else(|| PersisterError::RevisionNotFound {
                    detail: format!("id {id}"),
                })?;
            let history = state.history_mut(app_id, &head_row.name);
            let rev = if head_row.is_tombstone() {
                -next_revision(history)
            } else {
                next_revision(history)
            };
            let row = new_row(
                app_id,
                &head_row.cube,
                rev,
                Some(head_row.sha1.clone()),
                false,
                head_row.notes.clone(),
                head_row.test_data.clone(),
            );
            out.push(row.to_info(&SearchOptions::default()));
            history.push(row);
        }
        Ok(out)
    }

    fn update_branch_cube_head_sha1(&self, id: &str, head_sha1: &str) -> PersisterResult<()> {
        let mut state = self.write();
        let row = state
            .row_by_id_mut(id)
            .ok_or_else(|| PersisterError::RevisionNotFound {
                detail: format!("id {id}"),
            })?;
        row.head_sha1 = Some(head_sha1.to_string());
        row.changed = false;
        Ok(())
    }

    fn copy_branch(&self, src: &AppId, dst: &AppId) -> PersisterResult<usize> {
        let mut state = self.write();
        if state.tables.get(dst).is_some_and(|t| !t.is_empty()) {
            return Err(PersisterError::AlreadyExists {
                name: dst.cache_key(),
            });
        }
        let rows: Vec<Row> = state
            .tables
            .get(src)
            .map(|table| table.values().filter_map(|h| h.last().cloned()).collect())
            .unwrap_or_default();

        let forking = src.is_head() && !dst.is_head();
        let count = rows.len();
        for row in rows {
            let (head_sha1, changed) = if forking {
                (Some(row.sha1.clone()), false)
            } else {
                (row.head_sha1.clone(), row.changed)
            };
            let copied = Row {
                id: Uuid::new_v4().to_string(),
                app_id: dst.clone(),
                name: row.name.clone(),
                revision: if row.is_tombstone() { -1 } else { 0 },
                cube: snapshot(&row.cube, dst),
                sha1: row.sha1.clone(),
                head_sha1,
                changed,
                notes: row.notes.clone(),
                test_data: row.test_data.clone(),
            };
            state
                .tables
                .entry(dst.clone())
                .or_default()
                .insert(key(&copied.name), vec![copied]);
        }
        Ok(count)
    }

    fn move_branch(&self, app_id: &AppId, new_version: &str) -> PersisterResult<usize> {
        let target = app_id.as_version(new_version);
        let mut state = self.write();
        let Some(mut table) = state.tables.remove(app_id) else {
            return Ok(0);
        };
        let count = table.len();
        for history in table.values_mut() {
            for row in history.iter_mut() {
                row.app_id = target.clone();
                row.cube.set_app_id(target.clone());
            }
        }
        state.tables.insert(target, table);
        Ok(count)
    }

    fn release_cubes(&self, app_id: &AppId, _new_snap_version: &str) -> PersisterResult<usize> {
        let head_id = app_id.as_head().as_snapshot();
        let release_id = head_id.as_release();
        let mut state = self.write();
        let Some(mut table) = state.tables.remove(&head_id) else {
            return Ok(0);
        };
        let count = table.len();
        for history in table.values_mut() {
            for row in history.iter_mut() {
                row.app_id = release_id.clone();
                row.cube.set_app_id(release_id.clone());
            }
        }
        state.tables.insert(release_id, table);
        Ok(count)
    }

    fn merge_accept_mine(
        &self,
        app_id: &AppId,
        name: &str,
        _user: &str,
    ) -> PersisterResult<CubeInfo> {
        let head_id = app_id.as_head();
        let mut state = self.write();
        let head_sha = state
            .latest(&head_id, name)
            .map(|row| row.sha1.clone())
            .ok_or_else(|| PersisterError::CubeNotFound {
                app_id: head_id.cache_key(),
                name: name.to_string(),
            })?;
        let branch_row_id = state
            .latest(app_id, name)
            .map(|row| row.id.clone())
            .ok_or_else(|| PersisterError::CubeNotFound {
                app_id: app_id.cache_key(),
                name: name.to_string(),
            })?;
        let row = state
            .row_by_id_mut(&branch_row_id)
            .expect("row disappeared under write lock");
        row.head_sha1 = Some(head_sha);
        row.changed = true;
        Ok(row.to_info(&SearchOptions::default()))
    }

    fn merge_accept_theirs(
        &self,
        app_id: &AppId,
        name: &str,
        head_sha1: &str,
        _user: &str,
    ) -> PersisterResult<CubeInfo> {
        let head_id = app_id.as_head();
        let mut state = self.write();
        let head_row = state
            .latest(&head_id, name)
            .cloned()
            .ok_or_else(|| PersisterError::CubeNotFound {
                app_id: head_id.cache_key(),
                name: name.to_string(),
            })?;
        if head_row.sha1 != head_sha1 {
            return Err(PersisterError::ShaMismatch {
                name: name.to_string(),
                expected: head_sha1.to_string(),
                actual: head_row.sha1,
            });
        }
        let history = state.history_mut(app_id, name);
        let rev = if head_row.is_tombstone() {
            -next_revision(history)
        } else {
            next_revision(history)
        };
        let row = new_row(
            app_id,
            &head_row.cube,
            rev,
            Some(head_row.sha1.clone()),
            false,
            String::new(),
            String::new(),
        );
        let info = row.to_info(&SearchOptions::default());
        history.push(row);
        Ok(info)
    }

    fn get_app_names(&self, tenant: &str) -> PersisterResult<Vec<String>> {
        let state = self.read();
        let mut names: BTreeSet<String> = BTreeSet::new();
        for app_id in state.tables.keys() {
            if app_id.tenant().eq_ignore_ascii_case(tenant) {
                names.insert(app_id.app().to_string());
            }
        }
        Ok(names.into_iter().collect())
    }

    fn get_versions(
        &self,
        tenant: &str,
        app: &str,
    ) -> PersisterResult<BTreeMap<Status, Vec<String>>> {
        let state = self.read();
        let mut grouped: BTreeMap<Status, BTreeSet<String>> = BTreeMap::new();
        for app_id in state.tables.keys() {
            if app_id.tenant().eq_ignore_ascii_case(tenant) && app_id.app().eq_ignore_ascii_case(app)
            {
                grouped
                    .entry(app_id.status())
                    .or_default()
                    .insert(app_id.version().to_string());
            }
        }
        Ok(grouped
            .into_iter()
            .map(|(status, versions)| (status, versions.into_iter().collect()))
            .collect())
    }

    fn get_branches(&self, app_id: &AppId) -> PersisterResult<BTreeSet<String>> {
        let state = self.read();
        let anchor = app_id.branch_agnostic_cache_key();
        Ok(state
            .tables
            .keys()
            .filter(|other| other.branch_agnostic_cache_key() == anchor)
            .map(|other| other.branch().to_string())
            .collect())
    }

    fn delete_branch(&self, app_id: &AppId) -> PersisterResult<()> {
        let mut state = self.write();
        state.tables.remove(app_id);
        Ok(())
    }

    fn update_notes(&self, app_id: &AppId, name: &str, notes: &str) -> PersisterResult<()> {
        let mut state = self.write();
        let id = state.require_live(app_id, name)?.id.clone();
        if let Some(row) = state.row_by_id_mut(&id) {
            row.notes = notes.to_string();
        }
        Ok(())
    }

    fn get_notes(&self, app_id: &AppId, name: &str) -> PersisterResult<String> {
        let state = self.read();
        Ok(state.require_live(app_id, name)?.notes.clone())
    }

    fn update_test_data(&self, app_id: &AppId, name: &str, data: &str) -> PersisterResult<()> {
        let mut state = self.write();
        let id = state.require_live(app_id, name)?.id.clone();
        if let Some(row) = state.row_by_id_mut(&id) {
            row.test_data = data.to_string();
        }
        Ok(())
    }

    fn get_test_data(&self, app_id: &AppId, name: &str) -> PersisterResult<String> {
        let state = self.read();
        Ok(state.require_live(app_id, name)?.test_data.clone())
    }
}
