//! The repository façade.
//!
//! [`CubeRepository`] owns the cache, advice registry, and the injected
//! ports, and funnels every public operation through the same discipline:
//! validate input, auto-create administrative cubes for unseen apps, check
//! permissions, consult the application lock, call the persister, then fix
//! the cache and broadcast. Permission and lock failures happen before the
//! persister call and therefore leave no side effects.
//!
//! Read paths shortcut after the cache check; a miss is cached as a
//! [`crate::cache::CacheEntry::NotFound`] sentinel so repeated lookups never
//! re-query the persister.

#[cfg(test)]
mod tests;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::advice::{Advice, AdviceRegistry};
use crate::appid::AppId;
use crate::branch::BranchEngine;
use crate::broadcast::{Broadcaster, LogBroadcaster};
use crate::cache::{CacheEntry, CacheRegistry};
use crate::classpath::{ClasspathPort, ResourceLoader};
use crate::config;
use crate::cube::{Coord, Cube, CubeInfo, CubeSource};
use crate::delta::DeltaProcessor;
use crate::error::{RepoError, Result};
use crate::lifecycle;
use crate::lock::LockCoordinator;
use crate::permissions::{Action, PermissionEvaluator};
use crate::persister::{Persister, PersisterError, SearchOptions};
use crate::sys;

/// Tunables of the repository.
#[derive(Debug, Clone)]
pub struct RepoOptions {
    /// How long a release waits for in-flight readers to drain after taking
    /// the lock.
    pub release_quiesce: Duration,
    /// Skips the quiesce wait entirely (set under test).
    pub skip_quiesce: bool,
}

impl Default for RepoOptions {
    fn default() -> Self {
        Self {
            release_quiesce: Duration::from_secs(10),
            skip_quiesce: config::system_params().test_mode,
        }
    }
}

/// The process-wide coordination façade over a cube repository.
pub struct CubeRepository {
    persister: Arc<dyn Persister>,
    deltas: Arc<dyn DeltaProcessor>,
    broadcaster: Arc<dyn Broadcaster>,
    classpath: Option<Arc<dyn ClasspathPort>>,
    cache: CacheRegistry,
    advices: AdviceRegistry,
    options: RepoOptions,
}

impl CubeSource for CubeRepository {
    fn cube(&self, app_id: &AppId, name: &str) -> Result<Option<Arc<dyn Cube>>> {
        self.load_cached(app_id, name)
    }
}

impl CubeRepository {
    /// Builds a repository over a persister and a delta processor.
    #[must_use]
    pub fn new(persister: Arc<dyn Persister>, deltas: Arc<dyn DeltaProcessor>) -> Self {
        Self {
            persister,
            deltas,
            broadcaster: Arc::new(LogBroadcaster),
            classpath: None,
            cache: CacheRegistry::new(),
            advices: AdviceRegistry::new(),
            options: RepoOptions::default(),
        }
    }

    /// Replaces the broadcast transport.
    #[must_use]
    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    /// Installs a classpath resolver.
    #[must_use]
    pub fn with_classpath(mut self, classpath: Arc<dyn ClasspathPort>) -> Self {
        self.classpath = Some(classpath);
        self
    }

    /// Overrides the tunables.
    #[must_use]
    pub fn with_options(mut self, options: RepoOptions) -> Self {
        self.options = options;
        self
    }

    // ---------------------------------------------------------------------
    // Component wiring
    // ---------------------------------------------------------------------

    fn engine(&self) -> BranchEngine<'_> {
        BranchEngine::new(self.persister.as_ref(), self.deltas.as_ref())
    }

    fn locks(&self) -> LockCoordinator<'_> {
        LockCoordinator::new(self, self.persister.as_ref(), &self.cache)
    }

    fn evaluator(&self) -> PermissionEvaluator<'_> {
        PermissionEvaluator::new(self)
    }

    // ---------------------------------------------------------------------
    // Cached loading
    // ---------------------------------------------------------------------

    /// The load-and-cache path: every hydrated cube passes through here so
    /// advices attach exactly once per cache residency.
    fn load_cached(&self, app_id: &AppId, name: &str) -> Result<Option<Arc<dyn Cube>>> {
        match self.cache.get(app_id, name) {
            Some(CacheEntry::Cube(cube)) => return Ok(Some(cube)),
            Some(CacheEntry::NotFound) => return Ok(None),
            None => {}
        }
        match self.persister.load_cube(app_id, name)? {
            Some(cube) => {
                self.advices.apply(app_id, cube.as_ref());
                self.cache.put(app_id, &cube);
                Ok(Some(cube))
            }
            None => {
                self.cache.put_not_found(app_id, name);
                Ok(None)
            }
        }
    }

    /// Applies the invalidation rule: anything touching `sys.classpath`
    /// clears the whole workspace, everything else evicts one name.
    fn invalidate(&self, app_id: &AppId, name: &str) {
        if sys::is_classpath(name) {
            self.cache.clear(app_id);
        } else {
            self.cache.remove(app_id, name);
        }
    }

    // ---------------------------------------------------------------------
    // Validation and guarding
    // ---------------------------------------------------------------------

    fn validate_cube_name(name: &str) -> Result<()> {
        if name.trim().is_empty() || name.trim() != name || name.contains('/') {
            return Err(RepoError::invalid(format!("invalid cube name: '{name}'")));
        }
        Ok(())
    }

    fn reject_release(app_id: &AppId) -> Result<()> {
        if app_id.is_release() {
            return Err(RepoError::ReleaseImmutable {
                app_id: app_id.cache_key(),
            });
        }
        Ok(())
    }

    /// The common mutation preamble: reject frozen workspaces, bootstrap
    /// unseen apps, check permissions per touched name, consult the lock.
    fn guard_mutation(
        &self,
        app_id: &AppId,
        names: &[&str],
        action: Action,
        user: &str,
    ) -> Result<()> {
        Self::reject_release(app_id)?;
        self.detect_new_app_id(app_id, user)?;
        let evaluator = self.evaluator();
        for name in names {
            evaluator.assert_allowed(app_id, name, action, user)?;
        }
        self.locks().assert_not_lock_blocked(app_id, user)
    }

    fn finish_mutation(&self, app_id: &AppId, names: &[&str]) {
        for name in names {
            self.invalidate(app_id, name);
        }
        self.broadcaster.broadcast(app_id);
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Loads a cube by name, or `None` when it does not exist. The miss is
    /// cached; repeated lookups do not retry the persister.
    pub fn get_cube(
        &self,
        app_id: &AppId,
        name: &str,
        user: &str,
    ) -> Result<Option<Arc<dyn Cube>>> {
        Self::validate_cube_name(name)?;
        self.evaluator()
            .assert_allowed(app_id, name, Action::Read, user)?;
        self.load_cached(app_id, name)
    }

    /// Whether an actual cube is resident in the cache.
    #[must_use]
    pub fn is_cached(&self, app_id: &AppId, name: &str) -> bool {
        self.cache.is_cached(app_id, name)
    }

    /// Evicts a whole workspace, including classpath loaders and advices.
    pub fn clear_cache(&self, app_id: &AppId) {
        self.cache.clear(app_id);
    }

    /// Drops every cache in the process. Test-only.
    pub fn clear_all_caches(&self) {
        self.cache.clear_all();
    }

    /// Searches a workspace, filtering out cubes the user may not read.
    /// Uses one memoised permission snapshot across the whole result list.
    pub fn search(
        &self,
        app_id: &AppId,
        name_pattern: Option<&str>,
        content_pattern: Option<&str>,
        options: &SearchOptions,
        user: &str,
    ) -> Result<Vec<CubeInfo>> {
        let memo = self.evaluator().snapshot(app_id, user)?;
        let infos = self
            .persister
            .search(app_id, name_pattern, content_pattern, options)?;
        Ok(infos
            .into_iter()
            .filter(|info| memo.allowed(&info.name, Action::Read))
            .collect())
    }

    /// Revision history of one cube, oldest first.
    pub fn get_revisions(&self, app_id: &AppId, name: &str, user: &str) -> Result<Vec<CubeInfo>> {
        self.evaluator()
            .assert_allowed(app_id, name, Action::Read, user)?;
        Ok(self.persister.get_revisions(app_id, name)?)
    }

    /// Application names known for a tenant.
    pub fn get_app_names(&self, tenant: &str) -> Result<Vec<String>> {
        Ok(self.persister.get_app_names(tenant)?)
    }

    /// Versions known for a tenant/app, grouped by status.
    pub fn get_versions(
        &self,
        tenant: &str,
        app: &str,
    ) -> Result<std::collections::BTreeMap<crate::appid::Status, Vec<String>>> {
        Ok(self.persister.get_versions(tenant, app)?)
    }

    /// Branch labels under the workspace's version.
    pub fn get_branches(&self, app_id: &AppId) -> Result<BTreeSet<String>> {
        Ok(self.persister.get_branches(app_id)?)
    }

    /// The transitive closure of cube references, cycle-safe.
    pub fn referenced_cube_names(&self, app_id: &AppId, name: &str) -> Result<BTreeSet<String>> {
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut out = BTreeSet::new();
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            if !visited.insert(current.to_lowercase()) {
                continue;
            }
            let Some(cube) = self.load_cached(app_id, &current)? else {
                continue;
            };
            for referenced in cube.referenced_cube_names() {
                out.insert(referenced.clone());
                stack.push(referenced);
            }
        }
        Ok(out)
    }

    /// Commit notes of the live revision.
    pub fn get_notes(&self, app_id: &AppId, name: &str) -> Result<String> {
        self.persister
            .get_notes(app_id, name)
            .map_err(soft_not_found)
    }

    /// Attached test data of the live revision.
    pub fn get_test_data(&self, app_id: &AppId, name: &str) -> Result<String> {
        self.persister
            .get_test_data(app_id, name)
            .map_err(soft_not_found)
    }

    /// Resolves the runtime workspace id for a tenant/app pair through the
    /// `sys.bootstrap` cube: the cell at the given coordinate holds the
    /// target id.
    pub fn resolve_app_id(&self, tenant: &str, app: &str, coords: &Coord) -> Result<AppId> {
        let boot = AppId::new(
            tenant,
            app,
            crate::appid::SYSTEM_VERSION,
            crate::appid::Status::Snapshot,
            crate::appid::HEAD,
        )?;
        let cube = self
            .load_cached(&boot, sys::BOOTSTRAP)?
            .ok_or_else(|| RepoError::state("sys.bootstrap is not defined for this app"))?;
        let value = cube
            .cell(coords)
            .ok_or_else(|| RepoError::state(format!("sys.bootstrap has no entry for {coords:?}")))?;
        let parsed: AppId = serde_json::from_value(value)
            .map_err(|e| RepoError::state(format!("sys.bootstrap yielded a non-id value: {e}")))?;
        // Re-validate: cell content is configuration, not trusted input.
        AppId::new(
            parsed.tenant(),
            parsed.app(),
            parsed.version(),
            parsed.status(),
            parsed.branch(),
        )
    }

    /// Resolves a resource loader through the `sys.classpath` cube,
    /// injecting the configured environment level when the coordinate lacks
    /// one. Loaders are cached per workspace and released on whole-workspace
    /// invalidation.
    pub fn resolve_classpath(
        &self,
        app_id: &AppId,
        coords: &Coord,
    ) -> Result<Arc<dyn ResourceLoader>> {
        let port = self
            .classpath
            .as_ref()
            .ok_or_else(|| RepoError::state("no classpath port configured"))?;

        let mut coords = coords.clone();
        if !coords.contains_key("env") {
            if let Some(level) = &config::system_params().env_level {
                coords.insert("env".to_string(), level.clone());
            }
        }
        let coord_key = coords
            .iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>()
            .join(",");
        if let Some(loader) = self.cache.loader(app_id, &coord_key) {
            return Ok(loader);
        }

        let boot = app_id.boot_id();
        let cube = self
            .load_cached(&boot, sys::CLASSPATH)?
            .ok_or_else(|| RepoError::state("sys.classpath is not defined for this app"))?;
        let urls = match cube.cell(&coords) {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| item.as_str().map(String::from))
                .collect::<Vec<_>>(),
            Some(Value::String(url)) => vec![url],
            other => {
                return Err(RepoError::Resource {
                    message: format!("sys.classpath yielded a non-URL value: {other:?}"),
                })
            }
        };
        let loader = port.loader(&urls)?;
        self.cache.put_loader(app_id, &coord_key, Arc::clone(&loader));
        Ok(loader)
    }

    // ---------------------------------------------------------------------
    // Permissions and lock surface
    // ---------------------------------------------------------------------

    /// Whether `user` may perform `action` on `resource`.
    pub fn check_permissions(
        &self,
        app_id: &AppId,
        resource: &str,
        action: Action,
        user: &str,
    ) -> Result<bool> {
        self.evaluator().allow(app_id, resource, action, user)
    }

    /// Asserts a permission, raising [`RepoError::PermissionDenied`].
    pub fn assert_permissions(
        &self,
        app_id: &AppId,
        resource: &str,
        action: Action,
        user: &str,
    ) -> Result<()> {
        self.evaluator()
            .assert_allowed(app_id, resource, action, user)
    }

    /// Acquires the application lock for `user`.
    pub fn lock_app(&self, app_id: &AppId, user: &str) -> Result<()> {
        self.locks().lock(app_id, user)
    }

    /// Releases the application lock held by `user`.
    pub fn unlock_app(&self, app_id: &AppId, user: &str) -> Result<()> {
        self.locks().unlock(app_id, user)
    }

    /// The current application lock owner, if any.
    pub fn app_lock_owner(&self, app_id: &AppId) -> Result<Option<String>> {
        self.locks().owner(app_id)
    }

    // ---------------------------------------------------------------------
    // Advices
    // ---------------------------------------------------------------------

    /// Registers an advice; it attaches to matching cubes on hydration.
    pub fn add_advice(&self, app_id: &AppId, advice: Advice) {
        self.advices.add(app_id, advice);
        // Already-resident cubes were hydrated before this advice existed.
        self.cache.clear(app_id);
    }

    /// Advices registered for a workspace.
    #[must_use]
    pub fn advices_for(&self, app_id: &AppId) -> Vec<Advice> {
        self.advices.advices_for(app_id)
    }

    // ---------------------------------------------------------------------
    // Bootstrap
    // ---------------------------------------------------------------------

    /// Creates the administrative cubes when a tenant/app pair is observed
    /// for the first time. Returns whether anything was created.
    pub fn detect_new_app_id(&self, app_id: &AppId, user: &str) -> Result<bool> {
        let known = self
            .persister
            .get_versions(app_id.tenant(), app_id.app())?;
        if !known.is_empty() {
            return Ok(false);
        }
        let boot = app_id.boot_id();
        tracing::info!(app_id = %app_id, user, "bootstrapping administrative cubes");
        for cube in [
            lifecycle::usergroups_cube(&boot, user),
            lifecycle::permissions_cube(&boot),
            lifecycle::lock_cube(&boot),
        ] {
            self.persister.update_cube(&boot, &cube, user)?;
            self.cache.remove(&boot, cube.name());
        }
        Ok(true)
    }

    // ---------------------------------------------------------------------
    // Single-cube mutations
    // ---------------------------------------------------------------------

    /// Creates or updates a cube in a branch.
    pub fn update_cube(&self, app_id: &AppId, cube: &Arc<dyn Cube>, user: &str) -> Result<()> {
        let name = cube.name().to_string();
        Self::validate_cube_name(&name)?;
        self.guard_mutation(app_id, &[&name], Action::Update, user)?;
        cube.set_app_id(app_id.clone());
        self.persister.update_cube(app_id, cube, user)?;
        self.finish_mutation(app_id, &[&name]);
        Ok(())
    }

    /// Copies a cube to a new name and/or workspace as a fresh lineage.
    pub fn duplicate_cube(
        &self,
        old_app_id: &AppId,
        new_app_id: &AppId,
        old_name: &str,
        new_name: &str,
        user: &str,
    ) -> Result<()> {
        Self::validate_cube_name(old_name)?;
        Self::validate_cube_name(new_name)?;
        if old_app_id == new_app_id && old_name.eq_ignore_ascii_case(new_name) {
            return Err(RepoError::invalid(
                "duplicate source and target are the same cube",
            ));
        }
        self.evaluator()
            .assert_allowed(old_app_id, old_name, Action::Read, user)?;
        self.guard_mutation(new_app_id, &[new_name], Action::Update, user)?;
        self.persister
            .duplicate_cube(old_app_id, new_app_id, old_name, new_name, user)?;
        self.finish_mutation(new_app_id, &[new_name]);
        Ok(())
    }

    /// Renames a cube within a workspace.
    pub fn rename_cube(
        &self,
        app_id: &AppId,
        old_name: &str,
        new_name: &str,
        user: &str,
    ) -> Result<()> {
        Self::validate_cube_name(old_name)?;
        Self::validate_cube_name(new_name)?;
        if old_name.eq_ignore_ascii_case(new_name) {
            return Err(RepoError::invalid("rename source and target are the same"));
        }
        self.guard_mutation(app_id, &[old_name, new_name], Action::Update, user)?;
        self.persister
            .rename_cube(app_id, old_name, new_name, user)?;
        self.finish_mutation(app_id, &[old_name, new_name]);
        Ok(())
    }

    /// Tombstones cubes in a branch.
    pub fn delete_cubes(&self, app_id: &AppId, names: &[String], user: &str) -> Result<()> {
        if names.is_empty() {
            return Err(RepoError::invalid("empty delete batch"));
        }
        for name in names {
            Self::validate_cube_name(name)?;
        }
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        self.guard_mutation(app_id, &refs, Action::Update, user)?;
        self.persister.delete_cubes(app_id, names, false, user)?;
        self.finish_mutation(app_id, &refs);
        Ok(())
    }

    /// Restores tombstoned cubes, re-hydrating them through the caching
    /// path so advices reapply.
    pub fn restore_cubes(&self, app_id: &AppId, names: &[String], user: &str) -> Result<()> {
        if names.is_empty() {
            return Err(RepoError::invalid("empty restore batch"));
        }
        if app_id.is_head() {
            return Err(RepoError::invalid("cannot restore cubes directly in HEAD"));
        }
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        self.guard_mutation(app_id, &refs, Action::Update, user)?;
        self.persister.restore_cubes(app_id, names, user)?;
        for name in &refs {
            self.invalidate(app_id, name);
            self.load_cached(app_id, name)?;
        }
        self.broadcaster.broadcast(app_id);
        Ok(())
    }

    /// Replaces the commit notes on the live revision.
    pub fn update_notes(&self, app_id: &AppId, name: &str, notes: &str, user: &str) -> Result<()> {
        self.guard_mutation(app_id, &[name], Action::Update, user)?;
        self.persister
            .update_notes(app_id, name, notes)
            .map_err(soft_not_found)
    }

    /// Replaces the attached test data on the live revision.
    pub fn update_test_data(
        &self,
        app_id: &AppId,
        name: &str,
        data: &str,
        user: &str,
    ) -> Result<()> {
        self.guard_mutation(app_id, &[name], Action::Update, user)?;
        self.persister
            .update_test_data(app_id, name, data)
            .map_err(soft_not_found)
    }

    // ---------------------------------------------------------------------
    // Branch synchronisation
    // ---------------------------------------------------------------------

    /// The change list of a branch against HEAD.
    pub fn get_branch_changes(&self, app_id: &AppId) -> Result<Vec<CubeInfo>> {
        self.engine().diff_against_head(app_id)
    }

    /// Commits every changed cube of the branch to HEAD.
    pub fn commit_branch(&self, app_id: &AppId, user: &str) -> Result<Vec<CubeInfo>> {
        let changes = self.engine().diff_against_head(app_id)?;
        self.commit_cubes(app_id, &changes, user)
    }

    /// Commits the supplied changed cubes to HEAD.
    ///
    /// Non-conflicted cubes are durably committed even when the call raises
    /// [`crate::error::BranchMergeError`]; callers retry only the failed
    /// set. Both the branch and the HEAD caches are invalidated either way.
    pub fn commit_cubes(
        &self,
        app_id: &AppId,
        infos: &[CubeInfo],
        user: &str,
    ) -> Result<Vec<CubeInfo>> {
        Self::reject_release(app_id)?;
        let evaluator = self.evaluator();
        for info in infos {
            evaluator.assert_allowed(app_id, &info.name, Action::Commit, user)?;
        }
        self.locks().assert_not_lock_blocked(app_id, user)?;

        let result = self.engine().commit_branch(app_id, infos, user);
        // Partial commits are durable even on a merge error; the cache must
        // not serve stale content on either side.
        let head_id = app_id.as_head();
        self.cache.clear(app_id);
        self.cache.clear(&head_id);
        self.broadcaster.broadcast(app_id);
        self.broadcaster.broadcast(&head_id);
        result
    }

    /// Pulls HEAD into the branch.
    pub fn update_branch(&self, app_id: &AppId, user: &str) -> Result<Vec<CubeInfo>> {
        Self::reject_release(app_id)?;
        self.evaluator()
            .assert_allowed(app_id, "*", Action::Update, user)?;
        self.locks().assert_not_lock_blocked(app_id, user)?;

        let result = self.engine().update_branch(app_id, user);
        self.cache.clear(app_id);
        self.broadcaster.broadcast(app_id);
        result
    }

    /// Pulls one cube from an arbitrary other branch.
    pub fn update_branch_cube(
        &self,
        app_id: &AppId,
        name: &str,
        other_branch: &str,
        user: &str,
    ) -> Result<Vec<CubeInfo>> {
        Self::reject_release(app_id)?;
        self.evaluator()
            .assert_allowed(app_id, name, Action::Update, user)?;
        self.locks().assert_not_lock_blocked(app_id, user)?;

        let result = self.engine().update_branch_cube(app_id, name, other_branch, user);
        self.invalidate(app_id, name);
        self.broadcaster.broadcast(app_id);
        result
    }

    /// Reverts branch cubes to the head revision they diverged from.
    pub fn rollback_cubes(&self, app_id: &AppId, names: &[String], user: &str) -> Result<()> {
        if names.is_empty() {
            return Err(RepoError::invalid("empty rollback batch"));
        }
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        self.guard_mutation(app_id, &refs, Action::Update, user)?;
        self.persister.rollback_cubes(app_id, names, user)?;
        // Rollback can touch any subset of the branch; mass invalidation is
        // the simple correct answer.
        self.cache.clear(app_id);
        self.broadcaster.broadcast(app_id);
        Ok(())
    }

    /// Resolves a conflict by keeping the branch content.
    pub fn merge_accept_mine(&self, app_id: &AppId, name: &str, user: &str) -> Result<CubeInfo> {
        self.guard_mutation(app_id, &[name], Action::Update, user)?;
        let info = self.persister.merge_accept_mine(app_id, name, user)?;
        self.finish_mutation(app_id, &[name]);
        Ok(info)
    }

    /// Resolves a conflict by overwriting the branch with the current head
    /// content.
    pub fn merge_accept_theirs(&self, app_id: &AppId, name: &str, user: &str) -> Result<CubeInfo> {
        self.guard_mutation(app_id, &[name], Action::Update, user)?;
        let head_id = app_id.as_head();
        let options = SearchOptions {
            exact_match_name: true,
            ..SearchOptions::default()
        };
        let head_sha1 = self
            .persister
            .search(&head_id, Some(name), None, &options)?
            .into_iter()
            .next()
            .map(|info| info.sha1)
            .ok_or_else(|| {
                RepoError::invalid(format!("cube '{name}' does not exist in HEAD"))
            })?;
        let info = self
            .persister
            .merge_accept_theirs(app_id, name, &head_sha1, user)?;
        self.finish_mutation(app_id, &[name]);
        Ok(info)
    }

    // ---------------------------------------------------------------------
    // Branch lifecycle
    // ---------------------------------------------------------------------

    /// Creates a branch as a copy of another (usually HEAD), synthesising
    /// the branch permission cube for its creator.
    pub fn copy_branch(&self, src: &AppId, dst: &AppId, user: &str) -> Result<usize> {
        Self::reject_release(dst)?;
        if src == dst {
            return Err(RepoError::invalid("copy source and target are the same branch"));
        }
        self.detect_new_app_id(src, user)?;
        self.locks().assert_not_lock_blocked(dst, user)?;

        let count = self.persister.copy_branch(src, dst)?;

        if !dst.is_head() && !dst.is_system_version() {
            let boot_branch = dst.boot_id().as_branch(dst.branch());
            let permissions = lifecycle::branch_permissions_cube(&boot_branch, user);
            self.persister
                .update_cube(&boot_branch, &permissions, user)?;
            self.cache.remove(&boot_branch, sys::BRANCH_PERMISSIONS);
            // Populate the rest of the branch's system view from HEAD.
            self.engine().update_branch(&boot_branch, user)?;
        }

        self.cache.clear(dst);
        self.broadcaster.broadcast(dst);
        Ok(count)
    }

    /// Physically removes a branch, its history, and its branch permission
    /// workspace.
    pub fn delete_branch(&self, app_id: &AppId, user: &str) -> Result<()> {
        if app_id.is_head() {
            return Err(RepoError::invalid("cannot delete HEAD"));
        }
        Self::reject_release(app_id)?;
        self.locks().assert_not_lock_blocked(app_id, user)?;

        self.persister.delete_branch(app_id)?;
        let boot_branch = app_id.boot_id().as_branch(app_id.branch());
        self.persister.delete_branch(&boot_branch)?;

        self.cache.clear(app_id);
        self.cache.clear(&boot_branch);
        self.broadcaster.broadcast(app_id);
        Ok(())
    }

    /// Moves every revision of a branch to another version. Requires the
    /// caller to hold the application lock.
    pub fn move_branch(&self, app_id: &AppId, new_version: &str, user: &str) -> Result<usize> {
        if app_id.is_system_version() || new_version == crate::appid::SYSTEM_VERSION {
            return Err(RepoError::SystemVersionReserved {
                operation: "move branch",
            });
        }
        Self::reject_release(app_id)?;
        self.locks().assert_locked_by_me(app_id, user)?;
        self.evaluator()
            .assert_allowed(app_id, "*", Action::Release, user)?;

        let count = self.persister.move_branch(app_id, new_version)?;
        self.cache.clear_branches(app_id);
        self.broadcaster.broadcast(app_id);
        Ok(count)
    }

    /// Freezes the HEAD of a version without the surrounding workflow.
    /// Requires the caller-held lock and release permission.
    pub fn release_version(&self, app_id: &AppId, new_snap_version: &str, user: &str) -> Result<usize> {
        self.validate_release(app_id, new_snap_version, user)?;
        self.locks().assert_locked_by_me(app_id, user)?;
        let count = self.persister.release_cubes(app_id, new_snap_version)?;
        self.cache.clear_branches(app_id);
        self.broadcaster.broadcast(app_id);
        Ok(count)
    }

    /// The full release workflow: verify the target version is unused, take
    /// the lock, let in-flight readers drain, move every branch to the new
    /// snapshot version, freeze HEAD, seed the new snapshot HEAD from the
    /// released set, then clear caches and unlock.
    pub fn release_cubes(&self, app_id: &AppId, new_snap_version: &str, user: &str) -> Result<usize> {
        self.validate_release(app_id, new_snap_version, user)?;
        self.locks().lock(app_id, user)?;
        let result = self.release_locked(app_id, new_snap_version, user);
        if let Err(err) = self.locks().unlock(app_id, user) {
            tracing::warn!(app_id = %app_id, %err, "failed to release lock after release");
        }
        result
    }

    fn release_locked(&self, app_id: &AppId, new_snap_version: &str, user: &str) -> Result<usize> {
        if !self.options.skip_quiesce {
            std::thread::sleep(self.options.release_quiesce);
        }

        for branch in self.persister.get_branches(app_id)? {
            if branch.eq_ignore_ascii_case(crate::appid::HEAD) {
                continue;
            }
            self.persister
                .move_branch(&app_id.as_branch(&branch), new_snap_version)?;
        }

        let count = self.persister.release_cubes(app_id, new_snap_version)?;

        // The released set seeds the HEAD of the next snapshot version.
        let released_head = app_id.as_release().as_head();
        let new_head = app_id.as_version(new_snap_version).as_snapshot().as_head();
        self.persister.copy_branch(&released_head, &new_head)?;

        self.cache.clear_branches(app_id);
        self.cache.clear_branches(&new_head);
        self.broadcaster.broadcast(app_id);
        self.broadcaster.broadcast(&new_head);
        tracing::info!(
            app_id = %app_id,
            new_snap_version,
            released = count,
            "version released"
        );
        Ok(count)
    }

    fn validate_release(&self, app_id: &AppId, new_snap_version: &str, user: &str) -> Result<()> {
        if app_id.is_system_version() || new_snap_version == crate::appid::SYSTEM_VERSION {
            return Err(RepoError::SystemVersionReserved {
                operation: "release",
            });
        }
        Self::reject_release(app_id)?;
        self.evaluator()
            .assert_allowed(app_id, "*", Action::Release, user)?;

        let versions = self
            .persister
            .get_versions(app_id.tenant(), app_id.app())?;
        for (status, list) in &versions {
            if list.iter().any(|v| v == new_snap_version) {
                return Err(RepoError::invalid(format!(
                    "target version {new_snap_version} already exists with status {status:?}"
                )));
            }
            if *status == crate::appid::Status::Release
                && list.iter().any(|v| v == app_id.version())
            {
                return Err(RepoError::invalid(format!(
                    "version {} is already released",
                    app_id.version()
                )));
            }
        }
        Ok(())
    }
}

/// Maps a persister miss to the input-error contract of notes/test-data
/// accessors.
fn soft_not_found(err: PersisterError) -> RepoError {
    match err {
        PersisterError::CubeNotFound { app_id, name } => {
            RepoError::invalid(format!("cube '{name}' does not exist in {app_id}"))
        }
        other => other.into(),
    }
}
