//! Coherent per-workspace cube cache.
//!
//! Each workspace maps lowercase cube names to a [`CacheEntry`]: either a
//! hydrated cube or the [`CacheEntry::NotFound`] sentinel. The sentinel is a
//! distinct value, never a null: a reader must be able to tell "queried and
//! missing" from "never queried", otherwise repeated misses hammer the
//! persister.
//!
//! Invalidation granularity is enforced by callers: a mutation naming
//! `sys.classpath` clears the whole workspace, everything else evicts one
//! entry. Releasing a version clears every branch under it.


use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::appid::AppId;
use crate::classpath::ResourceLoader;
use crate::cube::{cache_retained, Cube};

/// One cache slot: a hydrated cube or the cached-miss sentinel.
#[derive(Clone)]
pub enum CacheEntry {
    /// A hydrated cube.
    Cube(Arc<dyn Cube>),
    /// The name was queried and does not exist.
    NotFound,
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cube(cube) => f.debug_tuple("Cube").field(&cube.name()).finish(),
            Self::NotFound => f.write_str("NotFound"),
        }
    }
}

/// Thread-safe cube cache with per-workspace scoping.
#[derive(Default)]
pub struct CacheRegistry {
    cubes: RwLock<HashMap<AppId, HashMap<String, CacheEntry>>>,
    loaders: RwLock<HashMap<AppId, HashMap<String, Arc<dyn ResourceLoader>>>>,
}

fn key(name: &str) -> String {
    name.to_lowercase()
}

impl CacheRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up an entry; `None` means the name was never queried.
    #[must_use]
    pub fn get(&self, app_id: &AppId, name: &str) -> Option<CacheEntry> {
        self.cubes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(app_id)
            .and_then(|entries| entries.get(&key(name)))
            .cloned()
    }

    /// Stores a hydrated cube, unless its `cache` meta-property opts out.
    pub fn put(&self, app_id: &AppId, cube: &Arc<dyn Cube>) {
        if !cache_retained(cube.as_ref()) {
            return;
        }
        self.cubes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(app_id.clone())
            .or_default()
            .insert(key(cube.name()), CacheEntry::Cube(Arc::clone(cube)));
    }

    /// Records a cached miss so repeated lookups skip the persister.
    pub fn put_not_found(&self, app_id: &AppId, name: &str) {
        self.cubes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(app_id.clone())
            .or_default()
            .insert(key(name), CacheEntry::NotFound);
    }

    /// Evicts one entry (case-insensitive).
    pub fn remove(&self, app_id: &AppId, name: &str) {
        if let Some(entries) = self
            .cubes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(app_id)
        {
            entries.remove(&key(name));
        }
    }

    /// Evicts every entry of a workspace and releases its resource loaders.
    pub fn clear(&self, app_id: &AppId) {
        self.cubes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(app_id);
        let dropped = self
            .loaders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(app_id);
        if dropped.is_some() {
            tracing::debug!(app_id = %app_id, "released resource loaders");
        }
    }

    /// Evicts every workspace sharing the branch-agnostic key. Used when a
    /// version is released or moved, which invalidates all of its branches.
    pub fn clear_branches(&self, app_id: &AppId) {
        let anchor = app_id.branch_agnostic_cache_key();
        let victims: Vec<AppId> = {
            let cubes = self.cubes.read().unwrap_or_else(PoisonError::into_inner);
            let loaders = self.loaders.read().unwrap_or_else(PoisonError::into_inner);
            cubes
                .keys()
                .chain(loaders.keys())
                .filter(|candidate| candidate.branch_agnostic_cache_key() == anchor)
                .cloned()
                .collect()
        };
        for victim in victims {
            self.clear(&victim);
        }
    }

    /// Drops everything. Test-only.
    pub fn clear_all(&self) {
        self.cubes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.loaders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Whether an actual cube (not a miss sentinel) is resident.
    #[must_use]
    pub fn is_cached(&self, app_id: &AppId, name: &str) -> bool {
        matches!(self.get(app_id, name), Some(CacheEntry::Cube(_)))
    }

    /// Names currently resident for a workspace (sentinels included).
    #[must_use]
    pub fn cached_names(&self, app_id: &AppId) -> Vec<String> {
        self.cubes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(app_id)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Caches a resource loader under a coordinate key.
    pub fn put_loader(&self, app_id: &AppId, coord_key: &str, loader: Arc<dyn ResourceLoader>) {
        self.loaders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(app_id.clone())
            .or_default()
            .insert(coord_key.to_string(), loader);
    }

    /// Looks up a cached resource loader.
    #[must_use]
    pub fn loader(&self, app_id: &AppId, coord_key: &str) -> Option<Arc<dyn ResourceLoader>> {
        self.loaders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(app_id)
            .and_then(|entries| entries.get(coord_key))
            .cloned()
    }

    /// Whether any loader is resident for the workspace.
    #[must_use]
    pub fn has_loaders(&self, app_id: &AppId) -> bool {
        self.loaders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(app_id)
            .is_some_and(|entries| !entries.is_empty())
    }
}
