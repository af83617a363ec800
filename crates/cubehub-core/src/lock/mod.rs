//! Durable advisory application lock.
//!
//! The lock is the single cell of the `sys.lock` cube at the boot id: the
//! owner's user id, or empty. Because the cube is persister-backed this is a
//! coarse cross-process lock for a whole cluster, not an in-memory mutex.
//! Every mutating repository operation consults
//! [`LockCoordinator::assert_not_lock_blocked`]; version moves and releases
//! additionally require [`LockCoordinator::assert_locked_by_me`].

#[cfg(test)]
mod tests;

use serde_json::{json, Value};

use crate::appid::AppId;
use crate::cache::CacheRegistry;
use crate::cube::{Coord, CubeSource, DEFAULT_COLUMN};
use crate::error::{RepoError, Result};
use crate::lifecycle;
use crate::persister::Persister;
use crate::sys;

/// The single axis of the `sys.lock` cube.
pub(crate) const AXIS_SYSTEM: &str = "system";

/// Coordinates the application-wide advisory lock.
pub struct LockCoordinator<'a> {
    cubes: &'a dyn CubeSource,
    persister: &'a dyn Persister,
    cache: &'a CacheRegistry,
}

impl<'a> LockCoordinator<'a> {
    /// Builds a coordinator over the repository's components.
    #[must_use]
    pub fn new(
        cubes: &'a dyn CubeSource,
        persister: &'a dyn Persister,
        cache: &'a CacheRegistry,
    ) -> Self {
        Self {
            cubes,
            persister,
            cache,
        }
    }

    fn coord() -> Coord {
        Coord::from([(AXIS_SYSTEM.to_string(), DEFAULT_COLUMN.to_string())])
    }

    /// The current lock owner, or `None` when unowned.
    pub fn owner(&self, app_id: &AppId) -> Result<Option<String>> {
        let boot = app_id.boot_id();
        let Some(cube) = self.cubes.cube(&boot, sys::LOCK)? else {
            return Ok(None);
        };
        Ok(match cube.cell(&Self::coord()) {
            Some(Value::String(owner)) if !owner.is_empty() => Some(owner),
            _ => None,
        })
    }

    /// Acquires the lock for `user`. Re-acquiring an owned lock is a no-op.
    ///
    /// # Errors
    ///
    /// [`RepoError::LockBlocked`] when another user holds it.
    pub fn lock(&self, app_id: &AppId, user: &str) -> Result<()> {
        match self.owner(app_id)? {
            Some(owner) if owner == user => return Ok(()),
            Some(owner) => return Err(RepoError::LockBlocked { owner }),
            None => {}
        }
        let boot = app_id.boot_id();
        let cube = match self.cubes.cube(&boot, sys::LOCK)? {
            Some(cube) => cube,
            None => lifecycle::lock_cube(&boot),
        };
        cube.set_cell(json!(user), &Self::coord())?;
        self.persister.update_cube(&boot, &cube, user)?;
        self.cache.remove(&boot, sys::LOCK);
        tracing::info!(app_id = %app_id, user, "application lock acquired");
        Ok(())
    }

    /// Releases the lock held by `user`.
    ///
    /// # Errors
    ///
    /// [`RepoError::LockNotHeld`] unless `user` owns the lock.
    pub fn unlock(&self, app_id: &AppId, user: &str) -> Result<()> {
        let owner = self.owner(app_id)?;
        if owner.as_deref() != Some(user) {
            return Err(RepoError::LockNotHeld {
                user: user.to_string(),
                owner,
            });
        }
        let boot = app_id.boot_id();
        let cube = self
            .cubes
            .cube(&boot, sys::LOCK)?
            .ok_or_else(|| RepoError::state("sys.lock disappeared while held"))?;
        cube.remove_cell(&Self::coord())?;
        self.persister.update_cube(&boot, &cube, user)?;
        self.cache.remove(&boot, sys::LOCK);
        tracing::info!(app_id = %app_id, user, "application lock released");
        Ok(())
    }

    /// Succeeds iff the lock is unowned or owned by `user`.
    pub fn assert_not_lock_blocked(&self, app_id: &AppId, user: &str) -> Result<()> {
        match self.owner(app_id)? {
            Some(owner) if owner != user => Err(RepoError::LockBlocked { owner }),
            _ => Ok(()),
        }
    }

    /// Succeeds iff `user` owns the lock. Required before moves and
    /// releases.
    pub fn assert_locked_by_me(&self, app_id: &AppId, user: &str) -> Result<()> {
        let owner = self.owner(app_id)?;
        if owner.as_deref() == Some(user) {
            Ok(())
        } else {
            Err(RepoError::LockNotHeld {
                user: user.to_string(),
                owner,
            })
        }
    }
}
