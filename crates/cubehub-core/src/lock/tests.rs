//! Tests for the advisory lock over `sys.lock`.

use std::sync::Arc;

use super::*;
use crate::appid::Status;
use crate::cube::Cube;
use crate::persister::MemoryPersister;

/// Cache-less cube source reading straight from the persister.
struct DirectSource<'a>(&'a MemoryPersister);

impl CubeSource for DirectSource<'_> {
    fn cube(&self, app_id: &AppId, name: &str) -> Result<Option<Arc<dyn Cube>>> {
        Ok(self.0.load_cube(app_id, name)?)
    }
}

fn app_id() -> AppId {
    AppId::new("acme", "risk", "1.0.0", Status::Snapshot, "dev").unwrap()
}

fn harness() -> (MemoryPersister, CacheRegistry) {
    (MemoryPersister::new(), CacheRegistry::new())
}

#[test]
fn lock_acquires_and_is_reentrant() {
    let (persister, cache) = harness();
    let source = DirectSource(&persister);
    let lock = LockCoordinator::new(&source, &persister, &cache);

    assert_eq!(lock.owner(&app_id()).unwrap(), None);
    lock.lock(&app_id(), "u1").unwrap();
    assert_eq!(lock.owner(&app_id()).unwrap(), Some("u1".to_string()));

    // Re-acquiring an owned lock is a no-op.
    lock.lock(&app_id(), "u1").unwrap();
    assert_eq!(lock.owner(&app_id()).unwrap(), Some("u1".to_string()));
}

#[test]
fn contended_lock_is_rejected_and_state_unchanged() {
    let (persister, cache) = harness();
    let source = DirectSource(&persister);
    let lock = LockCoordinator::new(&source, &persister, &cache);

    lock.lock(&app_id(), "u1").unwrap();
    let err = lock.lock(&app_id(), "u2").unwrap_err();
    assert!(matches!(err, RepoError::LockBlocked { ref owner } if owner == "u1"));
    assert_eq!(lock.owner(&app_id()).unwrap(), Some("u1".to_string()));
}

#[test]
fn unlock_requires_ownership() {
    let (persister, cache) = harness();
    let source = DirectSource(&persister);
    let lock = LockCoordinator::new(&source, &persister, &cache);

    assert!(matches!(
        lock.unlock(&app_id(), "u1"),
        Err(RepoError::LockNotHeld { .. })
    ));

    lock.lock(&app_id(), "u1").unwrap();
    assert!(matches!(
        lock.unlock(&app_id(), "u2"),
        Err(RepoError::LockNotHeld { .. })
    ));

    lock.unlock(&app_id(), "u1").unwrap();
    assert_eq!(lock.owner(&app_id()).unwrap(), None);
}

#[test]
fn lock_blocked_assertion_lets_owner_through() {
    let (persister, cache) = harness();
    let source = DirectSource(&persister);
    let lock = LockCoordinator::new(&source, &persister, &cache);

    lock.assert_not_lock_blocked(&app_id(), "anyone").unwrap();
    lock.lock(&app_id(), "u1").unwrap();
    lock.assert_not_lock_blocked(&app_id(), "u1").unwrap();
    assert!(lock.assert_not_lock_blocked(&app_id(), "u2").is_err());
}

#[test]
fn locked_by_me_assertion_requires_ownership() {
    let (persister, cache) = harness();
    let source = DirectSource(&persister);
    let lock = LockCoordinator::new(&source, &persister, &cache);

    assert!(lock.assert_locked_by_me(&app_id(), "u1").is_err());
    lock.lock(&app_id(), "u1").unwrap();
    lock.assert_locked_by_me(&app_id(), "u1").unwrap();
    assert!(lock.assert_locked_by_me(&app_id(), "u2").is_err());
}

#[test]
fn lock_state_lives_at_the_boot_id_across_branches() {
    let (persister, cache) = harness();
    let source = DirectSource(&persister);
    let lock = LockCoordinator::new(&source, &persister, &cache);

    lock.lock(&app_id(), "u1").unwrap();
    // The same lock is visible from any branch or version of the app.
    let elsewhere = app_id().as_branch("other").as_version("9.0.0");
    assert_eq!(lock.owner(&elsewhere).unwrap(), Some("u1".to_string()));
}
