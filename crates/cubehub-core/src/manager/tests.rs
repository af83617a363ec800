//! End-to-end scenarios against the in-memory persister.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::*;
use crate::appid::Status;
use crate::cube::{AxisView, ChangeType, TableCube};
use crate::delta::CellDeltaProcessor;
use crate::permissions::{AXIS_ROLE, AXIS_USER};
use crate::persister::MemoryPersister;

const ALICE: &str = "alice"; // first mutator, becomes admin via bootstrap
const BOB: &str = "bob"; // plain user role

fn repo() -> CubeRepository {
    CubeRepository::new(
        Arc::new(MemoryPersister::new()),
        Arc::new(CellDeltaProcessor::new()),
    )
    .with_options(RepoOptions {
        release_quiesce: Duration::from_secs(10),
        skip_quiesce: true,
    })
}

fn head() -> AppId {
    AppId::new("acme", "risk", "1.0.0", Status::Snapshot, "HEAD").unwrap()
}

fn branch(name: &str) -> AppId {
    head().as_branch(name)
}

fn coord(row: &str, col: &str) -> Coord {
    Coord::from([("row".to_string(), row.to_string()), ("col".to_string(), col.to_string())])
}

fn grid(name: &str, app_id: &AppId) -> Arc<dyn Cube> {
    Arc::new(
        TableCube::new(name, app_id.clone())
            .with_axis(AxisView::new("row", vec!["1".into(), "2".into()], false))
            .with_axis(AxisView::new("col", vec!["1".into(), "2".into()], false)),
    )
}

fn set(repo: &CubeRepository, app_id: &AppId, name: &str, row: &str, col: &str, v: i64) {
    let cube = repo
        .get_cube(app_id, name, ALICE)
        .unwrap()
        .map_or_else(|| grid(name, app_id), |cube| cube.duplicate(name));
    cube.set_cell(json!(v), &coord(row, col)).unwrap();
    repo.update_cube(app_id, &cube, ALICE).unwrap();
}

// =========================================================================
// Scenario: create, commit, update another branch
// =========================================================================

#[test]
fn create_commit_update_flows_through_branches() {
    let repo = repo();
    set(&repo, &branch("b1"), "x", "1", "1", 10);

    let committed = repo.commit_branch(&branch("b1"), ALICE).unwrap();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].change_type, Some(ChangeType::Created));

    let pulled = repo.update_branch(&branch("b2"), ALICE).unwrap();
    assert_eq!(pulled.len(), 1);

    let cube = repo.get_cube(&branch("b2"), "x", ALICE).unwrap().unwrap();
    assert_eq!(cube.cell(&coord("1", "1")), Some(json!(10)));
    assert!(repo.get_branch_changes(&branch("b2")).unwrap().is_empty());
}

// =========================================================================
// Scenario: compatible three-way merge
// =========================================================================

#[test]
fn compatible_three_way_merge_commits() {
    let repo = repo();
    set(&repo, &head(), "x", "1", "1", 10);
    repo.copy_branch(&head(), &branch("b"), ALICE).unwrap();

    set(&repo, &branch("b"), "x", "1", "2", 20);
    set(&repo, &head(), "x", "2", "1", 30);

    let committed = repo.commit_branch(&branch("b"), ALICE).unwrap();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].change_type, Some(ChangeType::Updated));

    let merged = repo.get_cube(&head(), "x", ALICE).unwrap().unwrap();
    assert_eq!(merged.cell(&coord("1", "1")), Some(json!(10)));
    assert_eq!(merged.cell(&coord("1", "2")), Some(json!(20)));
    assert_eq!(merged.cell(&coord("2", "1")), Some(json!(30)));
}

// =========================================================================
// Scenario: conflict
// =========================================================================

#[test]
fn conflicting_commit_raises_with_diff() {
    let repo = repo();
    set(&repo, &head(), "x", "1", "1", 10);
    repo.copy_branch(&head(), &branch("b"), ALICE).unwrap();

    set(&repo, &branch("b"), "x", "1", "1", 11);
    set(&repo, &head(), "x", "1", "1", 12);

    let err = repo.commit_branch(&branch("b"), ALICE).unwrap_err();
    let RepoError::Merge(merge) = err else {
        panic!("expected merge error, got {err}");
    };
    assert!(!merge.errors["x"].diff.is_empty());
}

#[test]
fn conflicts_resolve_with_accept_mine_or_theirs() {
    let repo = repo();
    set(&repo, &head(), "x", "1", "1", 10);
    repo.copy_branch(&head(), &branch("b"), ALICE).unwrap();
    set(&repo, &branch("b"), "x", "1", "1", 11);
    set(&repo, &head(), "x", "1", "1", 12);
    assert!(repo.commit_branch(&branch("b"), ALICE).is_err());

    // Theirs: branch adopts head content and is no longer changed.
    repo.merge_accept_theirs(&branch("b"), "x", ALICE).unwrap();
    let cube = repo.get_cube(&branch("b"), "x", ALICE).unwrap().unwrap();
    assert_eq!(cube.cell(&coord("1", "1")), Some(json!(12)));
    assert!(repo.get_branch_changes(&branch("b")).unwrap().is_empty());

    // Mine: a fresh conflict resolves toward the branch and then commits.
    set(&repo, &branch("b"), "x", "1", "1", 13);
    set(&repo, &head(), "x", "1", "1", 14);
    assert!(repo.commit_branch(&branch("b"), ALICE).is_err());
    repo.merge_accept_mine(&branch("b"), "x", ALICE).unwrap();
    repo.commit_branch(&branch("b"), ALICE).unwrap();
    let cube = repo.get_cube(&head(), "x", ALICE).unwrap().unwrap();
    assert_eq!(cube.cell(&coord("1", "1")), Some(json!(13)));
}

// =========================================================================
// Scenario: release
// =========================================================================

#[test]
fn release_freezes_and_seeds_the_next_snapshot() {
    let repo = repo();
    set(&repo, &branch("b"), "x", "1", "1", 1);
    set(&repo, &branch("b"), "y", "1", "1", 2);
    repo.commit_branch(&branch("b"), ALICE).unwrap();

    // Prime a cache entry to prove branch-wide invalidation.
    assert!(repo.get_cube(&branch("b"), "x", ALICE).unwrap().is_some());
    assert!(repo.is_cached(&branch("b"), "x"));

    let released = repo.release_cubes(&head(), "1.0.1", ALICE).unwrap();
    assert_eq!(released, 2);

    // The old version is frozen under RELEASE status.
    let frozen = repo
        .get_cube(&head().as_release(), "x", ALICE)
        .unwrap()
        .unwrap();
    assert_eq!(frozen.cell(&coord("1", "1")), Some(json!(1)));

    // The new snapshot HEAD carries the released set.
    let new_head = head().as_version("1.0.1");
    let names: BTreeSet<String> = repo
        .search(&new_head, None, None, &SearchOptions::active_only(), ALICE)
        .unwrap()
        .into_iter()
        .map(|info| info.name)
        .collect();
    assert_eq!(names, BTreeSet::from(["x".to_string(), "y".to_string()]));

    // Branches moved to the new version; caches for the old one are gone.
    let moved = repo.get_branches(&new_head).unwrap();
    assert!(moved.contains("b"));
    assert!(!repo.is_cached(&branch("b"), "x"));

    // The lock is released again.
    assert_eq!(repo.app_lock_owner(&head()).unwrap(), None);

    // Mutating the frozen version is rejected.
    let err = repo
        .update_cube(&head().as_release(), &grid("z", &head().as_release()), ALICE)
        .unwrap_err();
    assert!(matches!(err, RepoError::ReleaseImmutable { .. }));
}

#[test]
fn release_version_requires_a_held_lock() {
    let repo = repo();
    set(&repo, &head(), "x", "1", "1", 1);

    assert!(matches!(
        repo.release_version(&head(), "1.0.1", ALICE),
        Err(RepoError::LockNotHeld { .. })
    ));

    repo.lock_app(&head(), ALICE).unwrap();
    let count = repo.release_version(&head(), "1.0.1", ALICE).unwrap();
    assert_eq!(count, 1);
    assert!(repo
        .get_cube(&head().as_release(), "x", ALICE)
        .unwrap()
        .is_some());
}

#[test]
fn release_rejects_reserved_and_existing_versions() {
    let repo = repo();
    set(&repo, &head(), "x", "1", "1", 1);

    assert!(matches!(
        repo.release_cubes(&head().as_version("0.0.0"), "1.0.1", ALICE),
        Err(RepoError::SystemVersionReserved { .. })
    ));
    assert!(matches!(
        repo.release_cubes(&head(), "0.0.0", ALICE),
        Err(RepoError::SystemVersionReserved { .. })
    ));
    // 1.0.0 already exists as a snapshot.
    assert!(repo.release_cubes(&head(), "1.0.0", ALICE).is_err());
}

// =========================================================================
// Scenario: permission denial
// =========================================================================

#[test]
fn readonly_user_cannot_mutate_and_persister_stays_untouched() {
    let repo = repo();
    set(&repo, &branch("b"), "seed", "1", "1", 1); // bootstrap with alice as admin

    // Alice reshapes sys.usergroups: carol is readonly only.
    let boot = head().boot_id();
    let usergroups: Arc<dyn Cube> = Arc::new({
        let cube = TableCube::new(sys::USERGROUPS, boot.clone())
            .with_axis(AxisView::new(
                AXIS_USER,
                vec![ALICE.to_string(), "carol".to_string()],
                true,
            ))
            .with_axis(AxisView::new(
                AXIS_ROLE,
                vec!["admin".into(), "user".into(), "readonly".into()],
                false,
            ));
        for (user, role) in [(ALICE, "admin"), (ALICE, "user"), ("carol", "readonly")] {
            cube.set_cell(
                json!(true),
                &Coord::from([
                    (AXIS_USER.to_string(), user.to_string()),
                    (AXIS_ROLE.to_string(), role.to_string()),
                ]),
            )
            .unwrap();
        }
        cube
    });
    repo.update_cube(&boot, &usergroups, ALICE).unwrap();

    let err = repo
        .update_cube(&branch("b"), &grid("newcube", &branch("b")), "carol")
        .unwrap_err();
    assert!(matches!(err, RepoError::PermissionDenied { .. }));

    // The failed mutation left nothing behind.
    assert!(repo.get_cube(&branch("b"), "newcube", ALICE).unwrap().is_none());
    // Reading still works for carol.
    assert!(repo.get_cube(&branch("b"), "seed", "carol").unwrap().is_some());
}

// =========================================================================
// Scenario: lock contention
// =========================================================================

#[test]
fn lock_contention_blocks_mutation_and_preserves_owner() {
    let repo = repo();
    set(&repo, &branch("b"), "x", "1", "1", 1);

    repo.lock_app(&head(), ALICE).unwrap();
    let err = repo
        .update_cube(&branch("b"), &grid("y", &branch("b")), BOB)
        .unwrap_err();
    assert!(matches!(err, RepoError::LockBlocked { ref owner } if owner == ALICE));
    assert_eq!(repo.app_lock_owner(&head()).unwrap(), Some(ALICE.to_string()));

    // The owner keeps working, and unlock reopens the app.
    set(&repo, &branch("b"), "x", "1", "2", 2);
    repo.unlock_app(&head(), ALICE).unwrap();
    repo.update_cube(&branch("b"), &grid("y", &branch("b")), BOB)
        .unwrap();
}

// =========================================================================
// Cache behaviour
// =========================================================================

#[test]
fn mutations_broadcast_to_peers() {
    let recorder = Arc::new(crate::broadcast::testing::RecordingBroadcaster::default());
    let repo = CubeRepository::new(
        Arc::new(MemoryPersister::new()),
        Arc::new(CellDeltaProcessor::new()),
    )
    .with_broadcaster(Arc::clone(&recorder) as Arc<dyn crate::broadcast::Broadcaster>)
    .with_options(RepoOptions {
        release_quiesce: Duration::from_secs(10),
        skip_quiesce: true,
    });

    set(&repo, &branch("b"), "x", "1", "1", 1);
    assert!(recorder.seen().contains(&branch("b")));

    // Commits notify both sides.
    repo.commit_branch(&branch("b"), ALICE).unwrap();
    assert!(recorder.seen().contains(&head()));
}

#[test]
fn missing_cubes_are_cached_as_a_sentinel_until_invalidated() {
    let repo = repo();
    set(&repo, &branch("b"), "seed", "1", "1", 1);

    assert!(repo.get_cube(&branch("b"), "ghost", ALICE).unwrap().is_none());
    // Second lookup is served from the sentinel; still a miss.
    assert!(repo.get_cube(&branch("b"), "ghost", ALICE).unwrap().is_none());

    // Creating the cube clears the sentinel.
    set(&repo, &branch("b"), "ghost", "1", "1", 7);
    assert!(repo.get_cube(&branch("b"), "ghost", ALICE).unwrap().is_some());
}

#[test]
fn uncached_meta_property_keeps_the_lock_cube_out_of_the_cache() {
    let repo = repo();
    set(&repo, &branch("b"), "seed", "1", "1", 1);
    let boot = head().boot_id();

    assert!(repo.get_cube(&boot, sys::LOCK, BOB).unwrap().is_some());
    assert!(!repo.is_cached(&boot, sys::LOCK));
}

#[test]
fn classpath_mutations_invalidate_the_whole_workspace() {
    let repo = repo();
    let b = branch("b");
    set(&repo, &b, "x", "1", "1", 1);
    assert!(repo.get_cube(&b, "x", ALICE).unwrap().is_some());
    assert!(repo.is_cached(&b, "x"));

    let classpath: Arc<dyn Cube> = Arc::new(
        TableCube::new(sys::CLASSPATH, b.clone())
            .with_axis(AxisView::new("env", Vec::new(), true)),
    );
    repo.update_cube(&b, &classpath, ALICE).unwrap();
    assert!(!repo.is_cached(&b, "x"));
}

#[test]
fn clear_cache_empties_a_workspace() {
    let repo = repo();
    let b = branch("b");
    set(&repo, &b, "x", "1", "1", 1);
    assert!(repo.get_cube(&b, "x", ALICE).unwrap().is_some());

    repo.clear_cache(&b);
    assert!(!repo.is_cached(&b, "x"));
}

// =========================================================================
// Bootstrap
// =========================================================================

#[test]
fn detect_new_app_id_is_a_no_op_once_records_exist() {
    let repo = repo();
    assert!(repo.detect_new_app_id(&head(), ALICE).unwrap());
    assert!(!repo.detect_new_app_id(&head(), ALICE).unwrap());

    let boot = head().boot_id();
    assert!(repo.get_cube(&boot, sys::PERMISSIONS, ALICE).unwrap().is_some());
    assert!(repo.get_cube(&boot, sys::USERGROUPS, ALICE).unwrap().is_some());
    assert!(repo.get_cube(&boot, sys::LOCK, ALICE).unwrap().is_some());
}

#[test]
fn bootstrap_cube_resolves_runtime_app_ids() {
    let repo = repo();
    let boot = head().boot_id();
    set(&repo, &head(), "seed", "1", "1", 1);

    let bootstrap: Arc<dyn Cube> = Arc::new({
        let cube = TableCube::new(sys::BOOTSTRAP, boot.clone())
            .with_axis(AxisView::new("env", vec!["SIT".into()], true));
        cube.set_cell(
            json!({
                "tenant": "acme",
                "app": "risk",
                "version": "1.0.0",
                "status": "SNAPSHOT",
                "branch": "HEAD",
            }),
            &Coord::from([("env".to_string(), "SIT".to_string())]),
        )
        .unwrap();
        cube
    });
    repo.update_cube(&boot, &bootstrap, ALICE).unwrap();

    let coords = Coord::from([("env".to_string(), "SIT".to_string())]);
    let resolved = repo.resolve_app_id("acme", "risk", &coords).unwrap();
    assert_eq!(resolved, head());

    // Apps without a bootstrap cube are a configuration error.
    let err = repo.resolve_app_id("acme", "other", &coords).unwrap_err();
    assert!(matches!(err, RepoError::State { .. }));
}

#[test]
fn copy_branch_synthesises_branch_permissions_for_the_creator() {
    let repo = repo();
    set(&repo, &head(), "x", "1", "1", 1);
    repo.copy_branch(&head(), &branch("bobs"), BOB).unwrap();

    // Bob created the branch and may mutate it.
    set_as(&repo, &branch("bobs"), "x", 5, BOB);
    // Dave has the user role but no entry in bob's branch.
    let err = repo
        .update_cube(&branch("bobs"), &grid("z", &branch("bobs")), "dave")
        .unwrap_err();
    assert!(matches!(err, RepoError::PermissionDenied { .. }));
}

fn set_as(repo: &CubeRepository, app_id: &AppId, name: &str, v: i64, user: &str) {
    let cube = repo
        .get_cube(app_id, name, user)
        .unwrap()
        .map_or_else(|| grid(name, app_id), |cube| cube.duplicate(name));
    cube.set_cell(json!(v), &coord("1", "1")).unwrap();
    repo.update_cube(app_id, &cube, user).unwrap();
}

// =========================================================================
// Advices, references, revisions
// =========================================================================

#[test]
fn advices_attach_on_hydration() {
    let repo = repo();
    let b = branch("b");
    set(&repo, &b, "rates", "1", "1", 1);
    repo.add_advice(&b, Advice::new("audit", "rates.*"));

    let cube = repo.get_cube(&b, "rates", ALICE).unwrap().unwrap();
    let attached = cube.advices();
    assert_eq!(attached.len(), 1);
    assert_eq!(attached[0].0.name, "audit");
}

#[test]
fn reference_traversal_terminates_on_cycles() {
    let repo = repo();
    let b = branch("b");

    let a_cube = TableCube::new("a", b.clone());
    a_cube.add_reference("b");
    let b_cube = TableCube::new("b", b.clone());
    b_cube.add_reference("a");
    b_cube.add_reference("c");
    repo.update_cube(&b, &(Arc::new(a_cube) as Arc<dyn Cube>), ALICE).unwrap();
    repo.update_cube(&b, &(Arc::new(b_cube) as Arc<dyn Cube>), ALICE).unwrap();

    let refs = repo.referenced_cube_names(&b, "a").unwrap();
    assert_eq!(refs, BTreeSet::from(["a".to_string(), "b".to_string(), "c".to_string()]));
}

#[test]
fn idempotent_updates_produce_no_extra_revisions() {
    let repo = repo();
    let b = branch("b");
    let cube = grid("x", &b);
    cube.set_cell(json!(1), &coord("1", "1")).unwrap();
    repo.update_cube(&b, &cube, ALICE).unwrap();
    repo.update_cube(&b, &cube, ALICE).unwrap();

    assert_eq!(repo.get_revisions(&b, "x", ALICE).unwrap().len(), 1);
}

#[test]
fn fresh_get_cube_reflects_the_persisted_fingerprint() {
    let repo = repo();
    let b = branch("b");
    set(&repo, &b, "x", "1", "1", 1);
    set(&repo, &b, "x", "1", "2", 2);

    let info = repo
        .search(&b, Some("x"), None, &SearchOptions::active_only(), ALICE)
        .unwrap()
        .remove(0);
    let cube = repo.get_cube(&b, "x", ALICE).unwrap().unwrap();
    assert_eq!(cube.sha1(), info.sha1);
}

// =========================================================================
// Rename, duplicate, delete, restore, rollback
// =========================================================================

#[test]
fn rename_and_duplicate_validate_their_inputs() {
    let repo = repo();
    let b = branch("b");
    set(&repo, &b, "x", "1", "1", 1);

    assert!(repo.rename_cube(&b, "x", "X", ALICE).is_err());
    assert!(repo.duplicate_cube(&b, &b, "x", "x", ALICE).is_err());
    assert!(repo.rename_cube(&b, "", "y", ALICE).is_err());
    assert!(repo.delete_cubes(&b, &[], ALICE).is_err());

    repo.rename_cube(&b, "x", "y", ALICE).unwrap();
    assert!(repo.get_cube(&b, "x", ALICE).unwrap().is_none());
    assert!(repo.get_cube(&b, "y", ALICE).unwrap().is_some());

    repo.duplicate_cube(&b, &branch("b2"), "y", "z", ALICE).unwrap();
    let copy = repo.get_cube(&branch("b2"), "z", ALICE).unwrap().unwrap();
    assert_eq!(copy.cell(&coord("1", "1")), Some(json!(1)));
}

#[test]
fn delete_restore_round_trip_reapplies_advices() {
    let repo = repo();
    let b = branch("b");
    set(&repo, &b, "rates", "1", "1", 1);
    repo.add_advice(&b, Advice::new("audit", "rates.*"));

    repo.delete_cubes(&b, &["rates".to_string()], ALICE).unwrap();
    assert!(repo.get_cube(&b, "rates", ALICE).unwrap().is_none());
    assert!(repo.restore_cubes(&head(), &["rates".to_string()], ALICE).is_err());

    repo.restore_cubes(&b, &["rates".to_string()], ALICE).unwrap();
    let cube = repo.get_cube(&b, "rates", ALICE).unwrap().unwrap();
    assert_eq!(cube.cell(&coord("1", "1")), Some(json!(1)));
    assert_eq!(cube.advices().len(), 1);
}

#[test]
fn rollback_returns_the_branch_to_its_sync_point() {
    let repo = repo();
    let b = branch("b");
    set(&repo, &b, "x", "1", "1", 1);
    repo.commit_branch(&b, ALICE).unwrap();
    set(&repo, &b, "x", "2", "2", 9);

    repo.rollback_cubes(&b, &["x".to_string()], ALICE).unwrap();
    let cube = repo.get_cube(&b, "x", ALICE).unwrap().unwrap();
    assert_eq!(cube.cell(&coord("2", "2")), None);
    assert!(repo.get_branch_changes(&b).unwrap().is_empty());
}

// =========================================================================
// Search filtering, notes, test data
// =========================================================================

#[test]
fn search_filters_unreadable_cubes_with_one_snapshot() {
    let repo = repo();
    let b = branch("b");
    set(&repo, &b, "rates", "1", "1", 1);
    set(&repo, &b, "secret.plans", "1", "1", 2);

    // Alice restricts reads on secret.* to admins.
    let boot = head().boot_id();
    let permissions: Arc<dyn Cube> = Arc::new({
        let cube = TableCube::new(sys::PERMISSIONS, boot.clone())
            .with_axis(AxisView::new("resource", vec!["secret.*".into()], true))
            .with_axis(AxisView::new(
                "role",
                vec!["admin".into(), "user".into()],
                false,
            ))
            .with_axis(AxisView::new(
                "action",
                vec!["read".into(), "update".into(), "commit".into(), "release".into()],
                false,
            ));
        for action in ["read", "update", "commit", "release"] {
            for resource in [crate::cube::DEFAULT_COLUMN, "secret.*"] {
                cube.set_cell(
                    json!(true),
                    &Coord::from([
                        ("resource".to_string(), resource.to_string()),
                        ("role".to_string(), "admin".to_string()),
                        ("action".to_string(), action.to_string()),
                    ]),
                )
                .unwrap();
            }
        }
        for action in ["read", "update", "commit"] {
            cube.set_cell(
                json!(true),
                &Coord::from([
                    ("resource".to_string(), crate::cube::DEFAULT_COLUMN.to_string()),
                    ("role".to_string(), "user".to_string()),
                    ("action".to_string(), action.to_string()),
                ]),
            )
            .unwrap();
        }
        cube
    });
    repo.update_cube(&boot, &permissions, ALICE).unwrap();

    let mine: Vec<String> = repo
        .search(&b, None, None, &SearchOptions::active_only(), BOB)
        .unwrap()
        .into_iter()
        .map(|info| info.name)
        .collect();
    assert!(mine.contains(&"rates".to_string()));
    assert!(!mine.iter().any(|n| n.starts_with("secret")));

    let all: Vec<String> = repo
        .search(&b, None, None, &SearchOptions::active_only(), ALICE)
        .unwrap()
        .into_iter()
        .map(|info| info.name)
        .collect();
    assert!(all.iter().any(|n| n.starts_with("secret")));
}

#[test]
fn classpath_resolution_caches_loaders_until_invalidation() {
    use crate::classpath::{ClasspathPort, ResourceLoader};

    struct StaticLoader(Vec<String>);
    impl ResourceLoader for StaticLoader {
        fn resolve(&self, path: &str) -> Result<Vec<u8>> {
            Ok(format!("{}:{path}", self.0.join(",")).into_bytes())
        }
    }
    struct StaticPort;
    impl ClasspathPort for StaticPort {
        fn loader(&self, urls: &[String]) -> Result<Arc<dyn ResourceLoader>> {
            Ok(Arc::new(StaticLoader(urls.to_vec())))
        }
    }

    let repo = CubeRepository::new(
        Arc::new(MemoryPersister::new()),
        Arc::new(CellDeltaProcessor::new()),
    )
    .with_classpath(Arc::new(StaticPort))
    .with_options(RepoOptions {
        release_quiesce: Duration::from_secs(10),
        skip_quiesce: true,
    });

    let b = branch("b");
    let boot = head().boot_id();
    set(&repo, &b, "seed", "1", "1", 1);

    let classpath: Arc<dyn Cube> = Arc::new({
        let cube = TableCube::new(sys::CLASSPATH, boot.clone())
            .with_axis(AxisView::new("env", vec!["SIT".into()], true));
        cube.set_cell(
            json!(["https://repo.example/lib.jar"]),
            &Coord::from([("env".to_string(), "SIT".to_string())]),
        )
        .unwrap();
        cube
    });
    repo.update_cube(&boot, &classpath, ALICE).unwrap();

    let coords = Coord::from([("env".to_string(), "SIT".to_string())]);
    let loader = repo.resolve_classpath(&b, &coords).unwrap();
    let bytes = loader.resolve("conf.json").unwrap();
    assert_eq!(bytes, b"https://repo.example/lib.jar:conf.json".to_vec());

    // Cached handle is reused until the workspace is cleared.
    let again = repo.resolve_classpath(&b, &coords).unwrap();
    assert!(Arc::ptr_eq(&loader, &again));
    repo.clear_cache(&b);
    let fresh = repo.resolve_classpath(&b, &coords).unwrap();
    assert!(!Arc::ptr_eq(&loader, &fresh));
}

#[test]
fn notes_and_test_data_raise_input_errors_for_missing_cubes() {
    let repo = repo();
    let b = branch("b");
    set(&repo, &b, "x", "1", "1", 1);

    repo.update_notes(&b, "x", "tuned", ALICE).unwrap();
    assert_eq!(repo.get_notes(&b, "x").unwrap(), "tuned");
    repo.update_test_data(&b, "x", "{}", ALICE).unwrap();
    assert_eq!(repo.get_test_data(&b, "x").unwrap(), "{}");

    assert!(matches!(
        repo.get_notes(&b, "ghost"),
        Err(RepoError::InvalidInput { .. })
    ));
    assert!(matches!(
        repo.get_test_data(&b, "ghost"),
        Err(RepoError::InvalidInput { .. })
    ));
}

// =========================================================================
// Branch lifecycle odds and ends
// =========================================================================

#[test]
fn delete_branch_removes_data_and_branch_permissions() {
    let repo = repo();
    set(&repo, &head(), "x", "1", "1", 1);
    repo.copy_branch(&head(), &branch("doomed"), ALICE).unwrap();

    assert!(repo.delete_branch(&head(), ALICE).is_err());
    repo.delete_branch(&branch("doomed"), ALICE).unwrap();
    assert!(!repo.get_branches(&head()).unwrap().contains("doomed"));
}

#[test]
fn move_branch_requires_the_lock_and_a_real_version() {
    let repo = repo();
    let b = branch("b");
    set(&repo, &b, "x", "1", "1", 1);

    assert!(matches!(
        repo.move_branch(&b, "2.0.0", ALICE),
        Err(RepoError::LockNotHeld { .. })
    ));

    repo.lock_app(&b, ALICE).unwrap();
    assert!(matches!(
        repo.move_branch(&b, "0.0.0", ALICE),
        Err(RepoError::SystemVersionReserved { .. })
    ));

    let moved = repo.move_branch(&b, "2.0.0", ALICE).unwrap();
    assert_eq!(moved, 1);
    assert!(repo
        .get_cube(&b.as_version("2.0.0"), "x", ALICE)
        .unwrap()
        .is_some());
}
