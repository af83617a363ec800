//! Tests for the permission evaluator against synthesised admin cubes.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use super::*;
use crate::appid::Status;
use crate::cube::TableCube;
use crate::lifecycle;

const ADMIN: &str = "alice";

fn branch_id() -> AppId {
    AppId::new("acme", "risk", "1.0.0", Status::Snapshot, "dev").unwrap()
}

/// Map-backed cube source seeded with admin cubes.
#[derive(Default)]
struct MapSource {
    cubes: HashMap<(AppId, String), Arc<dyn Cube>>,
}

impl MapSource {
    fn insert(&mut self, app_id: &AppId, cube: Arc<dyn Cube>) {
        self.cubes
            .insert((app_id.clone(), cube.name().to_lowercase()), cube);
    }

    /// The default bootstrap matrix with `alice` as creator.
    fn bootstrapped() -> Self {
        let mut source = Self::default();
        let boot = branch_id().boot_id();
        source.insert(&boot, lifecycle::usergroups_cube(&boot, ADMIN));
        source.insert(&boot, lifecycle::permissions_cube(&boot));
        source
    }
}

impl CubeSource for MapSource {
    fn cube(&self, app_id: &AppId, name: &str) -> Result<Option<Arc<dyn Cube>>> {
        Ok(self
            .cubes
            .get(&(app_id.clone(), name.to_lowercase()))
            .cloned())
    }
}

fn allowed(source: &MapSource, resource: &str, action: Action, user: &str) -> bool {
    PermissionEvaluator::new(source)
        .allow(&branch_id(), resource, action, user)
        .unwrap()
}

// =========================================================================
// Bootstrap mode and the lock exception
// =========================================================================

#[test]
fn missing_admin_cubes_allow_everything() {
    let source = MapSource::default();
    assert!(allowed(&source, "anything", Action::Update, "nobody"));
    assert!(allowed(&source, "anything", Action::Release, "nobody"));
}

#[test]
fn lock_status_is_readable_by_everyone() {
    let source = MapSource::bootstrapped();
    assert!(allowed(&source, sys::LOCK, Action::Read, "total-stranger"));
    // But not writable without the right role.
    assert!(!allowed(&source, sys::LOCK, Action::Update, "total-stranger"));
}

// =========================================================================
// Role resolution
// =========================================================================

#[test]
fn creator_is_admin_and_may_do_anything() {
    let source = MapSource::bootstrapped();
    assert!(allowed(&source, "rates", Action::Read, ADMIN));
    assert!(allowed(&source, "rates", Action::Update, ADMIN));
    assert!(allowed(&source, "rates", Action::Commit, ADMIN));
    assert!(allowed(&source, "rates", Action::Release, ADMIN));
    assert!(allowed(&source, "sys.permissions", Action::Update, ADMIN));
}

#[test]
fn unknown_users_default_to_the_user_role() {
    let source = MapSource::bootstrapped();
    assert!(allowed(&source, "rates", Action::Read, "bob"));
    assert!(allowed(&source, "rates", Action::Update, "bob"));
    assert!(allowed(&source, "rates", Action::Commit, "bob"));
    assert!(!allowed(&source, "rates", Action::Release, "bob"));
}

#[test]
fn sys_cubes_are_admin_writable_only() {
    let source = MapSource::bootstrapped();
    assert!(allowed(&source, "sys.permissions", Action::Read, "bob"));
    assert!(!allowed(&source, "sys.permissions", Action::Update, "bob"));
}

#[test]
fn readonly_role_denies_mutation_before_any_persistence() {
    let mut source = MapSource::default();
    let boot = branch_id().boot_id();
    source.insert(&boot, lifecycle::permissions_cube(&boot));

    // Custom usergroups: carol is readonly only.
    let usergroups = TableCube::new(sys::USERGROUPS, boot.clone())
        .with_axis(AxisView::new(AXIS_USER, vec!["carol".into()], true))
        .with_axis(AxisView::new(
            AXIS_ROLE,
            vec!["admin".into(), "user".into(), "readonly".into()],
            false,
        ));
    usergroups
        .set_cell(
            json!(true),
            &Coord::from([
                (AXIS_USER.to_string(), "carol".to_string()),
                (AXIS_ROLE.to_string(), "readonly".to_string()),
            ]),
        )
        .unwrap();
    source.insert(&boot, Arc::new(usergroups));

    assert!(allowed(&source, "rates", Action::Read, "carol"));
    assert!(!allowed(&source, "rates", Action::Update, "carol"));
    assert!(!allowed(&source, "rates", Action::Commit, "carol"));
}

#[test]
fn memo_exposes_the_role_set() {
    let source = MapSource::bootstrapped();
    let memo = PermissionEvaluator::new(&source)
        .snapshot(&branch_id(), ADMIN)
        .unwrap();
    assert!(memo.roles().iter().any(|r| r == "admin"));
    assert!(memo.roles().iter().any(|r| r == "user"));
}

// =========================================================================
// Branch permission gating
// =========================================================================

#[test]
fn branch_gate_blocks_non_admin_mutators_without_entry() {
    let mut source = MapSource::bootstrapped();
    let boot_branch = branch_id().boot_id().as_branch("dev");
    source.insert(
        &boot_branch,
        lifecycle::branch_permissions_cube(&boot_branch, "bob"),
    );

    // bob created the branch: full access.
    assert!(allowed(&source, "rates", Action::Update, "bob"));
    // dave holds the user role but has no branch entry.
    assert!(!allowed(&source, "rates", Action::Update, "dave"));
    // Reading is not gated by branch permissions.
    assert!(allowed(&source, "rates", Action::Read, "dave"));
    // Admins bypass the branch gate.
    assert!(allowed(&source, "rates", Action::Update, ADMIN));
}

// =========================================================================
// Resource pattern matching
// =========================================================================

#[test]
fn whole_cube_column_covers_axis_requests() {
    assert!(super::resource_matches("rates", "rates"));
    assert!(super::resource_matches("rates", "rates/currency"));
    assert!(super::resource_matches("rat*", "rates/currency"));
}

#[test]
fn axis_column_never_covers_whole_cube_requests() {
    assert!(!super::resource_matches("rates/currency", "rates"));
    assert!(super::resource_matches("rates/curr*", "rates/currency"));
    assert!(!super::resource_matches("rates/currency", "rates/tenor"));
}

#[test]
fn wildcards_apply_to_both_parts() {
    assert!(super::resource_matches("*", "anything"));
    assert!(super::resource_matches("*/*", "cube/axis"));
    assert!(super::resource_matches("r?tes", "rates"));
    assert!(!super::resource_matches("s*", "rates"));
}
