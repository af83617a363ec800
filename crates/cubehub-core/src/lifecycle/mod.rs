//! Bootstrap synthesis of administrative cubes.
//!
//! When a tenant/app pair is first observed with no records, the repository
//! lazily creates the administrative cubes at the boot id: `sys.usergroups`
//! (caller is admin and user, everyone else user), `sys.permissions` (admins
//! everything, users read/update/commit, readonly read, `sys.*` writable by
//! admins only), and the uncached `sys.lock`. Creating a non-HEAD branch
//! additionally synthesises `sys.branch.permissions` granting the creator
//! full access to that branch.


use std::sync::Arc;

use serde_json::json;

use crate::appid::AppId;
use crate::cube::{AxisView, Coord, Cube, TableCube, DEFAULT_COLUMN, META_CACHE};
use crate::lock::AXIS_SYSTEM;
use crate::permissions::{Action, AXIS_ACTION, AXIS_RESOURCE, AXIS_ROLE, AXIS_USER, ROLE_ADMIN};
use crate::sys;

/// Default non-privileged role.
pub(crate) const ROLE_USER: &str = "user";

/// Default read-only role.
pub(crate) const ROLE_READONLY: &str = "readonly";

const ALL_ACTIONS: [Action; 4] = [Action::Read, Action::Update, Action::Commit, Action::Release];

fn set_true(cube: &TableCube, coords: &[(&str, &str)]) {
    let coord: Coord = coords
        .iter()
        .map(|(axis, column)| ((*axis).to_string(), (*column).to_string()))
        .collect();
    cube.set_cell(json!(true), &coord)
        .expect("bootstrap coordinates resolve by construction");
}

/// Synthesises the default `sys.usergroups` cube: the creator is admin and
/// user, everyone else is user.
#[must_use]
pub fn usergroups_cube(boot_id: &AppId, creator: &str) -> Arc<dyn Cube> {
    let cube = TableCube::new(sys::USERGROUPS, boot_id.clone())
        .with_axis(AxisView::new(AXIS_USER, vec![creator.to_string()], true))
        .with_axis(AxisView::new(
            AXIS_ROLE,
            vec![ROLE_ADMIN.into(), ROLE_USER.into(), ROLE_READONLY.into()],
            false,
        ));
    set_true(&cube, &[(AXIS_USER, creator), (AXIS_ROLE, ROLE_ADMIN)]);
    set_true(&cube, &[(AXIS_USER, creator), (AXIS_ROLE, ROLE_USER)]);
    set_true(&cube, &[(AXIS_USER, DEFAULT_COLUMN), (AXIS_ROLE, ROLE_USER)]);
    Arc::new(cube)
}

/// Synthesises the default `sys.permissions` matrix.
#[must_use]
pub fn permissions_cube(boot_id: &AppId) -> Arc<dyn Cube> {
    let cube = TableCube::new(sys::PERMISSIONS, boot_id.clone())
        .with_axis(AxisView::new(AXIS_RESOURCE, vec!["sys.*".into()], true))
        .with_axis(AxisView::new(
            AXIS_ROLE,
            vec![ROLE_ADMIN.into(), ROLE_USER.into(), ROLE_READONLY.into()],
            false,
        ))
        .with_axis(AxisView::new(
            AXIS_ACTION,
            ALL_ACTIONS.iter().map(|a| a.as_str().to_string()).collect(),
            false,
        ));

    for action in ALL_ACTIONS {
        set_true(
            &cube,
            &[
                (AXIS_RESOURCE, DEFAULT_COLUMN),
                (AXIS_ROLE, ROLE_ADMIN),
                (AXIS_ACTION, action.as_str()),
            ],
        );
        set_true(
            &cube,
            &[
                (AXIS_RESOURCE, "sys.*"),
                (AXIS_ROLE, ROLE_ADMIN),
                (AXIS_ACTION, action.as_str()),
            ],
        );
    }
    for action in [Action::Read, Action::Update, Action::Commit] {
        set_true(
            &cube,
            &[
                (AXIS_RESOURCE, DEFAULT_COLUMN),
                (AXIS_ROLE, ROLE_USER),
                (AXIS_ACTION, action.as_str()),
            ],
        );
    }
    set_true(
        &cube,
        &[
            (AXIS_RESOURCE, "sys.*"),
            (AXIS_ROLE, ROLE_USER),
            (AXIS_ACTION, Action::Read.as_str()),
        ],
    );
    set_true(
        &cube,
        &[
            (AXIS_RESOURCE, DEFAULT_COLUMN),
            (AXIS_ROLE, ROLE_READONLY),
            (AXIS_ACTION, Action::Read.as_str()),
        ],
    );
    set_true(
        &cube,
        &[
            (AXIS_RESOURCE, "sys.*"),
            (AXIS_ROLE, ROLE_READONLY),
            (AXIS_ACTION, Action::Read.as_str()),
        ],
    );
    Arc::new(cube)
}

/// Synthesises the uncached `sys.lock` cube with no owner.
#[must_use]
pub fn lock_cube(boot_id: &AppId) -> Arc<dyn Cube> {
    Arc::new(
        TableCube::new(sys::LOCK, boot_id.clone())
            .with_axis(AxisView::new(AXIS_SYSTEM, Vec::new(), true))
            .with_meta(META_CACHE, json!(false)),
    )
}

/// Synthesises a branch's `sys.branch.permissions` granting the creator full
/// access.
#[must_use]
pub fn branch_permissions_cube(boot_branch_id: &AppId, creator: &str) -> Arc<dyn Cube> {
    let cube = TableCube::new(sys::BRANCH_PERMISSIONS, boot_branch_id.clone())
        .with_axis(AxisView::new(AXIS_RESOURCE, Vec::new(), true))
        .with_axis(AxisView::new(AXIS_USER, vec![creator.to_string()], true));
    set_true(&cube, &[(AXIS_RESOURCE, DEFAULT_COLUMN), (AXIS_USER, creator)]);
    Arc::new(cube)
}
