//! Role-based, resource-pattern permission evaluation.
//!
//! Permissions are configured through regular cubes: `sys.usergroups` maps
//! users to roles, `sys.permissions` maps `(resource, role, action)` to a
//! boolean, and `sys.branch.permissions` gates non-admin mutations per
//! branch. When the admin cubes are absent the app is in bootstrap mode and
//! everything is allowed. Lock status is observable to everyone: READ on
//! `sys.lock` always passes.

#[cfg(test)]
mod tests;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::appid::AppId;
use crate::cube::{AxisView, Coord, Cube, CubeSource, DEFAULT_COLUMN};
use crate::error::{RepoError, Result};
use crate::glob;
use crate::sys;

/// Axis names of the administrative cubes (bit-exact for compatibility).
pub(crate) const AXIS_RESOURCE: &str = "resource";
pub(crate) const AXIS_ROLE: &str = "role";
pub(crate) const AXIS_ACTION: &str = "action";
pub(crate) const AXIS_USER: &str = "user";

/// The role that bypasses branch permission gating.
pub(crate) const ROLE_ADMIN: &str = "admin";

/// The actions the permission matrix recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Read a cube or listing.
    Read,
    /// Mutate a cube within a branch.
    Update,
    /// Commit branch changes to head.
    Commit,
    /// Release or move a version.
    Release,
}

impl Action {
    /// The column value used in `sys.permissions`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Update => "update",
            Self::Commit => "commit",
            Self::Release => "release",
        }
    }

    /// Whether branch permission gating applies.
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        matches!(self, Self::Update | Self::Commit)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evaluates permissions against the administrative cubes of a workspace.
pub struct PermissionEvaluator<'a> {
    cubes: &'a dyn CubeSource,
}

impl<'a> PermissionEvaluator<'a> {
    /// Builds an evaluator over a cube source (normally the repository).
    #[must_use]
    pub fn new(cubes: &'a dyn CubeSource) -> Self {
        Self { cubes }
    }

    /// Answers whether `user` may perform `action` on `resource` within the
    /// workspace.
    pub fn allow(
        &self,
        app_id: &AppId,
        resource: &str,
        action: Action,
        user: &str,
    ) -> Result<bool> {
        let memo = self.snapshot(app_id, user)?;
        Ok(memo.allowed(resource, action))
    }

    /// Like [`PermissionEvaluator::allow`] but raising
    /// [`RepoError::PermissionDenied`] on a deny.
    pub fn assert_allowed(
        &self,
        app_id: &AppId,
        resource: &str,
        action: Action,
        user: &str,
    ) -> Result<()> {
        if self.allow(app_id, resource, action, user)? {
            Ok(())
        } else {
            tracing::warn!(
                app_id = %app_id,
                resource,
                action = %action,
                user,
                "permission denied"
            );
            Err(RepoError::PermissionDenied {
                user: user.to_string(),
                resource: resource.to_string(),
                action,
            })
        }
    }

    /// Captures the admin-cube state and the user's role set once, for
    /// repeated checks over many resources (list filtering).
    pub fn snapshot(&self, app_id: &AppId, user: &str) -> Result<PermissionMemo> {
        let boot = app_id.boot_id();
        let permissions = self.cubes.cube(&boot, sys::PERMISSIONS)?;
        let usergroups = self.cubes.cube(&boot, sys::USERGROUPS)?;

        let (Some(permissions), Some(usergroups)) = (permissions, usergroups) else {
            // Bootstrap mode: nothing is configured yet, everything passes.
            return Ok(PermissionMemo::allow_all(user));
        };

        let roles = roles_of(usergroups.as_ref(), user);
        let is_admin = roles.iter().any(|r| r.eq_ignore_ascii_case(ROLE_ADMIN));
        let branch_permissions = self
            .cubes
            .cube(&boot.as_branch(app_id.branch()), sys::BRANCH_PERMISSIONS)?;

        Ok(PermissionMemo {
            allow_all: false,
            user: user.to_string(),
            roles,
            is_admin,
            permissions: Some(permissions),
            branch_permissions,
        })
    }
}

/// Memoised permission state for one `(workspace, user)` pair.
pub struct PermissionMemo {
    allow_all: bool,
    user: String,
    roles: Vec<String>,
    is_admin: bool,
    permissions: Option<Arc<dyn Cube>>,
    branch_permissions: Option<Arc<dyn Cube>>,
}

impl PermissionMemo {
    fn allow_all(user: &str) -> Self {
        Self {
            allow_all: true,
            user: user.to_string(),
            roles: Vec::new(),
            is_admin: false,
            permissions: None,
            branch_permissions: None,
        }
    }

    /// The roles the user holds.
    #[must_use]
    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// Answers the permission question from the memoised state.
    #[must_use]
    pub fn allowed(&self, resource: &str, action: Action) -> bool {
        // Lock status must be observable to everyone.
        if action == Action::Read && cube_part(resource).eq_ignore_ascii_case(sys::LOCK) {
            return true;
        }
        if self.allow_all {
            return true;
        }
        let Some(permissions) = &self.permissions else {
            return true;
        };

        if !self.is_admin && action.is_mutating() && !self.branch_allows(resource) {
            return false;
        }

        let Some(resource_axis) = permissions.axis(AXIS_RESOURCE) else {
            return false;
        };
        for column in matching_columns(&resource_axis, resource) {
            for role in &self.roles {
                let coords = Coord::from([
                    (AXIS_RESOURCE.to_string(), column.clone()),
                    (AXIS_ROLE.to_string(), role.clone()),
                    (AXIS_ACTION.to_string(), action.as_str().to_string()),
                ]);
                if truthy(permissions.cell(&coords)) {
                    return true;
                }
            }
        }
        false
    }

    /// The per-branch gate for non-admin mutators.
    fn branch_allows(&self, resource: &str) -> bool {
        let Some(branch_permissions) = &self.branch_permissions else {
            return true; // no branch restrictions configured
        };
        let Some(resource_axis) = branch_permissions.axis(AXIS_RESOURCE) else {
            return true;
        };
        for column in matching_columns(&resource_axis, resource) {
            let coords = Coord::from([
                (AXIS_RESOURCE.to_string(), column),
                (AXIS_USER.to_string(), self.user.clone()),
            ]);
            if truthy(branch_permissions.cell(&coords)) {
                return true;
            }
        }
        false
    }
}

/// Computes the role set of a user from `sys.usergroups`.
fn roles_of(usergroups: &dyn Cube, user: &str) -> Vec<String> {
    let Some(role_axis) = usergroups.axis(AXIS_ROLE) else {
        return Vec::new();
    };
    role_axis
        .columns
        .into_iter()
        .filter(|role| {
            let coords = Coord::from([
                (AXIS_ROLE.to_string(), role.clone()),
                (AXIS_USER.to_string(), user.to_string()),
            ]);
            truthy(usergroups.cell(&coords))
        })
        .collect()
}

/// Columns of a resource axis matching the requested resource, falling back
/// to the default column when nothing matches.
fn matching_columns(axis: &AxisView, resource: &str) -> Vec<String> {
    let matched: Vec<String> = axis
        .columns
        .iter()
        .filter(|column| resource_matches(column, resource))
        .cloned()
        .collect();
    if matched.is_empty() && axis.has_default {
        return vec![DEFAULT_COLUMN.to_string()];
    }
    matched
}

/// Whether a permission column covers a requested resource.
///
/// Resources are `cubeName` or `cubeName/axisName`, either part possibly
/// holding `*`/`?`. A whole-cube column covers requests on its axes; an
/// axis-scoped column never covers a whole-cube request.
fn resource_matches(column: &str, requested: &str) -> bool {
    let (column_cube, column_axis) = split_resource(column);
    let (requested_cube, requested_axis) = split_resource(requested);
    match (requested_axis, column_axis) {
        (None, None) | (Some(_), None) => glob::matches(column_cube, requested_cube),
        (None, Some(_)) => false,
        (Some(requested_axis), Some(column_axis)) => {
            glob::matches(column_cube, requested_cube)
                && glob::matches(column_axis, requested_axis)
        }
    }
}

fn split_resource(resource: &str) -> (&str, Option<&str>) {
    match resource.split_once('/') {
        Some((cube, axis)) => (cube, Some(axis)),
        None => (resource, None),
    }
}

fn cube_part(resource: &str) -> &str {
    split_resource(resource).0
}

fn truthy(value: Option<Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
