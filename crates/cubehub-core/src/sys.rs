//! Reserved administrative cube names.
//!
//! These are regular cubes by convention of name, living at the boot id
//! `(tenant, app, 0.0.0, SNAPSHOT, HEAD)`, except `sys.branch.permissions`,
//! which lives per branch under version `0.0.0`.

/// Resolves runtime ids from a coordinate map.
pub const BOOTSTRAP: &str = "sys.bootstrap";

/// Yields resource-loader URLs per input coordinate. Any mutation touching
/// this name invalidates the whole workspace cache.
pub const CLASSPATH: &str = "sys.classpath";

/// `(resource, role, action)` permission matrix.
pub const PERMISSIONS: &str = "sys.permissions";

/// `(user, role)` membership matrix.
pub const USERGROUPS: &str = "sys.usergroups";

/// `(resource, user)` per-branch permission matrix.
pub const BRANCH_PERMISSIONS: &str = "sys.branch.permissions";

/// Single-cell advisory lock owner.
pub const LOCK: &str = "sys.lock";

/// Reserved for prototype defaults (consumed externally).
pub const PROTOTYPE: &str = "sys.prototype";

/// Whether a cube name is a `sys.classpath` mutation trigger.
#[must_use]
pub fn is_classpath(name: &str) -> bool {
    name.eq_ignore_ascii_case(CLASSPATH)
}
