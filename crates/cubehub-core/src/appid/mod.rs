//! Immutable workspace addressing.
//!
//! An [`AppId`] is the 5-tuple `(tenant, app, version, status, branch)` that
//! names a workspace. Equality and hashing are case-insensitive on the string
//! parts; the original casing is preserved for display. The reserved branch
//! `HEAD` is the shared mainline, and version `0.0.0` addresses the
//! system-configuration cubes of a tenant/app pair.

#[cfg(test)]
mod tests_prop;

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{RepoError, Result};

/// The reserved branch name for the shared mainline.
pub const HEAD: &str = "HEAD";

/// The reserved version for system-configuration cubes.
pub const SYSTEM_VERSION: &str = "0.0.0";

/// Mutable vs frozen status of a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Mutable working version.
    Snapshot,
    /// Frozen, released version.
    Release,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Snapshot => f.write_str("SNAPSHOT"),
            Self::Release => f.write_str("RELEASE"),
        }
    }
}

/// The immutable addressing 5-tuple `(tenant, app, version, status, branch)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppId {
    tenant: String,
    app: String,
    version: String,
    status: Status,
    branch: String,
}

impl AppId {
    /// Builds a validated `AppId`.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::InvalidInput`] when any part is empty, the
    /// version is not dotted-numeric, or a part contains a `/` (reserved as
    /// the cache-key separator).
    pub fn new(
        tenant: impl Into<String>,
        app: impl Into<String>,
        version: impl Into<String>,
        status: Status,
        branch: impl Into<String>,
    ) -> Result<Self> {
        let id = Self {
            tenant: tenant.into(),
            app: app.into(),
            version: version.into(),
            status,
            branch: branch.into(),
        };
        id.validate()?;
        Ok(id)
    }

    fn validate(&self) -> Result<()> {
        for (label, part) in [
            ("tenant", &self.tenant),
            ("app", &self.app),
            ("version", &self.version),
            ("branch", &self.branch),
        ] {
            if part.trim().is_empty() {
                return Err(RepoError::invalid(format!("AppId {label} must not be empty")));
            }
            if part.contains('/') {
                return Err(RepoError::invalid(format!(
                    "AppId {label} must not contain '/': {part}"
                )));
            }
        }
        let numeric = self
            .version
            .split('.')
            .all(|seg| !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_digit()));
        if !numeric {
            return Err(RepoError::invalid(format!(
                "AppId version must be dotted-numeric: {}",
                self.version
            )));
        }
        Ok(())
    }

    /// The tenant part.
    #[must_use]
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// The application part.
    #[must_use]
    pub fn app(&self) -> &str {
        &self.app
    }

    /// The dotted-numeric version part.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The snapshot/release status.
    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    /// The branch label.
    #[must_use]
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Whether this id addresses the shared mainline branch.
    #[must_use]
    pub fn is_head(&self) -> bool {
        self.branch.eq_ignore_ascii_case(HEAD)
    }

    /// Whether this id addresses a frozen release.
    #[must_use]
    pub const fn is_release(&self) -> bool {
        matches!(self.status, Status::Release)
    }

    /// Whether this id addresses the reserved system-configuration version.
    #[must_use]
    pub fn is_system_version(&self) -> bool {
        self.version == SYSTEM_VERSION
    }

    /// The same tuple re-pointed at the `HEAD` branch.
    #[must_use]
    pub fn as_head(&self) -> Self {
        Self {
            branch: HEAD.to_string(),
            ..self.clone()
        }
    }

    /// The same tuple with RELEASE status.
    #[must_use]
    pub fn as_release(&self) -> Self {
        Self {
            status: Status::Release,
            ..self.clone()
        }
    }

    /// The same tuple with SNAPSHOT status.
    #[must_use]
    pub fn as_snapshot(&self) -> Self {
        Self {
            status: Status::Snapshot,
            ..self.clone()
        }
    }

    /// The same tuple at a different version.
    #[must_use]
    pub fn as_version(&self, version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..self.clone()
        }
    }

    /// The same tuple on a different branch.
    #[must_use]
    pub fn as_branch(&self, branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            ..self.clone()
        }
    }

    /// The boot id `(tenant, app, 0.0.0, SNAPSHOT, HEAD)`: the address of
    /// the administrative cubes for this tenant/app pair.
    #[must_use]
    pub fn boot_id(&self) -> Self {
        Self {
            tenant: self.tenant.clone(),
            app: self.app.clone(),
            version: SYSTEM_VERSION.to_string(),
            status: Status::Snapshot,
            branch: HEAD.to_string(),
        }
    }

    /// Full-tuple cache key, lowercased.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.tenant.to_lowercase(),
            self.app.to_lowercase(),
            self.version,
            self.status,
            self.branch.to_lowercase()
        )
    }

    /// Cache key minus the branch part, used for whole-version invalidation.
    #[must_use]
    pub fn branch_agnostic_cache_key(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.tenant.to_lowercase(),
            self.app.to_lowercase(),
            self.version,
            self.status
        )
    }
}

impl PartialEq for AppId {
    fn eq(&self, other: &Self) -> bool {
        self.status == other.status
            && self.version == other.version
            && self.tenant.eq_ignore_ascii_case(&other.tenant)
            && self.app.eq_ignore_ascii_case(&other.app)
            && self.branch.eq_ignore_ascii_case(&other.branch)
    }
}

impl Eq for AppId {}

impl Hash for AppId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tenant.to_lowercase().hash(state);
        self.app.to_lowercase().hash(state);
        self.version.hash(state);
        self.status.hash(state);
        self.branch.to_lowercase().hash(state);
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}
