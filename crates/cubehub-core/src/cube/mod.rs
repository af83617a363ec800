//! The cube port and its revision descriptor.
//!
//! The repository never looks inside a cube beyond this interface: cubes are
//! named multi-dimensional decision tables whose cell model, delta
//! computation, and fingerprinting live with the implementer. [`TableCube`]
//! is the map-backed implementation the bootstrap synthesiser and the test
//! suite use.

mod table;

pub use table::TableCube;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::advice::Advice;
use crate::appid::AppId;
use crate::error::Result;

/// A cell coordinate: axis name to column value.
pub type Coord = BTreeMap<String, String>;

/// Marker column used when a coordinate resolves to an axis default.
pub const DEFAULT_COLUMN: &str = "~default";

/// Reserved meta-property controlling cache retention (absent means `true`).
pub const META_CACHE: &str = "cache";

/// One axis of a cube, as visible to the repository: its name, its columns,
/// and whether unmatched coordinates fall through to a default column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisView {
    /// Axis name, unique within a cube.
    pub name: String,
    /// Column values in declaration order.
    pub columns: Vec<String>,
    /// Whether the axis has a default column.
    #[serde(rename = "hasDefault")]
    pub has_default: bool,
}

impl AxisView {
    /// Builds an axis view.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: Vec<String>, has_default: bool) -> Self {
        Self {
            name: name.into(),
            columns,
            has_default,
        }
    }

    /// Resolves a coordinate value to a column of this axis, falling through
    /// to [`DEFAULT_COLUMN`] when the axis has a default. Column matching is
    /// case-insensitive.
    #[must_use]
    pub fn resolve(&self, value: Option<&str>) -> Option<String> {
        if let Some(v) = value {
            if let Some(col) = self.columns.iter().find(|c| c.eq_ignore_ascii_case(v)) {
                return Some(col.clone());
            }
        }
        self.has_default.then(|| DEFAULT_COLUMN.to_string())
    }
}

/// How a branch cube relates to its head counterpart, as assigned by the
/// branch diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    /// New in the branch; absent from head.
    Created,
    /// Content differs from the head revision the branch is based on.
    Updated,
    /// Tombstoned in the branch.
    Deleted,
    /// Restored in the branch while head holds a tombstone.
    Restored,
    /// Head moved since the branch last synchronised; needs a merge.
    Conflict,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::Updated => "UPDATED",
            Self::Deleted => "DELETED",
            Self::Restored => "RESTORED",
            Self::Conflict => "CONFLICT",
        };
        f.write_str(s)
    }
}

/// Per-revision descriptor returned by persister searches.
///
/// A negative `revision` is a tombstone. `head_sha1` records the head
/// fingerprint this branch cube was forked from or last synchronised with;
/// `None` means the cube has never been merged to head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CubeInfo {
    /// Opaque persister identifier for this revision.
    pub id: String,
    /// Cube name, original casing.
    pub name: String,
    /// Signed revision number; negative = tombstone.
    pub revision: i64,
    /// Content fingerprint of this revision.
    pub sha1: String,
    /// Fingerprint of the head revision this branch cube diverged from.
    #[serde(rename = "headSha1")]
    pub head_sha1: Option<String>,
    /// Whether the branch copy carries uncommitted changes.
    pub changed: bool,
    /// Commit notes, when requested.
    pub notes: Option<String>,
    /// Attached test data, when requested.
    #[serde(rename = "testData")]
    pub test_data: Option<String>,
    /// The workspace this revision belongs to.
    #[serde(rename = "appId")]
    pub app_id: AppId,
    /// Classification assigned by the branch diff; `None` outside diffs.
    #[serde(rename = "changeType")]
    pub change_type: Option<ChangeType>,
    /// Simple-JSON rendering of the revision, populated when a search asks
    /// for cube data.
    #[serde(rename = "cubeJson", default, skip_serializing_if = "Option::is_none")]
    pub cube_json: Option<Value>,
}

impl CubeInfo {
    /// Whether this revision is a tombstone.
    #[must_use]
    pub const fn is_tombstone(&self) -> bool {
        self.revision < 0
    }
}

/// The cube contract consumed by the repository.
///
/// Implementations are shared across threads behind `Arc` and use interior
/// mutability for the mutable surface (cells, advices, re-homing).
pub trait Cube: Send + Sync {
    /// Cube name. Names are compared case-insensitively by the repository.
    fn name(&self) -> &str;

    /// The workspace this cube instance belongs to.
    fn app_id(&self) -> AppId;

    /// Re-homes the cube into another workspace (used when pulling a head
    /// revision into a branch).
    fn set_app_id(&self, app_id: AppId);

    /// Content fingerprint. Stable until the cube is mutated.
    fn sha1(&self) -> String;

    /// Drops the memoised fingerprint so the next [`Cube::sha1`] recomputes.
    fn clear_sha1(&self);

    /// Reads a meta-property.
    fn meta_property(&self, key: &str) -> Option<Value>;

    /// All axes of this cube.
    fn axes(&self) -> Vec<AxisView>;

    /// One axis by name (case-insensitive).
    fn axis(&self, name: &str) -> Option<AxisView>;

    /// Reads the cell at a coordinate, after axis resolution.
    fn cell(&self, coords: &Coord) -> Option<Value>;

    /// Writes the cell at a coordinate.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::RepoError::InvalidInput`] when a coordinate
    /// does not resolve to a column on every axis.
    fn set_cell(&self, value: Value, coords: &Coord) -> Result<()>;

    /// Removes the cell at a coordinate.
    fn remove_cell(&self, coords: &Coord) -> Result<()>;

    /// Snapshot of every populated cell, keyed by resolved coordinates.
    fn cells(&self) -> BTreeMap<Coord, Value>;

    /// Removes every cell.
    fn clear_cells(&self);

    /// Names of cubes this cube references directly.
    fn referenced_cube_names(&self) -> BTreeSet<String>;

    /// Attaches an advice under the given method.
    fn add_advice(&self, advice: &Advice, method: &str);

    /// Currently attached `(advice, method)` pairs.
    fn advices(&self) -> Vec<(Advice, String)>;

    /// Deep copy under a new name, advices not carried.
    fn duplicate(&self, new_name: &str) -> Arc<dyn Cube>;

    /// Simple-JSON rendering of the cube (axes, cells, meta, references).
    fn to_json(&self) -> Value;
}

/// Read access to hydrated cubes, implemented by the repository façade.
///
/// Components that must consult administrative cubes (permission evaluator,
/// lock coordinator) depend on this rather than on the façade itself.
pub trait CubeSource: Send + Sync {
    /// Loads a cube through the cache, or `None` when it does not exist.
    fn cube(&self, app_id: &AppId, name: &str) -> Result<Option<Arc<dyn Cube>>>;
}

/// Whether a cube opts out of caching via its `cache` meta-property.
#[must_use]
pub fn cache_retained(cube: &dyn Cube) -> bool {
    match cube.meta_property(META_CACHE) {
        Some(Value::Bool(b)) => b,
        Some(Value::String(s)) => !s.eq_ignore_ascii_case("false"),
        _ => true,
    }
}
