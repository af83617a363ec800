//! # cubehub-core
//!
//! Coordination and version-control core for multi-tenant repositories of
//! named multi-dimensional decision tables ("cubes").
//!
//! The crate serves cubes by name through a coherent in-memory cache,
//! maintains branch/head/release lifecycle semantics in the spirit of
//! distributed source control (three-way merges, conflict detection,
//! fast-forward, rollback, release promotion), enforces a role-based
//! resource-pattern permission model backed by administrative cubes,
//! coordinates cross-process mutations through a durable advisory lock, and
//! dispatches structural-change notifications to peers.
//!
//! The durable store, the cube cell model, delta computation, the classpath
//! resolver, and the broadcast transport are consumed through narrow traits
//! ([`persister::Persister`], [`cube::Cube`], [`delta::DeltaProcessor`],
//! [`classpath::ClasspathPort`], [`broadcast::Broadcaster`]); this crate is
//! an embeddable core, not a service.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use cubehub_core::appid::{AppId, Status};
//! use cubehub_core::cube::{AxisView, Cube, TableCube};
//! use cubehub_core::delta::CellDeltaProcessor;
//! use cubehub_core::manager::CubeRepository;
//! use cubehub_core::persister::MemoryPersister;
//!
//! let repo = CubeRepository::new(
//!     Arc::new(MemoryPersister::new()),
//!     Arc::new(CellDeltaProcessor::new()),
//! );
//!
//! let branch = AppId::new("acme", "risk", "1.0.0", Status::Snapshot, "dev").unwrap();
//! let cube: Arc<dyn Cube> = Arc::new(
//!     TableCube::new("rates", branch.clone())
//!         .with_axis(AxisView::new("tenor", vec!["1y".into(), "5y".into()], false)),
//! );
//! repo.update_cube(&branch, &cube, "alice").unwrap();
//! assert!(repo.get_cube(&branch, "rates", "alice").unwrap().is_some());
//! ```

pub mod advice;
pub mod appid;
pub mod branch;
pub mod broadcast;
pub mod cache;
pub mod classpath;
pub mod config;
pub mod cube;
pub mod delta;
pub mod error;
pub mod glob;
pub mod lifecycle;
pub mod lock;
pub mod manager;
pub mod permissions;
pub mod persister;
pub mod sys;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::appid::{AppId, Status};
    pub use crate::cube::{AxisView, ChangeType, Coord, Cube, CubeInfo, TableCube};
    pub use crate::delta::{CellDeltaProcessor, DeltaProcessor};
    pub use crate::error::{BranchMergeError, RepoError, Result};
    pub use crate::manager::{CubeRepository, RepoOptions};
    pub use crate::permissions::Action;
    pub use crate::persister::{MemoryPersister, Persister, SearchOptions};
}

pub use appid::AppId;
pub use error::{RepoError, Result};
pub use manager::CubeRepository;
