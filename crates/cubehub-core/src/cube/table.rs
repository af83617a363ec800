//! Map-backed cube implementation.
//!
//! `TableCube` is the concrete cube used to synthesise administrative cubes
//! and to drive the test suite. Cells are kept in a sorted map keyed by
//! resolved coordinates; the content fingerprint is a SHA-256 over the
//! simple-JSON rendering, memoised until the next mutation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::{AxisView, Coord, Cube};
use crate::advice::Advice;
use crate::appid::AppId;
use crate::error::{RepoError, Result};

/// A concrete, thread-safe decision-table cube.
pub struct TableCube {
    name: String,
    app_id: RwLock<AppId>,
    axes: Vec<AxisView>,
    meta: RwLock<BTreeMap<String, Value>>,
    cells: RwLock<BTreeMap<Coord, Value>>,
    refs: RwLock<BTreeSet<String>>,
    fingerprint: RwLock<Option<String>>,
    advices: RwLock<Vec<(Advice, String)>>,
}

impl TableCube {
    /// Creates an empty cube with no axes.
    #[must_use]
    pub fn new(name: impl Into<String>, app_id: AppId) -> Self {
        Self {
            name: name.into(),
            app_id: RwLock::new(app_id),
            axes: Vec::new(),
            meta: RwLock::new(BTreeMap::new()),
            cells: RwLock::new(BTreeMap::new()),
            refs: RwLock::new(BTreeSet::new()),
            fingerprint: RwLock::new(None),
            advices: RwLock::new(Vec::new()),
        }
    }

    /// Adds an axis (builder style; axes are fixed after construction).
    #[must_use]
    pub fn with_axis(mut self, axis: AxisView) -> Self {
        self.axes.push(axis);
        self
    }

    /// Sets a meta-property (builder style).
    #[must_use]
    pub fn with_meta(self, key: impl Into<String>, value: Value) -> Self {
        self.meta
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
        self
    }

    /// Records a reference to another cube by name.
    pub fn add_reference(&self, name: impl Into<String>) {
        self.refs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into());
        self.clear_sha1();
    }

    /// Parses a cube from its simple-JSON rendering (the inverse of
    /// [`Cube::to_json`]).
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::InvalidInput`] when the document does not parse
    /// or a cell coordinate does not resolve against the declared axes.
    pub fn from_simple_json(app_id: AppId, doc: &str) -> Result<Self> {
        let parsed: SimpleJson = serde_json::from_str(doc)
            .map_err(|e| RepoError::invalid(format!("malformed cube json: {e}")))?;
        let mut cube = Self::new(parsed.name, app_id);
        cube.axes = parsed.axes;
        for (key, value) in parsed.meta {
            cube.meta
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key, value);
        }
        for entry in parsed.cells {
            cube.set_cell(entry.value, &entry.coords)?;
        }
        for name in parsed.refs {
            cube.add_reference(name);
        }
        Ok(cube)
    }

    /// Resolves a caller coordinate against every axis of this cube.
    fn resolve(&self, coords: &Coord) -> Option<Coord> {
        let mut resolved = Coord::new();
        for axis in &self.axes {
            let given = coords
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(&axis.name))
                .map(|(_, v)| v.as_str());
            let column = axis.resolve(given)?;
            resolved.insert(axis.name.clone(), column);
        }
        Some(resolved)
    }

    fn compute_fingerprint(&self) -> String {
        let body = self.to_json();
        let canonical = serde_json::to_string(&body).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        hex
    }
}

impl Cube for TableCube {
    fn name(&self) -> &str {
        &self.name
    }

    fn app_id(&self) -> AppId {
        self.app_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_app_id(&self, app_id: AppId) {
        *self.app_id.write().unwrap_or_else(PoisonError::into_inner) = app_id;
    }

    fn sha1(&self) -> String {
        if let Some(cached) = self
            .fingerprint
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return cached;
        }
        let computed = self.compute_fingerprint();
        let mut slot = self
            .fingerprint
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // A racing writer may have beaten us here; adopt whichever value won.
        slot.get_or_insert(computed).clone()
    }

    fn clear_sha1(&self) {
        *self
            .fingerprint
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn meta_property(&self, key: &str) -> Option<Value> {
        self.meta
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn axes(&self) -> Vec<AxisView> {
        self.axes.clone()
    }

    fn axis(&self, name: &str) -> Option<AxisView> {
        self.axes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    fn cell(&self, coords: &Coord) -> Option<Value> {
        let resolved = self.resolve(coords)?;
        self.cells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&resolved)
            .cloned()
    }

    fn set_cell(&self, value: Value, coords: &Coord) -> Result<()> {
        let resolved = self.resolve(coords).ok_or_else(|| {
            RepoError::invalid(format!(
                "coordinate does not resolve on cube '{}': {coords:?}",
                self.name
            ))
        })?;
        self.cells
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resolved, value);
        self.clear_sha1();
        Ok(())
    }

    fn remove_cell(&self, coords: &Coord) -> Result<()> {
        let resolved = self.resolve(coords).ok_or_else(|| {
            RepoError::invalid(format!(
                "coordinate does not resolve on cube '{}': {coords:?}",
                self.name
            ))
        })?;
        self.cells
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&resolved);
        self.clear_sha1();
        Ok(())
    }

    fn cells(&self) -> BTreeMap<Coord, Value> {
        self.cells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn clear_cells(&self) {
        self.cells
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.clear_sha1();
    }

    fn referenced_cube_names(&self) -> BTreeSet<String> {
        self.refs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn add_advice(&self, advice: &Advice, method: &str) {
        self.advices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((advice.clone(), method.to_string()));
    }

    fn advices(&self) -> Vec<(Advice, String)> {
        self.advices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn duplicate(&self, new_name: &str) -> Arc<dyn Cube> {
        let copy = Self {
            name: new_name.to_string(),
            app_id: RwLock::new(self.app_id()),
            axes: self.axes.clone(),
            meta: RwLock::new(self.meta.read().unwrap_or_else(PoisonError::into_inner).clone()),
            cells: RwLock::new(self.cells()),
            refs: RwLock::new(self.referenced_cube_names()),
            fingerprint: RwLock::new(None),
            advices: RwLock::new(Vec::new()),
        };
        Arc::new(copy)
    }

    fn to_json(&self) -> Value {
        let cells: Vec<Value> = self
            .cells()
            .into_iter()
            .map(|(coords, value)| json!({ "coords": coords, "value": value }))
            .collect();
        let meta = self.meta.read().unwrap_or_else(PoisonError::into_inner).clone();
        json!({
            "name": self.name,
            "axes": self.axes,
            "meta": meta,
            "cells": cells,
            "refs": self.referenced_cube_names(),
        })
    }
}

impl std::fmt::Debug for TableCube {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableCube")
            .field("name", &self.name)
            .field("app_id", &self.app_id())
            .field("axes", &self.axes.len())
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize)]
struct SimpleJson {
    name: String,
    #[serde(default)]
    axes: Vec<AxisView>,
    #[serde(default)]
    meta: BTreeMap<String, Value>,
    #[serde(default)]
    cells: Vec<CellEntry>,
    #[serde(default)]
    refs: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct CellEntry {
    coords: Coord,
    value: Value,
}
