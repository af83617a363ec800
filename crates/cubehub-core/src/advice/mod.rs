//! Name-pattern-bound interceptors.
//!
//! Advices attach to cubes on hydration: every advice whose glob matches
//! `cubeName.method()` is added to the cube, where `method` ranges over the
//! columns of the cube's `method` axis when one exists, else the literal
//! `run`.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::appid::AppId;
use crate::cube::Cube;
use crate::glob;

/// The axis whose columns name a cube's invocable methods.
const METHOD_AXIS: &str = "method";

/// The method assumed for cubes without a `method` axis.
const DEFAULT_METHOD: &str = "run";

/// A named interceptor bound by a `*`/`?` glob over `cubeName.method()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advice {
    /// Advice name, used for identification and ordering.
    pub name: String,
    /// Glob the advice is bound to, matched against `cubeName.method()`.
    pub pattern: String,
}

impl Advice {
    /// Builds an advice.
    #[must_use]
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
        }
    }
}

/// Per-workspace registry of advices, applied lazily on cube hydration.
#[derive(Debug, Default)]
pub struct AdviceRegistry {
    entries: RwLock<HashMap<AppId, Vec<Advice>>>,
}

impl AdviceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an advice for a workspace.
    pub fn add(&self, app_id: &AppId, advice: Advice) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.entry(app_id.clone()).or_default().push(advice);
    }

    /// All advices registered for a workspace.
    #[must_use]
    pub fn advices_for(&self, app_id: &AppId) -> Vec<Advice> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(app_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drops every advice registered for a workspace.
    pub fn clear(&self, app_id: &AppId) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(app_id);
    }

    /// Attaches every matching advice to a freshly hydrated cube.
    ///
    /// Methods are the columns of the cube's `method` axis when present,
    /// else the literal `run`.
    pub fn apply(&self, app_id: &AppId, cube: &dyn Cube) {
        let advices = self.advices_for(app_id);
        if advices.is_empty() {
            return;
        }
        let methods: Vec<String> = cube
            .axis(METHOD_AXIS)
            .map_or_else(|| vec![DEFAULT_METHOD.to_string()], |axis| axis.columns);

        for advice in &advices {
            for method in &methods {
                let target = format!("{}.{}()", cube.name(), method);
                if glob::matches(&advice.pattern, &target) {
                    cube.add_advice(advice, method);
                }
            }
        }
    }
}
