//! Cell-granular delta processor.

use std::collections::BTreeSet;

use super::{Delta, DeltaKind, DeltaProcessor};
use crate::cube::{Coord, Cube};
use crate::error::Result;

/// Computes deltas cell by cell: two delta sets are compatible when every
/// coordinate touched by both resolves to the same result.
#[derive(Debug, Clone, Copy, Default)]
pub struct CellDeltaProcessor;

impl CellDeltaProcessor {
    /// Creates the processor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn cell_deltas(base: &dyn Cube, target: &dyn Cube) -> Vec<Delta> {
        let base_cells = base.cells();
        let target_cells = target.cells();
        let mut deltas = Vec::new();

        for (coords, value) in &target_cells {
            match base_cells.get(coords) {
                None => deltas.push(Delta {
                    kind: DeltaKind::CellAdd,
                    coords: coords.clone(),
                    value: Some(value.clone()),
                    description: format!("add cell {coords:?} = {value}"),
                }),
                Some(old) if old != value => deltas.push(Delta {
                    kind: DeltaKind::CellUpdate,
                    coords: coords.clone(),
                    value: Some(value.clone()),
                    description: format!("change cell {coords:?}: {old} -> {value}"),
                }),
                Some(_) => {}
            }
        }
        for coords in base_cells.keys() {
            if !target_cells.contains_key(coords) {
                deltas.push(Delta {
                    kind: DeltaKind::CellRemove,
                    coords: coords.clone(),
                    value: None,
                    description: format!("remove cell {coords:?}"),
                });
            }
        }
        deltas
    }

    fn axis_deltas(a: &dyn Cube, b: &dyn Cube) -> Vec<Delta> {
        let ours: BTreeSet<String> = a.axes().into_iter().map(|ax| ax.name.to_lowercase()).collect();
        let theirs: BTreeSet<String> = b.axes().into_iter().map(|ax| ax.name.to_lowercase()).collect();
        ours.symmetric_difference(&theirs)
            .map(|name| Delta {
                kind: DeltaKind::AxisChange,
                coords: Coord::new(),
                value: None,
                description: format!("axis '{name}' exists on only one side"),
            })
            .collect()
    }
}

impl DeltaProcessor for CellDeltaProcessor {
    fn delta(&self, base: &dyn Cube, target: &dyn Cube) -> Vec<Delta> {
        let mut deltas = Self::axis_deltas(base, target);
        deltas.extend(Self::cell_deltas(base, target));
        deltas
    }

    fn are_compatible(&self, ours: &[Delta], theirs: &[Delta], _reverse: bool) -> bool {
        if ours.iter().chain(theirs).any(|d| d.kind == DeltaKind::AxisChange) {
            return false;
        }
        for d in ours {
            for other in theirs {
                if d.coords == other.coords && (d.kind != other.kind || d.value != other.value) {
                    return false;
                }
            }
        }
        true
    }

    fn merge(&self, target: &dyn Cube, deltas: &[Delta]) -> Result<()> {
        for d in deltas {
            match d.kind {
                DeltaKind::CellAdd | DeltaKind::CellUpdate => {
                    if let Some(value) = &d.value {
                        target.set_cell(value.clone(), &d.coords)?;
                    }
                }
                DeltaKind::CellRemove => target.remove_cell(&d.coords)?,
                DeltaKind::AxisChange => {}
            }
        }
        target.clear_sha1();
        Ok(())
    }

    fn describe(&self, a: &dyn Cube, b: &dyn Cube) -> Vec<Delta> {
        self.delta(a, b)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::appid::{AppId, Status};
    use crate::cube::{AxisView, TableCube};

    fn app_id() -> AppId {
        AppId::new("acme", "risk", "1.0.0", Status::Snapshot, "HEAD").unwrap()
    }

    fn grid(name: &str) -> TableCube {
        TableCube::new(name, app_id())
            .with_axis(AxisView::new("row", vec!["1".into(), "2".into()], false))
            .with_axis(AxisView::new("col", vec!["1".into(), "2".into()], false))
    }

    fn coord(row: &str, col: &str) -> Coord {
        Coord::from([("row".to_string(), row.to_string()), ("col".to_string(), col.to_string())])
    }

    #[test]
    fn delta_classifies_add_update_remove() {
        let base = grid("x");
        base.set_cell(json!(10), &coord("1", "1")).unwrap();
        base.set_cell(json!(20), &coord("1", "2")).unwrap();

        let target = grid("x");
        target.set_cell(json!(11), &coord("1", "1")).unwrap();
        target.set_cell(json!(30), &coord("2", "1")).unwrap();

        let processor = CellDeltaProcessor::new();
        let deltas = processor.delta(&base, &target);
        let kinds: Vec<DeltaKind> = deltas.iter().map(|d| d.kind).collect();
        assert!(kinds.contains(&DeltaKind::CellUpdate));
        assert!(kinds.contains(&DeltaKind::CellAdd));
        assert!(kinds.contains(&DeltaKind::CellRemove));
        assert_eq!(deltas.len(), 3);
    }

    #[test]
    fn disjoint_deltas_are_compatible() {
        let base = grid("x");
        base.set_cell(json!(10), &coord("1", "1")).unwrap();

        let ours_cube = grid("x");
        ours_cube.set_cell(json!(10), &coord("1", "1")).unwrap();
        ours_cube.set_cell(json!(20), &coord("1", "2")).unwrap();

        let theirs_cube = grid("x");
        theirs_cube.set_cell(json!(10), &coord("1", "1")).unwrap();
        theirs_cube.set_cell(json!(30), &coord("2", "1")).unwrap();

        let processor = CellDeltaProcessor::new();
        let ours = processor.delta(&base, &ours_cube);
        let theirs = processor.delta(&base, &theirs_cube);
        assert!(processor.are_compatible(&ours, &theirs, false));
    }

    #[test]
    fn same_cell_different_values_conflict() {
        let base = grid("x");
        base.set_cell(json!(10), &coord("1", "1")).unwrap();

        let ours_cube = grid("x");
        ours_cube.set_cell(json!(11), &coord("1", "1")).unwrap();
        let theirs_cube = grid("x");
        theirs_cube.set_cell(json!(12), &coord("1", "1")).unwrap();

        let processor = CellDeltaProcessor::new();
        let ours = processor.delta(&base, &ours_cube);
        let theirs = processor.delta(&base, &theirs_cube);
        assert!(!processor.are_compatible(&ours, &theirs, false));
        assert!(!processor.are_compatible(&ours, &theirs, true));
    }

    #[test]
    fn same_cell_same_value_is_compatible() {
        let base = grid("x");
        let ours_cube = grid("x");
        ours_cube.set_cell(json!(5), &coord("1", "1")).unwrap();
        let theirs_cube = grid("x");
        theirs_cube.set_cell(json!(5), &coord("1", "1")).unwrap();

        let processor = CellDeltaProcessor::new();
        let ours = processor.delta(&base, &ours_cube);
        let theirs = processor.delta(&base, &theirs_cube);
        assert!(processor.are_compatible(&ours, &theirs, false));
    }

    #[test]
    fn merge_applies_head_changes_onto_branch() {
        let base = grid("x");
        base.set_cell(json!(10), &coord("1", "1")).unwrap();

        let branch = grid("x");
        branch.set_cell(json!(10), &coord("1", "1")).unwrap();
        branch.set_cell(json!(20), &coord("1", "2")).unwrap();

        let head = grid("x");
        head.set_cell(json!(10), &coord("1", "1")).unwrap();
        head.set_cell(json!(30), &coord("2", "1")).unwrap();

        let processor = CellDeltaProcessor::new();
        let head_delta = processor.delta(&base, &head);
        processor.merge(&branch, &head_delta).unwrap();

        assert_eq!(branch.cell(&coord("1", "1")), Some(json!(10)));
        assert_eq!(branch.cell(&coord("1", "2")), Some(json!(20)));
        assert_eq!(branch.cell(&coord("2", "1")), Some(json!(30)));
    }

    #[test]
    fn describe_is_empty_for_identical_cubes() {
        let a = grid("x");
        a.set_cell(json!(1), &coord("1", "1")).unwrap();
        let b = grid("x");
        b.set_cell(json!(1), &coord("1", "1")).unwrap();

        let processor = CellDeltaProcessor::new();
        assert!(processor.describe(&a, &b).is_empty());
    }

    #[test]
    fn axis_mismatch_is_never_mergeable() {
        let a = grid("x");
        let b = TableCube::new("x", app_id())
            .with_axis(AxisView::new("row", vec!["1".into()], false));

        let processor = CellDeltaProcessor::new();
        let deltas = processor.delta(&a, &b);
        assert!(deltas.iter().any(|d| d.kind == DeltaKind::AxisChange));
        assert!(!processor.are_compatible(&deltas, &[], false));
    }
}
