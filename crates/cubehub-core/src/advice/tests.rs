//! Tests for advice registration and hydration-time application.

use super::*;
use crate::appid::Status;
use crate::cube::{AxisView, TableCube};

fn app_id() -> AppId {
    AppId::new("acme", "risk", "1.0.0", Status::Snapshot, "HEAD").unwrap()
}

#[test]
fn matching_advice_attaches_on_run_method() {
    let registry = AdviceRegistry::new();
    registry.add(&app_id(), Advice::new("audit", "rates.*"));

    let cube = TableCube::new("rates", app_id());
    registry.apply(&app_id(), &cube);

    let attached = cube.advices();
    assert_eq!(attached.len(), 1);
    assert_eq!(attached[0].0.name, "audit");
    assert_eq!(attached[0].1, "run");
}

#[test]
fn method_axis_columns_fan_out() {
    let registry = AdviceRegistry::new();
    registry.add(&app_id(), Advice::new("trace", "calc.*()"));

    let cube = TableCube::new("calc", app_id()).with_axis(AxisView::new(
        "method",
        vec!["price".into(), "margin".into()],
        false,
    ));
    registry.apply(&app_id(), &cube);

    let methods: Vec<String> = cube.advices().into_iter().map(|(_, m)| m).collect();
    assert_eq!(methods, vec!["price".to_string(), "margin".to_string()]);
}

#[test]
fn non_matching_advice_is_skipped() {
    let registry = AdviceRegistry::new();
    registry.add(&app_id(), Advice::new("audit", "sys.*"));

    let cube = TableCube::new("rates", app_id());
    registry.apply(&app_id(), &cube);
    assert!(cube.advices().is_empty());
}

#[test]
fn registry_is_scoped_per_app_id() {
    let registry = AdviceRegistry::new();
    registry.add(&app_id(), Advice::new("audit", "*"));

    let other = app_id().as_branch("dev");
    assert!(registry.advices_for(&other).is_empty());

    let cube = TableCube::new("rates", app_id());
    registry.apply(&other, &cube);
    assert!(cube.advices().is_empty());
}

#[test]
fn clear_drops_workspace_advices() {
    let registry = AdviceRegistry::new();
    registry.add(&app_id(), Advice::new("audit", "*"));
    registry.clear(&app_id());
    assert!(registry.advices_for(&app_id()).is_empty());
}
