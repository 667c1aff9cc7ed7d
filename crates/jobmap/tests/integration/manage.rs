use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use jobmap::core::{ComponentStatus, MapOptions};
use jobmap::{Error, Scheduler, Workspace};
use serde_json::{Value, json};

use crate::fixtures::functions::{DOUBLE, FAIL};
use crate::fixtures::workspace::{TempWorkspace, config};

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|v| json!(v)).collect()
}

#[test]
fn rename_moves_a_finished_map() {
    let ws = TempWorkspace::immediate();
    let old = ws
        .map(Some("old"), DOUBLE, ints(&[1, 2]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    let clusters = old.cluster_ids().unwrap();

    let renamed = old.rename("new", false).unwrap();
    assert!(matches!(old.status(), Err(Error::MapWasRemoved { .. })));
    assert_eq!(renamed.tag().as_str(), "new");
    assert_eq!(renamed.cluster_ids().unwrap(), clusters);
    assert_eq!(
        renamed.component_statuses().unwrap(),
        vec![ComponentStatus::Completed; 2]
    );
    assert_eq!(renamed.get(1, Some(Duration::ZERO)).unwrap(), json!(4));
    assert_eq!(renamed.stdout(0, Some(Duration::ZERO)).unwrap(), "");

    let tags: Vec<String> = ws.tags().unwrap().iter().map(ToString::to_string).collect();
    assert_eq!(tags, vec!["new"]);
    assert!(!ws.layout().maps_dir().join("old").exists());
}

#[test]
fn rename_refuses_active_maps() {
    let ws = TempWorkspace::manual();
    let map = ws
        .map(Some("busy"), DOUBLE, ints(&[1]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    assert!(matches!(
        map.rename("idle", false),
        Err(Error::CannotRenameMap { .. })
    ));
    assert!(matches!(
        map.rename("busy", false),
        Err(Error::CannotRenameMap { .. })
    ));
    assert!(map.status().is_ok());
}

#[test]
fn rename_onto_a_taken_tag_needs_overwrite() {
    let ws = TempWorkspace::immediate();
    let a = ws
        .map(Some("a"), DOUBLE, ints(&[1]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    let b = ws
        .map(Some("b"), DOUBLE, ints(&[5]), BTreeMap::new(), &MapOptions::default())
        .unwrap();

    assert!(matches!(a.rename("b", false), Err(Error::CannotRenameMap { .. })));
    let moved = a.retag("b", true).unwrap();
    assert!(matches!(b.status(), Err(Error::MapWasRemoved { .. })));
    assert_eq!(moved.get(0, Some(Duration::ZERO)).unwrap(), json!(2));
    assert_eq!(ws.tags().unwrap(), vec![moved.tag().clone()]);
}

#[test]
fn clean_removes_finished_maps() {
    let ws = TempWorkspace::manual();
    let done = ws
        .map(Some("done"), DOUBLE, ints(&[1]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    ws.map(Some("waiting"), DOUBLE, ints(&[2]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    ws.scheduler.run_cluster(done.cluster_ids().unwrap()[0]).unwrap();

    let removed = ws.clean(false).unwrap();
    assert_eq!(removed, vec![done.tag().clone()]);
    let remaining: Vec<String> = ws.tags().unwrap().iter().map(ToString::to_string).collect();
    assert_eq!(remaining, vec!["waiting"]);

    assert_eq!(ws.clean(true).unwrap().len(), 1);
    assert!(ws.tags().unwrap().is_empty());
}

#[test]
fn status_table_lists_every_map() {
    let ws = TempWorkspace::immediate();
    ws.map(Some("alpha"), DOUBLE, ints(&[1, 2]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    ws.map(Some("beta"), FAIL, ints(&[1]), BTreeMap::new(), &MapOptions::default())
        .unwrap();

    let table = ws.status_table().unwrap();
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines.len(), 4, "{table}");
    assert!(lines[0].starts_with("Tag"));
    assert!(lines[0].contains("COMPLETED"));
    assert!(lines[2].starts_with("alpha"));
    assert!(lines[3].starts_with("beta"));
}

#[test]
fn one_live_handle_per_tag() {
    let ws = TempWorkspace::immediate();
    let created = ws
        .map(Some("single"), DOUBLE, ints(&[1]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    let loaded = ws.load("single").unwrap();
    assert!(Arc::ptr_eq(&created, &loaded));

    let shared = Workspace::with_registry(
        config(ws.dir.path()),
        Arc::clone(&ws.scheduler) as Arc<dyn Scheduler>,
        Arc::clone(ws.registry()),
    )
    .unwrap();
    assert!(Arc::ptr_eq(&created, &shared.load("single").unwrap()));

    drop((created, loaded));
    assert!(ws.registry().live_tags().is_empty());
    assert_eq!(ws.load("single").unwrap().len(), 1);
}

#[test]
fn loading_unknown_maps_fails() {
    let ws = TempWorkspace::immediate();
    assert!(matches!(ws.load("nope"), Err(Error::MapNotFound { .. })));
    assert!(matches!(ws.remove("nope"), Err(Error::MapNotFound { .. })));
}
