use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::time::Duration;

use jobmap::core::{ComponentStatus, MapOptions, Tag};
use jobmap::Error;
use serde_json::{Value, json};

use crate::fixtures::functions::DOUBLE;
use crate::fixtures::workspace::{PATIENCE, TempWorkspace};

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|v| json!(v)).collect()
}

fn tag(raw: &str) -> Tag {
    Tag::parse(raw).unwrap()
}

#[test]
fn reopened_workspace_resumes_from_the_snapshot() {
    let ws = TempWorkspace::manual();
    let map = ws
        .map(Some("resume"), DOUBLE, ints(&[1, 2]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    assert_eq!(map.component_statuses().unwrap(), vec![ComponentStatus::Idle; 2]);
    assert!(ws.layout().state_path(&tag("resume")).exists());

    ws.scheduler.run_pending();

    let other = ws.reopen();
    let recovered = other.load("resume").unwrap();
    assert_eq!(
        recovered.component_statuses().unwrap(),
        vec![ComponentStatus::Completed; 2]
    );
    assert_eq!(recovered.get(1, Some(Duration::ZERO)).unwrap(), json!(4));
}

#[test]
fn unreadable_snapshot_falls_back_to_replay() {
    let ws = TempWorkspace::immediate();
    let map = ws
        .map(Some("replay"), DOUBLE, ints(&[1, 2, 3]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    map.wait(PATIENCE).unwrap();

    std::fs::write(ws.layout().state_path(&tag("replay")), b"{ not json").unwrap();

    let recovered = ws.reopen().load("replay").unwrap();
    assert_eq!(
        recovered.component_statuses().unwrap(),
        vec![ComponentStatus::Completed; 3]
    );
    assert_eq!(recovered.runtime().unwrap().len(), 3);
}

#[test]
fn cached_components_start_completed() {
    let ws = TempWorkspace::manual();
    let warm = ws
        .map(Some("warm"), DOUBLE, ints(&[1, 2]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    ws.scheduler.run_pending();
    warm.wait(PATIENCE).unwrap();

    let partial = ws
        .map(Some("partial"), DOUBLE, ints(&[1, 2, 3]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    assert_eq!(
        partial.component_statuses().unwrap(),
        vec![
            ComponentStatus::Completed,
            ComponentStatus::Completed,
            ComponentStatus::Idle
        ]
    );

    let recovered = ws.reopen().load("partial").unwrap();
    assert_eq!(
        recovered.component_statuses().unwrap(),
        partial.component_statuses().unwrap()
    );
}

#[test]
fn partial_trailing_record_is_ignored_until_complete() {
    let ws = TempWorkspace::manual();
    let map = ws
        .map(Some("partial-line"), DOUBLE, ints(&[1]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    let log = ws.layout().event_log_path(&tag("partial-line"));

    let mut file = OpenOptions::new().append(true).open(&log).unwrap();
    file.write_all(b"{\"MyType\": \"Exec").unwrap();
    file.flush().unwrap();

    assert_eq!(map.component_statuses().unwrap(), vec![ComponentStatus::Idle]);
}

#[test]
fn corrupt_event_log_is_fatal() {
    let ws = TempWorkspace::immediate();
    ws.map(Some("corrupt"), DOUBLE, ints(&[1]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    let log = ws.layout().event_log_path(&tag("corrupt"));

    let mut file = OpenOptions::new().append(true).open(&log).unwrap();
    file.write_all(b"this is not an event\n").unwrap();

    let err = ws.reopen().load("corrupt").unwrap_err();
    assert!(matches!(err, Error::CorruptEventLog(_)), "{err:?}");
}
