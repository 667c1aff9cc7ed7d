use std::collections::BTreeMap;
use std::time::Duration;

use jobmap::core::{ComponentStatus, MapOptions};
use jobmap::Error;
use serde_json::{Value, json};

use crate::fixtures::functions::{DOUBLE, FAIL, SHOUT};
use crate::fixtures::workspace::{PATIENCE, TempWorkspace};

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|v| json!(v)).collect()
}

#[test]
fn zero_timeout_is_not_found_and_positive_timeout_is_timeout() {
    let ws = TempWorkspace::manual();
    let map = ws
        .map(Some("pending"), DOUBLE, ints(&[1]), BTreeMap::new(), &MapOptions::default())
        .unwrap();

    let err = map.get(0, Some(Duration::ZERO)).unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }), "{err:?}");

    let err = map.get(0, Some(Duration::from_millis(20))).unwrap_err();
    match err {
        Error::Timeout { waited, .. } => assert!(waited >= Duration::from_millis(20)),
        other => panic!("expected timeout, got {other:?}"),
    }

    let err = map.wait(Some(Duration::from_millis(10))).unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));

    ws.scheduler.run_pending();
    assert_eq!(map.get(0, Some(Duration::ZERO)).unwrap(), json!(2));
}

#[test]
fn statuses_follow_the_event_log() {
    let ws = TempWorkspace::manual();
    let map = ws
        .map(Some("flow"), DOUBLE, ints(&[1, 2]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    assert_eq!(map.component_statuses().unwrap(), vec![ComponentStatus::Idle; 2]);
    assert!(map.is_active().unwrap());
    assert!(!map.is_done().unwrap());

    ws.scheduler.run_pending();
    assert_eq!(
        map.component_statuses().unwrap(),
        vec![ComponentStatus::Completed; 2]
    );
    let counts = map.status_counts().unwrap();
    assert_eq!(counts.get(ComponentStatus::Completed), 2);
    assert_eq!(counts.total(), 2);
    assert!(map.is_done().unwrap());
    assert!(!map.is_active().unwrap());
    assert_eq!(
        map.status().unwrap(),
        "Map flow (2 components): HELD = 0 | ERRORED = 0 | IDLE = 0 | RUNNING = 0 | COMPLETED = 2"
    );
    assert_eq!(map.runtime().unwrap().len(), 2);
    assert_eq!(map.memory_usage().unwrap(), vec![0, 0]);
}

#[test]
fn evicted_components_return_to_idle() {
    let ws = TempWorkspace::manual();
    let map = ws
        .map(Some("evict"), DOUBLE, ints(&[1]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    assert_eq!(ws.scheduler.evict_pending().unwrap(), 1);
    assert_eq!(map.component_statuses().unwrap(), vec![ComponentStatus::Idle]);
    ws.scheduler.run_pending();
    assert_eq!(map.get(0, PATIENCE).unwrap(), json!(2));
}

#[test]
fn failed_components_are_errored_and_raise_on_get() {
    let ws = TempWorkspace::immediate();
    let map = ws
        .map(Some("boom"), FAIL, ints(&[3]), BTreeMap::new(), &MapOptions::default())
        .unwrap();

    map.wait(PATIENCE).unwrap();
    assert_eq!(map.component_statuses().unwrap(), vec![ComponentStatus::Errored]);

    match map.get(0, PATIENCE).unwrap_err() {
        Error::ComponentError {
            component, report, ..
        } => {
            assert_eq!(component, 0);
            assert!(report.exception_msg.contains("boom on 3"));
            assert!(!report.node.hostname.is_empty());
        }
        other => panic!("expected component error, got {other:?}"),
    }

    let report = map.get_err(0, PATIENCE).unwrap().expect("error report");
    assert!(report.exception_msg.contains("boom on 3"));
    let reports = map.error_reports().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].0, 0);
}

#[test]
fn iteration_continues_past_failed_components() {
    let ws = TempWorkspace::immediate();
    let ok = ws
        .map(Some("ok"), DOUBLE, ints(&[1]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    let bad = ws
        .map(Some("bad"), FAIL, ints(&[1, 2]), BTreeMap::new(), &MapOptions::default())
        .unwrap();

    assert_eq!(ok.get_err(0, PATIENCE).unwrap(), None);
    let items: Vec<_> = bad.iter(PATIENCE).unwrap().collect();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|item| matches!(item, Err(Error::ComponentError { .. }))));
    let items: Vec<_> = bad.iter_as_available(PATIENCE).unwrap().collect();
    assert_eq!(items.len(), 2);
}

#[test]
fn inputs_pair_with_outputs() {
    let ws = TempWorkspace::immediate();
    let map = ws
        .map(Some("pairs"), DOUBLE, ints(&[4, 5]), BTreeMap::new(), &MapOptions::default())
        .unwrap();

    let inputs: Vec<Value> = map
        .iter_inputs()
        .unwrap()
        .map(|args| args.unwrap().positional[0].clone())
        .collect();
    assert_eq!(inputs, ints(&[4, 5]));

    let pairs: Vec<(i64, i64)> = map
        .iter_with_inputs(PATIENCE)
        .unwrap()
        .map(|pair| {
            let (args, out) = pair.unwrap();
            (args.positional[0].as_i64().unwrap(), out.as_i64().unwrap())
        })
        .collect();
    assert_eq!(pairs, vec![(4, 8), (5, 10)]);
}

#[test]
fn out_of_range_and_wrong_shape() {
    let ws = TempWorkspace::immediate();
    let map = ws
        .map(Some("range"), DOUBLE, ints(&[1]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    assert!(matches!(
        map.get(5, PATIENCE).unwrap_err(),
        Error::IndexOutOfRange { index: 5, len: 1 }
    ));
    assert!(matches!(
        map.get_as::<String>(0, PATIENCE).unwrap_err(),
        Error::OutputShape { component: 0, .. }
    ));
}

#[test]
fn job_logs_are_readable() {
    let ws = TempWorkspace::immediate();
    let map = ws
        .map(Some("logs"), SHOUT, ints(&[3]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    assert_eq!(map.stdout(0, PATIENCE).unwrap(), "hello 3\n");
    assert_eq!(map.stderr(0, PATIENCE).unwrap(), "component 0\n");
}

#[test]
fn job_logs_time_out_like_outputs() {
    let ws = TempWorkspace::manual();
    let map = ws
        .map(Some("quiet"), SHOUT, ints(&[3]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    assert!(matches!(
        map.stdout(0, Some(Duration::ZERO)).unwrap_err(),
        Error::NotFound { .. }
    ));
    assert!(matches!(
        map.stderr(0, Some(Duration::from_millis(5))).unwrap_err(),
        Error::Timeout { .. }
    ));
}
