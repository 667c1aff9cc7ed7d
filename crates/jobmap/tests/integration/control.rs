use std::collections::BTreeMap;
use std::time::Duration;

use jobmap::core::{ComponentStatus, MapOptions};
use jobmap::{BlobKind, Error, RerunOutcome, Result, RunMode};
use serde_json::{Value, json};

use crate::fixtures::functions::{DOUBLE, FAIL, FLAKY};
use crate::fixtures::workspace::{PATIENCE, TempWorkspace};

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|v| json!(v)).collect()
}

fn was_removed<T>(result: Result<T>) -> bool {
    matches!(result, Err(Error::MapWasRemoved { .. }))
}

#[test]
fn held_components_fail_fast() {
    let ws = TempWorkspace::manual();
    let map = ws
        .map(Some("held"), DOUBLE, ints(&[1, 2]), BTreeMap::new(), &MapOptions::default())
        .unwrap();

    let ack = map.hold().unwrap();
    assert_eq!((ack.matched, ack.affected), (2, 2));
    assert_eq!(map.component_statuses().unwrap(), vec![ComponentStatus::Held; 2]);

    match map.get(0, None).unwrap_err() {
        Error::ComponentHeld { component, hold, .. } => {
            assert_eq!(component, 0);
            assert_eq!(hold.reason, "held by user");
        }
        other => panic!("expected held error, got {other:?}"),
    }
    assert!(matches!(map.wait(None), Err(Error::ComponentHeld { .. })));
    assert!(matches!(
        map.iter_as_available(None).unwrap().next(),
        Some(Err(Error::ComponentHeld { .. }))
    ));

    let holds = map.hold_reasons().unwrap();
    assert_eq!(holds.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
    assert!(map.holds_report().unwrap().contains("held by user"));

    let ack = map.release().unwrap();
    assert_eq!(ack.affected, 2);
    assert!(map.hold_reasons().unwrap().is_empty());
    assert!(map.holds_report().unwrap().starts_with("No components"));
    assert_eq!(map.component_statuses().unwrap(), vec![ComponentStatus::Idle; 2]);

    assert_eq!(ws.scheduler.run_pending(), 2);
    assert_eq!(map.get(1, PATIENCE).unwrap(), json!(4));
}

#[test]
fn pause_only_reaches_running_jobs() {
    let ws = TempWorkspace::manual();
    let map = ws
        .map(Some("pause"), DOUBLE, ints(&[1]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    let ack = map.pause().unwrap();
    assert_eq!((ack.matched, ack.affected), (1, 0));
    let ack = map.resume().unwrap();
    assert_eq!(ack.affected, 0);
}

#[test]
fn rerun_of_a_finished_map_is_a_no_op() {
    let ws = TempWorkspace::immediate();
    let map = ws
        .map(Some("done"), DOUBLE, ints(&[1, 2]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    let before = map.cluster_ids().unwrap();

    assert_eq!(map.rerun(None).unwrap(), RerunOutcome::default());
    assert_eq!(ws.scheduler.submissions(), 1);
    assert_eq!(map.cluster_ids().unwrap(), before);
    assert_eq!(map.get(1, Some(Duration::ZERO)).unwrap(), json!(4));
}

#[test]
fn rerun_replaces_errored_outputs() {
    let ws = TempWorkspace::immediate();
    let map = ws
        .map(Some("flaky"), FLAKY, ints(&[2]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    assert!(matches!(map.get(0, PATIENCE), Err(Error::ComponentError { .. })));

    let outcome = map.rerun(None).unwrap();
    assert!(outcome.cluster.is_some());
    assert_eq!(outcome.components, vec![0]);
    assert_eq!(map.cluster_ids().unwrap().len(), 2);

    assert_eq!(map.get(0, PATIENCE).unwrap(), json!(4));
    assert_eq!(map.component_statuses().unwrap(), vec![ComponentStatus::Completed]);
    assert_eq!(ws.flaky_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[test]
fn rerun_is_unsettled_until_the_new_cluster_reports() {
    let ws = TempWorkspace::lagging(RunMode::Immediate);
    let lagging = ws.lagging.clone().unwrap();
    let map = ws
        .map(Some("lag"), FLAKY, ints(&[2]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    assert!(matches!(map.get(0, PATIENCE), Err(Error::ComponentError { .. })));
    assert!(map.is_done().unwrap());

    lagging.hold_back();
    let outcome = map.rerun(None).unwrap();
    assert_eq!(outcome.components, vec![0]);

    assert!(!map.is_done().unwrap());
    assert!(map.is_active().unwrap());
    assert!(map.error_reports().unwrap().is_empty());
    let brief = Some(Duration::from_millis(50));
    assert!(matches!(map.wait(brief), Err(Error::Timeout { .. })));
    assert!(matches!(map.get(0, brief), Err(Error::Timeout { .. })));
    assert!(matches!(map.get(0, Some(Duration::ZERO)), Err(Error::NotFound { .. })));
    assert!(matches!(
        map.rename("moved", false),
        Err(Error::CannotRenameMap { .. })
    ));

    lagging.deliver();
    assert_eq!(map.get(0, PATIENCE).unwrap(), json!(4));
    assert!(map.is_done().unwrap());
    assert_eq!(map.cluster_ids().unwrap(), ws.scheduler.cluster_ids());
}

#[test]
fn errored_outputs_stay_visible_while_another_map_reruns_them() {
    let ws = TempWorkspace::manual();
    let first = ws
        .map(Some("first"), FAIL, ints(&[7]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    assert_eq!(ws.scheduler.run_pending(), 1);
    let report = first.get_err(0, PATIENCE).unwrap().unwrap();
    assert!(report.exception_msg.contains("boom on 7"), "{report:?}");

    let second = ws
        .map(Some("second"), FAIL, ints(&[7]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    assert_eq!(ws.scheduler.submissions(), 2);
    assert_eq!(second.hashes().unwrap(), first.hashes().unwrap());

    let report = first.get_err(0, Some(Duration::ZERO)).unwrap().unwrap();
    assert!(report.exception_msg.contains("boom on 7"), "{report:?}");
    assert_eq!(first.error_reports().unwrap().len(), 1);
    assert!(matches!(
        second.get(0, Some(Duration::ZERO)),
        Err(Error::NotFound { .. })
    ));
    assert!(second.error_reports().unwrap().is_empty());

    assert_eq!(ws.scheduler.run_pending(), 1);
    match second.get(0, PATIENCE).unwrap_err() {
        Error::ComponentError { report, .. } => assert!(report.exception_msg.contains("boom on 7")),
        other => panic!("expected component error, got {other:?}"),
    }
    let report = first.get_err(0, Some(Duration::ZERO)).unwrap().unwrap();
    assert!(report.exception_msg.contains("boom on 7"), "{report:?}");
}

#[test]
fn rerun_scopes_to_requested_indices() {
    let ws = TempWorkspace::immediate();
    let map = ws
        .map(Some("scoped"), FAIL, ints(&[1, 2, 3]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    map.wait(PATIENCE).unwrap();
    let hashes = map.hashes().unwrap().to_vec();

    let outcome = map.rerun(Some(&[2, 2][..])).unwrap();
    assert_eq!(outcome.components, vec![2]);
    assert!(ws.store().exists(BlobKind::Output, &hashes[0]));
    assert!(ws.store().exists(BlobKind::Output, &hashes[1]));

    let err = map.rerun(Some(&[0, 3][..])).unwrap_err();
    assert!(matches!(err, Error::CannotRerunComponents { .. }));
}

#[test]
fn rerun_requeues_components_still_waiting() {
    let ws = TempWorkspace::manual();
    let map = ws
        .map(Some("queued"), DOUBLE, ints(&[6]), BTreeMap::new(), &MapOptions::default())
        .unwrap();

    let outcome = map.rerun(None).unwrap();
    assert_eq!(outcome.components, vec![0]);
    assert_eq!(ws.scheduler.submissions(), 2);
    assert_eq!(map.component_statuses().unwrap(), vec![ComponentStatus::Idle]);

    assert_eq!(ws.scheduler.run_pending(), 1);
    assert_eq!(map.get(0, PATIENCE).unwrap(), json!(12));
}

#[test]
fn remove_invalidates_the_handle() {
    let ws = TempWorkspace::immediate();
    let map = ws
        .map(Some("gone"), DOUBLE, ints(&[1, 2]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    let hashes = map.hashes().unwrap().to_vec();

    map.remove().unwrap();

    assert!(was_removed(map.get(0, None)));
    assert!(was_removed(map.status()));
    assert!(was_removed(map.wait(None)));
    assert!(was_removed(map.rerun(None)));
    assert!(was_removed(map.iter(None)));
    assert!(was_removed(map.hold()));
    assert!(was_removed(map.remove()));
    assert!(was_removed(map.rename("elsewhere", false)));

    assert!(!ws.layout().maps_dir().join("gone").exists());
    for hash in &hashes {
        assert!(!ws.store().exists(BlobKind::Input, hash));
        assert!(!ws.store().exists(BlobKind::Output, hash));
    }
    assert!(matches!(ws.load("gone"), Err(Error::MapNotFound { .. })));
    assert!(ws.tags().unwrap().is_empty());
}

#[test]
fn remove_keeps_blobs_other_maps_use() {
    let ws = TempWorkspace::immediate();
    let first = ws
        .map(Some("first"), DOUBLE, ints(&[1, 2]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    let second = ws
        .map(Some("second"), DOUBLE, ints(&[2, 3]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    let first_hashes = first.hashes().unwrap().to_vec();

    ws.remove("first").unwrap();
    assert!(was_removed(first.status()));

    assert!(!ws.store().exists(BlobKind::Input, &first_hashes[0]));
    assert!(ws.store().exists(BlobKind::Input, &first_hashes[1]));
    assert!(ws.store().exists(BlobKind::Output, &first_hashes[1]));
    assert_eq!(second.get(0, Some(Duration::ZERO)).unwrap(), json!(4));
}

#[test]
fn remove_stops_queued_jobs() {
    let ws = TempWorkspace::manual();
    let map = ws
        .map(Some("stop"), DOUBLE, ints(&[1]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    map.remove().unwrap();
    assert_eq!(ws.scheduler.run_pending(), 0);
}
