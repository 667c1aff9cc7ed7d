use std::collections::BTreeMap;
use std::sync::Arc;

use jobmap::core::{Args, ComponentStatus, FunctionName, MapOptions, OptionsError};
use jobmap::{BlobKind, Config, Error, Scheduler, Workspace};
use serde_json::{Value, json};

use crate::fixtures::functions::{DOUBLE, ECHO, SHOUT};
use crate::fixtures::scheduler::RejectingScheduler;
use crate::fixtures::workspace::{PATIENCE, TempWorkspace, config};

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|v| json!(v)).collect()
}

#[test]
fn double_yields_outputs_in_input_order() {
    let ws = TempWorkspace::immediate();
    let map = ws
        .map(Some("double"), DOUBLE, ints(&[0, 1, 2]), BTreeMap::new(), &MapOptions::default())
        .unwrap();

    let ordered: Vec<Value> = map.iter(PATIENCE).unwrap().map(Result::unwrap).collect();
    assert_eq!(ordered, ints(&[0, 2, 4]));

    let mut available: Vec<i64> = map
        .iter_as_available(PATIENCE)
        .unwrap()
        .map(|v| v.unwrap().as_i64().unwrap())
        .collect();
    available.sort_unstable();
    assert_eq!(available, vec![0, 2, 4]);
}

#[test]
fn background_scheduler_completes_the_map() {
    let ws = TempWorkspace::new(jobmap::RunMode::Background);
    let map = ws
        .map(Some("bg"), DOUBLE, ints(&[3, 4]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    map.wait(PATIENCE).unwrap();
    assert!(map.is_done().unwrap());
    assert_eq!(map.get_as::<i64>(1, PATIENCE).unwrap(), 8);
}

#[test]
fn identical_inputs_are_not_resubmitted() {
    let ws = TempWorkspace::immediate();
    ws.map(Some("first"), DOUBLE, ints(&[5, 6]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    assert_eq!(ws.scheduler.submissions(), 1);

    let second = ws
        .map(Some("second"), DOUBLE, ints(&[5, 6]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    assert_eq!(ws.scheduler.submissions(), 1);
    assert!(second.cluster_ids().unwrap().is_empty());
    assert_eq!(
        second.component_statuses().unwrap(),
        vec![ComponentStatus::Completed; 2]
    );
    assert_eq!(second.get(1, Some(std::time::Duration::ZERO)).unwrap(), json!(12));
}

#[test]
fn same_inputs_under_another_function_run_again() {
    let ws = TempWorkspace::immediate();
    let doubled = ws
        .map(Some("doubled"), DOUBLE, ints(&[5]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    assert_eq!(doubled.get(0, PATIENCE).unwrap(), json!(10));

    let shouted = ws
        .map(Some("shouted"), SHOUT, ints(&[5]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    assert_eq!(ws.scheduler.submissions(), 2);
    assert_ne!(shouted.hashes().unwrap(), doubled.hashes().unwrap());
    assert_eq!(shouted.get(0, PATIENCE).unwrap(), json!(5));
    assert_eq!(shouted.stdout(0, PATIENCE).unwrap(), "hello 5\n");
    assert_eq!(doubled.get(0, Some(std::time::Duration::ZERO)).unwrap(), json!(10));
}

#[test]
fn duplicate_inputs_share_one_job() {
    let ws = TempWorkspace::manual();
    let map = ws
        .map(Some("dups"), DOUBLE, ints(&[7, 7, 8]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    let hashes = map.hashes().unwrap().to_vec();
    assert_eq!(hashes[0], hashes[1]);
    assert_ne!(hashes[0], hashes[2]);

    assert_eq!(ws.scheduler.run_pending(), 2);
    let outputs: Vec<Value> = map.iter(PATIENCE).unwrap().map(Result::unwrap).collect();
    assert_eq!(outputs, ints(&[14, 14, 16]));
}

#[test]
fn starmap_pads_the_shorter_side() {
    let ws = TempWorkspace::immediate();
    let mut kw = BTreeMap::new();
    kw.insert("scale".to_string(), json!(3));
    let map = ws
        .starmap(
            Some("star"),
            ECHO,
            vec![vec![json!(1)], vec![json!(2)]],
            vec![kw],
            &MapOptions::default(),
        )
        .unwrap();
    assert_eq!(
        map.get(0, PATIENCE).unwrap(),
        json!({ "positional": [1], "keyword": { "scale": 3 } })
    );
    assert_eq!(
        map.get(1, PATIENCE).unwrap(),
        json!({ "positional": [2], "keyword": {} })
    );
}

#[test]
fn map_passes_shared_kwargs_to_every_call() {
    let ws = TempWorkspace::immediate();
    let mut kwargs = BTreeMap::new();
    kwargs.insert("unit".to_string(), json!("m"));
    let map = ws
        .map(Some("kw"), ECHO, ints(&[1, 2]), kwargs, &MapOptions::default())
        .unwrap();
    for value in map.iter(PATIENCE).unwrap() {
        assert_eq!(value.unwrap()["keyword"], json!({ "unit": "m" }));
    }
}

#[test]
fn builder_collects_calls() {
    let ws = TempWorkspace::immediate();
    let mut builder = ws.build_map(DOUBLE).tag("built");
    for x in 0..4 {
        builder.call(vec![json!(x)], BTreeMap::new());
    }
    builder.push(Args::single(10));
    assert_eq!(builder.len(), 5);
    let map = builder.submit().unwrap();
    assert_eq!(map.tag().as_str(), "built");
    assert_eq!(map.get(4, PATIENCE).unwrap(), json!(20));
}

#[test]
fn empty_maps_are_rejected() {
    let ws = TempWorkspace::immediate();
    let err = ws
        .map(Some("empty"), DOUBLE, Vec::new(), BTreeMap::new(), &MapOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::EmptyMap));
    assert!(!ws.layout().maps_dir().join("empty").exists());
}

#[test]
fn existing_tags_are_rejected() {
    let ws = TempWorkspace::immediate();
    ws.map(Some("taken"), DOUBLE, ints(&[1]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    let err = ws
        .map(Some("taken"), DOUBLE, ints(&[2]), BTreeMap::new(), &MapOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::MapAlreadyExists { .. }));
}

#[test]
fn invalid_tags_are_rejected() {
    let ws = TempWorkspace::immediate();
    let err = ws
        .map(Some("bad tag"), DOUBLE, ints(&[1]), BTreeMap::new(), &MapOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::Core(_)), "{err:?}");
}

#[test]
fn reserved_and_misaligned_options_are_rejected() {
    let ws = TempWorkspace::immediate();
    let reserved = MapOptions::default().with_fixed("Universe", "vanilla");
    let err = ws
        .map(Some("opts"), DOUBLE, ints(&[1]), BTreeMap::new(), &reserved)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Options(OptionsError::ReservedOptionKeyword { .. })
    ));

    let misaligned = MapOptions::default().with_mapped("color", vec!["red".to_string()]);
    let err = ws
        .map(Some("opts"), DOUBLE, ints(&[1, 2]), BTreeMap::new(), &misaligned)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Options(OptionsError::MisalignedInputData { .. })
    ));
    assert_eq!(ws.scheduler.submissions(), 0);
}

#[test]
fn random_tags_are_assigned_when_none_is_given() {
    let ws = TempWorkspace::immediate();
    let map = ws
        .map(None, DOUBLE, ints(&[1]), BTreeMap::new(), &MapOptions::default())
        .unwrap();
    assert_eq!(map.tag().as_str().matches('-').count(), 2);
    assert_eq!(ws.tags().unwrap(), vec![map.tag().clone()]);
}

#[test]
fn failed_submission_rolls_back() {
    let dir = tempfile::TempDir::new().unwrap();
    let scheduler = Arc::new(RejectingScheduler::default());
    let ws: Workspace = Workspace::open(
        config(dir.path()),
        Arc::clone(&scheduler) as Arc<dyn Scheduler>,
    )
    .unwrap();

    let args = ints(&[1, 2]);
    let err = ws
        .map(Some("doomed"), DOUBLE, args.clone(), BTreeMap::new(), &MapOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::Scheduler(_)));
    assert!(!ws.layout().maps_dir().join("doomed").exists());
    assert!(ws.tags().unwrap().is_empty());
    for value in args {
        let (hash, _) = Args::single(value).encode(&FunctionName::parse(DOUBLE).unwrap()).unwrap();
        assert!(!ws.store().exists(BlobKind::Input, &hash));
    }
}

#[test]
fn submit_defaults_come_from_config() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut cfg: Config = config(dir.path());
    cfg.submit.request_memory = "2GB".to_string();
    let ws = Workspace::open(cfg, Arc::new(RejectingScheduler::default())).unwrap();
    assert_eq!(ws.config().submit.request_memory, "2GB");
}
