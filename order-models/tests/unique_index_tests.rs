//! Unique index behavior with lazy entries resolved through a provider.

use order_core::{IndexError, MaterializeError, OrderError};
use order_models::{
    AddOptions, Dataset, DatasetIndex, Handle, IndexEntry, LazyUniqueObject, Process,
    ProcessIndex, UniqueObject,
};
use order_test_utils::assertions::assert_duplicate;
use order_test_utils::{CountingPlugin, FailingPlugin, TestEnv};
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;

fn dataset(id: u64, name: &str) -> Handle<Dataset> {
    Dataset::new(id, name, Default::default())
        .unwrap()
        .into_handle()
        .unwrap()
}

#[test]
fn test_lazy_entry_resolved_once_and_shared_by_name_and_id() {
    let env = TestEnv::new().unwrap();
    let calls = CountingPlugin::new("order_dataset", json!({"dataset": {"id": 5, "name": "ttbar"}}))
        .register(env.registry())
        .unwrap();

    let mut index = DatasetIndex::new();
    index.add(Dataset::lazy("Run3", "ttbar", 5)).unwrap();
    assert!(index.get_entry("ttbar").unwrap().is_lazy());

    let by_name = index.get("ttbar", env.provider()).unwrap();
    assert_eq!(calls.count(), 1);
    assert_eq!(by_name.id(), 5);
    assert!(!index.get_entry("ttbar").unwrap().is_lazy());

    let by_id = index.get(5u64, env.provider()).unwrap();
    let again = index.get("ttbar", env.provider()).unwrap();
    assert!(by_id.ptr_eq(&by_name));
    assert!(again.ptr_eq(&by_name));
    assert_eq!(calls.count(), 1);
    assert_eq!(index.lazy_count(), 0);
}

#[test]
fn test_resolved_entry_keeps_its_position() {
    let env = TestEnv::new().unwrap();
    CountingPlugin::new("order_dataset", json!({"dataset": {"id": 2, "name": "b"}}))
        .register(env.registry())
        .unwrap();

    let mut index = DatasetIndex::new();
    index.add(dataset(1, "a")).unwrap();
    index.add(Dataset::lazy("Run3", "b", 2)).unwrap();
    index.add(dataset(3, "c")).unwrap();

    index.get("b", env.provider()).unwrap();
    assert_eq!(index.names(), vec!["a", "b", "c"]);
    assert_eq!(index.position(2u64), Some(1));
}

#[test]
fn test_identity_mismatch_keeps_placeholder() {
    let env = TestEnv::new().unwrap();
    CountingPlugin::new("order_dataset", json!({"dataset": {"id": 6, "name": "ttbar"}}))
        .register(env.registry())
        .unwrap();

    let mut index = DatasetIndex::new();
    index.add(Dataset::lazy("Run3", "ttbar", 5)).unwrap();

    let result = index.get("ttbar", env.provider());
    assert!(matches!(
        result,
        Err(OrderError::Materialize(MaterializeError::IdentityMismatch { found_id: 6, .. }))
    ));
    assert!(index.get_entry("ttbar").unwrap().is_lazy());
}

#[test]
fn test_failed_resolution_can_be_retried() {
    let env = TestEnv::new().unwrap();
    let calls = CountingPlugin::new("order_dataset", json!({"dataset": {"id": 5, "name": "ttbar"}}))
        .failing_first(1)
        .register(env.registry())
        .unwrap();

    let mut index = DatasetIndex::new();
    index.add(Dataset::lazy("Run3", "ttbar", 5)).unwrap();
    assert!(index.get("ttbar", env.provider()).is_err());
    assert!(index.get_entry(5u64).unwrap().is_lazy());

    assert_eq!(index.get("ttbar", env.provider()).unwrap().name(), "ttbar");
    assert_eq!(calls.count(), 2);
}

#[test]
fn test_plugin_failure_is_reported() {
    let env = TestEnv::new().unwrap();
    let calls = FailingPlugin::new("order_dataset").register(env.registry()).unwrap();

    let mut index = DatasetIndex::new();
    index.add(Dataset::lazy("Run3", "ttbar", 5)).unwrap();
    assert!(index.find("ttbar", env.provider()).is_err());
    assert_eq!(index.find("missing", env.provider()).unwrap().map(|h| h.id()), None);
    assert_eq!(calls.count(), 1);
}

#[test]
fn test_lazy_entry_of_wrong_type_rejected() {
    let mut index = DatasetIndex::new();
    let result = index.add(Process::lazy("tt", 1));
    assert!(matches!(
        result,
        Err(OrderError::Index(IndexError::TypeMismatch { .. }))
    ));
    assert!(index.is_empty());
}

#[test]
fn test_duplicates_rejected_between_lazy_and_concrete() {
    let mut index = DatasetIndex::new();
    index.add(Dataset::lazy("Run3", "ttbar", 5)).unwrap();

    assert_duplicate(&index.add(dataset(5, "other")));
    assert_duplicate(&index.add(dataset(9, "ttbar")));
    assert_eq!(index.len(), 1);
}

#[test]
fn test_overwrite_removes_every_colliding_entry() {
    let removed = Rc::new(RefCell::new(Vec::new()));
    let added = Rc::new(RefCell::new(Vec::new()));

    let mut index = DatasetIndex::new();
    let log = Rc::clone(&removed);
    index.set_on_remove(move |entry| {
        log.borrow_mut().push(entry.name().to_string());
        Ok(())
    });
    let log = Rc::clone(&added);
    index.set_on_add(move |entry| {
        log.borrow_mut().push(entry.name().to_string());
        Ok(())
    });

    index.add(dataset(1, "a")).unwrap();
    index.add(dataset(2, "b")).unwrap();
    index
        .add_with(dataset(2, "a"), AddOptions::overwrite())
        .unwrap();

    assert_eq!(index.keys(), vec![("a".to_string(), 2)]);
    assert_eq!(*removed.borrow(), vec!["a", "b"]);
    assert_eq!(*added.borrow(), vec!["a", "b", "a"]);
}

#[test]
fn test_skip_callback_suppresses_hooks() {
    let count = Rc::new(RefCell::new(0));
    let mut index = DatasetIndex::new();
    let hits = Rc::clone(&count);
    index.set_on_add(move |_| {
        *hits.borrow_mut() += 1;
        Ok(())
    });

    index.add_with(dataset(1, "a"), AddOptions::paired()).unwrap();
    index.add(dataset(2, "b")).unwrap();
    assert_eq!(*count.borrow(), 1);
}

#[test]
fn test_failing_callback_is_propagated() {
    let mut index = DatasetIndex::new();
    index.set_on_add(|entry| {
        Err(IndexError::NotFound {
            type_name: "Dataset".to_string(),
            key: entry.name().to_string(),
        }
        .into())
    });
    assert!(index.add(dataset(1, "a")).is_err());
}

#[test]
fn test_objects_resolves_everything_in_order() {
    let env = TestEnv::new().unwrap();
    let calls = CountingPlugin::with_responder("order_process", |arguments| {
        let name = arguments["process_name"].as_str().unwrap_or_default().to_string();
        let id = if name == "dy" { 2 } else { 3 };
        json!({"process": {"id": id, "name": name}})
    })
    .register(env.registry())
    .unwrap();

    let mut index = ProcessIndex::new();
    index.add(Process::new(1, "tt").unwrap().into_handle().unwrap()).unwrap();
    index.add(Process::lazy("dy", 2)).unwrap();
    index.add(Process::lazy("ww", 3)).unwrap();

    let names: Vec<String> = index
        .iter(env.provider())
        .unwrap()
        .map(|p| p.name().to_string())
        .collect();
    assert_eq!(names, vec!["tt", "dy", "ww"]);
    assert_eq!(calls.count(), 2);
    assert_eq!(index.get_last(env.provider()).unwrap().id(), 3);
    assert_eq!(index.get_first(env.provider()).unwrap().id(), 1);
}

#[test]
fn test_raw_lazy_entry_with_explicit_descriptor() {
    let env = TestEnv::new().unwrap();
    CountingPlugin::new("custom_source", json!({"payload": {"id": 8, "name": "qcd"}}))
        .register(env.registry())
        .unwrap();

    let entry = IndexEntry::<Process>::from_raw(
        json!({
            "class_name": "Process",
            "id": 8,
            "name": "qcd",
            "adapter": {"adapter": "custom_source", "key": "payload", "arguments": {}},
        }),
        |name, id| Process::lazy(name, id),
    )
    .unwrap();

    let IndexEntry::Lazy(lazy) = &entry else {
        panic!("expected a lazy entry");
    };
    assert_eq!(
        lazy,
        &LazyUniqueObject::new(
            "Process",
            8,
            "qcd",
            order_core::FetchDescriptor::new("custom_source", "payload"),
        )
    );

    let mut index = ProcessIndex::new();
    index.add(entry).unwrap();
    assert_eq!(index.get(8u64, env.provider()).unwrap().name(), "qcd");
}
