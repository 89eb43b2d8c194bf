use serde_json::{json, Value};
use sovran_store::{
    KeySerializer, RawKey, Reentrancy, Shape, StoreConfig, StoreError, StoreId, StoreManager,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

type Calls = Arc<Mutex<Vec<String>>>;

fn recorder() -> Calls {
    Arc::new(Mutex::new(Vec::new()))
}

#[test]
fn test_scores_scenario() -> Result<(), StoreError> {
    let manager = StoreManager::new();
    let scores = manager.register_keyed::<i64>()?;
    manager.finish_setup()?;

    scores.set(&manager, "alice", 10)?;
    scores.set(&manager, "bob", 5)?;
    let expected: BTreeMap<String, i64> =
        [("alice".to_string(), 10), ("bob".to_string(), 5)].into();
    assert_eq!(scores.get_all(&manager)?, expected);

    scores.clear(&manager, "alice")?;
    let expected: BTreeMap<String, i64> = [("bob".to_string(), 5)].into();
    assert_eq!(scores.get_all(&manager)?, expected);
    assert_eq!(manager.get(scores.id(), None)?, Some(json!({"bob": 5})));

    Ok(())
}

#[test]
fn test_set_get_and_clear() -> Result<(), StoreError> {
    let manager = StoreManager::new();
    let theme = manager.register_scalar::<String>()?;
    let flags = manager.register_keyed::<bool>()?;

    assert_eq!(theme.get(&manager)?, None);
    theme.set(&manager, "dark".to_string())?;
    assert_eq!(theme.get(&manager)?, Some("dark".to_string()));
    theme.clear(&manager)?;
    assert_eq!(theme.get(&manager)?, None);

    flags.set(&manager, "auto_pickup", true)?;
    flags.set(&manager, "alerts", false)?;
    assert_eq!(flags.get(&manager, "auto_pickup")?, Some(true));
    flags.clear_all(&manager)?;
    assert!(flags.get_all(&manager)?.is_empty());

    Ok(())
}

#[test]
fn test_invalid_store_ids() {
    let manager = StoreManager::new();
    manager.register(Shape::Scalar, None).unwrap();

    for raw in [0, 2, 99] {
        let result = manager.get(StoreId::new(raw), None);
        assert!(matches!(result, Err(StoreError::InvalidStore(r)) if r == raw));
    }
    assert!(matches!(
        manager.set(StoreId::new(5), None, json!(1)),
        Err(StoreError::InvalidStore(5))
    ));
    assert!(matches!(
        manager.watch(StoreId::new(0), |_, _, _| Ok(())),
        Err(StoreError::InvalidStore(0))
    ));
}

#[test]
fn test_validate_keys() -> Result<(), StoreError> {
    let manager = StoreManager::new();
    let plain = manager.register(Shape::Keyed, None)?;
    let serialized = manager.register(
        Shape::Keyed,
        Some(KeySerializer::new(|index: &u32| {
            if *index == 0 {
                Err("player index 0 is reserved")
            } else {
                Ok(format!("player-{}", index))
            }
        })),
    )?;

    assert_eq!(manager.validate(plain, None)?, None);
    assert_eq!(
        manager.validate(plain, Some(RawKey::Str("alice")))?,
        Some("alice".to_string())
    );
    assert!(matches!(
        manager.validate(plain, Some(RawKey::Other(&3u32))),
        Err(StoreError::InvalidKey { .. })
    ));

    assert_eq!(
        manager.validate(serialized, Some(RawKey::Other(&3u32)))?,
        Some("player-3".to_string())
    );
    // Strings never reach the serializer.
    assert_eq!(
        manager.validate(serialized, Some(RawKey::Str("raw")))?,
        Some("raw".to_string())
    );
    match manager.validate(serialized, Some(RawKey::Other(&0u32))) {
        Err(StoreError::Serializer { cause, .. }) => assert!(cause.contains("reserved")),
        other => panic!("expected serializer error, got {:?}", other),
    }
    assert!(matches!(
        manager.validate(serialized, Some(RawKey::Other(&"wrong type"))),
        Err(StoreError::Serializer { .. })
    ));

    Ok(())
}

#[test]
fn test_validation_failures_write_nothing() -> Result<(), StoreError> {
    let manager = StoreManager::new();
    let store = manager.register(Shape::Keyed, None)?;
    let calls = recorder();
    let log = Arc::clone(&calls);
    manager.watch(store, move |_, _, _| {
        log.lock().unwrap().push("called".to_string());
        Ok(())
    })?;

    assert!(manager
        .set(store, Some(RawKey::Other(&1u8)), json!(true))
        .is_err());
    assert!(manager.snapshot()?.is_empty());
    assert!(calls.lock().unwrap().is_empty());
    Ok(())
}

#[test]
fn test_watchers_run_in_registration_order() -> Result<(), StoreError> {
    let manager = StoreManager::new();
    let store = manager.register(Shape::Keyed, None)?;
    let calls = recorder();

    for name in ["first", "second"] {
        let log = Arc::clone(&calls);
        manager.watch(store, move |_, value, key| {
            let mut log = log.lock().unwrap();
            let value = value.and_then(Value::as_i64).unwrap_or(-1);
            log.push(format!("{} start {} {}", name, value, key.unwrap_or("-")));
            log.push(format!("{} end", name));
            Ok(())
        })?;
    }

    manager.set(store, Some(RawKey::Str("k")), json!(1))?;
    let calls = calls.lock().unwrap();
    assert_eq!(
        *calls,
        vec![
            "first start 1 k",
            "first end",
            "second start 1 k",
            "second end",
        ]
    );
    Ok(())
}

#[test]
fn test_clear_notifies_with_absent_value() -> Result<(), StoreError> {
    let manager = StoreManager::new();
    let store = manager.register(Shape::Scalar, None)?;
    let seen: Arc<Mutex<Vec<Option<Value>>>> = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    manager.watch(store, move |_, value, _| {
        log.lock().unwrap().push(value.cloned());
        Ok(())
    })?;

    manager.set(store, None, json!("x"))?;
    manager.clear(store, None)?;
    assert_eq!(*seen.lock().unwrap(), vec![Some(json!("x")), None]);
    Ok(())
}

#[test]
fn test_failing_watcher_does_not_starve_others() -> Result<(), StoreError> {
    let manager = StoreManager::new();
    let store = manager.register(Shape::Scalar, None)?;
    let calls = recorder();

    manager.watch(store, |_, _, _| Err("first broke".into()))?;
    let log = Arc::clone(&calls);
    manager.watch(store, move |_, _, _| {
        log.lock().unwrap().push("second".to_string());
        Ok(())
    })?;
    manager.watch(store, |_, _, _| Err("third broke".into()))?;

    match manager.set(store, None, json!(1)) {
        Err(StoreError::Watcher { store: failed, failures }) => {
            assert_eq!(failed, store);
            assert_eq!(failures, vec!["first broke", "third broke"]);
        }
        other => panic!("expected watcher error, got {:?}", other),
    }
    assert_eq!(*calls.lock().unwrap(), vec!["second"]);
    // The write itself went through.
    assert_eq!(manager.get(store, None)?, Some(json!(1)));
    Ok(())
}

#[test]
fn test_trigger_runs_watchers_without_writing() -> Result<(), StoreError> {
    let manager = StoreManager::new();
    let store = manager.register(Shape::Keyed, None)?;
    let calls = recorder();
    let log = Arc::clone(&calls);
    manager.watch(store, move |_, value, key| {
        let value = value.and_then(Value::as_i64).unwrap_or(-1);
        log.lock().unwrap().push(format!("{}={}", key.unwrap_or("-"), value));
        Ok(())
    })?;

    manager.trigger(store, Some(RawKey::Str("k")), Some(&json!(7)))?;
    assert_eq!(*calls.lock().unwrap(), vec!["k=7"]);
    assert_eq!(manager.get(store, Some(RawKey::Str("k")))?, None);
    Ok(())
}

#[test]
fn test_unwatch() -> Result<(), StoreError> {
    let manager = StoreManager::new();
    let store = manager.register(Shape::Scalar, None)?;
    let calls = recorder();
    let log = Arc::clone(&calls);
    let watcher = manager.watch(store, move |_, _, _| {
        log.lock().unwrap().push("called".to_string());
        Ok(())
    })?;

    manager.set(store, None, json!(1))?;
    assert!(manager.unwatch(store, watcher)?);
    assert!(!manager.unwatch(store, watcher)?);
    manager.set(store, None, json!(2))?;
    assert_eq!(calls.lock().unwrap().len(), 1);
    Ok(())
}

#[test]
fn test_update_replace_or_mutate() -> Result<(), StoreError> {
    let manager = StoreManager::new();
    let inventory = manager.register_keyed::<Vec<String>>()?;

    inventory.set(&manager, "alice", vec!["iron-plate".to_string()])?;
    inventory.update(&manager, "alice", |items| {
        items?.push("copper-plate".to_string());
        None
    })?;
    assert_eq!(
        inventory.get(&manager, "alice")?,
        Some(vec!["iron-plate".to_string(), "copper-plate".to_string()])
    );

    let replaced = inventory.update(&manager, "alice", |_| Some(Vec::new()))?;
    assert_eq!(replaced, Some(Vec::new()));

    // Nothing to mutate and nothing returned: the key stays absent.
    let missing = inventory.update(&manager, "bob", |_| None)?;
    assert_eq!(missing, None);
    assert_eq!(inventory.get(&manager, "bob")?, None);
    Ok(())
}

#[test]
fn test_map_visits_every_key_once() -> Result<(), StoreError> {
    let manager = StoreManager::new();
    let scores = manager.register_keyed::<i64>()?;
    let calls = recorder();
    let log = Arc::clone(&calls);
    scores.watch(&manager, move |_, value, key| {
        log.lock()
            .unwrap()
            .push(format!("{}={}", key.unwrap_or("-"), value.copied().unwrap_or(0)));
        Ok(())
    })?;

    scores.set(&manager, "alice", 10)?;
    scores.set(&manager, "bob", 5)?;
    scores.set(&manager, "carol", 1)?;
    calls.lock().unwrap().clear();

    let mut visited = Vec::new();
    scores.map(&manager, |key, value| {
        visited.push(key.to_string());
        if key == "bob" {
            *value *= 2;
            None
        } else {
            Some(*value + 1)
        }
    })?;

    assert_eq!(visited, vec!["alice", "bob", "carol"]);
    assert_eq!(*calls.lock().unwrap(), vec!["alice=11", "bob=10", "carol=2"]);
    Ok(())
}

#[test]
fn test_map_rejects_scalar_stores() {
    let manager = StoreManager::new();
    let store = manager.register(Shape::Scalar, None).unwrap();
    assert!(matches!(
        manager.map(store, |_, _| None),
        Err(StoreError::ShapeMismatch { shape: Shape::Scalar, .. })
    ));
}

#[test]
fn test_watchers_may_write_other_stores() -> Result<(), StoreError> {
    let manager = StoreManager::new();
    let source = manager.register_scalar::<u32>()?;
    let mirror = manager.register_scalar::<u32>()?;

    source.watch(&manager, move |manager, value| {
        match value {
            Some(value) => mirror.set(manager, *value * 10)?,
            None => mirror.clear(manager)?,
        }
        Ok(())
    })?;

    source.set(&manager, 4)?;
    assert_eq!(mirror.get(&manager)?, Some(40));
    source.clear(&manager)?;
    assert_eq!(mirror.get(&manager)?, None);
    Ok(())
}

#[test]
fn test_reentrant_writes_are_rejected_by_default() -> Result<(), StoreError> {
    let manager = StoreManager::new();
    let counter = manager.register_scalar::<u32>()?;
    counter.watch(&manager, move |manager, value| {
        // Unconditional self-write would recurse forever.
        counter.set(manager, value.copied().unwrap_or(0) + 1)?;
        Ok(())
    })?;

    match counter.set(&manager, 1) {
        Err(StoreError::Watcher { failures, .. }) => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].contains("mutated from inside its own watchers"));
        }
        other => panic!("expected watcher error, got {:?}", other),
    }
    assert_eq!(counter.get(&manager)?, Some(1));
    Ok(())
}

#[test]
fn test_reentrancy_limit_bounds_recursion() -> Result<(), StoreError> {
    let manager = StoreManager::with_config(StoreConfig {
        reentrancy: Reentrancy::Limit { max_depth: 3 },
        log_watcher_failures: false,
    });
    let counter = manager.register_scalar::<u32>()?;
    counter.watch(&manager, move |manager, value| {
        let next = value.copied().unwrap_or(0) + 1;
        if next <= 3 {
            counter.set(manager, next)?;
        }
        Ok(())
    })?;

    counter.set(&manager, 1)?;
    assert_eq!(counter.get(&manager)?, Some(3));
    Ok(())
}

#[test]
fn test_snapshot_and_attach() -> Result<(), StoreError> {
    let first = StoreManager::new();
    let scores = first.register_keyed::<i64>()?;
    let theme = first.register_scalar::<String>()?;
    scores.set(&first, "alice", 10)?;
    theme.set(&first, "dark".to_string())?;
    let saved = serde_json::to_string(&first.snapshot()?).unwrap();

    // A restarted process registers the same stores in the same order.
    let second = StoreManager::new();
    let scores = second.register_keyed::<i64>()?;
    let theme = second.register_scalar::<String>()?;
    let calls = recorder();
    let log = Arc::clone(&calls);
    scores.watch(&second, move |_, _, _| {
        log.lock().unwrap().push("fired".to_string());
        Ok(())
    })?;

    let previous = second.attach(serde_json::from_str(&saved).unwrap())?;
    assert!(previous.is_empty());
    assert_eq!(scores.get(&second, "alice")?, Some(10));
    assert_eq!(theme.get(&second)?, Some("dark".to_string()));
    assert!(calls.lock().unwrap().is_empty());
    Ok(())
}

#[test]
fn test_attach_rejects_mismatched_shapes() -> Result<(), StoreError> {
    let manager = StoreManager::new();
    let scores = manager.register_keyed::<i64>()?;
    let seen = recorder();
    let log = Arc::clone(&seen);
    scores.watch(&manager, move |_, value, _| {
        log.lock().unwrap().push(format!("{:?}", value));
        Ok(())
    })?;

    let saved = r#"{"1":{"shape":"scalar","data":5}}"#;
    let err = manager.attach(serde_json::from_str(saved).unwrap()).unwrap_err();
    assert!(matches!(
        err,
        StoreError::ShapeMismatch { shape: Shape::Keyed, .. }
    ));

    let unknown = r#"{"9":{"shape":"keyed","data":{"a":1}}}"#;
    assert!(matches!(
        manager.attach(serde_json::from_str(unknown).unwrap()),
        Err(StoreError::InvalidStore(9))
    ));

    // The rejected tables left the current data in place.
    scores.set(&manager, "alice", 10)?;
    assert_eq!(scores.get(&manager, "alice")?, Some(10));
    assert_eq!(*seen.lock().unwrap(), vec!["Some(10)".to_string()]);
    Ok(())
}

#[test]
fn test_other_threads_are_not_reentrant() -> Result<(), StoreError> {
    let manager = Arc::new(StoreManager::new());
    let store = manager.register(Shape::Scalar, None)?;
    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    {
        let entered = Arc::clone(&entered);
        let release = Arc::clone(&release);
        manager.watch(store, move |_, value, _| {
            // Only the first write parks inside its watcher.
            if value == Some(&json!(1)) {
                entered.wait();
                release.wait();
            }
            Ok(())
        })?;
    }

    let writer = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || manager.set(store, None, json!(1)))
    };
    entered.wait();
    let concurrent = manager.set(store, None, json!(2));
    release.wait();
    let first = writer.join().unwrap();

    assert!(concurrent.is_ok(), "got {:?}", concurrent);
    assert!(first.is_ok(), "got {:?}", first);
    Ok(())
}
