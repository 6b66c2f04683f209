//! Contract tests run against both backends.
//!
//! Every test builds one in-memory and one persistent store driven by the same
//! manual clock and checks that they behave identically.

use std::time::Duration;

use chrono::{TimeDelta, TimeZone, Utc};
use serde_json::json;
use tempfile::{TempDir, tempdir};
use vmtrail::{
    Clock, EventStore, InMemoryEventStore, ManualClock, Payload, PersistentEventStore,
};

fn payload(value: serde_json::Value) -> Payload {
    value.as_object().cloned().unwrap()
}

/// Builds both backends with the given window, sharing one clock.
fn backends(window: Duration) -> (Vec<(&'static str, Box<dyn EventStore>)>, ManualClock, TempDir) {
    let dir = tempdir().unwrap();
    let clock = ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap());

    let memory = InMemoryEventStore::with_clock(window, clock.clone());
    let persistent =
        PersistentEventStore::open_with_clock(dir.path().join("events"), window, clock.clone())
            .unwrap();

    let stores: Vec<(&'static str, Box<dyn EventStore>)> = vec![
        ("memory", Box::new(memory)),
        ("persistent", Box::new(persistent)),
    ];
    (stores, clock, dir)
}

fn put_all(stores: &mut [(&'static str, Box<dyn EventStore>)], value: serde_json::Value) {
    for (_, store) in stores.iter_mut() {
        store.put(payload(value.clone())).unwrap();
    }
}

#[test]
fn test_sixty_second_window_scenario() {
    let (mut stores, clock, _dir) = backends(Duration::from_secs(60));

    put_all(&mut stores, json!({"a": 1}));
    clock.advance(Duration::from_secs(30));
    put_all(&mut stores, json!({"a": 2}));
    clock.advance(Duration::from_secs(31));

    for (name, store) in &mut stores {
        let payloads: Vec<_> = store
            .get(None, None, 10)
            .unwrap()
            .into_iter()
            .map(|e| e.payload)
            .collect();
        assert_eq!(payloads, vec![payload(json!({"a": 2}))], "backend {name}");
    }
}

#[test]
fn test_expire_keeps_only_entries_inside_window() {
    let (mut stores, clock, _dir) = backends(Duration::from_secs(20));

    // Spaced further apart than the window.
    for i in 0..4 {
        put_all(&mut stores, json!({"i": i}));
        clock.advance(Duration::from_secs(25));
    }

    for (name, store) in &mut stores {
        store.expire().unwrap();
        assert!(store.empty().unwrap(), "backend {name}: everything aged out");
    }

    put_all(&mut stores, json!({"i": 4}));
    clock.advance(Duration::from_secs(5));

    let lower = clock.now() - TimeDelta::seconds(20);
    for (name, store) in &mut stores {
        store.expire().unwrap();
        assert!(!store.empty().unwrap(), "backend {name}");
        let events = store.get(None, None, 0).unwrap();
        assert_eq!(events.len(), 1, "backend {name}");
        assert!(events.iter().all(|e| e.timestamp >= lower), "backend {name}");
    }
}

#[test]
fn test_expire_is_idempotent() {
    let (mut stores, clock, _dir) = backends(Duration::from_secs(10));

    for i in 0..6 {
        put_all(&mut stores, json!({"i": i}));
        clock.advance(Duration::from_secs(3));
    }

    for (name, store) in &mut stores {
        let first = store.expire().unwrap();
        let before = store.get(None, None, 0).unwrap();
        let second = store.expire().unwrap();
        let after = store.get(None, None, 0).unwrap();

        assert!(first > 0, "backend {name}: something should have aged out");
        assert_eq!(second, 0, "backend {name}");
        assert_eq!(before, after, "backend {name}");
    }
}

#[test]
fn test_limit_and_ordering() {
    let (mut stores, clock, _dir) = backends(Duration::from_secs(3600));

    for i in 0..30 {
        put_all(&mut stores, json!({"i": i}));
        clock.advance(Duration::from_millis(700));
    }

    for (name, store) in &mut stores {
        for limit in [1, 5, 10, 29] {
            let events = store.get(None, None, limit).unwrap();
            assert_eq!(events.len(), limit, "backend {name}, limit {limit}");
        }

        let all = store.get(None, None, 0).unwrap();
        assert_eq!(all.len(), 30, "backend {name}");
        assert!(
            all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp),
            "backend {name}: results must be non-decreasing"
        );
        let indices: Vec<_> = all.iter().map(|e| e.payload["i"].as_i64().unwrap()).collect();
        assert_eq!(indices, (0..30).collect::<Vec<_>>(), "backend {name}");
    }
}

#[test]
fn test_stop_bound_is_inclusive_everywhere() {
    let (mut stores, clock, _dir) = backends(Duration::from_secs(3600));
    let t0 = clock.now();

    put_all(&mut stores, json!({"i": 0}));
    clock.advance(Duration::from_secs(5));
    let t1 = clock.now();
    put_all(&mut stores, json!({"i": 1}));
    clock.advance(Duration::from_secs(5));
    put_all(&mut stores, json!({"i": 2}));

    for (name, store) in &mut stores {
        // Exactly the instant of the middle event on both ends.
        let events = store.get(Some(t1), Some(t1), 0).unwrap();
        assert_eq!(events.len(), 1, "backend {name}");
        assert_eq!(events[0].payload["i"], 1, "backend {name}");

        let events = store.get(Some(t0), Some(t1), 0).unwrap();
        assert_eq!(events.len(), 2, "backend {name}");
    }
}

#[test]
fn test_sub_second_bounds_are_exact() {
    let (mut stores, clock, _dir) = backends(Duration::from_secs(3600));

    put_all(&mut stores, json!({"i": 0}));
    clock.advance(Duration::from_millis(400));
    let middle = clock.now();
    put_all(&mut stores, json!({"i": 1}));
    clock.advance(Duration::from_millis(400));
    put_all(&mut stores, json!({"i": 2}));

    let just_before = middle - TimeDelta::milliseconds(1);
    let just_after = middle + TimeDelta::milliseconds(1);
    for (name, store) in &mut stores {
        let events = store.get(Some(just_before), Some(just_after), 0).unwrap();
        let indices: Vec<_> = events.iter().map(|e| e.payload["i"].clone()).collect();
        assert_eq!(indices, vec![json!(1)], "backend {name}");
    }
}

#[test]
fn test_empty_ranges_return_nothing() {
    let (mut stores, clock, _dir) = backends(Duration::from_secs(60));
    put_all(&mut stores, json!({"i": 0}));

    let now = clock.now();
    let future = now + TimeDelta::seconds(100);
    for (name, store) in &mut stores {
        assert!(store.get(Some(future), None, 0).unwrap().is_empty(), "backend {name}");
        assert!(store.get(Some(now), Some(now - TimeDelta::seconds(1)), 0).unwrap().is_empty());
    }
}

#[test]
fn test_fresh_store_is_empty() {
    let (mut stores, _clock, _dir) = backends(Duration::from_secs(60));
    for (name, store) in &mut stores {
        assert!(store.empty().unwrap(), "backend {name}");
        assert!(store.get(None, None, 10).unwrap().is_empty(), "backend {name}");
        assert_eq!(store.expire().unwrap(), 0, "backend {name}");
    }
}
