//! End-to-end engine tests over the in-memory driver.

use idxdb_codec::{Key, KeyPath, KeyRange, Value};
use idxdb_core::{
    Config, Database, Direction, Error, Factory, GetAllOptions, Query, ReadyState, Request,
    RequestResult, RequestSource, StoreOptions, TransactionMode, TransactionState,
};
use std::sync::{Arc, Mutex};

fn record(pairs: &[(&str, Value)]) -> Value {
    Value::map(
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect(),
    )
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn number(n: f64) -> Value {
    Value::Number(n)
}

/// Opens a database at `version`, running `upgrade` inside the
/// version-change transaction, and pumps to completion.
fn open_db(
    factory: &Factory,
    name: &str,
    version: u64,
    mut upgrade: impl FnMut(&Database) -> idxdb_core::Result<()> + Send + 'static,
) -> Database {
    let request = factory.open_database(name, Some(version)).unwrap();
    let upgrade_request = request.clone();
    request.on_upgrade_needed(move |_event| {
        if let RequestResult::Database(db) = upgrade_request.result()? {
            upgrade(&db)?;
        }
        Ok(())
    });
    factory.run_until_idle();
    match request.result().unwrap() {
        RequestResult::Database(db) => db,
        other => panic!("open produced {other:?}, error {:?}", request.error()),
    }
}

fn settled(factory: &Factory, request: &Request) -> RequestResult {
    factory.run_until_idle();
    request.result().unwrap()
}

fn item_store(factory: &Factory, name: &str) -> Database {
    open_db(factory, name, 1, |db| {
        db.create_object_store(
            "items",
            StoreOptions::new().key_path(KeyPath::parse_single("id")?),
        )?;
        Ok(())
    })
}

fn put_items(factory: &Factory, db: &Database, items: &[Value]) {
    let tx = db
        .transaction(&["items"], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store("items").unwrap();
    for item in items {
        store.put(item, None).unwrap();
    }
    factory.run_until_idle();
    assert_eq!(tx.state(), TransactionState::Finished);
    assert_eq!(tx.error(), None);
}

// ── Basic put/get ──────────────────────────────────────────────────

#[test]
fn basic_put_get() {
    let factory = Factory::memory();
    let db = item_store(&factory, "D");

    put_items(
        &factory,
        &db,
        &[record(&[("id", number(42.0)), ("name", text("a"))])],
    );

    let tx = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let store = tx.object_store("items").unwrap();
    let get = store.get(number(42.0)).unwrap();
    let count = store.count(None).unwrap();

    match settled(&factory, &get) {
        RequestResult::OptionalValue(Some(value)) => {
            assert_eq!(value.get("id"), Some(&number(42.0)));
            assert_eq!(value.get("name"), Some(&text("a")));
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert!(matches!(count.result().unwrap(), RequestResult::Count(1)));
}

#[test]
fn get_missing_key_yields_none() {
    let factory = Factory::memory();
    let db = item_store(&factory, "D");

    let tx = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let get = tx.object_store("items").unwrap().get(number(7.0)).unwrap();
    assert!(matches!(
        settled(&factory, &get),
        RequestResult::OptionalValue(None)
    ));
}

// ── Auto-increment injection ───────────────────────────────────────

#[test]
fn auto_increment_injects_generated_keys() {
    let factory = Factory::memory();
    let db = open_db(&factory, "D", 1, |db| {
        db.create_object_store(
            "items",
            StoreOptions::new()
                .key_path(KeyPath::parse_single("id")?)
                .auto_increment(true),
        )?;
        Ok(())
    });

    let tx = db
        .transaction(&["items"], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store("items").unwrap();
    let first = store.put(&record(&[("name", text("x"))]), None).unwrap();
    let second = store.put(&record(&[("name", text("y"))]), None).unwrap();
    let explicit = store
        .put(&record(&[("id", number(100.0)), ("name", text("z"))]), None)
        .unwrap();
    let after = store.put(&record(&[("name", text("w"))]), None).unwrap();
    factory.run_until_idle();

    assert!(matches!(first.result().unwrap(), RequestResult::Key(Key::Number(n)) if n == 1.0));
    assert!(matches!(second.result().unwrap(), RequestResult::Key(Key::Number(n)) if n == 2.0));
    assert!(matches!(explicit.result().unwrap(), RequestResult::Key(Key::Number(n)) if n == 100.0));
    assert!(matches!(after.result().unwrap(), RequestResult::Key(Key::Number(n)) if n == 101.0));

    // The generated key was injected into the stored value.
    let tx = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let get = tx.object_store("items").unwrap().get(number(1.0)).unwrap();
    match settled(&factory, &get) {
        RequestResult::OptionalValue(Some(value)) => {
            assert_eq!(value.get("id"), Some(&number(1.0)));
            assert_eq!(value.get("name"), Some(&text("x")));
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn key_generator_exhausts_at_ceiling() {
    const CEILING: f64 = 9_007_199_254_740_992.0; // 2^53

    let factory = Factory::memory();
    let db = open_db(&factory, "D", 1, |db| {
        db.create_object_store(
            "items",
            StoreOptions::new()
                .key_path(KeyPath::parse_single("id")?)
                .auto_increment(true),
        )?;
        Ok(())
    });

    let tx = db
        .transaction(&["items"], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store("items").unwrap();

    // An explicit key at the ceiling pins the generator past it.
    let pin = store
        .put(&record(&[("id", number(CEILING))]), None)
        .unwrap();
    let generated = store.put(&record(&[("name", text("late"))]), None).unwrap();
    generated.on_error(|event| {
        event.prevent_default();
        Ok(())
    });
    factory.run_until_idle();

    assert!(matches!(
        pin.result().unwrap(),
        RequestResult::Key(Key::Number(n)) if n == CEILING
    ));
    assert_eq!(
        generated.error().unwrap().unwrap().name(),
        "ConstraintError"
    );
    assert_eq!(tx.state(), TransactionState::Finished);
    assert_eq!(tx.error(), None);
}

// ── Multi-entry index cursor order ─────────────────────────────────

fn tagged_db(factory: &Factory) -> Database {
    let db = open_db(factory, "tags", 1, |db| {
        let store = db.create_object_store(
            "items",
            StoreOptions::new().key_path(KeyPath::parse_single("id")?),
        )?;
        store.create_index(
            "tags",
            KeyPath::parse_single("tags")?,
            idxdb_core::IndexOptions {
                unique: false,
                multi_entry: true,
            },
        )?;
        Ok(())
    });
    put_items(
        factory,
        &db,
        &[
            record(&[
                ("id", number(1.0)),
                ("tags", Value::Array(vec![text("b"), text("a")])),
            ]),
            record(&[
                ("id", number(2.0)),
                ("tags", Value::Array(vec![text("a"), text("c")])),
            ]),
        ],
    );
    db
}

fn collect_index_cursor(
    factory: &Factory,
    db: &Database,
    direction: Direction,
) -> Vec<(Key, Key)> {
    let tx = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let index = tx.object_store("items").unwrap().index("tags").unwrap();
    let request = index.open_cursor(None, direction).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler_request = request.clone();
    let handler_seen = Arc::clone(&seen);
    request.on_success(move |_event| {
        if let RequestResult::Cursor(Some(cursor)) = handler_request.result()? {
            handler_seen
                .lock()
                .unwrap()
                .push((cursor.key().unwrap(), cursor.primary_key().unwrap()));
            cursor.continue_cursor(None)?;
        }
        Ok(())
    });
    factory.run_until_idle();
    let collected = seen.lock().unwrap().clone();
    collected
}

#[test]
fn multi_entry_cursor_order() {
    let factory = Factory::memory();
    let db = tagged_db(&factory);

    let forward = collect_index_cursor(&factory, &db, Direction::Forward);
    assert_eq!(
        forward,
        vec![
            (Key::Text("a".into()), Key::Number(1.0)),
            (Key::Text("a".into()), Key::Number(2.0)),
            (Key::Text("b".into()), Key::Number(1.0)),
            (Key::Text("c".into()), Key::Number(2.0)),
        ]
    );

    let unique = collect_index_cursor(&factory, &db, Direction::ForwardUnique);
    assert_eq!(
        unique,
        vec![
            (Key::Text("a".into()), Key::Number(1.0)),
            (Key::Text("b".into()), Key::Number(1.0)),
            (Key::Text("c".into()), Key::Number(2.0)),
        ]
    );
}

#[test]
fn reverse_unique_lands_on_smallest_primary() {
    let factory = Factory::memory();
    let db = tagged_db(&factory);

    let reverse = collect_index_cursor(&factory, &db, Direction::Reverse);
    assert_eq!(
        reverse,
        vec![
            (Key::Text("c".into()), Key::Number(2.0)),
            (Key::Text("b".into()), Key::Number(1.0)),
            (Key::Text("a".into()), Key::Number(2.0)),
            (Key::Text("a".into()), Key::Number(1.0)),
        ]
    );

    let reverse_unique = collect_index_cursor(&factory, &db, Direction::ReverseUnique);
    assert_eq!(
        reverse_unique,
        vec![
            (Key::Text("c".into()), Key::Number(2.0)),
            (Key::Text("b".into()), Key::Number(1.0)),
            (Key::Text("a".into()), Key::Number(1.0)),
        ]
    );
}

// ── Abort rollback ─────────────────────────────────────────────────

#[test]
fn abort_rolls_back_writes() {
    let factory = Factory::memory();
    let db = item_store(&factory, "D");

    let tx = db
        .transaction(&["items"], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store("items").unwrap();
    store
        .put(&record(&[("id", number(1.0))]), None)
        .unwrap();
    tx.abort().unwrap();
    factory.run_until_idle();
    assert_eq!(tx.state(), TransactionState::Finished);

    let tx = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let get = tx.object_store("items").unwrap().get(number(1.0)).unwrap();
    assert!(matches!(
        settled(&factory, &get),
        RequestResult::OptionalValue(None)
    ));
}

#[test]
fn abort_fails_pending_requests_before_abort_event() {
    let factory = Factory::memory();
    let db = item_store(&factory, "D");

    let tx = db
        .transaction(&["items"], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store("items").unwrap();
    let put = store.put(&record(&[("id", number(1.0))]), None).unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let error_log = Arc::clone(&log);
    put.on_error(move |event| {
        event.prevent_default();
        error_log.lock().unwrap().push("request-error");
        Ok(())
    });
    let abort_log = Arc::clone(&log);
    tx.on_abort(move |_event| {
        abort_log.lock().unwrap().push("tx-abort");
        Ok(())
    });

    tx.abort().unwrap();
    factory.run_until_idle();

    assert_eq!(*log.lock().unwrap(), vec!["request-error", "tx-abort"]);
    assert_eq!(put.error().unwrap().unwrap().name(), "AbortError");
}

// ── Unique constraints ─────────────────────────────────────────────

fn email_db(factory: &Factory) -> Database {
    open_db(factory, "unique", 1, |db| {
        let store = db.create_object_store(
            "items",
            StoreOptions::new().key_path(KeyPath::parse_single("id")?),
        )?;
        store.create_index(
            "email",
            KeyPath::parse_single("email")?,
            idxdb_core::IndexOptions {
                unique: true,
                multi_entry: false,
            },
        )?;
        Ok(())
    })
}

#[test]
fn unique_index_allows_overwriting_own_row() {
    let factory = Factory::memory();
    let db = email_db(&factory);

    put_items(
        &factory,
        &db,
        &[
            record(&[("id", number(1.0)), ("email", text("a@x"))]),
            record(&[("id", number(2.0)), ("email", text("b@x"))]),
        ],
    );

    // Overwriting a row with its own unique key is fine.
    put_items(
        &factory,
        &db,
        &[record(&[
            ("id", number(1.0)),
            ("email", text("a@x")),
            ("name", text("renamed")),
        ])],
    );
}

#[test]
fn unique_index_collision_aborts_transaction() {
    let factory = Factory::memory();
    let db = email_db(&factory);

    put_items(
        &factory,
        &db,
        &[
            record(&[("id", number(1.0)), ("email", text("a@x"))]),
            record(&[("id", number(2.0)), ("email", text("b@x"))]),
        ],
    );

    let tx = db
        .transaction(&["items"], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store("items").unwrap();
    let collision = store
        .put(&record(&[("id", number(3.0)), ("email", text("b@x"))]), None)
        .unwrap();
    factory.run_until_idle();

    assert_eq!(collision.error().unwrap().unwrap().name(), "ConstraintError");
    assert_eq!(tx.state(), TransactionState::Finished);
    assert_eq!(tx.error().unwrap().name(), "ConstraintError");

    let tx = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let count = tx.object_store("items").unwrap().count(None).unwrap();
    assert!(matches!(
        settled(&factory, &count),
        RequestResult::Count(2)
    ));
}

#[test]
fn prevented_error_event_does_not_abort() {
    let factory = Factory::memory();
    let db = item_store(&factory, "D");

    let tx = db
        .transaction(&["items"], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store("items").unwrap();
    store
        .add(&record(&[("id", number(1.0)), ("v", number(1.0))]), None)
        .unwrap();
    let duplicate = store
        .add(&record(&[("id", number(1.0)), ("v", number(2.0))]), None)
        .unwrap();
    duplicate.on_error(|event| {
        event.prevent_default();
        Ok(())
    });
    factory.run_until_idle();

    assert_eq!(duplicate.error().unwrap().unwrap().name(), "ConstraintError");
    assert_eq!(tx.state(), TransactionState::Finished);
    assert_eq!(tx.error(), None);

    // The first write committed.
    let tx = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let get = tx.object_store("items").unwrap().get(number(1.0)).unwrap();
    match settled(&factory, &get) {
        RequestResult::OptionalValue(Some(value)) => {
            assert_eq!(value.get("v"), Some(&number(1.0)));
        }
        other => panic!("unexpected result {other:?}"),
    }
}

// ── Scheduling ─────────────────────────────────────────────────────

#[test]
fn overlapping_readwrite_transactions_serialize() {
    let factory = Factory::memory();
    let db = item_store(&factory, "D");

    let log = Arc::new(Mutex::new(Vec::new()));

    let t1 = db
        .transaction(&["items"], TransactionMode::ReadWrite)
        .unwrap();
    let t2 = db
        .transaction(&["items"], TransactionMode::ReadWrite)
        .unwrap();

    // Queue t2's request first; start order must still follow creation
    // order.
    let r2 = t2
        .object_store("items")
        .unwrap()
        .put(&record(&[("id", number(2.0))]), None)
        .unwrap();
    let r1 = t1
        .object_store("items")
        .unwrap()
        .put(&record(&[("id", number(1.0))]), None)
        .unwrap();

    for (request, tag) in [(&r1, "r1-success"), (&r2, "r2-success")] {
        let entry_log = Arc::clone(&log);
        request.on_success(move |_| {
            entry_log.lock().unwrap().push(tag);
            Ok(())
        });
    }
    let complete_log = Arc::clone(&log);
    t1.on_complete(move |_| {
        complete_log.lock().unwrap().push("t1-complete");
        Ok(())
    });

    factory.run_until_idle();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["r1-success", "t1-complete", "r2-success"]
    );
}

#[test]
fn readonly_transactions_may_interleave() {
    let factory = Factory::memory();
    let db = item_store(&factory, "D");
    put_items(&factory, &db, &[record(&[("id", number(1.0))])]);

    let t1 = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let t2 = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let r1 = t1.object_store("items").unwrap().count(None).unwrap();
    let r2 = t2.object_store("items").unwrap().count(None).unwrap();
    factory.run_until_idle();

    assert!(matches!(r1.result().unwrap(), RequestResult::Count(1)));
    assert!(matches!(r2.result().unwrap(), RequestResult::Count(1)));
}

#[test]
fn events_fire_in_request_creation_order() {
    let factory = Factory::memory();
    let db = item_store(&factory, "D");

    let tx = db
        .transaction(&["items"], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store("items").unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    for i in 0..4 {
        let request = store
            .put(&record(&[("id", number(f64::from(i)))]), None)
            .unwrap();
        let entry_log = Arc::clone(&log);
        request.on_success(move |_| {
            entry_log.lock().unwrap().push(i);
            Ok(())
        });
    }
    factory.run_until_idle();
    assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3]);
}

// ── Transaction lifecycle ──────────────────────────────────────────

#[test]
fn transaction_deactivates_after_checkpoint() {
    let factory = Factory::memory();
    let db = item_store(&factory, "D");

    let tx = db
        .transaction(&["items"], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store("items").unwrap();
    factory.run_until_idle();

    let result = store.put(&record(&[("id", number(1.0))]), None);
    assert_eq!(
        result.unwrap_err().name(),
        "TransactionInactiveError"
    );
}

#[test]
fn transaction_reactivates_inside_handlers() {
    let factory = Factory::memory();
    let db = item_store(&factory, "D");

    let tx = db
        .transaction(&["items"], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store("items").unwrap();
    let first = store.put(&record(&[("id", number(1.0))]), None).unwrap();

    let chained: Arc<Mutex<Option<Request>>> = Arc::new(Mutex::new(None));
    let handler_store = store.clone();
    let handler_chained = Arc::clone(&chained);
    first.on_success(move |_| {
        let request = handler_store.put(&record(&[("id", number(2.0))]), None)?;
        *handler_chained.lock().unwrap() = Some(request);
        Ok(())
    });
    factory.run_until_idle();

    let chained = chained.lock().unwrap().clone().unwrap();
    assert!(matches!(chained.result().unwrap(), RequestResult::Key(_)));
    assert_eq!(tx.state(), TransactionState::Finished);
    assert_eq!(tx.error(), None);
}

#[test]
fn readonly_transaction_rejects_writes() {
    let factory = Factory::memory();
    let db = item_store(&factory, "D");

    let tx = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let store = tx.object_store("items").unwrap();
    let result = store.put(&record(&[("id", number(1.0))]), None);
    assert_eq!(result.unwrap_err().name(), "ReadOnlyError");
}

#[test]
fn explicit_commit_finishes_early() {
    let factory = Factory::memory();
    let db = item_store(&factory, "D");

    let tx = db
        .transaction(&["items"], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store("items").unwrap();
    store.put(&record(&[("id", number(1.0))]), None).unwrap();
    tx.commit().unwrap();

    // No further operations are accepted.
    assert_eq!(
        store
            .put(&record(&[("id", number(2.0))]), None)
            .unwrap_err()
            .name(),
        "TransactionInactiveError"
    );

    factory.run_until_idle();
    assert_eq!(tx.state(), TransactionState::Finished);

    let tx = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let count = tx.object_store("items").unwrap().count(None).unwrap();
    assert!(matches!(settled(&factory, &count), RequestResult::Count(1)));
}

#[test]
fn unknown_store_and_empty_scope_rejected() {
    let factory = Factory::memory();
    let db = item_store(&factory, "D");

    assert_eq!(
        db.transaction(&["nope"], TransactionMode::ReadOnly)
            .unwrap_err()
            .name(),
        "NotFoundError"
    );
    assert_eq!(
        db.transaction(&[], TransactionMode::ReadOnly)
            .unwrap_err()
            .name(),
        "InvalidAccessError"
    );
    assert_eq!(
        db.transaction(&["items"], TransactionMode::VersionChange)
            .unwrap_err()
            .name(),
        "TypeError"
    );
}

// ── Reads: get_all family ──────────────────────────────────────────

fn seeded(factory: &Factory) -> Database {
    let db = item_store(factory, "seeded");
    put_items(
        factory,
        &db,
        &[
            record(&[("id", number(1.0)), ("name", text("one"))]),
            record(&[("id", number(2.0)), ("name", text("two"))]),
            record(&[("id", number(3.0)), ("name", text("three"))]),
            record(&[("id", number(4.0)), ("name", text("four"))]),
        ],
    );
    db
}

#[test]
fn get_all_respects_range_and_count() {
    let factory = Factory::memory();
    let db = seeded(&factory);

    let tx = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let store = tx.object_store("items").unwrap();

    let range = KeyRange::bound(Key::Number(2.0), Key::Number(4.0), false, false).unwrap();
    let all = store.get_all(Some(range.clone().into()), None).unwrap();
    let capped = store.get_all(Some(range.clone().into()), Some(2)).unwrap();
    let keys = store.get_all_keys(Some(range.into()), None).unwrap();
    factory.run_until_idle();

    match all.result().unwrap() {
        RequestResult::Values(values) => {
            let names: Vec<_> = values
                .iter()
                .map(|v| v.get("name").unwrap().clone())
                .collect();
            assert_eq!(names, vec![text("two"), text("three"), text("four")]);
        }
        other => panic!("unexpected result {other:?}"),
    }
    match capped.result().unwrap() {
        RequestResult::Values(values) => assert_eq!(values.len(), 2),
        other => panic!("unexpected result {other:?}"),
    }
    match keys.result().unwrap() {
        RequestResult::Keys(keys) => {
            assert_eq!(
                keys,
                vec![Key::Number(2.0), Key::Number(3.0), Key::Number(4.0)]
            );
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn get_all_records_supports_direction() {
    let factory = Factory::memory();
    let db = seeded(&factory);

    let tx = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let store = tx.object_store("items").unwrap();
    let request = store
        .get_all_records(GetAllOptions {
            query: None,
            count: Some(2),
            direction: Direction::Reverse,
        })
        .unwrap();

    match settled(&factory, &request) {
        RequestResult::Records(records) => {
            let keys: Vec<_> = records.iter().map(|r| r.primary_key.clone()).collect();
            assert_eq!(keys, vec![Key::Number(4.0), Key::Number(3.0)]);
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn delete_range_and_clear() {
    let factory = Factory::memory();
    let db = seeded(&factory);

    let tx = db
        .transaction(&["items"], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store("items").unwrap();
    store
        .delete(Query::from(
            KeyRange::upper_bound(Key::Number(2.0), false),
        ))
        .unwrap();
    let count = store.count(None).unwrap();
    factory.run_until_idle();
    assert!(matches!(count.result().unwrap(), RequestResult::Count(2)));

    let tx = db
        .transaction(&["items"], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store("items").unwrap();
    store.clear().unwrap();
    let count = store.count(None).unwrap();
    factory.run_until_idle();
    assert!(matches!(count.result().unwrap(), RequestResult::Count(0)));
}

// ── Store cursors ──────────────────────────────────────────────────

#[test]
fn store_cursor_iterates_and_advances() {
    let factory = Factory::memory();
    let db = seeded(&factory);

    let tx = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let store = tx.object_store("items").unwrap();
    let request = store.open_cursor(None, Direction::Forward).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler_request = request.clone();
    let handler_seen = Arc::clone(&seen);
    request.on_success(move |_| {
        if let RequestResult::Cursor(Some(cursor)) = handler_request.result()? {
            handler_seen.lock().unwrap().push(cursor.key().unwrap());
            // Skip every other record.
            cursor.advance(2)?;
        }
        Ok(())
    });
    factory.run_until_idle();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![Key::Number(1.0), Key::Number(3.0)]
    );
}

#[test]
fn store_cursor_continue_to_key() {
    let factory = Factory::memory();
    let db = seeded(&factory);

    let tx = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let store = tx.object_store("items").unwrap();
    let request = store.open_cursor(None, Direction::Forward).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler_request = request.clone();
    let handler_seen = Arc::clone(&seen);
    request.on_success(move |_| {
        if let RequestResult::Cursor(Some(cursor)) = handler_request.result()? {
            let key = cursor.key().unwrap();
            handler_seen.lock().unwrap().push(key.clone());
            if key == Key::Number(1.0) {
                cursor.continue_cursor(Some(&number(4.0)))?;
            } else {
                cursor.continue_cursor(None)?;
            }
        }
        Ok(())
    });
    factory.run_until_idle();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![Key::Number(1.0), Key::Number(4.0)]
    );
}

#[test]
fn cursor_continue_backwards_is_data_error() {
    let factory = Factory::memory();
    let db = seeded(&factory);

    let tx = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let store = tx.object_store("items").unwrap();
    let request = store.open_cursor(None, Direction::Forward).unwrap();

    let outcome = Arc::new(Mutex::new(None));
    let handler_request = request.clone();
    let handler_outcome = Arc::clone(&outcome);
    request.on_success(move |_| {
        if let RequestResult::Cursor(Some(cursor)) = handler_request.result()? {
            *handler_outcome.lock().unwrap() =
                Some(cursor.continue_cursor(Some(&number(0.5))).unwrap_err());
        }
        Ok(())
    });
    factory.run_until_idle();

    assert_eq!(outcome.lock().unwrap().as_ref().unwrap().name(), "DataError");
}

#[test]
fn cursor_update_and_delete() {
    let factory = Factory::memory();
    let db = seeded(&factory);

    let tx = db
        .transaction(&["items"], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store("items").unwrap();
    let request = store.open_cursor(None, Direction::Forward).unwrap();

    let sources = Arc::new(Mutex::new(Vec::new()));
    let handler_request = request.clone();
    let handler_sources = Arc::clone(&sources);
    request.on_success(move |_| {
        if let RequestResult::Cursor(Some(cursor)) = handler_request.result()? {
            match cursor.primary_key().unwrap() {
                Key::Number(n) if n == 1.0 => {
                    let update = cursor.update(&record(&[
                        ("id", number(1.0)),
                        ("name", text("updated")),
                    ]))?;
                    handler_sources.lock().unwrap().push(update.source());
                }
                Key::Number(n) if n == 2.0 => {
                    let delete = cursor.delete()?;
                    handler_sources.lock().unwrap().push(delete.source());
                }
                _ => {}
            }
            cursor.continue_cursor(None)?;
        }
        Ok(())
    });
    factory.run_until_idle();
    assert_eq!(
        *sources.lock().unwrap(),
        vec![RequestSource::Cursor, RequestSource::Cursor]
    );

    let tx = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let store = tx.object_store("items").unwrap();
    let updated = store.get(number(1.0)).unwrap();
    let deleted = store.get(number(2.0)).unwrap();
    factory.run_until_idle();

    match updated.result().unwrap() {
        RequestResult::OptionalValue(Some(value)) => {
            assert_eq!(value.get("name"), Some(&text("updated")));
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert!(matches!(
        deleted.result().unwrap(),
        RequestResult::OptionalValue(None)
    ));
}

#[test]
fn cursor_update_with_mismatched_key_is_data_error() {
    let factory = Factory::memory();
    let db = seeded(&factory);

    let tx = db
        .transaction(&["items"], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store("items").unwrap();
    let request = store.open_cursor(None, Direction::Forward).unwrap();

    let outcome = Arc::new(Mutex::new(None));
    let handler_request = request.clone();
    let handler_outcome = Arc::clone(&outcome);
    request.on_success(move |_| {
        if let RequestResult::Cursor(Some(cursor)) = handler_request.result()? {
            if handler_outcome.lock().unwrap().is_none() {
                *handler_outcome.lock().unwrap() = Some(
                    cursor
                        .update(&record(&[("id", number(99.0))]))
                        .unwrap_err(),
                );
            }
        }
        Ok(())
    });
    factory.run_until_idle();

    assert_eq!(outcome.lock().unwrap().as_ref().unwrap().name(), "DataError");
}

#[test]
fn key_cursor_has_no_value_and_rejects_update() {
    let factory = Factory::memory();
    let db = seeded(&factory);

    let tx = db
        .transaction(&["items"], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store("items").unwrap();
    let request = store.open_key_cursor(None, Direction::Forward).unwrap();

    let outcome = Arc::new(Mutex::new(None));
    let handler_request = request.clone();
    let handler_outcome = Arc::clone(&outcome);
    request.on_success(move |_| {
        if let RequestResult::Cursor(Some(cursor)) = handler_request.result()? {
            assert!(cursor.value().is_none());
            assert!(cursor.key().is_some());
            if handler_outcome.lock().unwrap().is_none() {
                *handler_outcome.lock().unwrap() =
                    Some(cursor.update(&record(&[])).unwrap_err());
            }
        }
        Ok(())
    });
    factory.run_until_idle();

    assert_eq!(
        outcome.lock().unwrap().as_ref().unwrap().name(),
        "InvalidStateError"
    );
}

#[test]
fn index_cursor_continue_primary_key() {
    let factory = Factory::memory();
    let db = tagged_db(&factory);

    let tx = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let index = tx.object_store("items").unwrap().index("tags").unwrap();
    let request = index.open_cursor(None, Direction::Forward).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler_request = request.clone();
    let handler_seen = Arc::clone(&seen);
    request.on_success(move |_| {
        if let RequestResult::Cursor(Some(cursor)) = handler_request.result()? {
            let key = cursor.key().unwrap();
            let primary = cursor.primary_key().unwrap();
            handler_seen.lock().unwrap().push((key.clone(), primary));
            if key == Key::Text("a".into()) {
                // Jump over the rest of the "a" run and over (b, 1).
                cursor.continue_primary_key(&text("c"), &number(1.0))?;
            } else {
                cursor.continue_cursor(None)?;
            }
        }
        Ok(())
    });
    factory.run_until_idle();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (Key::Text("a".into()), Key::Number(1.0)),
            (Key::Text("c".into()), Key::Number(2.0)),
        ]
    );
}

// ── Index reads ────────────────────────────────────────────────────

#[test]
fn index_get_and_count() {
    let factory = Factory::memory();
    let db = tagged_db(&factory);

    let tx = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let index = tx.object_store("items").unwrap().index("tags").unwrap();

    let get = index.get(text("b")).unwrap();
    let get_key = index.get_key(text("a")).unwrap();
    let count = index.count(None).unwrap();
    let missing = index.get(text("zz")).unwrap();
    factory.run_until_idle();

    match get.result().unwrap() {
        RequestResult::OptionalValue(Some(value)) => {
            assert_eq!(value.get("id"), Some(&number(1.0)));
        }
        other => panic!("unexpected result {other:?}"),
    }
    // Smallest primary key for "a".
    assert!(matches!(
        get_key.result().unwrap(),
        RequestResult::OptionalKey(Some(Key::Number(n))) if n == 1.0
    ));
    assert!(matches!(count.result().unwrap(), RequestResult::Count(4)));
    assert!(matches!(
        missing.result().unwrap(),
        RequestResult::OptionalValue(None)
    ));
}

#[test]
fn index_get_all_keys_in_tuple_order() {
    let factory = Factory::memory();
    let db = tagged_db(&factory);

    let tx = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let index = tx.object_store("items").unwrap().index("tags").unwrap();
    let keys = index.get_all_keys(None, None).unwrap();
    factory.run_until_idle();

    match keys.result().unwrap() {
        RequestResult::Keys(keys) => {
            assert_eq!(
                keys,
                vec![
                    Key::Number(1.0),
                    Key::Number(2.0),
                    Key::Number(1.0),
                    Key::Number(2.0),
                ]
            );
        }
        other => panic!("unexpected result {other:?}"),
    }
}

// ── Upgrades, version changes, deletes ─────────────────────────────

#[test]
fn open_without_version_uses_stored_version() {
    let factory = Factory::memory();
    let db = item_store(&factory, "D");
    assert_eq!(db.version(), 1);
    db.close();

    let request = factory.open_database("D", None).unwrap();
    factory.run_until_idle();
    match request.result().unwrap() {
        RequestResult::Database(db) => {
            assert_eq!(db.version(), 1);
            assert_eq!(db.object_store_names(), vec!["items".to_string()]);
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn open_with_lower_version_is_version_error() {
    let factory = Factory::memory();
    let db = open_db(&factory, "D", 3, |_| Ok(()));
    db.close();

    let request = factory.open_database("D", Some(2)).unwrap();
    factory.run_until_idle();
    assert_eq!(request.error().unwrap().unwrap().name(), "VersionError");
}

#[test]
fn open_version_zero_is_type_error() {
    let factory = Factory::memory();
    assert_eq!(
        factory.open_database("D", Some(0)).unwrap_err().name(),
        "TypeError"
    );
}

#[test]
fn upgrade_blocked_until_connection_closes() {
    let factory = Factory::memory();
    let db1 = item_store(&factory, "D");

    let log = Arc::new(Mutex::new(Vec::new()));
    let vc_log = Arc::clone(&log);
    db1.on_version_change(move |event| {
        vc_log
            .lock()
            .unwrap()
            .push(format!("versionchange {:?} -> {:?}", event.old_version, event.new_version));
        Ok(())
    });

    let request = factory.open_database("D", Some(2)).unwrap();
    let blocked_log = Arc::clone(&log);
    request.on_blocked(move |_| {
        blocked_log.lock().unwrap().push("blocked".to_string());
        Ok(())
    });
    factory.run_until_idle();

    assert_eq!(
        *log.lock().unwrap(),
        vec!["versionchange Some(1) -> Some(2)".to_string(), "blocked".to_string()]
    );
    assert_eq!(request.ready_state(), ReadyState::Pending);

    db1.close();
    factory.run_until_idle();
    match request.result().unwrap() {
        RequestResult::Database(db) => assert_eq!(db.version(), 2),
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn version_change_handler_closing_unblocks_immediately() {
    let factory = Factory::memory();
    let db1 = item_store(&factory, "D");

    let closer = db1.clone();
    db1.on_version_change(move |_| {
        closer.close();
        Ok(())
    });

    let request = factory.open_database("D", Some(2)).unwrap();
    let blocked = Arc::new(Mutex::new(false));
    let blocked_flag = Arc::clone(&blocked);
    request.on_blocked(move |_| {
        *blocked_flag.lock().unwrap() = true;
        Ok(())
    });
    factory.run_until_idle();

    assert!(!*blocked.lock().unwrap());
    assert!(matches!(
        request.result().unwrap(),
        RequestResult::Database(_)
    ));
}

#[test]
fn failed_upgrade_reverts_everything() {
    let factory = Factory::memory();

    let request = factory.open_database("D", Some(1)).unwrap();
    let upgrade_request = request.clone();
    request.on_upgrade_needed(move |_| {
        if let RequestResult::Database(db) = upgrade_request.result()? {
            db.create_object_store("tmp", StoreOptions::default())?;
        }
        Err(Error::data("deliberate failure"))
    });
    factory.run_until_idle();

    assert_eq!(request.error().unwrap().unwrap().name(), "AbortError");
    // The database never existed before the upgrade, so it is gone.
    assert!(factory.databases().unwrap().is_empty());

    // A fresh open starts over from version 0.
    let db = item_store(&factory, "D");
    assert_eq!(db.version(), 1);
}

#[test]
fn aborted_upgrade_reverts_metadata_handles() {
    let factory = Factory::memory();
    let db = item_store(&factory, "old_name");
    db.close();

    // Rename "items" and add a store in a failing v2 upgrade.
    let request = factory.open_database("old_name", Some(2)).unwrap();
    let handles: Arc<Mutex<Option<(idxdb_core::ObjectStore, idxdb_core::ObjectStore)>>> =
        Arc::new(Mutex::new(None));
    let upgrade_request = request.clone();
    let upgrade_handles = Arc::clone(&handles);
    request.on_upgrade_needed(move |_| {
        if let RequestResult::Database(db) = upgrade_request.result()? {
            let tx = upgrade_request.transaction().unwrap();
            let renamed = tx.object_store("items")?;
            renamed.rename("renamed")?;
            let created = db.create_object_store("fresh", StoreOptions::default())?;
            *upgrade_handles.lock().unwrap() = Some((renamed, created));
        }
        Err(Error::data("deliberate failure"))
    });
    factory.run_until_idle();

    assert_eq!(request.error().unwrap().unwrap().name(), "AbortError");
    let (renamed, created) = handles.lock().unwrap().clone().unwrap();
    // The rename reverted on the live handle; the created store became a
    // deleted sentinel.
    assert_eq!(renamed.name(), "items");
    assert_eq!(created.index_names().unwrap_err().name(), "InvalidStateError");

    // The stored version is still 1 with the original store.
    assert_eq!(
        factory.databases().unwrap(),
        vec![("old_name".to_string(), 1)]
    );
}

#[test]
fn reopen_at_higher_version_preserves_stores() {
    let factory = Factory::memory();
    let db = item_store(&factory, "D");
    db.close();

    let db = open_db(&factory, "D", 2, |db| {
        assert_eq!(db.object_store_names(), vec!["items".to_string()]);
        Ok(())
    });
    assert_eq!(db.version(), 2);
    assert_eq!(db.object_store_names(), vec!["items".to_string()]);
}

#[test]
fn delete_database_removes_data_and_reports_versions() {
    let factory = Factory::memory();
    let db = item_store(&factory, "D");
    put_items(&factory, &db, &[record(&[("id", number(1.0))])]);
    db.close();

    let request = factory.delete_database("D");
    let versions = Arc::new(Mutex::new(None));
    let handler_versions = Arc::clone(&versions);
    request.on_success(move |event| {
        *handler_versions.lock().unwrap() = Some((event.old_version, event.new_version));
        Ok(())
    });
    factory.run_until_idle();

    assert_eq!(*versions.lock().unwrap(), Some((Some(1), None)));
    assert!(factory.databases().unwrap().is_empty());
}

#[test]
fn schema_changes_require_version_change_transaction() {
    let factory = Factory::memory();
    let db = item_store(&factory, "D");

    assert_eq!(
        db.create_object_store("more", StoreOptions::default())
            .unwrap_err()
            .name(),
        "InvalidStateError"
    );
    assert_eq!(
        db.delete_object_store("items").unwrap_err().name(),
        "InvalidStateError"
    );

    let tx = db
        .transaction(&["items"], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store("items").unwrap();
    assert_eq!(store.rename("other").unwrap_err().name(), "InvalidStateError");
    assert_eq!(
        store
            .create_index("i", KeyPath::parse_single("x").unwrap(), Default::default())
            .unwrap_err()
            .name(),
        "InvalidStateError"
    );
}

#[test]
fn index_access_after_finish_is_invalid_state() {
    let factory = Factory::memory();
    let db = tagged_db(&factory);

    let tx = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let store = tx.object_store("items").unwrap();
    factory.run_until_idle();
    assert_eq!(tx.state(), TransactionState::Finished);

    // Not TransactionInactiveError: handle access keeps the stricter
    // error after the transaction finished.
    assert_eq!(store.index("tags").unwrap_err().name(), "InvalidStateError");
    assert_eq!(
        tx.object_store("items").unwrap_err().name(),
        "InvalidStateError"
    );
}

#[test]
fn create_index_backfills_and_unique_violation_aborts() {
    let factory = Factory::memory();
    let db = item_store(&factory, "D");
    put_items(
        &factory,
        &db,
        &[
            record(&[("id", number(1.0)), ("email", text("same@x"))]),
            record(&[("id", number(2.0)), ("email", text("same@x"))]),
        ],
    );
    db.close();

    let db = open_db(&factory, "D", 2, |db| {
        db.create_object_store("ignored", StoreOptions::default())?;
        Ok(())
    });
    db.close();

    let request = factory.open_database("D", Some(3)).unwrap();
    let upgrade_request = request.clone();
    request.on_upgrade_needed(move |_| {
        let tx = upgrade_request.transaction().unwrap();
        let store = tx.object_store("items")?;
        store.create_index(
            "email",
            KeyPath::parse_single("email")?,
            idxdb_core::IndexOptions {
                unique: true,
                multi_entry: false,
            },
        )?;
        Ok(())
    });
    factory.run_until_idle();

    // The duplicate emails make the unique back-population fail and the
    // upgrade abort.
    assert_eq!(request.error().unwrap().unwrap().name(), "AbortError");
    assert_eq!(factory.databases().unwrap(), vec![("D".to_string(), 2)]);
}

#[test]
fn engine_persists_over_sqlite_driver() {
    let dir = tempfile::tempdir().unwrap();

    {
        let factory = Factory::open(Config::new().storage_path(dir.path())).unwrap();
        let db = item_store(&factory, "persistent");
        put_items(
            &factory,
            &db,
            &[record(&[("id", number(1.0)), ("name", text("solid"))])],
        );
        db.close();
    }

    // A fresh factory over the same directory sees the schema and data.
    let factory = Factory::open(Config::new().storage_path(dir.path())).unwrap();
    assert_eq!(
        factory.databases().unwrap(),
        vec![("persistent".to_string(), 1)]
    );

    let db = open_db(&factory, "persistent", 1, |_| Ok(()));
    assert_eq!(db.object_store_names(), vec!["items".to_string()]);

    let tx = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let get = tx.object_store("items").unwrap().get(number(1.0)).unwrap();
    match settled(&factory, &get) {
        RequestResult::OptionalValue(Some(value)) => {
            assert_eq!(value.get("name"), Some(&text("solid")));
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn atomic_abort_hides_partial_upgrade() {
    let factory = Factory::memory();
    let db = item_store(&factory, "D");
    put_items(&factory, &db, &[record(&[("id", number(1.0))])]);
    db.close();

    // Aborted v2 upgrade wrote records; none may be visible afterwards.
    let request = factory.open_database("D", Some(2)).unwrap();
    let upgrade_request = request.clone();
    request.on_upgrade_needed(move |_| {
        let tx = upgrade_request.transaction().unwrap();
        let store = tx.object_store("items")?;
        store.put(&record(&[("id", number(99.0))]), None)?;
        tx.abort()?;
        Ok(())
    });
    factory.run_until_idle();
    assert_eq!(request.error().unwrap().unwrap().name(), "AbortError");

    let db = open_db(&factory, "D", 1, |_| Ok(()));
    let tx = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let store = tx.object_store("items").unwrap();
    let count = store.count(None).unwrap();
    let probe = store.get(number(99.0)).unwrap();
    factory.run_until_idle();
    assert!(matches!(count.result().unwrap(), RequestResult::Count(1)));
    assert!(matches!(
        probe.result().unwrap(),
        RequestResult::OptionalValue(None)
    ));
}
