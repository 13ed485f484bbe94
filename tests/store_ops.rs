use crate::support::{new_engine, open_db, pump};
use indexeddb_store::{
    add, clear, count, delete, get, get_all, get_all_keys, get_key, put, Database, Durability, Error, Key, KeyPath,
    Query, RequestResult, TxnMode, TxnState,
};
use serde_json::json;

// Transaction lifecycle edge cases (read-only rejection, finished-transaction
// rejection) live in transaction_ops.rs alongside the rest of the
// active/writable discipline tests.

#[test]
fn put_then_get_round_trips_a_value() {
    let (_dir, engine) = new_engine();
    let db = open_db(&engine, "put_get", 1, |txn, db, _old, _new| {
        Database::create_object_store(txn, db, "things", Some(KeyPath::String("id".into())), false).unwrap();
    });

    let txn = Database::begin_transaction(&db, vec!["things".into()], TxnMode::ReadWrite, Durability::Strict);
    let put_req = put(&txn, &db, "things", json!({"id": 1, "name": "a"}), None).unwrap();
    pump(&engine, "put_get");
    assert_eq!(put_req.borrow().result, Some(RequestResult::Key(Key::Number(1.0))));

    let txn2 = Database::begin_transaction(&db, vec!["things".into()], TxnMode::ReadOnly, Durability::Strict);
    let get_req = get(&txn2, &db, "things", Query::Key(Key::Number(1.0))).unwrap();
    pump(&engine, "put_get");
    match &get_req.borrow().result {
        Some(RequestResult::Value(v)) => assert_eq!(v["name"], "a"),
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn add_rejects_a_duplicate_primary_key() {
    let (_dir, engine) = new_engine();
    let db = open_db(&engine, "add_dup", 1, |txn, db, _old, _new| {
        Database::create_object_store(txn, db, "s", None, false).unwrap();
    });

    let txn = Database::begin_transaction(&db, vec!["s".into()], TxnMode::ReadWrite, Durability::Strict);
    let first = add(&txn, &db, "s", json!("one"), Some(Key::Number(1.0))).unwrap();
    pump(&engine, "add_dup");
    assert!(first.borrow().error.is_none());

    let txn2 = Database::begin_transaction(&db, vec!["s".into()], TxnMode::ReadWrite, Durability::Strict);
    let second = add(&txn2, &db, "s", json!("two"), Some(Key::Number(1.0))).unwrap();
    pump(&engine, "add_dup");
    assert_eq!(second.borrow().error, Some(Error::Constraint(
        "a record already exists for key Number(1.0)".into(),
    )));
}

#[test]
fn auto_increment_generates_sequential_keys_and_injects_them() {
    let (_dir, engine) = new_engine();
    let db = open_db(&engine, "auto_inc", 1, |txn, db, _old, _new| {
        Database::create_object_store(txn, db, "s", Some(KeyPath::String("id".into())), true).unwrap();
    });

    let txn = Database::begin_transaction(&db, vec!["s".into()], TxnMode::ReadWrite, Durability::Strict);
    let r1 = put(&txn, &db, "s", json!({}), None).unwrap();
    let r2 = put(&txn, &db, "s", json!({}), None).unwrap();
    let r3 = put(&txn, &db, "s", json!({}), None).unwrap();
    pump(&engine, "auto_inc");

    assert_eq!(r1.borrow().result, Some(RequestResult::Key(Key::Number(1.0))));
    assert_eq!(r2.borrow().result, Some(RequestResult::Key(Key::Number(2.0))));
    assert_eq!(r3.borrow().result, Some(RequestResult::Key(Key::Number(3.0))));

    let txn2 = Database::begin_transaction(&db, vec!["s".into()], TxnMode::ReadOnly, Durability::Strict);
    let all = get_all(&txn2, &db, "s", Query::Range(indexeddb_store::KeyRange::unbounded()), None).unwrap();
    pump(&engine, "auto_inc");
    match &all.borrow().result {
        Some(RequestResult::Values(values)) => {
            assert_eq!(values.len(), 3);
            assert_eq!(values[0]["id"], 1.0);
        },
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn delete_clear_and_count_on_an_object_store() {
    let (_dir, engine) = new_engine();
    let db = open_db(&engine, "delete_clear", 1, |txn, db, _old, _new| {
        Database::create_object_store(txn, db, "s", None, false).unwrap();
    });

    let txn = Database::begin_transaction(&db, vec!["s".into()], TxnMode::ReadWrite, Durability::Strict);
    for i in 1..=3 {
        put(&txn, &db, "s", json!(i), Some(Key::Number(i as f64))).unwrap();
    }
    pump(&engine, "delete_clear");

    let txn2 = Database::begin_transaction(&db, vec!["s".into()], TxnMode::ReadWrite, Durability::Strict);
    let count_req = count(&txn2, &db, "s", Query::Range(indexeddb_store::KeyRange::unbounded())).unwrap();
    delete(&txn2, &db, "s", Query::Key(Key::Number(2.0))).unwrap();
    pump(&engine, "delete_clear");
    assert_eq!(count_req.borrow().result, Some(RequestResult::Count(3)));

    let txn3 = Database::begin_transaction(&db, vec!["s".into()], TxnMode::ReadOnly, Durability::Strict);
    let keys_req = get_all_keys(&txn3, &db, "s", Query::Range(indexeddb_store::KeyRange::unbounded()), None).unwrap();
    pump(&engine, "delete_clear");
    assert_eq!(
        keys_req.borrow().result,
        Some(RequestResult::Keys(vec![Key::Number(1.0), Key::Number(3.0)]))
    );

    let txn4 = Database::begin_transaction(&db, vec!["s".into()], TxnMode::ReadWrite, Durability::Strict);
    clear(&txn4, &db, "s").unwrap();
    pump(&engine, "delete_clear");

    let txn5 = Database::begin_transaction(&db, vec!["s".into()], TxnMode::ReadOnly, Durability::Strict);
    let empty_key = get_key(&txn5, &db, "s", Query::Key(Key::Number(1.0))).unwrap();
    pump(&engine, "delete_clear");
    assert_eq!(empty_key.borrow().result, Some(RequestResult::None));
}

#[test]
fn unique_index_violation_aborts_the_whole_transaction() {
    let (_dir, engine) = new_engine();
    let db = open_db(&engine, "unique_abort", 1, |txn, db, _old, _new| {
        Database::create_object_store(txn, db, "people", None, false).unwrap();
        Database::create_index(txn, db, "people", "by_name", KeyPath::String("name".into()), true, false).unwrap();
    });

    let txn = Database::begin_transaction(&db, vec!["people".into()], TxnMode::ReadWrite, Durability::Strict);
    let first = add(&txn, &db, "people", json!({"name": "alice"}), Some(Key::Number(1.0))).unwrap();
    let second = add(&txn, &db, "people", json!({"name": "alice"}), Some(Key::Number(2.0))).unwrap();
    pump(&engine, "unique_abort");

    assert!(first.borrow().error.is_none(), "first add should have reported success");
    assert!(matches!(second.borrow().error, Some(Error::Constraint(_))));
    assert_eq!(txn.borrow().state(), TxnState::Finished);

    // The savepoint rolled back, so neither record survives despite the
    // first request having already reported success.
    let txn2 = Database::begin_transaction(&db, vec!["people".into()], TxnMode::ReadOnly, Durability::Strict);
    let count_req = count(&txn2, &db, "people", Query::Range(indexeddb_store::KeyRange::unbounded())).unwrap();
    pump(&engine, "unique_abort");
    assert_eq!(count_req.borrow().result, Some(RequestResult::Count(0)));
}
