use crate::support::{new_engine, open_db, pump};
use indexeddb_store::{
    cursor_advance, cursor_continue, cursor_continue_primary_key, open_cursor, put, CursorDirection, Database,
    Durability, Error, Key, KeyPath, KeyRange, RequestResult, TxnMode,
};
use serde_json::json;

fn cursor_of(request: &indexeddb_store::Shared<indexeddb_store::Request>) -> indexeddb_store::Shared<indexeddb_store::Cursor> {
    match &request.borrow().result {
        Some(RequestResult::Cursor(cursor, _)) => cursor.clone(),
        other => panic!("expected a cursor result, got {other:?}"),
    }
}

fn row_key(request: &indexeddb_store::Shared<indexeddb_store::Request>) -> Option<Key> {
    match &request.borrow().result {
        Some(RequestResult::Cursor(_, row)) => row.as_ref().map(|r| r.key.clone()),
        Some(RequestResult::CursorRow(row)) => row.as_ref().map(|r| r.key.clone()),
        other => panic!("expected a cursor-shaped result, got {other:?}"),
    }
}

fn seed(engine: &indexeddb_store::Shared<indexeddb_store::Engine>, name: &str) -> indexeddb_store::DatabaseHandle {
    let db = open_db(engine, name, 1, |txn, db, _old, _new| {
        Database::create_object_store(txn, db, "s", None, false).unwrap();
    });
    let txn = Database::begin_transaction(&db, vec!["s".into()], TxnMode::ReadWrite, Durability::Strict);
    for i in 1..=3 {
        put(&txn, &db, "s", json!(i), Some(Key::Number(i as f64))).unwrap();
    }
    pump(engine, name);
    db
}

#[test]
fn forward_cursor_visits_records_in_ascending_key_order() {
    let (_dir, engine) = new_engine();
    let db = seed(&engine, "cursor_forward");

    let txn = Database::begin_transaction(&db, vec!["s".into()], TxnMode::ReadOnly, Durability::Strict);
    let open = open_cursor(&txn, &db, "s", None, KeyRange::unbounded(), CursorDirection::Forward, false).unwrap();
    pump(&engine, "cursor_forward");
    assert_eq!(row_key(&open), Some(Key::Number(1.0)));

    let cursor = cursor_of(&open);
    let next = cursor_continue(&txn, &open, &cursor, None).unwrap();
    pump(&engine, "cursor_forward");
    assert_eq!(row_key(&next), Some(Key::Number(2.0)));

    let next2 = cursor_continue(&txn, &next, &cursor, None).unwrap();
    pump(&engine, "cursor_forward");
    assert_eq!(row_key(&next2), Some(Key::Number(3.0)));

    let exhausted = cursor_continue(&txn, &next2, &cursor, None).unwrap();
    pump(&engine, "cursor_forward");
    assert_eq!(row_key(&exhausted), None);
}

#[test]
fn reverse_cursor_visits_records_in_descending_key_order() {
    let (_dir, engine) = new_engine();
    let db = seed(&engine, "cursor_reverse");

    let txn = Database::begin_transaction(&db, vec!["s".into()], TxnMode::ReadOnly, Durability::Strict);
    let open = open_cursor(&txn, &db, "s", None, KeyRange::unbounded(), CursorDirection::Reverse, false).unwrap();
    pump(&engine, "cursor_reverse");
    assert_eq!(row_key(&open), Some(Key::Number(3.0)));

    let cursor = cursor_of(&open);
    let next = cursor_continue(&txn, &open, &cursor, None).unwrap();
    pump(&engine, "cursor_reverse");
    assert_eq!(row_key(&next), Some(Key::Number(2.0)));
}

#[test]
fn advance_skips_the_given_number_of_records() {
    let (_dir, engine) = new_engine();
    let db = seed(&engine, "cursor_advance");

    let txn = Database::begin_transaction(&db, vec!["s".into()], TxnMode::ReadOnly, Durability::Strict);
    let open = open_cursor(&txn, &db, "s", None, KeyRange::unbounded(), CursorDirection::Forward, false).unwrap();
    pump(&engine, "cursor_advance");
    let cursor = cursor_of(&open);

    let jumped = cursor_advance(&txn, &open, &cursor, 2).unwrap();
    pump(&engine, "cursor_advance");
    assert_eq!(row_key(&jumped), Some(Key::Number(3.0)));
}

#[test]
fn unique_direction_collapses_duplicate_index_keys() {
    let (_dir, engine) = new_engine();
    let db = open_db(&engine, "cursor_unique_index", 1, |txn, db, _old, _new| {
        Database::create_object_store(txn, db, "people", None, false).unwrap();
        Database::create_index(txn, db, "people", "by_group", KeyPath::String("group".into()), false, false).unwrap();
    });

    let txn = Database::begin_transaction(&db, vec!["people".into()], TxnMode::ReadWrite, Durability::Strict);
    put(&txn, &db, "people", json!({"group": "a"}), Some(Key::Number(1.0))).unwrap();
    put(&txn, &db, "people", json!({"group": "a"}), Some(Key::Number(2.0))).unwrap();
    put(&txn, &db, "people", json!({"group": "b"}), Some(Key::Number(3.0))).unwrap();
    pump(&engine, "cursor_unique_index");

    let txn2 = Database::begin_transaction(&db, vec!["people".into()], TxnMode::ReadOnly, Durability::Strict);
    let open = open_cursor(
        &txn2,
        &db,
        "people",
        Some("by_group"),
        KeyRange::unbounded(),
        CursorDirection::ForwardUnique,
        false,
    )
    .unwrap();
    pump(&engine, "cursor_unique_index");
    assert_eq!(row_key(&open), Some(Key::String("a".into())));

    let cursor = cursor_of(&open);
    let next = cursor_continue(&txn2, &open, &cursor, None).unwrap();
    pump(&engine, "cursor_unique_index");
    assert_eq!(row_key(&next), Some(Key::String("b".into())));

    let exhausted = cursor_continue(&txn2, &next, &cursor, None).unwrap();
    pump(&engine, "cursor_unique_index");
    assert_eq!(row_key(&exhausted), None);
}

#[test]
fn continue_primary_key_walks_a_non_unique_index_cursor() {
    let (_dir, engine) = new_engine();
    let db = open_db(&engine, "cursor_continue_pk", 1, |txn, db, _old, _new| {
        Database::create_object_store(txn, db, "people", None, false).unwrap();
        Database::create_index(txn, db, "people", "by_group", KeyPath::String("group".into()), false, false).unwrap();
    });

    let txn = Database::begin_transaction(&db, vec!["people".into()], TxnMode::ReadWrite, Durability::Strict);
    put(&txn, &db, "people", json!({"group": "a"}), Some(Key::Number(1.0))).unwrap();
    put(&txn, &db, "people", json!({"group": "a"}), Some(Key::Number(2.0))).unwrap();
    put(&txn, &db, "people", json!({"group": "a"}), Some(Key::Number(3.0))).unwrap();
    pump(&engine, "cursor_continue_pk");

    let txn2 = Database::begin_transaction(&db, vec!["people".into()], TxnMode::ReadOnly, Durability::Strict);
    let open = open_cursor(
        &txn2,
        &db,
        "people",
        Some("by_group"),
        KeyRange::unbounded(),
        CursorDirection::Forward,
        false,
    )
    .unwrap();
    pump(&engine, "cursor_continue_pk");
    let cursor = cursor_of(&open);

    // Skip past primary key 1.0 within the same index key "a", landing on 2.0.
    let jumped = cursor_continue_primary_key(&txn2, &open, &cursor, Key::String("a".into()), Key::Number(2.0)).unwrap();
    pump(&engine, "cursor_continue_pk");
    assert_eq!(row_key(&jumped), Some(Key::String("a".into())));
}

#[test]
fn continue_primary_key_is_rejected_on_a_unique_cursor() {
    let (_dir, engine) = new_engine();
    let db = open_db(&engine, "cursor_continue_pk_unique", 1, |txn, db, _old, _new| {
        Database::create_object_store(txn, db, "s", None, false).unwrap();
    });
    let txn = Database::begin_transaction(&db, vec!["s".into()], TxnMode::ReadWrite, Durability::Strict);
    put(&txn, &db, "s", json!("x"), Some(Key::Number(1.0))).unwrap();
    pump(&engine, "cursor_continue_pk_unique");

    let txn2 = Database::begin_transaction(&db, vec!["s".into()], TxnMode::ReadOnly, Durability::Strict);
    let open = open_cursor(&txn2, &db, "s", None, KeyRange::unbounded(), CursorDirection::Forward, false).unwrap();
    pump(&engine, "cursor_continue_pk_unique");
    let cursor = cursor_of(&open);

    let rejected = cursor_continue_primary_key(&txn2, &open, &cursor, Key::Number(1.0), Key::Number(1.0)).unwrap();
    pump(&engine, "cursor_continue_pk_unique");
    assert!(matches!(rejected.borrow().error, Some(Error::InvalidAccess(_))));
}

#[test]
fn multi_entry_index_cursor_visits_one_row_per_tag() {
    let (_dir, engine) = new_engine();
    let db = open_db(&engine, "cursor_multi_entry", 1, |txn, db, _old, _new| {
        Database::create_object_store(txn, db, "posts", None, false).unwrap();
        Database::create_index(txn, db, "posts", "by_tag", KeyPath::String("tags".into()), false, true).unwrap();
    });

    let txn = Database::begin_transaction(&db, vec!["posts".into()], TxnMode::ReadWrite, Durability::Strict);
    put(&txn, &db, "posts", json!({"tags": ["x", "y"]}), Some(Key::Number(1.0))).unwrap();
    pump(&engine, "cursor_multi_entry");

    let txn2 = Database::begin_transaction(&db, vec!["posts".into()], TxnMode::ReadOnly, Durability::Strict);
    let open = open_cursor(
        &txn2,
        &db,
        "posts",
        Some("by_tag"),
        KeyRange::unbounded(),
        CursorDirection::Forward,
        false,
    )
    .unwrap();
    pump(&engine, "cursor_multi_entry");
    assert_eq!(row_key(&open), Some(Key::String("x".into())));

    let cursor = cursor_of(&open);
    let next = cursor_continue(&txn2, &open, &cursor, None).unwrap();
    pump(&engine, "cursor_multi_entry");
    assert_eq!(row_key(&next), Some(Key::String("y".into())));
}

#[test]
fn continue_reuses_the_same_request_instead_of_minting_a_new_one() {
    let (_dir, engine) = new_engine();
    let db = seed(&engine, "cursor_reuse");

    let txn = Database::begin_transaction(&db, vec!["s".into()], TxnMode::ReadOnly, Durability::Strict);
    let open = open_cursor(&txn, &db, "s", None, KeyRange::unbounded(), CursorDirection::Forward, false).unwrap();
    pump(&engine, "cursor_reuse");
    let cursor = cursor_of(&open);

    let next = cursor_continue(&txn, &open, &cursor, None).unwrap();
    assert!(
        open.ptr_eq(&next),
        "continue should re-arm and return the same request `openCursor` produced"
    );
}
