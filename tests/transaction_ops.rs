use crate::support::{new_engine, open_db, pump};
use indexeddb_store::{put, Database, Durability, Error, Key, Phase, TxnMode, TxnState};
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn readonly_transaction_rejects_writes_synchronously() {
    let (_dir, engine) = new_engine();
    let db = open_db(&engine, "readonly_reject", 1, |txn, db, _old, _new| {
        Database::create_object_store(txn, db, "s", None, false).unwrap();
    });

    let txn = Database::begin_transaction(&db, vec!["s".into()], TxnMode::ReadOnly, Durability::Strict);
    let err = put(&txn, &db, "s", json!("x"), Some(Key::Number(1.0))).unwrap_err();
    assert_eq!(err, Error::ReadOnly);
    // The rejection never produced a request, so the transaction is
    // unaffected and still active.
    assert_eq!(txn.borrow().state(), TxnState::Active);
}

#[test]
fn finished_transaction_rejects_further_requests() {
    let (_dir, engine) = new_engine();
    let db = open_db(&engine, "finished_reject", 1, |txn, db, _old, _new| {
        Database::create_object_store(txn, db, "s", None, false).unwrap();
    });

    let txn = Database::begin_transaction(&db, vec!["s".into()], TxnMode::ReadWrite, Durability::Strict);
    put(&txn, &db, "s", json!("x"), Some(Key::Number(1.0))).unwrap();
    pump(&engine, "finished_reject");
    assert_eq!(txn.borrow().state(), TxnState::Finished);

    let err = put(&txn, &db, "s", json!("y"), Some(Key::Number(2.0))).unwrap_err();
    assert_eq!(err, Error::TransactionInactive);
}

#[test]
fn independent_scopes_on_the_same_database_run_concurrently() {
    let (_dir, engine) = new_engine();
    let db = open_db(&engine, "independent_scopes", 1, |txn, db, _old, _new| {
        Database::create_object_store(txn, db, "a", None, false).unwrap();
        Database::create_object_store(txn, db, "b", None, false).unwrap();
    });

    let txn_a = Database::begin_transaction(&db, vec!["a".into()], TxnMode::ReadWrite, Durability::Strict);
    let txn_b = Database::begin_transaction(&db, vec!["b".into()], TxnMode::ReadWrite, Durability::Strict);
    let put_a = put(&txn_a, &db, "a", json!("x"), Some(Key::Number(1.0))).unwrap();
    let put_b = put(&txn_b, &db, "b", json!("y"), Some(Key::Number(1.0))).unwrap();
    pump(&engine, "independent_scopes");

    assert!(put_a.borrow().error.is_none());
    assert!(put_b.borrow().error.is_none());
    assert_eq!(txn_a.borrow().state(), TxnState::Finished);
    assert_eq!(txn_b.borrow().state(), TxnState::Finished);
}

#[test]
fn overlapping_readwrite_scopes_serialize() {
    let (_dir, engine) = new_engine();
    let db = open_db(&engine, "overlapping_scopes", 1, |txn, db, _old, _new| {
        Database::create_object_store(txn, db, "s", None, false).unwrap();
    });

    let txn_a = Database::begin_transaction(&db, vec!["s".into()], TxnMode::ReadWrite, Durability::Strict);
    let txn_b = Database::begin_transaction(&db, vec!["s".into()], TxnMode::ReadWrite, Durability::Strict);

    // txn_b hasn't started yet (txn_a's scope overlaps and runs first), so
    // a write submitted against it just buffers rather than erroring.
    let put_a = put(&txn_a, &db, "s", json!("x"), Some(Key::Number(1.0))).unwrap();
    let put_b = put(&txn_b, &db, "s", json!("y"), Some(Key::Number(2.0))).unwrap();
    pump(&engine, "overlapping_scopes");

    assert!(put_a.borrow().error.is_none());
    assert!(put_b.borrow().error.is_none());
    assert_eq!(txn_a.borrow().state(), TxnState::Finished);
    assert_eq!(txn_b.borrow().state(), TxnState::Finished);
}

#[test]
fn success_event_captures_outermost_to_innermost_then_bubbles_back() {
    let (_dir, engine) = new_engine();
    let db = open_db(&engine, "event_order", 1, |txn, db, _old, _new| {
        Database::create_object_store(txn, db, "s", None, false).unwrap();
    });

    let order: Rc<RefCell<Vec<(&'static str, Phase)>>> = Rc::new(RefCell::new(Vec::new()));

    let o = order.clone();
    Database::add_success_listener(
        &db,
        Box::new(move |ctx| o.borrow_mut().push(("database", ctx.phase))),
    );

    let txn = Database::begin_transaction(&db, vec!["s".into()], TxnMode::ReadWrite, Durability::Strict);
    let o = order.clone();
    txn.borrow_mut()
        .add_success_listener(Box::new(move |ctx| o.borrow_mut().push(("transaction", ctx.phase))));

    let request = put(&txn, &db, "s", json!("x"), Some(Key::Number(1.0))).unwrap();
    let o = order.clone();
    request
        .borrow_mut()
        .add_success_listener(Box::new(move |ctx| o.borrow_mut().push(("request", ctx.phase))));

    pump(&engine, "event_order");

    assert_eq!(
        *order.borrow(),
        vec![
            ("database", Phase::Capture),
            ("transaction", Phase::Capture),
            ("request", Phase::Target),
            ("transaction", Phase::Bubble),
            ("database", Phase::Bubble),
        ]
    );
}
