/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Transaction-bound request producers: the layer a client call actually
//! goes through (SPEC_FULL §4.3, §4.7, §4.8). Wraps the pure record/index/
//! cursor engines in `store.rs`/`index.rs`/`cursor.rs` with the active/
//! writable checks and deferred execution a real request needs.
//!
//! Every function here checks transaction state synchronously (so a stale
//! or read-only transaction throws on the caller's own stack rather than
//! failing the request later) and defers the actual store/index lookup
//! into the operation closure `Transaction::submit_sync` runs — a store's
//! `current_key` can move between several writes queued before the
//! scheduler starts the transaction, so resolving handles up front would
//! risk reading a stale generator value.

use crate::cursor::{Cursor, CursorDirection};
use crate::database::{Database, DatabaseHandle};
use crate::driver::Direction;
use crate::error::{Error, Result};
use crate::event::{ReadyState, Request, RequestResult, RequestSource};
use crate::key::Key;
use crate::keyrange::KeyRange;
use crate::shared::Shared;
use crate::store::Query;
use crate::transaction::{Transaction, TransactionHandle};
use crate::value::Value;

fn check_read(txn: &TransactionHandle) -> Result<()> {
    txn.borrow().check_active()
}

fn check_write(txn: &TransactionHandle) -> Result<()> {
    txn.borrow().check_active()?;
    txn.borrow().check_writable()
}

pub fn put(txn: &TransactionHandle, db: &DatabaseHandle, store_name: &str, value: Value, key: Option<Key>) -> Result<Shared<Request>> {
    check_write(txn)?;
    Transaction::ensure_savepoint(txn)?;

    let txn_c = txn.clone();
    let db = db.clone();
    let store_name = store_name.to_string();
    Ok(Transaction::submit_sync(txn, RequestSource::Store, move || {
        let driver = txn_c.borrow().driver().clone();
        let store = Database::store_handle(&db, &store_name)?;
        let indexes = Database::index_handles(&db, &store_name)?;
        let k = crate::store::put(&*driver, &store, &indexes, value, key)?;
        Ok(RequestResult::Key(k))
    }))
}

pub fn add(txn: &TransactionHandle, db: &DatabaseHandle, store_name: &str, value: Value, key: Option<Key>) -> Result<Shared<Request>> {
    check_write(txn)?;
    Transaction::ensure_savepoint(txn)?;

    let txn_c = txn.clone();
    let db = db.clone();
    let store_name = store_name.to_string();
    Ok(Transaction::submit_sync(txn, RequestSource::Store, move || {
        let driver = txn_c.borrow().driver().clone();
        let store = Database::store_handle(&db, &store_name)?;
        let indexes = Database::index_handles(&db, &store_name)?;
        let k = crate::store::add(&*driver, &store, &indexes, value, key)?;
        Ok(RequestResult::Key(k))
    }))
}

pub fn get(txn: &TransactionHandle, db: &DatabaseHandle, store_name: &str, query: Query) -> Result<Shared<Request>> {
    check_read(txn)?;

    let txn_c = txn.clone();
    let db = db.clone();
    let store_name = store_name.to_string();
    Ok(Transaction::submit_sync(txn, RequestSource::Store, move || {
        let driver = txn_c.borrow().driver().clone();
        let store_id = Database::store_handle(&db, &store_name)?.id;
        match crate::store::get(&*driver, store_id, &query)? {
            Some(v) => Ok(RequestResult::Value(v)),
            None => Ok(RequestResult::None),
        }
    }))
}

pub fn get_key(txn: &TransactionHandle, db: &DatabaseHandle, store_name: &str, query: Query) -> Result<Shared<Request>> {
    check_read(txn)?;

    let txn_c = txn.clone();
    let db = db.clone();
    let store_name = store_name.to_string();
    Ok(Transaction::submit_sync(txn, RequestSource::Store, move || {
        let driver = txn_c.borrow().driver().clone();
        let store_id = Database::store_handle(&db, &store_name)?.id;
        match crate::store::get_key(&*driver, store_id, &query)? {
            Some(k) => Ok(RequestResult::Key(k)),
            None => Ok(RequestResult::None),
        }
    }))
}

pub fn count(txn: &TransactionHandle, db: &DatabaseHandle, store_name: &str, query: Query) -> Result<Shared<Request>> {
    check_read(txn)?;

    let txn_c = txn.clone();
    let db = db.clone();
    let store_name = store_name.to_string();
    Ok(Transaction::submit_sync(txn, RequestSource::Store, move || {
        let driver = txn_c.borrow().driver().clone();
        let store_id = Database::store_handle(&db, &store_name)?.id;
        let n = crate::store::count(&*driver, store_id, &query)?;
        Ok(RequestResult::Count(n))
    }))
}

pub fn delete(txn: &TransactionHandle, db: &DatabaseHandle, store_name: &str, query: Query) -> Result<Shared<Request>> {
    check_write(txn)?;
    Transaction::ensure_savepoint(txn)?;

    let txn_c = txn.clone();
    let db = db.clone();
    let store_name = store_name.to_string();
    Ok(Transaction::submit_sync(txn, RequestSource::Store, move || {
        let driver = txn_c.borrow().driver().clone();
        let store = Database::store_handle(&db, &store_name)?;
        let indexes = Database::index_handles(&db, &store_name)?;
        crate::store::delete(&*driver, &store, &indexes, &query)?;
        Ok(RequestResult::None)
    }))
}

pub fn clear(txn: &TransactionHandle, db: &DatabaseHandle, store_name: &str) -> Result<Shared<Request>> {
    check_write(txn)?;
    Transaction::ensure_savepoint(txn)?;

    let txn_c = txn.clone();
    let db = db.clone();
    let store_name = store_name.to_string();
    Ok(Transaction::submit_sync(txn, RequestSource::Store, move || {
        let driver = txn_c.borrow().driver().clone();
        let store = Database::store_handle(&db, &store_name)?;
        let indexes = Database::index_handles(&db, &store_name)?;
        crate::store::clear(&*driver, &store, &indexes)?;
        Ok(RequestResult::None)
    }))
}

pub fn get_all(txn: &TransactionHandle, db: &DatabaseHandle, store_name: &str, query: Query, limit: Option<u64>) -> Result<Shared<Request>> {
    check_read(txn)?;

    let txn_c = txn.clone();
    let db = db.clone();
    let store_name = store_name.to_string();
    Ok(Transaction::submit_sync(txn, RequestSource::Store, move || {
        let driver = txn_c.borrow().driver().clone();
        let store_id = Database::store_handle(&db, &store_name)?.id;
        let values = crate::store::get_all(&*driver, store_id, &query, limit)?;
        Ok(RequestResult::Values(values))
    }))
}

pub fn get_all_keys(txn: &TransactionHandle, db: &DatabaseHandle, store_name: &str, query: Query, limit: Option<u64>) -> Result<Shared<Request>> {
    check_read(txn)?;

    let txn_c = txn.clone();
    let db = db.clone();
    let store_name = store_name.to_string();
    Ok(Transaction::submit_sync(txn, RequestSource::Store, move || {
        let driver = txn_c.borrow().driver().clone();
        let store_id = Database::store_handle(&db, &store_name)?.id;
        let keys = crate::store::get_all_keys(&*driver, store_id, &query, limit)?;
        Ok(RequestResult::Keys(keys))
    }))
}

pub fn get_all_records(
    txn: &TransactionHandle,
    db: &DatabaseHandle,
    store_name: &str,
    query: Query,
    limit: Option<u64>,
    direction: Direction,
) -> Result<Shared<Request>> {
    check_read(txn)?;

    let txn_c = txn.clone();
    let db = db.clone();
    let store_name = store_name.to_string();
    Ok(Transaction::submit_sync(txn, RequestSource::Store, move || {
        let driver = txn_c.borrow().driver().clone();
        let store_id = Database::store_handle(&db, &store_name)?.id;
        let records = crate::store::get_all_records(&*driver, store_id, &query, limit, direction)?;
        Ok(RequestResult::Records(records))
    }))
}

pub fn index_get(
    txn: &TransactionHandle,
    db: &DatabaseHandle,
    store_name: &str,
    index_name: &str,
    range: KeyRange,
) -> Result<Shared<Request>> {
    check_read(txn)?;

    let txn_c = txn.clone();
    let db = db.clone();
    let store_name = store_name.to_string();
    let index_name = index_name.to_string();
    Ok(Transaction::submit_sync(txn, RequestSource::Index, move || {
        let driver = txn_c.borrow().driver().clone();
        let store_id = Database::store_handle(&db, &store_name)?.id;
        let index_id = Database::index_handle(&db, &store_name, &index_name)?.id;
        match crate::index::get(&*driver, store_id, index_id, &range)? {
            Some(v) => Ok(RequestResult::Value(v)),
            None => Ok(RequestResult::None),
        }
    }))
}

pub fn index_get_key(
    txn: &TransactionHandle,
    db: &DatabaseHandle,
    store_name: &str,
    index_name: &str,
    range: KeyRange,
) -> Result<Shared<Request>> {
    check_read(txn)?;

    let txn_c = txn.clone();
    let db = db.clone();
    let store_name = store_name.to_string();
    let index_name = index_name.to_string();
    Ok(Transaction::submit_sync(txn, RequestSource::Index, move || {
        let driver = txn_c.borrow().driver().clone();
        let index_id = Database::index_handle(&db, &store_name, &index_name)?.id;
        match crate::index::get_key(&*driver, index_id, &range)? {
            Some(k) => Ok(RequestResult::Key(k)),
            None => Ok(RequestResult::None),
        }
    }))
}

pub fn index_count(
    txn: &TransactionHandle,
    db: &DatabaseHandle,
    store_name: &str,
    index_name: &str,
    range: KeyRange,
) -> Result<Shared<Request>> {
    check_read(txn)?;

    let txn_c = txn.clone();
    let db = db.clone();
    let store_name = store_name.to_string();
    let index_name = index_name.to_string();
    Ok(Transaction::submit_sync(txn, RequestSource::Index, move || {
        let driver = txn_c.borrow().driver().clone();
        let index_id = Database::index_handle(&db, &store_name, &index_name)?.id;
        let n = crate::index::count(&*driver, index_id, &range)?;
        Ok(RequestResult::Count(n))
    }))
}

pub fn index_get_all(
    txn: &TransactionHandle,
    db: &DatabaseHandle,
    store_name: &str,
    index_name: &str,
    range: KeyRange,
    limit: Option<u64>,
) -> Result<Shared<Request>> {
    check_read(txn)?;

    let txn_c = txn.clone();
    let db = db.clone();
    let store_name = store_name.to_string();
    let index_name = index_name.to_string();
    Ok(Transaction::submit_sync(txn, RequestSource::Index, move || {
        let driver = txn_c.borrow().driver().clone();
        let store_id = Database::store_handle(&db, &store_name)?.id;
        let index_id = Database::index_handle(&db, &store_name, &index_name)?.id;
        let values = crate::index::get_all(&*driver, store_id, index_id, &range, limit)?;
        Ok(RequestResult::Values(values))
    }))
}

pub fn index_get_all_keys(
    txn: &TransactionHandle,
    db: &DatabaseHandle,
    store_name: &str,
    index_name: &str,
    range: KeyRange,
    limit: Option<u64>,
) -> Result<Shared<Request>> {
    check_read(txn)?;

    let txn_c = txn.clone();
    let db = db.clone();
    let store_name = store_name.to_string();
    let index_name = index_name.to_string();
    Ok(Transaction::submit_sync(txn, RequestSource::Index, move || {
        let driver = txn_c.borrow().driver().clone();
        let index_id = Database::index_handle(&db, &store_name, &index_name)?.id;
        let keys = crate::index::get_all_keys(&*driver, index_id, &range, limit)?;
        Ok(RequestResult::Keys(keys))
    }))
}

/// `openCursor`/`openKeyCursor`, over an object store (`index_name = None`)
/// or an index. Valid on any active transaction; `update`/`delete` through
/// the resulting cursor re-check writability themselves.
pub fn open_cursor(
    txn: &TransactionHandle,
    db: &DatabaseHandle,
    store_name: &str,
    index_name: Option<&str>,
    range: KeyRange,
    direction: CursorDirection,
    key_only: bool,
) -> Result<Shared<Request>> {
    check_read(txn)?;

    let txn_c = txn.clone();
    let db = db.clone();
    let store_name = store_name.to_string();
    let index_name = index_name.map(str::to_string);
    let source = if index_name.is_some() { RequestSource::Index } else { RequestSource::Store };
    Ok(Transaction::submit_sync(txn, source, move || {
        let driver = txn_c.borrow().driver().clone();
        let store_id = Database::store_handle(&db, &store_name)?.id;
        let index_id = match &index_name {
            Some(n) => Some(Database::index_handle(&db, &store_name, n)?.id),
            None => None,
        };
        let (cursor, row) = Cursor::open(&*driver, store_id, index_id, key_only, range, direction)?;
        Ok(RequestResult::Cursor(Shared::new(cursor), row))
    }))
}

/// Checks that `request` (the cursor's own, originally minted by
/// `open_cursor`) has settled before re-arming it — a second
/// `continue`/`advance`/`continuePrimaryKey` issued while the first is
/// still pending is rejected rather than silently re-stepping the same
/// position twice.
fn check_not_mid_iteration(request: &Shared<Request>) -> Result<()> {
    if request.borrow().ready_state == ReadyState::Pending {
        return Err(Error::InvalidState(
            "cursor already has a continue/advance/continuePrimaryKey in progress".into(),
        ));
    }
    Ok(())
}

/// `continue(optionalKey)`. `request` is the cursor's own request handle
/// (the one `open_cursor`, or a prior `continue`/`advance` call, returned)
/// — it is re-armed and reused rather than minting a new one, so a
/// caller's listeners and `Shared<Request>` identity survive iteration.
pub fn cursor_continue(
    txn: &TransactionHandle,
    request: &Shared<Request>,
    cursor: &Shared<Cursor>,
    key: Option<Key>,
) -> Result<Shared<Request>> {
    check_read(txn)?;
    check_not_mid_iteration(request)?;

    let txn_c = txn.clone();
    let cursor = cursor.clone();
    Ok(Transaction::resubmit_sync(txn, request, move || {
        let driver = txn_c.borrow().driver().clone();
        let row = cursor.borrow_mut().continue_to(&*driver, key)?;
        Ok(RequestResult::CursorRow(row))
    }))
}

pub fn cursor_advance(
    txn: &TransactionHandle,
    request: &Shared<Request>,
    cursor: &Shared<Cursor>,
    n: u64,
) -> Result<Shared<Request>> {
    check_read(txn)?;
    check_not_mid_iteration(request)?;

    let txn_c = txn.clone();
    let cursor = cursor.clone();
    Ok(Transaction::resubmit_sync(txn, request, move || {
        let driver = txn_c.borrow().driver().clone();
        let row = cursor.borrow_mut().advance(&*driver, n)?;
        Ok(RequestResult::CursorRow(row))
    }))
}

pub fn cursor_continue_primary_key(
    txn: &TransactionHandle,
    request: &Shared<Request>,
    cursor: &Shared<Cursor>,
    key: Key,
    primary_key: Key,
) -> Result<Shared<Request>> {
    check_read(txn)?;
    check_not_mid_iteration(request)?;

    let txn_c = txn.clone();
    let cursor = cursor.clone();
    Ok(Transaction::resubmit_sync(txn, request, move || {
        let driver = txn_c.borrow().driver().clone();
        let row = cursor.borrow_mut().continue_primary_key(&*driver, key, primary_key)?;
        Ok(RequestResult::CursorRow(row))
    }))
}

pub fn cursor_update(
    txn: &TransactionHandle,
    db: &DatabaseHandle,
    store_name: &str,
    cursor: &Shared<Cursor>,
    value: Value,
) -> Result<Shared<Request>> {
    check_write(txn)?;
    Transaction::ensure_savepoint(txn)?;

    let txn_c = txn.clone();
    let db = db.clone();
    let store_name = store_name.to_string();
    let cursor = cursor.clone();
    Ok(Transaction::submit_sync(txn, RequestSource::Cursor, move || {
        let driver = txn_c.borrow().driver().clone();
        let store = Database::store_handle(&db, &store_name)?;
        let indexes = Database::index_handles(&db, &store_name)?;
        let key = crate::cursor::update(&*driver, &store, &indexes, &cursor.borrow(), value)?;
        Ok(RequestResult::Key(key))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mid_iteration_check_passes_once_settled() {
        let request = Shared::new(Request::new(RequestSource::Cursor));
        request.borrow_mut().set_done_success(RequestResult::None);
        assert!(check_not_mid_iteration(&request).is_ok());
    }

    #[test]
    fn mid_iteration_check_rejects_a_still_pending_request() {
        let request = Shared::new(Request::new(RequestSource::Cursor));
        // Freshly minted (and any request re-armed by `resubmit_sync` before
        // its operation has run) starts `Pending` — a second continue must
        // not step past the first's in-flight position.
        assert!(matches!(check_not_mid_iteration(&request), Err(Error::InvalidState(_))));
    }
}

pub fn cursor_delete(
    txn: &TransactionHandle,
    db: &DatabaseHandle,
    store_name: &str,
    cursor: &Shared<Cursor>,
) -> Result<Shared<Request>> {
    check_write(txn)?;
    Transaction::ensure_savepoint(txn)?;

    let txn_c = txn.clone();
    let db = db.clone();
    let store_name = store_name.to_string();
    let cursor = cursor.clone();
    Ok(Transaction::submit_sync(txn, RequestSource::Cursor, move || {
        let driver = txn_c.borrow().driver().clone();
        let store = Database::store_handle(&db, &store_name)?;
        let indexes = Database::index_handles(&db, &store_name)?;
        crate::cursor::delete(&*driver, &store, &indexes, &cursor.borrow())?;
        Ok(RequestResult::None)
    }))
}
