/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! An in-process, IndexedDB-shaped storage engine: a binary-comparable key
//! codec, key-path evaluation, a single-threaded cooperative transaction
//! scheduler, object stores and indexes backed by SQLite, and cursors.
//!
//! The crate is organised the way the algorithm is laid out in its design
//! document: a key/value layer (`key`, `keypath`, `keyrange`, `value`), a
//! storage driver (`driver`), the transaction machinery (`scheduler`,
//! `transaction`, `journal`, `event`), the record-level engine (`store`,
//! `index`, `cursor`), and the connection-facing surface (`database`,
//! `factory`, `engine`).

mod cursor;
mod database;
mod driver;
mod engine;
mod error;
mod event;
mod factory;
mod index;
mod journal;
mod key;
mod keypath;
mod keyrange;
mod requests;
mod scheduler;
mod shared;
mod store;
mod transaction;
mod value;

pub use cursor::{Cursor, CursorDirection, CursorRow};
pub use database::{Database, DatabaseHandle, DatabaseWeakHandle};
pub use driver::{Direction, Durability, IndexMeta, StorageDriver, StoreMeta};
pub use engine::Engine;
pub use error::{Error, Result};
pub use event::{EventKind, Phase, Request, RequestResult, RequestSource, TaskQueue};
pub use factory::{delete_database, open};
pub use key::Key;
pub use keypath::{Evaluation, KeyPath};
pub use keyrange::KeyRange;
pub use requests::{
    add, clear, count, cursor_advance, cursor_continue, cursor_continue_primary_key, cursor_delete, cursor_update,
    delete, get, get_all, get_all_keys, get_all_records, get_key, index_count, index_get, index_get_all,
    index_get_all_keys, index_get_key, open_cursor, put,
};
pub use scheduler::TxnMode;
pub use shared::{Shared, WeakShared};
pub use store::{IndexHandle, Query, Record, StoreHandle};
pub use transaction::{Transaction, TransactionHandle, TransactionWeakHandle, TxnState};
pub use value::Value;
