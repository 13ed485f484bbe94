/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The storage driver interface (SPEC_FULL §6): the only surface through
//! which the rest of the crate touches persistence. `sqlite` is the one
//! concrete implementation, but transaction/store/cursor code only ever
//! depends on the [`StorageDriver`] trait.

mod schema;
pub mod sqlite;

use crate::error::Result;
use crate::key::Key;
use crate::keypath::KeyPath;
use crate::keyrange::KeyRange;

pub use sqlite::SqliteDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// Maps to the transaction's durability hint; relaxed trades some fsync
/// discipline for throughput, strict never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    Relaxed,
    Strict,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreMeta {
    pub id: i64,
    pub name: String,
    /// `None` means out-of-line keys (the caller always supplies the key
    /// explicitly); `Some` means in-line keys extracted from the value.
    pub key_path: Option<KeyPath>,
    pub auto_increment: bool,
    pub current_key: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexMeta {
    pub id: i64,
    pub store_id: i64,
    pub name: String,
    pub key_path: KeyPath,
    pub unique: bool,
    pub multi_entry: bool,
}

/// A single database's abstract storage surface. One instance is bound to
/// exactly one database (mirroring one `rusqlite::Connection` per database
/// file); there is no `db` parameter on any method.
pub trait StorageDriver: Send {
    fn version(&self) -> Result<u64>;
    fn set_version(&self, version: u64) -> Result<()>;
    fn delete_database(&self) -> Result<()>;

    fn list_stores(&self) -> Result<Vec<StoreMeta>>;
    fn create_store(&self, name: &str, key_path: Option<KeyPath>, auto_increment: bool) -> Result<StoreMeta>;
    fn delete_store(&self, store_id: i64) -> Result<()>;
    fn rename_store(&self, store_id: i64, new_name: &str) -> Result<()>;
    fn get_store_meta(&self, name: &str) -> Result<Option<StoreMeta>>;
    fn update_current_key(&self, store_id: i64, value: i64) -> Result<()>;

    fn list_indexes(&self, store_id: i64) -> Result<Vec<IndexMeta>>;
    fn create_index(
        &self,
        store_id: i64,
        name: &str,
        key_path: KeyPath,
        unique: bool,
        multi_entry: bool,
    ) -> Result<IndexMeta>;
    fn delete_index(&self, index_id: i64) -> Result<()>;
    fn rename_index(&self, index_id: i64, new_name: &str) -> Result<()>;
    fn get_index_meta(&self, store_id: i64, name: &str) -> Result<Option<IndexMeta>>;

    fn put_record(&self, store_id: i64, key: &Key, value: &[u8]) -> Result<()>;
    fn get_record(&self, store_id: i64, key: &Key) -> Result<Option<Vec<u8>>>;
    fn delete_record(&self, store_id: i64, key: &Key) -> Result<()>;
    fn clear_records(&self, store_id: i64) -> Result<()>;

    fn get_in_range(&self, store_id: i64, range: &KeyRange) -> Result<Option<(Key, Vec<u8>)>>;
    fn delete_in_range(&self, store_id: i64, range: &KeyRange) -> Result<u64>;
    fn count_in_range(&self, store_id: i64, range: &KeyRange) -> Result<u64>;
    /// Rows ordered by key, ascending for `Forward`, descending for `Reverse`.
    fn scan_in_range(
        &self,
        store_id: i64,
        range: &KeyRange,
        direction: Direction,
        limit: Option<u64>,
    ) -> Result<Vec<(Key, Vec<u8>)>>;

    fn add_index_entry(&self, index_id: i64, index_key: &Key, primary_key: &Key) -> Result<()>;
    fn delete_entries_for_primary(&self, index_id: i64, primary_key: &Key) -> Result<()>;
    /// `true` if no entry with `index_key` exists other than `exclude_primary`.
    fn check_unique(&self, index_id: i64, index_key: &Key, exclude_primary: Option<&Key>) -> Result<bool>;

    fn count_index(&self, index_id: i64, range: &KeyRange) -> Result<u64>;
    /// `(index_key, primary_key)` pairs ordered by `index_key` in direction
    /// order, tie-broken by ascending `primary_key` (so the first occurrence
    /// of a repeated index key is always the smallest primary key, which is
    /// what the `*-unique` cursor directions rely on).
    fn scan_index(
        &self,
        index_id: i64,
        range: &KeyRange,
        direction: Direction,
        limit: Option<u64>,
    ) -> Result<Vec<(Key, Key)>>;

    fn begin_savepoint(&self, name: &str) -> Result<()>;
    fn release_savepoint(&self, name: &str) -> Result<()>;
    fn rollback_savepoint(&self, name: &str) -> Result<()>;
}
