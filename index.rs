/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Index creation/back-population and index-keyed reads (SPEC_FULL
//! §4.7). Record-level maintenance of existing indexes (unique checks,
//! entry writes on `put`) lives in [`crate::store`]; this module covers
//! what only applies to the index itself.
//!
//! The storage driver does not expose `get_by_index_key`/`get_all_index`
//! directly (see DESIGN.md) — they are composed here from
//! `scan_index` + `get_record`.

use crate::driver::{Direction, StorageDriver};
use crate::error::{Error, Result};
use crate::key::Key;
use crate::keyrange::KeyRange;
use crate::store::{extract_index_keys, IndexHandle};
use crate::value::Value;

/// Builds every entry for `index` from the store's existing records,
/// within the caller's already-open savepoint. A unique-constraint
/// violation here is reported to the caller, who is responsible for
/// surfacing it as an async abort of the transaction that created the
/// index (SPEC_FULL §4.7: "aborts the transaction asynchronously, after
/// returning the freshly-constructed index handle").
pub fn back_populate(driver: &dyn StorageDriver, store_id: i64, index: &IndexHandle) -> Result<()> {
    let rows = driver.scan_in_range(store_id, &KeyRange::unbounded(), Direction::Forward, None)?;
    for (primary_key, bytes) in rows {
        let value = crate::value::deserialize_value(&bytes)?;
        let keys = extract_index_keys(index, &value);
        if index.unique {
            for k in &keys {
                if !driver.check_unique(index.id, k, None)? {
                    return Err(Error::Constraint(format!(
                        "unique index constraint violated for key {k:?} while building index"
                    )));
                }
            }
        }
        for k in &keys {
            driver.add_index_entry(index.id, k, &primary_key)?;
        }
    }
    Ok(())
}

pub fn count(driver: &dyn StorageDriver, index_id: i64, range: &KeyRange) -> Result<u64> {
    driver.count_index(index_id, range)
}

/// `IDBIndex.get`: the first record (direction order) whose index key
/// falls in `range`, or `None`.
pub fn get(driver: &dyn StorageDriver, store_id: i64, index_id: i64, range: &KeyRange) -> Result<Option<Value>> {
    let mut matches = driver.scan_index(index_id, range, Direction::Forward, Some(1))?;
    let Some((_, primary_key)) = matches.pop() else {
        return Ok(None);
    };
    match driver.get_record(store_id, &primary_key)? {
        Some(bytes) => Ok(Some(crate::value::deserialize_value(&bytes)?)),
        None => Ok(None),
    }
}

/// `IDBIndex.getKey`: the primary key of the first matching record.
pub fn get_key(driver: &dyn StorageDriver, index_id: i64, range: &KeyRange) -> Result<Option<Key>> {
    let mut matches = driver.scan_index(index_id, range, Direction::Forward, Some(1))?;
    Ok(matches.pop().map(|(_, primary_key)| primary_key))
}

pub fn get_all(
    driver: &dyn StorageDriver,
    store_id: i64,
    index_id: i64,
    range: &KeyRange,
    limit: Option<u64>,
) -> Result<Vec<Value>> {
    let matches = driver.scan_index(index_id, range, Direction::Forward, limit)?;
    matches
        .into_iter()
        .map(|(_, primary_key)| match driver.get_record(store_id, &primary_key)? {
            Some(bytes) => crate::value::deserialize_value(&bytes),
            None => Err(Error::Storage(format!(
                "index entry referenced missing primary key {primary_key:?}"
            ))),
        })
        .collect()
}

pub fn get_all_keys(
    driver: &dyn StorageDriver,
    index_id: i64,
    range: &KeyRange,
    limit: Option<u64>,
) -> Result<Vec<Key>> {
    let matches = driver.scan_index(index_id, range, Direction::Forward, limit)?;
    Ok(matches.into_iter().map(|(_, primary_key)| primary_key).collect())
}
