/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Object store record operations (SPEC_FULL §4.7): `add`/`put`, the
//! read family, and the auto-increment key generator. Index maintenance
//! (unique-constraint checks, entry writes) happens here too, since it's
//! inseparable from `put`'s atomicity; index *creation*/back-population
//! lives in [`crate::index`].

use crate::driver::{Direction, StorageDriver};
use crate::error::{Error, Result};
use crate::key::Key;
use crate::keypath::{Evaluation, KeyPath};
use crate::keyrange::KeyRange;
use crate::value::Value;

/// The 2^53 ceiling on generated keys (the largest integer a `f64`
/// represents exactly), per SPEC_FULL §4.7.
pub const AUTO_INCREMENT_CEILING: i64 = 1 << 53;

/// A snapshot of an object store's metadata, as needed by record
/// operations. `current_key` must be refreshed by the caller (the
/// database layer) before each call; this module never caches it across
/// calls.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    pub id: i64,
    pub key_path: Option<KeyPath>,
    pub auto_increment: bool,
    pub current_key: i64,
}

#[derive(Debug, Clone)]
pub struct IndexHandle {
    pub id: i64,
    pub key_path: KeyPath,
    pub unique: bool,
    pub multi_entry: bool,
}

/// A lookup parameter that is either a single key or a range.
#[derive(Debug, Clone)]
pub enum Query {
    Key(Key),
    Range(KeyRange),
}

impl Query {
    pub fn to_range(&self) -> KeyRange {
        match self {
            Query::Key(k) => KeyRange::only(k.clone()),
            Query::Range(r) => r.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: Key,
    pub value: Value,
}

/// `put`: overwrites an existing primary key.
pub fn put(
    driver: &dyn StorageDriver,
    store: &StoreHandle,
    indexes: &[IndexHandle],
    value: Value,
    key: Option<Key>,
) -> Result<Key> {
    write(driver, store, indexes, value, key, true)
}

/// `add`: fails with `ConstraintError` on an existing primary key.
pub fn add(
    driver: &dyn StorageDriver,
    store: &StoreHandle,
    indexes: &[IndexHandle],
    value: Value,
    key: Option<Key>,
) -> Result<Key> {
    write(driver, store, indexes, value, key, false)
}

fn write(
    driver: &dyn StorageDriver,
    store: &StoreHandle,
    indexes: &[IndexHandle],
    value: Value,
    key: Option<Key>,
    overwrite: bool,
) -> Result<Key> {
    // (1) clone — our structured-clone boundary is the serde_json value
    // graph itself, so `clone_value` stands in for the host's clone step;
    // a real host failure here (e.g. a detached buffer) would be a
    // `DataCloneError`, which `clone_value` cannot raise because
    // `serde_json::Value` has no such exotic inputs.
    let mut clone = crate::value::clone_value(&value);

    // (2) effective primary key
    let effective_key = match (&store.key_path, &key) {
        (Some(_), Some(_)) => {
            return Err(Error::Data(
                "a key must not be supplied for a store with a key path".into(),
            ));
        },
        (None, Some(k)) => k.clone(),
        (None, None) => {
            return Err(Error::Data(
                "a key is required for a store with no key path".into(),
            ));
        },
        (Some(path), None) => match path.evaluate(&clone) {
            Evaluation::Resolved(k) => k,
            Evaluation::Invalid => {
                return Err(Error::Data("key path did not resolve to a valid key".into()));
            },
            Evaluation::Unresolved => {
                if !store.auto_increment {
                    return Err(Error::Data(
                        "key path did not resolve and the store has no key generator".into(),
                    ));
                }
                if !path.allows_auto_increment() {
                    return Err(Error::InvalidAccess(
                        "auto-increment requires a non-empty, non-sequence key path".into(),
                    ));
                }
                let generated = generate_key(store.current_key)?;
                path.inject(&mut clone, &generated)?;
                generated
            },
        },
    };

    if !overwrite && driver.get_record(store.id, &effective_key)?.is_some() {
        return Err(Error::Constraint(format!(
            "a record already exists for key {effective_key:?}"
        )));
    }

    // (3) unique-index constraints, checked before any write
    let mut resolved: Vec<(i64, Vec<Key>)> = Vec::with_capacity(indexes.len());
    for index in indexes {
        let keys = extract_index_keys(index, &clone);
        if index.unique {
            for k in &keys {
                let exclude = if overwrite { Some(&effective_key) } else { None };
                if !driver.check_unique(index.id, k, exclude)? {
                    return Err(Error::Constraint(format!(
                        "unique index constraint violated for key {k:?}"
                    )));
                }
            }
        }
        resolved.push((index.id, keys));
    }

    // (4) overwrite: drop the previous index entries for this primary key
    if overwrite {
        for index in indexes {
            driver.delete_entries_for_primary(index.id, &effective_key)?;
        }
    }

    // (5) write record and index entries
    let bytes = crate::value::serialize_value(&clone)?;
    driver.put_record(store.id, &effective_key, &bytes)?;
    for (index_id, keys) in &resolved {
        for k in keys {
            driver.add_index_entry(*index_id, k, &effective_key)?;
        }
    }

    // (6) advance the key generator, only on a store that has one
    if store.auto_increment {
        advance_generator(driver, store.id, store.current_key, &effective_key)?;
    }

    Ok(effective_key)
}

/// Next value the generator would assign, without yet persisting it —
/// persistence happens uniformly via [`advance_generator`] after the
/// write succeeds, whether the key came from the generator or the caller.
fn generate_key(current: i64) -> Result<Key> {
    if current > AUTO_INCREMENT_CEILING {
        return Err(Error::Constraint("key generator exhausted".into()));
    }
    Ok(Key::Number(current as f64))
}

/// Bumps the generator when `key` is a finite integer `>= current`;
/// `+Infinity` pins it at the ceiling; `NaN`/`-Infinity`/non-integers/
/// values below 1 are silently ignored (SPEC_FULL §4.7 step 6).
fn advance_generator(driver: &dyn StorageDriver, store_id: i64, current: i64, key: &Key) -> Result<()> {
    let Key::Number(n) = key else {
        return Ok(());
    };
    if n.is_nan() || *n < 1.0 {
        return Ok(());
    }
    if n.is_infinite() {
        driver.update_current_key(store_id, AUTO_INCREMENT_CEILING + 1)?;
        return Ok(());
    }
    if n.fract() != 0.0 {
        return Ok(());
    }
    let v = *n as i64;
    if v >= current {
        driver.update_current_key(store_id, v.saturating_add(1))?;
    }
    Ok(())
}

/// Extracts zero, one, or many index keys for a record, applying the
/// multi-entry rule: for a multi-entry index the path is evaluated raw;
/// an array raw value yields one entry per distinct, individually-valid
/// element, a non-array raw value falls back to regular single-entry
/// evaluation (SPEC_FULL §4.7).
pub(crate) fn extract_index_keys(index: &IndexHandle, value: &Value) -> Vec<Key> {
    if index.multi_entry && index.key_path.allows_multi_entry() {
        match index.key_path.evaluate_raw(value) {
            Some(Value::Array(items)) => {
                let mut keys: Vec<Key> = Vec::new();
                for item in items {
                    if let Ok(k) = Key::from_value(&item) {
                        if !keys.iter().any(|seen| seen.compare(&k) == std::cmp::Ordering::Equal) {
                            keys.push(k);
                        }
                    }
                }
                keys
            },
            Some(raw) => Key::from_value(&raw).map(|k| vec![k]).unwrap_or_default(),
            None => Vec::new(),
        }
    } else {
        match index.key_path.evaluate(value) {
            Evaluation::Resolved(k) => vec![k],
            _ => Vec::new(),
        }
    }
}

pub fn get(driver: &dyn StorageDriver, store_id: i64, query: &Query) -> Result<Option<Value>> {
    match driver.get_in_range(store_id, &query.to_range())? {
        Some((_, bytes)) => Ok(Some(crate::value::deserialize_value(&bytes)?)),
        None => Ok(None),
    }
}

pub fn get_key(driver: &dyn StorageDriver, store_id: i64, query: &Query) -> Result<Option<Key>> {
    Ok(driver.get_in_range(store_id, &query.to_range())?.map(|(k, _)| k))
}

pub fn count(driver: &dyn StorageDriver, store_id: i64, query: &Query) -> Result<u64> {
    driver.count_in_range(store_id, &query.to_range())
}

pub fn delete(
    driver: &dyn StorageDriver,
    store: &StoreHandle,
    indexes: &[IndexHandle],
    query: &Query,
) -> Result<()> {
    let rows = driver.scan_in_range(store.id, &query.to_range(), Direction::Forward, None)?;
    for (key, _) in rows {
        for index in indexes {
            driver.delete_entries_for_primary(index.id, &key)?;
        }
        driver.delete_record(store.id, &key)?;
    }
    Ok(())
}

pub fn clear(driver: &dyn StorageDriver, store: &StoreHandle, indexes: &[IndexHandle]) -> Result<()> {
    delete(driver, store, indexes, &Query::Range(KeyRange::unbounded()))
}

pub fn get_all(
    driver: &dyn StorageDriver,
    store_id: i64,
    query: &Query,
    count: Option<u64>,
) -> Result<Vec<Value>> {
    let rows = driver.scan_in_range(store_id, &query.to_range(), Direction::Forward, count)?;
    rows.into_iter()
        .map(|(_, bytes)| crate::value::deserialize_value(&bytes))
        .collect()
}

pub fn get_all_keys(
    driver: &dyn StorageDriver,
    store_id: i64,
    query: &Query,
    count: Option<u64>,
) -> Result<Vec<Key>> {
    let rows = driver.scan_in_range(store_id, &query.to_range(), Direction::Forward, count)?;
    Ok(rows.into_iter().map(|(k, _)| k).collect())
}

pub fn get_all_records(
    driver: &dyn StorageDriver,
    store_id: i64,
    query: &Query,
    count: Option<u64>,
    direction: Direction,
) -> Result<Vec<Record>> {
    let rows = driver.scan_in_range(store_id, &query.to_range(), direction, count)?;
    rows.into_iter()
        .map(|(key, bytes)| Ok(Record { key, value: crate::value::deserialize_value(&bytes)? }))
        .collect()
}
