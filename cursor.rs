/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Cursor engine (SPEC_FULL §4.8): four directions, `continue`/`advance`/
//! `continuePrimaryKey`, and `update`/`delete` delegation.
//!
//! The storage driver has no notion of a live, server-side cursor — each
//! step re-queries `scan_in_range`/`scan_index` with the range narrowed
//! to "not yet visited" and filters the (small, in-memory) result for
//! the exact ordering rule that applies, the same way object-store reads
//! elsewhere in this crate re-query rather than stream.

use std::cmp::Ordering;

use crate::driver::{Direction, StorageDriver};
use crate::error::{Error, Result};
use crate::key::Key;
use crate::keypath::Evaluation;
use crate::keyrange::KeyRange;
use crate::store::{IndexHandle, StoreHandle};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorDirection {
    Forward,
    ForwardUnique,
    Reverse,
    ReverseUnique,
}

impl CursorDirection {
    fn raw(self) -> Direction {
        match self {
            CursorDirection::Forward | CursorDirection::ForwardUnique => Direction::Forward,
            CursorDirection::Reverse | CursorDirection::ReverseUnique => Direction::Reverse,
        }
    }

    fn unique(self) -> bool {
        matches!(self, CursorDirection::ForwardUnique | CursorDirection::ReverseUnique)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CursorRow {
    /// The index key for an index cursor, or the primary key for an
    /// object-store cursor.
    pub key: Key,
    pub primary_key: Key,
    pub value: Value,
}

/// A positioned cursor. `index_id` distinguishes an index cursor from a
/// plain object-store cursor; `key_only` distinguishes `openKeyCursor`
/// from `openCursor` (key-only cursors reject `update`/`delete`).
pub struct Cursor {
    pub store_id: i64,
    pub index_id: Option<i64>,
    pub key_only: bool,
    range: KeyRange,
    direction: CursorDirection,
    key: Option<Key>,
    primary_key: Option<Key>,
}

impl Cursor {
    /// `openCursor`/`openKeyCursor`: positions on the first matching row,
    /// or returns `None` if nothing matched.
    pub fn open(
        driver: &dyn StorageDriver,
        store_id: i64,
        index_id: Option<i64>,
        key_only: bool,
        range: KeyRange,
        direction: CursorDirection,
    ) -> Result<(Cursor, Option<CursorRow>)> {
        let mut cursor = Cursor {
            store_id,
            index_id,
            key_only,
            range,
            direction,
            key: None,
            primary_key: None,
        };
        let row = cursor.step(driver, 1, None, None)?;
        Ok((cursor, row))
    }

    pub fn current_key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    pub fn current_primary_key(&self) -> Option<&Key> {
        self.primary_key.as_ref()
    }

    /// `continue(optionalKey)` (SPEC_FULL §4.8).
    pub fn continue_to(&mut self, driver: &dyn StorageDriver, optional_key: Option<Key>) -> Result<Option<CursorRow>> {
        if self.key.is_none() {
            return Err(Error::InvalidState("cursor has no current value".into()));
        }
        if let (Some(current), Some(target)) = (&self.key, &optional_key) {
            if !ahead(self.direction.raw(), target, current) {
                return Err(Error::Data(
                    "continue's key must be strictly ahead of the cursor's current key".into(),
                ));
            }
        }
        self.step(driver, 1, optional_key.as_ref(), None)
    }

    /// `advance(n)` (SPEC_FULL §4.8).
    pub fn advance(&mut self, driver: &dyn StorageDriver, n: u64) -> Result<Option<CursorRow>> {
        if n == 0 {
            return Err(Error::Data("advance count must be greater than zero".into()));
        }
        if self.key.is_none() {
            return Err(Error::InvalidState("cursor has no current value".into()));
        }
        self.step(driver, n, None, None)
    }

    /// `continuePrimaryKey(key, primaryKey)`, valid only on non-unique
    /// index cursors (SPEC_FULL §4.8).
    pub fn continue_primary_key(&mut self, driver: &dyn StorageDriver, key: Key, primary_key: Key) -> Result<Option<CursorRow>> {
        if self.index_id.is_none() || self.direction.unique() {
            return Err(Error::InvalidAccess(
                "continuePrimaryKey is only valid on a non-unique index cursor".into(),
            ));
        }
        if let (Some(current_key), Some(current_primary)) = (&self.key, &self.primary_key) {
            let strictly_ahead = match key.compare(current_key) {
                Ordering::Equal => primary_key.compare(current_primary) == Ordering::Greater,
                other => ahead_cmp(self.direction.raw(), other),
            };
            if !strictly_ahead {
                return Err(Error::Data(
                    "continuePrimaryKey's target must be strictly ahead of the current position".into(),
                ));
            }
        }
        self.step(driver, 1, Some(&key), Some(&primary_key))
    }

    /// Narrows the range to "not yet visited", fetches candidates in
    /// direction order, filters for strictly-past-current (and, if
    /// given, at-or-after `at_least_key`/`at_least_primary`), collapses
    /// duplicate index keys for `*unique` directions, then lands on the
    /// `n`th qualifying entry.
    fn step(
        &mut self,
        driver: &dyn StorageDriver,
        n: u64,
        at_least_key: Option<&Key>,
        at_least_primary: Option<&Key>,
    ) -> Result<Option<CursorRow>> {
        let raw_direction = self.direction.raw();
        let unique = self.direction.unique();

        let loose_range = match &self.key {
            Some(k) => narrow(&self.range, raw_direction, k.clone()),
            None => self.range.clone(),
        };

        let candidates: Vec<(Key, Key)> = match self.index_id {
            Some(index_id) => driver.scan_index(index_id, &loose_range, raw_direction, None)?,
            None => driver
                .scan_in_range(self.store_id, &loose_range, raw_direction, None)?
                .into_iter()
                .map(|(k, _)| (k.clone(), k))
                .collect(),
        };

        let mut filtered: Vec<(Key, Key)> = Vec::new();
        let mut last_kept_key: Option<Key> = None;
        for (k, pk) in &candidates {
            let past_current = match (&self.key, &self.primary_key) {
                (Some(ck), Some(cpk)) => {
                    if unique {
                        ahead(raw_direction, k, ck)
                    } else {
                        ahead(raw_direction, k, ck)
                            || (k.compare(ck) == Ordering::Equal && pk.compare(cpk) == Ordering::Greater)
                    }
                },
                _ => true,
            };
            if !past_current {
                continue;
            }
            if let Some(target) = at_least_key {
                if !at_or_ahead(raw_direction, k, target) {
                    continue;
                }
                if let Some(target_pk) = at_least_primary {
                    if k.compare(target) == Ordering::Equal && pk.compare(target_pk) == Ordering::Less {
                        continue;
                    }
                }
            }
            if unique {
                if let Some(last) = &last_kept_key {
                    if last.compare(k) == Ordering::Equal {
                        continue;
                    }
                }
            }
            filtered.push((k.clone(), pk.clone()));
            last_kept_key = Some(k.clone());
        }

        if filtered.len() < n as usize {
            self.key = None;
            self.primary_key = None;
            return Ok(None);
        }
        let (landing_key, landing_primary) = filtered[n as usize - 1].clone();

        let bytes = driver
            .get_record(self.store_id, &landing_primary)?
            .ok_or_else(|| Error::Storage("cursor landed on a primary key with no record".into()))?;
        let value = crate::value::deserialize_value(&bytes)?;

        self.key = Some(landing_key.clone());
        self.primary_key = Some(landing_primary.clone());

        Ok(Some(CursorRow {
            key: landing_key,
            primary_key: landing_primary,
            value,
        }))
    }
}

fn ahead_cmp(direction: Direction, ord: Ordering) -> bool {
    match direction {
        Direction::Forward => ord == Ordering::Greater,
        Direction::Reverse => ord == Ordering::Less,
    }
}

fn ahead(direction: Direction, a: &Key, b: &Key) -> bool {
    ahead_cmp(direction, a.compare(b))
}

fn at_or_ahead(direction: Direction, a: &Key, b: &Key) -> bool {
    a.compare(b) == Ordering::Equal || ahead_cmp(direction, a.compare(b))
}

/// Replaces the search-side bound (lower for forward, upper for reverse)
/// with `from`, inclusive — the caller filters out `from` itself
/// precisely in [`Cursor::step`], this is just a coarse pre-filter to
/// keep the driver query small.
fn narrow(range: &KeyRange, direction: Direction, from: Key) -> KeyRange {
    let mut r = range.clone();
    match direction {
        Direction::Forward => {
            r.lower = Some(from);
            r.lower_open = false;
        },
        Direction::Reverse => {
            r.upper = Some(from);
            r.upper_open = false;
        },
    }
    r
}

/// `update(value)`, delegating to the store's `put` (SPEC_FULL §4.8).
/// Forbidden on key-only cursors; callers are responsible for also
/// rejecting this on read-only transactions and for rewriting the
/// resulting request's source back to the cursor.
pub fn update(
    driver: &dyn StorageDriver,
    store: &StoreHandle,
    indexes: &[IndexHandle],
    cursor: &Cursor,
    value: Value,
) -> Result<Key> {
    if cursor.key_only {
        return Err(Error::InvalidState("update is not valid on a key cursor".into()));
    }
    let primary_key = cursor
        .primary_key
        .clone()
        .ok_or_else(|| Error::InvalidState("cursor has no current value".into()))?;

    if let Some(path) = &store.key_path {
        match path.evaluate(&value) {
            Evaluation::Resolved(k) if k.compare(&primary_key) == Ordering::Equal => {},
            _ => {
                return Err(Error::Data(
                    "update value's key path must match the cursor's current key".into(),
                ));
            },
        }
        crate::store::put(driver, store, indexes, value, None)
    } else {
        crate::store::put(driver, store, indexes, value, Some(primary_key))
    }
}

/// `delete()`, delegating to the store's `delete` (SPEC_FULL §4.8).
pub fn delete(driver: &dyn StorageDriver, store: &StoreHandle, indexes: &[IndexHandle], cursor: &Cursor) -> Result<()> {
    if cursor.key_only {
        return Err(Error::InvalidState("delete is not valid on a key cursor".into()));
    }
    let primary_key = cursor
        .primary_key
        .clone()
        .ok_or_else(|| Error::InvalidState("cursor has no current value".into()))?;
    crate::store::delete(driver, store, indexes, &crate::store::Query::Key(primary_key))
}
