/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Bounded / half-bounded / open / closed key ranges (SPEC_FULL §4.7, §6).

use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::key::Key;

#[derive(Debug, Clone, PartialEq)]
pub struct KeyRange {
    pub lower: Option<Key>,
    pub upper: Option<Key>,
    pub lower_open: bool,
    pub upper_open: bool,
}

impl KeyRange {
    /// A range matching exactly one key.
    pub fn only(key: Key) -> KeyRange {
        KeyRange {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }

    pub fn bound(lower: Key, upper: Key, lower_open: bool, upper_open: bool) -> Result<KeyRange> {
        if lower.compare(&upper) == Ordering::Greater {
            return Err(Error::Data(
                "lower bound must not be greater than upper bound".into(),
            ));
        }
        Ok(KeyRange {
            lower: Some(lower),
            upper: Some(upper),
            lower_open,
            upper_open,
        })
    }

    pub fn lower_bound(lower: Key, open: bool) -> KeyRange {
        KeyRange {
            lower: Some(lower),
            upper: None,
            lower_open: open,
            upper_open: false,
        }
    }

    pub fn upper_bound(upper: Key, open: bool) -> KeyRange {
        KeyRange {
            lower: None,
            upper: Some(upper),
            lower_open: false,
            upper_open: open,
        }
    }

    pub fn unbounded() -> KeyRange {
        KeyRange {
            lower: None,
            upper: None,
            lower_open: false,
            upper_open: false,
        }
    }

    pub fn contains(&self, key: &Key) -> bool {
        if let Some(lower) = &self.lower {
            match key.compare(lower) {
                Ordering::Less => return false,
                Ordering::Equal if self.lower_open => return false,
                _ => {},
            }
        }
        if let Some(upper) = &self.upper {
            match key.compare(upper) {
                Ordering::Greater => return false,
                Ordering::Equal if self.upper_open => return false,
                _ => {},
            }
        }
        true
    }
}
