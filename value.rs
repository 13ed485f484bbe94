/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The structured-clone boundary, black-boxed by the spec as
//! `serialize`/`deserialize`/`clone`. This implementation picks
//! `serde_json::Value` as the canonical, sole wire format (SPEC_FULL §2.1 —
//! resolves the source's V8-vs-JSON open question in favor of JSON only).

use crate::error::{Error, Result};

pub type Value = serde_json::Value;

/// `clone(value) -> value`, a pure in-memory structural copy.
pub fn clone_value(value: &Value) -> Value {
    value.clone()
}

/// `serialize(value) -> bytes`.
pub fn serialize_value(value: &Value) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::DataClone(e.to_string()))
}

/// `deserialize(bytes) -> value`.
pub fn deserialize_value(bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes).map_err(|e| Error::DataClone(e.to_string()))
}
