/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Key path validation, evaluation and injection (SPEC_FULL §4.2).

use crate::error::{Error, Result};
use crate::key::Key;
use crate::value::Value;

/// A dotted identifier chain (the empty string means "the whole value"), or
/// a non-empty sequence of such chains. Object stores and indexes that have
/// no key path at all (out-of-line keys) are represented by `Option<KeyPath>`
/// at the call site, not by a variant here.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum KeyPath {
    String(String),
    Sequence(Vec<String>),
}

/// Outcome of evaluating a key path against a value, per SPEC_FULL §4.2.
pub enum Evaluation {
    /// The path resolved to a value that is a valid key.
    Resolved(Key),
    /// Some intermediate property was missing/not an object, or the
    /// terminal value was absent.
    Unresolved,
    /// The terminal value exists but is not itself a valid key.
    Invalid,
}

/// A single dotted identifier chain, e.g. `"a.b.c"`.
fn split_path(path: &str) -> Vec<&str> {
    if path.is_empty() {
        vec![]
    } else {
        path.split('.').collect()
    }
}

/// Validates key-path syntax: each segment must be a non-empty identifier
/// (Unicode `ID_Start` followed by `ID_Continue*`), matching ECMAScript
/// `IdentifierName` rules used by the real IndexedDB grammar.
pub fn validate_syntax(path: &str) -> Result<()> {
    if path.is_empty() {
        return Ok(());
    }
    for segment in split_path(path) {
        if !is_valid_identifier(segment) {
            return Err(Error::Syntax(format!("invalid key path segment '{segment}'")));
        }
    }
    Ok(())
}

fn is_valid_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if is_id_start(c) => {},
        _ => return false,
    }
    chars.all(is_id_continue)
}

fn is_id_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_id_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

impl KeyPath {
    /// Validates a `KeyPath::Sequence` is non-empty and every member has
    /// valid syntax; the `String` form delegates to [`validate_syntax`].
    pub fn validate(&self) -> Result<()> {
        match self {
            KeyPath::String(s) => validate_syntax(s),
            KeyPath::Sequence(items) => {
                if items.is_empty() {
                    return Err(Error::Syntax("key path sequence must be non-empty".into()));
                }
                for item in items {
                    validate_syntax(item)?;
                }
                Ok(())
            },
        }
    }

    /// Whether this key path is compatible with `autoIncrement` (single,
    /// non-empty dotted path only).
    pub fn allows_auto_increment(&self) -> bool {
        matches!(self, KeyPath::String(s) if !s.is_empty())
    }

    /// Whether this key path is compatible with a multi-entry index
    /// (single string path only, sequences are forbidden).
    pub fn allows_multi_entry(&self) -> bool {
        matches!(self, KeyPath::String(_))
    }

    /// Evaluates the path against `value`, applying key validity to the
    /// resolved terminal(s).
    pub fn evaluate(&self, value: &Value) -> Evaluation {
        match self {
            KeyPath::String(path) => evaluate_single(path, value),
            KeyPath::Sequence(paths) => {
                let mut keys = Vec::with_capacity(paths.len());
                for path in paths {
                    match evaluate_single(path, value) {
                        Evaluation::Resolved(k) => keys.push(k),
                        other => return other,
                    }
                }
                Evaluation::Resolved(Key::Array(keys))
            },
        }
    }

    /// Evaluates the path "raw": no key-validity check on the terminal,
    /// used by multi-entry index extraction which validates each array
    /// element individually instead (SPEC_FULL §4.7).
    pub fn evaluate_raw(&self, value: &Value) -> Option<Value> {
        match self {
            KeyPath::String(path) => eval_segments(&split_path(path), value),
            KeyPath::Sequence(_) => None,
        }
    }

    /// Mutates `value` so the path's terminal segment holds `key`, creating
    /// intermediate objects as needed. Only ever called for a single,
    /// non-empty dotted `KeyPath::String` (auto-increment injection target).
    pub fn inject(&self, value: &mut Value, key: &Key) -> Result<()> {
        let KeyPath::String(path) = self else {
            return Err(Error::Data("cannot inject into this key path".into()));
        };
        let segments = split_path(path);
        if segments.is_empty() {
            return Err(Error::Data("cannot inject into an empty key path".into()));
        }
        let mut cursor = value;
        for segment in &segments[..segments.len() - 1] {
            if !cursor.is_object() {
                if matches!(cursor, Value::Null) {
                    *cursor = Value::Object(serde_json::Map::new());
                } else {
                    return Err(Error::Data(
                        "cannot create property on non-object intermediate".into(),
                    ));
                }
            }
            let map = cursor.as_object_mut().expect("just ensured object");
            cursor = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
        }
        let last = segments[segments.len() - 1];
        if !cursor.is_object() {
            if matches!(cursor, Value::Null) {
                *cursor = Value::Object(serde_json::Map::new());
            } else {
                return Err(Error::Data(
                    "cannot create property on non-object intermediate".into(),
                ));
            }
        }
        cursor
            .as_object_mut()
            .expect("just ensured object")
            .insert(last.to_string(), key.to_value());
        Ok(())
    }
}

fn evaluate_single(path: &str, value: &Value) -> Evaluation {
    let segments = split_path(path);
    match eval_segments(&segments, value) {
        None => Evaluation::Unresolved,
        Some(terminal) => match Key::from_value(&terminal) {
            Ok(k) => Evaluation::Resolved(k),
            Err(_) => Evaluation::Invalid,
        },
    }
}

/// Walks dotted segments over `value`. `"length"` resolves specially on
/// strings (yields the UTF-16 code-unit length) and on arrays (yields the
/// element count), matching the surrounding JS host semantics.
fn eval_segments(segments: &[&str], value: &Value) -> Option<Value> {
    let mut current = value.clone();
    for segment in segments {
        current = match &current {
            Value::String(s) if *segment == "length" => {
                serde_json::json!(s.encode_utf16().count() as u64)
            },
            Value::Array(items) if *segment == "length" => {
                serde_json::json!(items.len() as u64)
            },
            Value::Object(map) => map.get(*segment)?.clone(),
            _ => return None,
        };
    }
    Some(current)
}
