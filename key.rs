/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The IndexedDB key type and its binary-comparable codec (SPEC_FULL §4.1).

use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::value::Value;

/// A value drawn from the IndexedDB key union: finite number, finite-time
/// date, string, raw binary, or a non-recursive array of keys.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    Number(f64),
    Date(f64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<Key>),
}

impl Key {
    /// Cross-type rank used by `compare`: number < date < string < binary < array.
    fn type_rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::Date(_) => 1,
            Key::String(_) => 2,
            Key::Binary(_) => 3,
            Key::Array(_) => 4,
        }
    }

    /// Total order over keys, per SPEC_FULL §4.1.
    pub fn compare(&self, other: &Key) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Key::Number(a), Key::Number(b)) | (Key::Date(a), Key::Date(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            },
            (Key::String(a), Key::String(b)) => compare_utf16(a, b),
            (Key::Binary(a), Key::Binary(b)) => compare_bytes(a, b),
            (Key::Array(a), Key::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let c = x.compare(y);
                    if c != Ordering::Equal {
                        return c;
                    }
                }
                a.len().cmp(&b.len())
            },
            _ => unreachable!("type_rank already discriminated"),
        }
    }

    /// Validate an arbitrary JSON-ish value as a key, or reject with `DataError`.
    ///
    /// Typed-array-like inputs are not representable in `serde_json::Value`,
    /// so binary keys are recognised through the `{"$binary": [u8, ...]}`
    /// convention produced by [`Value`] helpers; anything else that isn't a
    /// number/string/array is rejected.
    pub fn from_value(value: &Value) -> Result<Key> {
        match value {
            Value::Number(n) => {
                let f = n
                    .as_f64()
                    .ok_or_else(|| Error::Data("key number out of range".into()))?;
                if f.is_nan() || f.is_infinite() {
                    return Err(Error::Data("key number must be finite".into()));
                }
                Ok(Key::Number(f))
            },
            Value::String(s) => Ok(Key::String(s.clone())),
            Value::Object(map) if map.len() == 1 && map.contains_key("$date") => {
                let n = map["$date"]
                    .as_f64()
                    .ok_or_else(|| Error::Data("invalid date key".into()))?;
                if !n.is_finite() {
                    return Err(Error::Data("date key must be finite".into()));
                }
                Ok(Key::Date(n))
            },
            Value::Object(map) if map.len() == 1 && map.contains_key("$binary") => {
                let arr = map["$binary"]
                    .as_array()
                    .ok_or_else(|| Error::Data("invalid binary key".into()))?;
                let mut bytes = Vec::with_capacity(arr.len());
                for b in arr {
                    bytes.push(
                        b.as_u64()
                            .filter(|v| *v <= 255)
                            .ok_or_else(|| Error::Data("invalid binary key byte".into()))?
                            as u8,
                    );
                }
                Ok(Key::Binary(bytes))
            },
            Value::Array(items) => {
                let mut keys = Vec::with_capacity(items.len());
                for item in items {
                    keys.push(Key::from_value(item)?);
                }
                Ok(Key::Array(keys))
            },
            _ => Err(Error::Data(
                "value is not a valid IndexedDB key".to_string(),
            )),
        }
    }

    /// Inverse of [`Key::from_value`].
    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(n) => serde_json::json!(n),
            Key::Date(n) => serde_json::json!({ "$date": n }),
            Key::String(s) => Value::String(s.clone()),
            Key::Binary(bytes) => {
                serde_json::json!({ "$binary": bytes.iter().map(|b| *b as u64).collect::<Vec<_>>() })
            },
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }
}

fn compare_utf16(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

fn compare_bytes(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

const TAG_NUMBER: u8 = 0x10;
const TAG_DATE: u8 = 0x20;
const TAG_STRING: u8 = 0x30;
const TAG_BINARY: u8 = 0x40;
const TAG_ARRAY: u8 = 0x50;
const TERMINATOR: u8 = 0x00;
const ESCAPED_NUL: [u8; 2] = [0x00, 0x01];

/// Encode a key into bytes such that unsigned byte comparison reproduces
/// [`Key::compare`] (SPEC_FULL §4.1).
pub fn encode(key: &Key) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(key, &mut out);
    out
}

fn encode_into(key: &Key, out: &mut Vec<u8>) {
    match key {
        Key::Number(n) => {
            out.push(TAG_NUMBER);
            out.extend_from_slice(&encode_f64(*n));
        },
        Key::Date(n) => {
            out.push(TAG_DATE);
            out.extend_from_slice(&encode_f64(*n));
        },
        Key::String(s) => {
            out.push(TAG_STRING);
            encode_utf16_escaped(s, out);
            out.extend_from_slice(&[0x00, 0x00]);
        },
        Key::Binary(bytes) => {
            out.push(TAG_BINARY);
            encode_bytes_escaped(bytes, out);
            out.extend_from_slice(&[0x00, 0x00]);
        },
        Key::Array(items) => {
            out.push(TAG_ARRAY);
            for item in items {
                encode_into(item, out);
            }
            out.push(TERMINATOR);
        },
    }
}

/// Big-endian IEEE-754 with sign-flip post-processing: non-negatives get
/// their sign bit set, negatives get every bit flipped. This makes lexical
/// byte comparison equal numeric `<`. `-0.0` and `0.0` encode identically.
fn encode_f64(n: f64) -> [u8; 8] {
    let n = if n == 0.0 { 0.0 } else { n }; // normalise -0.0 to 0.0
    let bits = n.to_bits();
    let flipped = if (bits >> 63) == 0 {
        bits | (1u64 << 63)
    } else {
        !bits
    };
    flipped.to_be_bytes()
}

fn decode_f64(bytes: &[u8]) -> f64 {
    let bits = u64::from_be_bytes(bytes.try_into().expect("8 bytes"));
    let restored = if (bits >> 63) == 1 {
        bits & !(1u64 << 63)
    } else {
        !bits
    };
    f64::from_bits(restored)
}

fn encode_utf16_escaped(s: &str, out: &mut Vec<u8>) {
    for unit in s.encode_utf16() {
        if unit == 0 {
            out.extend_from_slice(&ESCAPED_NUL);
        } else {
            out.extend_from_slice(&unit.to_be_bytes());
        }
    }
}

fn encode_bytes_escaped(bytes: &[u8], out: &mut Vec<u8>) {
    for &b in bytes {
        if b == 0 {
            out.extend_from_slice(&ESCAPED_NUL);
        } else {
            out.push(b);
        }
    }
}

/// Exact inverse of [`encode`]; reconstructs the original key including the
/// date/number tag distinction.
pub fn decode(bytes: &[u8]) -> Result<Key> {
    let (key, rest) = decode_one(bytes)?;
    if !rest.is_empty() {
        return Err(Error::Data("trailing bytes after encoded key".into()));
    }
    Ok(key)
}

fn decode_one(bytes: &[u8]) -> Result<(Key, &[u8])> {
    let (&tag, rest) = bytes
        .split_first()
        .ok_or_else(|| Error::Data("empty key encoding".into()))?;
    match tag {
        TAG_NUMBER | TAG_DATE => {
            if rest.len() < 8 {
                return Err(Error::Data("truncated number encoding".into()));
            }
            let (num_bytes, rest) = rest.split_at(8);
            let n = decode_f64(num_bytes);
            let key = if tag == TAG_NUMBER {
                Key::Number(n)
            } else {
                Key::Date(n)
            };
            Ok((key, rest))
        },
        TAG_STRING => {
            let (units, rest) = decode_terminated_units(rest)?;
            let s = String::from_utf16(&units)
                .map_err(|_| Error::Data("invalid utf-16 in string key".into()))?;
            Ok((Key::String(s), rest))
        },
        TAG_BINARY => {
            let (bytes_out, rest) = decode_terminated_bytes(rest)?;
            Ok((Key::Binary(bytes_out), rest))
        },
        TAG_ARRAY => {
            let mut items = Vec::new();
            let mut cur = rest;
            loop {
                match cur.split_first() {
                    Some((&TERMINATOR, after)) => {
                        cur = after;
                        break;
                    },
                    _ => {
                        let (item, after) = decode_one(cur)?;
                        items.push(item);
                        cur = after;
                    },
                }
            }
            Ok((Key::Array(items), cur))
        },
        _ => Err(Error::Data(format!("unknown key type tag {tag:#x}"))),
    }
}

/// Reads big-endian UTF-16 code units, un-escaping `00 01` to a NUL unit,
/// until the `00 00` terminator (strict) or end-of-input (legacy,
/// unterminated — accepted for decode per the carried-forward quirk in
/// SPEC_FULL §9).
fn decode_terminated_units(bytes: &[u8]) -> Result<(Vec<u16>, &[u8])> {
    let mut units = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        let pair = [bytes[i], bytes[i + 1]];
        if pair == [0x00, 0x00] {
            return Ok((units, &bytes[i + 2..]));
        }
        if pair == ESCAPED_NUL {
            units.push(0);
        } else {
            units.push(u16::from_be_bytes(pair));
        }
        i += 2;
    }
    if i != bytes.len() {
        return Err(Error::Data("odd-length string key encoding".into()));
    }
    Ok((units, &bytes[i..]))
}

fn decode_terminated_bytes(bytes: &[u8]) -> Result<(Vec<u8>, &[u8])> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == 0x00 {
            if i + 1 >= bytes.len() {
                return Err(Error::Data("truncated binary key encoding".into()));
            }
            match bytes[i + 1] {
                0x00 => return Ok((out, &bytes[i + 2..])),
                0x01 => {
                    out.push(0);
                    i += 2;
                },
                _ => return Err(Error::Data("invalid binary key escape".into())),
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok((out, &bytes[i..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_type_rank_orders_number_date_string_binary_array() {
        let ladder = vec![
            Key::Number(1e300),
            Key::Date(-1e300),
            Key::String("".into()),
            Key::Binary(vec![]),
            Key::Array(vec![]),
        ];
        for pair in ladder.windows(2) {
            assert_eq!(pair[0].compare(&pair[1]), Ordering::Less);
        }
    }

    #[test]
    fn number_ordering_handles_sign_and_zero() {
        assert_eq!(Key::Number(-1.0).compare(&Key::Number(0.0)), Ordering::Less);
        assert_eq!(Key::Number(0.0).compare(&Key::Number(-0.0)), Ordering::Equal);
        assert_eq!(Key::Number(0.0).compare(&Key::Number(1.0)), Ordering::Less);
        assert_eq!(encode(&Key::Number(0.0)), encode(&Key::Number(-0.0)));
    }

    #[test]
    fn array_ordering_is_lexicographic_then_by_length() {
        let a = Key::Array(vec![Key::Number(1.0)]);
        let b = Key::Array(vec![Key::Number(1.0), Key::Number(0.0)]);
        let c = Key::Array(vec![Key::Number(2.0)]);
        assert_eq!(a.compare(&b), Ordering::Less);
        assert_eq!(b.compare(&c), Ordering::Less);
    }

    #[test]
    fn encode_decode_round_trips() {
        let keys = vec![
            Key::Number(-123.5),
            Key::Number(0.0),
            Key::Date(1700000000.0),
            Key::String("héllo".into()),
            Key::Binary(vec![0, 1, 2, 0, 255]),
            Key::Array(vec![Key::Number(1.0), Key::String("x".into())]),
        ];
        for key in &keys {
            let bytes = encode(key);
            assert_eq!(&decode(&bytes).unwrap(), key);
        }
    }

    #[test]
    fn byte_order_matches_compare_order() {
        let mut keys = vec![
            Key::Number(-5.0),
            Key::Number(5.0),
            Key::Number(0.0),
            Key::Date(10.0),
            Key::String("b".into()),
            Key::String("a".into()),
            Key::Binary(vec![2]),
            Key::Binary(vec![1]),
        ];
        let mut by_compare = keys.clone();
        by_compare.sort_by(|a, b| a.compare(b));

        keys.sort_by(|a, b| encode(a).cmp(&encode(b)));
        assert_eq!(keys, by_compare);
    }

    #[test]
    fn from_value_round_trips_through_to_value() {
        let keys = vec![
            Key::Number(3.0),
            Key::Date(4.0),
            Key::String("s".into()),
            Key::Binary(vec![9, 0, 8]),
            Key::Array(vec![Key::Number(1.0), Key::Binary(vec![1])]),
        ];
        for key in keys {
            let round_tripped = Key::from_value(&key.to_value()).unwrap();
            assert_eq!(round_tripped, key);
        }
    }

    #[test]
    fn from_value_rejects_unsupported_shapes() {
        assert!(Key::from_value(&serde_json::json!(true)).is_err());
        assert!(Key::from_value(&serde_json::json!(null)).is_err());
    }
}
