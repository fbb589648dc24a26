//! Canonical JSON normalization and digest computation.
//!
//! Every hash in the bundle is computed over the bytes produced here:
//! - object keys sorted lexicographically at every nesting level
//! - no insignificant whitespace
//! - array order preserved
//! - integer-valued floats normalized to integers; any other float rejected
//!
//! External payloads that legitimately carry floats (tool outputs, event
//! inputs) go through [`quantize_floats`] first, which rewrites fractional
//! floats into fixed strings so they never reach the canonical stream as
//! numbers.

use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

use crate::domain::error::{CanonicalError, Result};

/// Prefix marking a float that was rewritten by [`quantize_floats`].
pub const QUANTIZED_FLOAT_PREFIX: &str = "f64:";

/// Exclusive upper bound of the integers an `f64` can fold into (`2^63`).
const I64_FOLD_LIMIT: f64 = 9_223_372_036_854_775_808.0;

/// Whether a float is whole and folds into an `i64` without saturating.
fn folds_to_i64(f: f64) -> bool {
    f.is_finite() && f.fract() == 0.0 && (-I64_FOLD_LIMIT..I64_FOLD_LIMIT).contains(&f)
}

fn child_path(parent: &str, key: &str) -> String {
    format!("{parent}.{key}")
}

/// Normalize numbers and sort keys. Rejects fractional and non-finite floats.
fn normalize_value(value: &Value, path: &str) -> std::result::Result<Value, CanonicalError> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), normalize_value(v, &child_path(path, key))?);
                }
            }
            Ok(Value::Object(sorted))
        }
        Value::Array(arr) => {
            let normalized = arr
                .iter()
                .enumerate()
                .map(|(i, v)| normalize_value(v, &format!("{path}[{i}]")))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(Value::Array(normalized))
        }
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                return Ok(Value::Number(n.clone()));
            }
            let Some(f) = n.as_f64() else {
                return Err(CanonicalError::FloatInHashedField {
                    path: path.to_string(),
                });
            };
            if !f.is_finite() {
                return Err(CanonicalError::NonFinite {
                    path: path.to_string(),
                });
            }
            if folds_to_i64(f) {
                Ok(Value::Number(Number::from(f as i64)))
            } else {
                Err(CanonicalError::FloatInHashedField {
                    path: path.to_string(),
                })
            }
        }
        other => Ok(other.clone()),
    }
}

/// Convert a JSON value to canonical form: normalize numbers, sort keys, compact output.
pub fn canonical_json(value: &Value) -> Result<String> {
    let normalized = normalize_value(value, "$")?;
    Ok(serde_json::to_string(&normalized)?)
}

/// Canonical bytes of any serializable record.
pub fn canonical_bytes<T: serde::Serialize>(record: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(record)?;
    Ok(canonical_json(&value)?.into_bytes())
}

/// Rewrite fractional floats into `"f64:<repr>"` strings so the payload can be digested.
///
/// Whole floats inside the `i64` range are left alone (the canonical
/// serializer folds them into integers); every other float, including whole
/// values of `2^63` and beyond, is rewritten. The repr is Rust's shortest
/// round-trip formatting, which is platform independent.
pub fn quantize_floats(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), quantize_floats(v)))
                .collect(),
        ),
        Value::Array(arr) => Value::Array(arr.iter().map(quantize_floats).collect()),
        Value::Number(n) if !(n.is_i64() || n.is_u64()) => match n.as_f64() {
            Some(f) if folds_to_i64(f) => Value::Number(n.clone()),
            Some(f) => Value::String(format!("{QUANTIZED_FLOAT_PREFIX}{f:?}")),
            None => Value::String(format!("{QUANTIZED_FLOAT_PREFIX}{n}")),
        },
        other => other.clone(),
    }
}

/// Lowercase hex SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Compute the SHA-256 hex digest of canonical JSON.
pub fn compute_digest(value: &Value) -> Result<String> {
    let canonical = canonical_json(value)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Digest of an opaque external payload (floats quantized first).
pub fn payload_digest(value: &Value) -> Result<String> {
    compute_digest(&quantize_floats(value))
}
