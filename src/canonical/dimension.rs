//! Resource dimension canonicalization.
//!
//! Dimensions accept either a plain number or a number with a unit suffix
//! (`b`, `k`, `m`, `g`, case-insensitive, powers of 1024). Values that are not
//! sizes, such as cpuset ranges (`0-3`), are compared as written.

use crate::constants::{DIMENSION_MAP, DIMENSION_UNITS};
use crate::error::{Error, Result};
use crate::inspect::is_falsy;
use serde_json::Value;
use std::collections::BTreeMap;

/// Engine field name for a desired dimension key.
pub fn host_field(key: &str) -> Option<&'static str> {
    DIMENSION_MAP
        .iter()
        .find(|(desired, _)| *desired == key)
        .map(|(_, field)| *field)
}

/// Rejects unknown keys and `null` values before anything is compared.
pub fn validate_dimensions(dimensions: &BTreeMap<String, Value>) -> Result<()> {
    let unsupported: Vec<String> = dimensions
        .keys()
        .filter(|k| host_field(k).is_none())
        .cloned()
        .collect();
    if !unsupported.is_empty() {
        return Err(Error::UnsupportedDimension(unsupported));
    }
    if let Some((key, _)) = dimensions.iter().find(|(_, v)| v.is_null()) {
        return Err(Error::RemovedDimension(key.clone()));
    }
    Ok(())
}

/// Returns true if the mapping is empty or every value is zero/empty.
pub fn is_empty_dimensions<'a, I>(values: I) -> bool
where
    I: IntoIterator<Item = &'a Value>,
{
    values.into_iter().all(is_falsy)
}

/// Canonical string form of a dimension value.
///
/// Sizes with a unit suffix become their byte count; every other value is
/// kept as written.
pub fn to_bytes(key: &str, value: &Value) -> Result<String> {
    let raw = match value {
        Value::Null => return Err(Error::RemovedDimension(key.to_string())),
        Value::Number(n) => return Ok(n.to_string()),
        Value::String(s) => s.trim(),
        other => {
            return Err(Error::InvalidDimensionValue {
                key: key.to_string(),
                value: other.to_string(),
            })
        }
    };

    let Some(last) = raw.chars().last() else {
        return Ok(String::new());
    };
    if last.is_ascii_digit() {
        return Ok(raw.to_string());
    }

    let unit = last.to_ascii_lowercase();
    let multiplier = DIMENSION_UNITS
        .iter()
        .find(|(u, _)| *u == unit)
        .map(|(_, m)| *m)
        .ok_or_else(|| Error::InvalidDimensionUnit {
            unit,
            value: raw.to_string(),
        })?;
    let number: u64 = raw[..raw.len() - last.len_utf8()]
        .trim()
        .parse()
        .map_err(|_| Error::InvalidDimensionValue {
            key: key.to_string(),
            value: raw.to_string(),
        })?;
    number
        .checked_mul(multiplier)
        .map(|bytes| bytes.to_string())
        .ok_or_else(|| Error::InvalidDimensionValue {
            key: key.to_string(),
            value: raw.to_string(),
        })
}

/// Compares one desired dimension against the live value.
///
/// Either side being `null` means the engine no longer supports the
/// dimension, which is fatal.
pub fn dimension_values_differ(key: &str, desired: &Value, live: &Value) -> Result<bool> {
    if desired.is_null() || live.is_null() {
        return Err(Error::RemovedDimension(key.to_string()));
    }
    Ok(to_bytes(key, desired)? != to_bytes(key, live)?)
}
