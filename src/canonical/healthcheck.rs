//! Healthcheck canonicalization.
//!
//! Callers declare `{test, interval, timeout, start_period, retries}` with
//! durations in seconds; engines report `{Test, Interval, Timeout,
//! StartPeriod, Retries}` with durations in nanoseconds. A `test` of `NONE`
//! disables the healthcheck, which canonicalizes to `None`.

use crate::constants::{HEALTHCHECK_DURATION_KEYS, HEALTHCHECK_KEYS, NANOS_PER_SEC};
use crate::error::{Error, Result};
use crate::inspect::{scalar_string, strings};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const DISABLED: &str = "NONE";

/// Canonical healthcheck in engine field names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Healthcheck {
    #[serde(rename = "Test")]
    pub test: Vec<String>,
    /// Nanoseconds.
    #[serde(rename = "Interval")]
    pub interval: u64,
    /// Nanoseconds.
    #[serde(rename = "Timeout")]
    pub timeout: u64,
    /// Nanoseconds.
    #[serde(rename = "StartPeriod")]
    pub start_period: u64,
    #[serde(rename = "Retries")]
    pub retries: u64,
}

/// Canonicalizes the desired healthcheck mapping.
///
/// An empty mapping means no healthcheck. Otherwise exactly the supported
/// key set must be present.
pub fn canonical_desired_healthcheck(
    raw: Option<&BTreeMap<String, Value>>,
) -> Result<Option<Healthcheck>> {
    let Some(raw) = raw.filter(|r| !r.is_empty()) else {
        return Ok(None);
    };

    let supported: Vec<&str> = HEALTHCHECK_KEYS.iter().map(|(k, _)| *k).collect();
    let unsupported: Vec<String> = raw
        .keys()
        .filter(|k| !supported.contains(&k.as_str()))
        .cloned()
        .collect();
    if !unsupported.is_empty() {
        return Err(Error::UnsupportedHealthcheckOption(unsupported));
    }
    let missing: Vec<String> = supported
        .iter()
        .filter(|k| !raw.contains_key(**k))
        .map(|k| k.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(Error::MissingHealthcheckOption(missing));
    }

    let test = match &raw["test"] {
        Value::String(s) if s == DISABLED => return Ok(None),
        Value::String(s) => vec!["CMD-SHELL".to_string(), s.clone()],
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(scalar_string).collect();
            if items == [DISABLED] {
                return Ok(None);
            }
            items
        }
        other => vec!["CMD-SHELL".to_string(), scalar_string(other)],
    };

    let mut durations = [0u64; 3];
    for (slot, key) in durations.iter_mut().zip(HEALTHCHECK_DURATION_KEYS) {
        *slot = seconds_to_nanos(key, &raw[*key])?;
    }
    let [interval, timeout, start_period] = durations;

    Ok(Some(Healthcheck {
        test,
        interval,
        timeout,
        start_period,
        retries: integer("retries", &raw["retries"])?,
    }))
}

/// Canonicalizes the live `Config.Healthcheck` record.
///
/// Missing numeric fields count as zero and a `["NONE"]` test as no
/// healthcheck.
pub fn canonical_live_healthcheck(value: Option<&Value>) -> Option<Healthcheck> {
    let record = value.filter(|v| v.is_object())?;
    let test = strings(record.get("Test"));
    if test.is_empty() || test == [DISABLED] {
        return None;
    }
    let field = |name: &str| record.get(name).and_then(Value::as_u64).unwrap_or(0);
    Some(Healthcheck {
        test,
        interval: field("Interval"),
        timeout: field("Timeout"),
        start_period: field("StartPeriod"),
        retries: field("Retries"),
    })
}

fn seconds_to_nanos(key: &str, value: &Value) -> Result<u64> {
    let seconds = integer(key, value)?;
    seconds
        .checked_mul(NANOS_PER_SEC)
        .ok_or_else(|| Error::InvalidHealthcheckValue {
            key: key.to_string(),
            expected: "an integer",
            value: value.to_string(),
        })
}

fn integer(key: &str, value: &Value) -> Result<u64> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| Error::InvalidHealthcheckValue {
        key: key.to_string(),
        expected: "an integer",
        value: value.to_string(),
    })
}
