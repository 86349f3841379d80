//! Ulimit canonicalization.
//!
//! Declared ulimits are a mapping `name → {soft, hard}`; engines report a list
//! of `{Name, Soft, Hard}` records. Docker uses short names (`nofile`), Podman
//! the kernel names (`RLIMIT_NOFILE`). Both canonicalize to the lower-case
//! short name.

use crate::constants::HOST_MANAGED_ULIMITS;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Canonical ulimits: short name → `(soft, hard)`.
pub type UlimitMap = BTreeMap<String, (i64, i64)>;

/// Runtime ulimit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ulimit {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Soft")]
    pub soft: i64,
    #[serde(rename = "Hard")]
    pub hard: i64,
}

/// Canonical ulimit name.
pub fn canonical_name(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    lower
        .strip_prefix("rlimit_")
        .map(str::to_string)
        .unwrap_or(lower)
}

/// Parses the declared mapping.
///
/// A limit with only one of `soft`/`hard` uses it for both.
pub fn from_declared(value: &Value) -> Result<UlimitMap> {
    let map = match value {
        Value::Object(map) => map,
        Value::Null => return Ok(UlimitMap::new()),
        other => {
            return Err(Error::InvalidDimensionValue {
                key: "ulimits".to_string(),
                value: other.to_string(),
            })
        }
    };

    let mut out = UlimitMap::new();
    for (name, limit) in map {
        let key = format!("ulimits.{name}");
        let soft = limit.get("soft").map(|v| limit_value(&key, v)).transpose()?;
        let hard = limit.get("hard").map(|v| limit_value(&key, v)).transpose()?;
        let (soft, hard) = match (soft, hard) {
            (Some(s), Some(h)) => (s, h),
            (Some(v), None) | (None, Some(v)) => (v, v),
            (None, None) => {
                return Err(Error::InvalidDimensionValue {
                    key,
                    value: limit.to_string(),
                })
            }
        };
        out.insert(canonical_name(name), (soft, hard));
    }
    Ok(out)
}

/// Parses the runtime list; `null` means no ulimits.
pub fn from_runtime(value: Option<&Value>) -> Result<UlimitMap> {
    let records: Vec<Ulimit> = match value {
        None | Some(Value::Null) => return Ok(UlimitMap::new()),
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| Error::InvalidDimensionValue {
            key: "ulimits".to_string(),
            value: e.to_string(),
        })?,
    };
    Ok(records
        .into_iter()
        .map(|u| (canonical_name(&u.name), (u.soft, u.hard)))
        .collect())
}

/// Carries host-managed limits from the live side into the desired set when
/// the caller did not request them.
pub fn carry_host_managed(desired: &mut UlimitMap, live: &UlimitMap) {
    for name in HOST_MANAGED_ULIMITS {
        let name = canonical_name(name);
        if desired.contains_key(&name) {
            continue;
        }
        if let Some(limit) = live.get(&name) {
            desired.insert(name, *limit);
        }
    }
}

/// Builds the runtime records handed to the engine at creation.
pub fn to_runtime(map: &UlimitMap) -> Vec<Ulimit> {
    map.iter()
        .map(|(name, (soft, hard))| Ulimit {
            name: name.clone(),
            soft: *soft,
            hard: *hard,
        })
        .collect()
}

fn limit_value(key: &str, value: &Value) -> Result<i64> {
    let invalid = || Error::InvalidDimensionValue {
        key: key.to_string(),
        value: value.to_string(),
    };
    match value {
        Value::Number(n) => n.as_i64().ok_or_else(invalid),
        Value::String(s) if s.eq_ignore_ascii_case("unlimited") => Ok(-1),
        Value::String(s) => s.trim().parse().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_engine_spellings_agree() {
        let docker = from_runtime(Some(&json!([{"Name": "nofile", "Soft": 1024, "Hard": 4096}]))).unwrap();
        let podman =
            from_runtime(Some(&json!([{"Name": "RLIMIT_NOFILE", "Soft": 1024, "Hard": 4096}]))).unwrap();
        let declared = from_declared(&json!({"nofile": {"soft": 1024, "hard": "4096"}})).unwrap();
        assert_eq!(docker, podman);
        assert_eq!(docker, declared);
    }

    #[test]
    fn test_host_managed_limit_carried_forward() {
        let mut desired = from_declared(&json!({"nofile": {"soft": 1, "hard": 2}})).unwrap();
        let live = from_runtime(Some(&json!([
            {"Name": "RLIMIT_NOFILE", "Soft": 1, "Hard": 2},
            {"Name": "RLIMIT_NPROC", "Soft": 4194304, "Hard": 4194304}
        ])))
        .unwrap();
        carry_host_managed(&mut desired, &live);
        assert_eq!(desired, live);
    }

    #[test]
    fn test_requested_host_managed_limit_is_kept() {
        let mut desired = from_declared(&json!({"nproc": {"soft": 10, "hard": 10}})).unwrap();
        let live = from_runtime(Some(&json!([{"Name": "nproc", "Soft": 99, "Hard": 99}]))).unwrap();
        carry_host_managed(&mut desired, &live);
        assert_eq!(desired["nproc"], (10, 10));
    }

    #[test]
    fn test_null_runtime_list_is_empty() {
        assert!(from_runtime(Some(&Value::Null)).unwrap().is_empty());
        assert!(from_runtime(None).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_limit() {
        assert!(from_declared(&json!({"nofile": {"soft": "lots"}})).is_err());
        assert!(from_declared(&json!({"nofile": {}})).is_err());
    }
}
