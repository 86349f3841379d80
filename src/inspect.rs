//! Read-only views over engine inspect output.
//!
//! Docker and Podman report the same configuration with different layouts:
//! fields go missing instead of being zero, lists come back as `null`, and
//! some values move between `HostConfig` and `Config.HostConfig`. The
//! accessors here absorb the missing/`null` variance so the comparator only
//! deals with values.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn empty_section() -> &'static Map<String, Value> {
    static EMPTY: OnceLock<Map<String, Value>> = OnceLock::new();
    EMPTY.get_or_init(Map::new)
}

// =============================================================================
// Container Info
// =============================================================================

/// Snapshot of a live container as reported by the engine.
///
/// Wraps the raw inspect document: top-level state, a `Config` sub-mapping,
/// a `HostConfig` sub-mapping and the `Mounts` list. Fetched fresh for every
/// comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerInfo(Value);

impl ContainerInfo {
    /// Wraps an inspect document.
    pub fn new(raw: Value) -> Self {
        Self(raw)
    }

    /// Returns the raw inspect document.
    pub fn raw(&self) -> &Value {
        &self.0
    }

    /// Top-level field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// `Config` sub-mapping (empty when absent).
    pub fn config(&self) -> &Map<String, Value> {
        self.section("Config")
    }

    /// `HostConfig` sub-mapping (empty when absent).
    pub fn host_config(&self) -> &Map<String, Value> {
        self.section("HostConfig")
    }

    /// `State` sub-mapping (empty when absent).
    pub fn state(&self) -> &Map<String, Value> {
        self.section("State")
    }

    /// `HostConfig` merged with `Config.HostConfig`, the latter winning.
    pub fn merged_host_config(&self) -> Map<String, Value> {
        let mut merged = self.host_config().clone();
        if let Some(Value::Object(nested)) = self.config().get("HostConfig") {
            for (k, v) in nested {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }

    /// Field of `Config`, ignoring `null`.
    pub fn config_value(&self, key: &str) -> Option<&Value> {
        self.config().get(key).filter(|v| !v.is_null())
    }

    /// Field of `HostConfig`, ignoring `null`.
    pub fn host_value(&self, key: &str) -> Option<&Value> {
        self.host_config().get(key).filter(|v| !v.is_null())
    }

    /// String field of `HostConfig`; empty strings count as absent.
    pub fn host_str(&self, key: &str) -> Option<&str> {
        self.host_value(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// List of strings in `HostConfig` (empty when absent or `null`).
    pub fn host_strings(&self, key: &str) -> Vec<String> {
        strings(self.host_value(key))
    }

    /// List of strings in `Config` (empty when absent or `null`).
    pub fn config_strings(&self, key: &str) -> Vec<String> {
        strings(self.config_value(key))
    }

    /// Raw `Mounts` records.
    pub fn mounts(&self) -> &[Value] {
        match self.get("Mounts") {
            Some(Value::Array(items)) => items,
            _ => &[],
        }
    }

    /// Container status (`running`, `created`, `exited`, ...).
    pub fn status(&self) -> Option<&str> {
        self.state().get("Status").and_then(Value::as_str)
    }

    /// Health status, `None` when the container has no healthcheck.
    pub fn health(&self) -> Option<&str> {
        self.state()
            .get("Health")
            .and_then(|h| h.get("Status"))
            .and_then(Value::as_str)
    }

    /// Returns true if the engine reports the container as running.
    pub fn is_running(&self) -> bool {
        self.status() == Some("running")
    }

    /// Image id the container was created from.
    pub fn image_id(&self) -> Option<&str> {
        self.get("Image").and_then(Value::as_str)
    }

    /// Executable of the main process.
    pub fn path(&self) -> Option<&str> {
        self.get("Path").and_then(Value::as_str)
    }

    /// Arguments of the main process.
    pub fn args(&self) -> Vec<String> {
        strings(self.get("Args"))
    }

    /// Labels from `Config`.
    pub fn labels(&self) -> BTreeMap<String, String> {
        string_map(self.config_value("Labels"))
    }

    fn section(&self, key: &str) -> &Map<String, Value> {
        match self.0.get(key) {
            Some(Value::Object(map)) => map,
            _ => empty_section(),
        }
    }
}

impl From<Value> for ContainerInfo {
    fn from(raw: Value) -> Self {
        Self::new(raw)
    }
}

// =============================================================================
// Image Info
// =============================================================================

/// Local image metadata used by the image, label and command comparisons.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Image id (digest).
    #[serde(rename = "Id")]
    pub id: String,
    /// Labels baked into the image.
    #[serde(rename = "Labels", default, deserialize_with = "null_as_default")]
    pub labels: BTreeMap<String, String>,
    /// Image-declared entrypoint.
    #[serde(rename = "Entrypoint", default, deserialize_with = "null_as_default")]
    pub entrypoint: Vec<String>,
    /// Image-declared command.
    #[serde(rename = "Cmd", default, deserialize_with = "null_as_default")]
    pub cmd: Vec<String>,
}

// =============================================================================
// Value Helpers
// =============================================================================

/// Engines report empty lists and maps as `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Collects a JSON list (or single string) into strings.
pub(crate) fn strings(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().map(scalar_string).collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Collects a JSON mapping into string values.
pub(crate) fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| (k.clone(), scalar_string(v)))
            .collect(),
        _ => BTreeMap::new(),
    }
}

/// Renders a scalar without JSON quoting.
pub(crate) fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Returns true for values an engine uses to mean "not set".
pub(crate) fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}
