//! Result payload of one invocation.

use serde::Serialize;
use serde_json::{Map, Value};

/// Key under which changed container names are collected in the caller's
/// facts.
pub const CHANGED_CONTAINERS_FACT: &str = "changed_containers";

/// Bookkeeping of start attempts made during the invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StartReport {
    pub attempted: bool,
    /// 0 when the last attempt succeeded, 1 when it failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rc: Option<i32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

impl StartReport {
    /// Records a successful start.
    pub fn succeeded(&mut self) {
        self.attempted = true;
        self.rc = Some(0);
    }

    /// Records a start issued by the wait loop; keeps an earlier failure
    /// code.
    pub fn self_started(&mut self) {
        self.attempted = true;
        self.rc.get_or_insert(0);
    }

    /// Records a failed start.
    pub fn failed(&mut self, reason: impl Into<String>) {
        self.attempted = true;
        self.rc = Some(1);
        self.stderr = reason.into();
    }
}

/// Structured result handed back to the orchestration layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Outcome {
    pub changed: bool,
    /// Action-specific payload (e.g. volume or image attributes).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Current/desired diff of the differing attributes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    /// Ordered decision trace.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub debug: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub needs_recreate: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recreate_reasons: Vec<String>,
    #[serde(skip_serializing_if = "is_default_start")]
    pub start: StartReport,
    /// Exit code of a non-detached run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rc: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

fn is_default_start(report: &StartReport) -> bool {
    *report == StartReport::default()
}

impl Outcome {
    /// Outcome with only `changed` set.
    pub fn changed(changed: bool) -> Self {
        Self {
            changed,
            ..Self::default()
        }
    }

    /// Appends the container to the caller's changed-containers fact when
    /// this outcome changed something.
    pub fn record_changed(&self, facts: &mut Map<String, Value>, name: &str) {
        if self.changed {
            record_changed_container(facts, name);
        }
    }
}

/// Appends `name` (with `-` normalized to `_`) to the changed-containers
/// list in `facts`, once.
pub fn record_changed_container(facts: &mut Map<String, Value>, name: &str) {
    let name = Value::String(name.replace('-', "_"));
    let entry = facts
        .entry(CHANGED_CONTAINERS_FACT)
        .or_insert_with(|| Value::Array(Vec::new()));
    if !entry.is_array() {
        *entry = Value::Array(Vec::new());
    }
    if let Value::Array(list) = entry {
        if !list.contains(&name) {
            list.push(name);
        }
    }
}
