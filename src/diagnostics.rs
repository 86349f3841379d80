//! Diagnostics: decision trace and drift diff.
//!
//! [`DebugTrace`] is the explicit logging context handed to the comparator
//! and the reconciler. Every recorded line is mirrored to `tracing` and kept
//! in order for the result payload.
//!
//! [`render_diff`] turns a [`DriftResult`] into operator-facing text: the
//! current and desired values of exactly the differing attributes, rendered
//! with sorted keys and compared line by line.
//!
//! Values of environment keys that look like secrets (see
//! [`SECRET_KEY_PATTERN`](crate::constants::SECRET_KEY_PATTERN)) never appear
//! in either rendering; the key stays visible with a masked value.

use crate::compare::{AttributeKey, DriftResult};
use crate::constants::{REDACTED, REDACTED_CHANGED, SECRET_KEY_PATTERN};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::sync::OnceLock;

// =============================================================================
// Debug Trace
// =============================================================================

/// How much the trace records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// Nothing is kept.
    Quiet,
    /// Decisions and differing attributes.
    #[default]
    Normal,
    /// Also every attribute that matched and every poll of the wait loop.
    Verbose,
}

/// Ordered, human-readable decision log for one invocation.
#[derive(Debug, Clone, Default)]
pub struct DebugTrace {
    verbosity: Verbosity,
    lines: Vec<String>,
}

impl DebugTrace {
    /// Creates an empty trace.
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            lines: Vec::new(),
        }
    }

    /// Current verbosity.
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Raises the verbosity; never lowers it.
    pub fn raise_to(&mut self, verbosity: Verbosity) {
        self.verbosity = self.verbosity.max(verbosity);
    }

    /// Records a decision line (kept at `Normal` and above).
    pub fn record(&mut self, line: impl Into<String>) {
        self.push(Verbosity::Normal, line.into());
    }

    /// Records a detail line (kept at `Verbose` only).
    pub fn detail(&mut self, line: impl Into<String>) {
        self.push(Verbosity::Verbose, line.into());
    }

    fn push(&mut self, level: Verbosity, line: String) {
        tracing::debug!(target: "driftkeeper::trace", "{}", line);
        if self.verbosity >= level {
            self.lines.push(line);
        }
    }

    /// Recorded lines, oldest first.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Consumes the trace.
    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

// =============================================================================
// Drift Diff
// =============================================================================

fn secret_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(SECRET_KEY_PATTERN).ok())
        .as_ref()
}

/// Returns true if the value of an environment key must never be rendered.
pub fn is_secret_key(key: &str) -> bool {
    // Without a pattern every key is treated as secret.
    secret_pattern().map_or(true, |re| re.is_match(key))
}

/// Renders the current/desired diff of every differing attribute.
///
/// Returns `None` when nothing differs.
pub fn render_diff(drift: &DriftResult) -> Option<String> {
    if !drift.changed() {
        return None;
    }

    let mut entries: Vec<_> = drift.entries().iter().collect();
    entries.sort_by_key(|e| e.key.as_str());

    let mut current = Vec::new();
    let mut desired = Vec::new();
    for entry in entries {
        let (live, wanted) = redact_attribute(entry.key, &entry.current, &entry.desired);
        render_value(&mut current, entry.key, &live);
        render_value(&mut desired, entry.key, &wanted);
    }
    Some(unified_diff(&current, &desired))
}

fn render_value(out: &mut Vec<String>, key: AttributeKey, value: &Value) {
    out.push(format!("[{}]", key.as_str()));
    let text = match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };
    out.extend(text.lines().map(str::to_string));
}

/// Masks secret environment values in a `(current, desired)` pair.
///
/// Only [`AttributeKey::Environment`] is touched. A secret key keeps its
/// name; a present value becomes [`REDACTED`], and a desired value that
/// differs from the live one becomes [`REDACTED_CHANGED`] so the drift stays
/// visible. Absent (null) values are left as they are.
pub fn redact_attribute(key: AttributeKey, current: &Value, desired: &Value) -> (Value, Value) {
    if key != AttributeKey::Environment {
        return (current.clone(), desired.clone());
    }
    let (Value::Object(live), Value::Object(wanted)) = (current, desired) else {
        return (mask(current), mask(desired));
    };

    let live_masked = live
        .iter()
        .map(|(k, v)| (k.clone(), if is_secret_key(k) { mask(v) } else { v.clone() }))
        .collect();
    let wanted_masked = wanted
        .iter()
        .map(|(k, v)| {
            if !is_secret_key(k) || v.is_null() {
                return (k.clone(), v.clone());
            }
            let marker = match live.get(k) {
                Some(old) if old != v && !old.is_null() => REDACTED_CHANGED,
                _ => REDACTED,
            };
            (k.clone(), Value::String(marker.to_string()))
        })
        .collect();
    (Value::Object(live_masked), Value::Object(wanted_masked))
}

fn mask(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), if is_secret_key(k) { mask(v) } else { v.clone() }))
                .collect(),
        ),
        _ => Value::String(REDACTED.to_string()),
    }
}

/// Line diff between two renderings, as a single hunk with full context.
///
/// Lines only in `current` are prefixed `- `, lines only in `desired` `+ `,
/// common lines two spaces.
pub fn unified_diff(current: &[String], desired: &[String]) -> String {
    let n = current.len();
    let m = desired.len();

    // lcs[i][j] = length of the LCS of current[i..] and desired[j..]
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if current[i] == desired[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut out = vec![
        "--- current".to_string(),
        "+++ desired".to_string(),
        format!("@@ -1,{n} +1,{m} @@"),
    ];
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if current[i] == desired[j] {
            out.push(format!("  {}", current[i]));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            out.push(format!("- {}", current[i]));
            i += 1;
        } else {
            out.push(format!("+ {}", desired[j]));
            j += 1;
        }
    }
    out.extend(current[i..].iter().map(|l| format!("- {l}")));
    out.extend(desired[j..].iter().map(|l| format!("+ {l}")));

    let mut text = out.join("\n");
    text.push('\n');
    text
}
