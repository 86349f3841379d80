//! Per-attribute comparison rules and diagnostic snapshots.

use super::{CompareContext, VolumeMatch};
use crate::canonical::volume::{canonical_live, canonical_volume_set, CanonicalVolume};
use crate::canonical::{
    canonical_caps, canonical_desired_healthcheck, canonical_live_healthcheck, canonical_user,
    capabilities_equivalent, desired_environment, dimension_values_differ,
    is_empty_dimensions, split_command, ulimit, whitespace_equal,
};
use crate::constants::{DEBUG_ENV_KEY, DIMENSION_MAP};
use crate::error::Result;
use crate::inspect::{is_falsy, scalar_string, strings};
use crate::spec::DesiredState;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

fn sorted(mut items: Vec<String>) -> Vec<String> {
    items.sort();
    items
}

// =============================================================================
// Capabilities and Security Options
// =============================================================================

pub(super) fn cap_add(cx: &CompareContext<'_>) -> Result<bool> {
    let live = cx.live.host_strings("CapAdd");
    Ok(!capabilities_equivalent(&cx.spec.cap_add, &live, &cx.quirks.implicit_caps))
}

pub(super) fn cap_add_snapshot(cx: &CompareContext<'_>) -> (Value, Value) {
    (
        json!(canonical_caps(cx.live.host_strings("CapAdd"))),
        json!(canonical_caps(&cx.spec.cap_add)),
    )
}

fn security_opt_disabled(cx: &CompareContext<'_>) -> bool {
    cx.spec.ipc_mode.as_deref() == Some("host")
        || cx.spec.desired_pid_mode() == Some("host")
        || cx.spec.privileged
}

fn live_security_opts(cx: &CompareContext<'_>) -> Vec<String> {
    let mut live = cx.live.host_strings("SecurityOpt");
    if cx.spec.security_opt.is_empty() {
        live.retain(|o| !cx.quirks.default_security_opts.iter().any(|d| *d == o.as_str()));
    }
    sorted(live)
}

pub(super) fn security_opt(cx: &CompareContext<'_>) -> Result<bool> {
    if security_opt_disabled(cx) {
        return Ok(false);
    }
    Ok(sorted(cx.spec.security_opt.clone()) != live_security_opts(cx))
}

pub(super) fn security_opt_snapshot(cx: &CompareContext<'_>) -> (Value, Value) {
    (
        json!(live_security_opts(cx)),
        json!(sorted(cx.spec.security_opt.clone())),
    )
}

// =============================================================================
// Image and Labels
// =============================================================================

fn last_segment(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}

pub(super) fn image(cx: &CompareContext<'_>) -> Result<bool> {
    let Some(desired) = cx.spec.image.as_deref() else {
        return Ok(false);
    };
    let Some(local) = cx.image else {
        return Ok(true);
    };
    if cx.live.image_id() != Some(local.id.as_str()) {
        return Ok(true);
    }
    let live_ref = cx
        .live
        .config_value("Image")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Ok(last_segment(desired) != last_segment(live_ref))
}

pub(super) fn image_snapshot(cx: &CompareContext<'_>) -> (Value, Value) {
    let current = cx.live.config_value("Image").cloned().unwrap_or(Value::Null);
    (current, json!(cx.spec.image))
}

/// Live labels without the ones inherited from the image and not overridden.
fn own_labels(cx: &CompareContext<'_>) -> BTreeMap<String, String> {
    let mut live = cx.live.labels();
    if let Some(image) = cx.image {
        for key in image.labels.keys() {
            if !cx.spec.labels.contains_key(key) {
                live.remove(key);
            }
        }
    }
    live
}

pub(super) fn labels(cx: &CompareContext<'_>) -> Result<bool> {
    if let Some(image) = cx.image {
        let overridden = image
            .labels
            .iter()
            .any(|(k, v)| cx.spec.labels.get(k).is_some_and(|d| d != v));
        if overridden {
            return Ok(true);
        }
    }
    Ok(cx.spec.labels != own_labels(cx))
}

pub(super) fn labels_snapshot(cx: &CompareContext<'_>) -> (Value, Value) {
    (json!(own_labels(cx)), json!(cx.spec.labels))
}

// =============================================================================
// Namespaces and Privileges
// =============================================================================

pub(super) fn ipc_mode(cx: &CompareContext<'_>) -> Result<bool> {
    let Some(desired) = cx.spec.ipc_mode.as_deref() else {
        return Ok(false);
    };
    let desired = Some(desired).filter(|d| !d.is_empty());
    Ok(desired != cx.live.host_str("IpcMode"))
}

pub(super) fn ipc_mode_snapshot(cx: &CompareContext<'_>) -> (Value, Value) {
    (json!(cx.live.host_str("IpcMode")), json!(cx.spec.ipc_mode))
}

const PID_MODE_FIELDS: &[&str] = &["PidMode", "PidNS", "Pidns", "pidns", "mode", "value"];
const PID_MODE_NESTED_FIELDS: &[&str] = &["nsmode", "mode", "value"];

fn truthy<'v>(value: Option<&'v Value>) -> Option<&'v Value> {
    value.filter(|v| !is_falsy(v))
}

fn live_pid_mode(cx: &CompareContext<'_>) -> Option<Value> {
    let merged = cx.live.merged_host_config();
    PID_MODE_FIELDS
        .iter()
        .find_map(|field| truthy(merged.get(*field)))
        .cloned()
}

fn normalize_pid_mode(value: Option<&Value>) -> String {
    let value = match value {
        Some(Value::Object(nested)) => PID_MODE_NESTED_FIELDS
            .iter()
            .find_map(|field| truthy(nested.get(*field))),
        other => other,
    };
    match value.map(scalar_string).as_deref() {
        None | Some("") | Some("private") => "private".to_string(),
        Some(other) => other.to_string(),
    }
}

pub(super) fn pid_mode(cx: &CompareContext<'_>) -> Result<bool> {
    if !cx.spec.option_specified(&["pid_mode", "pid"]) {
        return Ok(false);
    }
    let desired = cx.spec.desired_pid_mode().map(|m| json!(m));
    Ok(normalize_pid_mode(desired.as_ref()) != normalize_pid_mode(live_pid_mode(cx).as_ref()))
}

pub(super) fn pid_mode_snapshot(cx: &CompareContext<'_>) -> (Value, Value) {
    let desired = cx.spec.desired_pid_mode().map(|m| json!(m));
    (
        json!(normalize_pid_mode(live_pid_mode(cx).as_ref())),
        json!(normalize_pid_mode(desired.as_ref())),
    )
}

fn live_cgroupns_mode(cx: &CompareContext<'_>) -> String {
    cx.live
        .host_str("CgroupnsMode")
        .or_else(|| cx.live.host_str("CgroupMode"))
        .unwrap_or("host")
        .to_string()
}

pub(super) fn cgroupns_mode(cx: &CompareContext<'_>) -> Result<bool> {
    match cx.spec.cgroupns_mode.as_deref() {
        None => Ok(false),
        Some(desired) => Ok(desired != live_cgroupns_mode(cx)),
    }
}

pub(super) fn cgroupns_mode_snapshot(cx: &CompareContext<'_>) -> (Value, Value) {
    (json!(live_cgroupns_mode(cx)), json!(cx.spec.cgroupns_mode))
}

fn live_privileged(cx: &CompareContext<'_>) -> bool {
    cx.live
        .host_value("Privileged")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

pub(super) fn privileged(cx: &CompareContext<'_>) -> Result<bool> {
    Ok(cx.spec.privileged != live_privileged(cx))
}

pub(super) fn privileged_snapshot(cx: &CompareContext<'_>) -> (Value, Value) {
    (json!(live_privileged(cx)), json!(cx.spec.privileged))
}

// =============================================================================
// Mounts
// =============================================================================

fn desired_tmpfs(cx: &CompareContext<'_>) -> Vec<String> {
    sorted(cx.spec.tmpfs.iter().filter(|t| !t.is_empty()).cloned().collect())
}

fn live_tmpfs(cx: &CompareContext<'_>) -> Vec<String> {
    let items = match cx.live.host_value("Tmpfs") {
        // Docker reports `{path: options}`
        Some(Value::Object(map)) => map
            .iter()
            .map(|(path, opts)| match scalar_string(opts) {
                o if o.is_empty() => path.clone(),
                o => format!("{path}:{o}"),
            })
            .collect(),
        other => strings(other),
    };
    sorted(items.into_iter().filter(|t| !t.is_empty()).collect())
}

pub(super) fn tmpfs(cx: &CompareContext<'_>) -> Result<bool> {
    Ok(desired_tmpfs(cx) != live_tmpfs(cx))
}

pub(super) fn tmpfs_snapshot(cx: &CompareContext<'_>) -> (Value, Value) {
    (json!(live_tmpfs(cx)), json!(desired_tmpfs(cx)))
}

fn live_volumes(cx: &CompareContext<'_>) -> Result<BTreeSet<CanonicalVolume>> {
    let mut set = BTreeSet::new();
    let binds: &[Value] = match cx.live.host_value("Binds") {
        Some(Value::Array(items)) => items,
        _ => &[],
    };
    for value in cx.live.mounts().iter().chain(binds) {
        if let Some(volume) = canonical_live(value)? {
            set.insert(volume);
        }
    }
    Ok(set)
}

fn volume_keys(set: &BTreeSet<CanonicalVolume>, mode: VolumeMatch) -> BTreeSet<String> {
    set.iter()
        .map(|v| match mode {
            VolumeMatch::Path => {
                let (src, dst) = v.path_key();
                format!("{src}:{dst}")
            }
            VolumeMatch::Strict => v.to_bind_string(),
        })
        .collect()
}

pub(super) fn volumes(cx: &CompareContext<'_>) -> Result<bool> {
    let desired = canonical_volume_set(&cx.spec.volumes)?;
    let live = live_volumes(cx)?;
    Ok(volume_keys(&desired, cx.volume_match) != volume_keys(&live, cx.volume_match))
}

pub(super) fn volumes_snapshot(cx: &CompareContext<'_>) -> (Value, Value) {
    let render = |set: Result<BTreeSet<CanonicalVolume>>| match set {
        Ok(set) => json!(volume_keys(&set, VolumeMatch::Strict)),
        Err(e) => json!(e.to_string()),
    };
    (render(live_volumes(cx)), render(canonical_volume_set(&cx.spec.volumes)))
}

pub(super) fn volumes_from(cx: &CompareContext<'_>) -> Result<bool> {
    Ok(sorted(cx.spec.volumes_from.clone()) != sorted(cx.live.host_strings("VolumesFrom")))
}

pub(super) fn volumes_from_snapshot(cx: &CompareContext<'_>) -> (Value, Value) {
    (
        json!(sorted(cx.live.host_strings("VolumesFrom"))),
        json!(sorted(cx.spec.volumes_from.clone())),
    )
}

// =============================================================================
// Environment and State
// =============================================================================

fn compared_environment(cx: &CompareContext<'_>) -> Result<BTreeMap<String, String>> {
    let mut desired = match &cx.spec.environment {
        Some(env) => desired_environment(env)?,
        None => BTreeMap::new(),
    };
    desired.remove(DEBUG_ENV_KEY);
    Ok(desired)
}

fn live_environment(cx: &CompareContext<'_>) -> BTreeMap<String, String> {
    cx.live
        .config_strings("Env")
        .into_iter()
        .map(|item| match item.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (item, String::new()),
        })
        .collect()
}

pub(super) fn environment(cx: &CompareContext<'_>) -> Result<bool> {
    let desired = compared_environment(cx)?;
    let live = live_environment(cx);
    Ok(desired.iter().any(|(k, v)| live.get(k) != Some(v)))
}

pub(super) fn environment_snapshot(cx: &CompareContext<'_>) -> (Value, Value) {
    let desired = compared_environment(cx).unwrap_or_default();
    let live = live_environment(cx);
    let current: Map<String, Value> = desired
        .keys()
        .map(|k| (k.clone(), live.get(k).map_or(Value::Null, |v| json!(v))))
        .collect();
    (Value::Object(current), json!(desired))
}

pub(super) fn state(cx: &CompareContext<'_>) -> Result<bool> {
    let live = cx.live.status().unwrap_or_default();
    let matches = match cx.spec.state {
        DesiredState::Running | DesiredState::Started => live == "running",
        DesiredState::Exited => matches!(live, "exited" | "created" | "configured"),
        DesiredState::Paused => live == "paused",
    };
    Ok(!matches)
}

pub(super) fn state_snapshot(cx: &CompareContext<'_>) -> (Value, Value) {
    (json!(cx.live.status()), json!(cx.spec.state.as_str()))
}

// =============================================================================
// Dimensions
// =============================================================================

/// Live value of a resource field, from `HostConfig` or its `Resources`
/// sub-mapping.
fn live_dimension(cx: &CompareContext<'_>, field: &str) -> Value {
    cx.live
        .host_value(field)
        .or_else(|| {
            cx.live
                .host_value("Resources")
                .and_then(|r| r.get(field))
                .filter(|v| !v.is_null())
        })
        .cloned()
        .unwrap_or(Value::Null)
}

fn ulimits_differ(cx: &CompareContext<'_>, declared: &Value) -> Result<bool> {
    let mut desired = ulimit::from_declared(declared)?;
    let live_value = live_dimension(cx, "Ulimits");
    let live = ulimit::from_runtime(Some(&live_value))?;
    ulimit::carry_host_managed(&mut desired, &live);
    Ok(desired != live)
}

pub(super) fn dimensions(cx: &CompareContext<'_>) -> Result<bool> {
    let desired = &cx.spec.dimensions;

    let live_defaults: Vec<Value> = DIMENSION_MAP
        .iter()
        .filter(|(key, _)| *key != "ulimits")
        .map(|(_, field)| live_dimension(cx, field))
        .collect();
    if is_empty_dimensions(desired.values()) && is_empty_dimensions(&live_defaults) {
        return Ok(false);
    }

    for (key, field) in DIMENSION_MAP {
        let live = live_dimension(cx, field);
        let differs = match (desired.get(*key), *key) {
            (Some(declared), "ulimits") => ulimits_differ(cx, declared)?,
            (None, "ulimits") => false,
            (Some(declared), _) => dimension_values_differ(key, declared, &live)?,
            // Defaults of every other resource are 0 or empty.
            (None, _) => !is_falsy(&live),
        };
        if differs {
            return Ok(true);
        }
    }
    Ok(false)
}

pub(super) fn dimensions_snapshot(cx: &CompareContext<'_>) -> (Value, Value) {
    let mut current = Map::new();
    for (key, field) in DIMENSION_MAP {
        let live = live_dimension(cx, field);
        if cx.spec.dimensions.contains_key(*key) || !is_falsy(&live) {
            current.insert(key.to_string(), live);
        }
    }
    (Value::Object(current), json!(cx.spec.dimensions))
}

// =============================================================================
// Command and Healthcheck
// =============================================================================

fn live_argv(cx: &CompareContext<'_>) -> Vec<String> {
    cx.live
        .path()
        .map(str::to_string)
        .into_iter()
        .chain(cx.live.args())
        .collect()
}

pub(super) fn command(cx: &CompareContext<'_>) -> Result<bool> {
    let Some(desired) = cx.spec.command.as_deref() else {
        return Ok(false);
    };
    let desired_argv = split_command(desired)?;
    let live = live_argv(cx);
    if desired_argv == live {
        return Ok(false);
    }

    // The engine prepends the image entrypoint unless it was overridden.
    if cx.spec.entrypoint.is_none() {
        if let Some(image) = cx.image.filter(|i| !i.entrypoint.is_empty()) {
            let with_entrypoint: Vec<String> =
                image.entrypoint.iter().cloned().chain(desired_argv).collect();
            if with_entrypoint == live {
                return Ok(false);
            }
        }
    }

    Ok(!whitespace_equal(desired, &live.join(" ")))
}

pub(super) fn command_snapshot(cx: &CompareContext<'_>) -> (Value, Value) {
    (json!(live_argv(cx).join(" ")), json!(cx.spec.command))
}

pub(super) fn healthcheck(cx: &CompareContext<'_>) -> Result<bool> {
    let desired = canonical_desired_healthcheck(cx.spec.healthcheck.as_ref())?;
    let live = canonical_live_healthcheck(cx.live.config_value("Healthcheck"));
    Ok(desired != live)
}

pub(super) fn healthcheck_snapshot(cx: &CompareContext<'_>) -> (Value, Value) {
    let desired = canonical_desired_healthcheck(cx.spec.healthcheck.as_ref()).unwrap_or(None);
    let live = canonical_live_healthcheck(cx.live.config_value("Healthcheck"));
    (json!(live), json!(desired))
}

// =============================================================================
// Restart Policy and User
// =============================================================================

/// A desired `no` (or `oneshot`) is met by any live policy that leaves
/// restarts alone: empty, `no` or `unless-stopped`. Other desired policies
/// must match by name, with an empty live name read as `no`.
fn restart_policy_matches(desired: &str, live: &str) -> bool {
    match desired {
        "no" | "oneshot" => matches!(live, "" | "no" | "unless-stopped"),
        _ => desired == if live.is_empty() { "no" } else { live },
    }
}

fn live_restart_policy(cx: &CompareContext<'_>) -> (String, u64) {
    let policy = cx.live.host_value("RestartPolicy");
    let name = policy
        .and_then(|p| p.get("Name"))
        .map(scalar_string)
        .unwrap_or_default();
    let retries = policy
        .and_then(|p| p.get("MaximumRetryCount"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    (name, retries)
}

pub(super) fn restart_policy(cx: &CompareContext<'_>) -> Result<bool> {
    if cx.quirks.restart_delegated {
        return Ok(false);
    }
    let Some(desired) = cx.spec.restart_policy.as_deref() else {
        return Ok(false);
    };
    let (live, live_retries) = live_restart_policy(cx);
    if !restart_policy_matches(desired, &live) {
        return Ok(true);
    }
    Ok(desired == "on-failure"
        && cx
            .spec
            .restart_retries
            .is_some_and(|r| u64::from(r) != live_retries))
}

pub(super) fn restart_policy_snapshot(cx: &CompareContext<'_>) -> (Value, Value) {
    let (name, retries) = live_restart_policy(cx);
    (
        json!({"name": name, "retries": retries}),
        json!({"name": cx.spec.restart_policy, "retries": cx.spec.restart_retries}),
    )
}

fn live_user(cx: &CompareContext<'_>) -> String {
    canonical_user(cx.live.config_value("User").and_then(Value::as_str))
}

pub(super) fn user(cx: &CompareContext<'_>) -> Result<bool> {
    if !cx.spec.is_specified("user") {
        return Ok(false);
    }
    Ok(canonical_user(cx.spec.user.as_deref()) != live_user(cx))
}

pub(super) fn user_snapshot(cx: &CompareContext<'_>) -> (Value, Value) {
    (json!(live_user(cx)), json!(canonical_user(cx.spec.user.as_deref())))
}
