//! Desired container specification.
//!
//! This module defines the request-scoped input of an invocation:
//! - `DesiredSpec`: declared state of exactly one container
//! - `Action`: the operation the caller asks for
//! - `VolumeSpec` / `MountRecord`: volume declarations in either surface syntax
//! - `EnvironmentSpec`: environment as a mapping or a `KEY=VALUE` list
//!
//! # Supported Formats
//!
//! - **Parameter set**: a flat JSON object, see [`DesiredSpec::from_params`]
//! - **JSON** and **YAML** documents with the same shape

use crate::constants::{CONFIG_STRATEGY_ENV, DEBUG_ENV_KEY, DEFAULT_GRACEFUL_TIMEOUT_SECS};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Parameter holding the shared-defaults layer.
const COMMON_OPTIONS_KEY: &str = "common_options";

/// Parameter holding an explicit list of specified option names.
const SPECIFIED_OPTIONS_KEY: &str = "_specified_options";

// =============================================================================
// Engine and State
// =============================================================================

/// Container engine backing the invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerEngine {
    /// Docker engine.
    #[default]
    Docker,
    /// Podman engine.
    Podman,
}

impl std::fmt::Display for ContainerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Docker => write!(f, "docker"),
            Self::Podman => write!(f, "podman"),
        }
    }
}

/// Declared run state of the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    /// Container must be running.
    #[default]
    Running,
    /// Alias of `Running`.
    Started,
    /// Container must exist but not run.
    Exited,
    /// Container must be paused.
    Paused,
}

impl DesiredState {
    /// Returns the state name as reported by the caller.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Started => "started",
            Self::Exited => "exited",
            Self::Paused => "paused",
        }
    }
}

// =============================================================================
// Volumes and Environment
// =============================================================================

/// Structured mount record, as reported in the engine's `Mounts` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRecord {
    /// Host path or storage path of the volume.
    #[serde(rename = "Source", default)]
    pub source: String,
    /// Path inside the container.
    #[serde(rename = "Destination", default)]
    pub destination: String,
    /// Read-write flag.
    #[serde(rename = "RW", default = "default_true")]
    pub rw: bool,
    /// Mount propagation (`rprivate`, `shared`, ...).
    #[serde(rename = "Propagation", default, skip_serializing_if = "Option::is_none")]
    pub propagation: Option<String>,
    /// Mount type (`bind`, `volume`, `devpts`, ...).
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Volume name for named volumes.
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A declared volume: either `src:dst[:opts]` or a mount record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VolumeSpec {
    /// Colon-delimited bind string.
    Bind(String),
    /// Structured mount record.
    Mount(MountRecord),
}

impl From<&str> for VolumeSpec {
    fn from(s: &str) -> Self {
        VolumeSpec::Bind(s.to_string())
    }
}

/// Declared environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvironmentSpec {
    /// `{KEY: VALUE}` mapping; `null` values become empty strings.
    Map(BTreeMap<String, Option<Value>>),
    /// `["KEY=VALUE", ...]` list.
    List(Vec<String>),
}

// =============================================================================
// Actions
// =============================================================================

/// Operation requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CompareContainer,
    CompareImage,
    CreateVolume,
    EnsureImage,
    PullImage,
    RecreateOrRestartContainer,
    RemoveContainer,
    RemoveImage,
    RemoveVolume,
    RestartContainer,
    StartContainer,
    StopContainer,
    StopAndRemoveContainer,
}

impl Action {
    /// Returns the action name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CompareContainer => "compare_container",
            Self::CompareImage => "compare_image",
            Self::CreateVolume => "create_volume",
            Self::EnsureImage => "ensure_image",
            Self::PullImage => "pull_image",
            Self::RecreateOrRestartContainer => "recreate_or_restart_container",
            Self::RemoveContainer => "remove_container",
            Self::RemoveImage => "remove_image",
            Self::RemoveVolume => "remove_volume",
            Self::RestartContainer => "restart_container",
            Self::StartContainer => "start_container",
            Self::StopContainer => "stop_container",
            Self::StopAndRemoveContainer => "stop_and_remove_container",
        }
    }

    /// Parameters that must be present for this action.
    pub fn required_parameters(&self) -> &'static [&'static str] {
        match self {
            Self::PullImage | Self::EnsureImage | Self::RemoveImage => &["image"],
            Self::StartContainer => &["image", "name"],
            _ => &["name"],
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Desired Spec
// =============================================================================

fn default_true() -> bool {
    true
}

/// Declared state of one container for one invocation.
///
/// Immutable once built. Fields absent from the parameter set take the
/// engine-neutral defaults below; [`DesiredSpec::is_specified`] tells an
/// explicitly given default apart from an omitted one.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DesiredSpec {
    pub name: Option<String>,
    pub image: Option<String>,
    pub command: Option<String>,
    pub entrypoint: Option<String>,
    pub environment: Option<EnvironmentSpec>,
    pub volumes: Vec<VolumeSpec>,
    pub volumes_from: Vec<String>,
    pub tmpfs: Vec<String>,
    pub cap_add: Vec<String>,
    pub security_opt: Vec<String>,
    pub ipc_mode: Option<String>,
    pub pid_mode: Option<String>,
    pub pid: Option<String>,
    pub cgroupns_mode: Option<String>,
    pub privileged: bool,
    pub labels: BTreeMap<String, String>,
    /// Resource constraints keyed by desired dimension name.
    pub dimensions: BTreeMap<String, Value>,
    /// Raw healthcheck mapping, validated by the healthcheck canonicalizer.
    pub healthcheck: Option<BTreeMap<String, Value>>,
    pub restart_policy: Option<String>,
    pub restart_retries: Option<u32>,
    pub state: DesiredState,
    pub user: Option<String>,
    pub detach: bool,
    pub start: bool,
    pub defer_start: bool,
    pub wait: bool,
    pub remove_on_exit: bool,
    pub ignore_missing: bool,
    pub tty: bool,
    /// Grace period for stopping, in seconds.
    pub graceful_timeout: Option<u64>,
    /// Upper bound of the wait loop, in seconds.
    pub client_timeout: Option<u64>,
    pub container_engine: ContainerEngine,
    /// Restart supervision is delegated to the service supervisor.
    pub restart_via_supervisor: bool,
    pub auth_username: Option<String>,
    pub auth_password: Option<String>,
    pub auth_registry: Option<String>,
    pub tls_verify: bool,
    /// Overrides the config-check command.
    pub config_check_command: Option<Vec<String>>,
    #[serde(skip)]
    specified: BTreeSet<String>,
}

impl Default for DesiredSpec {
    fn default() -> Self {
        Self {
            name: None,
            image: None,
            command: None,
            entrypoint: None,
            environment: None,
            volumes: Vec::new(),
            volumes_from: Vec::new(),
            tmpfs: Vec::new(),
            cap_add: Vec::new(),
            security_opt: Vec::new(),
            ipc_mode: None,
            pid_mode: None,
            pid: None,
            cgroupns_mode: None,
            privileged: false,
            labels: BTreeMap::new(),
            dimensions: BTreeMap::new(),
            healthcheck: None,
            restart_policy: None,
            restart_retries: None,
            state: DesiredState::Running,
            user: None,
            detach: true,
            start: true,
            defer_start: false,
            wait: false,
            remove_on_exit: true,
            ignore_missing: false,
            tty: false,
            graceful_timeout: None,
            client_timeout: None,
            container_engine: ContainerEngine::Docker,
            restart_via_supervisor: false,
            auth_username: None,
            auth_password: None,
            auth_registry: None,
            tls_verify: false,
            config_check_command: None,
            specified: BTreeSet::new(),
        }
    }
}

impl DesiredSpec {
    /// Builds a spec from a flat parameter set.
    ///
    /// `null` parameters are treated as omitted. A `common_options` object
    /// fills every parameter not given explicitly; its keys count as
    /// specified under both `key` and `common_options.key`. When a
    /// `_specified_options` list is present it replaces the derived set.
    pub fn from_params(params: Value) -> Result<Self> {
        let Value::Object(mut params) = params else {
            return Err(Error::InvalidParameters(
                "parameter set must be a mapping".to_string(),
            ));
        };

        let common = match params.remove(COMMON_OPTIONS_KEY) {
            Some(Value::Object(map)) => map,
            Some(Value::Null) | None => Map::new(),
            Some(other) => {
                return Err(Error::InvalidParameters(format!(
                    "{COMMON_OPTIONS_KEY} must be a mapping, got {other}"
                )))
            }
        };
        let explicit = match params.remove(SPECIFIED_OPTIONS_KEY) {
            Some(Value::Array(items)) => Some(
                items
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect::<BTreeSet<_>>(),
            ),
            _ => None,
        };

        let mut specified = BTreeSet::new();
        let mut merged = Map::new();
        for (key, value) in params {
            if value.is_null() {
                continue;
            }
            specified.insert(key.clone());
            merged.insert(key, value);
        }
        for (key, value) in common {
            if value.is_null() {
                continue;
            }
            specified.insert(format!("{COMMON_OPTIONS_KEY}.{key}"));
            specified.insert(key.clone());
            merged.entry(key).or_insert(value);
        }

        let mut spec: DesiredSpec = serde_json::from_value(Value::Object(merged))
            .map_err(|e| Error::InvalidParameters(e.to_string()))?;
        spec.specified = explicit.unwrap_or(specified);
        Ok(spec)
    }

    /// Parses a JSON parameter document.
    pub fn from_json(s: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(s)?;
        Self::from_params(value)
    }

    /// Parses a YAML parameter document.
    pub fn from_yaml(s: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(s)?;
        Self::from_params(value)
    }

    /// Replaces the explicitly specified option set.
    #[must_use]
    pub fn with_specified<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.specified = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the explicitly specified option names.
    pub fn specified(&self) -> &BTreeSet<String> {
        &self.specified
    }

    /// Returns true if the caller explicitly set `key`, directly or through
    /// the shared-defaults layer.
    pub fn is_specified(&self, key: &str) -> bool {
        self.specified.contains(key)
            || self
                .specified
                .contains(&format!("{COMMON_OPTIONS_KEY}.{key}"))
    }

    /// Returns true if any of `keys` was explicitly set.
    pub fn option_specified(&self, keys: &[&str]) -> bool {
        keys.iter().any(|k| self.is_specified(k))
    }

    /// Returns the container name or a missing-parameter error.
    pub fn require_name(&self, action: Action) -> Result<&str> {
        self.name.as_deref().ok_or(Error::MissingParameter {
            action: action.to_string(),
            parameter: "name",
        })
    }

    /// Returns the image reference or a missing-parameter error.
    pub fn require_image(&self, action: Action) -> Result<&str> {
        self.image.as_deref().ok_or(Error::MissingParameter {
            action: action.to_string(),
            parameter: "image",
        })
    }

    /// Checks that every parameter `action` needs is present.
    pub fn validate_for(&self, action: Action) -> Result<()> {
        for parameter in action.required_parameters() {
            match *parameter {
                "name" => {
                    self.require_name(action)?;
                }
                "image" => {
                    self.require_image(action)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Desired PID namespace mode, falling back to the `pid` alias.
    pub fn desired_pid_mode(&self) -> Option<&str> {
        match self.pid_mode.as_deref() {
            Some(mode) if !mode.is_empty() => Some(mode),
            _ => self.pid.as_deref().filter(|m| !m.is_empty()),
        }
    }

    /// Grace period for stopping the container.
    pub fn graceful_timeout(&self) -> u64 {
        match self.graceful_timeout {
            Some(0) | None => DEFAULT_GRACEFUL_TIMEOUT_SECS,
            Some(secs) => secs,
        }
    }

    /// Looks up one desired environment value without validating the rest.
    pub fn environment_value(&self, key: &str) -> Option<String> {
        match self.environment.as_ref()? {
            EnvironmentSpec::Map(map) => map.get(key).map(|v| match v {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            }),
            EnvironmentSpec::List(items) => items.iter().find_map(|item| {
                item.split_once('=')
                    .filter(|(k, _)| *k == key)
                    .map(|(_, v)| v.to_string())
            }),
        }
    }

    /// Configuration strategy marker from the desired environment.
    pub fn config_strategy(&self) -> Option<String> {
        self.environment_value(CONFIG_STRATEGY_ENV)
    }

    /// Returns true if the debug-only environment key is truthy.
    pub fn debug_enabled(&self) -> bool {
        matches!(
            self.environment_value(DEBUG_ENV_KEY)
                .map(|v| v.to_ascii_lowercase())
                .as_deref(),
            Some("1" | "true" | "yes" | "on")
        )
    }
}
