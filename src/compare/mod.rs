//! Drift comparator.
//!
//! Decides, attribute by attribute, whether a live container differs from
//! its desired spec. Attributes live in a declarative table; each entry knows
//! how to decide `differs` and how to snapshot both sides for diagnostics.
//! Every attribute is evaluated (no short-circuit) and the differing keys are
//! collected into a [`DriftResult`], in table order.
//!
//! # Engine Quirks
//!
//! The comparison logic is engine-agnostic. What one engine injects on its own
//! is described by [`EngineQuirks`] and suppressed before comparing:
//!
//! | Quirk                    | Docker | Podman |
//! |--------------------------|--------|--------|
//! | implicit capability      | -      | `CAP_AUDIT_WRITE` |
//! | default security option  | -      | `unmask=all` |
//! | restart supervision      | engine | service supervisor (when delegated) |
//!
//! The `/dev/pts` pseudo-mount is suppressed for every engine.
//!
//! # Fatal Errors
//!
//! Configuration problems (unsupported dimension, bad healthcheck, malformed
//! volume, bad environment entry) are reported before any attribute is
//! compared.

mod rules;

use crate::canonical::{
    canonical_desired_healthcheck, desired_environment, validate_dimensions,
};
use crate::constants::{DEFAULT_SECURITY_OPT, IMPLICIT_CAPABILITY};
use crate::diagnostics::{redact_attribute, DebugTrace};
use crate::error::Result;
use crate::inspect::{ContainerInfo, ImageInfo};
use crate::spec::{ContainerEngine, DesiredSpec};
use serde::Serialize;
use serde_json::Value;

// =============================================================================
// Attribute Keys
// =============================================================================

/// Compared attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKey {
    CapAdd,
    SecurityOpt,
    Image,
    IpcMode,
    Labels,
    Privileged,
    PidMode,
    CgroupnsMode,
    Tmpfs,
    Volumes,
    VolumesFrom,
    Environment,
    State,
    Dimensions,
    Command,
    Healthcheck,
    RestartPolicy,
    User,
}

impl AttributeKey {
    /// Attribute name as used in parameters and diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CapAdd => "cap_add",
            Self::SecurityOpt => "security_opt",
            Self::Image => "image",
            Self::IpcMode => "ipc_mode",
            Self::Labels => "labels",
            Self::Privileged => "privileged",
            Self::PidMode => "pid_mode",
            Self::CgroupnsMode => "cgroupns_mode",
            Self::Tmpfs => "tmpfs",
            Self::Volumes => "volumes",
            Self::VolumesFrom => "volumes_from",
            Self::Environment => "environment",
            Self::State => "state",
            Self::Dimensions => "dimensions",
            Self::Command => "command",
            Self::Healthcheck => "healthcheck",
            Self::RestartPolicy => "restart_policy",
            Self::User => "user",
        }
    }

    /// Every attribute, in comparison order.
    pub fn all() -> impl Iterator<Item = AttributeKey> {
        ATTRIBUTES.iter().map(|a| a.key)
    }
}

impl std::fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Engine Quirks
// =============================================================================

/// Values an engine injects on its own, suppressed before comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineQuirks {
    /// Capabilities added to non-privileged containers.
    pub implicit_caps: Vec<&'static str>,
    /// Security options added when none are requested.
    pub default_security_opts: Vec<&'static str>,
    /// Restart supervision is owned by the service supervisor.
    pub restart_delegated: bool,
}

impl EngineQuirks {
    /// Docker injects nothing.
    pub fn docker() -> Self {
        Self::default()
    }

    /// Podman quirks.
    pub fn podman(restart_via_supervisor: bool) -> Self {
        Self {
            implicit_caps: vec![IMPLICIT_CAPABILITY],
            default_security_opts: vec![DEFAULT_SECURITY_OPT],
            restart_delegated: restart_via_supervisor,
        }
    }

    /// Quirks of the engine named in the spec.
    pub fn for_spec(spec: &DesiredSpec) -> Self {
        match spec.container_engine {
            ContainerEngine::Docker => Self::docker(),
            ContainerEngine::Podman => Self::podman(spec.restart_via_supervisor),
        }
    }
}

/// What makes two volumes equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VolumeMatch {
    /// Source and destination only.
    #[default]
    Path,
    /// Source, destination, access mode and propagation.
    Strict,
}

// =============================================================================
// Drift Result
// =============================================================================

/// One differing attribute with both sides as rendered for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftEntry {
    pub key: AttributeKey,
    pub current: Value,
    pub desired: Value,
}

/// Outcome of one comparison.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DriftResult {
    entries: Vec<DriftEntry>,
    /// Some differences cannot be fixed by a restart.
    pub needs_recreate: bool,
    /// Why a recreate is needed.
    pub recreate_reasons: Vec<String>,
}

impl DriftResult {
    /// Returns true if any attribute differs.
    pub fn changed(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Differing attributes, in comparison order.
    pub fn keys(&self) -> impl Iterator<Item = AttributeKey> + '_ {
        self.entries.iter().map(|e| e.key)
    }

    /// Returns true if `key` differs.
    pub fn contains(&self, key: AttributeKey) -> bool {
        self.entries.iter().any(|e| e.key == key)
    }

    /// Returns true if `key` is the only differing attribute.
    pub fn only(&self, key: AttributeKey) -> bool {
        self.entries.len() == 1 && self.entries[0].key == key
    }

    /// Differing attributes with their snapshots.
    pub fn entries(&self) -> &[DriftEntry] {
        &self.entries
    }

    /// Builds a result from already-computed entries.
    pub fn from_entries(entries: Vec<DriftEntry>) -> Self {
        Self {
            entries,
            ..Self::default()
        }
    }

    fn push(&mut self, entry: DriftEntry) {
        self.entries.push(entry);
    }
}

// =============================================================================
// Attribute Table
// =============================================================================

/// Inputs of one comparison.
pub(crate) struct CompareContext<'a> {
    pub spec: &'a DesiredSpec,
    pub live: &'a ContainerInfo,
    /// Local image matching `spec.image`; `None` when not present locally.
    pub image: Option<&'a ImageInfo>,
    pub quirks: &'a EngineQuirks,
    pub volume_match: VolumeMatch,
}

type DiffersFn = fn(&CompareContext<'_>) -> Result<bool>;
type SnapshotFn = fn(&CompareContext<'_>) -> (Value, Value);

struct Attribute {
    key: AttributeKey,
    differs: DiffersFn,
    /// `(current, desired)`
    snapshot: SnapshotFn,
}

const ATTRIBUTES: &[Attribute] = &[
    Attribute { key: AttributeKey::CapAdd, differs: rules::cap_add, snapshot: rules::cap_add_snapshot },
    Attribute { key: AttributeKey::SecurityOpt, differs: rules::security_opt, snapshot: rules::security_opt_snapshot },
    Attribute { key: AttributeKey::Image, differs: rules::image, snapshot: rules::image_snapshot },
    Attribute { key: AttributeKey::IpcMode, differs: rules::ipc_mode, snapshot: rules::ipc_mode_snapshot },
    Attribute { key: AttributeKey::Labels, differs: rules::labels, snapshot: rules::labels_snapshot },
    Attribute { key: AttributeKey::Privileged, differs: rules::privileged, snapshot: rules::privileged_snapshot },
    Attribute { key: AttributeKey::PidMode, differs: rules::pid_mode, snapshot: rules::pid_mode_snapshot },
    Attribute { key: AttributeKey::CgroupnsMode, differs: rules::cgroupns_mode, snapshot: rules::cgroupns_mode_snapshot },
    Attribute { key: AttributeKey::Tmpfs, differs: rules::tmpfs, snapshot: rules::tmpfs_snapshot },
    Attribute { key: AttributeKey::Volumes, differs: rules::volumes, snapshot: rules::volumes_snapshot },
    Attribute { key: AttributeKey::VolumesFrom, differs: rules::volumes_from, snapshot: rules::volumes_from_snapshot },
    Attribute { key: AttributeKey::Environment, differs: rules::environment, snapshot: rules::environment_snapshot },
    Attribute { key: AttributeKey::State, differs: rules::state, snapshot: rules::state_snapshot },
    Attribute { key: AttributeKey::Dimensions, differs: rules::dimensions, snapshot: rules::dimensions_snapshot },
    Attribute { key: AttributeKey::Command, differs: rules::command, snapshot: rules::command_snapshot },
    Attribute { key: AttributeKey::Healthcheck, differs: rules::healthcheck, snapshot: rules::healthcheck_snapshot },
    Attribute { key: AttributeKey::RestartPolicy, differs: rules::restart_policy, snapshot: rules::restart_policy_snapshot },
    Attribute { key: AttributeKey::User, differs: rules::user, snapshot: rules::user_snapshot },
];

fn attribute(key: AttributeKey) -> &'static Attribute {
    ATTRIBUTES
        .iter()
        .find(|a| a.key == key)
        .unwrap_or(&ATTRIBUTES[0])
}

// =============================================================================
// Comparator
// =============================================================================

/// Engine-agnostic drift comparator.
#[derive(Debug, Clone, Default)]
pub struct Comparator {
    quirks: EngineQuirks,
    volume_match: VolumeMatch,
}

impl Comparator {
    /// Creates a comparator for an engine.
    pub fn new(quirks: EngineQuirks) -> Self {
        Self {
            quirks,
            volume_match: VolumeMatch::default(),
        }
    }

    /// Comparator for the engine named in the spec.
    pub fn for_spec(spec: &DesiredSpec) -> Self {
        Self::new(EngineQuirks::for_spec(spec))
    }

    /// Sets the volume equality rule.
    #[must_use]
    pub fn with_volume_match(mut self, volume_match: VolumeMatch) -> Self {
        self.volume_match = volume_match;
        self
    }

    /// Engine quirks in effect.
    pub fn quirks(&self) -> &EngineQuirks {
        &self.quirks
    }

    /// Rejects desired specs that cannot be compared at all.
    pub fn validate(spec: &DesiredSpec) -> Result<()> {
        validate_dimensions(&spec.dimensions)?;
        canonical_desired_healthcheck(spec.healthcheck.as_ref())?;
        if let Some(env) = &spec.environment {
            desired_environment(env)?;
        }
        crate::canonical::volume::canonical_volume_set(&spec.volumes)?;
        Ok(())
    }

    /// Compares every attribute.
    pub fn compare(
        &self,
        spec: &DesiredSpec,
        live: &ContainerInfo,
        image: Option<&ImageInfo>,
        trace: &mut DebugTrace,
    ) -> Result<DriftResult> {
        Self::validate(spec)?;
        let cx = self.context(spec, live, image);

        let mut result = DriftResult::default();
        for attribute in ATTRIBUTES {
            if (attribute.differs)(&cx)? {
                let (current, desired) = (attribute.snapshot)(&cx);
                let (shown_current, shown_desired) =
                    redact_attribute(attribute.key, &current, &desired);
                trace.record(format!(
                    "{} differs: expected={} actual={}",
                    attribute.key, shown_desired, shown_current
                ));
                tracing::debug!(attribute = %attribute.key, "attribute differs");
                if attribute.key == AttributeKey::User {
                    result.needs_recreate = true;
                    result.recreate_reasons.push(attribute.key.as_str().to_string());
                }
                result.push(DriftEntry {
                    key: attribute.key,
                    current,
                    desired,
                });
            } else {
                trace.detail(format!("{} matches", attribute.key));
            }
        }
        Ok(result)
    }

    /// Compares a single attribute.
    pub fn differs(
        &self,
        key: AttributeKey,
        spec: &DesiredSpec,
        live: &ContainerInfo,
        image: Option<&ImageInfo>,
    ) -> Result<bool> {
        (attribute(key).differs)(&self.context(spec, live, image))
    }

    /// `(current, desired)` rendering of a single attribute.
    pub fn snapshot(
        &self,
        key: AttributeKey,
        spec: &DesiredSpec,
        live: &ContainerInfo,
        image: Option<&ImageInfo>,
    ) -> (Value, Value) {
        (attribute(key).snapshot)(&self.context(spec, live, image))
    }

    fn context<'a>(
        &'a self,
        spec: &'a DesiredSpec,
        live: &'a ContainerInfo,
        image: Option<&'a ImageInfo>,
    ) -> CompareContext<'a> {
        CompareContext {
            spec,
            live,
            image,
            quirks: &self.quirks,
            volume_match: self.volume_match,
        }
    }
}
