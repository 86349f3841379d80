//! Volume and bind canonicalization.
//!
//! Accepts either a structured mount record or a colon-delimited
//! `src:dst[:opts]` string and produces `(src, dst, access, propagation)`.
//!
//! # Rules
//!
//! - Trailing slashes are stripped from source and destination.
//! - A named volume reported through its storage-driver path
//!   (`/var/lib/containers/storage/volumes/<name>/_data`) or as a `volume`
//!   mount record with a `Name` becomes `<name>`.
//! - Propagation loses its recursive `r` prefix; `private` is the default and
//!   canonicalizes to the empty string.
//! - Empty entries and the `/dev/pts` pseudo-mount (empty or `devpts` source)
//!   canonicalize to `None` and never take part in a comparison.

use crate::constants::{
    DEVPTS_SOURCE, PSEUDO_MOUNT_DESTINATION, VOLUME_STORAGE_PREFIX, VOLUME_STORAGE_SUFFIX,
};
use crate::error::{Error, Result};
use crate::spec::{MountRecord, VolumeSpec};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

const PROPAGATION_MODES: &[&str] = &["shared", "rshared", "slave", "rslave", "private", "rprivate"];

/// Access mode of a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    /// Read-write (`rw`), the default.
    Rw,
    /// Read-only (`ro`).
    Ro,
}

impl Access {
    /// Returns the option string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rw => "rw",
            Self::Ro => "ro",
        }
    }
}

/// Canonical volume tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CanonicalVolume {
    pub source: String,
    pub destination: String,
    pub access: Access,
    /// Propagation without the `r` prefix; empty means private.
    pub propagation: String,
}

impl CanonicalVolume {
    fn normalize(source: &str, destination: &str, access: Access, propagation: &str) -> Option<Self> {
        let mut source = strip_trailing_slash(source);
        let destination = strip_trailing_slash(destination);

        if let Some(name) = storage_volume_name(&source) {
            source = name;
        }

        let propagation = propagation.strip_prefix('r').unwrap_or(propagation);
        let propagation = if propagation == "private" { "" } else { propagation };

        let volume = Self {
            source,
            destination,
            access,
            propagation: propagation.to_string(),
        };
        (!volume.is_pseudo_mount()).then_some(volume)
    }

    /// Returns true for the engine-injected `/dev/pts` mount.
    pub fn is_pseudo_mount(&self) -> bool {
        self.destination == PSEUDO_MOUNT_DESTINATION
            && (self.source.is_empty() || self.source == DEVPTS_SOURCE)
    }

    /// Renders the tuple back into bind syntax.
    ///
    /// Parsing the result yields the same tuple.
    pub fn to_bind_string(&self) -> String {
        if self.propagation.is_empty() {
            format!("{}:{}:{}", self.source, self.destination, self.access.as_str())
        } else {
            format!(
                "{}:{}:{},{}",
                self.source,
                self.destination,
                self.access.as_str(),
                self.propagation
            )
        }
    }

    /// Comparison key that ignores access mode and propagation.
    pub fn path_key(&self) -> (&str, &str) {
        (&self.source, &self.destination)
    }
}

/// Canonicalizes a `src:dst[:opts]` string.
///
/// Returns `Ok(None)` for empty entries and pseudo-mounts.
pub fn canonical_bind(entry: &str) -> Result<Option<CanonicalVolume>> {
    let entry = entry.trim();
    if entry.is_empty() {
        return Ok(None);
    }

    let mut parts = entry.splitn(3, ':');
    let source = parts.next().unwrap_or_default();
    let destination = match parts.next() {
        Some(dst) if !dst.is_empty() => dst,
        _ => return Err(Error::MalformedVolume(entry.to_string())),
    };
    let opts: Vec<&str> = parts
        .next()
        .map(|o| o.split(',').filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    let access = if opts.contains(&"ro") { Access::Ro } else { Access::Rw };
    let propagation = opts
        .iter()
        .rev()
        .find(|o| PROPAGATION_MODES.contains(o))
        .copied()
        .unwrap_or("");

    Ok(CanonicalVolume::normalize(source, destination, access, propagation))
}

/// Canonicalizes a structured mount record.
pub fn canonical_mount(record: &MountRecord) -> Option<CanonicalVolume> {
    if record.kind.as_deref() == Some(DEVPTS_SOURCE) {
        return None;
    }
    if record.source.is_empty() && record.destination.is_empty() {
        return None;
    }

    // Named volumes report their storage path as source; the name is what
    // the caller declared.
    let source = match (record.kind.as_deref(), record.name.as_deref()) {
        (Some("volume"), Some(name)) if !name.is_empty() => name,
        _ => record.source.as_str(),
    };

    let access = if record.rw { Access::Rw } else { Access::Ro };
    CanonicalVolume::normalize(
        source,
        &record.destination,
        access,
        record.propagation.as_deref().unwrap_or(""),
    )
}

/// Canonicalizes a declared volume in either syntax.
pub fn canonical_volume(spec: &VolumeSpec) -> Result<Option<CanonicalVolume>> {
    match spec {
        VolumeSpec::Bind(entry) => canonical_bind(entry),
        VolumeSpec::Mount(record) => Ok(canonical_mount(record)),
    }
}

/// Canonicalizes a live `Mounts` record or `Binds` entry.
pub fn canonical_live(value: &Value) -> Result<Option<CanonicalVolume>> {
    match value {
        Value::String(entry) => canonical_bind(entry),
        Value::Object(_) => {
            let record: MountRecord = serde_json::from_value(value.clone())
                .map_err(|e| Error::MalformedVolume(format!("{value}: {e}")))?;
            Ok(canonical_mount(&record))
        }
        Value::Null => Ok(None),
        other => Err(Error::MalformedVolume(other.to_string())),
    }
}

/// Canonicalizes every declared volume, dropping empty entries and
/// pseudo-mounts.
pub fn canonical_volume_set(specs: &[VolumeSpec]) -> Result<BTreeSet<CanonicalVolume>> {
    let mut set = BTreeSet::new();
    for spec in specs {
        if let Some(volume) = canonical_volume(spec)? {
            set.insert(volume);
        }
    }
    Ok(set)
}

fn strip_trailing_slash(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Extracts `<name>` from `<prefix><name>/_data`.
fn storage_volume_name(source: &str) -> Option<String> {
    let rest = source.strip_prefix(VOLUME_STORAGE_PREFIX)?;
    let name = rest.strip_suffix(VOLUME_STORAGE_SUFFIX)?;
    (!name.is_empty() && !name.contains('/')).then(|| name.to_string())
}
