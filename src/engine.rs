//! Engine client interface.
//!
//! The reconciler talks to Docker or Podman only through [`EngineClient`].
//! Implementations wrap the engine's HTTP API; the reconciler never assumes
//! which one it is talking to beyond what [`ContainerWorker`] encodes.
//!
//! Every call returns the engine's own [`ApiError`] with the HTTP status the
//! engine answered with. The worker layer maps it onto the crate [`Error`]:
//!
//! | Status | Operation                 | Meaning                 |
//! |--------|---------------------------|-------------------------|
//! | 404    | inspect container/image   | absent (not an error)   |
//! | 409    | remove volume/image       | [`Error::InUse`]        |
//! | other  | any                       | [`Error::Engine`]       |
//!
//! [`ContainerWorker`]: crate::worker::ContainerWorker
//! [`Error`]: crate::error::Error
//! [`Error::InUse`]: crate::error::Error::InUse
//! [`Error::Engine`]: crate::error::Error::Engine

use crate::canonical::{Healthcheck, Ulimit};
use crate::error::Error;
use crate::inspect::{ContainerInfo, ImageInfo};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// =============================================================================
// API Errors
// =============================================================================

/// Error reported by the engine API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{explanation}")]
pub struct ApiError {
    /// HTTP status code, if the engine answered at all.
    pub status: Option<u16>,
    /// Engine-provided explanation.
    pub explanation: String,
}

/// Result type of engine calls.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    /// Creates an error with a status code.
    pub fn new(status: u16, explanation: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            explanation: explanation.into(),
        }
    }

    /// Creates an error for a failed transport (no status).
    pub fn transport(explanation: impl Into<String>) -> Self {
        Self {
            status: None,
            explanation: explanation.into(),
        }
    }

    /// 404.
    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }

    /// 409.
    pub fn is_conflict(&self) -> bool {
        self.status == Some(409)
    }

    /// 4xx.
    pub fn is_client_error(&self) -> bool {
        matches!(self.status, Some(400..=499))
    }

    /// Converts into a crate error for `operation`.
    pub fn into_error(self, operation: impl Into<String>) -> Error {
        Error::Engine {
            operation: operation.into(),
            explanation: self.explanation,
        }
    }
}

// =============================================================================
// Container Creation
// =============================================================================

/// Kind of an explicit mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    Bind,
    Devpts,
}

/// Explicit mount (Podman).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRequest {
    #[serde(rename = "type")]
    pub kind: MountKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub target: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub propagation: Option<String>,
}

/// Named volume attached at creation (Podman).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedVolumeRequest {
    pub name: String,
    pub bind: String,
    pub mode: String,
}

/// Engine restart policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "MaximumRetryCount", default)]
    pub maximum_retry_count: u32,
}

/// Everything an engine needs to create one container.
///
/// Built by the engine worker from a desired spec; fields an engine does not
/// support stay empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContainerCreate {
    pub name: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    pub environment: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    /// `src:dst:mode` binds (Docker).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub binds: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<MountRequest>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<NamedVolumeRequest>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes_from: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tmpfs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cap_add: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub security_opt: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipc_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cgroupns_mode: Option<String>,
    pub privileged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<Healthcheck>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ulimits: Vec<Ulimit>,
    /// Resource limits keyed by engine field name (`Memory`, `CpuShares`, ...).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub tty: bool,
    /// Grace period in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_timeout: Option<u64>,
}

// =============================================================================
// Exec, Logs, Volumes, Images
// =============================================================================

/// Result of a command executed inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub output: String,
}

/// Which log stream to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
    Both,
}

/// Volume as reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Driver", default)]
    pub driver: String,
    #[serde(rename = "Mountpoint", default)]
    pub mountpoint: String,
    #[serde(rename = "Labels", default)]
    pub labels: BTreeMap<String, String>,
}

/// Volume creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeCreate {
    pub name: String,
    pub driver: String,
    pub labels: BTreeMap<String, String>,
}

/// Registry credentials.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Image pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImagePull {
    pub repository: String,
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<RegistryAuth>,
    pub tls_verify: bool,
}

impl ImagePull {
    /// `repository:tag`.
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

// =============================================================================
// Engine Client Trait
// =============================================================================

/// Container engine API.
///
/// Calls are awaited one at a time by the reconciler; implementations need
/// not serialize them themselves.
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Engine name, for logging.
    fn name(&self) -> &str;

    // =========================================================================
    // Containers
    // =========================================================================

    /// Inspects a container by name. 404 when it does not exist.
    async fn inspect_container(&self, name: &str) -> ApiResult<ContainerInfo>;

    /// Creates (but does not start) a container.
    async fn create_container(&self, request: &ContainerCreate) -> ApiResult<()>;

    async fn start_container(&self, name: &str) -> ApiResult<()>;

    /// Stops a container, killing it after `timeout_secs`.
    async fn stop_container(&self, name: &str, timeout_secs: u64) -> ApiResult<()>;

    async fn restart_container(&self, name: &str, timeout_secs: u64) -> ApiResult<()>;

    async fn remove_container(&self, name: &str, force: bool) -> ApiResult<()>;

    /// Blocks until the container exits and returns its exit code.
    async fn wait_container(&self, name: &str) -> ApiResult<i64>;

    /// Log lines, optionally only the last `tail`.
    async fn logs(&self, name: &str, stream: LogStream, tail: Option<usize>) -> ApiResult<Vec<String>>;

    /// Runs `argv` inside a running container as `user`.
    async fn exec(&self, name: &str, argv: &[String], user: Option<&str>) -> ApiResult<ExecOutput>;

    // =========================================================================
    // Volumes
    // =========================================================================

    async fn list_volumes(&self) -> ApiResult<Vec<VolumeInfo>>;

    /// Inspects a volume. 404 when it does not exist.
    async fn inspect_volume(&self, name: &str) -> ApiResult<VolumeInfo>;

    async fn create_volume(&self, request: &VolumeCreate) -> ApiResult<VolumeInfo>;

    /// Removes a volume. 409 when in use.
    async fn remove_volume(&self, name: &str) -> ApiResult<()>;

    // =========================================================================
    // Images
    // =========================================================================

    /// Pulls an image; `None` when the registry returned nothing.
    async fn pull_image(&self, request: &ImagePull) -> ApiResult<Option<ImageInfo>>;

    /// Inspects a local image. 404 when not present.
    async fn inspect_image(&self, reference: &str) -> ApiResult<ImageInfo>;

    /// Removes a local image. 409 when in use.
    async fn remove_image(&self, reference: &str) -> ApiResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_classes() {
        assert!(ApiError::new(404, "no such container").is_not_found());
        assert!(ApiError::new(409, "in use").is_conflict());
        assert!(ApiError::new(409, "in use").is_client_error());
        assert!(!ApiError::new(500, "boom").is_client_error());
        assert!(!ApiError::transport("socket closed").is_client_error());
    }

    #[test]
    fn test_into_error_keeps_explanation() {
        let err = ApiError::new(500, "driver failed").into_error("create_container");
        assert_eq!(
            err.to_string(),
            "engine error during create_container: driver failed"
        );
    }

    #[test]
    fn test_registry_auth_debug_hides_password() {
        let auth = RegistryAuth {
            username: "kolla".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{auth:?}").contains("hunter2"));
    }

    #[test]
    fn test_mount_request_serialization() {
        let mount = MountRequest {
            kind: MountKind::Devpts,
            source: None,
            target: "/dev/pts".into(),
            read_only: false,
            propagation: None,
        };
        let json = serde_json::to_value(&mount).unwrap();
        assert_eq!(json, serde_json::json!({"type": "devpts", "target": "/dev/pts"}));
    }
}
