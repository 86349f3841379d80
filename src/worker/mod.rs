//! Engine workers.
//!
//! A worker turns desired specs into engine calls for one engine. Behaviour
//! shared by every engine lives in the default methods of
//! [`ContainerWorker`]; each engine overrides what it does differently:
//!
//! | Operation          | Docker                  | Podman                                  |
//! |--------------------|-------------------------|-----------------------------------------|
//! | create request     | binds                   | mounts + named volumes, `AUDIT_WRITE`   |
//! | volume provisioning| engine does it          | named volumes and host paths up front   |
//! | stop               | engine                  | supervisor when it owns restarts        |
//! | restart            | engine                  | supervisor, engine start as fallback    |
//!
//! The reconciler only ever sees `dyn ContainerWorker`.

pub mod docker;
pub mod podman;

pub use self::docker::DockerWorker;
pub use self::podman::PodmanWorker;

use crate::canonical::dimension::to_bytes;
use crate::canonical::{
    canonical_desired_healthcheck, desired_environment, split_command, ulimit, Ulimit,
};
use crate::compare::EngineQuirks;
use crate::constants::{
    CONFIG_CHECK_COMMAND, DIMENSION_MAP, MANAGED_VOLUME_LABEL, SERVICE_NAME_ENV,
};
#[cfg(test)]
use crate::engine::{ApiError, ApiResult, ExecOutput};
use crate::engine::{
    ContainerCreate, EngineClient, ImagePull, LogStream, RegistryAuth, RestartPolicy, VolumeCreate,
    VolumeInfo,
};
use crate::error::{Error, Result};
use crate::inspect::{ContainerInfo, ImageInfo};
use crate::outcome::StartReport;
use crate::spec::{Action, ContainerEngine, DesiredSpec};
use crate::supervisor::ServiceSupervisor;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

// =============================================================================
// Worker Core
// =============================================================================

/// Collaborators every worker talks to.
#[derive(Clone)]
pub struct WorkerCore {
    pub client: Arc<dyn EngineClient>,
    pub supervisor: Arc<dyn ServiceSupervisor>,
}

impl WorkerCore {
    pub fn new(client: Arc<dyn EngineClient>, supervisor: Arc<dyn ServiceSupervisor>) -> Self {
        Self { client, supervisor }
    }
}

impl std::fmt::Debug for WorkerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerCore")
            .field("client", &self.client.name())
            .finish_non_exhaustive()
    }
}

/// Picks the worker for the engine named in the spec.
pub fn worker_for(
    spec: &DesiredSpec,
    client: Arc<dyn EngineClient>,
    supervisor: Arc<dyn ServiceSupervisor>,
) -> Box<dyn ContainerWorker> {
    let core = WorkerCore::new(client, supervisor);
    match spec.container_engine {
        ContainerEngine::Docker => Box::new(DockerWorker::new(core)),
        ContainerEngine::Podman => Box::new(PodmanWorker::new(core)),
    }
}

// =============================================================================
// Container Worker Trait
// =============================================================================

/// Engine-specific container, image and volume primitives.
#[async_trait]
pub trait ContainerWorker: Send + Sync {
    /// Engine this worker drives.
    fn engine(&self) -> ContainerEngine;

    /// Engine client and supervisor.
    fn core(&self) -> &WorkerCore;

    /// Values the engine injects on its own.
    fn quirks(&self, spec: &DesiredSpec) -> EngineQuirks;

    /// Runtime ulimit records for a declared `ulimits` dimension.
    fn build_ulimits(&self, declared: &Value) -> Result<Vec<Ulimit>> {
        Ok(ulimit::to_runtime(&ulimit::from_declared(declared)?))
    }

    /// Builds the engine create request.
    fn prepare_create(&self, spec: &DesiredSpec) -> Result<ContainerCreate>;

    /// Creates whatever the container's volumes need before creation.
    async fn provision_volumes(&self, _spec: &DesiredSpec) -> Result<bool> {
        Ok(false)
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Live container, `None` when it does not exist.
    async fn get_container_info(&self, name: &str) -> Result<Option<ContainerInfo>> {
        match self.core().client.inspect_container(name).await {
            Ok(info) => Ok(Some(info)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into_error("inspect_container")),
        }
    }

    /// Local image for the spec, `None` when absent or no image is given.
    async fn check_image(&self, spec: &DesiredSpec) -> Result<Option<ImageInfo>> {
        let Some(reference) = spec.image.as_deref() else {
            return Ok(None);
        };
        match self.core().client.inspect_image(reference).await {
            Ok(image) => Ok(Some(image)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into_error("inspect_image")),
        }
    }

    /// Returns true if the supervisor unit drifted.
    async fn unit_changed(&self, name: &str) -> bool {
        self.core().supervisor.check_unit_changed(name).await
    }

    /// Runs the config-check command inside the running container.
    ///
    /// Not running, or an exec rejected by the engine as a client error,
    /// means the configuration is stale.
    async fn config_changed(&self, spec: &DesiredSpec) -> Result<bool> {
        let name = spec.require_name(Action::CompareContainer)?;
        let Some(info) = self.get_container_info(name).await? else {
            return Ok(true);
        };
        if !info.is_running() {
            return Ok(true);
        }

        let argv: Vec<String> = match &spec.config_check_command {
            Some(argv) => argv.clone(),
            None => CONFIG_CHECK_COMMAND.iter().map(|s| s.to_string()).collect(),
        };
        let output = match self.core().client.exec(name, &argv, Some("root")).await {
            Ok(output) => output,
            Err(e) if e.is_client_error() => return Ok(true),
            Err(e) => return Err(e.into_error("exec")),
        };
        match output.exit_code {
            0 => Ok(false),
            1 => Ok(true),
            exit_code => Err(Error::ConfigCheckFailed {
                exit_code,
                output: output.output,
            }),
        }
    }

    async fn logs(&self, name: &str, stream: LogStream, tail: Option<usize>) -> Result<Vec<String>> {
        self.core()
            .client
            .logs(name, stream, tail)
            .await
            .map_err(|e| e.into_error("logs"))
    }

    // =========================================================================
    // Images
    // =========================================================================

    /// Pulls the spec's image. Returns true if the local image changed.
    async fn pull_image(&self, spec: &DesiredSpec) -> Result<bool> {
        let reference = spec.require_image(Action::PullImage)?;
        let request = image_pull_request(spec, reference);
        let previous = self.check_image(spec).await?;

        tracing::info!(image = %request.reference(), engine = %self.engine(), "pulling image");
        match self.core().client.pull_image(&request).await {
            Ok(Some(image)) => Ok(previous.as_ref() != Some(&image)),
            Ok(None) => Err(Error::ImageNotFound(reference.to_string())),
            Err(e) if e.is_not_found() => Err(Error::ImageNotFound(reference.to_string())),
            Err(e) => Err(e.into_error("pull_image")),
        }
    }

    /// Pulls the image unless it is present. Returns true if pulled.
    async fn ensure_image(&self, spec: &DesiredSpec) -> Result<bool> {
        if spec.image.is_none() || self.check_image(spec).await?.is_some() {
            return Ok(false);
        }
        self.pull_image(spec).await
    }

    /// Removes the spec's image. Returns true if one was removed.
    async fn remove_image(&self, spec: &DesiredSpec) -> Result<bool> {
        let reference = spec.require_image(Action::RemoveImage)?;
        if self.check_image(spec).await?.is_none() {
            return Ok(false);
        }
        match self.core().client.remove_image(reference).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_conflict() => Err(Error::InUse {
                kind: "image",
                name: reference.to_string(),
            }),
            Err(e) => Err(e.into_error("remove_image")),
        }
    }

    // =========================================================================
    // Volumes
    // =========================================================================

    /// Creates a named volume unless it exists. Returns the created volume.
    async fn create_volume(&self, name: &str) -> Result<Option<VolumeInfo>> {
        match self.core().client.inspect_volume(name).await {
            Ok(_) => return Ok(None),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into_error("inspect_volume")),
        }

        let (label, value) = MANAGED_VOLUME_LABEL;
        let request = VolumeCreate {
            name: name.to_string(),
            driver: "local".to_string(),
            labels: BTreeMap::from([(label.to_string(), value.to_string())]),
        };
        tracing::info!(volume = %name, "creating volume");
        self.core()
            .client
            .create_volume(&request)
            .await
            .map(Some)
            .map_err(|e| e.into_error("create_volume"))
    }

    /// Removes a named volume. Returns true if one was removed.
    async fn remove_volume(&self, name: &str) -> Result<bool> {
        match self.core().client.inspect_volume(name).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e.into_error("inspect_volume")),
        }
        match self.core().client.remove_volume(name).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_conflict() => Err(Error::InUse {
                kind: "volume",
                name: name.to_string(),
            }),
            Err(e) => Err(e.into_error("remove_volume")),
        }
    }

    // =========================================================================
    // Containers
    // =========================================================================

    /// Creates the container. Returns true (creation always changes state).
    async fn create_container(&self, spec: &DesiredSpec) -> Result<bool> {
        create_with_engine(self, spec).await
    }

    /// Starts an existing container.
    async fn start(&self, name: &str) -> Result<()> {
        tracing::info!(container = %name, "starting container");
        self.core()
            .client
            .start_container(name)
            .await
            .map_err(|e| Error::StartFailed {
                name: name.to_string(),
                reason: e.explanation,
            })
    }

    /// Stops the container. Returns true if it was running.
    async fn stop_container(&self, spec: &DesiredSpec) -> Result<bool>;

    /// Restarts the container, recording start attempts in `report`.
    async fn restart_container(&self, spec: &DesiredSpec, report: &mut StartReport) -> Result<bool>;

    /// Removes the container and its supervisor unit. Returns true if
    /// anything was removed.
    async fn remove_container(&self, spec: &DesiredSpec) -> Result<bool> {
        let name = spec.require_name(Action::RemoveContainer)?;
        let mut changed = self.core().supervisor.remove_unit(name).await;

        if self.get_container_info(name).await?.is_none() {
            return Ok(changed);
        }
        tracing::info!(container = %name, "removing container");
        if let Err(e) = self.core().client.remove_container(name, true).await {
            // Removal may race with auto-removal; only fail if it is still there.
            if self.get_container_info(name).await?.is_some() {
                return Err(e.into_error("remove_container"));
            }
        }
        changed = true;
        Ok(changed)
    }

    /// Blocks until the container exits.
    async fn wait_exit(&self, name: &str) -> Result<i64> {
        self.core()
            .client
            .wait_container(name)
            .await
            .map_err(|e| e.into_error("wait_container"))
    }
}

// =============================================================================
// Shared Helpers
// =============================================================================

/// Splits `repo[:tag]`; a colon inside the registry host is not a tag.
pub fn parse_image(reference: &str) -> (String, String) {
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo.to_string(), tag.to_string()),
        _ => (reference.to_string(), "latest".to_string()),
    }
}

fn image_pull_request(spec: &DesiredSpec, reference: &str) -> ImagePull {
    let (mut repository, tag) = parse_image(reference);
    if !repository.contains('/') {
        if let Some(registry) = spec.auth_registry.as_deref().filter(|r| !r.is_empty()) {
            repository = format!("{registry}/{repository}");
        }
    }
    let auth = spec
        .auth_username
        .as_deref()
        .filter(|u| !u.is_empty())
        .map(|username| RegistryAuth {
            username: username.to_string(),
            password: spec.auth_password.clone().unwrap_or_default(),
        });
    ImagePull {
        repository,
        tag,
        auth,
        tls_verify: spec.tls_verify,
    }
}

/// Engine restart policy for the declared one.
///
/// `oneshot` is a supervisor-only policy and maps to `no`.
pub(crate) fn engine_restart_policy(spec: &DesiredSpec) -> Option<RestartPolicy> {
    let name = spec.restart_policy.as_deref().filter(|p| !p.is_empty())?;
    let name = if name == "oneshot" { "no" } else { name };
    let maximum_retry_count = match name {
        "on-failure" => spec.restart_retries.unwrap_or(0),
        _ => 0,
    };
    Some(RestartPolicy {
        name: name.to_string(),
        maximum_retry_count,
    })
}

/// Desired environment plus the injected service name.
pub(crate) fn create_environment(spec: &DesiredSpec, name: &str) -> Result<BTreeMap<String, String>> {
    let mut env = match &spec.environment {
        Some(env) => desired_environment(env)?,
        None => BTreeMap::new(),
    };
    env.insert(SERVICE_NAME_ENV.to_string(), name.replace('_', "-"));
    Ok(env)
}

/// Engine resource fields for every non-ulimit dimension.
pub(crate) fn create_resources(spec: &DesiredSpec) -> Result<BTreeMap<String, Value>> {
    let mut resources = BTreeMap::new();
    for (key, field) in DIMENSION_MAP {
        if *key == "ulimits" {
            continue;
        }
        if let Some(value) = spec.dimensions.get(*key) {
            let canonical = to_bytes(key, value)?;
            let value = canonical
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or(Value::String(canonical));
            resources.insert(field.to_string(), value);
        }
    }
    Ok(resources)
}

/// Fields every engine fills the same way.
pub(crate) fn base_create<W: ContainerWorker + ?Sized>(
    worker: &W,
    spec: &DesiredSpec,
) -> Result<ContainerCreate> {
    let name = spec.require_name(Action::StartContainer)?;
    let image = spec.require_image(Action::StartContainer)?;

    let ulimits = match spec.dimensions.get("ulimits") {
        Some(declared) => worker.build_ulimits(declared)?,
        None => Vec::new(),
    };

    Ok(ContainerCreate {
        name: name.to_string(),
        image: image.to_string(),
        command: spec.command.as_deref().map(split_command).transpose()?,
        entrypoint: spec.entrypoint.as_deref().map(split_command).transpose()?,
        environment: create_environment(spec, name)?,
        labels: spec.labels.clone(),
        volumes_from: spec.volumes_from.clone(),
        tmpfs: spec.tmpfs.iter().filter(|t| !t.is_empty()).cloned().collect(),
        cap_add: spec.cap_add.clone(),
        security_opt: spec.security_opt.clone(),
        ipc_mode: spec.ipc_mode.clone().filter(|m| !m.is_empty()),
        pid_mode: spec.desired_pid_mode().map(str::to_string),
        cgroupns_mode: spec.cgroupns_mode.clone(),
        privileged: spec.privileged,
        network_mode: Some("host".to_string()),
        healthcheck: canonical_desired_healthcheck(spec.healthcheck.as_ref())?,
        ulimits,
        resources: create_resources(spec)?,
        user: spec.user.clone().filter(|u| !u.is_empty()),
        tty: spec.tty,
        stop_timeout: Some(spec.graceful_timeout()),
        ..ContainerCreate::default()
    })
}

/// Provisions volumes, then asks the engine to create the container.
pub(crate) async fn create_with_engine<W: ContainerWorker + ?Sized>(
    worker: &W,
    spec: &DesiredSpec,
) -> Result<bool> {
    worker.provision_volumes(spec).await?;
    let request = worker.prepare_create(spec)?;
    tracing::info!(container = %request.name, engine = %worker.engine(), "creating container");
    worker
        .core()
        .client
        .create_container(&request)
        .await
        .map_err(|e| e.into_error("create_container"))?;
    Ok(true)
}

/// Creates a missing host directory for a bind source (mode 0755).
///
/// Returns true if the directory was created.
pub fn ensure_host_path(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    if path.exists() {
        return Ok(false);
    }
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder.create(path)?;
    tracing::debug!(path = %path.display(), "created host path");
    Ok(true)
}

/// Engine client that knows no containers, volumes or images.
#[cfg(test)]
pub(crate) struct NullClient;

#[cfg(test)]
#[async_trait]
impl EngineClient for NullClient {
    fn name(&self) -> &str {
        "null"
    }

    async fn inspect_container(&self, _: &str) -> ApiResult<ContainerInfo> {
        Err(ApiError::new(404, "no such container"))
    }

    async fn create_container(&self, _: &ContainerCreate) -> ApiResult<()> {
        Ok(())
    }

    async fn start_container(&self, _: &str) -> ApiResult<()> {
        Ok(())
    }

    async fn stop_container(&self, _: &str, _: u64) -> ApiResult<()> {
        Ok(())
    }

    async fn restart_container(&self, _: &str, _: u64) -> ApiResult<()> {
        Ok(())
    }

    async fn remove_container(&self, _: &str, _: bool) -> ApiResult<()> {
        Ok(())
    }

    async fn wait_container(&self, _: &str) -> ApiResult<i64> {
        Ok(0)
    }

    async fn logs(&self, _: &str, _: LogStream, _: Option<usize>) -> ApiResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn exec(&self, _: &str, _: &[String], _: Option<&str>) -> ApiResult<ExecOutput> {
        Ok(ExecOutput::default())
    }

    async fn list_volumes(&self) -> ApiResult<Vec<VolumeInfo>> {
        Ok(Vec::new())
    }

    async fn inspect_volume(&self, _: &str) -> ApiResult<VolumeInfo> {
        Err(ApiError::new(404, "no such volume"))
    }

    async fn create_volume(&self, request: &VolumeCreate) -> ApiResult<VolumeInfo> {
        Ok(VolumeInfo {
            name: request.name.clone(),
            ..VolumeInfo::default()
        })
    }

    async fn remove_volume(&self, _: &str) -> ApiResult<()> {
        Ok(())
    }

    async fn pull_image(&self, _: &ImagePull) -> ApiResult<Option<ImageInfo>> {
        Ok(None)
    }

    async fn inspect_image(&self, _: &str) -> ApiResult<ImageInfo> {
        Err(ApiError::new(404, "no such image"))
    }

    async fn remove_image(&self, _: &str) -> ApiResult<()> {
        Ok(())
    }
}
