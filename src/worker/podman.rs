//! Podman worker.
//!
//! Podman differs from Docker in three places:
//!
//! - volumes are split into explicit mounts (host paths, `devpts`) and named
//!   volumes, and both must exist before the container is created;
//! - `AUDIT_WRITE` has to be requested explicitly for unprivileged
//!   containers;
//! - restarts may be owned by a supervisor unit, in which case the engine
//!   gets no restart policy and stop and restart go through the unit.

use super::{
    base_create, create_with_engine, engine_restart_policy, ensure_host_path, ContainerWorker,
    WorkerCore,
};
use crate::canonical::{canonical_caps, ulimit, Ulimit};
use crate::compare::EngineQuirks;
use crate::constants::{DEVPTS_SOURCE, IMPLICIT_CAPABILITY_REQUEST};
use crate::engine::{ContainerCreate, MountKind, MountRequest, NamedVolumeRequest};
use crate::error::{Error, Result};
use crate::outcome::StartReport;
use crate::spec::{Action, ContainerEngine, DesiredSpec, MountRecord, VolumeSpec};
use async_trait::async_trait;
use serde_json::Value;

const DEFAULT_PROPAGATION: &str = "rprivate";

/// Worker for the Podman engine.
#[derive(Debug, Clone)]
pub struct PodmanWorker {
    core: WorkerCore,
}

impl PodmanWorker {
    pub fn new(core: WorkerCore) -> Self {
        Self { core }
    }

    /// Returns true if stop and restart go through the supervisor unit.
    fn supervised(spec: &DesiredSpec) -> bool {
        spec.restart_via_supervisor && spec.restart_policy.as_deref() != Some("oneshot")
    }
}

// =============================================================================
// Volume Translation
// =============================================================================

/// One declared volume as Podman wants it.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PodmanVolume {
    Mount(MountRequest),
    Named(NamedVolumeRequest),
}

/// Splits `src:dst[:opts]`. Empty entries yield `None`.
fn split_bind(entry: &str) -> Result<Option<(&str, &str, &str)>> {
    if entry.is_empty() {
        return Ok(None);
    }
    let mut parts = entry.splitn(3, ':');
    let source = parts.next().unwrap_or_default();
    let destination = parts.next().unwrap_or_default();
    let options = parts.next().unwrap_or_default();
    if destination.is_empty() {
        return Err(Error::MalformedVolume(entry.to_string()));
    }
    Ok(Some((source, destination, options)))
}

fn bind_mount(source: &str, target: &str, read_only: bool, propagation: Option<&str>) -> MountRequest {
    MountRequest {
        kind: MountKind::Bind,
        source: Some(source.to_string()),
        target: target.to_string(),
        read_only,
        propagation: Some(propagation.unwrap_or(DEFAULT_PROPAGATION).to_string()),
    }
}

fn devpts_mount(target: &str) -> MountRequest {
    MountRequest {
        kind: MountKind::Devpts,
        source: None,
        target: target.to_string(),
        read_only: false,
        propagation: None,
    }
}

fn translate_bind(entry: &str) -> Result<Option<PodmanVolume>> {
    let Some((source, destination, options)) = split_bind(entry)? else {
        return Ok(None);
    };
    let volume = if source.starts_with('/') {
        let opts: Vec<&str> = options.split(',').map(str::trim).collect();
        let propagation = opts
            .iter()
            .copied()
            .find(|o| o.ends_with("shared") || o.ends_with("slave") || o.ends_with("private"));
        PodmanVolume::Mount(bind_mount(source, destination, opts.contains(&"ro"), propagation))
    } else if source == DEVPTS_SOURCE {
        PodmanVolume::Mount(devpts_mount(destination))
    } else {
        PodmanVolume::Named(NamedVolumeRequest {
            name: source.to_string(),
            bind: destination.to_string(),
            mode: if options.is_empty() { "rw" } else { options }.to_string(),
        })
    };
    Ok(Some(volume))
}

fn translate_mount(record: &MountRecord) -> Option<PodmanVolume> {
    let kind = record.kind.as_deref().unwrap_or("bind");
    let named = record.name.as_deref().filter(|n| !n.is_empty());
    let volume = match (kind, named) {
        ("volume", Some(name)) => PodmanVolume::Named(NamedVolumeRequest {
            name: name.to_string(),
            bind: record.destination.clone(),
            mode: if record.rw { "rw" } else { "ro" }.to_string(),
        }),
        ("devpts", _) => PodmanVolume::Mount(devpts_mount(&record.destination)),
        _ if record.source == DEVPTS_SOURCE => PodmanVolume::Mount(devpts_mount(&record.destination)),
        _ if record.source.starts_with('/') => PodmanVolume::Mount(bind_mount(
            &record.source,
            &record.destination,
            !record.rw,
            record.propagation.as_deref().filter(|p| !p.is_empty()),
        )),
        _ if !record.source.is_empty() => PodmanVolume::Named(NamedVolumeRequest {
            name: record.source.clone(),
            bind: record.destination.clone(),
            mode: if record.rw { "rw" } else { "ro" }.to_string(),
        }),
        _ => return None,
    };
    Some(volume)
}

fn translate_volumes(volumes: &[VolumeSpec]) -> Result<Vec<PodmanVolume>> {
    let mut out = Vec::with_capacity(volumes.len());
    for volume in volumes {
        let translated = match volume {
            VolumeSpec::Bind(entry) => translate_bind(entry)?,
            VolumeSpec::Mount(record) => translate_mount(record),
        };
        out.extend(translated);
    }
    Ok(out)
}

// =============================================================================
// Worker
// =============================================================================

#[async_trait]
impl ContainerWorker for PodmanWorker {
    fn engine(&self) -> ContainerEngine {
        ContainerEngine::Podman
    }

    fn core(&self) -> &WorkerCore {
        &self.core
    }

    fn quirks(&self, spec: &DesiredSpec) -> EngineQuirks {
        EngineQuirks::podman(spec.restart_via_supervisor)
    }

    /// Podman reports and accepts the kernel names (`RLIMIT_NOFILE`).
    fn build_ulimits(&self, declared: &Value) -> Result<Vec<Ulimit>> {
        let mut ulimits = ulimit::to_runtime(&ulimit::from_declared(declared)?);
        for u in &mut ulimits {
            u.name = format!("RLIMIT_{}", u.name.to_ascii_uppercase());
        }
        Ok(ulimits)
    }

    fn prepare_create(&self, spec: &DesiredSpec) -> Result<ContainerCreate> {
        let mut request = base_create(self, spec)?;

        for volume in translate_volumes(&spec.volumes)? {
            match volume {
                PodmanVolume::Mount(mount) => request.mounts.push(mount),
                PodmanVolume::Named(named) => request.volumes.push(named),
            }
        }

        if !Self::supervised(spec) {
            request.restart_policy = engine_restart_policy(spec);
        }

        if !spec.privileged {
            let requested = canonical_caps(&request.cap_add);
            let implicit = canonical_caps([IMPLICIT_CAPABILITY_REQUEST]);
            if !implicit.iter().all(|c| requested.contains(c)) {
                request.cap_add.push(IMPLICIT_CAPABILITY_REQUEST.to_string());
            }
        }

        Ok(request)
    }

    async fn provision_volumes(&self, spec: &DesiredSpec) -> Result<bool> {
        let mut changed = false;
        for volume in translate_volumes(&spec.volumes)? {
            match volume {
                PodmanVolume::Named(named) => {
                    changed |= self.create_volume(&named.name).await?.is_some();
                }
                PodmanVolume::Mount(MountRequest {
                    kind: MountKind::Bind,
                    source: Some(source),
                    ..
                }) => {
                    changed |= ensure_host_path(&source)?;
                }
                PodmanVolume::Mount(_) => {}
            }
        }
        Ok(changed)
    }

    async fn create_container(&self, spec: &DesiredSpec) -> Result<bool> {
        let changed = create_with_engine(self, spec).await?;
        if Self::supervised(spec) {
            let name = spec.require_name(Action::StartContainer)?;
            self.core.supervisor.create_unit(name).await;
        }
        Ok(changed)
    }

    async fn stop_container(&self, spec: &DesiredSpec) -> Result<bool> {
        let name = spec.require_name(Action::StopContainer)?;
        let Some(info) = self.get_container_info(name).await? else {
            if spec.ignore_missing {
                return Ok(false);
            }
            return Err(Error::ContainerNotFound(name.to_string()));
        };
        if !info.is_running() {
            return Ok(false);
        }

        tracing::info!(container = %name, supervised = Self::supervised(spec), "stopping container");
        if Self::supervised(spec) {
            self.core.supervisor.create_unit(name).await;
            if !self.core.supervisor.stop(name).await {
                return Err(Error::Engine {
                    operation: "stop_container".to_string(),
                    explanation: format!("supervisor failed to stop {name}"),
                });
            }
            return Ok(true);
        }

        self.core
            .client
            .stop_container(name, spec.graceful_timeout())
            .await
            .map_err(|e| e.into_error("stop_container"))?;
        Ok(true)
    }

    async fn restart_container(&self, spec: &DesiredSpec, report: &mut StartReport) -> Result<bool> {
        let name = spec.require_name(Action::RestartContainer)?;

        if !Self::supervised(spec) {
            if self.get_container_info(name).await?.is_none() {
                return Err(Error::ContainerNotFound(name.to_string()));
            }
            return match self
                .core
                .client
                .restart_container(name, spec.graceful_timeout())
                .await
            {
                Ok(()) => {
                    report.succeeded();
                    Ok(true)
                }
                Err(e) => {
                    report.failed(e.explanation.clone());
                    Err(Error::StartFailed {
                        name: name.to_string(),
                        reason: e.explanation,
                    })
                }
            };
        }

        self.core.supervisor.create_unit(name).await;
        if self.core.supervisor.restart(name).await {
            report.succeeded();
            return Ok(true);
        }

        let unit_failure = format!("supervisor failed to restart {name}");
        tracing::warn!(container = %name, "{unit_failure}");
        let running = self
            .get_container_info(name)
            .await?
            .is_some_and(|info| info.is_running());
        if !running {
            if let Err(e) = self.start(name).await {
                report.failed(e.to_string());
                return Err(e);
            }
        }
        report.succeeded();
        report.stderr = unit_failure;
        Ok(true)
    }
}
