//! Docker worker.
//!
//! Docker takes volumes as bind strings, manages restarts itself and creates
//! missing named volumes and host paths on its own.

use super::{base_create, engine_restart_policy, ContainerWorker, WorkerCore};
use crate::canonical::volume::canonical_volume;
use crate::compare::EngineQuirks;
use crate::engine::ContainerCreate;
use crate::error::{Error, Result};
use crate::outcome::StartReport;
use crate::spec::{Action, ContainerEngine, DesiredSpec};
use async_trait::async_trait;

/// Worker for the Docker engine.
#[derive(Debug, Clone)]
pub struct DockerWorker {
    core: WorkerCore,
}

impl DockerWorker {
    pub fn new(core: WorkerCore) -> Self {
        Self { core }
    }
}

#[async_trait]
impl ContainerWorker for DockerWorker {
    fn engine(&self) -> ContainerEngine {
        ContainerEngine::Docker
    }

    fn core(&self) -> &WorkerCore {
        &self.core
    }

    fn quirks(&self, _spec: &DesiredSpec) -> EngineQuirks {
        EngineQuirks::docker()
    }

    fn prepare_create(&self, spec: &DesiredSpec) -> Result<ContainerCreate> {
        let mut request = base_create(self, spec)?;
        request.binds = spec
            .volumes
            .iter()
            .map(canonical_volume)
            .filter_map(Result::transpose)
            .map(|volume| volume.map(|v| v.to_bind_string()))
            .collect::<Result<_>>()?;
        request.restart_policy = engine_restart_policy(spec);
        Ok(request)
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

        tracing::info!(container = %name, "stopping container");
        self.core
            .client
            .stop_container(name, spec.graceful_timeout())
            .await
            .map_err(|e| e.into_error("stop_container"))?;
        Ok(true)
    }

    async fn restart_container(&self, spec: &DesiredSpec, report: &mut StartReport) -> Result<bool> {
        let name = spec.require_name(Action::RestartContainer)?;
        if self.get_container_info(name).await?.is_none() {
            return Err(Error::ContainerNotFound(name.to_string()));
        }

        tracing::info!(container = %name, "restarting container");
        match self
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
        }
    }
}
