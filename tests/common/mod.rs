//! In-memory engine and supervisor for reconciler tests.
//!
//! `MockEngine` keeps containers as raw inspect documents. Creating a
//! container renders the create request the way an engine would report it,
//! so a second comparison against the same spec sees no drift.

#![allow(dead_code)]

use async_trait::async_trait;
use driftkeeper::engine::{
    ApiError, ApiResult, ContainerCreate, EngineClient, ExecOutput, ImagePull, LogStream,
    VolumeCreate, VolumeInfo,
};
use driftkeeper::inspect::{ContainerInfo, ImageInfo};
use driftkeeper::supervisor::ServiceSupervisor;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

// =============================================================================
// Mock Engine
// =============================================================================

/// Mutable state behind [`MockEngine`].
#[derive(Debug, Default)]
pub struct MockState {
    /// Inspect documents by container name.
    pub containers: BTreeMap<String, Value>,
    /// Local images by reference.
    pub images: BTreeMap<String, ImageInfo>,
    /// Images the registry serves, by `repository:tag`.
    pub registry: BTreeMap<String, ImageInfo>,
    pub volumes: BTreeMap<String, VolumeInfo>,
    /// Every engine call, e.g. `start:nova_api`.
    pub calls: Vec<String>,
    /// Scripted exec results; empty means exit code 0.
    pub exec_results: VecDeque<ApiResult<ExecOutput>>,
    /// Number of upcoming start calls that fail.
    pub failing_starts: usize,
    /// Number of upcoming start calls accepted without leaving `created`.
    pub ignored_starts: usize,
    /// Health status set when a container starts.
    pub health_on_start: Option<String>,
    /// Polls left before a `starting` container turns `healthy`.
    pub polls_until_healthy: usize,
    /// Volume and image names whose removal conflicts.
    pub in_use: BTreeSet<String>,
    pub logs: Vec<String>,
    pub exit_code: i64,
    pub create_requests: Vec<ContainerCreate>,
    pub pulls: Vec<ImagePull>,
}

/// Scripted in-memory [`EngineClient`].
#[derive(Debug, Default)]
pub struct MockEngine {
    state: Mutex<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Adds a local image.
    pub fn with_image(self, reference: &str, id: &str) -> Self {
        self.state().images.insert(
            reference.to_string(),
            ImageInfo {
                id: id.to_string(),
                ..ImageInfo::default()
            },
        );
        self
    }

    /// Adds a local image with an entrypoint.
    pub fn with_image_entrypoint(self, reference: &str, id: &str, entrypoint: &[&str]) -> Self {
        self.state().images.insert(
            reference.to_string(),
            ImageInfo {
                id: id.to_string(),
                entrypoint: entrypoint.iter().map(|s| s.to_string()).collect(),
                ..ImageInfo::default()
            },
        );
        self
    }

    /// Adds an image the registry can serve.
    pub fn with_registry_image(self, reference: &str, id: &str) -> Self {
        self.state().registry.insert(
            reference.to_string(),
            ImageInfo {
                id: id.to_string(),
                ..ImageInfo::default()
            },
        );
        self
    }

    /// Adds a container from a raw inspect document.
    pub fn with_container(self, name: &str, raw: Value) -> Self {
        self.state().containers.insert(name.to_string(), raw);
        self
    }

    pub fn with_volume(self, name: &str) -> Self {
        self.state().volumes.insert(
            name.to_string(),
            VolumeInfo {
                name: name.to_string(),
                driver: "local".to_string(),
                ..VolumeInfo::default()
            },
        );
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Number of calls starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.state().calls.iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn container(&self, name: &str) -> Option<Value> {
        self.state().containers.get(name).cloned()
    }

    pub fn set_status(&self, name: &str, status: &str) {
        if let Some(raw) = self.state().containers.get_mut(name) {
            raw["State"]["Status"] = json!(status);
        }
    }

    fn record(&self, call: String) {
        self.state().calls.push(call);
    }
}

fn not_found(what: &str, name: &str) -> ApiError {
    ApiError::new(404, format!("no such {what}: {name}"))
}

/// Renders a create request as the engine's inspect output.
pub fn render_container(request: &ContainerCreate, image: Option<&ImageInfo>) -> Value {
    let entrypoint = request
        .entrypoint
        .clone()
        .or_else(|| image.map(|i| i.entrypoint.clone()))
        .unwrap_or_default();
    let command = request
        .command
        .clone()
        .or_else(|| image.map(|i| i.cmd.clone()))
        .unwrap_or_default();
    let argv: Vec<String> = entrypoint.into_iter().chain(command).collect();
    let (path, args) = match argv.split_first() {
        Some((path, args)) => (json!(path), json!(args)),
        None => (Value::Null, json!([])),
    };

    let env: Vec<String> = request
        .environment
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    let tmpfs: Map<String, Value> = request
        .tmpfs
        .iter()
        .map(|entry| match entry.split_once(':') {
            Some((path, opts)) => (path.to_string(), json!(opts)),
            None => (entry.clone(), json!("")),
        })
        .collect();
    let mut mounts: Vec<Value> = request
        .mounts
        .iter()
        .map(|m| {
            json!({
                "Type": m.kind,
                "Source": m.source.clone().unwrap_or_default(),
                "Destination": m.target,
                "RW": !m.read_only,
                "Propagation": m.propagation.clone().unwrap_or_default(),
            })
        })
        .collect();
    mounts.extend(request.volumes.iter().map(|v| {
        json!({
            "Type": "volume",
            "Name": v.name,
            "Source": format!("/var/lib/containers/storage/volumes/{}/_data", v.name),
            "Destination": v.bind,
            "RW": !v.mode.split(',').any(|o| o == "ro"),
        })
    }));

    let mut host = json!({
        "Binds": request.binds,
        "CapAdd": request.cap_add,
        "SecurityOpt": request.security_opt,
        "Privileged": request.privileged,
        "VolumesFrom": request.volumes_from,
        "Tmpfs": tmpfs,
        "IpcMode": request.ipc_mode,
        "PidMode": request.pid_mode,
        "CgroupnsMode": request.cgroupns_mode,
        "NetworkMode": request.network_mode,
        "RestartPolicy": request.restart_policy.as_ref().map_or(
            json!({"Name": "", "MaximumRetryCount": 0}),
            |p| json!({"Name": p.name, "MaximumRetryCount": p.maximum_retry_count}),
        ),
        "Ulimits": request.ulimits,
    });
    for (field, value) in &request.resources {
        host[field] = value.clone();
    }

    json!({
        "Name": request.name,
        "Image": image.map(|i| i.id.clone()).unwrap_or_default(),
        "Path": path,
        "Args": args,
        "State": {"Status": "created"},
        "Config": {
            "Image": request.image,
            "Env": env,
            "Labels": request.labels,
            "Healthcheck": request.healthcheck,
            "User": request.user.clone().unwrap_or_default(),
        },
        "HostConfig": host,
        "Mounts": mounts,
    })
}

#[async_trait]
impl EngineClient for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn inspect_container(&self, name: &str) -> ApiResult<ContainerInfo> {
        let mut state = self.state();
        state.calls.push(format!("inspect:{name}"));
        let ready = state.polls_until_healthy == 0;
        if !ready {
            state.polls_until_healthy -= 1;
        }
        let raw = state
            .containers
            .get_mut(name)
            .ok_or_else(|| not_found("container", name))?;
        if ready && raw["State"]["Health"]["Status"] == json!("starting") {
            raw["State"]["Health"]["Status"] = json!("healthy");
        }
        Ok(ContainerInfo::new(raw.clone()))
    }

    async fn create_container(&self, request: &ContainerCreate) -> ApiResult<()> {
        let mut state = self.state();
        state.calls.push(format!("create:{}", request.name));
        if state.containers.contains_key(&request.name) {
            return Err(ApiError::new(409, format!("name {} is already in use", request.name)));
        }
        let image = state.images.get(&request.image).cloned();
        let raw = render_container(request, image.as_ref());
        state.containers.insert(request.name.clone(), raw);
        state.create_requests.push(request.clone());
        Ok(())
    }

    async fn start_container(&self, name: &str) -> ApiResult<()> {
        let mut state = self.state();
        state.calls.push(format!("start:{name}"));
        if state.failing_starts > 0 {
            state.failing_starts -= 1;
            return Err(ApiError::new(500, "OCI runtime error: permission denied"));
        }
        if state.ignored_starts > 0 {
            state.ignored_starts -= 1;
            return Ok(());
        }
        let health = state.health_on_start.clone();
        let raw = state
            .containers
            .get_mut(name)
            .ok_or_else(|| not_found("container", name))?;
        raw["State"]["Status"] = json!("running");
        if let Some(health) = health {
            raw["State"]["Health"] = json!({"Status": health});
        }
        Ok(())
    }

    async fn stop_container(&self, name: &str, timeout_secs: u64) -> ApiResult<()> {
        let mut state = self.state();
        state.calls.push(format!("stop:{name}:{timeout_secs}"));
        let raw = state
            .containers
            .get_mut(name)
            .ok_or_else(|| not_found("container", name))?;
        raw["State"]["Status"] = json!("exited");
        Ok(())
    }

    async fn restart_container(&self, name: &str, timeout_secs: u64) -> ApiResult<()> {
        let mut state = self.state();
        state.calls.push(format!("restart:{name}:{timeout_secs}"));
        let raw = state
            .containers
            .get_mut(name)
            .ok_or_else(|| not_found("container", name))?;
        raw["State"]["Status"] = json!("running");
        Ok(())
    }

    async fn remove_container(&self, name: &str, force: bool) -> ApiResult<()> {
        let mut state = self.state();
        state.calls.push(format!("remove:{name}:{force}"));
        state
            .containers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found("container", name))
    }

    async fn wait_container(&self, name: &str) -> ApiResult<i64> {
        let mut state = self.state();
        state.calls.push(format!("wait:{name}"));
        let exit_code = state.exit_code;
        if let Some(raw) = state.containers.get_mut(name) {
            raw["State"]["Status"] = json!("exited");
        }
        Ok(exit_code)
    }

    async fn logs(&self, name: &str, stream: LogStream, tail: Option<usize>) -> ApiResult<Vec<String>> {
        let mut state = self.state();
        state.calls.push(format!("logs:{name}:{stream:?}"));
        let logs = state.logs.clone();
        let skip = tail.map_or(0, |t| logs.len().saturating_sub(t));
        Ok(logs.into_iter().skip(skip).collect())
    }

    async fn exec(&self, name: &str, argv: &[String], user: Option<&str>) -> ApiResult<ExecOutput> {
        let mut state = self.state();
        state
            .calls
            .push(format!("exec:{name}:{}:{}", argv.join(" "), user.unwrap_or_default()));
        state.exec_results.pop_front().unwrap_or(Ok(ExecOutput::default()))
    }

    async fn list_volumes(&self) -> ApiResult<Vec<VolumeInfo>> {
        Ok(self.state().volumes.values().cloned().collect())
    }

    async fn inspect_volume(&self, name: &str) -> ApiResult<VolumeInfo> {
        let state = self.state();
        state
            .volumes
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("volume", name))
    }

    async fn create_volume(&self, request: &VolumeCreate) -> ApiResult<VolumeInfo> {
        let mut state = self.state();
        state.calls.push(format!("create_volume:{}", request.name));
        let info = VolumeInfo {
            name: request.name.clone(),
            driver: request.driver.clone(),
            mountpoint: format!("/var/lib/docker/volumes/{}/_data", request.name),
            labels: request.labels.clone(),
        };
        state.volumes.insert(request.name.clone(), info.clone());
        Ok(info)
    }

    async fn remove_volume(&self, name: &str) -> ApiResult<()> {
        let mut state = self.state();
        state.calls.push(format!("remove_volume:{name}"));
        if state.in_use.contains(name) {
            return Err(ApiError::new(409, format!("volume {name} is in use")));
        }
        state.volumes.remove(name);
        Ok(())
    }

    async fn pull_image(&self, request: &ImagePull) -> ApiResult<Option<ImageInfo>> {
        let mut state = self.state();
        let reference = request.reference();
        state.calls.push(format!("pull:{reference}"));
        state.pulls.push(request.clone());
        let Some(image) = state.registry.get(&reference).cloned() else {
            return Ok(None);
        };
        state.images.insert(reference, image.clone());
        Ok(Some(image))
    }

    async fn inspect_image(&self, reference: &str) -> ApiResult<ImageInfo> {
        let state = self.state();
        state
            .images
            .get(reference)
            .cloned()
            .ok_or_else(|| not_found("image", reference))
    }

    async fn remove_image(&self, reference: &str) -> ApiResult<()> {
        let mut state = self.state();
        state.calls.push(format!("remove_image:{reference}"));
        if state.in_use.contains(reference) {
            return Err(ApiError::new(409, format!("image {reference} is in use")));
        }
        state.images.remove(reference);
        Ok(())
    }
}

// =============================================================================
// Mock Supervisor
// =============================================================================

/// Supervisor with scripted answers and recorded calls.
#[derive(Debug, Default)]
pub struct MockSupervisor {
    pub unit_changed: Mutex<bool>,
    pub restart_ok: Mutex<bool>,
    pub calls: Mutex<Vec<String>>,
}

impl MockSupervisor {
    pub fn new() -> Self {
        Self {
            restart_ok: Mutex::new(true),
            ..Self::default()
        }
    }

    pub fn with_unit_changed(self, changed: bool) -> Self {
        *self.unit_changed.lock().unwrap() = changed;
        self
    }

    pub fn with_restart_ok(self, ok: bool) -> Self {
        *self.restart_ok.lock().unwrap() = ok;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ServiceSupervisor for MockSupervisor {
    async fn check_unit_changed(&self, name: &str) -> bool {
        self.record(format!("check:{name}"));
        *self.unit_changed.lock().unwrap()
    }

    async fn create_unit(&self, name: &str) -> bool {
        self.record(format!("create_unit:{name}"));
        true
    }

    async fn remove_unit(&self, name: &str) -> bool {
        self.record(format!("remove_unit:{name}"));
        false
    }

    async fn start(&self, name: &str) -> bool {
        self.record(format!("start:{name}"));
        true
    }

    async fn stop(&self, name: &str) -> bool {
        self.record(format!("stop:{name}"));
        true
    }

    async fn restart(&self, name: &str) -> bool {
        self.record(format!("restart:{name}"));
        *self.restart_ok.lock().unwrap()
    }
}

// =============================================================================
// Inspect Fixtures
// =============================================================================

/// Minimal running container created from `image` with id `image_id`.
pub fn running_container(name: &str, image: &str, image_id: &str) -> Value {
    json!({
        "Name": name,
        "Image": image_id,
        "Path": "kolla_start",
        "Args": [],
        "State": {"Status": "running"},
        "Config": {"Image": image, "Env": [], "Labels": {}},
        "HostConfig": {"Binds": [], "CapAdd": [], "Privileged": false},
        "Mounts": [],
    })
}
