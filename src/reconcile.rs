//! Reconciler: decides and executes the action sequence for one container.
//!
//! # State Machine
//!
//! ```text
//!   absent ─────────────────────────────► Create ──► create ─► start ─► [wait]
//!
//!   present, nothing differs ───────────► NoOp
//!
//!   present, only run state differs ────► StartOnly ──► start ─► [wait]
//!
//!   present, config files or unit ──────► Restart (COPY_ALWAYS)
//!   differ, attributes match                │
//!                                           └─► Recreate (otherwise)
//!
//!   present, attributes differ ─────────► Recreate ──► stop ─► remove ─► create ─► start
//! ```
//!
//! # Waiting
//!
//! With `wait` set, the reconciler polls the container every
//! [`WAIT_POLL_INTERVAL`] until it is running and healthy (no healthcheck
//! counts as healthy). A container left in `created` is started by the loop
//! itself unless `defer_start` was requested. When the deadline passes the
//! invocation fails with a [`FailureReport`].
//!
//! # Mutations
//!
//! All mutations go through the [`ContainerWorker`]; a stop or remove that
//! has begun is never rolled back.

use crate::compare::{AttributeKey, Comparator, DriftResult, VolumeMatch};
use crate::constants::{
    DEFAULT_WAIT_TIMEOUT_SECS, FAILURE_LOG_TAIL, STRATEGY_COPY_ALWAYS, WAIT_POLL_INTERVAL,
};
use crate::diagnostics::{render_diff, DebugTrace, Verbosity};
use crate::engine::{EngineClient, LogStream};
use crate::error::{Error, FailureReport, Result};
use crate::inspect::ContainerInfo;
use crate::outcome::{Outcome, StartReport};
use crate::spec::{Action, DesiredSpec, DesiredState};
use crate::supervisor::ServiceSupervisor;
use crate::worker::{worker_for, ContainerWorker};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// =============================================================================
// Decision
// =============================================================================

/// What the reconciler does with the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileDecision {
    /// Live container matches.
    NoOp,
    /// Container does not exist.
    Create,
    /// Stop, remove, create and start.
    Recreate,
    /// Restart in place to pick up new configuration files.
    Restart,
    /// Container matches but is not running.
    StartOnly,
}

impl ReconcileDecision {
    /// Decides from the drift result, whether configuration files or the
    /// supervisor unit changed, and the configuration strategy.
    ///
    /// `drift` is `None` when the container does not exist. Attribute drift
    /// always recreates: a restart cannot apply it.
    pub fn decide(
        drift: Option<&DriftResult>,
        config_changed: bool,
        strategy: Option<&str>,
        desired_state: DesiredState,
    ) -> Self {
        let Some(drift) = drift else {
            return Self::Create;
        };
        if drift.needs_recreate {
            return Self::Recreate;
        }
        if !drift.changed() {
            return match (config_changed, strategy) {
                (false, _) => Self::NoOp,
                (true, Some(STRATEGY_COPY_ALWAYS)) => Self::Restart,
                (true, _) => Self::Recreate,
            };
        }
        let wants_running = matches!(desired_state, DesiredState::Running | DesiredState::Started);
        if drift.only(AttributeKey::State) && wants_running && !config_changed {
            return Self::StartOnly;
        }
        Self::Recreate
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoOp => "no-op",
            Self::Create => "create",
            Self::Recreate => "recreate",
            Self::Restart => "restart",
            Self::StartOnly => "start-only",
        }
    }
}

impl std::fmt::Display for ReconcileDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of comparing the desired spec against the live container.
#[derive(Debug, Clone)]
pub struct Assessment {
    /// Live container, `None` when absent.
    pub info: Option<ContainerInfo>,
    /// Attribute drift, `None` when the container is absent.
    pub drift: Option<DriftResult>,
    /// Configuration files inside the container are stale.
    pub config_changed: bool,
    /// Supervisor unit file drifted.
    pub unit_changed: bool,
    pub decision: ReconcileDecision,
}

impl Assessment {
    /// Returns true if anything differs.
    pub fn changed(&self) -> bool {
        self.decision != ReconcileDecision::NoOp
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Reconciler tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Delay between polls of the wait loop.
    pub poll_interval: Duration,
    /// Number of log lines attached to a failure report.
    pub log_tail: usize,
    /// Overrides the spec's `client_timeout` for the wait loop.
    pub wait_timeout: Option<Duration>,
    /// Base verbosity of the decision trace.
    pub verbosity: Verbosity,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: WAIT_POLL_INTERVAL,
            log_tail: FAILURE_LOG_TAIL,
            wait_timeout: None,
            verbosity: Verbosity::Normal,
        }
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Engine-agnostic reconciler for one container.
pub struct Reconciler {
    worker: Box<dyn ContainerWorker>,
    comparator: Comparator,
    config: ReconcilerConfig,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("engine", &self.worker.engine())
            .field("comparator", &self.comparator)
            .field("config", &self.config)
            .finish()
    }
}

impl Reconciler {
    pub fn new(worker: Box<dyn ContainerWorker>, comparator: Comparator) -> Self {
        Self {
            worker,
            comparator,
            config: ReconcilerConfig::default(),
        }
    }

    /// Reconciler for the engine named in the spec.
    pub fn for_spec(
        spec: &DesiredSpec,
        client: Arc<dyn EngineClient>,
        supervisor: Arc<dyn ServiceSupervisor>,
    ) -> Self {
        let worker = worker_for(spec, client, supervisor);
        let comparator = Comparator::new(worker.quirks(spec));
        Self::new(worker, comparator)
    }

    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_volume_match(mut self, volume_match: VolumeMatch) -> Self {
        self.comparator = self.comparator.with_volume_match(volume_match);
        self
    }

    pub fn worker(&self) -> &dyn ContainerWorker {
        self.worker.as_ref()
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Runs one action.
    pub async fn run(&self, action: Action, spec: &DesiredSpec) -> Result<Outcome> {
        spec.validate_for(action)?;
        let mut trace = DebugTrace::new(self.config.verbosity);
        if spec.debug_enabled() {
            trace.raise_to(Verbosity::Verbose);
        }
        tracing::debug!(action = %action, engine = %self.worker.engine(), "running action");

        let mut outcome = match action {
            Action::CompareContainer => self.compare_container(spec, &mut trace).await?,
            Action::CompareImage => self.compare_image(spec, &mut trace).await?,
            Action::CreateVolume => self.create_volume(spec).await?,
            Action::EnsureImage => Outcome::changed(self.worker.ensure_image(spec).await?),
            Action::PullImage => Outcome::changed(self.worker.pull_image(spec).await?),
            Action::RecreateOrRestartContainer => self.recreate_or_restart(spec, &mut trace).await?,
            Action::RemoveContainer => Outcome::changed(self.worker.remove_container(spec).await?),
            Action::RemoveImage => Outcome::changed(self.worker.remove_image(spec).await?),
            Action::RemoveVolume => {
                let name = spec.require_name(action)?;
                Outcome::changed(self.worker.remove_volume(name).await?)
            }
            Action::RestartContainer => {
                let mut outcome = Outcome::default();
                outcome.changed = self.worker.restart_container(spec, &mut outcome.start).await?;
                outcome
            }
            Action::StartContainer => {
                Comparator::validate(spec)?;
                let mut outcome = Outcome::default();
                self.start_container(spec, &mut outcome, &mut trace).await?;
                outcome
            }
            Action::StopContainer => Outcome::changed(self.worker.stop_container(spec).await?),
            Action::StopAndRemoveContainer => self.stop_and_remove(spec).await?,
        };
        outcome.debug = trace.into_lines();
        Ok(outcome)
    }

    // =========================================================================
    // Assessment
    // =========================================================================

    /// Compares the desired spec against the live container and decides.
    pub async fn assess(&self, spec: &DesiredSpec, trace: &mut DebugTrace) -> Result<Assessment> {
        Comparator::validate(spec)?;
        let name = spec.require_name(Action::CompareContainer)?;

        let Some(info) = self.worker.get_container_info(name).await? else {
            trace.record(format!("container {name} does not exist"));
            return Ok(Assessment {
                info: None,
                drift: None,
                config_changed: false,
                unit_changed: false,
                decision: ReconcileDecision::Create,
            });
        };

        let image = self.worker.check_image(spec).await?;
        let drift = self.comparator.compare(spec, &info, image.as_ref(), trace)?;

        // Stopped containers already show up as state drift.
        let config_changed = if !drift.changed() && info.is_running() {
            self.worker.config_changed(spec).await?
        } else {
            false
        };
        if config_changed {
            trace.record("configuration files differ");
        }
        let unit_changed = self.worker.unit_changed(name).await;
        if unit_changed {
            trace.record("supervisor unit differs");
        }

        let strategy = spec.config_strategy();
        let decision = ReconcileDecision::decide(
            Some(&drift),
            config_changed || unit_changed,
            strategy.as_deref(),
            spec.state,
        );
        trace.record(format!("decision: {decision}"));
        tracing::info!(container = %name, decision = %decision, "assessed container");

        Ok(Assessment {
            info: Some(info),
            drift: Some(drift),
            config_changed,
            unit_changed,
            decision,
        })
    }

    async fn compare_container(&self, spec: &DesiredSpec, trace: &mut DebugTrace) -> Result<Outcome> {
        let assessment = self.assess(spec, trace).await?;
        let mut outcome = Outcome::changed(assessment.changed());
        if let Some(drift) = &assessment.drift {
            outcome.diff = render_diff(drift);
            outcome.needs_recreate = drift.needs_recreate;
            outcome.recreate_reasons = drift.recreate_reasons.clone();
        }
        Ok(outcome)
    }

    async fn compare_image(&self, spec: &DesiredSpec, trace: &mut DebugTrace) -> Result<Outcome> {
        let name = spec.require_name(Action::CompareImage)?;
        let Some(info) = self.worker.get_container_info(name).await? else {
            trace.record(format!("container {name} does not exist"));
            return Ok(Outcome::changed(true));
        };
        let Some(image) = self.worker.check_image(spec).await? else {
            trace.record("image is not present locally");
            return Ok(Outcome::changed(true));
        };
        let changed = info.image_id() != Some(image.id.as_str());
        if changed {
            trace.record(format!(
                "image differs: expected={} actual={}",
                image.id,
                info.image_id().unwrap_or_default()
            ));
        }
        Ok(Outcome::changed(changed))
    }

    async fn create_volume(&self, spec: &DesiredSpec) -> Result<Outcome> {
        let name = spec.require_name(Action::CreateVolume)?;
        let created = self.worker.create_volume(name).await?;
        let mut outcome = Outcome::changed(created.is_some());
        outcome.result = created.map(|v| serde_json::to_value(v)).transpose()?;
        Ok(outcome)
    }

    async fn stop_and_remove(&self, spec: &DesiredSpec) -> Result<Outcome> {
        let name = spec.require_name(Action::StopAndRemoveContainer)?;
        if self.worker.get_container_info(name).await?.is_none() {
            return Ok(Outcome::changed(false));
        }
        self.worker.stop_container(spec).await?;
        self.worker.remove_container(spec).await?;
        Ok(Outcome::changed(true))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    async fn recreate_or_restart(&self, spec: &DesiredSpec, trace: &mut DebugTrace) -> Result<Outcome> {
        let name = spec.require_name(Action::RecreateOrRestartContainer)?;
        let assessment = self.assess(spec, trace).await?;
        let mut outcome = Outcome::changed(assessment.changed());
        if let Some(drift) = &assessment.drift {
            outcome.diff = render_diff(drift);
            outcome.needs_recreate = drift.needs_recreate;
            outcome.recreate_reasons = drift.recreate_reasons.clone();
        }

        match assessment.decision {
            ReconcileDecision::NoOp => {}
            ReconcileDecision::Create => {
                self.start_container(spec, &mut outcome, trace).await?;
            }
            ReconcileDecision::Recreate => {
                self.worker.ensure_image(spec).await?;
                trace.record(format!("recreating container {name}"));
                self.worker.stop_container(spec).await?;
                self.worker.remove_container(spec).await?;
                self.start_container(spec, &mut outcome, trace).await?;
            }
            ReconcileDecision::Restart => {
                trace.record(format!("restarting container {name}"));
                self.worker.restart_container(spec, &mut outcome.start).await?;
                if spec.wait {
                    self.wait_until_healthy(spec, name, &mut outcome.start, trace).await?;
                }
            }
            ReconcileDecision::StartOnly => {
                self.start_existing(spec, name, &mut outcome.start, trace).await?;
                if spec.wait {
                    self.wait_until_healthy(spec, name, &mut outcome.start, trace).await?;
                }
            }
        }
        Ok(outcome)
    }

    /// Brings the container up: pull, replace if drifted, create if absent,
    /// start, wait, and collect the result of a non-detached run.
    async fn start_container(
        &self,
        spec: &DesiredSpec,
        outcome: &mut Outcome,
        trace: &mut DebugTrace,
    ) -> Result<()> {
        let name = spec.require_name(Action::StartContainer)?;
        if self.worker.ensure_image(spec).await? {
            trace.record(format!("pulled image {}", spec.image.as_deref().unwrap_or_default()));
            outcome.changed = true;
        }

        let mut info = self.worker.get_container_info(name).await?;
        if let Some(live) = &info {
            let image = self.worker.check_image(spec).await?;
            let drift = self.comparator.compare(spec, live, image.as_ref(), trace)?;
            let replace = drift.keys().any(|k| k != AttributeKey::State);
            if replace {
                trace.record(format!("container {name} differs, replacing"));
                self.worker.stop_container(spec).await?;
                self.worker.remove_container(spec).await?;
                outcome.changed = true;
                info = None;
            }
        }

        if info.is_none() {
            self.worker.create_container(spec).await?;
            trace.record(format!("created container {name}"));
            outcome.changed = true;
            info = self.worker.get_container_info(name).await?;
        }

        let start_requested = (spec.start || spec.wait) && !(spec.defer_start && !spec.wait);
        let running = info.as_ref().is_some_and(ContainerInfo::is_running);
        if start_requested && !running {
            self.start_existing(spec, name, &mut outcome.start, trace).await?;
            outcome.changed = true;
        }

        if spec.wait {
            self.wait_until_healthy(spec, name, &mut outcome.start, trace).await?;
        }

        if !spec.detach {
            self.collect_run(spec, name, outcome).await?;
        }
        Ok(())
    }

    /// Starts an existing container; a failure ends the invocation with a
    /// failure report.
    async fn start_existing(
        &self,
        spec: &DesiredSpec,
        name: &str,
        report: &mut StartReport,
        trace: &mut DebugTrace,
    ) -> Result<()> {
        match self.worker.start(name).await {
            Ok(()) => {
                report.succeeded();
                trace.record(format!("started container {name}"));
                Ok(())
            }
            Err(e) => {
                report.failed(e.to_string());
                let message = format!("Failed to start container {name}: {e}");
                Err(self.failure(spec, name, message, report).await)
            }
        }
    }

    /// Waits for a non-detached container to exit and collects its output.
    async fn collect_run(&self, spec: &DesiredSpec, name: &str, outcome: &mut Outcome) -> Result<()> {
        let exit_code = self.worker.wait_exit(name).await?;
        let stdout = self.worker.logs(name, LogStream::Stdout, None).await?.join("\n");
        let stderr = self.worker.logs(name, LogStream::Stderr, None).await?.join("\n");
        tracing::info!(container = %name, exit_code, "container exited");

        if spec.remove_on_exit {
            self.worker.stop_container(spec).await?;
            self.worker.remove_container(spec).await?;
        }
        if exit_code != 0 {
            return Err(Error::ContainerExited {
                name: name.to_string(),
                exit_code,
                stdout,
                stderr,
            });
        }
        outcome.rc = Some(exit_code);
        outcome.stdout = Some(stdout);
        outcome.stderr = Some(stderr);
        Ok(())
    }

    // =========================================================================
    // Wait Loop
    // =========================================================================

    fn wait_timeout(&self, spec: &DesiredSpec) -> Duration {
        self.config.wait_timeout.unwrap_or_else(|| {
            Duration::from_secs(
                spec.client_timeout
                    .filter(|secs| *secs > 0)
                    .unwrap_or(DEFAULT_WAIT_TIMEOUT_SECS),
            )
        })
    }

    /// Polls until the container is running and healthy, or fails with a
    /// failure report once the deadline passes.
    async fn wait_until_healthy(
        &self,
        spec: &DesiredSpec,
        name: &str,
        report: &mut StartReport,
        trace: &mut DebugTrace,
    ) -> Result<()> {
        let timeout = self.wait_timeout(spec);
        let deadline = Instant::now() + timeout;
        tracing::debug!(container = %name, ?timeout, "waiting for container");

        loop {
            let Some(info) = self.worker.get_container_info(name).await? else {
                let message = format!("Container {name} disappeared while waiting for it to become healthy");
                return Err(self.failure(spec, name, message, report).await);
            };
            if is_ready(&info) {
                trace.record(format!("container {name} is running and healthy"));
                return Ok(());
            }
            trace.detail(format!(
                "waiting for {name}: status={} health={}",
                info.status().unwrap_or("unknown"),
                info.health().unwrap_or("none")
            ));

            if info.status() == Some("created") && !spec.defer_start {
                self.self_start(name, report, trace).await;
            }

            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }

        // One last attempt for a container that never left `created`.
        let info = self.worker.get_container_info(name).await?;
        let status = info.as_ref().and_then(|i| i.status()).map(str::to_string);
        if status.as_deref() == Some("created") && !spec.defer_start {
            self.self_start(name, report, trace).await;
            tokio::time::sleep(self.config.poll_interval).await;
            if let Some(info) = self.worker.get_container_info(name).await? {
                if is_ready(&info) {
                    trace.record(format!("container {name} is running and healthy"));
                    return Ok(());
                }
            }
        }

        let message = match status.as_deref() {
            Some("created") if !report.attempted => format!(
                "Container {name} is in 'created' (not running). Start was required but not executed."
            ),
            status => format!(
                "Container {name} did not become running and healthy within {}s (status: {})",
                timeout.as_secs(),
                status.unwrap_or("absent")
            ),
        };
        Err(self.failure(spec, name, message, report).await)
    }

    async fn self_start(&self, name: &str, report: &mut StartReport, trace: &mut DebugTrace) {
        match self.worker.start(name).await {
            Ok(()) => {
                report.self_started();
                trace.record(format!("started container {name} left in 'created'"));
            }
            Err(e) => {
                tracing::warn!(container = %name, error = %e, "start from wait loop failed");
                report.failed(e.to_string());
            }
        }
    }

    /// Assembles the failure report for `name`.
    async fn failure(&self, spec: &DesiredSpec, name: &str, message: String, report: &StartReport) -> Error {
        let info = self.worker.get_container_info(name).await.ok().flatten();
        let logs = self
            .worker
            .logs(name, LogStream::Both, Some(self.config.log_tail))
            .await
            .map(|lines| lines.join("\n"))
            .unwrap_or_default();
        tracing::warn!(container = %name, "{message}");

        Error::WaitFailed(Box::new(FailureReport {
            message,
            name: name.to_string(),
            status: info.as_ref().and_then(|i| i.status()).map(str::to_string),
            health: info.as_ref().and_then(|i| i.health()).map(str::to_string),
            logs,
            start_attempted: report.attempted,
            start_rc: report.rc,
            start_stderr: report.stderr.clone(),
            start: spec.start,
            defer_start: spec.defer_start,
            wait: spec.wait,
            observed_at: chrono::Utc::now(),
        }))
    }
}

fn is_ready(info: &ContainerInfo) -> bool {
    info.is_running() && matches!(info.health(), None | Some("healthy"))
}
