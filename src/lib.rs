//! # driftkeeper
//!
//! **Drift Detection and Reconciliation for Single Containers**
//!
//! This crate compares a declared container configuration against what a
//! Docker or Podman engine reports for the live container, decides whether
//! the container must be created, started, restarted or recreated, and
//! carries that decision out through an engine client. It handles one
//! container per invocation; ordering across containers is left to the
//! caller.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           driftkeeper                               │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  DesiredSpec (params / JSON / YAML)      ContainerInfo (inspect)    │
//! │            │                                   │                    │
//! │  ┌─────────┴───────────────────────────────────┴───────────────┐    │
//! │  │                      Canonicalizers                          │    │
//! │  │  volumes │ caps │ ulimits │ dimensions │ env │ healthcheck   │    │
//! │  └──────────────────────────────┬───────────────────────────────┘    │
//! │  ┌──────────────────────────────┴───────────────────────────────┐    │
//! │  │              Comparator (attribute table)                    │    │
//! │  │        DriftResult → render_diff → unified diff              │    │
//! │  └──────────────────────────────┬───────────────────────────────┘    │
//! │  ┌──────────────────────────────┴───────────────────────────────┐    │
//! │  │   Reconciler: NoOp │ Create │ Recreate │ Restart │ StartOnly  │    │
//! │  │               wait loop with failure reports                 │    │
//! │  └──────────────────────────────┬───────────────────────────────┘    │
//! ├─────────────────────────────────┼───────────────────────────────────┤
//! │                        ContainerWorker                              │
//! │  ┌──────────────────┐           │         ┌──────────────────┐      │
//! │  │   DockerWorker   │◄──────────┴────────►│   PodmanWorker   │      │
//! │  │  binds, restart  │                     │ mounts, AUDIT_WRITE│    │
//! │  │  policy          │                     │ supervisor unit  │      │
//! │  └────────┬─────────┘                     └────────┬─────────┘      │
//! │           └────────────► EngineClient ◄────────────┘                │
//! │                          ServiceSupervisor                          │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Engine Quirks
//!
//! Equivalent configurations reported by different engines must compare
//! equal. The comparator suppresses what an engine adds on its own:
//!
//! | Engine | Injected value                         | Suppressed when           |
//! |--------|----------------------------------------|---------------------------|
//! | Podman | `CAP_AUDIT_WRITE`                      | not requested explicitly  |
//! | Podman | `unmask=all` security option           | no options requested      |
//! | Podman | `devpts` mount at `/dev/pts`           | always                    |
//! | Podman | `RLIMIT_NPROC` ulimit                  | not requested explicitly  |
//! | Both   | named volume storage path              | always (name is compared) |
//!
//! # Error Model
//!
//! Problems with the desired spec itself (unsupported dimensions, malformed
//! volumes, incomplete healthchecks) are raised before any engine call that
//! mutates state. Engine errors carry the engine's explanation; a failed wait
//! carries a [`FailureReport`] with status, health, recent logs and the
//! start bookkeeping.
//!
//! # Example
//!
//! ```rust,ignore
//! use driftkeeper::{Action, DesiredSpec, NoopSupervisor, Reconciler};
//! use std::sync::Arc;
//!
//! async fn reconcile(client: Arc<dyn driftkeeper::EngineClient>) -> driftkeeper::Result<()> {
//!     let spec = DesiredSpec::from_yaml(
//!         "name: keystone\nimage: quay.io/openstack.kolla/keystone:2024.1\nwait: true\n",
//!     )?;
//!     let reconciler = Reconciler::for_spec(&spec, client, Arc::new(NoopSupervisor));
//!     let outcome = reconciler
//!         .run(Action::RecreateOrRestartContainer, &spec)
//!         .await?;
//!     if let Some(diff) = &outcome.diff {
//!         println!("{diff}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod canonical;
pub mod compare;
pub mod constants;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod inspect;
pub mod outcome;
pub mod reconcile;
pub mod spec;
pub mod supervisor;

pub mod worker;

// Re-exports
pub use compare::{AttributeKey, Comparator, DriftEntry, DriftResult, EngineQuirks, VolumeMatch};
pub use diagnostics::{render_diff, unified_diff, DebugTrace, Verbosity};
pub use engine::{ApiError, ApiResult, ContainerCreate, EngineClient, ExecOutput, LogStream, VolumeInfo};
pub use error::{Error, FailureReport, Result};
pub use inspect::{ContainerInfo, ImageInfo};
pub use outcome::{record_changed_container, Outcome, StartReport};
pub use reconcile::{Assessment, ReconcileDecision, Reconciler, ReconcilerConfig};
pub use spec::{Action, ContainerEngine, DesiredSpec, DesiredState, EnvironmentSpec, MountRecord, VolumeSpec};
pub use supervisor::{NoopSupervisor, ServiceSupervisor};
pub use worker::{ContainerWorker, DockerWorker, PodmanWorker, WorkerCore};
