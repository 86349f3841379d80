//! # Reconciler Constants
//!
//! Defines the timeouts, engine quirk signatures and configuration keys used
//! by the drift comparator and the reconciler. These constants are the
//! **single source of truth** for values that must agree between the
//! canonicalizers, the engine workers and the tests.
//!
//! ## Cross-References
//!
//! - [`crate::canonical`]: storage-driver path patterns, pseudo-mount signature
//! - [`crate::compare`]: implicit capability, default security option
//! - [`crate::reconcile`]: poll interval, wait timeout, log tail
//! - [`crate::worker`]: graceful stop timeout, managed volume label

use std::time::Duration;

// =============================================================================
// Timeouts
// =============================================================================

/// Interval between two polls of the live container while waiting for it to
/// become healthy.
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default upper bound for the wait loop when the caller does not supply
/// `client_timeout` (seconds).
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 120;

/// Default grace period handed to the engine when stopping a container
/// (seconds).
pub const DEFAULT_GRACEFUL_TIMEOUT_SECS: u64 = 10;

/// Number of log lines gathered for a failure report.
pub const FAILURE_LOG_TAIL: usize = 200;

// =============================================================================
// Config Drift Check
// =============================================================================

/// Command executed inside the running container to detect stale
/// configuration files.
///
/// Exit codes: `0` unchanged, `1` changed, anything else is an execution
/// failure.
pub const CONFIG_CHECK_COMMAND: &[&str] = &["/usr/local/bin/set_configs", "--check"];

/// Environment key carrying the configuration strategy marker.
pub const CONFIG_STRATEGY_ENV: &str = "CONFIG_STRATEGY";

/// Strategy marker: configuration is copied once at creation, so any change
/// requires recreating the container.
pub const STRATEGY_COPY_ONCE: &str = "COPY_ONCE";

/// Strategy marker: configuration is copied on every start, so a restart is
/// enough to apply it in place.
pub const STRATEGY_COPY_ALWAYS: &str = "COPY_ALWAYS";

// =============================================================================
// Environment Keys
// =============================================================================

/// Debug-only environment key. Never compared, and raises the diagnostics
/// verbosity when truthy.
pub const DEBUG_ENV_KEY: &str = "RECONCILE_DEBUG";

/// Environment key injected into every created container with the service
/// name (`_` replaced by `-`).
pub const SERVICE_NAME_ENV: &str = "SERVICE_NAME";

// =============================================================================
// Engine Quirk Signatures
// =============================================================================

/// Storage-driver path prefix of named volumes (Podman).
///
/// A mount whose source is `<prefix><name>/_data` is the named volume `<name>`.
pub const VOLUME_STORAGE_PREFIX: &str = "/var/lib/containers/storage/volumes/";

/// Storage-driver path suffix of named volumes.
pub const VOLUME_STORAGE_SUFFIX: &str = "/_data";

/// Destination of the pseudo-mount injected by Podman.
pub const PSEUDO_MOUNT_DESTINATION: &str = "/dev/pts";

/// Source name used to request a devpts mount.
pub const DEVPTS_SOURCE: &str = "devpts";

/// Capability Podman adds to every non-privileged container.
pub const IMPLICIT_CAPABILITY: &str = "CAP_AUDIT_WRITE";

/// Capability name requested at creation to match [`IMPLICIT_CAPABILITY`].
pub const IMPLICIT_CAPABILITY_REQUEST: &str = "AUDIT_WRITE";

/// Security option Podman injects when none is requested.
pub const DEFAULT_SECURITY_OPT: &str = "unmask=all";

/// Ulimit names whose value is managed by the host when not requested.
pub const HOST_MANAGED_ULIMITS: &[&str] = &["nproc", "RLIMIT_NPROC"];

/// Label attached to volumes created by this crate.
pub const MANAGED_VOLUME_LABEL: (&str, &str) = ("driftkeeper_managed", "true");

// =============================================================================
// Dimensions
// =============================================================================

/// Mapping between desired dimension keys and the field names the engines
/// report in `HostConfig`.
///
/// The names used for configuring resources differ from the inspect output,
/// so every comparison goes through this table.
pub const DIMENSION_MAP: &[(&str, &str)] = &[
    ("mem_limit", "Memory"),
    ("mem_reservation", "MemoryReservation"),
    ("memswap_limit", "MemorySwap"),
    ("cpu_period", "CpuPeriod"),
    ("cpu_quota", "CpuQuota"),
    ("cpu_shares", "CpuShares"),
    ("cpuset_cpus", "CpusetCpus"),
    ("cpuset_mems", "CpusetMems"),
    ("kernel_memory", "KernelMemory"),
    ("blkio_weight", "BlkioWeight"),
    ("ulimits", "Ulimits"),
];

/// Supported unit suffixes for dimension values and their byte multipliers.
pub const DIMENSION_UNITS: &[(char, u64)] = &[
    ('b', 1),
    ('k', 1024),
    ('m', 1024 * 1024),
    ('g', 1024 * 1024 * 1024),
];

// =============================================================================
// Healthcheck
// =============================================================================

/// Healthcheck keys accepted in a desired spec, mapped to the engine's field
/// names.
pub const HEALTHCHECK_KEYS: &[(&str, &str)] = &[
    ("test", "Test"),
    ("interval", "Interval"),
    ("timeout", "Timeout"),
    ("start_period", "StartPeriod"),
    ("retries", "Retries"),
];

/// Healthcheck keys expressed in seconds by the caller and in nanoseconds by
/// the engine.
pub const HEALTHCHECK_DURATION_KEYS: &[&str] = &["interval", "timeout", "start_period"];

/// Nanoseconds per second.
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

// =============================================================================
// Diagnostics
// =============================================================================

/// Pattern matching environment keys whose values must never be rendered.
pub const SECRET_KEY_PATTERN: &str = r"(?i)(pass|token|secret|credential|api_?key|private_?key)";

/// Rendered in place of a secret value.
pub const REDACTED: &str = "[REDACTED]";

/// Rendered in place of a desired secret value that differs from the live one.
pub const REDACTED_CHANGED: &str = "[REDACTED:changed]";
