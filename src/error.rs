//! Error types for drift detection and reconciliation.
//!
//! Every failure of an invocation surfaces as exactly one [`Error`]. Local
//! normalization problems are converted to typed configuration errors at the
//! canonicalization boundary and propagate unchanged to the caller; no
//! partial reconciliation result is returned on a fatal path.

use serde::Serialize;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while comparing or reconciling a container.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Dimension key not supported by the runtime.
    #[error("unsupported dimensions: {}", .0.join(", "))]
    UnsupportedDimension(Vec<String>),

    /// Dimension set to `None`, which the runtime no longer supports.
    #[error(
        "the dimension [{0}] is no longer supported by the container engine, \
         remove it from the configuration or change it to its replacement"
    )]
    RemovedDimension(String),

    /// Dimension value carries an unknown unit suffix.
    #[error(
        "the dimension unit [{unit}] is not supported for the dimension [{value}], \
         supported units are ['b', 'k', 'm', 'g']"
    )]
    InvalidDimensionUnit { unit: char, value: String },

    /// Dimension value is neither a number nor a number with a unit.
    #[error("invalid value for dimension [{key}]: {value}")]
    InvalidDimensionValue { key: String, value: String },

    /// Healthcheck option not in the supported key set.
    #[error("unsupported healthcheck options: {}", .0.join(", "))]
    UnsupportedHealthcheckOption(Vec<String>),

    /// Healthcheck option missing from the desired spec.
    #[error("missing healthcheck options: {}", .0.join(", "))]
    MissingHealthcheckOption(Vec<String>),

    /// Healthcheck option value cannot be parsed.
    #[error("cannot parse healthcheck option '{key}': expected {expected}, got {value}")]
    InvalidHealthcheckValue {
        key: String,
        expected: &'static str,
        value: String,
    },

    /// Volume string does not follow `src:dst[:opts]`.
    #[error("wrong format of volume: {0}")]
    MalformedVolume(String),

    /// Environment entry without `=`.
    #[error("cannot convert {0:?} to an environment entry (expected KEY=VALUE)")]
    InvalidEnvironment(String),

    /// Parameter set cannot be deserialized into a desired spec.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Action requires a parameter that was not supplied.
    #[error("action '{action}' requires parameter '{parameter}'")]
    MissingParameter {
        action: String,
        parameter: &'static str,
    },

    // =========================================================================
    // Engine API Errors
    // =========================================================================
    /// Engine call failed.
    #[error("engine error during {operation}: {explanation}")]
    Engine {
        operation: String,
        explanation: String,
    },

    /// Volume or image cannot be removed because it is in use.
    #[error("{kind} named '{name}' is currently in-use")]
    InUse { kind: &'static str, name: String },

    /// Container does not exist.
    #[error("no such container: {0}")]
    ContainerNotFound(String),

    /// Image does not exist in the registry.
    #[error("the requested image does not exist: {0}")]
    ImageNotFound(String),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// Config-check command returned neither 0 nor 1.
    #[error("failed to compare container configuration: exit code {exit_code}, output: {output}")]
    ConfigCheckFailed { exit_code: i64, output: String },

    /// Container start failed.
    #[error("failed to start container '{name}': {reason}")]
    StartFailed { name: String, reason: String },

    /// Non-detached container finished with a non-zero exit code.
    #[error("container '{name}' exited with non-zero return code {exit_code}")]
    ContainerExited {
        name: String,
        exit_code: i64,
        stdout: String,
        stderr: String,
    },

    // =========================================================================
    // Wait Errors
    // =========================================================================
    /// Container did not become running and healthy before the deadline.
    #[error("{}", .0.message)]
    WaitFailed(Box<FailureReport>),

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Returns true for errors caused by the desired spec itself.
    ///
    /// These are raised before any mutation is attempted.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedDimension(_)
                | Error::RemovedDimension(_)
                | Error::InvalidDimensionUnit { .. }
                | Error::InvalidDimensionValue { .. }
                | Error::UnsupportedHealthcheckOption(_)
                | Error::MissingHealthcheckOption(_)
                | Error::InvalidHealthcheckValue { .. }
                | Error::MalformedVolume(_)
                | Error::InvalidEnvironment(_)
                | Error::InvalidParameters(_)
                | Error::MissingParameter { .. }
        )
    }
}

// =============================================================================
// Failure Report
// =============================================================================

/// Diagnostic payload attached to a failed wait.
///
/// Carries everything an operator needs to understand why the container did
/// not come up: last known state, recent logs, whether a start was attempted
/// and the flags the invocation ran with.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    /// Human-readable summary.
    pub message: String,
    /// Container name.
    pub name: String,
    /// Last observed status (e.g. `created`, `exited`).
    pub status: Option<String>,
    /// Last observed health status.
    pub health: Option<String>,
    /// Tail of the container logs.
    pub logs: String,
    /// Whether the reconciler tried to start the container.
    pub start_attempted: bool,
    /// Result code of the last start attempt (0 ok, 1 failed).
    pub start_rc: Option<i32>,
    /// Error text of the last failed start attempt.
    pub start_stderr: String,
    /// `start` flag of the invocation.
    pub start: bool,
    /// `defer_start` flag of the invocation.
    pub defer_start: bool,
    /// `wait` flag of the invocation.
    pub wait: bool,
    /// When the report was assembled.
    pub observed_at: chrono::DateTime<chrono::Utc>,
}
