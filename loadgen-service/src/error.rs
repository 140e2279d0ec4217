//! Errors raised by the service layer.

use std::path::PathBuf;

use loadgen_types::ConfigError;
use thiserror::Error;

/// Errors that terminate the scheduling loop of a profile.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The node could not dispatch requests as fast as the profile demands, and the run was
    /// configured to abort in that case.
    #[error(
        "node cannot keep up with {request_type} at {rate:.3} requests/s \
         (required interval {required:.4}s, observed latency {observed:.4}s)"
    )]
    CannotKeepUp {
        /// The request type whose profile fell behind.
        request_type: String,
        /// The target rate at the time of the failure.
        rate: f64,
        /// The sampled time until the next request, in seconds.
        required: f64,
        /// The dispatch latency observed in the previous iteration, in seconds.
        observed: f64,
    },

    /// The target rate exceeded the hard ceiling. This always aborts the whole run.
    #[error("aborting: request rate {rate:.3} exceeds the maximum of {max} requests/s")]
    GovernorViolation {
        /// The target rate that triggered the governor.
        rate: f64,
        /// The configured ceiling.
        max: f64,
    },
}

impl SchedulerError {
    /// Returns `true` if the error must abort the whole run rather than a single profile.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SchedulerError::GovernorViolation { .. })
    }
}

/// Errors raised while ingesting a raw log file.
#[derive(Debug, Error)]
pub enum LogError {
    /// The file could not be read.
    #[error("failed to read log {path}: {source}", path = .path.display())]
    Io {
        /// Path of the log.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A line did not follow the record format. Ingestion of the whole file is aborted.
    #[error("malformed record at line {line}: {reason}")]
    Format {
        /// 1-based line number.
        line: usize,
        /// Human readable description of the problem.
        reason: String,
    },

    /// A detail event used a name reserved for end-to-end records.
    #[error("the event name `{0}` is reserved")]
    ReservedName(String),
}

/// Errors reported by the external collaborators: provisioning, remote execution and the
/// test harness.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// A subprocess could not be spawned or awaited.
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        /// The program that was executed.
        program: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A subprocess exited unsuccessfully.
    #[error("`{command}` exited with status {status}")]
    Failed {
        /// The command line that was executed.
        command: String,
        /// The exit status, `-1` if the process was killed by a signal.
        status: i32,
    },

    /// The collaborator does not support the requested operation.
    #[error("{0}")]
    Unsupported(&'static str),
}

/// Errors that abort a controller run.
#[derive(Debug, Error)]
pub enum RunError {
    /// The run definition is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A collaborator failed.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// A log could not be written or read.
    #[error(transparent)]
    Log(#[from] LogError),

    /// A local file could not be written or read.
    #[error("i/o error on {path}: {source}", path = .path.display())]
    Io {
        /// The affected path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The provider yielded no nodes.
    #[error("no nodes available for run `{0}`")]
    NoNodes(String),

    /// A dynamic provider was asked for more nodes than there are IP addresses.
    #[error("insufficient IP addresses: {needed} nodes but only {available} addresses")]
    InsufficientIps {
        /// The number of nodes requested.
        needed: usize,
        /// The size of the IP pool.
        available: usize,
    },

    /// A node exceeded the request rate ceiling. The remaining nodes are not awaited.
    #[error("node {node} exceeded the maximum request rate, run aborted")]
    GovernorViolation {
        /// The node that reported the violation.
        node: String,
    },

    /// None of the nodes produced a usable time log.
    #[error("no usable time logs were retrieved for run `{0}`")]
    NoLogs(String),
}

/// Result type for controller runs.
pub type RunResult<T> = Result<T, RunError>;
