//! Error types for the labflow orchestration core.
//!
//! Remote failures start life as a [`RemoteError`] and are sorted into
//! [`LabflowError::TransientNetwork`] or [`LabflowError::FatalRemote`] by the
//! backoff classifier. Job, artifact and fan-out failures have their own
//! variants so callers can tell "the job failed" apart from "we stopped
//! watching".

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The main error type for labflow operations.
#[derive(Debug, Error)]
pub enum LabflowError {
    /// A retryable transport or server failure, surfaced after the retry budget ran out.
    #[error("Transient network error: {0}")]
    TransientNetwork(RemoteError),

    /// A remote failure that must not be retried (4xx other than 408/429, malformed payloads).
    #[error("Fatal remote error: {0}")]
    FatalRemote(RemoteError),

    /// The remote job reached a terminal, non-success conclusion.
    #[error("Job run {run_id} finished with conclusion '{conclusion}'")]
    JobFailed {
        /// Remote run identifier.
        run_id: u64,
        /// The conclusion string reported by the remote system.
        conclusion: String,
    },

    /// The poll loop gave up before the job reached a terminal status.
    #[error("Job run {} did not reach a terminal status within {waited:?}", display_run(*run_id))]
    JobTimeout {
        /// The pinned run, if one was identified before giving up.
        run_id: Option<u64>,
        /// How long the loop waited.
        waited: Duration,
    },

    /// None of the expected artifacts were listed for a completed run.
    #[error("No artifact named {names:?} found for run {run_id}")]
    ArtifactMissing {
        /// Remote run identifier.
        run_id: u64,
        /// Artifact names that were expected.
        names: Vec<String>,
    },

    /// The fan-out base branch could not be read.
    #[error("Base branch '{branch}' could not be resolved: {source}")]
    BaseContextUnresolved {
        /// The base branch name.
        branch: String,
        /// The underlying failure.
        #[source]
        source: Box<LabflowError>,
    },

    /// A step graph failed validation.
    #[error("{0}")]
    Validation(#[from] GraphValidationError),

    /// A cycle was detected in a step graph.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// A step reported a failure of its own.
    #[error("Step '{step}' failed: {message}")]
    StepFailed {
        /// The step name.
        step: String,
        /// Failure description.
        message: String,
    },

    /// Work was cancelled through a cancellation token.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// An artifact archive could not be read or unpacked.
    #[error("Archive error: {0}")]
    Archive(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn display_run(run_id: Option<u64>) -> String {
    run_id.map_or_else(|| "<unpinned>".to_string(), |id| id.to_string())
}

impl LabflowError {
    /// Creates a step failure.
    #[must_use]
    pub fn step_failed(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StepFailed {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Returns true for errors the backoff policy would retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }

    /// Returns the remote error carried by this error, if any.
    #[must_use]
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::TransientNetwork(err) | Self::FatalRemote(err) => Some(err),
            Self::BaseContextUnresolved { source, .. } => source.remote(),
            _ => None,
        }
    }

    /// Returns the HTTP status of the underlying remote error, if any.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        self.remote().and_then(RemoteError::status_code)
    }
}

impl From<zip::result::ZipError> for LabflowError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

/// Category of a raw remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// The connection could not be established or was dropped.
    Connect,
    /// The transport timed out.
    Timeout,
    /// The server answered with a non-success HTTP status.
    Status(u16),
    /// The response body could not be decoded.
    Decode,
    /// A provider-level failure with no HTTP status (throttling is signalled in the message).
    Provider,
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Timeout => write!(f, "timeout"),
            Self::Status(code) => write!(f, "HTTP {code}"),
            Self::Decode => write!(f, "decode"),
            Self::Provider => write!(f, "provider"),
        }
    }
}

/// A raw failure from a remote call, before classification.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    /// What went wrong.
    pub kind: RemoteErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Raw `Retry-After` header value, if the response carried one.
    pub retry_after: Option<String>,
    /// Response body, if any was read.
    pub body: Option<String>,
}

impl RemoteError {
    /// Creates a new remote error.
    #[must_use]
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
            body: None,
        }
    }

    /// Creates a connection failure.
    #[must_use]
    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Connect, message)
    }

    /// Creates a transport timeout.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Timeout, message)
    }

    /// Creates an HTTP status failure.
    #[must_use]
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Status(code), message)
    }

    /// Creates a decode failure.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Decode, message)
    }

    /// Creates a provider failure.
    #[must_use]
    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Provider, message)
    }

    /// Sets the raw `Retry-After` header value.
    #[must_use]
    pub fn with_retry_after(mut self, value: impl Into<String>) -> Self {
        self.retry_after = Some(value.into());
        self
    }

    /// Sets the response body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Returns the HTTP status, if this is a status failure.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self.kind {
            RemoteErrorKind::Status(code) => Some(code),
            _ => None,
        }
    }
}

/// Machine-readable details attached to a graph validation failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationInfo {
    /// Error code (e.g., "GRAPH-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
}

impl ValidationInfo {
    /// Creates new validation info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }
}

/// Error raised when step graph validation fails.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GraphValidationError {
    /// The error message.
    pub message: String,
    /// The steps involved in the error.
    pub steps: Vec<String>,
    /// Optional machine-readable info.
    pub info: Option<ValidationInfo>,
}

impl GraphValidationError {
    /// Creates a new graph validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            steps: Vec::new(),
            info: None,
        }
    }

    /// Sets the steps involved.
    #[must_use]
    pub fn with_steps(mut self, steps: Vec<String>) -> Self {
        self.steps = steps;
        self
    }

    /// Sets the validation info.
    #[must_use]
    pub fn with_info(mut self, info: ValidationInfo) -> Self {
        self.info = Some(info);
        self
    }

    /// Returns the error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.info.as_ref().map(|i| i.code.as_str())
    }
}

/// Error raised when a cycle is detected in a step graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in step graph: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of steps forming the cycle.
    pub cycle_path: Vec<String>,
    /// Validation info.
    pub info: ValidationInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ValidationInfo::new(
            "GRAPH-CYCLE",
            format!("Step graph contains a cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the edges in the cycle to break it.");

        Self {
            cycle_path,
            info,
        }
    }
}
