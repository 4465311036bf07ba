//! Error types for mock server supervision.

use std::time::Duration;

use thiserror::Error;

/// Result type for mock server operations.
pub type Result<T> = std::result::Result<T, MockError>;

/// Errors that can occur while running or supervising the mock server.
#[derive(Debug, Error)]
pub enum MockError {
    /// Docker is not available.
    #[error("Docker not available: {reason}")]
    DockerNotAvailable {
        /// Reason why Docker is unavailable.
        reason: String,
    },

    /// Failed to pull the image.
    #[error("Failed to pull image '{image}': {reason}")]
    ImagePullFailed {
        /// Image reference.
        image: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to create the container.
    #[error("Failed to create mock server container from '{image}': {reason}")]
    ContainerCreateFailed {
        /// Image reference.
        image: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to start a created container.
    #[error("Failed to start mock server container {id}: {reason}")]
    ContainerStartFailed {
        /// Container id.
        id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Stop request was rejected by the runtime.
    #[error("Failed to stop mock server container {id} within {grace:?}: {reason}")]
    ContainerStopFailed {
        /// Container id.
        id: String,
        /// Grace period that was requested.
        grace: Duration,
        /// Reason for failure.
        reason: String,
    },

    /// In-place restart was rejected by the runtime.
    #[error("Failed to restart mock server container {id}: {reason}")]
    ContainerRestartFailed {
        /// Container id.
        id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Waiting for the container to exit failed.
    #[error("Failed to wait for mock server container {id}: {reason}")]
    ContainerWaitFailed {
        /// Container id.
        id: String,
        /// Reason for failure.
        reason: String,
    },

    /// The log stream broke before the container stopped.
    #[error("Log stream for mock server container {id} failed: {reason}")]
    LogStreamFailed {
        /// Container id.
        id: String,
        /// Reason for failure.
        reason: String,
    },

    /// The container is already stopped or gone.
    #[error("Mock server container {id} is not running")]
    NotRunning {
        /// Container id.
        id: String,
    },

    /// A start was requested while a previous container is still live.
    #[error("Mock server container {id} is still live, stop it before starting another")]
    AlreadyRunning {
        /// Id of the live container.
        id: String,
    },

    /// An operation referenced a container that is no longer the live one.
    #[error("Session handle for container {id} is stale")]
    StaleSession {
        /// Id the caller referenced.
        id: String,
    },

    /// The spec file watch broke.
    #[error("Watching {path} failed: {reason}")]
    Watch {
        /// Watched path.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// The mock server exited with a non-zero status.
    #[error("Mock server container {id} exited with status {code}{}", exit_suffix(.message))]
    RuntimeExit {
        /// Container id.
        id: String,
        /// Exit status code.
        code: i64,
        /// Error message reported by the runtime, if any.
        message: Option<String>,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MockError {
    /// Whether a stop failure only means the container was already gone.
    pub fn is_already_stopped(&self) -> bool {
        matches!(self, MockError::NotRunning { .. })
    }

    /// Whether a failed start is worth another attempt.
    ///
    /// Pull and connection failures will not fix themselves on an immediate
    /// retry; create/start failures (port still held by a container that is
    /// being removed, for example) can.
    pub fn is_retryable_start(&self) -> bool {
        matches!(
            self,
            MockError::ContainerCreateFailed { .. } | MockError::ContainerStartFailed { .. }
        )
    }
}

fn exit_suffix(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(": {m}"))
        .unwrap_or_default()
}

/// A log line that does not have the access-log token layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed log line ({tokens} tokens, need at least {expected}): {line}")]
pub struct MalformedLogLine {
    /// The raw line.
    pub line: String,
    /// Tokens found after splitting on spaces.
    pub tokens: usize,
    /// Minimum token count required.
    pub expected: usize,
}
