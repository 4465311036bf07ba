//! Container runtime capability surface.
//!
//! The session drives containers exclusively through [`ContainerRuntime`], so
//! the Docker implementation can be swapped for an in-memory one in tests.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::mock::config::ContainerSpec;
use crate::mock::error::Result;

/// How a container left the running state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit status code reported by the runtime.
    pub code: i64,
    /// Error message reported alongside the status, if any.
    pub error: Option<String>,
}

impl ExitStatus {
    /// Exit status with no error message.
    pub fn code(code: i64) -> Self {
        Self { code, error: None }
    }

    /// Whether the process exited cleanly.
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Operations the session needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Make sure `image` is available locally, pulling it if it is not.
    async fn ensure_image(&self, image: &str) -> Result<()>;

    /// Create (but do not start) a container, returning its id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    /// Start a created container.
    async fn start(&self, id: &str) -> Result<()>;

    /// Stop a container, killing it after `grace`.
    ///
    /// Returns [`MockError::NotRunning`](crate::mock::MockError::NotRunning)
    /// when the container was already stopped or removed.
    async fn stop(&self, id: &str, grace: Duration) -> Result<()>;

    /// Restart a container in place, killing it after `grace`.
    async fn restart(&self, id: &str, grace: Duration) -> Result<()>;

    /// Force-remove a container regardless of its state.
    async fn remove(&self, id: &str) -> Result<()>;

    /// Resolve once the container is no longer running.
    async fn wait_for_exit(&self, id: &str) -> Result<ExitStatus>;

    /// Follow the combined stdout/stderr of a container.
    ///
    /// Items are raw output chunks; they are not guaranteed to end on a line
    /// or character boundary. The stream ends when the container stops.
    fn logs(&self, id: &str) -> BoxStream<'static, Result<Vec<u8>>>;
}
