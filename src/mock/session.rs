//! Mock server container session.
//!
//! A [`MockServerSession`] owns at most one live container at a time. Every
//! successful [`start`](MockServerSession::start) hands out a
//! [`SessionHandle`] tagged with a generation number; exit and log
//! subscriptions are bound to that handle and carry its generation, so events
//! from a container that has since been replaced can be told apart.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};

use crate::mock::config::SessionConfig;
use crate::mock::error::{MockError, Result};
use crate::mock::log::{AccessLogEntry, LineBuffer};
use crate::mock::runtime::{ContainerRuntime, ExitStatus};

/// Capacity of each per-session log channel.
const LOG_CHANNEL_CAPACITY: usize = 256;

/// Identifies one started container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    /// Runtime-assigned container id.
    pub id: String,
    /// Monotonic start counter, starting at 1.
    pub generation: u64,
}

/// Exit notification for one session.
pub type ExitNotice = Result<ExitStatus>;

/// A parsed access-log line tagged with the session that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    /// Generation of the session that emitted the line.
    pub generation: u64,
    /// The parsed entry.
    pub entry: AccessLogEntry,
}

/// Owns the mock server container.
pub struct MockServerSession {
    runtime: Arc<dyn ContainerRuntime>,
    config: SessionConfig,
    live: Option<SessionHandle>,
    generation: u64,
}

impl MockServerSession {
    /// Create a session; nothing is started until [`start`](Self::start).
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: SessionConfig) -> Self {
        Self {
            runtime,
            config,
            live: None,
            generation: 0,
        }
    }

    /// The live container, if any.
    pub fn live(&self) -> Option<&SessionHandle> {
        self.live.as_ref()
    }

    /// Get the configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Pull the image if needed, then create and start a container.
    ///
    /// Fails with [`MockError::AlreadyRunning`] if a previous container has
    /// not been stopped. A container that was created but failed to start is
    /// force-removed before the error is returned.
    pub async fn start(&mut self) -> Result<SessionHandle> {
        if let Some(live) = &self.live {
            return Err(MockError::AlreadyRunning {
                id: live.id.clone(),
            });
        }

        self.runtime.ensure_image(&self.config.image).await?;

        let id = self.runtime.create(&self.config.container_spec()).await?;

        if let Err(e) = self.runtime.start(&id).await {
            if let Err(remove_err) = self.runtime.remove(&id).await {
                tracing::warn!(
                    container_id = %id,
                    "Failed to remove container after failed start: {}",
                    remove_err
                );
            }
            return Err(e);
        }

        self.generation += 1;
        let handle = SessionHandle {
            id,
            generation: self.generation,
        };
        self.live = Some(handle.clone());

        tracing::info!(
            container_id = %handle.id,
            generation = handle.generation,
            "Started mock server container"
        );
        Ok(handle)
    }

    /// Stop the live container and release its identity.
    ///
    /// The runtime removes the container once it has stopped. If the stop
    /// request fails for any reason other than the container already being
    /// gone, the container is force-removed instead. The handle stays live
    /// only when that removal fails too, and the stop error is returned.
    pub async fn stop(&mut self, handle: &SessionHandle) -> Result<()> {
        self.stop_with_grace(handle, self.config.stop_grace).await
    }

    /// [`stop`](Self::stop) with an explicit grace period.
    pub async fn stop_with_grace(
        &mut self,
        handle: &SessionHandle,
        grace: std::time::Duration,
    ) -> Result<()> {
        self.ensure_live(handle)?;

        tracing::debug!(container_id = %handle.id, ?grace, "Stopping mock server container");
        match self.runtime.stop(&handle.id, grace).await {
            Ok(()) => {
                self.live = None;
                Ok(())
            }
            Err(e) if e.is_already_stopped() => {
                self.live = None;
                Err(e)
            }
            Err(e) => {
                tracing::warn!(container_id = %handle.id, "{}, removing container", e);
                if let Err(remove_err) = self.runtime.remove(&handle.id).await {
                    tracing::warn!(
                        container_id = %handle.id,
                        "Failed to remove container after failed stop: {}",
                        remove_err
                    );
                    return Err(e);
                }
                self.live = None;
                Ok(())
            }
        }
    }

    /// Restart the live container in place, keeping its identity.
    pub async fn restart(&self, handle: &SessionHandle) -> Result<()> {
        self.ensure_live(handle)?;
        self.runtime
            .restart(&handle.id, self.config.stop_grace)
            .await
    }

    /// Subscribe to the next exit of the live container.
    ///
    /// The receiver resolves once, when the container leaves the running
    /// state. Re-subscribe after every start.
    pub fn wait_for_exit(&self, handle: &SessionHandle) -> Result<oneshot::Receiver<ExitNotice>> {
        self.ensure_live(handle)?;

        let (tx, rx) = oneshot::channel();
        let runtime = Arc::clone(&self.runtime);
        let id = handle.id.clone();

        tokio::spawn(async move {
            let notice = runtime.wait_for_exit(&id).await;
            if tx.send(notice).is_err() {
                tracing::trace!(container_id = %id, "Exit subscription dropped before exit");
            }
        });

        Ok(rx)
    }

    /// Follow the live container's access log.
    ///
    /// Lines are delivered in the order the container wrote them. Lines that
    /// do not parse as access-log entries are skipped. The channel closes when
    /// the container's output ends or the stream fails.
    pub fn stream_logs(&self, handle: &SessionHandle) -> Result<mpsc::Receiver<LogEvent>> {
        self.ensure_live(handle)?;

        let (tx, rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);
        let mut stream = self.runtime.logs(&handle.id);
        let id = handle.id.clone();
        let generation = handle.generation;

        tokio::spawn(async move {
            let mut lines = LineBuffer::default();

            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        for line in lines.push(&bytes) {
                            if !forward(&tx, generation, &line).await {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(container_id = %id, "{}", e);
                        return;
                    }
                }
            }

            if let Some(line) = lines.finish() {
                forward(&tx, generation, &line).await;
            }
            tracing::debug!(container_id = %id, "Log stream ended");
        });

        Ok(rx)
    }

    fn ensure_live(&self, handle: &SessionHandle) -> Result<()> {
        match &self.live {
            Some(live) if live == handle => Ok(()),
            _ => Err(MockError::StaleSession {
                id: handle.id.clone(),
            }),
        }
    }
}

/// Parse and send one line. Returns `false` once the receiver is gone.
async fn forward(tx: &mpsc::Sender<LogEvent>, generation: u64, line: &str) -> bool {
    match AccessLogEntry::parse(line) {
        Ok(entry) => tx.send(LogEvent { generation, entry }).await.is_ok(),
        Err(e) => {
            tracing::debug!("Skipping log line: {}", e);
            true
        }
    }
}

impl Drop for MockServerSession {
    fn drop(&mut self) {
        if let Some(live) = &self.live {
            tracing::warn!(
                container_id = %live.id,
                "MockServerSession dropped without stop(), container may remain running"
            );
        }
    }
}
