//! Test doubles for driving the supervisor without Docker.
//!
//! Provides:
//! - [`StubRuntime`]: an in-memory [`ContainerRuntime`] that records every
//!   call and lets tests emit log output or make containers exit
//! - [`CollectingSink`]: a [`LogSink`] that keeps every displayed entry
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use specmock::mock::{MockServerSession, SessionConfig};
//! use specmock::testing::StubRuntime;
//!
//! # async fn example() {
//! let runtime = Arc::new(StubRuntime::new());
//! let mut session = MockServerSession::new(
//!     runtime.clone(),
//!     SessionConfig::new("/spec.yaml", "/settings.yaml"),
//! );
//! let handle = session.start().await.unwrap();
//! runtime.exit(&handle.id, 137);
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::mock::config::ContainerSpec;
use crate::mock::display::LogSink;
use crate::mock::error::{MockError, Result};
use crate::mock::runtime::{ContainerRuntime, ExitStatus};
use crate::mock::session::LogEvent;

/// Exit code a stubbed container reports after a requested stop.
pub const STOPPED_EXIT_CODE: i64 = 143;

/// One call made against a [`StubRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    EnsureImage(String),
    Create(String),
    Start(String),
    Stop(String),
    Restart(String),
    Remove(String),
}

struct StubContainer {
    running: bool,
    log_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    log_rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    exit_tx: watch::Sender<Option<ExitStatus>>,
}

#[derive(Default)]
struct StubState {
    next_id: u64,
    stop_delay: Duration,
    containers: HashMap<String, StubContainer>,
    calls: Vec<RuntimeCall>,
}

/// In-memory container runtime.
///
/// Containers start "running" and stay that way until [`stop`] or
/// [`exit`](StubRuntime::exit); either one closes the container's log stream
/// and resolves its exit waiters.
///
/// [`stop`]: ContainerRuntime::stop
#[derive(Default)]
pub struct StubRuntime {
    state: Mutex<StubState>,
    fail_next_start: AtomicBool,
    fail_next_stop: AtomicBool,
    fail_next_remove: AtomicBool,
    fail_pull: AtomicBool,
}

impl StubRuntime {
    /// Create an empty runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `start` call fail.
    pub fn fail_next_start(&self) {
        self.fail_next_start.store(true, Ordering::SeqCst);
    }

    /// Make the next `stop` call fail and leave the container running.
    pub fn fail_next_stop(&self) {
        self.fail_next_stop.store(true, Ordering::SeqCst);
    }

    /// Make the next `remove` call fail and leave the container in place.
    pub fn fail_next_remove(&self) {
        self.fail_next_remove.store(true, Ordering::SeqCst);
    }

    /// Delay every `stop` by `delay` after it is recorded.
    pub fn slow_stop(&self, delay: Duration) {
        self.lock().stop_delay = delay;
    }

    /// Make every image pull fail.
    pub fn fail_pull(&self) {
        self.fail_pull.store(true, Ordering::SeqCst);
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().calls.clone()
    }

    /// Number of containers created.
    pub fn creates(&self) -> usize {
        self.count(|c| matches!(c, RuntimeCall::Create(_)))
    }

    /// Number of stop requests.
    pub fn stops(&self) -> usize {
        self.count(|c| matches!(c, RuntimeCall::Stop(_)))
    }

    /// Stop requests made for `id`.
    pub fn stops_for(&self, id: &str) -> usize {
        self.count(|c| matches!(c, RuntimeCall::Stop(stopped) if stopped == id))
    }

    /// Ids of containers currently running.
    pub fn running(&self) -> Vec<String> {
        let state = self.lock();
        let mut ids: Vec<String> = state
            .containers
            .iter()
            .filter(|(_, c)| c.running)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Write text to a container's log stream.
    pub fn emit_log(&self, id: &str, text: &str) {
        self.emit_bytes(id, text.as_bytes());
    }

    /// Write raw bytes to a container's log stream.
    pub fn emit_bytes(&self, id: &str, bytes: &[u8]) {
        let state = self.lock();
        if let Some(tx) = state.containers.get(id).and_then(|c| c.log_tx.as_ref()) {
            let _ = tx.send(bytes.to_vec());
        }
    }

    /// Make a running container exit on its own with `code`.
    pub fn exit(&self, id: &str, code: i64) {
        let mut state = self.lock();
        if let Some(container) = state.containers.get_mut(id) {
            finish(container, code);
        }
    }

    fn count(&self, predicate: impl Fn(&RuntimeCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    fn record(&self, call: RuntimeCall) {
        self.lock().calls.push(call);
    }

    fn lock(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn finish(container: &mut StubContainer, code: i64) {
    container.running = false;
    container.log_tx = None;
    container.exit_tx.send_replace(Some(ExitStatus::code(code)));
}

#[async_trait]
impl ContainerRuntime for StubRuntime {
    async fn ensure_image(&self, image: &str) -> Result<()> {
        self.record(RuntimeCall::EnsureImage(image.to_string()));
        if self.fail_pull.load(Ordering::SeqCst) {
            return Err(MockError::ImagePullFailed {
                image: image.to_string(),
                reason: "pull access denied".to_string(),
            });
        }
        Ok(())
    }

    async fn create(&self, _spec: &ContainerSpec) -> Result<String> {
        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("stub-{}", state.next_id);

        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let (exit_tx, _) = watch::channel(None);
        state.containers.insert(
            id.clone(),
            StubContainer {
                running: false,
                log_tx: Some(log_tx),
                log_rx: Some(log_rx),
                exit_tx,
            },
        );
        state.calls.push(RuntimeCall::Create(id.clone()));
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.record(RuntimeCall::Start(id.to_string()));
        if self.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(MockError::ContainerStartFailed {
                id: id.to_string(),
                reason: "port is already allocated".to_string(),
            });
        }

        let mut state = self.lock();
        match state.containers.get_mut(id) {
            Some(container) => {
                container.running = true;
                Ok(())
            }
            None => Err(MockError::ContainerStartFailed {
                id: id.to_string(),
                reason: "no such container".to_string(),
            }),
        }
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<()> {
        let delay = {
            let mut state = self.lock();
            state.calls.push(RuntimeCall::Stop(id.to_string()));
            state.stop_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_next_stop.swap(false, Ordering::SeqCst) {
            return Err(MockError::ContainerStopFailed {
                id: id.to_string(),
                grace,
                reason: "daemon did not respond".to_string(),
            });
        }

        let mut state = self.lock();
        match state.containers.get_mut(id) {
            Some(container) if container.running => {
                finish(container, STOPPED_EXIT_CODE);
                Ok(())
            }
            _ => Err(MockError::NotRunning { id: id.to_string() }),
        }
    }

    async fn restart(&self, id: &str, _grace: Duration) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::Restart(id.to_string()));
        match state.containers.get(id) {
            Some(container) if container.running => Ok(()),
            _ => Err(MockError::ContainerRestartFailed {
                id: id.to_string(),
                reason: "container is not running".to_string(),
            }),
        }
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::Remove(id.to_string()));
        if self.fail_next_remove.swap(false, Ordering::SeqCst) {
            return Err(MockError::ContainerStopFailed {
                id: id.to_string(),
                grace: Duration::ZERO,
                reason: "removal already in progress".to_string(),
            });
        }
        state.containers.remove(id);
        Ok(())
    }

    async fn wait_for_exit(&self, id: &str) -> Result<ExitStatus> {
        let rx = self
            .lock()
            .containers
            .get(id)
            .map(|c| c.exit_tx.subscribe());
        let Some(mut rx) = rx else {
            return Err(MockError::ContainerWaitFailed {
                id: id.to_string(),
                reason: "no such container".to_string(),
            });
        };

        let status = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|e| MockError::ContainerWaitFailed {
                id: id.to_string(),
                reason: e.to_string(),
            })?
            .clone();

        status.ok_or_else(|| MockError::ContainerWaitFailed {
            id: id.to_string(),
            reason: "exit status missing".to_string(),
        })
    }

    fn logs(&self, id: &str) -> BoxStream<'static, Result<Vec<u8>>> {
        let rx = self
            .lock()
            .containers
            .get_mut(id)
            .and_then(|c| c.log_rx.take());

        match rx {
            Some(rx) => UnboundedReceiverStream::new(rx).map(Ok).boxed(),
            None => stream::once(std::future::ready(Err(MockError::LogStreamFailed {
                id: id.to_string(),
                reason: "no log stream available".to_string(),
            })))
            .boxed(),
        }
    }
}

/// Log sink that keeps every entry it is given.
#[derive(Clone, Default)]
pub struct CollectingSink {
    entries: Arc<Mutex<Vec<LogEvent>>>,
}

impl CollectingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything displayed so far.
    pub fn entries(&self) -> Vec<LogEvent> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl LogSink for CollectingSink {
    fn entry(&mut self, event: &LogEvent) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(event.clone());
        }
    }
}
