//! Mock server lifecycle supervision.
//!
//! The [`Supervisor`] owns the [`MockServerSession`] and is the only code that
//! starts or stops it. Four independent sources feed one decision point:
//!
//! ```text
//!   SpecWatcher ──── Changed / Error ───────┐
//!   OS signals ───── Interrupt / Terminate ─┤
//!   exit waiter ──── ExitStatus (oneshot) ──┼──► select! ──► restart / stop / display
//!   log reader ───── LogEvent (mpsc) ───────┘
//! ```
//!
//! # State machine
//!
//! ```text
//!   Starting ──ok──► Running ──change / exit──► Restarting ──stopped──► Starting
//!      │                │                          │
//!      │ fail           │ signal                   │ signal pending
//!      ▼                ▼                          ▼
//!   Stopped ◄─────── Stopping                   Stopped
//! ```
//!
//! A pending shutdown signal always wins over starting a replacement
//! container. Restarts recreate the container: the old one is stopped (and
//! auto-removed) and its log channel drained before a new one is started, so
//! entries from two containers never interleave.

use std::time::Duration;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::oneshot::error::RecvError;
use tokio::sync::{mpsc, oneshot, watch};

use crate::mock::display::LogSink;
use crate::mock::error::{MockError, Result};
use crate::mock::runtime::ExitStatus;
use crate::mock::session::{ExitNotice, LogEvent, MockServerSession, SessionHandle};
use crate::mock::signals::ShutdownSignal;
use crate::mock::watcher::{SpecWatcher, WatchEvent};

/// Lifecycle state of the supervised mock server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Creating and starting a container.
    Starting,
    /// Container running, subscriptions live.
    Running,
    /// Tearing down the current container before starting a new one.
    Restarting,
    /// Tearing down the current container for good.
    Stopping,
    /// Done.
    Stopped,
}

/// Why a running container was replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartCause {
    /// The spec file was written.
    SpecChanged,
    /// The container exited without being asked to.
    Exited(ExitStatus),
    /// The exit subscription failed.
    WaitFailed(String),
}

/// Supervisor tuning.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Grace period for the final stop on shutdown.
    pub shutdown_grace: Duration,
    /// Extra attempts after a retryable start failure. Zero makes every
    /// start failure fatal.
    pub start_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub start_backoff: Duration,
    /// How long to keep reading a stopped container's log channel.
    pub log_drain_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(10),
            start_retries: 0,
            start_backoff: Duration::from_millis(500),
            log_drain_timeout: Duration::from_secs(2),
        }
    }
}

/// What happened during a supervisor run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisorReport {
    /// Every state entered, in order, starting with `Starting`.
    pub transitions: Vec<SupervisorState>,
    /// Every container started, in order.
    pub sessions: Vec<SessionHandle>,
    /// Why each restart happened, in order.
    pub restarts: Vec<RestartCause>,
    /// The signal that ended the run, if one did.
    pub signal: Option<ShutdownSignal>,
}

/// Live subscriptions for one started container.
struct Subscription {
    handle: SessionHandle,
    exit: oneshot::Receiver<ExitNotice>,
    exited: bool,
    logs: mpsc::Receiver<LogEvent>,
    logs_open: bool,
}

enum Event {
    Shutdown(ShutdownSignal),
    SignalsClosed,
    Watch(Option<WatchEvent>),
    Exit(std::result::Result<ExitNotice, RecvError>),
    Log(LogEvent),
    LogsClosed,
}

/// Keeps the mock server container in step with the spec file.
pub struct Supervisor {
    session: MockServerSession,
    watcher: SpecWatcher,
    signals: mpsc::Receiver<ShutdownSignal>,
    signals_open: bool,
    sink: Box<dyn LogSink>,
    config: SupervisorConfig,
    state_tx: watch::Sender<SupervisorState>,
    report: SupervisorReport,
}

impl Supervisor {
    /// Create a supervisor. Nothing runs until [`run`](Self::run).
    pub fn new(
        session: MockServerSession,
        watcher: SpecWatcher,
        signals: mpsc::Receiver<ShutdownSignal>,
        sink: Box<dyn LogSink>,
        config: SupervisorConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SupervisorState::Starting);
        Self {
            session,
            watcher,
            signals,
            signals_open: true,
            sink,
            config,
            state_tx,
            report: SupervisorReport::default(),
        }
    }

    /// Observe state changes while the supervisor runs.
    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    /// Run until a shutdown signal or a fatal error.
    ///
    /// Whatever the outcome, the watcher is closed when this returns. A
    /// container that could be neither stopped nor removed is reported as an
    /// error.
    pub async fn run(mut self) -> Result<SupervisorReport> {
        self.report.transitions.push(SupervisorState::Starting);

        let mut result = self.supervise().await;

        if let Some(handle) = self.session.live().cloned() {
            if let Err(e) = self.stop_session(&handle, self.config.shutdown_grace).await {
                result = result.and(Err(e));
            }
        }
        self.watcher.close();
        self.transition(SupervisorState::Stopped);

        result.map(|()| std::mem::take(&mut self.report))
    }

    async fn supervise(&mut self) -> Result<()> {
        let Some(mut sub) = self.start_session().await? else {
            return Ok(());
        };

        tracing::info!("Mock server initialized at {}", self.session.config().url());
        tracing::info!("Watching for file changes in {}", self.watcher.path().display());

        loop {
            let cause = match self.next_event(&mut sub).await {
                Event::Shutdown(signal) => return self.shutdown(sub, signal).await,
                Event::SignalsClosed => {
                    self.signals_open = false;
                    continue;
                }
                Event::Watch(Some(WatchEvent::Changed)) => {
                    tracing::info!("Change detected in {}", self.watcher.path().display());
                    RestartCause::SpecChanged
                }
                Event::Watch(Some(WatchEvent::Error(reason))) => {
                    return Err(self.watch_error(reason));
                }
                Event::Watch(None) => {
                    return Err(self.watch_error("watcher closed".to_string()));
                }
                Event::Exit(notice) => exit_cause(&sub.handle, notice),
                Event::Log(event) => {
                    self.display(sub.handle.generation, &event);
                    continue;
                }
                Event::LogsClosed => {
                    sub.logs_open = false;
                    continue;
                }
            };

            match self.recreate(sub, cause).await? {
                Some(next) => sub = next,
                None => return Ok(()),
            }
        }
    }

    /// Wait for the next event from any source.
    ///
    /// Signals are polled first so a shutdown is never starved by a burst of
    /// file changes.
    async fn next_event(&mut self, sub: &mut Subscription) -> Event {
        tokio::select! {
            biased;

            signal = self.signals.recv(), if self.signals_open => match signal {
                Some(signal) => Event::Shutdown(signal),
                None => Event::SignalsClosed,
            },
            event = self.watcher.recv() => Event::Watch(event),
            notice = &mut sub.exit, if !sub.exited => {
                sub.exited = true;
                Event::Exit(notice)
            }
            event = sub.logs.recv(), if sub.logs_open => match event {
                Some(event) => Event::Log(event),
                None => Event::LogsClosed,
            },
        }
    }

    /// Start a container and subscribe to it.
    ///
    /// Returns `None` if a shutdown signal arrived between retries.
    async fn start_session(&mut self) -> Result<Option<Subscription>> {
        self.transition(SupervisorState::Starting);

        let mut attempt: u32 = 0;
        let handle = loop {
            match self.session.start().await {
                Ok(handle) => break handle,
                Err(e) if attempt < self.config.start_retries && e.is_retryable_start() => {
                    attempt += 1;
                    let delay = self
                        .config
                        .start_backoff
                        .saturating_mul(2u32.saturating_pow(attempt - 1));
                    tracing::warn!(attempt, ?delay, "{}; retrying", e);

                    tokio::time::sleep(delay).await;
                    if let Some(signal) = self.take_pending_shutdown() {
                        tracing::info!("Shutdown requested while retrying start");
                        self.report.signal = Some(signal);
                        return Ok(None);
                    }
                }
                Err(e) => return Err(e),
            }
        };

        let exit = self.session.wait_for_exit(&handle)?;
        let logs = self.session.stream_logs(&handle)?;

        self.report.sessions.push(handle.clone());
        self.transition(SupervisorState::Running);

        Ok(Some(Subscription {
            handle,
            exit,
            exited: false,
            logs,
            logs_open: true,
        }))
    }

    /// Replace the current container with a fresh one.
    ///
    /// Returns `None` if a shutdown signal arrived while the old container was
    /// being torn down; no new container is started in that case.
    async fn recreate(
        &mut self,
        sub: Subscription,
        cause: RestartCause,
    ) -> Result<Option<Subscription>> {
        self.transition(SupervisorState::Restarting);
        self.report.restarts.push(cause);

        let Subscription {
            handle, exit, logs, ..
        } = sub;
        // The exit this stop causes must not be mistaken for a crash.
        drop(exit);

        let grace = self.session.config().stop_grace;
        self.stop_session(&handle, grace).await?;
        self.drain_logs(handle.generation, logs).await;
        self.absorb_pending_changes()?;

        if let Some(signal) = self.take_pending_shutdown() {
            tracing::info!("Shutting down mocking server");
            self.report.signal = Some(signal);
            return Ok(None);
        }

        let next = self.start_session().await?;
        if next.is_some() {
            tracing::info!("Mock server restarted at {}", self.session.config().url());
        }
        Ok(next)
    }

    async fn shutdown(&mut self, sub: Subscription, signal: ShutdownSignal) -> Result<()> {
        tracing::info!("Shutting down mocking server");
        self.report.signal = Some(signal);
        self.transition(SupervisorState::Stopping);

        let Subscription {
            handle, exit, logs, ..
        } = sub;
        drop(exit);

        let grace = self.config.shutdown_grace;
        // A container still live after this is stopped again by `run`.
        let _ = self.stop_session(&handle, grace).await;
        self.drain_logs(handle.generation, logs).await;
        Ok(())
    }

    /// Stop `handle`. A container that had already exited counts as stopped;
    /// any other error means the container may still be running.
    async fn stop_session(&mut self, handle: &SessionHandle, grace: Duration) -> Result<()> {
        match self.session.stop_with_grace(handle, grace).await {
            Ok(()) => {
                tracing::debug!(container_id = %handle.id, "Mock server container stopped");
                Ok(())
            }
            Err(e) if e.is_already_stopped() => {
                tracing::debug!(container_id = %handle.id, "Mock server container already stopped");
                Ok(())
            }
            Err(e) => {
                tracing::error!(container_id = %handle.id, "{}", e);
                Err(e)
            }
        }
    }

    /// Display whatever the stopped container wrote before its log channel
    /// closed.
    async fn drain_logs(&mut self, generation: u64, mut logs: mpsc::Receiver<LogEvent>) {
        let sink = &mut self.sink;
        let drained = tokio::time::timeout(self.config.log_drain_timeout, async {
            while let Some(event) = logs.recv().await {
                if event.generation == generation {
                    sink.entry(&event);
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::debug!(generation, "Log channel still open after drain timeout, dropping it");
        }
    }

    /// Swallow change events queued while a restart was in flight; the new
    /// container reads the file as it is now.
    fn absorb_pending_changes(&mut self) -> Result<()> {
        let mut absorbed: usize = 0;
        while let Some(event) = self.watcher.try_recv() {
            match event {
                WatchEvent::Changed => absorbed += 1,
                WatchEvent::Error(reason) => return Err(self.watch_error(reason)),
            }
        }
        if absorbed > 0 {
            tracing::debug!(absorbed, "Coalesced spec changes into the current restart");
        }
        Ok(())
    }

    fn take_pending_shutdown(&mut self) -> Option<ShutdownSignal> {
        if !self.signals_open {
            return None;
        }
        match self.signals.try_recv() {
            Ok(signal) => Some(signal),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.signals_open = false;
                None
            }
        }
    }

    fn display(&mut self, generation: u64, event: &LogEvent) {
        if event.generation == generation {
            self.sink.entry(event);
        } else {
            tracing::trace!(
                generation = event.generation,
                "Dropping log entry from a replaced container"
            );
        }
    }

    fn watch_error(&self, reason: String) -> MockError {
        let err = MockError::Watch {
            path: self.watcher.path().display().to_string(),
            reason,
        };
        tracing::error!("{}", err);
        err
    }

    fn transition(&mut self, state: SupervisorState) {
        if self.report.transitions.last() == Some(&state) {
            return;
        }
        tracing::debug!(?state, "Supervisor state");
        self.report.transitions.push(state);
        self.state_tx.send_replace(state);
    }
}

/// Log an unrequested exit and turn it into a restart cause.
fn exit_cause(
    handle: &SessionHandle,
    notice: std::result::Result<ExitNotice, RecvError>,
) -> RestartCause {
    match notice {
        Ok(Ok(status)) if status.success() => {
            tracing::warn!(
                container_id = %handle.id,
                "Mock server exited without being asked to, starting a fresh one"
            );
            RestartCause::Exited(status)
        }
        Ok(Ok(status)) => {
            let err = MockError::RuntimeExit {
                id: handle.id.clone(),
                code: status.code,
                message: status.error.clone(),
            };
            tracing::error!("{}", err);
            RestartCause::Exited(status)
        }
        Ok(Err(e)) => {
            tracing::error!("{}", e);
            RestartCause::WaitFailed(e.to_string())
        }
        Err(_) => {
            let reason = "exit watcher ended without a status".to_string();
            tracing::error!(container_id = %handle.id, "{}", reason);
            RestartCause::WaitFailed(reason)
        }
    }
}
