//! End-to-end supervisor scenarios against the in-memory runtime.
//!
//! Each test drives a real [`Supervisor`] with a [`StubRuntime`], a
//! channel-fed [`SpecWatcher`] and a plain signal channel, then checks the
//! recorded transitions and runtime calls.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use specmock::mock::{
    ContainerRuntime, ExitStatus, MockError, MockServerSession, RestartCause, SessionConfig,
    ShutdownSignal, SpecWatcher, Supervisor, SupervisorConfig, SupervisorReport, SupervisorState,
    WatchEvent,
};
use specmock::testing::{CollectingSink, RuntimeCall, StubRuntime};

use SupervisorState::{Restarting, Running, Starting, Stopped, Stopping};

const ACCESS_LINE: &str =
    r#"172.17.0.1 - - [01/Jan/2024:10:15:32 +0000] "GET /pets HTTP/1.1" 200 512"#;

struct Harness {
    runtime: Arc<StubRuntime>,
    sink: CollectingSink,
    changes: mpsc::Sender<WatchEvent>,
    signals: mpsc::Sender<ShutdownSignal>,
    state: watch::Receiver<SupervisorState>,
    supervisor: Option<Supervisor>,
    task: Option<JoinHandle<specmock::mock::Result<SupervisorReport>>>,
}

impl Harness {
    fn new(runtime: StubRuntime, config: SupervisorConfig) -> Self {
        let mut harness = Self::prepared(runtime, config);
        harness.spawn();
        harness
    }

    /// Build everything but do not run the supervisor yet.
    fn prepared(runtime: StubRuntime, config: SupervisorConfig) -> Self {
        let runtime = Arc::new(runtime);
        let dyn_runtime: Arc<dyn ContainerRuntime> = runtime.clone();
        let session = MockServerSession::new(
            dyn_runtime,
            SessionConfig::new("/work/api.yaml", "/home/dev/.specmock/openapi-mock.yaml"),
        );

        let (changes, watcher) = SpecWatcher::from_channel("/work/api.yaml");
        let (signals, signal_rx) = mpsc::channel(4);
        let sink = CollectingSink::new();

        let supervisor = Supervisor::new(
            session,
            watcher,
            signal_rx,
            Box::new(sink.clone()),
            config,
        );
        let state = supervisor.subscribe_state();

        Self {
            runtime,
            sink,
            changes,
            signals,
            state,
            supervisor: Some(supervisor),
            task: None,
        }
    }

    fn spawn(&mut self) {
        let supervisor = self.supervisor.take().expect("supervisor already spawned");
        self.task = Some(tokio::spawn(supervisor.run()));
    }

    async fn change(&self) {
        self.changes.send(WatchEvent::Changed).await.unwrap();
    }

    async fn interrupt(&self) {
        self.signals.send(ShutdownSignal::Interrupt).await.unwrap();
    }

    /// Wait until `count` containers have been created and exactly one runs.
    async fn wait_for_containers(&self, count: usize) -> String {
        let runtime = self.runtime.clone();
        wait_until(&format!("{count} containers"), move || {
            runtime.creates() == count && runtime.running().len() == 1
        })
        .await;
        self.runtime.running().remove(0)
    }

    async fn join(mut self) -> specmock::mock::Result<SupervisorReport> {
        let task = self.task.take().expect("supervisor spawned");
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("supervisor did not finish")
            .expect("supervisor task panicked")
    }
}

fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        shutdown_grace: Duration::from_secs(1),
        start_backoff: Duration::from_millis(10),
        log_drain_timeout: Duration::from_millis(500),
        ..SupervisorConfig::default()
    }
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let polled = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {what}");
}

#[tokio::test]
async fn test_starts_and_runs_until_interrupted() {
    let harness = Harness::new(StubRuntime::new(), fast_config());
    let id = harness.wait_for_containers(1).await;

    let mut state = harness.state.clone();
    state.wait_for(|s| *s == Running).await.unwrap();

    harness.interrupt().await;
    let runtime = harness.runtime.clone();
    let report = harness.join().await.unwrap();

    assert_eq!(report.transitions, vec![Starting, Running, Stopping, Stopped]);
    assert_eq!(report.signal, Some(ShutdownSignal::Interrupt));
    assert_eq!(report.sessions.len(), 1);
    assert_eq!(runtime.stops_for(&id), 1);
    assert!(runtime.running().is_empty());
}

#[tokio::test]
async fn test_spec_change_recreates_container() {
    let harness = Harness::new(StubRuntime::new(), fast_config());
    let first = harness.wait_for_containers(1).await;

    harness.change().await;
    let second = harness.wait_for_containers(2).await;
    assert_ne!(first, second);

    harness.interrupt().await;
    let runtime = harness.runtime.clone();
    let report = harness.join().await.unwrap();

    assert_eq!(
        report.transitions,
        vec![
            Starting, Running, Restarting, Starting, Running, Stopping, Stopped
        ]
    );
    assert_eq!(report.restarts, vec![RestartCause::SpecChanged]);
    assert_eq!(
        report.sessions.iter().map(|s| s.generation).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert_eq!(runtime.stops_for(&first), 1);
    assert_eq!(runtime.stops_for(&second), 1);
    assert!(runtime.running().is_empty());
}

#[tokio::test]
async fn test_old_container_stops_before_new_one_is_created() {
    let harness = Harness::new(StubRuntime::new(), fast_config());
    let first = harness.wait_for_containers(1).await;

    harness.change().await;
    harness.wait_for_containers(2).await;
    harness.interrupt().await;
    let runtime = harness.runtime.clone();
    harness.join().await.unwrap();

    let calls = runtime.calls();
    let stop_first = calls
        .iter()
        .position(|c| *c == RuntimeCall::Stop(first.clone()))
        .unwrap();
    let second_create = calls
        .iter()
        .rposition(|c| matches!(c, RuntimeCall::Create(_)))
        .unwrap();
    assert!(stop_first < second_create, "calls: {calls:?}");
}

#[tokio::test]
async fn test_burst_of_changes_coalesces() {
    let mut harness = Harness::prepared(StubRuntime::new(), fast_config());
    // Queued before the first container starts, so they all land in one restart.
    for _ in 0..5 {
        harness.change().await;
    }
    harness.spawn();

    harness.wait_for_containers(2).await;
    // Give any stray restart a chance to show up.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.runtime.creates(), 2);

    harness.interrupt().await;
    let report = harness.join().await.unwrap();
    assert_eq!(report.restarts, vec![RestartCause::SpecChanged]);
}

#[tokio::test]
async fn test_unrequested_exit_restarts() {
    let harness = Harness::new(StubRuntime::new(), fast_config());
    let first = harness.wait_for_containers(1).await;

    harness.runtime.exit(&first, 137);
    let second = harness.wait_for_containers(2).await;
    assert_ne!(first, second);

    harness.interrupt().await;
    let report = harness.join().await.unwrap();

    assert_eq!(
        report.restarts,
        vec![RestartCause::Exited(ExitStatus::code(137))]
    );
    assert_eq!(report.sessions.len(), 2);
    assert_eq!(report.transitions.last(), Some(&Stopped));
}

#[tokio::test]
async fn test_clean_exit_also_restarts() {
    let harness = Harness::new(StubRuntime::new(), fast_config());
    let first = harness.wait_for_containers(1).await;

    harness.runtime.exit(&first, 0);
    harness.wait_for_containers(2).await;

    harness.interrupt().await;
    let report = harness.join().await.unwrap();
    assert_eq!(report.restarts, vec![RestartCause::Exited(ExitStatus::code(0))]);
}

#[tokio::test]
async fn test_interrupt_wins_over_queued_change() {
    let mut harness = Harness::prepared(StubRuntime::new(), fast_config());
    harness.change().await;
    harness.interrupt().await;
    harness.spawn();

    let runtime = harness.runtime.clone();
    let report = harness.join().await.unwrap();

    assert_eq!(report.transitions, vec![Starting, Running, Stopping, Stopped]);
    assert!(report.restarts.is_empty());
    assert_eq!(runtime.creates(), 1);
    assert_eq!(runtime.stops(), 1);
    assert!(runtime.running().is_empty());
}

#[tokio::test]
async fn test_terminate_stops_like_interrupt() {
    let harness = Harness::new(StubRuntime::new(), fast_config());
    harness.wait_for_containers(1).await;

    harness
        .signals
        .send(ShutdownSignal::Terminate)
        .await
        .unwrap();
    let report = harness.join().await.unwrap();
    assert_eq!(report.signal, Some(ShutdownSignal::Terminate));
    assert_eq!(report.transitions.last(), Some(&Stopped));
}

#[tokio::test]
async fn test_access_log_is_displayed_in_order() {
    let harness = Harness::new(StubRuntime::new(), fast_config());
    let id = harness.wait_for_containers(1).await;

    let second_line = ACCESS_LINE
        .replace("GET /pets", "POST /pets")
        .replace(" 200 ", " 201 ");
    harness.runtime.emit_log(&id, "openapi-mock starting\n");
    harness.runtime.emit_log(&id, &format!("{ACCESS_LINE}\n"));
    // A line split across two chunks.
    let (head, tail) = second_line.split_at(20);
    harness.runtime.emit_log(&id, head);
    harness.runtime.emit_log(&id, &format!("{tail}\n"));

    let sink = harness.sink.clone();
    wait_until("two log entries", move || sink.entries().len() == 2).await;

    let entries = harness.sink.entries();
    assert_eq!(entries[0].entry.method, "GET");
    assert_eq!(entries[0].entry.status_code, "200");
    assert_eq!(entries[1].entry.method, "POST");
    assert_eq!(entries[1].entry.status_code, "201");
    assert!(entries.iter().all(|e| e.generation == 1));

    harness.interrupt().await;
    harness.join().await.unwrap();
}

#[tokio::test]
async fn test_late_logs_from_replaced_container_are_drained() {
    let harness = Harness::new(StubRuntime::new(), fast_config());
    let first = harness.wait_for_containers(1).await;

    harness.runtime.emit_log(&first, &format!("{ACCESS_LINE}\n"));
    harness.change().await;
    let second = harness.wait_for_containers(2).await;

    harness
        .runtime
        .emit_log(&second, &ACCESS_LINE.replace("/pets", "/owners"));
    harness.runtime.emit_log(&second, "\n");

    let sink = harness.sink.clone();
    wait_until("both entries", move || sink.entries().len() == 2).await;

    let entries = harness.sink.entries();
    assert_eq!(entries[0].generation, 1);
    assert_eq!(entries[0].entry.path, "/pets");
    assert_eq!(entries[1].generation, 2);
    assert_eq!(entries[1].entry.path, "/owners");

    harness.interrupt().await;
    harness.join().await.unwrap();
}

#[tokio::test]
async fn test_image_pull_failure_is_fatal() {
    let runtime = StubRuntime::new();
    runtime.fail_pull();
    let harness = Harness::new(runtime, fast_config());

    let runtime = harness.runtime.clone();
    let state = harness.state.clone();
    let err = harness.join().await.unwrap_err();

    assert!(matches!(err, MockError::ImagePullFailed { .. }), "{err}");
    assert_eq!(runtime.creates(), 0);
    assert_eq!(*state.borrow(), Stopped);
}

#[tokio::test]
async fn test_start_failure_is_fatal_without_retries() {
    let runtime = StubRuntime::new();
    runtime.fail_next_start();
    let harness = Harness::new(runtime, fast_config());

    let runtime = harness.runtime.clone();
    let err = harness.join().await.unwrap_err();

    assert!(matches!(err, MockError::ContainerStartFailed { .. }), "{err}");
    assert!(runtime.calls().contains(&RuntimeCall::Remove("stub-1".to_string())));
    assert!(runtime.running().is_empty());
}

#[tokio::test]
async fn test_start_failure_retried_when_configured() {
    let runtime = StubRuntime::new();
    runtime.fail_next_start();
    let config = SupervisorConfig {
        start_retries: 2,
        ..fast_config()
    };
    let harness = Harness::new(runtime, config);

    harness.wait_for_containers(2).await;
    harness.interrupt().await;
    let report = harness.join().await.unwrap();

    assert_eq!(report.sessions.len(), 1);
    assert_eq!(report.sessions[0].id, "stub-2");
    assert_eq!(report.sessions[0].generation, 1);
    assert_eq!(report.transitions, vec![Starting, Running, Stopping, Stopped]);
}

#[tokio::test]
async fn test_watch_error_is_fatal_and_stops_container() {
    let harness = Harness::new(StubRuntime::new(), fast_config());
    let id = harness.wait_for_containers(1).await;

    harness
        .changes
        .send(WatchEvent::Error("inotify queue overflow".to_string()))
        .await
        .unwrap();

    let runtime = harness.runtime.clone();
    let state = harness.state.clone();
    let err = harness.join().await.unwrap_err();

    assert!(matches!(err, MockError::Watch { .. }), "{err}");
    assert_eq!(runtime.stops_for(&id), 1);
    assert!(runtime.running().is_empty());
    assert_eq!(*state.borrow(), Stopped);
}

#[tokio::test]
async fn test_never_more_than_one_running_container() {
    let harness = Harness::new(StubRuntime::new(), fast_config());
    harness.wait_for_containers(1).await;

    for round in 2..=4 {
        harness.change().await;
        harness.wait_for_containers(round).await;
        assert_eq!(harness.runtime.running().len(), 1);
    }

    harness.interrupt().await;
    let runtime = harness.runtime.clone();
    let report = harness.join().await.unwrap();

    assert_eq!(report.restarts.len(), 3);
    for session in &report.sessions {
        assert_eq!(runtime.stops_for(&session.id), 1, "{}", session.id);
    }
}

#[tokio::test]
async fn test_failed_stop_during_restart_removes_old_container() {
    let harness = Harness::new(StubRuntime::new(), fast_config());
    let first = harness.wait_for_containers(1).await;

    harness.runtime.fail_next_stop();
    harness.change().await;
    let second = harness.wait_for_containers(2).await;
    assert_eq!(harness.runtime.running(), vec![second.clone()]);

    harness.interrupt().await;
    let runtime = harness.runtime.clone();
    let report = harness.join().await.unwrap();

    let calls = runtime.calls();
    let remove_first = calls
        .iter()
        .position(|c| *c == RuntimeCall::Remove(first.clone()))
        .unwrap();
    let second_create = calls
        .iter()
        .position(|c| *c == RuntimeCall::Create(second.clone()))
        .unwrap();
    assert!(remove_first < second_create, "calls: {calls:?}");
    assert_eq!(report.sessions.len(), 2);
    assert!(runtime.running().is_empty());
}

#[tokio::test]
async fn test_unstoppable_container_is_fatal_during_restart() {
    let harness = Harness::new(StubRuntime::new(), fast_config());
    let first = harness.wait_for_containers(1).await;

    harness.runtime.fail_next_stop();
    harness.runtime.fail_next_remove();
    harness.change().await;

    let runtime = harness.runtime.clone();
    let state = harness.state.clone();
    let err = harness.join().await.unwrap_err();

    assert!(matches!(err, MockError::ContainerStopFailed { .. }), "{err}");
    assert_eq!(runtime.creates(), 1);
    // The restart gave up; shutdown cleanup stopped the container.
    assert_eq!(runtime.stops_for(&first), 2);
    assert!(runtime.running().is_empty());
    assert_eq!(*state.borrow(), Stopped);
}

#[tokio::test]
async fn test_interrupt_during_restart_stop_skips_new_container() {
    let runtime = StubRuntime::new();
    runtime.slow_stop(Duration::from_millis(200));
    let harness = Harness::new(runtime, fast_config());
    harness.wait_for_containers(1).await;

    harness.change().await;
    let runtime = harness.runtime.clone();
    wait_until("restart stop", move || runtime.stops() == 1).await;
    harness.interrupt().await;

    let runtime = harness.runtime.clone();
    let report = harness.join().await.unwrap();

    assert_eq!(report.transitions, vec![Starting, Running, Restarting, Stopped]);
    assert_eq!(report.signal, Some(ShutdownSignal::Interrupt));
    assert_eq!(runtime.creates(), 1);
    assert_eq!(runtime.stops(), 1);
    assert!(runtime.running().is_empty());
}
