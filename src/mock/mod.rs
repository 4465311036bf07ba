//! Supervised OpenAPI mock server running in a Docker container.
//!
//! One container serves mock responses for the spec file. The supervisor
//! keeps exactly one of them alive at a time:
//! - Recreates it when the spec file is written
//! - Recreates it when it exits on its own
//! - Prints its access log as colored lines
//! - Stops it on SIGINT or SIGTERM
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                             Supervisor                                │
//! │                                                                       │
//! │   SpecWatcher ──┐                                                     │
//! │   signals ──────┼──► select! ──► MockServerSession ──► ContainerRuntime │
//! │   exit waiter ──┤                      │                  (Docker)     │
//! │   log reader ───┘                      ▼                               │
//! │                                   AccessLogEntry ──► LogSink           │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use specmock::mock::{
//!     ConsoleSink, DockerRuntime, MockServerSession, SessionConfig, SpecWatcher, Supervisor,
//!     SupervisorConfig, listen_for_shutdown,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let spec = std::path::Path::new("/work/api.yaml");
//! let runtime = Arc::new(DockerRuntime::connect().await?);
//! let session = MockServerSession::new(
//!     runtime,
//!     SessionConfig::new(spec, "/home/me/.specmock/openapi-mock.yaml"),
//! );
//!
//! let supervisor = Supervisor::new(
//!     session,
//!     SpecWatcher::watch(spec)?,
//!     listen_for_shutdown()?,
//!     Box::new(ConsoleSink),
//!     SupervisorConfig::default(),
//! );
//! let report = supervisor.run().await?;
//! println!("restarted {} times", report.restarts.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod display;
pub mod docker;
pub mod error;
pub mod log;
pub mod runtime;
pub mod session;
pub mod signals;
pub mod supervisor;
pub mod watcher;

pub use config::{
    ContainerSpec, DEFAULT_IMAGE, MockServerSettings, SessionConfig, ensure_settings_file,
};
pub use display::{ConsoleSink, LogSink};
pub use docker::{DockerRuntime, connect_docker};
pub use error::{MalformedLogLine, MockError, Result};
pub use log::{AccessLogEntry, LineBuffer};
pub use runtime::{ContainerRuntime, ExitStatus};
pub use session::{LogEvent, MockServerSession, SessionHandle};
pub use signals::{ShutdownSignal, listen_for_shutdown};
pub use supervisor::{
    RestartCause, Supervisor, SupervisorConfig, SupervisorReport, SupervisorState,
};
pub use watcher::{SpecWatcher, WatchEvent};
