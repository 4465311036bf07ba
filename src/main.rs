use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use specmock::cli::{Cli, LogFormat};
use specmock::config::MockConfig;
use specmock::mock::{
    ConsoleSink, DockerRuntime, MockServerSession, SpecWatcher, Supervisor, ensure_settings_file,
    listen_for_shutdown,
};
use specmock::validate::validate_spec;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before the CLI so SPECMOCK_* values from it are visible
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("specmock=info"));
    match cli.log_format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }

    let config = MockConfig::resolve(&cli)?;

    let summary = validate_spec(&config.spec_path)?;
    tracing::info!(
        "Loaded {} ({}, OpenAPI {}, {} paths)",
        summary.title,
        summary.version.as_deref().unwrap_or("unversioned"),
        summary.openapi,
        summary.path_count
    );

    ensure_settings_file(&config.settings_path)?;

    let runtime = Arc::new(DockerRuntime::connect().await?);
    let session = MockServerSession::new(runtime, config.session_config());
    let watcher = SpecWatcher::watch(&config.spec_path)?;
    let signals = listen_for_shutdown()?;

    let supervisor = Supervisor::new(
        session,
        watcher,
        signals,
        Box::new(ConsoleSink),
        config.supervisor_config(),
    );

    let report = supervisor.run().await?;
    tracing::debug!(
        sessions = report.sessions.len(),
        restarts = report.restarts.len(),
        "Mock server stopped"
    );

    Ok(())
}
