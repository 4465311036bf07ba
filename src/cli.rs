//! Command-line interface.

use std::path::PathBuf;

use clap::{ColorChoice, Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "specmock")]
#[command(about = "Serve mock responses for an OpenAPI spec and restart the server when it changes")]
#[command(
    long_about = "specmock runs an OpenAPI mock server in a Docker container, recreates it whenever the spec file changes and prints its access log.\nExamples:\n  specmock --in api.yaml\n  specmock -i api.yaml --port 9000"
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    /// OpenAPI spec file to serve and watch (or SPECMOCK_SPEC)
    #[arg(short = 'i', long = "in", value_name = "PATH")]
    pub spec: Option<PathBuf>,

    /// Mock server settings file (or SPECMOCK_CONFIG)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Mock server image (or SPECMOCK_IMAGE)
    #[arg(long)]
    pub image: Option<String>,

    /// Host port for the mock server (or SPECMOCK_PORT)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Diagnostic log format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, env = "SPECMOCK_LOG_FORMAT")]
    pub log_format: LogFormat,
}

/// How diagnostics are written to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Pretty,
    /// One JSON object per line.
    Json,
}
