//! Configuration resolution.
//!
//! Values come from CLI flags first, then `SPECMOCK_*` environment variables
//! (a `.env` file is loaded by `main`), then defaults. The resolved
//! [`MockConfig`] is passed explicitly to everything that needs it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Cli;
use crate::error::ConfigError;
use crate::mock::{DEFAULT_IMAGE, SessionConfig, SupervisorConfig};

/// Directory under the home directory holding specmock's own files.
pub const CONFIG_DIR_NAME: &str = ".specmock";

/// File name of the default mock server settings file.
pub const SETTINGS_FILE_NAME: &str = "openapi-mock.yaml";

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Absolute path of the spec file.
    pub spec_path: PathBuf,
    /// Absolute path of the mock server settings file.
    pub settings_path: PathBuf,
    /// Mock server image.
    pub image: String,
    /// Host port for the mock server.
    pub port: u16,
    /// Grace period when stopping a container for a restart.
    pub stop_timeout: Duration,
    /// Grace period when stopping the container on shutdown.
    pub shutdown_timeout: Duration,
    /// Extra attempts after a failed container start.
    pub start_retries: u32,
    /// Delay before the first start retry.
    pub start_backoff: Duration,
    /// How long to wait for a stopped container's logs.
    pub log_drain: Duration,
}

impl MockConfig {
    /// Resolve from CLI flags and the process environment.
    pub fn resolve(cli: &Cli) -> Result<Self, ConfigError> {
        Self::resolve_with(cli, |key| std::env::var(key).ok())
    }

    /// Resolve from CLI flags and an arbitrary variable lookup.
    pub fn resolve_with(
        cli: &Cli,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let env = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let spec_path = cli
            .spec
            .clone()
            .or_else(|| env("SPECMOCK_SPEC").map(PathBuf::from))
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "SPECMOCK_SPEC".to_string(),
                hint: "pass --in <path> or set SPECMOCK_SPEC".to_string(),
            })?;
        let spec_path = absolute(&spec_path)?;

        let settings_path = match cli
            .config
            .clone()
            .or_else(|| env("SPECMOCK_CONFIG").map(PathBuf::from))
        {
            Some(path) => path,
            None => default_settings_path()?,
        };
        let settings_path = if settings_path.is_absolute() {
            settings_path
        } else {
            std::env::current_dir()
                .map_err(|e| ConfigError::Path {
                    path: settings_path.clone(),
                    reason: e.to_string(),
                })?
                .join(settings_path)
        };

        let image = cli
            .image
            .clone()
            .or_else(|| env("SPECMOCK_IMAGE"))
            .unwrap_or_else(|| DEFAULT_IMAGE.to_string());

        let port = match cli.port {
            Some(port) => port,
            None => parse_or("SPECMOCK_PORT", env("SPECMOCK_PORT"), 8080u16)?,
        };
        if port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SPECMOCK_PORT".to_string(),
                message: "port must be non-zero".to_string(),
            });
        }

        let stop_timeout = Duration::from_secs(parse_or(
            "SPECMOCK_STOP_TIMEOUT_SECS",
            env("SPECMOCK_STOP_TIMEOUT_SECS"),
            5u64,
        )?);
        let shutdown_timeout = Duration::from_secs(parse_or(
            "SPECMOCK_SHUTDOWN_TIMEOUT_SECS",
            env("SPECMOCK_SHUTDOWN_TIMEOUT_SECS"),
            10u64,
        )?);
        let start_retries = parse_or(
            "SPECMOCK_START_RETRIES",
            env("SPECMOCK_START_RETRIES"),
            0u32,
        )?;
        let start_backoff = Duration::from_millis(parse_or(
            "SPECMOCK_START_BACKOFF_MS",
            env("SPECMOCK_START_BACKOFF_MS"),
            500u64,
        )?);
        let log_drain = Duration::from_millis(parse_or(
            "SPECMOCK_LOG_DRAIN_MS",
            env("SPECMOCK_LOG_DRAIN_MS"),
            2000u64,
        )?);

        Ok(Self {
            spec_path,
            settings_path,
            image,
            port,
            stop_timeout,
            shutdown_timeout,
            start_retries,
            start_backoff,
            log_drain,
        })
    }

    /// Container session settings.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            image: self.image.clone(),
            spec_path: self.spec_path.clone(),
            settings_path: self.settings_path.clone(),
            host_port: self.port,
            stop_grace: self.stop_timeout,
        }
    }

    /// Supervisor tuning.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            shutdown_grace: self.shutdown_timeout,
            start_retries: self.start_retries,
            start_backoff: self.start_backoff,
            log_drain_timeout: self.log_drain,
        }
    }
}

/// `~/.specmock/openapi-mock.yaml`.
pub fn default_settings_path() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(CONFIG_DIR_NAME).join(SETTINGS_FILE_NAME))
        .ok_or_else(|| ConfigError::MissingRequired {
            key: "SPECMOCK_CONFIG".to_string(),
            hint: "unable to determine the home directory".to_string(),
        })
}

/// Canonicalize an existing file path; bind mounts need absolute paths.
fn absolute(path: &Path) -> Result<PathBuf, ConfigError> {
    let resolved = std::fs::canonicalize(path).map_err(|e| ConfigError::Path {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if !resolved.is_file() {
        return Err(ConfigError::Path {
            path: path.to_path_buf(),
            reason: "not a regular file".to_string(),
        });
    }
    Ok(resolved)
}

fn parse_or<T>(key: &str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
        None => Ok(default),
    }
}
