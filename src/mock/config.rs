//! Configuration types for the mock server container.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mock::error::Result;

/// Image used when none is configured.
pub const DEFAULT_IMAGE: &str = "muonsoft/openapi-mock:v0.3.1";

/// Port the mock server listens on inside the container.
pub const CONTAINER_PORT: u16 = 8080;

/// Where the spec file is mounted inside the container.
pub const CONTAINER_SPEC_PATH: &str = "/app/mocking/fake-api.yaml";

/// Where the settings file is mounted inside the container.
pub const CONTAINER_SETTINGS_PATH: &str = "/app/mocking/openapi-mock.yaml";

/// Environment variable the mock server reads its spec location from.
pub const SPEC_URL_ENV: &str = "OPENAPI_MOCK_SPECIFICATION_URL";

/// Everything needed to create one mock server container.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Image reference.
    pub image: String,
    /// Absolute host path of the OpenAPI spec file.
    pub spec_path: PathBuf,
    /// Absolute host path of the mock server settings file.
    pub settings_path: PathBuf,
    /// Host port bound to the container port on 127.0.0.1.
    pub host_port: u16,
    /// Grace period before a stop or restart kills the container.
    pub stop_grace: Duration,
}

impl SessionConfig {
    /// Create a config with the default image, port and grace period.
    pub fn new(spec_path: impl Into<PathBuf>, settings_path: impl Into<PathBuf>) -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            spec_path: spec_path.into(),
            settings_path: settings_path.into(),
            host_port: CONTAINER_PORT,
            stop_grace: Duration::from_secs(5),
        }
    }

    /// The container definition this config produces.
    pub fn container_spec(&self) -> ContainerSpec {
        ContainerSpec {
            image: self.image.clone(),
            env: vec![(SPEC_URL_ENV.to_string(), CONTAINER_SPEC_PATH.to_string())],
            cmd: vec![
                "serve".to_string(),
                "--configuration".to_string(),
                CONTAINER_SETTINGS_PATH.to_string(),
            ],
            container_port: CONTAINER_PORT,
            host_port: self.host_port,
            binds: vec![
                (
                    self.spec_path.display().to_string(),
                    CONTAINER_SPEC_PATH.to_string(),
                ),
                (
                    self.settings_path.display().to_string(),
                    CONTAINER_SETTINGS_PATH.to_string(),
                ),
            ],
        }
    }

    /// URL the mock server is reachable at from the host.
    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.host_port)
    }
}

/// Runtime-agnostic description of the container to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Image reference.
    pub image: String,
    /// Environment variables: (name, value).
    pub env: Vec<(String, String)>,
    /// Command passed to the image entrypoint.
    pub cmd: Vec<String>,
    /// Exposed port inside the container.
    pub container_port: u16,
    /// Port on 127.0.0.1 mapped to `container_port`.
    pub host_port: u16,
    /// Bind mounts: (host_path, container_path).
    pub binds: Vec<(String, String)>,
}

/// Settings file understood by the openapi-mock server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockServerSettings {
    pub application: ApplicationSettings,
    pub http: HttpSettings,
    pub generation: GenerationSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSettings {
    pub debug: bool,
    pub log_level: String,
    pub log_format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSettings {
    pub port: u16,
    pub cors_enabled: bool,
    pub response_timeout: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub use_examples: String,
    pub suppress_errors: bool,
    pub null_probability: f64,
    pub default_min_int: i64,
    pub default_max_int: i64,
    pub default_min_float: f64,
    pub default_max_float: f64,
    pub default_max_items: u32,
    pub default_min_items: u32,
}

impl Default for MockServerSettings {
    fn default() -> Self {
        Self {
            application: ApplicationSettings {
                debug: false,
                log_level: "info".to_string(),
                log_format: "tty".to_string(),
            },
            http: HttpSettings {
                port: CONTAINER_PORT,
                cors_enabled: false,
                response_timeout: "1s".to_string(),
            },
            generation: GenerationSettings {
                use_examples: "if_present".to_string(),
                suppress_errors: false,
                null_probability: 0.5,
                default_min_int: 0,
                default_max_int: 10_000,
                default_min_float: -1e9,
                default_max_float: 1e9,
                default_max_items: 10,
                default_min_items: 1,
            },
        }
    }
}

/// Write the default settings file unless one already exists.
///
/// Returns `true` if a file was written.
pub fn ensure_settings_file(path: &Path) -> Result<bool> {
    if path.exists() {
        tracing::debug!("Mock server settings found at {}", path.display());
        return Ok(false);
    }

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let yaml = serde_yml::to_string(&MockServerSettings::default())
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    std::fs::write(path, yaml)?;

    tracing::info!("Wrote default mock server settings to {}", path.display());
    Ok(true)
}
