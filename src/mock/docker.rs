//! Docker implementation of [`ContainerRuntime`] using bollard.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, RestartContainerOptions,
    StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::mock::config::ContainerSpec;
use crate::mock::error::{MockError, Result};
use crate::mock::runtime::{ContainerRuntime, ExitStatus};

/// Seconds to wait on a Docker socket before giving up.
const SOCKET_TIMEOUT_SECS: u64 = 120;

/// Connect to the Docker daemon.
///
/// Tries bollard's local defaults (which honour `DOCKER_HOST`) first, then the
/// Docker Desktop socket under the home directory and the rootless socket
/// under `$XDG_RUNTIME_DIR`.
pub async fn connect_docker() -> Result<Docker> {
    let mut last_error = match Docker::connect_with_local_defaults() {
        Ok(docker) => match docker.ping().await {
            Ok(_) => return Ok(docker),
            Err(e) => e.to_string(),
        },
        Err(e) => e.to_string(),
    };

    for socket in fallback_sockets() {
        if !socket.exists() {
            continue;
        }
        let Some(path) = socket.to_str() else {
            continue;
        };
        match Docker::connect_with_socket(path, SOCKET_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
        {
            Ok(docker) => match docker.ping().await {
                Ok(_) => {
                    tracing::debug!("Connected to Docker via {}", path);
                    return Ok(docker);
                }
                Err(e) => last_error = e.to_string(),
            },
            Err(e) => last_error = e.to_string(),
        }
    }

    Err(MockError::DockerNotAvailable { reason: last_error })
}

fn fallback_sockets() -> Vec<PathBuf> {
    let mut sockets = Vec::new();
    if let Some(home) = dirs::home_dir() {
        sockets.push(home.join(".docker").join("run").join("docker.sock"));
    }
    if let Some(runtime_dir) = std::env::var_os("XDG_RUNTIME_DIR") {
        sockets.push(PathBuf::from(runtime_dir).join("docker.sock"));
    }
    sockets
}

/// Container runtime backed by a Docker daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Wrap an existing Docker connection.
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect to the local Docker daemon.
    pub async fn connect() -> Result<Self> {
        Ok(Self::new(connect_docker().await?))
    }
}

/// 304 (already stopped) and 404 (already removed) both mean there is
/// nothing left to stop.
fn is_gone(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError {
            status_code: 304 | 404,
            ..
        }
    )
}

fn grace_secs(grace: Duration) -> i64 {
    i64::try_from(grace.as_secs()).unwrap_or(i64::MAX)
}

/// Docker create options for one mock server container.
///
/// The port is bound to loopback only and the container is removed by the
/// daemon once it stops.
fn container_config(spec: &ContainerSpec) -> Config<String> {
    let port_key = format!("{}/tcp", spec.container_port);

    let mut port_bindings = HashMap::new();
    port_bindings.insert(
        port_key.clone(),
        Some(vec![PortBinding {
            host_ip: Some("127.0.0.1".to_string()),
            host_port: Some(spec.host_port.to_string()),
        }]),
    );

    let exposed_ports: HashMap<String, HashMap<(), ()>> =
        HashMap::from([(port_key, HashMap::new())]);

    let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

    let binds: Vec<String> = spec
        .binds
        .iter()
        .map(|(host, container)| format!("{host}:{container}"))
        .collect();

    let host_config = HostConfig {
        port_bindings: Some(port_bindings),
        binds: Some(binds),
        // A stopped mock server is never reused; every restart recreates.
        auto_remove: Some(true),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        env: Some(env),
        cmd: Some(spec.cmd.clone()),
        exposed_ports: Some(exposed_ports),
        tty: Some(true),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        host_config: Some(host_config),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            tracing::debug!("Image '{}' exists locally", image);
            return Ok(());
        }

        tracing::info!("Pulling image: {}", image);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        tracing::trace!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(MockError::ImagePullFailed {
                        image: image.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!("Pulled image: {}", image);
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let config = container_config(spec);

        let response = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(|e| MockError::ContainerCreateFailed {
                image: spec.image.clone(),
                reason: e.to_string(),
            })?;

        for warning in &response.warnings {
            tracing::warn!(container_id = %response.id, "Docker: {}", warning);
        }

        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| MockError::ContainerStartFailed {
                id: id.to_string(),
                reason: e.to_string(),
            })
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: grace_secs(grace),
        };

        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_gone(&e) => Err(MockError::NotRunning { id: id.to_string() }),
            Err(e) => Err(MockError::ContainerStopFailed {
                id: id.to_string(),
                grace,
                reason: e.to_string(),
            }),
        }
    }

    async fn restart(&self, id: &str, grace: Duration) -> Result<()> {
        let options = RestartContainerOptions {
            t: isize::try_from(grace.as_secs()).unwrap_or(isize::MAX),
        };

        self.docker
            .restart_container(id, Some(options))
            .await
            .map_err(|e| MockError::ContainerRestartFailed {
                id: id.to_string(),
                reason: e.to_string(),
            })
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_gone(&e) => Ok(()),
            Err(e) => Err(MockError::ContainerStopFailed {
                id: id.to_string(),
                grace: Duration::ZERO,
                reason: e.to_string(),
            }),
        }
    }

    async fn wait_for_exit(&self, id: &str) -> Result<ExitStatus> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(id, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(ExitStatus {
                code: response.status_code,
                error: response.error.and_then(|e| e.message),
            }),
            // bollard reports non-zero exits as an error carrying the code.
            Some(Err(BollardError::DockerContainerWaitError { error, code })) => Ok(ExitStatus {
                code,
                error: (!error.is_empty()).then_some(error),
            }),
            Some(Err(e)) => Err(MockError::ContainerWaitFailed {
                id: id.to_string(),
                reason: e.to_string(),
            }),
            None => Err(MockError::ContainerWaitFailed {
                id: id.to_string(),
                reason: "wait stream ended without a status".to_string(),
            }),
        }
    }

    fn logs(&self, id: &str) -> BoxStream<'static, Result<Vec<u8>>> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            timestamps: false,
            tail: "all".to_string(),
            ..Default::default()
        };

        let container_id = id.to_string();
        self.docker
            .logs(id, Some(options))
            .map(move |chunk| {
                chunk
                    .map(|output| output.into_bytes().to_vec())
                    .map_err(|e| MockError::LogStreamFailed {
                        id: container_id.clone(),
                        reason: e.to_string(),
                    })
            })
            .boxed()
    }
}
