use async_trait::async_trait;
use bollard::{
    errors::Error as DockerError,
    models::{
        ContainerCreateBody, HostConfig, RestartPolicy as DockerRestartPolicy,
        RestartPolicyNameEnum,
    },
    query_parameters::{
        CreateContainerOptions, CreateImageOptions, InspectContainerOptions, LogsOptions,
        RemoveContainerOptions, RestartContainerOptions, StartContainerOptions,
        StatsOptionsBuilder, StopContainerOptions,
    },
    Docker,
};
use futures::{StreamExt, TryStreamExt};

use crate::runtime::{
    helpers::{build_ports, format_env, stats_snapshot},
    ContainerDetails, ContainerRuntime, ContainerRuntimeError, ContainerSpec,
    ContainerStatsSnapshot, EngineInfo, RestartPolicy,
};

/// Docker engine reached through the local socket
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self, ContainerRuntimeError> {
        let docker =
            Docker::connect_with_defaults().map_err(|err| ContainerRuntimeError::Connection {
                context: "connect",
                source: err.into(),
            })?;
        Ok(Self { docker })
    }

    /// Connect and confirm the engine answers
    pub async fn connect_and_ping() -> Result<Self, ContainerRuntimeError> {
        let runtime = Self::connect()?;
        runtime
            .docker
            .ping()
            .await
            .map_err(|err| ContainerRuntimeError::Connection {
                context: "ping",
                source: err.into(),
            })?;
        Ok(runtime)
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn pull_image(&self, image: &str) -> Result<(), ContainerRuntimeError> {
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: Some(image.to_string()),
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(progress) = stream.next().await {
            progress.map_err(|err| {
                map_connection_or(err, "pull_image", |source| {
                    ContainerRuntimeError::PullImage {
                        image: image.to_string(),
                        source: source.into(),
                    }
                })
            })?;
        }

        Ok(())
    }

    async fn create_container(&self, spec: ContainerSpec) -> Result<String, ContainerRuntimeError> {
        let container_name = spec.name.clone().unwrap_or_default();
        let env = format_env(&spec.env);
        let (port_bindings, exposed_ports) = build_ports(&spec.ports);

        let restart_policy = match spec.restart_policy {
            RestartPolicy::No => None,
            RestartPolicy::UnlessStopped => Some(DockerRestartPolicy {
                name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                maximum_retry_count: None,
            }),
        };

        let host_config = HostConfig {
            port_bindings,
            memory: spec.memory_bytes,
            nano_cpus: spec.nano_cpus,
            restart_policy,
            ..Default::default()
        };

        let container_config = ContainerCreateBody {
            image: Some(spec.image.clone()),
            env,
            exposed_ports,
            host_config: Some(host_config),
            cmd: spec.command.clone(),
            ..Default::default()
        };

        let create_opts = CreateContainerOptions {
            name: spec.name.clone(),
            platform: String::new(),
        };

        let created = self
            .docker
            .create_container(Some(create_opts), container_config)
            .await
            .map_err(|err| {
                map_connection_or(err, "create_container", |source| {
                    ContainerRuntimeError::CreateContainer {
                        name: container_name.clone(),
                        source: source.into(),
                    }
                })
            })?;

        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), ContainerRuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(|err| {
                map_docker_error(err, id, "start_container", |id, source| {
                    ContainerRuntimeError::StartContainer {
                        id,
                        source: source.into(),
                    }
                })
            })
    }

    async fn stop_container(
        &self,
        id: &str,
        timeout_secs: i32,
    ) -> Result<(), ContainerRuntimeError> {
        match self
            .docker
            .stop_container(
                id,
                Some(StopContainerOptions {
                    signal: None,
                    t: Some(timeout_secs),
                }),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_not_modified(&err) => Ok(()),
            Err(err) => Err(map_docker_error(err, id, "stop_container", |id, source| {
                ContainerRuntimeError::StopContainer {
                    id,
                    source: source.into(),
                }
            })),
        }
    }

    async fn restart_container(
        &self,
        id: &str,
        timeout_secs: i32,
    ) -> Result<(), ContainerRuntimeError> {
        self.docker
            .restart_container(
                id,
                Some(RestartContainerOptions {
                    signal: None,
                    t: Some(timeout_secs),
                }),
            )
            .await
            .map_err(|err| {
                map_docker_error(err, id, "restart_container", |id, source| {
                    ContainerRuntimeError::RestartContainer {
                        id,
                        source: source.into(),
                    }
                })
            })
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), ContainerRuntimeError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    v: false,
                    force,
                    link: false,
                }),
            )
            .await
            .map_err(|err| {
                map_docker_error(err, id, "remove_container", |id, source| {
                    ContainerRuntimeError::RemoveContainer {
                        id,
                        source: source.into(),
                    }
                })
            })
    }

    async fn container_logs(&self, id: &str, tail: usize) -> Result<String, ContainerRuntimeError> {
        let mut stream = self.docker.logs(
            id,
            Some(LogsOptions {
                stdout: true,
                stderr: true,
                tail: tail.to_string(),
                ..Default::default()
            }),
        );

        let mut output = String::new();
        while let Some(chunk) = stream.try_next().await.map_err(|err| {
            map_docker_error(err, id, "container_logs", |id, source| {
                ContainerRuntimeError::Logs {
                    id,
                    source: source.into(),
                }
            })
        })? {
            output.push_str(&chunk.to_string());
        }

        Ok(output)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, ContainerRuntimeError> {
        let details = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|err| {
                map_docker_error(err, id, "inspect_container", |id, source| {
                    ContainerRuntimeError::InspectContainer {
                        id,
                        source: source.into(),
                    }
                })
            })?;

        let state = details.state.unwrap_or_default();
        Ok(ContainerDetails {
            id: details.id.unwrap_or_else(|| id.to_string()),
            running: state.running.unwrap_or(false),
            exit_code: state.exit_code.unwrap_or_default(),
            status: state
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".into()),
        })
    }

    async fn container_stats(
        &self,
        id: &str,
    ) -> Result<ContainerStatsSnapshot, ContainerRuntimeError> {
        let mut stream = self
            .docker
            .stats(
                id,
                Some(
                    StatsOptionsBuilder::default()
                        .stream(false)
                        .one_shot(false)
                        .build(),
                ),
            )
            .take(1);

        let stats = stream
            .try_next()
            .await
            .map_err(|err| {
                map_docker_error(err, id, "container_stats", |id, source| {
                    ContainerRuntimeError::Stats {
                        id,
                        source: source.into(),
                    }
                })
            })?
            .ok_or_else(|| ContainerRuntimeError::NotFound { id: id.to_string() })?;

        Ok(stats_snapshot(&stats))
    }

    async fn engine_info(&self) -> Result<EngineInfo, ContainerRuntimeError> {
        let info = self.docker.info().await.map_err(|err| {
            map_connection_or(err, "info", |source| {
                ContainerRuntimeError::Info(source.into())
            })
        })?;

        Ok(EngineInfo {
            mem_total_bytes: info.mem_total.unwrap_or_default().max(0) as u64,
            containers_running: info.containers_running.unwrap_or_default().max(0) as u64,
            containers_stopped: info.containers_stopped.unwrap_or_default().max(0) as u64,
        })
    }
}

fn map_connection_or<F>(err: DockerError, context: &'static str, wrap: F) -> ContainerRuntimeError
where
    F: FnOnce(DockerError) -> ContainerRuntimeError,
{
    if is_connection_error(&err) {
        ContainerRuntimeError::Connection {
            context,
            source: err.into(),
        }
    } else {
        wrap(err)
    }
}

fn map_docker_error<F>(
    err: DockerError,
    id: &str,
    context: &'static str,
    wrap: F,
) -> ContainerRuntimeError
where
    F: FnOnce(String, DockerError) -> ContainerRuntimeError,
{
    if is_not_found(&err) {
        ContainerRuntimeError::NotFound { id: id.to_string() }
    } else if is_connection_error(&err) {
        ContainerRuntimeError::Connection {
            context,
            source: err.into(),
        }
    } else {
        wrap(id.to_string(), err)
    }
}

fn is_not_found(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn is_not_modified(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

fn is_connection_error(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::IOError { .. }
            | DockerError::HyperResponseError { .. }
            | DockerError::RequestTimeoutError
            | DockerError::SocketNotFoundError(_)
    )
}
