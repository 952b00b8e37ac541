//! Docker Engine backend built on `bollard`.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{BuildImageOptions, CreateImageOptions, RemoveImageOptions};
use bollard::models::{ContainerInspectResponse, HostConfig, PortBinding as DockerPortBinding};
use bollard::{API_DEFAULT_VERSION, Docker};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use harbortest_common::config::{DaemonEndpoint, HarborConfig};
use harbortest_common::constants;
use harbortest_common::error::{HarborError, Result};
use harbortest_common::types::{ContainerId, ExposedPort, PortBinding, PortMap, PortSpec};

use super::{ContainerDetails, ContainerRuntime, CreatedContainer, NetworkEndpoint};
use crate::archive;
use crate::exec::ExecResult;
use crate::logs::{LogLine, LogStream};
use crate::request::{BuildContext, ContainerRequest, FromDockerfile, ImageSource};

/// Seconds the HTTP client waits for a daemon response.
const CLIENT_TIMEOUT_SECS: u64 = 120;

/// `exposed_ports` and `port_bindings` entries of a create request.
type PortSettings = (
    HashMap<String, HashMap<(), ()>>,
    HashMap<String, Option<Vec<DockerPortBinding>>>,
);

/// [`ContainerRuntime`] talking to a Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
    config: HarborConfig,
}

impl DockerRuntime {
    /// Connects to the daemon and verifies it answers a ping.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is malformed or unsupported, or the
    /// daemon does not respond.
    pub async fn connect(config: HarborConfig) -> Result<Self> {
        let docker = match config.daemon_endpoint()? {
            DaemonEndpoint::Http(host) => {
                Docker::connect_with_http(&host, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)?
            }
            #[cfg(unix)]
            DaemonEndpoint::Unix(host) => {
                Docker::connect_with_unix(&host, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)?
            }
            #[cfg(not(unix))]
            DaemonEndpoint::Unix(host) => {
                return Err(HarborError::Config {
                    message: format!("unix sockets are not available on this platform: {host}"),
                });
            }
            DaemonEndpoint::LocalDefaults => Docker::connect_with_local_defaults()?,
        };
        let _ = docker.ping().await?;
        tracing::debug!(docker_host = ?config.docker_host, "connected to docker daemon");
        Ok(Self::with_client(docker, config))
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(docker: Docker, config: HarborConfig) -> Self {
        Self { docker, config }
    }

    /// Pulls `image` unless it is already present locally.
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            tracing::debug!(image, "image present locally");
            return Ok(());
        }

        let (from_image, tag) = split_image_reference(image);
        tracing::info!(image, "pulling image");
        let options = CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(info) = stream.next().await {
            let info = info?;
            if let Some(status) = info.status {
                tracing::debug!(image, status = %status, "pull progress");
            }
        }
        Ok(())
    }

    /// Builds an image from a Dockerfile context and returns its tag.
    async fn build_image(&self, spec: &FromDockerfile) -> Result<String> {
        let archive = match &spec.context {
            Some(BuildContext::Archive(bytes)) => bytes.clone(),
            Some(BuildContext::Directory(dir)) => {
                let dir = dir.clone();
                tokio::task::spawn_blocking(move || archive::archive_directory(&dir))
                    .await
                    .map_err(|e| HarborError::ImageBuild {
                        message: format!("archiving build context panicked: {e}"),
                    })??
            }
            None => {
                return Err(HarborError::Config {
                    message: "Dockerfile build requested without a build context".into(),
                });
            }
        };

        let tag = format!(
            "{}:{}",
            constants::BUILD_IMAGE_REPOSITORY,
            uuid::Uuid::new_v4().simple()
        );
        let dockerfile = spec
            .dockerfile
            .clone()
            .unwrap_or_else(|| constants::DEFAULT_DOCKERFILE.to_string());
        tracing::info!(tag = %tag, dockerfile = %dockerfile, context_bytes = archive.len(), "building image");

        let options = BuildImageOptions {
            dockerfile,
            t: tag.clone(),
            rm: true,
            ..Default::default()
        };
        let mut stream = self.docker.build_image(options, None, Some(archive.into()));
        while let Some(info) = stream.next().await {
            let info = info?;
            if let Some(message) = info.error {
                return Err(HarborError::ImageBuild { message });
            }
            if let Some(line) = info.stream.as_deref().map(str::trim_end).filter(|l| !l.is_empty()) {
                tracing::debug!(tag = %tag, "{line}");
            }
        }
        Ok(tag)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn config(&self) -> &HarborConfig {
        &self.config
    }

    async fn create(&self, request: &ContainerRequest) -> Result<CreatedContainer> {
        let (exposed_ports, port_bindings) = port_settings(&request.exposed_ports)?;
        let (image, built_image) = match &request.source {
            Some(ImageSource::Image(name)) => {
                self.ensure_image(name).await?;
                (name.clone(), None)
            }
            Some(ImageSource::Build(spec)) => {
                let tag = self.build_image(spec).await?;
                (tag.clone(), Some(tag))
            }
            None => {
                return Err(HarborError::Config {
                    message: "container request has neither an image nor a build context".into(),
                });
            }
        };

        let mut labels = HashMap::new();
        let _ = labels.insert(constants::LABEL_MANAGED.to_string(), "true".to_string());
        let _ = labels.insert(
            constants::LABEL_SESSION_ID.to_string(),
            constants::session_id().to_string(),
        );

        let config = Config {
            image: Some(image.clone()),
            env: Some(request.env_list()),
            exposed_ports: Some(exposed_ports),
            labels: Some(labels),
            host_config: Some(HostConfig {
                publish_all_ports: Some(true),
                port_bindings: Some(port_bindings).filter(|b| !b.is_empty()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let response = match self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                if let Some(tag) = &built_image {
                    if let Err(cleanup) = self.remove_image(tag).await {
                        tracing::warn!(tag = %tag, error = %cleanup, "failed to remove built image");
                    }
                }
                return Err(e.into());
            }
        };
        for warning in &response.warnings {
            tracing::warn!(image = %image, warning = %warning, "docker warning on create");
        }
        let id = ContainerId::new(response.id);
        tracing::info!(id = %id.short(), image = %image, "container created");
        Ok(CreatedContainer { id, built_image })
    }

    async fn start(&self, id: &ContainerId) -> Result<()> {
        self.docker
            .start_container(id.as_str(), None::<StartContainerOptions<String>>)
            .await?;
        tracing::info!(id = %id.short(), "container started");
        Ok(())
    }

    async fn stop(&self, id: &ContainerId, timeout: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX),
        };
        self.docker.stop_container(id.as_str(), Some(options)).await?;
        tracing::info!(id = %id.short(), "container stopped");
        Ok(())
    }

    async fn remove(&self, id: &ContainerId) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker.remove_container(id.as_str(), Some(options)).await?;
        tracing::info!(id = %id.short(), "container removed");
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        let options = RemoveImageOptions {
            force: true,
            ..Default::default()
        };
        let _ = self.docker.remove_image(image, Some(options), None).await?;
        tracing::info!(image, "image removed");
        Ok(())
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails> {
        let response = self
            .docker
            .inspect_container(id.as_str(), None::<InspectContainerOptions>)
            .await?;
        Ok(details_from_inspect(response))
    }

    async fn logs(&self, id: &ContainerId) -> Result<Vec<LogLine>> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let frames: Vec<LogOutput> = self
            .docker
            .logs(id.as_str(), Some(options))
            .try_collect()
            .await?;
        Ok(frames.into_iter().map(log_line).collect())
    }

    fn follow_logs(&self, id: &ContainerId) -> LogStream {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        Box::pin(
            self.docker
                .logs(id.as_str(), Some(options))
                .map(|frame| frame.map(log_line).map_err(HarborError::from)),
        )
    }

    async fn exec(&self, id: &ContainerId, cmd: &[String]) -> Result<ExecResult> {
        tracing::debug!(id = %id.short(), ?cmd, "exec");
        let options = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let exec = self.docker.create_exec(id.as_str(), options).await?;

        let mut output = Vec::new();
        if let StartExecResults::Attached {
            output: mut stream, ..
        } = self.docker.start_exec(&exec.id, None).await?
        {
            while let Some(frame) = stream.next().await {
                output.push(log_line(frame?));
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        let exit_code = inspect.exit_code.unwrap_or_default();
        tracing::debug!(id = %id.short(), exit_code, "exec finished");
        Ok(ExecResult { exit_code, output })
    }

    async fn upload_archive(&self, id: &ContainerId, dest_dir: &str, archive: Bytes) -> Result<()> {
        let options = UploadToContainerOptions {
            path: dest_dir.to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(id.as_str(), Some(options), archive.into())
            .await?;
        tracing::debug!(id = %id.short(), dest_dir, "archive uploaded");
        Ok(())
    }
}

fn log_line(frame: LogOutput) -> LogLine {
    match frame {
        LogOutput::StdErr { message } => LogLine::stderr(message),
        LogOutput::StdOut { message }
        | LogOutput::Console { message }
        | LogOutput::StdIn { message } => LogLine::stdout(message),
    }
}

/// Parses port specs into exposed ports and explicit host bindings.
///
/// Specs without a host part get no binding and are published on a random
/// host port.
fn port_settings(specs: &[String]) -> Result<PortSettings> {
    let mut exposed = HashMap::new();
    let mut bindings: HashMap<String, Option<Vec<DockerPortBinding>>> = HashMap::new();
    for raw in specs {
        let spec: PortSpec = raw.parse()?;
        let key = spec.port.to_string();
        let _ = exposed.insert(key.clone(), HashMap::new());
        if spec.is_bound() {
            bindings
                .entry(key)
                .or_default()
                .get_or_insert_with(Vec::new)
                .push(DockerPortBinding {
                    host_ip: spec.host_ip,
                    host_port: Some(spec.host_port.map(|p| p.to_string()).unwrap_or_default()),
                });
        }
    }
    Ok((exposed, bindings))
}

/// Splits `repo[:tag]` for a pull; digests and untagged names are kept
/// whole, with `latest` filled in for the latter.
fn split_image_reference(image: &str) -> (String, String) {
    if image.contains('@') {
        return (image.to_string(), String::new());
    }
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            (image[..split].to_string(), image[split + 1..].to_string())
        }
        None => (image.to_string(), "latest".to_string()),
    }
}

fn details_from_inspect(response: ContainerInspectResponse) -> ContainerDetails {
    let mut details = ContainerDetails {
        name: response.name.unwrap_or_default(),
        ..ContainerDetails::default()
    };
    let Some(settings) = response.network_settings else {
        return details;
    };

    details.ip_address = settings.ip_address.filter(|ip| !ip.is_empty());

    let mut ports = PortMap::new();
    for (key, bindings) in settings.ports.unwrap_or_default() {
        let Ok(port) = key.parse::<ExposedPort>() else {
            continue;
        };
        let bindings = bindings
            .unwrap_or_default()
            .into_iter()
            .filter_map(|b| {
                let host_port = b.host_port?.parse().ok()?;
                Some(PortBinding {
                    host_ip: b.host_ip.unwrap_or_default(),
                    host_port,
                })
            })
            .collect();
        let _ = ports.insert(port, bindings);
    }
    details.ports = ports;

    let mut networks = BTreeMap::new();
    for (name, endpoint) in settings.networks.unwrap_or_default() {
        let _ = networks.insert(
            name,
            NetworkEndpoint {
                ip_address: endpoint.ip_address.filter(|ip| !ip.is_empty()),
                aliases: endpoint.aliases.unwrap_or_default(),
            },
        );
    }
    details.networks = networks;
    details
}
