//! Started containers and the operation surface they share.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use harbortest_common::constants;
use harbortest_common::error::{HarborError, Result};
use harbortest_common::types::{ContainerId, PortMap, PortSpec};

use crate::archive;
use crate::backend::{ContainerDetails, ContainerRuntime};
use crate::exec::ExecResult;
use crate::logs::{LogConsumer, LogConsumers, LogProducer, combined_output};
use crate::request::ContainerRequest;

/// Lifecycle and introspection operations on a container.
///
/// Implemented by [`RunningContainer`] and by wrappers that forward to one,
/// so test helpers can accept any `impl Container`.
#[async_trait]
pub trait Container: Send + Sync {
    /// Engine-assigned container id.
    ///
    /// # Errors
    ///
    /// Returns an error if no container is running behind this handle.
    fn id(&self) -> Result<&ContainerId>;

    /// Session id the container was labelled with.
    ///
    /// # Errors
    ///
    /// Returns an error if no container is running behind this handle.
    fn session_id(&self) -> Result<&str>;

    /// Host under which published ports are reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if no container is running behind this handle.
    fn host(&self) -> Result<String>;

    /// Host port `port` (e.g. `6379/tcp`) is published on.
    ///
    /// # Errors
    ///
    /// Returns [`HarborError::PortNotMapped`] if the port is not published.
    async fn mapped_port(&self, port: &str) -> Result<u16>;

    /// `host:port` for the first exposed port, prefixed with `proto://`
    /// unless `proto` is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the container exposes no ports.
    async fn endpoint(&self, proto: &str) -> Result<String>;

    /// Like [`Container::endpoint`] for a specific port.
    ///
    /// # Errors
    ///
    /// Returns an error if the port is not published.
    async fn port_endpoint(&self, port: &str, proto: &str) -> Result<String>;

    /// All published ports.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be inspected.
    async fn ports(&self) -> Result<PortMap>;

    /// Container name as reported by the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be inspected.
    async fn name(&self) -> Result<String>;

    /// Names of the networks the container is attached to, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be inspected.
    async fn networks(&self) -> Result<Vec<String>>;

    /// DNS aliases per attached network.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be inspected.
    async fn network_aliases(&self) -> Result<BTreeMap<String, Vec<String>>>;

    /// IP address of the container; empty if it has none.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be inspected.
    async fn container_ip(&self) -> Result<String>;

    /// Everything the container has written to stdout and stderr so far.
    ///
    /// # Errors
    ///
    /// Returns an error if logs cannot be retrieved.
    async fn logs(&self) -> Result<Vec<u8>>;

    /// Registers a consumer fed by the log producer.
    ///
    /// # Errors
    ///
    /// Returns an error if no container is running behind this handle.
    fn follow_output(&mut self, consumer: Arc<dyn LogConsumer>) -> Result<()>;

    /// Starts forwarding output to the registered consumers.
    ///
    /// # Errors
    ///
    /// Returns an error if a producer is already running or no tokio
    /// runtime is available.
    fn start_log_producer(&mut self) -> Result<()>;

    /// Stops forwarding output. A no-op when no producer is running.
    ///
    /// # Errors
    ///
    /// Returns an error if no container is running behind this handle.
    async fn stop_log_producer(&mut self) -> Result<()>;

    /// Runs a command inside the container.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be executed.
    async fn exec(&self, cmd: &[&str]) -> Result<ExecResult>;

    /// Copies a host file to `container_path` with permission bits `mode`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or uploaded.
    async fn copy_file_to_container(
        &self,
        host_path: &Path,
        container_path: &str,
        mode: u32,
    ) -> Result<()>;

    /// Stops the container, keeping it around for inspection.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails to stop the container.
    async fn stop(&mut self) -> Result<()>;

    /// Stops log forwarding and removes the container with its volumes,
    /// and the image if it was built for this container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be removed.
    async fn terminate(&mut self) -> Result<()>;
}

/// A container that was created, started and passed its wait strategy.
///
/// Only [`RunningContainer::start`] produces one, so holding a value means
/// the container was ready at some point.
pub struct RunningContainer {
    id: ContainerId,
    runtime: Arc<dyn ContainerRuntime>,
    exposed_ports: Vec<String>,
    built_image: Option<String>,
    consumers: LogConsumers,
    producer: Option<LogProducer>,
}

impl fmt::Debug for RunningContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningContainer")
            .field("id", &self.id)
            .field("exposed_ports", &self.exposed_ports)
            .field("built_image", &self.built_image)
            .field("consumers", &self.consumers.len())
            .field("producing", &self.producer.is_some())
            .finish_non_exhaustive()
    }
}

impl RunningContainer {
    /// Submits `request` to `runtime`, starts the container and waits for
    /// its readiness condition.
    ///
    /// A container that fails to start or become ready is removed, together
    /// with an image built for it, before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the runtime's error if the image cannot be obtained, the
    /// container cannot be created or started, or the wait fails.
    pub async fn start(
        runtime: Arc<dyn ContainerRuntime>,
        request: &ContainerRequest,
    ) -> Result<Self> {
        tracing::info!(image = %request.describe_source(), "starting container");
        let created = runtime.create(request).await?;
        let mut container = Self {
            id: created.id,
            runtime,
            exposed_ports: request.exposed_ports.clone(),
            built_image: created.built_image,
            consumers: LogConsumers::new(),
            producer: None,
        };

        if let Err(e) = container.become_ready(request).await {
            if let Err(cleanup) = container.runtime.remove(&container.id).await {
                tracing::warn!(id = %container.short_id(), error = %cleanup, "failed to remove unready container");
            }
            container.remove_built_image().await;
            return Err(e);
        }
        tracing::info!(id = %container.short_id(), "container ready");
        Ok(container)
    }

    async fn become_ready(&self, request: &ContainerRequest) -> Result<()> {
        self.runtime.start(&self.id).await?;
        let config = self.runtime.config();
        let timeout = request
            .startup_timeout
            .unwrap_or_else(|| config.startup_timeout());
        request
            .waiting_for
            .wait_until_ready(self, timeout, config.poll_interval())
            .await
    }

    /// Short form of the container id, for log output.
    #[must_use]
    pub fn short_id(&self) -> &str {
        self.id.short()
    }

    /// Runtime the container runs on.
    #[must_use]
    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Tag of the image built for this container, if any.
    #[must_use]
    pub fn built_image(&self) -> Option<&str> {
        self.built_image.as_deref()
    }

    async fn remove_built_image(&mut self) {
        if let Some(image) = self.built_image.take() {
            if let Err(e) = self.runtime.remove_image(&image).await {
                tracing::warn!(id = %self.short_id(), image = %image, error = %e, "failed to remove built image");
            }
        }
    }

    async fn details(&self) -> Result<ContainerDetails> {
        self.runtime.inspect(&self.id).await
    }
}

#[async_trait]
impl Container for RunningContainer {
    fn id(&self) -> Result<&ContainerId> {
        Ok(&self.id)
    }

    fn session_id(&self) -> Result<&str> {
        Ok(constants::session_id())
    }

    fn host(&self) -> Result<String> {
        Ok(self.runtime.host())
    }

    async fn mapped_port(&self, port: &str) -> Result<u16> {
        let key = port.parse::<PortSpec>()?.port;
        let details = self.details().await?;
        let bindings = details.ports.get(&key).map(Vec::as_slice).unwrap_or_default();
        bindings
            .iter()
            .find(|b| !b.host_ip.contains(':'))
            .or_else(|| bindings.first())
            .map(|b| b.host_port)
            .ok_or_else(|| HarborError::PortNotMapped {
                port: key.to_string(),
            })
    }

    async fn endpoint(&self, proto: &str) -> Result<String> {
        let first = self.exposed_ports.first().ok_or_else(|| HarborError::Config {
            message: format!("container {} exposes no ports", self.short_id()),
        })?;
        self.port_endpoint(first, proto).await
    }

    async fn port_endpoint(&self, port: &str, proto: &str) -> Result<String> {
        let host_port = self.mapped_port(port).await?;
        let host = self.runtime.host();
        if proto.is_empty() {
            Ok(format!("{host}:{host_port}"))
        } else {
            Ok(format!("{proto}://{host}:{host_port}"))
        }
    }

    async fn ports(&self) -> Result<PortMap> {
        Ok(self.details().await?.ports)
    }

    async fn name(&self) -> Result<String> {
        Ok(self.details().await?.name)
    }

    async fn networks(&self) -> Result<Vec<String>> {
        Ok(self.details().await?.networks.into_keys().collect())
    }

    async fn network_aliases(&self) -> Result<BTreeMap<String, Vec<String>>> {
        Ok(self
            .details()
            .await?
            .networks
            .into_iter()
            .map(|(name, endpoint)| (name, endpoint.aliases))
            .collect())
    }

    async fn container_ip(&self) -> Result<String> {
        let details = self.details().await?;
        let ip = details
            .ip_address
            .or_else(|| {
                details
                    .networks
                    .into_values()
                    .find_map(|endpoint| endpoint.ip_address)
            })
            .unwrap_or_default();
        Ok(ip)
    }

    async fn logs(&self) -> Result<Vec<u8>> {
        let lines = self.runtime.logs(&self.id).await?;
        Ok(combined_output(&lines))
    }

    fn follow_output(&mut self, consumer: Arc<dyn LogConsumer>) -> Result<()> {
        self.consumers.push(consumer);
        Ok(())
    }

    fn start_log_producer(&mut self) -> Result<()> {
        if self.producer.as_ref().is_some_and(|p| !p.is_finished()) {
            return Err(HarborError::Config {
                message: format!("log producer already running for {}", self.short_id()),
            });
        }
        let stream = self.runtime.follow_logs(&self.id);
        self.producer = Some(LogProducer::spawn(&self.id, stream, self.consumers.clone())?);
        Ok(())
    }

    async fn stop_log_producer(&mut self) -> Result<()> {
        if let Some(producer) = self.producer.take() {
            producer.stop().await;
        }
        Ok(())
    }

    async fn exec(&self, cmd: &[&str]) -> Result<ExecResult> {
        let cmd: Vec<String> = cmd.iter().map(ToString::to_string).collect();
        self.runtime.exec(&self.id, &cmd).await
    }

    async fn copy_file_to_container(
        &self,
        host_path: &Path,
        container_path: &str,
        mode: u32,
    ) -> Result<()> {
        let (dir, name) = archive::split_container_path(container_path)?;
        let tar = archive::archive_file(host_path, &name, mode)?;
        self.runtime.upload_archive(&self.id, &dir, tar).await
    }

    async fn stop(&mut self) -> Result<()> {
        let timeout = self.runtime.config().stop_timeout();
        self.runtime.stop(&self.id, timeout).await
    }

    async fn terminate(&mut self) -> Result<()> {
        self.stop_log_producer().await?;
        self.runtime.remove(&self.id).await?;
        self.remove_built_image().await;
        tracing::info!(id = %self.short_id(), "container terminated");
        Ok(())
    }
}
