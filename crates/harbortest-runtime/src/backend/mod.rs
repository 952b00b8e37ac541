//! Container runtime abstraction.
//!
//! [`ContainerRuntime`] is the seam between container handles and the
//! engine that actually runs containers. [`docker::DockerRuntime`] is the
//! production implementation.

pub mod docker;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use harbortest_common::config::HarborConfig;
use harbortest_common::error::Result;
use harbortest_common::types::{ContainerId, PortMap};

use crate::exec::ExecResult;
use crate::logs::{LogLine, LogStream};
use crate::request::ContainerRequest;

/// A container's attachment to one network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkEndpoint {
    /// Address assigned on this network, if any.
    pub ip_address: Option<String>,
    /// DNS aliases of the container on this network.
    pub aliases: Vec<String>,
}

/// Snapshot of a container's state as reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDetails {
    /// Container name as Docker reports it (with its leading `/`).
    pub name: String,
    /// Address on the default bridge network, if any.
    pub ip_address: Option<String>,
    /// Published ports.
    pub ports: PortMap,
    /// Attached networks keyed by network name.
    pub networks: BTreeMap<String, NetworkEndpoint>,
}

/// A freshly created container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedContainer {
    /// Engine-assigned id.
    pub id: ContainerId,
    /// Tag of the image built for this container, if it was built from a
    /// Dockerfile. The image is owned by the container and removed with it.
    pub built_image: Option<String>,
}

/// Engine capable of running containers.
///
/// Implementors handle image acquisition, container creation, teardown
/// and introspection. Every method maps to one engine interaction.
#[async_trait]
pub trait ContainerRuntime: fmt::Debug + Send + Sync {
    /// Configuration this runtime was connected with.
    fn config(&self) -> &HarborConfig;

    /// Host name under which published ports are reachable.
    fn host(&self) -> String {
        self.config().resolved_host()
    }

    /// Pulls or builds the request's image and creates a container from it.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be obtained or the container
    /// cannot be created. An image built for a failed create is removed
    /// before returning.
    async fn create(&self, request: &ContainerRequest) -> Result<CreatedContainer>;

    /// Starts a created container.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine refuses to start the container.
    async fn start(&self, id: &ContainerId) -> Result<()>;

    /// Stops a running container, killing it after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be stopped.
    async fn stop(&self, id: &ContainerId, timeout: Duration) -> Result<()>;

    /// Force-removes a container and its anonymous volumes.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be removed.
    async fn remove(&self, id: &ContainerId) -> Result<()>;

    /// Force-removes an image the runtime built.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be removed.
    async fn remove_image(&self, image: &str) -> Result<()>;

    /// Inspects a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container does not exist.
    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails>;

    /// Returns all output the container has produced so far.
    ///
    /// # Errors
    ///
    /// Returns an error if logs cannot be retrieved.
    async fn logs(&self, id: &ContainerId) -> Result<Vec<LogLine>>;

    /// Follows the container's output until it exits.
    fn follow_logs(&self, id: &ContainerId) -> LogStream;

    /// Runs a command inside a running container and waits for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the exec instance cannot be created or started.
    async fn exec(&self, id: &ContainerId, cmd: &[String]) -> Result<ExecResult>;

    /// Extracts a tar archive into `dest_dir` inside the container.
    ///
    /// # Errors
    ///
    /// Returns an error if the upload is rejected.
    async fn upload_archive(&self, id: &ContainerId, dest_dir: &str, archive: Bytes) -> Result<()>;
}

/// Connects to the Docker daemon described by `config`.
///
/// # Errors
///
/// Returns an error if the daemon endpoint is invalid or unreachable.
pub async fn connect(config: HarborConfig) -> Result<Arc<dyn ContainerRuntime>> {
    let runtime = docker::DockerRuntime::connect(config).await?;
    Ok(Arc::new(runtime))
}

/// Connects using [`HarborConfig::from_env`].
///
/// # Errors
///
/// Returns an error if the environment holds invalid overrides or the
/// daemon is unreachable.
pub async fn connect_from_env() -> Result<Arc<dyn ContainerRuntime>> {
    connect(HarborConfig::from_env()?).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingRuntime;

    #[test]
    fn host_defaults_to_config_resolution() {
        let runtime = RecordingRuntime::new();
        assert_eq!(runtime.host(), "localhost");
    }

    #[test]
    fn details_default_is_empty() {
        let details = ContainerDetails::default();
        assert!(details.ports.is_empty());
        assert!(details.networks.is_empty());
        assert!(details.ip_address.is_none());
    }
}
