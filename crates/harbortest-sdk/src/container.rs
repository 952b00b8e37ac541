//! A container proxy that exists before it is started.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use harbortest_common::error::{HarborError, Result};
use harbortest_common::types::{ContainerId, PortMap};
use harbortest_runtime::backend::ContainerRuntime;
use harbortest_runtime::container::{Container, RunningContainer};
use harbortest_runtime::exec::ExecResult;
use harbortest_runtime::logs::LogConsumer;
use harbortest_runtime::request::ContainerRequest;

/// A frozen request plus, once started, the container running it.
///
/// Every [`Container`] operation fails with [`HarborError::NotStarted`]
/// until [`TestContainer::start`] succeeds, and again after
/// [`Container::terminate`]. Errors from a started container are returned
/// unchanged.
#[derive(Debug)]
pub struct TestContainer {
    request: ContainerRequest,
    running: Option<RunningContainer>,
}

impl TestContainer {
    /// Wraps `request` without starting anything.
    #[must_use]
    pub const fn new(request: ContainerRequest) -> Self {
        Self {
            request,
            running: None,
        }
    }

    /// The request this container starts from.
    #[must_use]
    pub const fn request(&self) -> &ContainerRequest {
        &self.request
    }

    /// Whether a container is currently running behind this proxy.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.running.is_some()
    }

    /// Submits the request to `runtime` and waits for readiness.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if already started, otherwise the
    /// runtime's error unchanged. A failed start leaves the proxy unstarted.
    pub async fn start(&mut self, runtime: Arc<dyn ContainerRuntime>) -> Result<()> {
        if let Some(running) = &self.running {
            return Err(HarborError::Config {
                message: format!("container {} already started", running.short_id()),
            });
        }
        let running = RunningContainer::start(runtime, &self.request).await?;
        tracing::debug!(id = %running.short_id(), "test container started");
        self.running = Some(running);
        Ok(())
    }

    /// Gives up the proxy, returning the running container if there is one.
    #[must_use]
    pub fn into_running(self) -> Option<RunningContainer> {
        self.running
    }

    fn started(&self, operation: &'static str) -> Result<&RunningContainer> {
        self.running
            .as_ref()
            .ok_or(HarborError::NotStarted { operation })
    }

    fn started_mut(&mut self, operation: &'static str) -> Result<&mut RunningContainer> {
        self.running
            .as_mut()
            .ok_or(HarborError::NotStarted { operation })
    }
}

#[async_trait]
impl Container for TestContainer {
    fn id(&self) -> Result<&ContainerId> {
        self.started("id")?.id()
    }

    fn session_id(&self) -> Result<&str> {
        self.started("session_id")?.session_id()
    }

    fn host(&self) -> Result<String> {
        self.started("host")?.host()
    }

    async fn mapped_port(&self, port: &str) -> Result<u16> {
        self.started("mapped_port")?.mapped_port(port).await
    }

    async fn endpoint(&self, proto: &str) -> Result<String> {
        self.started("endpoint")?.endpoint(proto).await
    }

    async fn port_endpoint(&self, port: &str, proto: &str) -> Result<String> {
        self.started("port_endpoint")?.port_endpoint(port, proto).await
    }

    async fn ports(&self) -> Result<PortMap> {
        self.started("ports")?.ports().await
    }

    async fn name(&self) -> Result<String> {
        self.started("name")?.name().await
    }

    async fn networks(&self) -> Result<Vec<String>> {
        self.started("networks")?.networks().await
    }

    async fn network_aliases(&self) -> Result<BTreeMap<String, Vec<String>>> {
        self.started("network_aliases")?.network_aliases().await
    }

    async fn container_ip(&self) -> Result<String> {
        self.started("container_ip")?.container_ip().await
    }

    async fn logs(&self) -> Result<Vec<u8>> {
        self.started("logs")?.logs().await
    }

    fn follow_output(&mut self, consumer: Arc<dyn LogConsumer>) -> Result<()> {
        self.started_mut("follow_output")?.follow_output(consumer)
    }

    fn start_log_producer(&mut self) -> Result<()> {
        self.started_mut("start_log_producer")?.start_log_producer()
    }

    async fn stop_log_producer(&mut self) -> Result<()> {
        self.started_mut("stop_log_producer")?
            .stop_log_producer()
            .await
    }

    async fn exec(&self, cmd: &[&str]) -> Result<ExecResult> {
        self.started("exec")?.exec(cmd).await
    }

    async fn copy_file_to_container(
        &self,
        host_path: &Path,
        container_path: &str,
        mode: u32,
    ) -> Result<()> {
        self.started("copy_file_to_container")?
            .copy_file_to_container(host_path, container_path, mode)
            .await
    }

    async fn stop(&mut self) -> Result<()> {
        self.started_mut("stop")?.stop().await
    }

    async fn terminate(&mut self) -> Result<()> {
        self.started_mut("terminate")?.terminate().await?;
        if let Some(running) = self.running.take() {
            tracing::debug!(id = %running.short_id(), "test container released");
        }
        Ok(())
    }
}
