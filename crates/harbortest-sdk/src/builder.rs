//! Fluent API for configuring and starting test containers.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use harbortest_common::error::Result;
use harbortest_runtime::backend::ContainerRuntime;
use harbortest_runtime::container::RunningContainer;
use harbortest_runtime::request::{BuildContext, ContainerRequest, FromDockerfile, ImageSource};
use harbortest_runtime::wait::WaitFor;

use crate::container::TestContainer;

/// Builder for configuring a container before launch.
///
/// Setters take and return the builder by value and never fail; nothing is
/// validated until the request reaches a runtime. Clone the builder to
/// branch a configuration.
#[derive(Debug, Clone, Default)]
pub struct ContainerBuilder {
    source: Option<ImageSource>,
    env: BTreeMap<String, String>,
    exposed_ports: Vec<String>,
    waits: Vec<WaitFor>,
    startup_timeout: Option<Duration>,
}

impl ContainerBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs a pulled image such as `redis:7`. Replaces any Dockerfile build.
    #[must_use]
    pub fn image(mut self, name: impl Into<String>) -> Self {
        self.source = Some(ImageSource::Image(name.into()));
        self
    }

    /// Sets the Dockerfile name, relative to the build context.
    #[must_use]
    pub fn dockerfile(self, name: impl Into<String>) -> Self {
        self.with_build_spec(|spec| spec.dockerfile = Some(name.into()))
    }

    /// Builds from a context directory on the host.
    #[must_use]
    pub fn context(self, dir: impl Into<PathBuf>) -> Self {
        self.with_build_spec(|spec| spec.context = Some(BuildContext::Directory(dir.into())))
    }

    /// Builds from an in-memory tar archive of the context.
    #[must_use]
    pub fn context_archive(self, archive: impl Into<Bytes>) -> Self {
        self.with_build_spec(|spec| spec.context = Some(BuildContext::Archive(archive.into())))
    }

    /// Edits the build spec, replacing a pulled image if one was set.
    fn with_build_spec(mut self, edit: impl FnOnce(&mut FromDockerfile)) -> Self {
        let mut spec = match self.source.take() {
            Some(ImageSource::Build(spec)) => spec,
            _ => FromDockerfile::default(),
        };
        edit(&mut spec);
        self.source = Some(ImageSource::Build(spec));
        self
    }

    /// Sets one environment variable, overriding an earlier value.
    #[must_use]
    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.env.insert(key.into(), value.into());
        self
    }

    /// Merges environment variables into those already set. Later keys win.
    #[must_use]
    pub fn env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Exposes a container port such as `6379/tcp`.
    #[must_use]
    pub fn exposed_port(mut self, spec: impl Into<String>) -> Self {
        self.exposed_ports.push(spec.into());
        self
    }

    /// Appends several ports to expose.
    #[must_use]
    pub fn exposed_ports<I, S>(mut self, specs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exposed_ports.extend(specs.into_iter().map(Into::into));
        self
    }

    /// Waits for `spec` to accept connections after start.
    #[must_use]
    pub fn wait_for_port(self, spec: impl Into<String>) -> Self {
        self.wait_for(WaitFor::listening_port(spec))
    }

    /// Waits for `message` to appear in the container's output after start.
    #[must_use]
    pub fn wait_for_log(self, message: impl Into<String>) -> Self {
        self.wait_for(WaitFor::log(message))
    }

    /// Adds a readiness condition. All conditions must pass.
    #[must_use]
    pub fn wait_for(mut self, strategy: WaitFor) -> Self {
        self.waits.push(strategy);
        self
    }

    /// Deadline for all readiness conditions together.
    #[must_use]
    pub const fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = Some(timeout);
        self
    }

    /// Snapshots the current configuration as a submittable request.
    ///
    /// The request does not track later changes to the builder.
    #[must_use]
    pub fn build_request(&self) -> ContainerRequest {
        ContainerRequest {
            source: self.source.clone(),
            env: self.env.clone(),
            exposed_ports: self.exposed_ports.clone(),
            waiting_for: WaitFor::all(self.waits.clone()),
            startup_timeout: self.startup_timeout,
        }
    }

    /// Freezes the configuration into an unstarted [`TestContainer`].
    #[must_use]
    pub fn build(self) -> TestContainer {
        TestContainer::new(self.build_request())
    }

    /// Starts the container on `runtime` and waits until it is ready.
    ///
    /// # Errors
    ///
    /// Returns the runtime's error unchanged if the container cannot be
    /// started or does not become ready.
    pub async fn start(self, runtime: Arc<dyn ContainerRuntime>) -> Result<RunningContainer> {
        RunningContainer::start(runtime, &self.build_request()).await
    }
}
