//! In-memory [`ContainerRuntime`] for unit tests.
//!
//! Records every engine interaction by name and answers from canned state,
//! so container handles can be exercised without a Docker daemon.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::stream::{self, StreamExt};
use harbortest_common::config::HarborConfig;
use harbortest_common::error::{HarborError, Result};
use harbortest_common::types::{ContainerId, ExposedPort, PortBinding};

use crate::backend::{ContainerDetails, ContainerRuntime, CreatedContainer};
use crate::exec::ExecResult;
use crate::logs::{LogLine, LogStream};
use crate::request::{ContainerRequest, ImageSource};

/// Tag reported for images built from a Dockerfile request.
pub const RECORDED_BUILD_TAG: &str = "harbortest:recorded";

const RECORDED_ID: &str = "5f1c0ffee0ddba11ab5e1e55c0ffee0ddba11ab5e1e55c0ffee0ddba11ab5e1e5";

#[derive(Debug, Default)]
struct State {
    calls: Vec<&'static str>,
    failures: Vec<&'static str>,
    requests: Vec<ContainerRequest>,
    details: ContainerDetails,
    logs: Vec<LogLine>,
    exec_result: Option<ExecResult>,
    execs: Vec<Vec<String>>,
    uploads: Vec<(String, Bytes)>,
    stop_timeouts: Vec<Duration>,
    removed_images: Vec<String>,
    followers: Vec<UnboundedSender<Result<LogLine>>>,
}

/// Runtime double that records calls instead of talking to an engine.
#[derive(Debug)]
pub struct RecordingRuntime {
    config: HarborConfig,
    id: ContainerId,
    endless_follow: bool,
    state: Mutex<State>,
}

impl Default for RecordingRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingRuntime {
    /// Creates a runtime with default configuration and a short poll interval.
    #[must_use]
    pub fn new() -> Self {
        let config = HarborConfig {
            poll_interval_ms: 5,
            ..HarborConfig::default()
        };
        Self {
            config,
            id: ContainerId::new(RECORDED_ID),
            endless_follow: false,
            state: Mutex::new(State::default()),
        }
    }

    /// Reports `host` as the host published ports are reachable on.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.config.host_override = Some(host.into());
        self
    }

    /// Replaces the configuration wholesale.
    #[must_use]
    pub fn with_config(mut self, config: HarborConfig) -> Self {
        self.config = config;
        self
    }

    /// Keeps followed log streams open after the canned lines are sent, so
    /// [`RecordingRuntime::emit_log`] can feed them.
    #[must_use]
    pub const fn with_endless_follow(mut self) -> Self {
        self.endless_follow = true;
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: &'static str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(call);
        if let Some(pos) = state.failures.iter().position(|f| *f == call) {
            let _ = state.failures.remove(pos);
            return Err(HarborError::Config {
                message: format!("injected {call} failure"),
            });
        }
        Ok(())
    }

    /// Id every created container receives.
    #[must_use]
    pub fn container_id(&self) -> ContainerId {
        self.id.clone()
    }

    /// Names of the calls made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<&'static str> {
        self.state().calls.clone()
    }

    /// Number of times `call` was made.
    #[must_use]
    pub fn calls_to(&self, call: &str) -> usize {
        self.state().calls.iter().filter(|c| **c == call).count()
    }

    /// Makes the next `call` fail with a configuration error.
    pub fn fail_next(&self, call: &'static str) {
        self.state().failures.push(call);
    }

    /// Requests passed to `create`, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<ContainerRequest> {
        self.state().requests.clone()
    }

    /// Sets what `inspect` reports.
    pub fn set_details(&self, details: ContainerDetails) {
        self.state().details = details;
    }

    /// Publishes container `port` on `host_port` of `0.0.0.0`.
    ///
    /// # Panics
    ///
    /// Panics if `port` is not a valid port specifier.
    #[allow(clippy::expect_used)]
    pub fn map_port(&self, port: &str, host_port: u16) {
        let key: ExposedPort = port.parse().expect("valid port specifier");
        self.state().details.ports.entry(key).or_default().push(PortBinding {
            host_ip: "0.0.0.0".to_string(),
            host_port,
        });
    }

    /// Sets the output `logs` and `follow_logs` return.
    pub fn set_logs(&self, logs: Vec<LogLine>) {
        self.state().logs = logs;
    }

    /// Sends `line` to every open followed stream.
    pub fn emit_log(&self, line: LogLine) {
        let mut state = self.state();
        state.logs.push(line.clone());
        state
            .followers
            .retain(|tx| tx.unbounded_send(Ok(line.clone())).is_ok());
    }

    /// Sets the result of every `exec`. Defaults to a silent exit 0.
    pub fn set_exec_result(&self, result: ExecResult) {
        self.state().exec_result = Some(result);
    }

    /// Command of the most recent `exec`.
    #[must_use]
    pub fn last_exec(&self) -> Vec<String> {
        self.state().execs.last().cloned().unwrap_or_default()
    }

    /// Destination and archive of the most recent upload.
    #[must_use]
    pub fn last_upload(&self) -> Option<(String, Bytes)> {
        self.state().uploads.last().cloned()
    }

    /// Grace periods passed to `stop`, in order.
    #[must_use]
    pub fn stop_timeouts(&self) -> Vec<Duration> {
        self.state().stop_timeouts.clone()
    }

    /// Images passed to `remove_image`, in order.
    #[must_use]
    pub fn removed_images(&self) -> Vec<String> {
        self.state().removed_images.clone()
    }
}

#[async_trait]
impl ContainerRuntime for RecordingRuntime {
    fn config(&self) -> &HarborConfig {
        &self.config
    }

    async fn create(&self, request: &ContainerRequest) -> Result<CreatedContainer> {
        self.record("create")?;
        self.state().requests.push(request.clone());
        let built_image = matches!(request.source, Some(ImageSource::Build(_)))
            .then(|| RECORDED_BUILD_TAG.to_string());
        Ok(CreatedContainer {
            id: self.id.clone(),
            built_image,
        })
    }

    async fn start(&self, _id: &ContainerId) -> Result<()> {
        self.record("start")
    }

    async fn stop(&self, _id: &ContainerId, timeout: Duration) -> Result<()> {
        self.record("stop")?;
        self.state().stop_timeouts.push(timeout);
        Ok(())
    }

    async fn remove(&self, _id: &ContainerId) -> Result<()> {
        self.record("remove")
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        self.record("remove_image")?;
        self.state().removed_images.push(image.to_string());
        Ok(())
    }

    async fn inspect(&self, _id: &ContainerId) -> Result<ContainerDetails> {
        self.record("inspect")?;
        Ok(self.state().details.clone())
    }

    async fn logs(&self, _id: &ContainerId) -> Result<Vec<LogLine>> {
        self.record("logs")?;
        Ok(self.state().logs.clone())
    }

    fn follow_logs(&self, _id: &ContainerId) -> LogStream {
        if let Err(e) = self.record("follow_logs") {
            return stream::once(async move { Err::<LogLine, _>(e) }).boxed();
        }
        let lines = stream::iter(self.state().logs.clone().into_iter().map(Ok));
        if self.endless_follow {
            let (tx, rx) = mpsc::unbounded();
            self.state().followers.push(tx);
            lines.chain(rx).boxed()
        } else {
            lines.boxed()
        }
    }

    async fn exec(&self, _id: &ContainerId, cmd: &[String]) -> Result<ExecResult> {
        self.record("exec")?;
        let mut state = self.state();
        state.execs.push(cmd.to_vec());
        Ok(state.exec_result.clone().unwrap_or(ExecResult {
            exit_code: 0,
            output: Vec::new(),
        }))
    }

    async fn upload_archive(&self, _id: &ContainerId, dest_dir: &str, archive: Bytes) -> Result<()> {
        self.record("upload_archive")?;
        self.state().uploads.push((dest_dir.to_string(), archive));
        Ok(())
    }
}
