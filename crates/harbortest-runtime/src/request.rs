//! The frozen, submittable description of a container to start.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;

use crate::wait::WaitFor;

/// Where a Dockerfile build takes its context from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildContext {
    /// A directory on the host, archived at submission time.
    Directory(PathBuf),
    /// A ready-made tar archive of the context.
    Archive(Bytes),
}

/// Instructions for building the image from a Dockerfile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FromDockerfile {
    /// Build context; required before the request can be submitted.
    pub context: Option<BuildContext>,
    /// Dockerfile name relative to the context root. `None` means `Dockerfile`.
    pub dockerfile: Option<String>,
}

/// The image a container runs: pulled by reference or built locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// An image reference such as `redis:7`, pulled if not present.
    Image(String),
    /// A Dockerfile build.
    Build(FromDockerfile),
}

/// Everything the runtime needs to create, start and await a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRequest {
    /// Image to run. `None` is rejected at submission.
    pub source: Option<ImageSource>,
    /// Environment variables, one entry per name.
    pub env: BTreeMap<String, String>,
    /// Port specifiers to expose, in insertion order.
    pub exposed_ports: Vec<String>,
    /// Readiness condition evaluated after start.
    pub waiting_for: WaitFor,
    /// Deadline for `waiting_for`; `None` uses the runtime's configured default.
    pub startup_timeout: Option<Duration>,
}

impl Default for ContainerRequest {
    fn default() -> Self {
        Self {
            source: None,
            env: BTreeMap::new(),
            exposed_ports: Vec::new(),
            waiting_for: WaitFor::all(Vec::new()),
            startup_timeout: None,
        }
    }
}

impl ContainerRequest {
    /// Environment in the `KEY=value` form the Docker API takes.
    #[must_use]
    pub fn env_list(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }

    /// Short description of the image source for log output.
    #[must_use]
    pub fn describe_source(&self) -> String {
        match &self.source {
            Some(ImageSource::Image(name)) => name.clone(),
            Some(ImageSource::Build(spec)) => match &spec.context {
                Some(BuildContext::Directory(dir)) => format!("build:{}", dir.display()),
                Some(BuildContext::Archive(bytes)) => format!("build:<archive {} bytes>", bytes.len()),
                None => "build:<no context>".to_string(),
            },
            None => "<none>".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_list_is_sorted_by_key() {
        let mut req = ContainerRequest::default();
        let _ = req.env.insert("ZED".into(), "1".into());
        let _ = req.env.insert("ALPHA".into(), "a=b".into());
        assert_eq!(req.env_list(), vec!["ALPHA=a=b", "ZED=1"]);
    }

    #[test]
    fn default_request_waits_for_nothing() {
        let req = ContainerRequest::default();
        assert_eq!(req.waiting_for, WaitFor::All(Vec::new()));
        assert_eq!(req.describe_source(), "<none>");
    }

    #[test]
    fn describes_build_sources() {
        let req = ContainerRequest {
            source: Some(ImageSource::Build(FromDockerfile {
                context: Some(BuildContext::Archive(Bytes::from_static(b"abc"))),
                dockerfile: None,
            })),
            ..ContainerRequest::default()
        };
        assert_eq!(req.describe_source(), "build:<archive 3 bytes>");
    }
}
