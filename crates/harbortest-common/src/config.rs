//! Configuration model shared by the runtime client and the SDK.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{HarborError, Result};

/// How to reach the Docker daemon, derived from [`HarborConfig::docker_host`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonEndpoint {
    /// Platform defaults (`DOCKER_HOST` unset or a scheme-less value).
    LocalDefaults,
    /// A `unix://` socket path.
    Unix(String),
    /// A plain-HTTP `tcp://` or `http://` endpoint.
    Http(String),
}

/// Root configuration for talking to the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarborConfig {
    /// Docker daemon endpoint (`unix:///var/run/docker.sock`, `tcp://host:2375`).
    /// `None` uses the platform's local defaults.
    pub docker_host: Option<String>,
    /// Host name used to reach published ports, overriding detection.
    pub host_override: Option<String>,
    /// Deadline for a container's wait strategy, in seconds.
    pub startup_timeout_secs: u64,
    /// Interval between wait-strategy polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Grace period for `docker stop`, in seconds.
    pub stop_timeout_secs: u64,
}

impl Default for HarborConfig {
    fn default() -> Self {
        Self {
            docker_host: None,
            host_override: None,
            startup_timeout_secs: constants::DEFAULT_STARTUP_TIMEOUT_SECS,
            poll_interval_ms: constants::DEFAULT_POLL_INTERVAL_MS,
            stop_timeout_secs: constants::DEFAULT_STOP_TIMEOUT_SECS,
        }
    }
}

impl HarborConfig {
    /// Builds a configuration from defaults overlaid with the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment override holds an invalid value.
    pub fn from_env() -> Result<Self> {
        Self::default().overlay_env(|key| std::env::var(key).ok())
    }

    /// Reads a JSON configuration file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| HarborError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Applies environment overrides using the given lookup function.
    ///
    /// # Errors
    ///
    /// Returns an error if the startup timeout override is not an integer
    /// or the daemon endpoint uses an unsupported scheme.
    pub fn overlay_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(constants::ENV_DOCKER_HOST).filter(|v| !v.is_empty()) {
            self.docker_host = Some(host);
        }
        if let Some(host) = lookup(constants::ENV_HOST_OVERRIDE).filter(|v| !v.is_empty()) {
            self.host_override = Some(host);
        }
        if let Some(raw) = lookup(constants::ENV_STARTUP_TIMEOUT) {
            self.startup_timeout_secs =
                raw.trim().parse().map_err(|_| HarborError::Config {
                    message: format!("{} must be a number of seconds, got {raw:?}", constants::ENV_STARTUP_TIMEOUT),
                })?;
        }
        let _ = self.daemon_endpoint()?;
        Ok(self)
    }

    /// Host name under which published container ports are reachable.
    ///
    /// The explicit override wins, then the host part of a `tcp://` or
    /// `http://` daemon endpoint, then `localhost`.
    #[must_use]
    pub fn resolved_host(&self) -> String {
        if let Some(host) = &self.host_override {
            return host.clone();
        }
        let remote = match self.daemon_endpoint() {
            Ok(DaemonEndpoint::Http(endpoint)) => remote_daemon_host(&endpoint),
            _ => None,
        };
        remote.unwrap_or_else(|| constants::DEFAULT_HOST.to_string())
    }

    /// Classifies [`HarborConfig::docker_host`].
    ///
    /// # Errors
    ///
    /// Returns an error for `https://` and `ssh://` endpoints, which need
    /// TLS or SSH transports that are not supported.
    pub fn daemon_endpoint(&self) -> Result<DaemonEndpoint> {
        let Some(host) = self.docker_host.as_deref() else {
            return Ok(DaemonEndpoint::LocalDefaults);
        };
        if host.starts_with("tcp://") || host.starts_with("http://") {
            Ok(DaemonEndpoint::Http(host.to_string()))
        } else if host.starts_with("unix://") {
            Ok(DaemonEndpoint::Unix(host.to_string()))
        } else if host.starts_with("https://") || host.starts_with("ssh://") {
            Err(HarborError::Config {
                message: format!("unsupported docker host {host:?}: only unix://, tcp:// and http:// are supported"),
            })
        } else {
            Ok(DaemonEndpoint::LocalDefaults)
        }
    }

    /// Deadline for a container's wait strategy.
    #[must_use]
    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    /// Interval between wait-strategy polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Grace period for `docker stop`.
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// Extracts the host from a network daemon endpoint; `None` for sockets.
fn remote_daemon_host(endpoint: &str) -> Option<String> {
    let rest = ["tcp://", "http://"]
        .iter()
        .find_map(|scheme| endpoint.strip_prefix(scheme))?;
    let authority = rest.split('/').next().unwrap_or(rest);
    let host = if let Some(bracketed) = authority.strip_prefix('[') {
        bracketed.split(']').next().unwrap_or(bracketed)
    } else {
        authority.rsplit_once(':').map_or(authority, |(host, _)| host)
    };
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_point_at_localhost() {
        let cfg = HarborConfig::default();
        assert_eq!(cfg.resolved_host(), "localhost");
        assert_eq!(cfg.startup_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn tcp_docker_host_supplies_the_port_host() {
        let cfg = HarborConfig::default()
            .overlay_env(lookup(&[("DOCKER_HOST", "tcp://10.0.0.5:2375")]))
            .unwrap();
        assert_eq!(cfg.docker_host.as_deref(), Some("tcp://10.0.0.5:2375"));
        assert_eq!(cfg.resolved_host(), "10.0.0.5");
    }

    #[test]
    fn unix_socket_resolves_to_localhost() {
        let cfg = HarborConfig::default()
            .overlay_env(lookup(&[("DOCKER_HOST", "unix:///var/run/docker.sock")]))
            .unwrap();
        assert_eq!(cfg.resolved_host(), "localhost");
    }

    #[test]
    fn host_override_wins() {
        let cfg = HarborConfig::default()
            .overlay_env(lookup(&[
                ("DOCKER_HOST", "tcp://10.0.0.5:2375"),
                ("HARBORTEST_HOST_OVERRIDE", "docker.internal"),
            ]))
            .unwrap();
        assert_eq!(cfg.resolved_host(), "docker.internal");
    }

    #[test]
    fn ipv6_daemon_host_is_unbracketed() {
        assert_eq!(remote_daemon_host("tcp://[::1]:2375").as_deref(), Some("::1"));
    }

    #[test]
    fn daemon_endpoints_are_classified() {
        let endpoint = |host: Option<&str>| {
            HarborConfig {
                docker_host: host.map(str::to_string),
                ..HarborConfig::default()
            }
            .daemon_endpoint()
            .unwrap()
        };
        assert_eq!(endpoint(None), DaemonEndpoint::LocalDefaults);
        assert_eq!(
            endpoint(Some("tcp://10.0.0.5:2375")),
            DaemonEndpoint::Http("tcp://10.0.0.5:2375".into())
        );
        assert_eq!(
            endpoint(Some("unix:///var/run/docker.sock")),
            DaemonEndpoint::Unix("unix:///var/run/docker.sock".into())
        );
    }

    #[test]
    fn tls_docker_host_is_rejected_consistently() {
        let err = HarborConfig::default()
            .overlay_env(lookup(&[("DOCKER_HOST", "https://10.0.0.5:2376")]))
            .unwrap_err();
        assert!(matches!(err, HarborError::Config { ref message } if message.contains("https://")));

        let cfg = HarborConfig {
            docker_host: Some("https://10.0.0.5:2376".into()),
            ..HarborConfig::default()
        };
        assert!(cfg.daemon_endpoint().is_err());
        assert_eq!(cfg.resolved_host(), "localhost");
    }

    #[test]
    fn invalid_startup_timeout_is_rejected() {
        let err = HarborConfig::default()
            .overlay_env(lookup(&[("HARBORTEST_STARTUP_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, HarborError::Config { .. }));
    }

    #[test]
    fn load_fills_missing_fields_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"startup_timeout_secs": 5}}"#).unwrap();
        let cfg = HarborConfig::load(file.path()).unwrap();
        assert_eq!(cfg.startup_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.stop_timeout_secs, 10);
        assert!(cfg.docker_host.is_none());
    }

    #[test]
    fn load_missing_file_reports_path() {
        let err = HarborConfig::load(Path::new("/nonexistent/harbortest.json")).unwrap_err();
        assert!(matches!(err, HarborError::Io { .. }));
    }
}
