//! Readiness conditions evaluated after a container starts.

use std::fmt;
use std::time::Duration;

use harbortest_common::error::{HarborError, Result};
use harbortest_common::types::{PortSpec, Protocol};
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::container::{Container, RunningContainer};

/// A readiness condition. Conditions are polled until they pass or the
/// startup deadline expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitFor {
    /// The container port is published and accepts TCP connections from the
    /// host; for TCP ports a listener must also be visible inside the
    /// container.
    ListeningPort(String),
    /// The combined log output contains `message` at least `occurrences` times.
    Log {
        /// Text to look for.
        message: String,
        /// Required number of matches.
        occurrences: usize,
    },
    /// Every member must pass, in order.
    All(Vec<WaitFor>),
}

impl WaitFor {
    /// Waits for `port` (e.g. `6379/tcp`) to accept connections.
    pub fn listening_port(port: impl Into<String>) -> Self {
        Self::ListeningPort(port.into())
    }

    /// Waits for a log line containing `message`.
    pub fn log(message: impl Into<String>) -> Self {
        Self::Log {
            message: message.into(),
            occurrences: 1,
        }
    }

    /// Requires a log message to appear `occurrences` times. No effect on
    /// other conditions.
    #[must_use]
    pub fn with_occurrences(self, occurrences: usize) -> Self {
        match self {
            Self::Log { message, .. } => Self::Log {
                message,
                occurrences,
            },
            other => other,
        }
    }

    /// Combines conditions with AND semantics. Nested combinations are
    /// flattened so the result is a single level deep.
    pub fn all(strategies: impl IntoIterator<Item = Self>) -> Self {
        let mut flat = Vec::new();
        for strategy in strategies {
            match strategy {
                Self::All(inner) => flat.extend(inner),
                leaf => flat.push(leaf),
            }
        }
        Self::All(flat)
    }

    /// Leaf conditions in evaluation order.
    fn leaves(&self) -> Vec<&Self> {
        match self {
            Self::All(inner) => inner.iter().flat_map(Self::leaves).collect(),
            leaf => vec![leaf],
        }
    }

    /// Polls every condition until all have passed.
    ///
    /// # Errors
    ///
    /// Returns [`HarborError::WaitTimeout`] naming the first unmet condition
    /// once `timeout` elapses, or any runtime error raised while checking.
    pub async fn wait_until_ready(
        &self,
        container: &RunningContainer,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<()> {
        // No deadline when the timeout is too large to represent.
        let deadline = Instant::now().checked_add(timeout);
        for leaf in self.leaves() {
            tracing::debug!(id = %container.short_id(), condition = %leaf, "waiting");
            loop {
                let timed_out = || HarborError::WaitTimeout {
                    condition: leaf.to_string(),
                    timeout,
                };
                let passed = match deadline {
                    Some(deadline) => {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        tokio::time::timeout(remaining, leaf.check(container))
                            .await
                            .map_err(|_| timed_out())??
                    }
                    None => leaf.check(container).await?,
                };
                if passed {
                    break;
                }
                let out_of_time = deadline.is_some_and(|deadline| {
                    Instant::now()
                        .checked_add(poll_interval)
                        .is_none_or(|next| next > deadline)
                });
                if out_of_time {
                    return Err(timed_out());
                }
                tokio::time::sleep(poll_interval).await;
            }
            tracing::debug!(id = %container.short_id(), condition = %leaf, "condition met");
        }
        Ok(())
    }

    /// Evaluates a leaf condition once.
    async fn check(&self, container: &RunningContainer) -> Result<bool> {
        match self {
            Self::ListeningPort(spec) => port_is_listening(container, spec).await,
            Self::Log {
                message,
                occurrences,
            } => {
                let output = container.logs().await?;
                let text = String::from_utf8_lossy(&output);
                Ok(text.matches(message.as_str()).count() >= *occurrences)
            }
            Self::All(_) => Ok(true),
        }
    }
}

impl fmt::Display for WaitFor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ListeningPort(port) => write!(f, "port {port} listening"),
            Self::Log {
                message,
                occurrences: 1,
            } => write!(f, "log message {message:?}"),
            Self::Log {
                message,
                occurrences,
            } => write!(f, "log message {message:?} x{occurrences}"),
            Self::All(inner) if inner.is_empty() => f.write_str("nothing"),
            Self::All(inner) => {
                for (i, leaf) in inner.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" and ")?;
                    }
                    write!(f, "{leaf}")?;
                }
                Ok(())
            }
        }
    }
}

/// Exit codes `sh` reports when the check shell itself cannot run.
const SHELL_UNAVAILABLE: [i64; 2] = [126, 127];

async fn port_is_listening(container: &RunningContainer, spec: &str) -> Result<bool> {
    let port = spec.parse::<PortSpec>()?.port;
    let host_port = match container.mapped_port(spec).await {
        Ok(p) => p,
        Err(HarborError::PortNotMapped { .. }) => return Ok(false),
        Err(e) => return Err(e),
    };
    if port.protocol != Protocol::Tcp {
        return Ok(true);
    }

    let host = container.host()?;
    if TcpStream::connect((host.as_str(), host_port)).await.is_err() {
        return Ok(false);
    }

    // The host-side proxy accepts connections before the service listens,
    // so confirm from inside the container as well.
    let check = listener_check(port.number);
    let result = container.exec(&["/bin/sh", "-c", check.as_str()]).await?;
    if SHELL_UNAVAILABLE.contains(&result.exit_code) {
        tracing::debug!(id = %container.short_id(), port = %port, "no shell in container, trusting host check");
        return Ok(true);
    }
    Ok(result.success())
}

/// Shell snippet exiting 0 when something listens on `port` inside the
/// container.
fn listener_check(port: u16) -> String {
    format!(
        "cat /proc/net/tcp /proc/net/tcp6 2>/dev/null | {} \
         || (command -v nc >/dev/null 2>&1 && nc -z -w 1 localhost {port})",
        listen_table_filter(port)
    )
}

/// Pipeline stage reading `/proc/net/tcp` rows and exiting 0 when a socket
/// in the `LISTEN` state (`0A`) has `port` as its local port.
fn listen_table_filter(port: u16) -> String {
    format!("awk '$4 == \"0A\" {{ print $2 }}' | grep -qi ':{port:04X}$'")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::exec::ExecResult;
    use crate::logs::LogLine;
    use crate::request::ContainerRequest;
    use crate::testing::RecordingRuntime;

    async fn started(runtime: &Arc<RecordingRuntime>) -> RunningContainer {
        RunningContainer::start(runtime.clone(), &ContainerRequest::default())
            .await
            .unwrap()
    }

    #[test]
    fn all_flattens_nested_combinations() {
        let combined = WaitFor::all([
            WaitFor::listening_port("6379/tcp"),
            WaitFor::all([WaitFor::log("ready"), WaitFor::log("accepting")]),
        ]);
        assert_eq!(
            combined,
            WaitFor::All(vec![
                WaitFor::listening_port("6379/tcp"),
                WaitFor::log("ready"),
                WaitFor::log("accepting"),
            ])
        );
    }

    #[test]
    fn occurrences_only_apply_to_logs() {
        assert_eq!(
            WaitFor::log("ready").with_occurrences(2),
            WaitFor::Log {
                message: "ready".into(),
                occurrences: 2
            }
        );
        assert_eq!(
            WaitFor::listening_port("80").with_occurrences(2),
            WaitFor::listening_port("80")
        );
    }

    #[test]
    fn display_describes_conditions() {
        let combined = WaitFor::all([
            WaitFor::listening_port("5432/tcp"),
            WaitFor::log("ready").with_occurrences(2),
        ]);
        assert_eq!(
            combined.to_string(),
            "port 5432/tcp listening and log message \"ready\" x2"
        );
        assert_eq!(WaitFor::all([]).to_string(), "nothing");
    }

    #[test]
    fn listener_check_reads_proc_then_falls_back_to_nc() {
        let check = listener_check(6379);
        assert!(check.starts_with("cat /proc/net/tcp /proc/net/tcp6"));
        assert!(check.contains(&listen_table_filter(6379)));
        assert!(check.contains("':18EB$'"));
        assert!(check.ends_with("nc -z -w 1 localhost 6379)"));
    }

    #[test]
    fn listen_filter_only_matches_local_listening_sockets() {
        // 127.0.0.1:40000 connected to remote port 6379, 0.0.0.0:8080 listening,
        // 127.0.0.1:5432 in TIME_WAIT.
        let table = "  sl  local_address rem_address   st tx_queue rx_queue\n\
                     \x20  0: 0100007F:9C40 0100007F:18EB 01 00000000:00000000\n\
                     \x20  1: 00000000:1F90 00000000:0000 0A 00000000:00000000\n\
                     \x20  2: 0100007F:1538 0100007F:9C41 06 00000000:00000000\n";
        let listening = |port: u16| {
            std::process::Command::new("sh")
                .arg("-c")
                .arg(format!("printf '%s' \"$TABLE\" | {}", listen_table_filter(port)))
                .env("TABLE", table)
                .status()
                .map(|status| status.success())
        };
        let Ok(http) = listening(8080) else {
            return;
        };
        assert!(http);
        assert!(!listening(6379).unwrap());
        assert!(!listening(5432).unwrap());
    }

    #[tokio::test]
    async fn log_condition_counts_occurrences() {
        let runtime = Arc::new(RecordingRuntime::new());
        runtime.set_logs(vec![
            LogLine::stdout("database system is ready\n"),
            LogLine::stdout("restarting\n"),
            LogLine::stdout("database system is ready\n"),
        ]);
        let container = started(&runtime).await;

        let twice = WaitFor::log("is ready").with_occurrences(2);
        twice
            .wait_until_ready(&container, Duration::from_secs(1), Duration::from_millis(10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unrepresentable_timeout_waits_without_deadline() {
        let runtime = Arc::new(RecordingRuntime::new());
        runtime.set_logs(vec![LogLine::stdout("ready\n")]);
        let container = started(&runtime).await;

        WaitFor::log("ready")
            .wait_until_ready(&container, Duration::MAX, Duration::MAX)
            .await
            .unwrap();
        WaitFor::all([])
            .wait_until_ready(&container, Duration::MAX, Duration::from_millis(10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unmet_condition_times_out() {
        let runtime = Arc::new(RecordingRuntime::new());
        runtime.set_logs(vec![LogLine::stdout("booting\n")]);
        let container = started(&runtime).await;

        let err = WaitFor::log("ready")
            .wait_until_ready(&container, Duration::from_millis(50), Duration::from_millis(10))
            .await
            .unwrap_err();
        match err {
            HarborError::WaitTimeout { condition, timeout } => {
                assert_eq!(condition, "log message \"ready\"");
                assert_eq!(timeout, Duration::from_millis(50));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unpublished_port_is_not_ready() {
        let runtime = Arc::new(RecordingRuntime::new());
        let container = started(&runtime).await;

        let err = WaitFor::listening_port("6379/tcp")
            .wait_until_ready(&container, Duration::from_millis(30), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, HarborError::WaitTimeout { .. }));
    }

    #[tokio::test]
    async fn udp_port_only_needs_a_mapping() {
        let runtime = Arc::new(RecordingRuntime::new());
        runtime.map_port("53/udp", 32_853);
        let container = started(&runtime).await;

        WaitFor::listening_port("53/udp")
            .wait_until_ready(&container, Duration::from_secs(1), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(runtime.calls_to("exec"), 0);
    }

    #[tokio::test]
    async fn tcp_port_is_confirmed_inside_the_container() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host_port = listener.local_addr().unwrap().port();

        let runtime = Arc::new(RecordingRuntime::new().with_host("127.0.0.1"));
        runtime.map_port("6379/tcp", host_port);
        runtime.set_exec_result(ExecResult {
            exit_code: 0,
            output: Vec::new(),
        });
        let container = started(&runtime).await;

        WaitFor::listening_port("6379/tcp")
            .wait_until_ready(&container, Duration::from_secs(1), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(runtime.calls_to("exec"), 1);
    }
}
