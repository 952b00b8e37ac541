//! Workspace-wide constants and the per-process session id.

use std::sync::OnceLock;

/// Label set on every container created by harbortest.
pub const LABEL_MANAGED: &str = "org.harbortest";

/// Label carrying the session id of the process that created the container.
pub const LABEL_SESSION_ID: &str = "org.harbortest.session-id";

/// Repository prefix for images built from a Dockerfile context.
pub const BUILD_IMAGE_REPOSITORY: &str = "harbortest";

/// Dockerfile name used when a build spec does not set one.
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";

/// Host used for published ports when neither an override nor a TCP
/// `DOCKER_HOST` is configured.
pub const DEFAULT_HOST: &str = "localhost";

/// Default deadline for the aggregated wait strategy, in seconds.
pub const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 60;

/// Default interval between wait-strategy polls, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Default grace period given to `docker stop`, in seconds.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

/// Environment variable naming the Docker daemon endpoint.
pub const ENV_DOCKER_HOST: &str = "DOCKER_HOST";

/// Environment variable overriding the host used to reach published ports.
pub const ENV_HOST_OVERRIDE: &str = "HARBORTEST_HOST_OVERRIDE";

/// Environment variable overriding the startup timeout, in seconds.
pub const ENV_STARTUP_TIMEOUT: &str = "HARBORTEST_STARTUP_TIMEOUT_SECS";

static SESSION_ID: OnceLock<String> = OnceLock::new();

/// Returns the session id for this process.
///
/// Generated once on first use; every container created afterwards is
/// labelled with it so a test run's leftovers can be found.
pub fn session_id() -> &'static str {
    SESSION_ID.get_or_init(|| uuid::Uuid::new_v4().to_string())
}
