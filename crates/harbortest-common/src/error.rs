//! Unified error type for the harbortest workspace.
//!
//! Two families of failure exist: a proxy call made before a container was
//! started ([`HarborError::NotStarted`]), and everything the container
//! runtime reports, which is passed through unchanged.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum HarborError {
    /// A container operation was attempted before the container was started.
    #[error("cannot {operation}() unstarted container")]
    NotStarted {
        /// Name of the attempted operation.
        operation: &'static str,
    },

    /// The Docker Engine rejected or failed a request.
    #[error(transparent)]
    Docker(#[from] bollard::errors::Error),

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// The daemon reported a failure while building an image.
    #[error("image build failed: {message}")]
    ImageBuild {
        /// Error reported by the build.
        message: String,
    },

    /// A port specifier could not be parsed.
    #[error("invalid port specifier: {spec:?}")]
    InvalidPort {
        /// The rejected specifier.
        spec: String,
    },

    /// The container does not publish the requested port on the host.
    #[error("port {port} is not mapped to the host")]
    PortNotMapped {
        /// Container port that was looked up.
        port: String,
    },

    /// A wait strategy did not pass before its deadline.
    #[error("container not ready after {timeout:?}: {condition}")]
    WaitTimeout {
        /// Human-readable description of the unmet condition.
        condition: String,
        /// Deadline that was exceeded.
        timeout: Duration,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl HarborError {
    /// Returns `true` if this is the not-started guard error.
    #[must_use]
    pub const fn is_not_started(&self) -> bool {
        matches!(self, Self::NotStarted { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, HarborError>;
