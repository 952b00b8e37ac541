//! # harbortest-sdk
//!
//! Public SDK for starting throwaway Docker containers from tests.
//!
//! Provides two entry points:
//! - [`ContainerBuilder`](builder::ContainerBuilder): fluent configuration of
//!   image, environment, ports and readiness conditions.
//! - [`TestContainer`](container::TestContainer): a proxy that may or may not
//!   be started yet, rejecting every operation until it is.
//!
//! # Example
//!
//! ```rust,no_run
//! use harbortest_sdk::prelude::*;
//!
//! # async fn run() -> harbortest_common::error::Result<()> {
//! let runtime = connect_from_env().await?;
//! let mut redis = ContainerBuilder::new()
//!     .image("redis:7")
//!     .exposed_port("6379/tcp")
//!     .wait_for_port("6379/tcp")
//!     .start(runtime)
//!     .await?;
//!
//! let port = redis.mapped_port("6379/tcp").await?;
//! assert!(port > 0);
//! redis.terminate().await?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod builder;
pub mod container;

/// Types needed by most callers.
pub mod prelude {
    pub use harbortest_runtime::backend::{ContainerRuntime, connect, connect_from_env};
    pub use harbortest_runtime::container::{Container, RunningContainer};
    pub use harbortest_runtime::logs::{LogCollector, LogConsumer, LogLine};
    pub use harbortest_runtime::wait::WaitFor;

    pub use crate::builder::ContainerBuilder;
    pub use crate::container::TestContainer;
}
