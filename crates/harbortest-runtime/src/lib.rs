//! Container runtime client for harbortest.
//!
//! Talks to the Docker Engine through [`backend::ContainerRuntime`], turns a
//! [`request::ContainerRequest`] into a started and ready
//! [`container::RunningContainer`], and exposes that container's lifecycle
//! and introspection surface through the [`container::Container`] trait.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod archive;
pub mod backend;
pub mod container;
pub mod exec;
pub mod logs;
pub mod request;
pub mod wait;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;
