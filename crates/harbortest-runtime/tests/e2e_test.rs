//! End-to-end tests for the harbortest runtime against a real Docker daemon.
//!
//! These require a running Docker daemon and are marked `#[ignore]`.
//! Run with: `cargo test -p harbortest-runtime -- --ignored`

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

use harbortest_common::error::HarborError;
use harbortest_runtime::backend::connect_from_env;
use harbortest_runtime::container::{Container, RunningContainer};
use harbortest_runtime::logs::LogCollector;
use harbortest_runtime::request::{BuildContext, ContainerRequest, FromDockerfile, ImageSource};
use harbortest_runtime::wait::WaitFor;

fn alpine(cmd_marker: &str) -> ContainerRequest {
    let dockerfile = format!(
        "FROM alpine:3.20\nCMD [\"sh\", \"-c\", \"echo {cmd_marker}; sleep 300\"]\n"
    );
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    std::fs::write(dir.path().join("Dockerfile"), dockerfile).unwrap();
    let archive = harbortest_runtime::archive::archive_directory(dir.path()).unwrap();

    ContainerRequest {
        source: Some(ImageSource::Build(FromDockerfile {
            context: Some(BuildContext::Archive(archive)),
            dockerfile: None,
        })),
        waiting_for: WaitFor::log(cmd_marker),
        startup_timeout: Some(Duration::from_secs(120)),
        ..ContainerRequest::default()
    }
}

// ── Lifecycle ────────────────────────────────────────────────────────

#[tokio::test]
#[ignore]
async fn pulled_image_publishes_ports() {
    let runtime = connect_from_env().await.unwrap();
    let request = ContainerRequest {
        source: Some(ImageSource::Image("redis:7".into())),
        env: BTreeMap::from([("HARBORTEST_MARKER".to_string(), "present".to_string())]),
        exposed_ports: vec!["6379/tcp".into()],
        waiting_for: WaitFor::all([
            WaitFor::listening_port("6379/tcp"),
            WaitFor::log("Ready to accept connections"),
        ]),
        startup_timeout: Some(Duration::from_secs(120)),
    };

    let mut redis = RunningContainer::start(runtime, &request).await.unwrap();
    let port = redis.mapped_port("6379/tcp").await.unwrap();
    assert!(port > 0);
    assert!(redis.ports().await.unwrap().len() == 1);
    assert!(redis.name().await.unwrap().starts_with('/'));
    assert!(redis.networks().await.unwrap().contains(&"bridge".to_string()));
    assert!(!redis.container_ip().await.unwrap().is_empty());

    let pong = redis.exec(&["redis-cli", "ping"]).await.unwrap();
    assert!(pong.success());
    assert_eq!(pong.stdout().trim(), "PONG");

    redis.terminate().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn dockerfile_build_runs_and_streams_logs() {
    let runtime = connect_from_env().await.unwrap();
    let mut container = RunningContainer::start(runtime, &alpine("harbortest-built"))
        .await
        .unwrap();

    let collector = LogCollector::new();
    container.follow_output(std::sync::Arc::new(collector.clone())).unwrap();
    container.start_log_producer().unwrap();
    for _ in 0..50 {
        if collector.text().contains("harbortest-built") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    container.stop_log_producer().await.unwrap();
    assert!(collector.text().contains("harbortest-built"));

    container.stop().await.unwrap();
    container.terminate().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn copied_file_is_readable_inside() {
    let runtime = connect_from_env().await.unwrap();
    let mut container = RunningContainer::start(runtime, &alpine("harbortest-copy"))
        .await
        .unwrap();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "copied contents").unwrap();
    container
        .copy_file_to_container(file.path(), "/tmp/harbortest.txt", 0o640)
        .await
        .unwrap();

    let cat = container.exec(&["cat", "/tmp/harbortest.txt"]).await.unwrap();
    assert_eq!(cat.stdout(), "copied contents");
    let stat = container
        .exec(&["stat", "-c", "%a", "/tmp/harbortest.txt"])
        .await
        .unwrap();
    assert_eq!(stat.stdout().trim(), "640");

    container.terminate().await.unwrap();
}

// ── Failures ─────────────────────────────────────────────────────────

#[tokio::test]
#[ignore]
async fn unmet_wait_times_out_and_cleans_up() {
    let runtime = connect_from_env().await.unwrap();
    let mut request = alpine("harbortest-timeout");
    request.waiting_for = WaitFor::log("this line never appears");
    request.startup_timeout = Some(Duration::from_secs(3));

    let err = RunningContainer::start(runtime, &request).await.unwrap_err();
    assert!(matches!(err, HarborError::WaitTimeout { .. }), "got {err:?}");
}

#[tokio::test]
#[ignore]
async fn missing_image_is_a_docker_error() {
    let runtime = connect_from_env().await.unwrap();
    let request = ContainerRequest {
        source: Some(ImageSource::Image(
            "harbortest/does-not-exist:never".into(),
        )),
        ..ContainerRequest::default()
    };
    let err = RunningContainer::start(runtime, &request).await.unwrap_err();
    assert!(matches!(err, HarborError::Docker(_)), "got {err:?}");
}
