//! Integration tests for container lifecycle operations.
//!
//! These tests are implemented in:
//! - `crates/harbortest-runtime/tests/e2e_test.rs`
//! - `crates/harbortest-sdk/tests/redis_test.rs`
//!
//! All of them need a Docker daemon and are `#[ignore]`d by default.
//! Run with: `cargo test --workspace -- --ignored`
//!
//! Covered scenarios:
//! - `pulled_image_publishes_ports`: pull, publish, inspect, exec, terminate
//! - `dockerfile_build_runs_and_streams_logs`: archive context build plus log producer
//! - `copied_file_is_readable_inside`: tar upload keeps contents and mode
//! - `unmet_wait_times_out_and_cleans_up`: wait deadline and best-effort removal
//! - `missing_image_is_a_docker_error`: engine errors pass through unchanged
//! - `redis_proxy_lifecycle`: `NotStarted` before start and after terminate
//! - `redis_typed_start`: builder start with env and combined waits
