//! Integration tests for kind-harness
//!
//! # Test Organization
//!
//! - `backends`: the docker/kind provisioner and the kube cluster control on
//!   their own (~1min)
//! - `build_app`: the full buildpacks scenario, from registry to HTTP 200
//!   (~5-10min)
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind backends -- --ignored --nocapture
//! SKIP_CLEANUP=true cargo test --test kind build_app -- --ignored --nocapture
//! ```

mod backends;
mod build_app;

/// Install a subscriber for test output; later calls are no-ops
pub fn init_test_tracing() {
    let _ = kind_harness::telemetry::init_tracing(false);
}
