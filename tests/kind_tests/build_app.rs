//! The full buildpacks scenario
//!
//! Provisions everything from scratch, builds the sample app with the
//! buildpacks task and checks it answers HTTP 200. Honours `TASK_CONFIG` and
//! `SKIP_CLEANUP` like the binary does.

use kind_harness::config::HarnessConfig;
use kind_harness::observer::KubeConnector;
use kind_harness::provider::KindDockerProvisioner;
use kind_harness::scenario::{Scenario, Stage, TeardownOutcome};

use super::init_test_tracing;

/// Story: the buildpacks task turns a git repository into a serving image
#[tokio::test]
#[ignore]
async fn story_buildpacks_task_builds_a_serving_app() {
    init_test_tracing();

    let scenario = Scenario::new(
        HarnessConfig::from_env(),
        KindDockerProvisioner::new(),
        KubeConnector::new(),
    );
    let skip_cleanup = scenario.config().skip_cleanup;
    let report = scenario.run().await;
    assert!(report.passed(), "scenario failed: {:?}", report.outcome);

    if let TeardownOutcome::Completed { failures } = &report.teardown {
        assert!(
            failures.is_empty(),
            "teardown left resources behind: {:?}",
            failures
        );
    }
    let expected_end = if skip_cleanup {
        Stage::TeardownSkipped
    } else {
        Stage::TornDown
    };
    assert_eq!(report.history.last().copied(), Some(expected_end));
    assert!(report.history.contains(&Stage::Verified));
}
