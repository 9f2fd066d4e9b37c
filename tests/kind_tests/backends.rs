//! Integration tests for the concrete backends
//!
//! These tests tell the story of the pieces the scenario is built on: a
//! registry container that can be started and removed repeatedly, and a kind
//! cluster whose pods can be observed through kube-rs.

use std::time::Duration;

use kind_harness::net::free_port;
use kind_harness::observer::{ControlConnector, KubeConnector, Phase, PodPhaseCheck};
use kind_harness::poll::{wait_for, PollPolicy};
use kind_harness::provider::{
    KindDockerProvisioner, PortBinding, Provisioner, REGISTRY_CONTAINER_PORT, REGISTRY_IMAGE,
};

use super::init_test_tracing;

const REGISTRY_CONTAINER: &str = "kind-harness-backend-registry";
const CLUSTER: &str = "kind-harness-backend-test";

/// Story: a registry is started on a free port, and removing it twice is fine
#[tokio::test]
#[ignore]
async fn story_registry_container_lifecycle() {
    init_test_tracing();
    let provisioner = KindDockerProvisioner::new();
    provisioner.remove_container(REGISTRY_CONTAINER).await.unwrap();

    let port = free_port().unwrap();
    let output = provisioner
        .start_container(
            REGISTRY_CONTAINER,
            REGISTRY_IMAGE,
            &[PortBinding::new(port, REGISTRY_CONTAINER_PORT)],
        )
        .await
        .unwrap();
    assert!(!output.trim().is_empty(), "docker run printed no container id");

    let result = kind_harness::http::poll_until_status(
        &format!("http://127.0.0.1:{}/v2/", port),
        reqwest::StatusCode::OK,
        &PollPolicy::new(Duration::from_secs(30), Duration::from_secs(1)).unwrap(),
    )
    .await;

    provisioner.remove_container(REGISTRY_CONTAINER).await.unwrap();
    provisioner.remove_container(REGISTRY_CONTAINER).await.unwrap();
    result.unwrap();
}

/// Story: a fresh kind cluster reports its system pods running
#[tokio::test]
#[ignore]
async fn story_kind_cluster_pods_are_observable() {
    init_test_tracing();
    let provisioner = KindDockerProvisioner::new();
    let _ = provisioner.delete_cluster(CLUSTER).await;

    let kubeconfig = provisioner
        .create_cluster(CLUSTER, Duration::from_secs(120))
        .await
        .unwrap();

    let result = async {
        let control = KubeConnector::new().connect(&kubeconfig).await?;
        let check = PodPhaseCheck::new(
            control.as_ref(),
            "kube-system",
            "component=kube-apiserver",
            Phase::Running,
        );
        wait_for(
            &check,
            &PollPolicy::new(Duration::from_secs(60), Duration::from_secs(2))?,
        )
        .await
    }
    .await;

    provisioner.delete_cluster(CLUSTER).await.unwrap();
    let observation = result.unwrap();
    assert!(observation.state.contains("kube-apiserver"));
}
