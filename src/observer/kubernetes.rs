//! kube-rs backed cluster control
//!
//! Pods are listed through the API directly. Definitions are applied with
//! kubectl because sources may be remote URLs holding multi-document YAML,
//! which kubectl resolves and orders for us.

use std::error::Error as StdError;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio::process::Command;
use tracing::debug;

use super::{ClusterControl, ControlConnector, Phase, ProcessStatus};
use crate::{Error, Result};

/// Connect timeout for kube clients (the API server is local)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound for a single kubectl apply (remote sources are fetched first)
pub const APPLY_TIMEOUT: Duration = Duration::from_secs(120);

/// [`ClusterControl`] over a kube client plus kubectl for applies
pub struct KubeClusterControl {
    client: Client,
    kubeconfig: PathBuf,
}

impl KubeClusterControl {
    /// Wrap an existing client; `kubeconfig` is handed to kubectl
    pub fn new(client: Client, kubeconfig: impl Into<PathBuf>) -> Self {
        Self {
            client,
            kubeconfig: kubeconfig.into(),
        }
    }
}

#[async_trait]
impl ClusterControl for KubeClusterControl {
    async fn list_processes(&self, namespace: &str, selector: &str) -> Result<Vec<ProcessStatus>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(selector);
        }

        let list = pods
            .list(&params)
            .await
            .map_err(|e| classify_kube_error(&format!("list pods in {}", namespace), e))?;

        Ok(list
            .items
            .iter()
            .map(|pod| ProcessStatus {
                name: pod.metadata.name.clone().unwrap_or_default(),
                phase: pod
                    .status
                    .as_ref()
                    .and_then(|s| s.phase.as_deref())
                    .map(Phase::from_pod_phase)
                    .unwrap_or(Phase::Unknown),
            })
            .collect())
    }

    async fn apply_definition(&self, location: &str, namespace: &str) -> Result<String> {
        let kubeconfig = self.kubeconfig.to_string_lossy().to_string();
        let args = apply_args(location, namespace, &kubeconfig);
        debug!(?args, "Running kubectl");

        let output = tokio::time::timeout(
            APPLY_TIMEOUT,
            Command::new("kubectl").args(&args).kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| {
            Error::definition_rejected(
                location,
                format!("kubectl apply timed out after {:?}", APPLY_TIMEOUT),
            )
        })?
        .map_err(|e| Error::io("running kubectl", e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(Error::definition_rejected(location, stderr));
        }
        Ok(stdout)
    }
}

/// kubectl arguments for applying `location` into `namespace`
///
/// An empty namespace leaves placement to the manifests themselves.
fn apply_args(location: &str, namespace: &str, kubeconfig: &str) -> Vec<String> {
    let mut args = vec!["apply".to_string(), "-f".to_string(), location.to_string()];
    if !namespace.is_empty() {
        args.push("--namespace".to_string());
        args.push(namespace.to_string());
    }
    args.push("--kubeconfig".to_string());
    args.push(kubeconfig.to_string());
    args
}

/// Split kube errors into "retry later" and "the API is gone".
///
/// Status responses from the API server mean it is up, so they are transient.
/// Connection-level failures after the cluster reported ready are fatal. The
/// OS error sits several `source()` levels below kube's `ServiceError`, so the
/// whole chain is inspected and reported.
fn classify_kube_error(context: &str, err: kube::Error) -> Error {
    match err {
        kube::Error::Api(resp) => Error::query(context, resp.message),
        other => {
            let message = error_chain(&other);
            if is_unreachable(&other) {
                Error::unreachable(context, message)
            } else {
                Error::query(context, message)
            }
        }
    }
}

/// Messages of `err` and all of its sources, joined with `: `
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut messages = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        let message = cause.to_string();
        if !messages.iter().any(|m| m.contains(&message)) {
            messages.push(message);
        }
        source = cause.source();
    }
    messages.join(": ")
}

/// True if any error in the chain is a refused connection or failed lookup
fn is_unreachable(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        if is_unreachable_message(&e.to_string()) {
            return true;
        }
        current = e.source();
    }
    false
}

fn is_unreachable_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("connection refused")
        || message.contains("dns error")
        || message.contains("no such host")
        || message.contains("failed to lookup address")
}

/// Connects [`KubeClusterControl`] from a kubeconfig file
#[derive(Debug, Default, Clone)]
pub struct KubeConnector;

impl KubeConnector {
    /// Create a connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ControlConnector for KubeConnector {
    async fn connect(&self, kubeconfig: &Path) -> Result<Box<dyn ClusterControl>> {
        let client = create_client(kubeconfig).await?;
        Ok(Box::new(KubeClusterControl::new(client, kubeconfig)))
    }
}

/// Create a kube client from a kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: &Path) -> Result<Client> {
    let parsed = Kubeconfig::read_from(kubeconfig).map_err(|e| {
        Error::provisioning(
            kubeconfig.display().to_string(),
            format!("failed to read kubeconfig: {}", e),
        )
    })?;
    let mut config = Config::from_custom_kubeconfig(parsed, &KubeConfigOptions::default())
        .await
        .map_err(|e| {
            Error::provisioning(
                kubeconfig.display().to_string(),
                format!("failed to load kubeconfig: {}", e),
            )
        })?;
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

    Client::try_from(config).map_err(|e| {
        Error::provisioning(
            kubeconfig.display().to_string(),
            format!("failed to create client: {}", e),
        )
    })
}
