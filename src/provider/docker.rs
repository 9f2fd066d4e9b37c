//! kind + docker provisioner
//!
//! Shells out to the `kind` and `docker` CLIs. Every command runs with a
//! timeout and is killed if it overruns, so a wedged docker daemon fails the
//! run instead of hanging it.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{PortBinding, Provisioner};
use crate::{Error, Result};

/// Timeout for docker commands
const DOCKER_TIMEOUT: Duration = Duration::from_secs(120);

/// Extra time allowed for `kind create cluster` beyond its own `--wait`
const KIND_CREATE_SLACK: Duration = Duration::from_secs(300);

/// Timeout for `kind delete cluster`
const KIND_DELETE_TIMEOUT: Duration = Duration::from_secs(120);

/// Well-known kubeconfig location for a kind cluster created by the harness.
///
/// Example: `/tmp/integration-test-cluster-kubeconfig`
pub fn kubeconfig_path(cluster_name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}-kubeconfig", cluster_name))
}

/// Output of a finished command
struct CmdOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl CmdOutput {
    /// stdout and stderr joined, the way a terminal would show them
    fn combined(&self) -> String {
        [self.stdout.trim(), self.stderr.trim()]
            .iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Run a command to completion, killing it after `timeout`
async fn run_cmd(cmd: &str, args: &[String], timeout: Duration) -> Result<CmdOutput> {
    debug!(cmd, ?args, "Running command");
    let output = tokio::time::timeout(
        timeout,
        Command::new(cmd).args(args).kill_on_drop(true).output(),
    )
    .await
    .map_err(|_| {
        Error::io(
            format!("running {}", cmd),
            std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("{} timed out after {:?}", cmd, timeout),
            ),
        )
    })?
    .map_err(|e| Error::io(format!("spawning {}", cmd), e))?;

    Ok(CmdOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// `docker run` arguments for a detached, auto-removed container
fn docker_run_args(name: &str, image: &str, ports: &[PortBinding]) -> Vec<String> {
    let mut args: Vec<String> = ["run", "-d", "--rm", "--name", name]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for port in ports {
        args.push("-p".to_string());
        args.push(port.to_string());
    }
    args.push(image.to_string());
    args
}

/// `kind create cluster` arguments
fn kind_create_args(name: &str, ready_timeout: Duration, kubeconfig: &str) -> Vec<String> {
    vec![
        "create".to_string(),
        "cluster".to_string(),
        "--name".to_string(),
        name.to_string(),
        "--wait".to_string(),
        format!("{}s", ready_timeout.as_secs().max(1)),
        "--kubeconfig".to_string(),
        kubeconfig.to_string(),
    ]
}

fn is_missing_container(stderr: &str) -> bool {
    stderr.contains("No such container")
}

/// [`Provisioner`] backed by the kind and docker CLIs
#[derive(Debug, Default, Clone)]
pub struct KindDockerProvisioner;

impl KindDockerProvisioner {
    /// Create a provisioner
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Provisioner for KindDockerProvisioner {
    async fn create_cluster(&self, name: &str, ready_timeout: Duration) -> Result<PathBuf> {
        let kubeconfig = kubeconfig_path(name);
        let kubeconfig_str = kubeconfig
            .to_str()
            .ok_or_else(|| Error::provisioning(name, "kubeconfig path contains invalid UTF-8"))?;

        info!(cluster = %name, "Creating kind cluster");
        let output = run_cmd(
            "kind",
            &kind_create_args(name, ready_timeout, kubeconfig_str),
            ready_timeout + KIND_CREATE_SLACK,
        )
        .await?;

        if !output.success {
            return Err(Error::provisioning(
                name,
                format!("kind create cluster failed: {}", output.stderr.trim()),
            ));
        }
        if !kubeconfig.exists() {
            return Err(Error::provisioning(
                name,
                format!("kind did not write kubeconfig to {}", kubeconfig.display()),
            ));
        }
        Ok(kubeconfig)
    }

    async fn delete_cluster(&self, name: &str) -> Result<()> {
        let args: Vec<String> = ["delete", "cluster", "--name", name]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let output = run_cmd("kind", &args, KIND_DELETE_TIMEOUT).await?;
        if !output.success {
            return Err(Error::provisioning(
                name,
                format!("kind delete cluster failed: {}", output.stderr.trim()),
            ));
        }
        Ok(())
    }

    async fn start_container(
        &self,
        name: &str,
        image: &str,
        ports: &[PortBinding],
    ) -> Result<String> {
        info!(container = %name, image = %image, "Starting container");
        let output = run_cmd("docker", &docker_run_args(name, image, ports), DOCKER_TIMEOUT).await?;
        if !output.success {
            return Err(Error::provisioning(
                name,
                format!("docker run failed: {}", output.combined()),
            ));
        }
        Ok(output.combined())
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        let args: Vec<String> = ["rm", "-f", name].iter().map(|s| s.to_string()).collect();
        let output = run_cmd("docker", &args, DOCKER_TIMEOUT).await?;
        if output.success || is_missing_container(&output.stderr) {
            return Ok(());
        }
        Err(Error::provisioning(
            name,
            format!("docker rm failed: {}", output.stderr.trim()),
        ))
    }
}
