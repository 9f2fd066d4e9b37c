//! Resource provisioning
//!
//! The harness needs three throwaway resources: a Kubernetes cluster, a
//! container registry the cluster pushes built images to, and the container
//! running the built application. [`Provisioner`] is the seam between the
//! orchestrator and whatever creates them.
//!
//! # Supported Provisioners
//!
//! - [`KindDockerProvisioner`] - kind clusters and docker containers

mod docker;

pub use docker::{kubeconfig_path, KindDockerProvisioner};

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::Result;

/// Image for the local registry
pub const REGISTRY_IMAGE: &str = "registry:2";

/// Port the registry listens on inside its container
pub const REGISTRY_CONTAINER_PORT: u16 = 5000;

/// Port the built application listens on inside its container
pub const APP_CONTAINER_PORT: u16 = 8080;

/// Host-to-container TCP port mapping
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortBinding {
    /// Port on the host
    pub host: u16,
    /// Port inside the container
    pub container: u16,
}

impl PortBinding {
    /// Map `host` to `container`
    pub fn new(host: u16, container: u16) -> Self {
        Self { host, container }
    }
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}

/// Creates and destroys the harness's external resources
///
/// All names are fixed per run so leftovers from a crashed run can be removed
/// by name before provisioning starts.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create a cluster and wait up to `ready_timeout` for its control plane
    ///
    /// Returns the path of the kubeconfig for the new cluster.
    async fn create_cluster(&self, name: &str, ready_timeout: Duration) -> Result<PathBuf>;

    /// Delete a cluster
    async fn delete_cluster(&self, name: &str) -> Result<()>;

    /// Start a detached container, returning the runtime's output
    async fn start_container(
        &self,
        name: &str,
        image: &str,
        ports: &[PortBinding],
    ) -> Result<String>;

    /// Force-remove a container; removing an absent container succeeds
    async fn remove_container(&self, name: &str) -> Result<()>;
}
