//! kind-harness - end-to-end test harness for the buildpacks Tekton task
//!
//! Builds a sample application inside a throwaway kind cluster and checks the
//! resulting image actually serves traffic:
//!
//! 1. start a `registry:2` container and a kind cluster
//! 2. install the Tekton pipeline release and wait for its control plane
//! 3. install the buildpacks task and submit a TaskRun that pushes to the registry
//! 4. wait for the TaskRun to succeed, run the image and expect HTTP 200
//! 5. tear everything down, even when a stage failed
//!
//! # Modules
//!
//! - [`scenario`] - Stage sequencing, scenario context and teardown
//! - [`provider`] - Cluster and container provisioning (kind, docker)
//! - [`observer`] - Cluster control: pod phases and definition apply
//! - [`poll`] - Bounded polling of readiness checks
//! - [`workload`] - Definition sources and TaskRun template rendering
//! - [`http`] - HTTP status verification
//! - [`net`] - Free ports and the host's routable address
//! - [`config`] - Harness configuration
//! - [`telemetry`] - Tracing setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod http;
pub mod net;
pub mod observer;
pub mod poll;
pub mod provider;
pub mod scenario;
pub mod telemetry;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

use std::path::PathBuf;

use clap::Parser;

use config::HarnessConfig;
use observer::KubeConnector;
use provider::KindDockerProvisioner;
use scenario::Scenario;

/// kind-harness - build an app with the buildpacks task on a throwaway cluster
#[derive(Parser, Debug)]
#[command(name = "kind-harness")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Task definition to install (URL or path); overrides TASK_CONFIG
    #[arg(long)]
    pub task_config: Option<String>,

    /// Tekton release to install (URL or path)
    #[arg(long)]
    pub infra_config: Option<String>,

    /// TaskRun template; must contain `{{ image_name }}`
    #[arg(long)]
    pub taskrun_template: Option<PathBuf>,

    /// Address the cluster uses to reach the registry on this host
    #[arg(long)]
    pub registry_host: Option<String>,

    /// Leave the cluster, containers and scratch directory running
    #[arg(long)]
    pub skip_cleanup: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

impl Cli {
    /// Environment configuration with command-line flags applied on top
    pub fn config(&self) -> HarnessConfig {
        let mut config = HarnessConfig::from_env();
        if let Some(task) = &self.task_config {
            config.task_config = task.clone();
        }
        if let Some(infra) = &self.infra_config {
            config.infra_config = infra.clone();
        }
        if let Some(template) = &self.taskrun_template {
            config.taskrun_template = template.clone();
        }
        if let Some(host) = &self.registry_host {
            config.registry_host = Some(host.clone());
        }
        config.skip_cleanup |= self.skip_cleanup;
        config
    }

    /// Run the scenario against the local docker daemon
    pub async fn run(self) -> Result<()> {
        let scenario = Scenario::new(
            self.config(),
            KindDockerProvisioner::new(),
            KubeConnector::new(),
        );
        scenario.run().await.into_result()
    }
}
