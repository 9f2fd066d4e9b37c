//! Harness configuration
//!
//! Defaults reproduce the buildpacks-on-Tekton scenario. Environment variables
//! override the sources and the teardown behaviour; timings are plain fields so
//! tests can shrink them.

use std::path::PathBuf;
use std::time::Duration;

use crate::poll::PollPolicy;
use crate::Result;

/// Name of the kind cluster
pub const CLUSTER_NAME: &str = "integration-test-cluster";
/// Name of the registry container
pub const REGISTRY_CONTAINER_NAME: &str = "integration-test-registry";
/// Name of the application container
pub const APP_CONTAINER_NAME: &str = "integration-test-app";
/// Repository the TaskRun pushes the built image to
pub const OUTPUT_REPO_NAME: &str = "integration-test/app";

/// Tekton release installed into the cluster
pub const DEFAULT_INFRA_CONFIG: &str =
    "https://storage.googleapis.com/tekton-releases/pipeline/latest/release.yaml";
/// Buildpacks task installed when `TASK_CONFIG` is unset
pub const DEFAULT_TASK_CONFIG: &str =
    "https://raw.githubusercontent.com/tektoncd/catalog/master/buildpacks/buildpacks-v3.yaml";
/// TaskRun template rendered with the output image
pub const DEFAULT_TASKRUN_TEMPLATE: &str = "testdata/taskrun.tmpl.yaml";

/// Namespace the Tekton control plane runs in
pub const INFRA_NAMESPACE: &str = "tekton-pipelines";
/// Namespace the TaskRun runs in
pub const WORKLOAD_NAMESPACE: &str = "default";
/// Selects the pods created for the TaskRun
pub const TASKRUN_SELECTOR: &str = "tekton.dev/taskRun=test-run";

/// Environment variable overriding the task definition source
pub const TASK_CONFIG_ENV: &str = "TASK_CONFIG";
/// Environment variable that skips teardown when set to `true`
pub const SKIP_CLEANUP_ENV: &str = "SKIP_CLEANUP";
/// Environment variable overriding the registry host seen by the cluster
pub const REGISTRY_HOST_ENV: &str = "HARNESS_REGISTRY_HOST";
/// Environment variable overriding the TaskRun template path
pub const TASKRUN_TEMPLATE_ENV: &str = "HARNESS_TASKRUN_TEMPLATE";
/// Environment variable overriding the Tekton release source
pub const INFRA_CONFIG_ENV: &str = "HARNESS_INFRA_CONFIG";

/// Everything a scenario run needs to know
#[derive(Clone, Debug)]
pub struct HarnessConfig {
    /// kind cluster name
    pub cluster_name: String,
    /// Registry container name
    pub registry_container: String,
    /// Application container name
    pub app_container: String,
    /// Repository for the built image
    pub output_repo: String,

    /// Infrastructure (Tekton) definition source
    pub infra_config: String,
    /// Task definition source
    pub task_config: String,
    /// TaskRun template path
    pub taskrun_template: PathBuf,
    /// Selector for the TaskRun's pods
    pub taskrun_selector: String,
    /// Registry host the cluster pushes to; resolved from the host if unset
    pub registry_host: Option<String>,
    /// Host the application is verified on
    pub app_host: String,

    /// How long kind may take to report the control plane ready
    pub cluster_ready_timeout: Duration,
    /// Wait for the Tekton control plane
    pub infra_policy: PollPolicy,
    /// Wait for the TaskRun to complete
    pub taskrun_policy: PollPolicy,
    /// Wait for the application to answer
    pub app_policy: PollPolicy,

    /// Leave everything running for inspection
    pub skip_cleanup: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            cluster_name: CLUSTER_NAME.to_string(),
            registry_container: REGISTRY_CONTAINER_NAME.to_string(),
            app_container: APP_CONTAINER_NAME.to_string(),
            output_repo: OUTPUT_REPO_NAME.to_string(),
            infra_config: DEFAULT_INFRA_CONFIG.to_string(),
            task_config: DEFAULT_TASK_CONFIG.to_string(),
            taskrun_template: PathBuf::from(DEFAULT_TASKRUN_TEMPLATE),
            taskrun_selector: TASKRUN_SELECTOR.to_string(),
            registry_host: None,
            app_host: "localhost".to_string(),
            cluster_ready_timeout: Duration::from_secs(60),
            infra_policy: PollPolicy {
                timeout: Duration::from_secs(40),
                interval: Duration::from_secs(2),
                settle: None,
            },
            taskrun_policy: PollPolicy {
                timeout: Duration::from_secs(4 * 60),
                interval: Duration::from_secs(2),
                settle: None,
            },
            app_policy: PollPolicy {
                timeout: Duration::from_secs(20),
                interval: Duration::from_secs(1),
                settle: None,
            },
            skip_cleanup: false,
        }
    }
}

impl HarnessConfig {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults with overrides from `lookup`; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(task) = get(TASK_CONFIG_ENV) {
            config.task_config = task;
        }
        if let Some(infra) = get(INFRA_CONFIG_ENV) {
            config.infra_config = infra;
        }
        if let Some(template) = get(TASKRUN_TEMPLATE_ENV) {
            config.taskrun_template = PathBuf::from(template);
        }
        config.registry_host = get(REGISTRY_HOST_ENV);
        config.skip_cleanup = get(SKIP_CLEANUP_ENV).as_deref() == Some("true");
        config
    }

    /// Check the poll policies, which are public fields and bypass
    /// [`PollPolicy::new`]
    pub fn validate(&self) -> Result<()> {
        for policy in [&self.infra_policy, &self.taskrun_policy, &self.app_policy] {
            PollPolicy::new(policy.timeout, policy.interval)?;
        }
        Ok(())
    }
}
