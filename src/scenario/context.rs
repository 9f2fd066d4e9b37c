//! Per-run state shared between the scenario's stages

use std::fmt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::config::HarnessConfig;
use crate::workload::ImageRef;

/// Milestones of a scenario run, in order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Scratch directory created, leftovers removed
    Init,
    /// Registry and cluster up, cluster control connected
    Provisioned,
    /// Tekton control plane running
    InfraReady,
    /// Buildpacks task applied
    TaskInstalled,
    /// TaskRun applied
    WorkloadSubmitted,
    /// TaskRun pods succeeded
    WorkloadDone,
    /// Built image started as a container
    AppRunning,
    /// Application answered with 200
    Verified,
    /// All resources removed
    TornDown,
    /// Resources left in place for inspection
    TeardownSkipped,
}

impl Stage {
    /// The stage a run works towards after reaching `self`
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Init => Some(Stage::Provisioned),
            Stage::Provisioned => Some(Stage::InfraReady),
            Stage::InfraReady => Some(Stage::TaskInstalled),
            Stage::TaskInstalled => Some(Stage::WorkloadSubmitted),
            Stage::WorkloadSubmitted => Some(Stage::WorkloadDone),
            Stage::WorkloadDone => Some(Stage::AppRunning),
            Stage::AppRunning => Some(Stage::Verified),
            Stage::Verified | Stage::TornDown | Stage::TeardownSkipped => None,
        }
    }

    /// Display name
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "Init",
            Stage::Provisioned => "Provisioned",
            Stage::InfraReady => "InfraReady",
            Stage::TaskInstalled => "TaskInstalled",
            Stage::WorkloadSubmitted => "WorkloadSubmitted",
            Stage::WorkloadDone => "WorkloadDone",
            Stage::AppRunning => "AppRunning",
            Stage::Verified => "Verified",
            Stage::TornDown => "TornDown",
            Stage::TeardownSkipped => "TeardownSkipped",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names and addresses of everything the run created
#[derive(Clone, Debug, Default)]
pub struct EnvironmentHandle {
    /// kind cluster name
    pub cluster_name: String,
    /// Registry container name
    pub registry_container: String,
    /// Application container name
    pub app_container: String,
    /// Host port the registry is published on
    pub registry_port: Option<u16>,
    /// Host port the application is published on
    pub app_port: Option<u16>,
    /// Kubeconfig written for the cluster
    pub kubeconfig: Option<PathBuf>,
    /// Image the TaskRun pushes, as seen from inside the cluster
    pub image: Option<ImageRef>,
    /// Rendered TaskRun definition
    pub rendered_definition: Option<PathBuf>,
}

/// Mutable state of one run, owned by the scenario
pub struct ScenarioContext {
    scratch: Option<TempDir>,
    env: EnvironmentHandle,
    history: Vec<Stage>,
}

impl ScenarioContext {
    /// Fresh context for the resources named in `config`
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            scratch: None,
            env: EnvironmentHandle {
                cluster_name: config.cluster_name.clone(),
                registry_container: config.registry_container.clone(),
                app_container: config.app_container.clone(),
                ..Default::default()
            },
            history: Vec::new(),
        }
    }

    /// Record that `stage` was reached
    pub fn reach(&mut self, stage: Stage) {
        self.history.push(stage);
    }

    /// Stages reached so far
    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    /// Last stage reached
    pub fn current(&self) -> Option<Stage> {
        self.history.last().copied()
    }

    /// Stage the run is working on; `Init` before anything was reached
    pub fn in_progress(&self) -> Option<Stage> {
        match self.current() {
            None => Some(Stage::Init),
            Some(stage) => stage.next(),
        }
    }

    /// Environment created so far
    pub fn env(&self) -> &EnvironmentHandle {
        &self.env
    }

    /// Environment created so far, for stages to fill in
    pub fn env_mut(&mut self) -> &mut EnvironmentHandle {
        &mut self.env
    }

    /// Install the scratch directory
    pub fn set_scratch(&mut self, dir: TempDir) {
        self.scratch = Some(dir);
    }

    /// Path of the scratch directory, if created
    pub fn scratch_path(&self) -> Option<&Path> {
        self.scratch.as_ref().map(|d| d.path())
    }

    /// Take ownership of the scratch directory, e.g. to remove or keep it
    pub fn take_scratch(&mut self) -> Option<TempDir> {
        self.scratch.take()
    }

    /// Consume the context, returning the stage history
    pub fn into_history(self) -> Vec<Stage> {
        self.history
    }
}
