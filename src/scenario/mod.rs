//! End-to-end build scenario
//!
//! Brings up a local registry and a kind cluster, installs Tekton and the
//! buildpacks task, builds the sample app with a TaskRun, runs the pushed
//! image and checks that it serves HTTP 200. Teardown runs exactly once per
//! run whatever happened before it, including a panic in a stage.
//!
//! ```text
//! Init → Provisioned → InfraReady → TaskInstalled → WorkloadSubmitted
//!      → WorkloadDone → AppRunning → Verified → TornDown | TeardownSkipped
//! ```

mod context;

pub use context::{EnvironmentHandle, ScenarioContext, Stage};

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;

use futures::FutureExt;
use reqwest::StatusCode;
use tracing::{debug, error, info, warn};

use crate::config::{HarnessConfig, INFRA_NAMESPACE, WORKLOAD_NAMESPACE};
use crate::http::poll_until_status;
use crate::net::{free_port, resolve_ip_address};
use crate::observer::{ClusterControl, ControlConnector, Phase, PodPhaseCheck};
use crate::poll::wait_for;
use crate::provider::{
    PortBinding, Provisioner, APP_CONTAINER_PORT, REGISTRY_CONTAINER_PORT, REGISTRY_IMAGE,
};
use crate::workload::{DefinitionSource, ImageRef, WorkloadDriver};
use crate::{Error, Result};

/// What a skipped teardown left behind
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkipNotice {
    /// Cluster still running
    pub cluster_name: String,
    /// Scratch directory kept on disk
    pub scratch_dir: Option<PathBuf>,
    /// Host port of the registry, once started
    pub registry_port: Option<u16>,
    /// Output image as pulled from this host, `localhost:<port>/<repo>`
    pub image: Option<String>,
    /// Kubeconfig for the cluster
    pub kubeconfig: Option<PathBuf>,
}

impl SkipNotice {
    /// Command that removes the cluster by hand
    pub fn delete_command(&self) -> String {
        format!("kind delete cluster --name={}", self.cluster_name)
    }
}

impl fmt::Display for SkipNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn show<T: fmt::Display>(value: Option<T>) -> String {
            value.map_or_else(|| "(not created)".to_string(), |v| v.to_string())
        }

        writeln!(f, "teardown skipped, environment left running:")?;
        writeln!(f, "  cluster:    {}", self.cluster_name)?;
        writeln!(
            f,
            "  scratch:    {}",
            show(self.scratch_dir.as_ref().map(|p| p.display()))
        )?;
        writeln!(
            f,
            "  registry:   {}",
            show(self.registry_port.map(|p| format!("localhost:{p}")))
        )?;
        writeln!(f, "  image:      {}", show(self.image.as_ref()))?;
        writeln!(
            f,
            "  kubeconfig: {}",
            show(self.kubeconfig.as_ref().map(|p| p.display()))
        )?;
        if let Some(kubeconfig) = &self.kubeconfig {
            writeln!(
                f,
                "  point kubectl at it: export KUBECONFIG={}",
                kubeconfig.display()
            )?;
        }
        writeln!(f, "  list TaskRuns: kubectl get taskruns")?;
        write!(f, "  remove with: {}", self.delete_command())
    }
}

/// How teardown went
#[derive(Debug)]
pub enum TeardownOutcome {
    /// Every step ran; failed steps are listed as [`Error::Cleanup`]
    Completed {
        /// Failed steps, in order
        failures: Vec<Error>,
    },
    /// Teardown was skipped on request
    Skipped(SkipNotice),
}

/// Result of one scenario run
#[derive(Debug)]
pub struct ScenarioReport {
    /// Stages reached, ending with `TornDown` or `TeardownSkipped`
    pub history: Vec<Stage>,
    /// First error that stopped the run, if any
    pub outcome: Result<()>,
    /// What teardown did
    pub teardown: TeardownOutcome,
}

impl ScenarioReport {
    /// True if the run reached `Verified` without error
    pub fn passed(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Pass/fail of the run; teardown failures do not fail it
    pub fn into_result(self) -> Result<()> {
        self.outcome
    }
}

/// One run of the build scenario against a provisioner and cluster connector
pub struct Scenario<P, K> {
    config: HarnessConfig,
    provisioner: P,
    connector: K,
}

impl<P: Provisioner, K: ControlConnector> Scenario<P, K> {
    /// Create a scenario
    pub fn new(config: HarnessConfig, provisioner: P, connector: K) -> Self {
        Self {
            config,
            provisioner,
            connector,
        }
    }

    /// The configuration this scenario runs with
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run every stage, then tear down
    pub async fn run(&self) -> ScenarioReport {
        let mut ctx = ScenarioContext::new(&self.config);

        let outcome = match AssertUnwindSafe(self.drive(&mut ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(Error::Panicked {
                stage: ctx
                    .in_progress()
                    .map_or_else(|| "unknown".to_string(), |s| s.to_string()),
                message: panic_message(panic.as_ref()),
            }),
        };

        match &outcome {
            Ok(()) => info!("Scenario passed"),
            Err(e) => error!(
                error = %e,
                last_stage = ?ctx.current(),
                "Scenario failed"
            ),
        }

        let teardown = self.teardown(&mut ctx).await;

        ScenarioReport {
            history: ctx.into_history(),
            outcome,
            teardown,
        }
    }

    async fn drive(&self, ctx: &mut ScenarioContext) -> Result<()> {
        self.config.validate()?;

        self.init(ctx).await?;
        reached(ctx, Stage::Init);

        let control = self.provision(ctx).await?;
        reached(ctx, Stage::Provisioned);

        self.install_infra(control.as_ref()).await?;
        reached(ctx, Stage::InfraReady);

        self.install_task(control.as_ref()).await?;
        reached(ctx, Stage::TaskInstalled);

        self.submit_workload(ctx, control.as_ref()).await?;
        reached(ctx, Stage::WorkloadSubmitted);

        self.await_workload(control.as_ref()).await?;
        reached(ctx, Stage::WorkloadDone);

        let url = self.start_app(ctx).await?;
        reached(ctx, Stage::AppRunning);

        poll_until_status(&url, StatusCode::OK, &self.config.app_policy).await?;
        reached(ctx, Stage::Verified);

        Ok(())
    }

    /// Create the scratch directory and clear out anything a previous run left
    async fn init(&self, ctx: &mut ScenarioContext) -> Result<()> {
        let scratch = tempfile::Builder::new()
            .prefix("kind-harness.")
            .tempdir()
            .map_err(|e| Error::io("creating scratch directory", e))?;
        debug!(dir = %scratch.path().display(), "Created scratch directory");
        ctx.set_scratch(scratch);

        for container in [&self.config.registry_container, &self.config.app_container] {
            if let Err(e) = self.provisioner.remove_container(container).await {
                debug!(container = %container, error = %e, "Pre-clean: container not removed");
            }
        }
        if let Err(e) = self.provisioner.delete_cluster(&self.config.cluster_name).await {
            debug!(cluster = %self.config.cluster_name, error = %e, "Pre-clean: cluster not deleted");
        }
        Ok(())
    }

    /// Start the registry, create the cluster and connect to it
    async fn provision(&self, ctx: &mut ScenarioContext) -> Result<Box<dyn ClusterControl>> {
        let registry_port = free_port()?;
        self.provisioner
            .start_container(
                &self.config.registry_container,
                REGISTRY_IMAGE,
                &[PortBinding::new(registry_port, REGISTRY_CONTAINER_PORT)],
            )
            .await?;
        ctx.env_mut().registry_port = Some(registry_port);
        info!(port = registry_port, "Registry started");

        let kubeconfig = self
            .provisioner
            .create_cluster(&self.config.cluster_name, self.config.cluster_ready_timeout)
            .await?;
        ctx.env_mut().kubeconfig = Some(kubeconfig.clone());
        info!(cluster = %self.config.cluster_name, kubeconfig = %kubeconfig.display(), "Cluster ready");

        self.connector.connect(&kubeconfig).await
    }

    /// Apply the Tekton release and wait for its control plane
    async fn install_infra(&self, control: &dyn ClusterControl) -> Result<()> {
        WorkloadDriver::new(control, "")
            .submit(&DefinitionSource::parse(&self.config.infra_config))
            .await?;

        let check = PodPhaseCheck::new(control, INFRA_NAMESPACE, "", Phase::Running);
        wait_for(&check, &self.config.infra_policy).await?;
        Ok(())
    }

    async fn install_task(&self, control: &dyn ClusterControl) -> Result<()> {
        WorkloadDriver::new(control, WORKLOAD_NAMESPACE)
            .submit(&DefinitionSource::parse(&self.config.task_config))
            .await
    }

    /// Render the TaskRun with the in-cluster image reference and apply it
    async fn submit_workload(
        &self,
        ctx: &mut ScenarioContext,
        control: &dyn ClusterControl,
    ) -> Result<()> {
        let registry_port = ctx
            .env()
            .registry_port
            .ok_or_else(|| Error::config("registry port not allocated"))?;
        let host = match &self.config.registry_host {
            Some(host) => host.clone(),
            None => resolve_ip_address()?.to_string(),
        };
        let image = ImageRef::new(host, registry_port, self.config.output_repo.clone());

        let scratch = ctx
            .scratch_path()
            .ok_or_else(|| Error::config("scratch directory not created"))?
            .to_path_buf();
        let rendered = WorkloadDriver::new(control, WORKLOAD_NAMESPACE)
            .submit_template(&self.config.taskrun_template, &image, &scratch)
            .await?;

        let env = ctx.env_mut();
        env.image = Some(image);
        env.rendered_definition = Some(rendered);
        Ok(())
    }

    async fn await_workload(&self, control: &dyn ClusterControl) -> Result<()> {
        let check = PodPhaseCheck::new(
            control,
            WORKLOAD_NAMESPACE,
            self.config.taskrun_selector.clone(),
            Phase::Succeeded,
        );
        wait_for(&check, &self.config.taskrun_policy).await?;
        Ok(())
    }

    /// Run the built image, pulled through the host's view of the registry
    ///
    /// Returns the URL the application is served on.
    async fn start_app(&self, ctx: &mut ScenarioContext) -> Result<String> {
        let image = ctx
            .env()
            .image
            .as_ref()
            .ok_or_else(|| Error::config("image reference not set"))?
            .with_host("localhost");

        let app_port = free_port()?;
        self.provisioner
            .start_container(
                &self.config.app_container,
                &image.to_string(),
                &[PortBinding::new(app_port, APP_CONTAINER_PORT)],
            )
            .await?;
        ctx.env_mut().app_port = Some(app_port);
        info!(image = %image, port = app_port, "Application started");

        Ok(format!("http://{}:{}", self.config.app_host, app_port))
    }

    /// Remove everything the run created, one isolated step at a time
    async fn teardown(&self, ctx: &mut ScenarioContext) -> TeardownOutcome {
        if self.config.skip_cleanup {
            let registry_port = ctx.env().registry_port;
            let notice = SkipNotice {
                cluster_name: ctx.env().cluster_name.clone(),
                scratch_dir: ctx.take_scratch().map(|dir| dir.keep()),
                registry_port,
                image: registry_port.map(|port| {
                    ImageRef::new("localhost", port, self.config.output_repo.clone()).to_string()
                }),
                kubeconfig: ctx.env().kubeconfig.clone(),
            };
            warn!("{}", notice);
            reached(ctx, Stage::TeardownSkipped);
            return TeardownOutcome::Skipped(notice);
        }

        info!("Tearing down");
        let mut failures = Vec::new();

        if let Some(scratch) = ctx.take_scratch() {
            let removal = async move { scratch.close().map_err(|e| Error::io("removing", e)) };
            failures.extend(cleanup_step("scratch directory".to_string(), removal).await);
        }

        let containers = [
            ctx.env().registry_container.clone(),
            ctx.env().app_container.clone(),
        ];
        for container in containers {
            let step = format!("remove container {}", container);
            failures.extend(cleanup_step(step, self.provisioner.remove_container(&container)).await);
        }

        let cluster = ctx.env().cluster_name.clone();
        let step = format!("delete cluster {}", cluster);
        failures.extend(cleanup_step(step, self.provisioner.delete_cluster(&cluster)).await);

        for failure in &failures {
            warn!(error = %failure, "Teardown step failed");
        }
        reached(ctx, Stage::TornDown);
        TeardownOutcome::Completed { failures }
    }
}

/// Run one teardown step; an error or a panic becomes [`Error::Cleanup`]
async fn cleanup_step<F>(step: String, fut: F) -> Option<Error>
where
    F: Future<Output = Result<()>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(Error::cleanup(step, e.to_string())),
        Err(panic) => Some(Error::cleanup(
            step,
            format!("panicked: {}", panic_message(panic.as_ref())),
        )),
    }
}

fn reached(ctx: &mut ScenarioContext, stage: Stage) {
    info!(stage = %stage, "Stage reached");
    ctx.reach(stage);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
