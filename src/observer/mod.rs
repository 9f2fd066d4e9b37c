//! Cluster observation
//!
//! Reduces the pods matching a namespace and label selector to a single
//! readiness answer. Readiness means "at least one pod, and every pod in the
//! target phase"; an empty listing is never ready so a wait cannot pass before
//! the resources it is waiting on have been created.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::poll::{Observation, ReadinessCheck};
use crate::Result;

pub mod kubernetes;

pub use kubernetes::{KubeClusterControl, KubeConnector};

/// Lifecycle phase of a pod
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Accepted but not all containers are running
    Pending,
    /// Bound to a node with at least one container running
    Running,
    /// All containers terminated successfully
    Succeeded,
    /// All containers terminated, at least one in failure
    Failed,
    /// Phase could not be determined
    Unknown,
}

impl Phase {
    /// Parse the phase string reported in a pod's status
    ///
    /// Anything unrecognised, including a missing phase, is `Unknown`.
    pub fn from_pod_phase(phase: &str) -> Self {
        match phase {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// The phase as the API server spells it
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed status of a single pod
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessStatus {
    /// Pod name
    pub name: String,
    /// Current phase
    pub phase: Phase,
}

impl ProcessStatus {
    /// Create a status record
    pub fn new(name: impl Into<String>, phase: Phase) -> Self {
        Self {
            name: name.into(),
            phase,
        }
    }
}

/// Control API of a provisioned cluster
///
/// Abstracts pod listing and definition submission for testability.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterControl: Send + Sync {
    /// List pods in `namespace` matching `selector` (empty selects all)
    ///
    /// Failures that may clear up on their own are `Error::Query`; failures
    /// that mean the API is gone are `Error::Unreachable`.
    async fn list_processes(&self, namespace: &str, selector: &str) -> Result<Vec<ProcessStatus>>;

    /// Apply the definition at `location` (URL or local path) to `namespace`;
    /// an empty namespace keeps the namespaces declared in the manifests
    ///
    /// Returns the apply output. Rejections are `Error::DefinitionRejected`.
    async fn apply_definition(&self, location: &str, namespace: &str) -> Result<String>;
}

/// Builds a [`ClusterControl`] once the cluster's kubeconfig exists
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlConnector: Send + Sync {
    /// Connect to the cluster described by `kubeconfig`
    async fn connect(&self, kubeconfig: &Path) -> Result<Box<dyn ClusterControl>>;
}

/// True if `statuses` is non-empty and every entry is in `target`
pub fn all_in_phase(statuses: &[ProcessStatus], target: Phase) -> bool {
    !statuses.is_empty() && statuses.iter().all(|s| s.phase == target)
}

/// Query the cluster once and report whether all selected pods are in `target`
pub async fn is_ready<C>(control: &C, namespace: &str, selector: &str, target: Phase) -> Result<bool>
where
    C: ClusterControl + ?Sized,
{
    Ok(observe(control, namespace, selector, target).await?.ready)
}

/// Query the cluster once and reduce the selected pods to an [`Observation`]
///
/// An empty set is pending with state "no pods found".
pub async fn observe<C>(
    control: &C,
    namespace: &str,
    selector: &str,
    target: Phase,
) -> Result<Observation>
where
    C: ClusterControl + ?Sized,
{
    let statuses = control.list_processes(namespace, selector).await?;
    if statuses.is_empty() {
        return Ok(Observation::pending("no pods found"));
    }

    let state = summarize(&statuses);
    if all_in_phase(&statuses, target) {
        Ok(Observation::ready(state))
    } else {
        Ok(Observation::pending(state))
    }
}

/// Render a status set for logs, e.g. `a=Running, b=Pending`
pub fn summarize(statuses: &[ProcessStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("{}={}", s.name, s.phase))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Readiness check: every pod selected in a namespace has reached a phase
pub struct PodPhaseCheck<'a, C: ?Sized> {
    control: &'a C,
    namespace: String,
    selector: String,
    target: Phase,
}

impl<'a, C: ClusterControl + ?Sized> PodPhaseCheck<'a, C> {
    /// Create a check against `namespace`, filtered by `selector`
    pub fn new(
        control: &'a C,
        namespace: impl Into<String>,
        selector: impl Into<String>,
        target: Phase,
    ) -> Self {
        Self {
            control,
            namespace: namespace.into(),
            selector: selector.into(),
            target,
        }
    }
}

#[async_trait]
impl<C: ClusterControl + ?Sized> ReadinessCheck for PodPhaseCheck<'_, C> {
    fn describe(&self) -> String {
        if self.selector.is_empty() {
            format!("pods in {} to be {}", self.namespace, self.target)
        } else {
            format!(
                "pods in {} matching '{}' to be {}",
                self.namespace, self.selector, self.target
            )
        }
    }

    async fn check(&self) -> Result<Observation> {
        observe(self.control, &self.namespace, &self.selector, self.target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::{wait_for, PollPolicy};
    use crate::Error;
    use mockall::predicate::*;
    use std::time::Duration;
    use tokio::time::Instant;

    fn pods(phases: &[Phase]) -> Vec<ProcessStatus> {
        phases
            .iter()
            .enumerate()
            .map(|(i, p)| ProcessStatus::new(format!("pod-{i}"), *p))
            .collect()
    }

    const ALL_PHASES: [Phase; 5] = [
        Phase::Pending,
        Phase::Running,
        Phase::Succeeded,
        Phase::Failed,
        Phase::Unknown,
    ];

    // ==========================================================================
    // Story: readiness reduction
    // ==========================================================================

    #[test]
    fn empty_set_is_never_ready() {
        for phase in ALL_PHASES {
            assert!(!all_in_phase(&[], phase), "empty set ready for {phase}");
        }
    }

    #[test]
    fn one_straggler_blocks_readiness() {
        let statuses = pods(&[Phase::Running, Phase::Running, Phase::Pending]);
        assert!(!all_in_phase(&statuses, Phase::Running));
    }

    #[test]
    fn all_matching_is_ready() {
        assert!(all_in_phase(&pods(&[Phase::Running]), Phase::Running));
        assert!(all_in_phase(
            &pods(&[Phase::Succeeded, Phase::Succeeded, Phase::Succeeded]),
            Phase::Succeeded
        ));
    }

    #[test]
    fn running_is_not_succeeded() {
        assert!(!all_in_phase(&pods(&[Phase::Running]), Phase::Succeeded));
    }

    #[test]
    fn pod_phase_strings_parse() {
        for phase in ALL_PHASES {
            assert_eq!(Phase::from_pod_phase(phase.as_str()), phase);
        }
        assert_eq!(Phase::from_pod_phase(""), Phase::Unknown);
        assert_eq!(Phase::from_pod_phase("running"), Phase::Unknown);
    }

    #[test]
    fn summary_lists_each_pod() {
        let statuses = vec![
            ProcessStatus::new("controller", Phase::Running),
            ProcessStatus::new("webhook", Phase::Pending),
        ];
        assert_eq!(summarize(&statuses), "controller=Running, webhook=Pending");
    }

    // ==========================================================================
    // Story: querying the cluster
    // ==========================================================================

    #[tokio::test]
    async fn is_ready_passes_namespace_and_selector_through() {
        let mut control = MockClusterControl::new();
        control
            .expect_list_processes()
            .with(eq("default"), eq("tekton.dev/taskRun=test-run"))
            .times(1)
            .returning(|_, _| Ok(pods(&[Phase::Succeeded])));

        let ready = is_ready(
            &control,
            "default",
            "tekton.dev/taskRun=test-run",
            Phase::Succeeded,
        )
        .await
        .unwrap();
        assert!(ready);
    }

    #[tokio::test]
    async fn is_ready_propagates_query_errors() {
        let mut control = MockClusterControl::new();
        control
            .expect_list_processes()
            .returning(|_, _| Err(Error::unreachable("list pods", "connection refused")));

        let err = is_ready(&control, "tekton-pipelines", "", Phase::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unreachable { .. }));
    }

    #[tokio::test]
    async fn empty_namespace_is_not_ready() {
        let mut control = MockClusterControl::new();
        control
            .expect_list_processes()
            .times(1)
            .returning(|_, _| Ok(vec![]));

        let ready = is_ready(&control, "tekton-pipelines", "", Phase::Running)
            .await
            .unwrap();
        assert!(!ready);
    }

    #[tokio::test]
    async fn check_and_is_ready_agree() {
        let mut control = MockClusterControl::new();
        control
            .expect_list_processes()
            .times(2)
            .returning(|_, _| Ok(pods(&[Phase::Running, Phase::Pending])));
        let check = PodPhaseCheck::new(&control, "tekton-pipelines", "", Phase::Running);

        let observation = check.check().await.unwrap();
        let ready = is_ready(&control, "tekton-pipelines", "", Phase::Running)
            .await
            .unwrap();

        assert_eq!(observation.ready, ready);
        assert!(!ready);
    }

    #[tokio::test]
    async fn check_describes_selector_when_present() {
        let control = MockClusterControl::new();
        let all = PodPhaseCheck::new(&control, "tekton-pipelines", "", Phase::Running);
        let labelled = PodPhaseCheck::new(&control, "default", "app=x", Phase::Succeeded);

        assert_eq!(all.describe(), "pods in tekton-pipelines to be Running");
        assert_eq!(
            labelled.describe(),
            "pods in default matching 'app=x' to be Succeeded"
        );
    }

    // ==========================================================================
    // Story: waiting for Tekton to come up
    //
    // Replays a recorded trace: nothing at first, one pending pod at 2s, two
    // pending at 6s, both running at 10s. Polling every 2s with a 40s budget
    // must declare readiness on the 10s tick and not before.
    // ==========================================================================

    struct TraceControl {
        start: Instant,
        trace: Vec<(Duration, Vec<ProcessStatus>)>,
    }

    #[async_trait]
    impl ClusterControl for TraceControl {
        async fn list_processes(&self, _: &str, _: &str) -> Result<Vec<ProcessStatus>> {
            let elapsed = self.start.elapsed();
            Ok(self
                .trace
                .iter()
                .rev()
                .find(|(at, _)| *at <= elapsed)
                .map(|(_, statuses)| statuses.clone())
                .unwrap_or_default())
        }

        async fn apply_definition(&self, _: &str, _: &str) -> Result<String> {
            unreachable!("trace control only lists")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn tekton_pods_become_ready_on_the_first_all_running_tick() {
        let start = Instant::now();
        let control = TraceControl {
            start,
            trace: vec![
                (Duration::ZERO, vec![]),
                (
                    Duration::from_secs(2),
                    vec![ProcessStatus::new("controller", Phase::Pending)],
                ),
                (
                    Duration::from_secs(6),
                    vec![
                        ProcessStatus::new("controller", Phase::Pending),
                        ProcessStatus::new("webhook", Phase::Pending),
                    ],
                ),
                (
                    Duration::from_secs(10),
                    vec![
                        ProcessStatus::new("controller", Phase::Running),
                        ProcessStatus::new("webhook", Phase::Running),
                    ],
                ),
            ],
        };
        let check = PodPhaseCheck::new(&control, "tekton-pipelines", "", Phase::Running);
        let policy = PollPolicy::new(Duration::from_secs(40), Duration::from_secs(2)).unwrap();

        let observation = wait_for(&check, &policy).await.unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert_eq!(observation.state, "controller=Running, webhook=Running");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reports_the_stuck_pods() {
        let mut control = MockClusterControl::new();
        control.expect_list_processes().returning(|_, _| {
            Ok(vec![
                ProcessStatus::new("build-pod", Phase::Running),
                ProcessStatus::new("other", Phase::Failed),
            ])
        });
        let check = PodPhaseCheck::new(&control, "default", "run=x", Phase::Succeeded);
        let policy = PollPolicy::new(Duration::from_secs(10), Duration::from_secs(2)).unwrap();

        let err = wait_for(&check, &policy).await.unwrap_err();

        match err {
            Error::ReadinessTimeout { last_observed, .. } => {
                assert_eq!(last_observed, "build-pod=Running, other=Failed")
            }
            other => panic!("expected ReadinessTimeout, got {other}"),
        }
    }
}
