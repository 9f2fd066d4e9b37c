//! Bounded readiness polling.
//!
//! A [`ReadinessCheck`] answers "is the condition met right now" and
//! [`wait_for`] drives it on a fixed interval until it is, the budget in the
//! [`PollPolicy`] runs out, or the check fails in a way that waiting cannot fix.
//!
//! # Example
//!
//! ```ignore
//! use kind_harness::observer::{Phase, PodPhaseCheck};
//! use kind_harness::poll::{wait_for, PollPolicy};
//!
//! let check = PodPhaseCheck::new(&control, "tekton-pipelines", "", Phase::Running);
//! wait_for(&check, &PollPolicy::new(Duration::from_secs(40), Duration::from_secs(2))?).await?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::{Error, Result};

/// Timing budget for a single wait.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// Total wall-clock budget for the wait
    pub timeout: Duration,
    /// Delay between checks
    pub interval: Duration,
    /// If set, a ready observation must still hold after this delay
    pub settle: Option<Duration>,
}

impl PollPolicy {
    /// Create a policy, rejecting anything but `timeout >= interval > 0`
    pub fn new(timeout: Duration, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::config("poll interval must be greater than zero"));
        }
        if timeout < interval {
            return Err(Error::config(format!(
                "poll timeout {:?} is shorter than interval {:?}",
                timeout, interval
            )));
        }
        Ok(Self {
            timeout,
            interval,
            settle: None,
        })
    }

    /// Require readiness to hold for `settle` before the wait succeeds
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = Some(settle);
        self
    }
}

/// One evaluation of a readiness check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Observation {
    /// Whether the condition is met
    pub ready: bool,
    /// Human-readable snapshot of what was seen
    pub state: String,
}

impl Observation {
    /// The condition is met
    pub fn ready(state: impl Into<String>) -> Self {
        Self {
            ready: true,
            state: state.into(),
        }
    }

    /// The condition is not met yet
    pub fn pending(state: impl Into<String>) -> Self {
        Self {
            ready: false,
            state: state.into(),
        }
    }
}

/// A condition the poller can wait on.
///
/// Returning `Err` with a transient error (see [`Error::is_transient`]) is
/// the same as reporting "not ready"; any other error aborts the wait.
#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    /// What is being waited for, used in logs and timeout errors
    fn describe(&self) -> String;

    /// Evaluate the condition once
    async fn check(&self) -> Result<Observation>;
}

/// Poll `check` until it reports ready or `policy.timeout` elapses.
///
/// The first check runs immediately. On timeout the error carries the state of
/// the last observation so a failed run shows what the environment looked like.
pub async fn wait_for<C>(check: &C, policy: &PollPolicy) -> Result<Observation>
where
    C: ReadinessCheck + ?Sized,
{
    let description = check.describe();
    let start = Instant::now();
    let mut last_observed = "no observation yet".to_string();
    let mut settling = false;

    loop {
        match check.check().await {
            Ok(observation) if observation.ready => match policy.settle {
                Some(settle) if !settling => {
                    debug!(check = %description, settle_ms = settle.as_millis(), "Ready, settling");
                    settling = true;
                    tokio::time::sleep(settle).await;
                    continue;
                }
                _ => {
                    debug!(
                        check = %description,
                        elapsed_ms = start.elapsed().as_millis(),
                        "Condition met"
                    );
                    return Ok(observation);
                }
            },
            Ok(observation) => {
                settling = false;
                debug!(check = %description, state = %observation.state, "Not ready yet");
                last_observed = observation.state;
            }
            Err(e) if e.is_transient() => {
                settling = false;
                debug!(check = %description, error = %e, "Check failed, retrying");
                last_observed = e.to_string();
            }
            Err(e) => return Err(e),
        }

        tokio::time::sleep(policy.interval).await;

        if start.elapsed() >= policy.timeout {
            return Err(Error::ReadinessTimeout {
                description,
                timeout: policy.timeout,
                last_observed,
            });
        }
    }
}
