//! HTTP verification
//!
//! Polls an endpoint until it answers with an expected status code. Connection
//! failures count as "not up yet" because the container may still be starting.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::poll::{wait_for, Observation, PollPolicy, ReadinessCheck};
use crate::{Error, Result};

/// Per-request timeout, kept short so one hung request cannot eat the budget
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Readiness check: a GET to `url` returns `expected`
pub struct HttpStatusCheck {
    client: reqwest::Client,
    url: String,
    expected: StatusCode,
}

impl HttpStatusCheck {
    /// Create a check for `url`
    pub fn new(url: impl Into<String>, expected: StatusCode) -> Result<Self> {
        // Targets are local containers; never route them through a proxy
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
            expected,
        })
    }
}

#[async_trait]
impl ReadinessCheck for HttpStatusCheck {
    fn describe(&self) -> String {
        format!("{} to return {}", self.url, self.expected.as_u16())
    }

    async fn check(&self) -> Result<Observation> {
        match self.client.get(&self.url).send().await {
            Ok(resp) if resp.status() == self.expected => {
                Ok(Observation::ready(format!("status {}", resp.status().as_u16())))
            }
            Ok(resp) => Ok(Observation::pending(format!(
                "status {}",
                resp.status().as_u16()
            ))),
            Err(e) => Ok(Observation::pending(format!("request failed: {}", e))),
        }
    }
}

/// Poll `url` until it returns `expected` or `policy.timeout` elapses
pub async fn poll_until_status(url: &str, expected: StatusCode, policy: &PollPolicy) -> Result<()> {
    let check = HttpStatusCheck::new(url, expected)?;
    match wait_for(&check, policy).await {
        Ok(_) => Ok(()),
        Err(Error::ReadinessTimeout { last_observed, .. }) => Err(Error::Verification {
            url: url.to_string(),
            expected: expected.as_u16(),
            last_observed,
        }),
        Err(e) => Err(e),
    }
}
