//! Error types for the harness
//!
//! Errors carry enough context (resource names, locations, the last observed
//! state of a wait) to diagnose a failed run from the log alone. The variants
//! map onto how the orchestrator reacts: transient query failures are retried
//! by the poller, cleanup failures are logged, everything else ends the run.

use std::time::Duration;

use thiserror::Error;

/// Main error type for harness operations
#[derive(Debug, Error)]
pub enum Error {
    /// Cluster or container creation failed
    #[error("provisioning error for {resource}: {message}")]
    Provisioning {
        /// Cluster or container being provisioned
        resource: String,
        /// Description of what failed
        message: String,
    },

    /// A poll loop exhausted its budget
    #[error("timed out after {timeout:?} waiting for {description} (last observed: {last_observed})")]
    ReadinessTimeout {
        /// What was being waited for
        description: String,
        /// The budget that elapsed
        timeout: Duration,
        /// Last state reported by the check
        last_observed: String,
    },

    /// The cluster refused a submitted definition
    #[error("definition rejected [{location}]: {message}")]
    DefinitionRejected {
        /// URL or path of the definition
        location: String,
        /// Output of the failed apply
        message: String,
    },

    /// A status query failed in a way that may resolve on its own
    #[error("query failed [{context}]: {message}")]
    Query {
        /// Query being performed
        context: String,
        /// Description of what failed
        message: String,
    },

    /// The cluster API cannot be reached at all
    #[error("cluster unreachable [{context}]: {message}")]
    Unreachable {
        /// Query being performed
        context: String,
        /// Description of what failed
        message: String,
    },

    /// The application never answered with the expected status code
    #[error("verification of {url} failed: expected status {expected} (last observed: {last_observed})")]
    Verification {
        /// Endpoint being verified
        url: String,
        /// Status code that was expected
        expected: u16,
        /// Last observation before giving up
        last_observed: String,
    },

    /// A teardown step failed
    #[error("cleanup step '{step}' failed: {message}")]
    Cleanup {
        /// Teardown step name
        step: String,
        /// Description of what failed
        message: String,
    },

    /// Invalid harness configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
    },

    /// Template loading or rendering failed
    #[error("template error: {message}")]
    Template {
        /// Description of what failed
        message: String,
    },

    /// Filesystem or process I/O failed
    #[error("io error [{context}]: {source}")]
    Io {
        /// Operation being performed
        context: String,
        /// The underlying io error
        #[source]
        source: std::io::Error,
    },

    /// A stage panicked
    #[error("stage {stage} panicked: {message}")]
    Panicked {
        /// Stage that was running
        stage: String,
        /// Panic payload
        message: String,
    },
}

impl Error {
    /// Create a provisioning error for the given resource
    pub fn provisioning(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provisioning {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a definition rejection for the given location
    pub fn definition_rejected(location: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::DefinitionRejected {
            location: location.into(),
            message: msg.into(),
        }
    }

    /// Create a transient query error
    pub fn query(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Query {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create an unreachable-cluster error
    pub fn unreachable(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Unreachable {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a cleanup error for the given teardown step
    pub fn cleanup(step: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Cleanup {
            step: step.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a template error
    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template {
            message: msg.into(),
        }
    }

    /// Wrap an io error with the operation that produced it
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether the poller should treat this error as "not ready yet"
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Query { .. })
    }
}

impl From<minijinja::Error> for Error {
    fn from(err: minijinja::Error) -> Self {
        Self::template(err.to_string())
    }
}
