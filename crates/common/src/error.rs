//! Error types for pagerun

use std::time::Duration;

use thiserror::Error;

use crate::types::{exit, Mode};

/// Result type alias using pagerun Error
pub type Result<T> = std::result::Result<T, Error>;

/// pagerun error types
///
/// Every failure a run can hit is one of these kinds. Lower layers return
/// them; only the orchestrator turns them into outcomes and exit codes.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Bundle build failed with {} error(s)", .errors.len())]
    Build { errors: Vec<String> },

    #[error("{mode} context failed to start: {failure}")]
    ContextStartup { mode: Mode, failure: StartupFailure },

    #[error("{mode} protocol error: {violation}")]
    Protocol {
        mode: Mode,
        violation: ProtocolViolation,
    },

    #[error("{mode} reported {failures} failing test(s)")]
    TestFailure { mode: Mode, failures: u32 },

    #[error("{mode} timed out after {}s", .after.as_secs_f64())]
    Timeout { mode: Mode, after: Duration },

    #[error("Asset server error: {0}")]
    Server(String),

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Process exit status this error maps to
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => exit::CONFIG,
            Error::Build { .. } => exit::BUILD,
            Error::ContextStartup { .. } | Error::Protocol { .. } => exit::CONTEXT,
            Error::TestFailure { .. } => exit::TEST_FAILURE,
            Error::Timeout { .. } => exit::TIMEOUT,
            Error::Server(_) | Error::Driver(_) | Error::Io(_) | Error::Serialization(_) => {
                exit::CONTEXT
            }
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Why an execution context never became ready
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartupFailure {
    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("service worker registration failed: {0}")]
    Registration(String),

    #[error("{0}")]
    Lifecycle(#[from] TransitionError),

    #[error("context not ready after {0:?}")]
    Timeout(Duration),

    #[error("browser driver unavailable: {0}")]
    DriverUnavailable(String),

    #[error("browser driver exited")]
    DriverExited,
}

/// A state machine was asked to make a move it does not allow
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {machine} transition: {from} -> {to}")]
pub struct TransitionError {
    pub machine: &'static str,
    pub from: String,
    pub to: String,
}

/// The result channel carried something it must not
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("undecodable driver line: {0}")]
    MalformedLine(String),

    #[error("malformed result event: {0}")]
    MalformedEvent(String),

    #[error("event stream closed before a terminal event")]
    StreamClosed,

    #[error("unexpected {0} message")]
    Unexpected(String),
}
