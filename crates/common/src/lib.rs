//! pagerun Common Library
//!
//! Shared types, result events, configuration and state machines used by
//! the harness and the CLI.

pub mod config;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod types;

// Re-export commonly used types
pub use config::RunConfig;
pub use error::{Error, ProtocolViolation, Result, StartupFailure, TransitionError};
pub use event::{FatalError, LogLevel, LogLine, ResultEvent, SuiteSummary, TestCase};
pub use lifecycle::{RunPhase, ServiceWorkerState};
pub use types::*;

/// pagerun version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
