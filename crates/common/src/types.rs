//! Core types for pagerun

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;
use crate::lifecycle::RunPhase;

/// Process exit statuses
pub mod exit {
    /// Every selected mode passed
    pub const SUCCESS: i32 = 0;
    /// A mode reported failing tests or a fatal error from inside the context
    pub const TEST_FAILURE: i32 = 1;
    /// A mode did not reach a terminal event in time
    pub const TIMEOUT: i32 = 2;
    /// A context failed to start or broke the result protocol
    pub const CONTEXT: i32 = 3;
    /// The bundle could not be built
    pub const BUILD: i32 = 4;
    /// Invalid invocation (EX_USAGE)
    pub const CONFIG: i32 = 64;
    /// Stopped by Ctrl-C
    pub const INTERRUPTED: i32 = 130;
}

/// Browser execution-context kind a suite runs under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Page,
    Worker,
    ServiceWorker,
}

impl Mode {
    /// All modes, in run priority order
    pub const ALL: [Mode; 3] = [Mode::Page, Mode::Worker, Mode::ServiceWorker];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Page => "page",
            Mode::Worker => "worker",
            Mode::ServiceWorker => "serviceworker",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "page" => Ok(Mode::Page),
            "worker" => Ok(Mode::Worker),
            "serviceworker" => Ok(Mode::ServiceWorker),
            other => Err(Error::Config(format!("unknown mode `{}`", other))),
        }
    }
}

/// Test runner adapter the bootstrap wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunnerKind {
    #[default]
    Mocha,
    Tape,
    BareSync,
}

impl RunnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerKind::Mocha => "mocha",
            RunnerKind::Tape => "tape",
            RunnerKind::BareSync => "bare-sync",
        }
    }

    /// Runners without an asynchronous event stream; the bootstrap
    /// synthesizes the terminal event once loading returns or throws.
    pub fn is_synchronous(&self) -> bool {
        matches!(self, RunnerKind::BareSync)
    }
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunnerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mocha" => Ok(RunnerKind::Mocha),
            "tape" => Ok(RunnerKind::Tape),
            "bare-sync" => Ok(RunnerKind::BareSync),
            other => Err(Error::Config(format!(
                "unknown runner `{}` (expected mocha, tape or bare-sync)",
                other
            ))),
        }
    }
}

/// Browser engine driven by Playwright
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl fmt::Display for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Browser {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chromium" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" => Ok(Browser::Webkit),
            other => Err(Error::Config(format!("unknown browser `{}`", other))),
        }
    }
}

/// Everything one mode run needs; built once per mode iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Base address of the asset server, without trailing slash
    pub base_url: String,
    pub timeout: Duration,
    pub mode: Mode,
    pub runner: RunnerKind,
    pub runner_reporter: Option<String>,
}

impl RunRequest {
    /// Host page that boots this request's mode
    pub fn entry_url(&self) -> String {
        format!(
            "{}/index.html?mode={}",
            self.base_url.trim_end_matches('/'),
            self.mode
        )
    }
}

/// Why a mode run did not pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The runner completed but reported failing assertions
    FailingTests { count: u32 },
    /// An uncaught exception or load error inside the context
    Fatal { message: String },
    TimedOut { after_ms: u64 },
    Startup { message: String },
    Protocol { message: String },
}

impl FailureReason {
    pub fn exit_code(&self) -> i32 {
        match self {
            FailureReason::FailingTests { .. } | FailureReason::Fatal { .. } => exit::TEST_FAILURE,
            FailureReason::TimedOut { .. } => exit::TIMEOUT,
            FailureReason::Startup { .. } | FailureReason::Protocol { .. } => exit::CONTEXT,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::FailingTests { count } => write!(f, "{} failing test(s)", count),
            FailureReason::Fatal { message } => write!(f, "fatal error: {}", message),
            FailureReason::TimedOut { after_ms } => write!(f, "timed out after {} ms", after_ms),
            FailureReason::Startup { message } => write!(f, "startup failed: {}", message),
            FailureReason::Protocol { message } => write!(f, "protocol error: {}", message),
        }
    }
}

/// Result of running the suite under one mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteOutcome {
    pub mode: Mode,
    /// Terminal phase of the run
    pub status: RunPhase,
    pub passed: bool,
    pub passed_count: u32,
    pub failure_count: u32,
    /// Console text forwarded from the context
    pub console: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
}

impl SuiteOutcome {
    /// Outcome of a run that reached `suiteComplete`
    pub fn completed(
        mode: Mode,
        passed_count: u32,
        failure_count: u32,
        console: String,
        duration: Duration,
    ) -> Self {
        let (status, failure) = if failure_count == 0 {
            (RunPhase::Completed, None)
        } else {
            (
                RunPhase::Failed,
                Some(FailureReason::FailingTests { count: failure_count }),
            )
        };
        Self {
            mode,
            status,
            passed: failure.is_none(),
            passed_count,
            failure_count,
            console,
            duration_ms: duration.as_millis() as u64,
            failure,
        }
    }

    /// Outcome of a run that failed for any reason other than a timeout
    pub fn failed(
        mode: Mode,
        reason: FailureReason,
        passed_count: u32,
        failure_count: u32,
        console: String,
        duration: Duration,
    ) -> Self {
        Self {
            mode,
            status: RunPhase::Failed,
            passed: false,
            passed_count,
            failure_count,
            console,
            duration_ms: duration.as_millis() as u64,
            failure: Some(reason),
        }
    }

    pub fn timed_out(
        mode: Mode,
        after: Duration,
        passed_count: u32,
        failure_count: u32,
        console: String,
        duration: Duration,
    ) -> Self {
        Self {
            mode,
            status: RunPhase::TimedOut,
            passed: false,
            passed_count,
            failure_count,
            console,
            duration_ms: duration.as_millis() as u64,
            failure: Some(FailureReason::TimedOut {
                after_ms: after.as_millis() as u64,
            }),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match &self.failure {
            Some(reason) => reason.exit_code(),
            None if self.passed => exit::SUCCESS,
            None => exit::TEST_FAILURE,
        }
    }
}

/// Reduction of every mode run into one process status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub outcomes: Vec<SuiteOutcome>,
    /// Selected modes with no outcome: an earlier one failed or the run
    /// was interrupted
    pub skipped: Vec<Mode>,
    /// Invocation-level failure (configuration, build, interrupt) that stopped the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl AggregateResult {
    pub fn from_outcomes(outcomes: Vec<SuiteOutcome>, skipped: Vec<Mode>, duration: Duration) -> Self {
        let exit_code = outcomes
            .iter()
            .find(|o| !o.passed)
            .map(SuiteOutcome::exit_code)
            .unwrap_or(exit::SUCCESS);
        Self {
            outcomes,
            skipped,
            error: None,
            exit_code,
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn from_error(err: &Error, skipped: Vec<Mode>, duration: Duration) -> Self {
        Self {
            outcomes: Vec::new(),
            skipped,
            error: Some(err.to_string()),
            exit_code: err.exit_code(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Stopped by Ctrl-C; outcomes finished before the interrupt are kept
    pub fn interrupted(outcomes: Vec<SuiteOutcome>, skipped: Vec<Mode>, duration: Duration) -> Self {
        Self {
            outcomes,
            skipped,
            error: Some("Interrupted".to_string()),
            exit_code: exit::INTERRUPTED,
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == exit::SUCCESS
    }

    pub fn failed_modes(&self) -> impl Iterator<Item = &SuiteOutcome> {
        self.outcomes.iter().filter(|o| !o.passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_priority_order() {
        let mut modes = vec![Mode::ServiceWorker, Mode::Page, Mode::Worker];
        modes.sort();
        assert_eq!(modes, Mode::ALL.to_vec());
    }

    #[test]
    fn test_mode_round_trips_through_strings() {
        for mode in Mode::ALL {
            assert_eq!(mode.as_str().parse::<Mode>().unwrap(), mode);
        }
        assert_eq!(
            serde_json::to_string(&Mode::ServiceWorker).unwrap(),
            "\"serviceworker\""
        );
        assert!("tab".parse::<Mode>().is_err());
    }

    #[test]
    fn test_runner_kind() {
        assert_eq!("bare-sync".parse::<RunnerKind>().unwrap(), RunnerKind::BareSync);
        assert!(RunnerKind::BareSync.is_synchronous());
        assert!(!RunnerKind::Mocha.is_synchronous());
        assert_eq!(RunnerKind::default(), RunnerKind::Mocha);
        let err = "jest".parse::<RunnerKind>().unwrap_err();
        assert!(err.to_string().contains("jest"));
    }

    #[test]
    fn test_entry_url() {
        let request = RunRequest {
            base_url: "http://127.0.0.1:4000/".to_string(),
            timeout: Duration::from_secs(30),
            mode: Mode::ServiceWorker,
            runner: RunnerKind::Mocha,
            runner_reporter: None,
        };
        assert_eq!(
            request.entry_url(),
            "http://127.0.0.1:4000/index.html?mode=serviceworker"
        );
    }

    #[test]
    fn test_completed_outcome_with_failures_is_failed() {
        let outcome = SuiteOutcome::completed(
            Mode::Page,
            4,
            1,
            String::new(),
            Duration::from_millis(20),
        );
        assert!(!outcome.passed);
        assert_eq!(outcome.status, RunPhase::Failed);
        assert_eq!(outcome.exit_code(), exit::TEST_FAILURE);

        let clean = SuiteOutcome::completed(Mode::Page, 4, 0, String::new(), Duration::ZERO);
        assert!(clean.passed);
        assert_eq!(clean.status, RunPhase::Completed);
        assert_eq!(clean.exit_code(), exit::SUCCESS);
    }

    #[test]
    fn test_aggregate_exit_code_follows_first_failure() {
        let pass = SuiteOutcome::completed(Mode::Page, 1, 0, String::new(), Duration::ZERO);
        let timeout = SuiteOutcome::timed_out(
            Mode::Worker,
            Duration::from_secs(5),
            0,
            0,
            String::new(),
            Duration::from_secs(5),
        );

        let ok = AggregateResult::from_outcomes(vec![pass.clone()], vec![], Duration::ZERO);
        assert!(ok.success());

        let failed = AggregateResult::from_outcomes(
            vec![pass, timeout],
            vec![Mode::ServiceWorker],
            Duration::ZERO,
        );
        assert!(!failed.success());
        assert_eq!(failed.exit_code, exit::TIMEOUT);
        assert_eq!(failed.failed_modes().count(), 1);
    }

    #[test]
    fn test_aggregate_from_error() {
        let err = Error::Build { errors: vec!["missing module".into()] };
        let result = AggregateResult::from_error(&err, vec![Mode::Page], Duration::ZERO);
        assert_eq!(result.exit_code, exit::BUILD);
        assert!(result.outcomes.is_empty());
        assert!(result.error.unwrap().contains("1 error"));
    }

    #[test]
    fn test_aggregate_interrupted() {
        let passed = SuiteOutcome::completed(
            Mode::Page,
            2,
            0,
            String::new(),
            Duration::from_millis(5),
        );
        let result = AggregateResult::interrupted(vec![passed], vec![Mode::Worker], Duration::ZERO);
        assert_eq!(result.exit_code, exit::INTERRUPTED);
        assert!(!result.success());
        assert_eq!(result.failed_modes().count(), 0);
        assert_eq!(result.skipped, vec![Mode::Worker]);
    }
}
