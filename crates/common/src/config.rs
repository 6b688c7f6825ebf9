//! Run configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{Browser, Mode, RunRequest, RunnerKind};

/// Default config file looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "pagerun.toml";

/// Longest accepted per-mode timeout, in seconds (one day)
pub const MAX_TIMEOUT_SECS: f64 = 86_400.0;

/// Immutable configuration for one invocation
///
/// Built once (defaults, then the TOML file, then CLI flags) and passed by
/// reference to everything that needs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Test file paths, globs or directories
    pub test_files: Vec<String>,

    /// Adapter translating runner events into result events
    pub runner: RunnerKind,

    /// Where the bundle and bootstrap artifacts are materialized
    pub output_dir: PathBuf,

    pub page: bool,
    pub worker: bool,
    pub serviceworker: bool,

    /// Persist the builder manifest next to the bundle
    pub stats: bool,

    /// Remove `output_dir` once the run is over
    pub cleanup: bool,

    /// Seconds before a mode run is marked timed out
    pub timeout: f64,

    /// Passed through to the runner adapter
    pub runner_reporter: Option<String>,

    pub browser: Browser,
    pub headless: bool,

    /// Node executable hosting the browser driver
    pub node_binary: PathBuf,

    /// Write the aggregate result as JSON here
    pub results_file: Option<PathBuf>,

    /// Directory relative paths and globs are resolved against
    #[serde(skip)]
    pub working_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            test_files: Vec::new(),
            runner: RunnerKind::Mocha,
            output_dir: PathBuf::from("build"),
            page: true,
            worker: false,
            serviceworker: false,
            stats: false,
            cleanup: false,
            timeout: 30.0,
            runner_reporter: None,
            browser: Browser::Chromium,
            headless: true,
            node_binary: PathBuf::from("node"),
            results_file: None,
            working_dir: PathBuf::from("."),
        }
    }
}

impl RunConfig {
    /// Parse a configuration from TOML
    pub fn from_toml(toml: &str) -> Result<Self> {
        Ok(toml::from_str(toml)?)
    }

    /// Load a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_toml(&content)
    }

    /// Check everything that must hold before any resource is created
    pub fn validate(&self) -> Result<()> {
        if self.test_files.is_empty() {
            return Err(Error::Config(
                "You must supply at least one test file".to_string(),
            ));
        }
        if !self.page && !self.worker && !self.serviceworker {
            return Err(Error::Config(
                "No mode specified, use one or more of `--page`, `--worker`, `--serviceworker`"
                    .to_string(),
            ));
        }
        if !(self.timeout > 0.0 && self.timeout <= MAX_TIMEOUT_SECS) {
            return Err(Error::Config(format!(
                "Invalid timeout value ({})",
                self.timeout
            )));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(Error::Config("--output-dir required".to_string()));
        }
        Ok(())
    }

    pub fn is_selected(&self, mode: Mode) -> bool {
        match mode {
            Mode::Page => self.page,
            Mode::Worker => self.worker,
            Mode::ServiceWorker => self.serviceworker,
        }
    }

    /// Selected modes in priority order
    pub fn modes(&self) -> Vec<Mode> {
        Mode::ALL
            .into_iter()
            .filter(|m| self.is_selected(*m))
            .collect()
    }

    /// Per-mode timeout, clamped to `MAX_TIMEOUT_SECS`
    ///
    /// Values `validate` rejects never panic here: NaN and non-positive
    /// values fall back to the default.
    pub fn timeout(&self) -> Duration {
        if self.timeout > 0.0 {
            Duration::from_secs_f64(self.timeout.min(MAX_TIMEOUT_SECS))
        } else {
            Duration::from_secs_f64(Self::default().timeout)
        }
    }

    /// Output directory resolved against the working directory
    pub fn resolved_output_dir(&self) -> PathBuf {
        self.working_dir.join(&self.output_dir)
    }

    pub fn run_request(&self, base_url: &str, mode: Mode) -> RunRequest {
        RunRequest {
            base_url: base_url.to_string(),
            timeout: self.timeout(),
            mode,
            runner: self.runner,
            runner_reporter: self.runner_reporter.clone(),
        }
    }
}
