//! Command-line arguments and config merging

use clap::{ArgAction, Parser};
use std::path::{Path, PathBuf};

use pagerun_common::config::CONFIG_FILE_NAME;
use pagerun_common::{Browser, Result, RunConfig, RunnerKind};

use crate::output::OutputFormat;

/// pagerun - run a test suite inside browser page, worker and service-worker contexts
#[derive(Parser, Debug)]
#[command(name = "pagerun")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Test files, directories or globs
    pub files: Vec<String>,

    /// Runner adapter: mocha, tape or bare-sync
    #[arg(short, long)]
    pub runner: Option<RunnerKind>,

    /// Where bundle and bootstrap artifacts are written
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Run tests in a page (`--page=false` to skip)
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub page: Option<bool>,

    /// Run tests in a dedicated worker
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub worker: Option<bool>,

    /// Run tests in a service worker
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub serviceworker: Option<bool>,

    /// Write the bundler manifest to webpack-stats.json
    #[arg(long)]
    pub stats: bool,

    /// Delete the output directory after the run
    #[arg(long)]
    pub cleanup: bool,

    /// Seconds before a mode is marked timed out
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Reporter passed to the runner adapter
    #[arg(long, alias = "mocha-reporter")]
    pub runner_reporter: Option<String>,

    /// Browser engine: chromium, firefox or webkit
    #[arg(long)]
    pub browser: Option<Browser>,

    /// Run the browser headless (`--headless=false` to show it)
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub headless: Option<bool>,

    /// Node executable hosting the browser driver
    #[arg(long = "node")]
    pub node_binary: Option<PathBuf>,

    /// TOML config file (defaults to pagerun.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write the aggregate result as JSON
    #[arg(long)]
    pub results: Option<PathBuf>,

    /// Summary format
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Defaults, then the config file, then flags
    pub fn load_config(&self, working_dir: &Path) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_file(&working_dir.join(path))?,
            None => {
                let default = working_dir.join(CONFIG_FILE_NAME);
                if default.is_file() {
                    RunConfig::from_file(&default)?
                } else {
                    RunConfig::default()
                }
            }
        };
        config.working_dir = working_dir.to_path_buf();
        self.apply(&mut config);
        Ok(config)
    }

    /// Overlay explicitly given flags
    pub fn apply(&self, config: &mut RunConfig) {
        if !self.files.is_empty() {
            config.test_files = self.files.clone();
        }
        if let Some(runner) = self.runner {
            config.runner = runner;
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(page) = self.page {
            config.page = page;
        }
        if let Some(worker) = self.worker {
            config.worker = worker;
        }
        if let Some(serviceworker) = self.serviceworker {
            config.serviceworker = serviceworker;
        }
        if self.stats {
            config.stats = true;
        }
        if self.cleanup {
            config.cleanup = true;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if let Some(reporter) = &self.runner_reporter {
            config.runner_reporter = Some(reporter.clone());
        }
        if let Some(browser) = self.browser {
            config.browser = browser;
        }
        if let Some(headless) = self.headless {
            config.headless = headless;
        }
        if let Some(node) = &self.node_binary {
            config.node_binary = node.clone();
        }
        if let Some(results) = &self.results {
            config.results_file = Some(results.clone());
        }
    }
}
