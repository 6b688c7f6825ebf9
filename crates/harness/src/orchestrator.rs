//! Orchestrator - builds once, serves, and runs each selected mode in turn

use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use pagerun_common::{
    AggregateResult, Error, FailureReason, Mode, Result, RunConfig, RunPhase, RunRequest,
    RunnerKind, StartupFailure, SuiteOutcome,
};

use crate::bootstrap::{prepare_output_dir, remove_output_dir};
use crate::bundle::{write_manifest, BuildPlan, BundleBuilder};
use crate::channel::{drain, SuiteTally, Terminal};
use crate::launcher::{ContextLauncher, ExecutionContext};
use crate::results::write_results;
use crate::server::AssetServer;
use crate::suite::resolve_test_files;

/// How long a context teardown may take before it is abandoned
const TEARDOWN_GRACE: Duration = Duration::from_secs(5);

/// Deadline used when `started + timeout` is not representable
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365);

/// What a run created so far; survives an interrupt
#[derive(Default)]
struct Progress {
    server: Option<AssetServer>,
    outcomes: Vec<SuiteOutcome>,
}

/// Sequences one invocation: validate, build, serve, run modes, release
pub struct Orchestrator<B, L> {
    builder: B,
    launcher: L,
    /// Print forwarded console output while tests run
    echo: bool,
}

impl<B: BundleBuilder, L: ContextLauncher> Orchestrator<B, L> {
    pub fn new(builder: B, launcher: L) -> Self {
        Self {
            builder,
            launcher,
            echo: false,
        }
    }

    pub fn with_console_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Run every selected mode and reduce the outcomes
    ///
    /// Never fails: every error becomes part of the returned result.
    pub async fn run(&mut self, config: &RunConfig) -> AggregateResult {
        self.run_until(config, std::future::pending()).await
    }

    /// Like `run`, but stops early once `interrupt` resolves
    ///
    /// The launcher, server and (with `cleanup`) output directory are always
    /// released once anything was created, and the results file is written
    /// on every path, interrupt and invalid configuration included.
    pub async fn run_until<F>(&mut self, config: &RunConfig, interrupt: F) -> AggregateResult
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();

        if let Err(e) = config.validate() {
            error!("{}", e);
            let result = AggregateResult::from_error(&e, Vec::new(), started.elapsed());
            save_results(config, &result).await;
            return result;
        }

        let modes = config.modes();
        let output_dir = config.resolved_output_dir();
        let mut progress = Progress::default();

        let finished = tokio::select! {
            staged = self.stage(config, &modes, &output_dir, &mut progress) => Some(staged),
            _ = interrupt => None,
        };

        if finished.is_none() {
            warn!("Interrupted, releasing browser and server");
            if let Err(e) = self.launcher.abort().await {
                warn!("Releasing interrupted context: {}", e);
            }
        }

        if let Some(mut server) = progress.server.take() {
            if let Err(e) = server.stop().await {
                warn!("Stopping asset server: {}", e);
            }
        }

        if let Err(e) = self.launcher.shutdown().await {
            warn!("Stopping browser: {}", e);
        }

        if config.cleanup {
            if let Err(e) = remove_output_dir(&output_dir).await {
                warn!("Removing {}: {}", output_dir.display(), e);
            }
        }

        let outcomes = progress.outcomes;
        let skipped: Vec<Mode> = modes
            .iter()
            .copied()
            .filter(|m| !outcomes.iter().any(|o| o.mode == *m))
            .collect();
        if !skipped.is_empty() && !outcomes.is_empty() {
            let names: Vec<&str> = skipped.iter().map(Mode::as_str).collect();
            info!("Skipped: {}", names.join(", "));
        }

        let result = match finished {
            None => AggregateResult::interrupted(outcomes, skipped, started.elapsed()),
            Some(Ok(())) => AggregateResult::from_outcomes(outcomes, skipped, started.elapsed()),
            Some(Err(e)) => {
                report_error(&e);
                AggregateResult::from_error(&e, skipped, started.elapsed())
            }
        };

        save_results(config, &result).await;
        result
    }

    /// Prepare, then run modes; everything created lands in `progress`
    async fn stage(
        &mut self,
        config: &RunConfig,
        modes: &[Mode],
        output_dir: &Path,
        progress: &mut Progress,
    ) -> Result<()> {
        let server = self.prepare(config, output_dir).await?;
        let base_url = server.base_url();
        progress.server = Some(server);
        self.run_modes(config, modes, &base_url, &mut progress.outcomes)
            .await;
        Ok(())
    }

    /// Resolve, bootstrap, build and start serving
    async fn prepare(&mut self, config: &RunConfig, output_dir: &Path) -> Result<AssetServer> {
        let test_files = resolve_test_files(&config.test_files, &config.working_dir)?;
        debug!("Resolved {} test file(s)", test_files.len());

        let bootstrap = prepare_output_dir(
            output_dir,
            config.runner,
            config.runner_reporter.as_deref(),
            &test_files,
        )
        .await?;

        let plan = BuildPlan {
            entry: bootstrap.entry.clone(),
            output_dir: bootstrap.output_dir.clone(),
            project_dir: config.working_dir.clone(),
        };
        let build = self.builder.build(&plan).await?;

        for warning in &build.warnings {
            warn!("{}", warning);
        }
        info!("Created bundle: {} ...", build.main_asset.display());

        if config.stats {
            write_manifest(output_dir, &build).await?;
        }

        AssetServer::start(output_dir).await
    }

    async fn run_modes(
        &mut self,
        config: &RunConfig,
        modes: &[Mode],
        base_url: &str,
        outcomes: &mut Vec<SuiteOutcome>,
    ) {
        for &mode in modes {
            if outcomes.iter().any(|o| !o.passed) {
                break;
            }

            info!("Running {} {} tests ...", config.runner, mode);
            let request = config.run_request(base_url, mode);
            let outcome = self.run_mode(&request).await;

            if config.runner != RunnerKind::Mocha {
                info!("");
            }
            self.report(&outcome);
            outcomes.push(outcome);
        }
    }

    fn report(&self, outcome: &SuiteOutcome) {
        if outcome.passed {
            info!(
                "✓ {} ({} passed, {} ms)",
                outcome.mode, outcome.passed_count, outcome.duration_ms
            );
            return;
        }

        if !self.echo && !outcome.console.is_empty() {
            print!("{}", outcome.console);
        }
        match &outcome.failure {
            Some(reason) => error!("✗ {} - {}", outcome.mode, reason),
            None => error!("✗ {}", outcome.mode),
        }
    }

    /// Run the suite under one mode, bounded by the request timeout
    ///
    /// The deadline covers launch and the event stream together. A launched
    /// context is torn down exactly once, whichever way the run ends.
    pub async fn run_mode(&mut self, request: &RunRequest) -> SuiteOutcome {
        let mut phase = RunPhase::NotStarted;
        let outcome = self.execute(request, &mut phase).await;
        step(request.mode, &mut phase, outcome.status);
        outcome
    }

    async fn execute(&mut self, request: &RunRequest, phase: &mut RunPhase) -> SuiteOutcome {
        let mode = request.mode;
        let started = Instant::now();
        let deadline = started
            .checked_add(request.timeout)
            .unwrap_or(started + FAR_FUTURE);

        step(mode, phase, RunPhase::Launching);
        let context = match timeout_at(deadline, self.launcher.launch(request)).await {
            Ok(Ok(context)) => context,
            Ok(Err(Error::ContextStartup {
                failure: StartupFailure::Timeout(_),
                ..
            })) if Instant::now() >= deadline => {
                return SuiteOutcome::timed_out(mode, request.timeout, 0, 0, String::new(), started.elapsed());
            }
            Ok(Err(e)) => {
                error!("{}", e);
                return SuiteOutcome::failed(mode, failure_reason(&e), 0, 0, String::new(), started.elapsed());
            }
            Err(_) => {
                warn!("{} context not ready within {:?}", mode, request.timeout);
                if let Err(e) = self.launcher.abort().await {
                    warn!("Releasing {} context: {}", mode, e);
                }
                return SuiteOutcome::timed_out(mode, request.timeout, 0, 0, String::new(), started.elapsed());
            }
        };

        step(mode, phase, RunPhase::Running);
        let mut tally = SuiteTally::new(self.echo);
        let mut context = context;
        let drained = timeout_at(deadline, drain(&mut context, &mut tally)).await;
        self.release(context).await;

        let elapsed = started.elapsed();
        let passed = tally.passed_count();
        let failed = tally.failure_count();

        match drained {
            Ok(Ok(Terminal::Complete(_))) => {
                SuiteOutcome::completed(mode, passed, failed, tally.console, elapsed)
            }
            Ok(Ok(Terminal::Fatal(fatal))) => {
                error!("{}", fatal.message);
                if let Some(stack) = &fatal.stack {
                    error!("{}", stack);
                }
                let reason = FailureReason::Fatal {
                    message: fatal.message,
                };
                SuiteOutcome::failed(mode, reason, passed, failed, tally.console, elapsed)
            }
            Ok(Err(violation)) => {
                let err = Error::Protocol { mode, violation };
                error!("{}", err);
                SuiteOutcome::failed(mode, failure_reason(&err), passed, failed, tally.console, elapsed)
            }
            Err(_) => {
                let err = Error::Timeout {
                    mode,
                    after: request.timeout,
                };
                error!("{}", err);
                SuiteOutcome::timed_out(mode, request.timeout, passed, failed, tally.console, elapsed)
            }
        }
    }

    async fn release(&mut self, context: ExecutionContext) {
        let mode = context.mode();
        match timeout(TEARDOWN_GRACE, self.launcher.teardown(context)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Tearing down {} context: {}", mode, e),
            Err(_) => warn!("Tearing down {} context took longer than {:?}", mode, TEARDOWN_GRACE),
        }
    }
}

fn step(mode: Mode, phase: &mut RunPhase, next: RunPhase) {
    match phase.advance(next) {
        Ok(advanced) => {
            debug!("{}: {} -> {}", mode, phase, advanced);
            *phase = advanced;
        }
        Err(e) => warn!("{}: {}", mode, e),
    }
}

fn failure_reason(err: &Error) -> FailureReason {
    let message = err.to_string();
    match err {
        Error::Protocol { .. } => FailureReason::Protocol { message },
        Error::Timeout { after, .. } => FailureReason::TimedOut {
            after_ms: after.as_millis() as u64,
        },
        Error::TestFailure { failures, .. } => FailureReason::FailingTests { count: *failures },
        _ => FailureReason::Startup { message },
    }
}

async fn save_results(config: &RunConfig, result: &AggregateResult) {
    if let Some(path) = &config.results_file {
        let path = config.working_dir.join(path);
        if let Err(e) = write_results(&path, result).await {
            warn!("Writing results to {}: {}", path.display(), e);
        }
    }
}

fn report_error(err: &Error) {
    match err {
        Error::Build { errors } => {
            error!("Bundle build failed:");
            for message in errors {
                error!("  {}", message);
            }
        }
        other => error!("{}", other),
    }
}
