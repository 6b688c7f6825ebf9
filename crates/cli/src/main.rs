//! pagerun CLI - Main Entry Point
//!
//! Builds the test bundle, serves it and runs it in each selected browser
//! context, exiting with the aggregate status.

use anyhow::Context;
use clap::Parser;
use tracing::warn;

use pagerun_cli::args::Cli;
use pagerun_cli::output;
use pagerun_harness::{BrowserLauncher, LauncherConfig, Orchestrator, WebpackBuilder};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries forwarded test output and the summary
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let working_dir = std::env::current_dir().context("cannot determine working directory")?;

    let config = match cli.load_config(&working_dir) {
        Ok(config) => config,
        Err(e) => {
            output::print_error(&e.to_string());
            return Ok(e.exit_code());
        }
    };

    let launcher = BrowserLauncher::new(LauncherConfig {
        node_binary: config.node_binary.clone(),
        browser: config.browser,
        headless: config.headless,
        work_dir: config.resolved_output_dir(),
        project_dir: working_dir.clone(),
        ..Default::default()
    });
    let mut orchestrator =
        Orchestrator::new(WebpackBuilder::default(), launcher).with_console_echo(true);

    // An interrupt still releases the browser, server and output dir
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let result = orchestrator.run_until(&config, interrupt).await;
    output::print_summary(&result, cli.format);
    Ok(result.exit_code)
}
