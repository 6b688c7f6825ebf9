//! Host end of the result channel
//!
//! Drains one context's message queue, tallying test results and forwarded
//! console text, until the first terminal event. Anything after it is left
//! in the queue and discarded with the context.

use tracing::{debug, error};

use pagerun_common::{
    FatalError, LogLevel, ProtocolViolation, ResultEvent, SuiteSummary,
};

use crate::launcher::ExecutionContext;
use crate::protocol::DriverMessage;

/// How a context's run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    Complete(SuiteSummary),
    Fatal(FatalError),
}

/// Everything observed from a context so far
///
/// Lives outside `drain` so partial results survive a timeout.
#[derive(Debug, Clone, Default)]
pub struct SuiteTally {
    pub passed: u32,
    pub failed: u32,
    /// Forwarded console text, one line per log event
    pub console: String,
    /// Counts the runner reported in `suiteComplete`
    pub reported: SuiteSummary,
    /// Print log events to stdout as they arrive
    pub echo: bool,
}

impl SuiteTally {
    pub fn new(echo: bool) -> Self {
        Self {
            echo,
            ..Default::default()
        }
    }

    /// Larger of tallied and reported passes
    pub fn passed_count(&self) -> u32 {
        self.passed.max(self.reported.passed.unwrap_or(0))
    }

    /// Larger of tallied and reported failures
    pub fn failure_count(&self) -> u32 {
        self.failed.max(self.reported.failed.unwrap_or(0))
    }

    fn log(&mut self, text: &str, level: LogLevel) {
        self.console.push_str(text);
        self.console.push('\n');
        if self.echo {
            match level {
                LogLevel::Warn | LogLevel::Error => eprintln!("{}", text),
                _ => println!("{}", text),
            }
        }
    }

    /// Fold one event in; returns the terminal it represents, if any
    pub fn record(&mut self, event: ResultEvent) -> Option<Terminal> {
        match event {
            ResultEvent::Log(line) => {
                self.log(&line.text, line.level);
                None
            }
            ResultEvent::TestResult(case) => {
                if case.passed {
                    self.passed += 1;
                    debug!("✓ {}", case.title);
                } else {
                    self.failed += 1;
                    debug!(
                        "✗ {} - {}",
                        case.title,
                        case.error.as_deref().unwrap_or("failed")
                    );
                }
                None
            }
            ResultEvent::SuiteComplete(summary) => {
                self.reported = summary;
                Some(Terminal::Complete(summary))
            }
            ResultEvent::FatalError(fatal) => Some(Terminal::Fatal(fatal)),
        }
    }
}

/// Consume `context`'s messages until a terminal event
///
/// Protocol violations end the run: an undecodable line or event, a
/// startup-only message after startup, or the queue closing first.
pub async fn drain(
    context: &mut ExecutionContext,
    tally: &mut SuiteTally,
) -> Result<Terminal, ProtocolViolation> {
    loop {
        let message = context.recv().await.ok_or(ProtocolViolation::StreamClosed)?;

        match message {
            DriverMessage::Event { event, .. } => {
                let event = ResultEvent::decode(&event)
                    .map_err(|e| ProtocolViolation::MalformedEvent(format!("{}: {}", e, event)))?;
                if let Some(terminal) = tally.record(event) {
                    return Ok(terminal);
                }
            }
            DriverMessage::PageError { message, .. } => {
                error!("Uncaught error in {} context: {}", context.mode(), message);
                return Ok(Terminal::Fatal(FatalError {
                    message,
                    stack: None,
                }));
            }
            DriverMessage::Console { level, text, .. } => {
                debug!("[console.{}] {}", level, text);
            }
            DriverMessage::Malformed { line } => {
                return Err(ProtocolViolation::MalformedLine(line));
            }
            DriverMessage::Closed { .. } | DriverMessage::DriverExited => {
                return Err(ProtocolViolation::StreamClosed);
            }
            DriverMessage::DriverError { message } => {
                return Err(ProtocolViolation::Unexpected(format!("driverError ({})", message)));
            }
            other => {
                return Err(ProtocolViolation::Unexpected(other.name().to_string()));
            }
        }
    }
}
