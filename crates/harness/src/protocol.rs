//! Host ⇄ driver wire protocol
//!
//! The browser driver is a long-lived Node process. Commands go to its
//! stdin and messages come back on stdout, one JSON document per line.
//! Every message about a context carries that context's id so the host can
//! drop anything addressed to a context it already released.

use serde::{Deserialize, Serialize};

use pagerun_common::Mode;

/// Command sent to the driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum DriverCommand {
    /// Open a fresh browser context and navigate it to `url`
    Launch {
        context: u64,
        mode: Mode,
        url: String,
        #[serde(rename = "timeoutMs")]
        timeout_ms: u64,
    },
    /// Unregister service workers and close the context
    Close { context: u64 },
    /// Close everything and exit
    Shutdown,
}

impl DriverCommand {
    /// One protocol line, newline included
    pub fn encode(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartupStage {
    Navigation,
    Registration,
}

/// Message received from the driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DriverMessage {
    /// Navigation finished and the host page loaded
    Ready { context: u64 },
    StartupError {
        context: u64,
        stage: StartupStage,
        message: String,
    },
    /// Service-worker state change reported by the host page
    Lifecycle { context: u64, state: String },
    /// A serialized result event handed to the bridge
    Event { context: u64, event: String },
    /// Ambient console output seen by the driver
    Console {
        context: u64,
        level: String,
        text: String,
    },
    /// Uncaught exception in the page
    PageError { context: u64, message: String },
    /// The context went away
    Closed { context: u64 },
    /// Driver-level failure not tied to a context
    DriverError { message: String },
    /// A stdout line that did not decode; synthesized by the host
    #[serde(skip)]
    Malformed { line: String },
    /// Driver stdout reached EOF; synthesized by the host
    #[serde(skip)]
    DriverExited,
}

impl DriverMessage {
    /// Decode one stdout line; failures become `Malformed`
    pub fn decode(line: &str) -> Self {
        serde_json::from_str(line).unwrap_or_else(|_| DriverMessage::Malformed {
            line: line.to_string(),
        })
    }

    /// Context the message is addressed to; `None` for driver-wide messages
    pub fn context(&self) -> Option<u64> {
        match self {
            DriverMessage::Ready { context }
            | DriverMessage::StartupError { context, .. }
            | DriverMessage::Lifecycle { context, .. }
            | DriverMessage::Event { context, .. }
            | DriverMessage::Console { context, .. }
            | DriverMessage::PageError { context, .. }
            | DriverMessage::Closed { context } => Some(*context),
            DriverMessage::DriverError { .. }
            | DriverMessage::Malformed { .. }
            | DriverMessage::DriverExited => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DriverMessage::Ready { .. } => "ready",
            DriverMessage::StartupError { .. } => "startupError",
            DriverMessage::Lifecycle { .. } => "lifecycle",
            DriverMessage::Event { .. } => "event",
            DriverMessage::Console { .. } => "console",
            DriverMessage::PageError { .. } => "pageError",
            DriverMessage::Closed { .. } => "closed",
            DriverMessage::DriverError { .. } => "driverError",
            DriverMessage::Malformed { .. } => "malformed",
            DriverMessage::DriverExited => "driverExited",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_launch() {
        let line = DriverCommand::Launch {
            context: 3,
            mode: Mode::ServiceWorker,
            url: "http://127.0.0.1:1/index.html?mode=serviceworker".into(),
            timeout_ms: 30_000,
        }
        .encode()
        .unwrap();

        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["cmd"], "launch");
        assert_eq!(value["context"], 3);
        assert_eq!(value["mode"], "serviceworker");
        assert_eq!(value["timeoutMs"], 30_000);

        assert_eq!(
            DriverCommand::Shutdown.encode().unwrap(),
            "{\"cmd\":\"shutdown\"}\n"
        );
    }

    #[test]
    fn test_decode_messages() {
        assert_eq!(
            DriverMessage::decode(r#"{"type":"ready","context":1}"#),
            DriverMessage::Ready { context: 1 }
        );
        assert_eq!(
            DriverMessage::decode(
                r#"{"type":"startupError","context":2,"stage":"registration","message":"SecurityError"}"#
            ),
            DriverMessage::StartupError {
                context: 2,
                stage: StartupStage::Registration,
                message: "SecurityError".into(),
            }
        );
        let event = DriverMessage::decode(
            r#"{"type":"event","context":1,"event":"{\"kind\":\"log\",\"payload\":{\"text\":\"hi\"}}"}"#,
        );
        assert_eq!(event.context(), Some(1));
        assert_eq!(event.name(), "event");
    }

    #[test]
    fn test_undecodable_lines_become_malformed() {
        let message = DriverMessage::decode("Playwright warning: something");
        assert_eq!(
            message,
            DriverMessage::Malformed {
                line: "Playwright warning: something".into()
            }
        );
        assert_eq!(message.context(), None);

        let unknown = DriverMessage::decode(r#"{"type":"teleport","context":1}"#);
        assert!(matches!(unknown, DriverMessage::Malformed { .. }));
    }

    #[test]
    fn test_driver_error_has_no_context() {
        let message = DriverMessage::decode(r#"{"type":"driverError","message":"bad"}"#);
        assert_eq!(message.context(), None);
    }
}
