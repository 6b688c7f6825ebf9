//! Normalized result events carried out of an execution context
//!
//! Wire form is `{"kind": "...", "payload": {...}}`; the bootstrap
//! serializes one of these per runner signal and hands the string to the
//! bridge function.

use serde::{Deserialize, Serialize};

/// A message describing test progress or outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum ResultEvent {
    /// Console text produced inside the context
    Log(LogLine),
    /// One test (or assertion) finished
    TestResult(TestCase),
    /// The runner finished; terminal
    SuiteComplete(SuiteSummary),
    /// Uncaught exception or load-time error; terminal
    FatalError(FatalError),
}

impl ResultEvent {
    /// Decode a serialized event as handed to the bridge
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// `suiteComplete` and `fatalError` end their context's run
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResultEvent::SuiteComplete(_) | ResultEvent::FatalError(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ResultEvent::Log(_) => "log",
            ResultEvent::TestResult(_) => "testResult",
            ResultEvent::SuiteComplete(_) => "suiteComplete",
            ResultEvent::FatalError(_) => "fatalError",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Log,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub text: String,
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub title: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Counts as reported by the runner itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteSummary {
    pub passed: Option<u32>,
    pub failed: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatalError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_test_result() {
        let raw = r#"{"kind":"testResult","payload":{"title":"adds","passed":false,"error":"expected 3","durationMs":4}}"#;
        let event = ResultEvent::decode(raw).unwrap();
        assert_eq!(
            event,
            ResultEvent::TestResult(TestCase {
                title: "adds".into(),
                passed: false,
                error: Some("expected 3".into()),
                duration_ms: Some(4),
            })
        );
        assert!(!event.is_terminal());
        assert_eq!(event.kind(), "testResult");
    }

    #[test]
    fn test_decode_terminal_events() {
        let done = ResultEvent::decode(r#"{"kind":"suiteComplete","payload":{"passed":2,"failed":0}}"#)
            .unwrap();
        assert!(done.is_terminal());

        let empty = ResultEvent::decode(r#"{"kind":"suiteComplete","payload":{}}"#).unwrap();
        assert_eq!(empty, ResultEvent::SuiteComplete(SuiteSummary::default()));

        let fatal =
            ResultEvent::decode(r#"{"kind":"fatalError","payload":{"message":"boom"}}"#).unwrap();
        assert!(fatal.is_terminal());
        assert_eq!(fatal.kind(), "fatalError");
    }

    #[test]
    fn test_log_level_defaults() {
        let event = ResultEvent::decode(r#"{"kind":"log","payload":{"text":"  ✓ adds"}}"#).unwrap();
        match event {
            ResultEvent::Log(line) => {
                assert_eq!(line.level, LogLevel::Log);
                assert_eq!(line.text, "  ✓ adds");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unknown_kind() {
        assert!(ResultEvent::decode(r#"{"kind":"coverage","payload":{}}"#).is_err());
        assert!(ResultEvent::decode("not json").is_err());
    }

    #[test]
    fn test_encode_uses_wire_names() {
        let event = ResultEvent::FatalError(FatalError {
            message: "load failed".into(),
            stack: None,
        });
        assert_eq!(
            event.encode().unwrap(),
            r#"{"kind":"fatalError","payload":{"message":"load failed"}}"#
        );
    }
}
