//! Explicit state machines for mode runs and service-worker startup

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TransitionError;

/// Phase of a single mode run
///
/// `NotStarted → Launching → Running → {Completed | Failed | TimedOut}`.
/// A launch can also end directly in `Failed` or `TimedOut`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    #[default]
    NotStarted,
    Launching,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Failed | RunPhase::TimedOut)
    }

    /// Move to `next`, rejecting anything the machine does not allow
    pub fn advance(self, next: RunPhase) -> Result<RunPhase, TransitionError> {
        use RunPhase::*;

        let allowed = matches!(
            (self, next),
            (NotStarted, Launching)
                | (Launching, Running)
                | (Launching, Failed)
                | (Launching, TimedOut)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, TimedOut)
        );

        if allowed {
            Ok(next)
        } else {
            Err(TransitionError {
                machine: "run",
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::NotStarted => "not started",
            RunPhase::Launching => "launching",
            RunPhase::Running => "running",
            RunPhase::Completed => "completed",
            RunPhase::Failed => "failed",
            RunPhase::TimedOut => "timed out",
        };
        f.write_str(s)
    }
}

/// Service-worker startup states as reported by the host page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceWorkerState {
    Registering,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

impl ServiceWorkerState {
    const MACHINE: &'static str = "service worker";

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceWorkerState::Registering => "registering",
            ServiceWorkerState::Installing => "installing",
            ServiceWorkerState::Installed => "installed",
            ServiceWorkerState::Activating => "activating",
            ServiceWorkerState::Activated => "activated",
            ServiceWorkerState::Redundant => "redundant",
        }
    }

    /// First state a fresh registration must report
    pub fn begin(first: ServiceWorkerState) -> Result<Self, TransitionError> {
        if first == ServiceWorkerState::Registering {
            Ok(first)
        } else {
            Err(TransitionError {
                machine: Self::MACHINE,
                from: "unregistered".to_string(),
                to: first.to_string(),
            })
        }
    }

    /// Step to `next`. Only the single forward step is legal; a repeated
    /// report of the current state is a no-op.
    pub fn advance(self, next: ServiceWorkerState) -> Result<Self, TransitionError> {
        use ServiceWorkerState::*;

        if next == self && next != Redundant {
            return Ok(self);
        }

        let allowed = matches!(
            (self, next),
            (Registering, Installing)
                | (Installing, Installed)
                | (Installed, Activating)
                | (Activating, Activated)
        );

        if allowed {
            Ok(next)
        } else {
            Err(TransitionError {
                machine: Self::MACHINE,
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    pub fn is_ready(self) -> bool {
        self == ServiceWorkerState::Activated
    }
}

impl fmt::Display for ServiceWorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceWorkerState {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registering" => Ok(ServiceWorkerState::Registering),
            "installing" => Ok(ServiceWorkerState::Installing),
            "installed" => Ok(ServiceWorkerState::Installed),
            "activating" => Ok(ServiceWorkerState::Activating),
            "activated" => Ok(ServiceWorkerState::Activated),
            "redundant" => Ok(ServiceWorkerState::Redundant),
            other => Err(TransitionError {
                machine: Self::MACHINE,
                from: "?".to_string(),
                to: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ServiceWorkerState::*;

    #[test]
    fn test_run_phase_happy_path() {
        let phase = RunPhase::NotStarted
            .advance(RunPhase::Launching)
            .and_then(|p| p.advance(RunPhase::Running))
            .and_then(|p| p.advance(RunPhase::Completed))
            .unwrap();
        assert!(phase.is_terminal());
    }

    #[test]
    fn test_run_phase_terminal_states_are_final() {
        for terminal in [RunPhase::Completed, RunPhase::Failed, RunPhase::TimedOut] {
            for next in [RunPhase::Launching, RunPhase::Running, RunPhase::Failed] {
                assert!(terminal.advance(next).is_err());
            }
        }
        assert!(RunPhase::NotStarted.advance(RunPhase::Running).is_err());
        assert!(RunPhase::Launching.advance(RunPhase::Completed).is_err());
        assert!(RunPhase::Launching.advance(RunPhase::TimedOut).is_ok());
    }

    #[test]
    fn test_service_worker_full_startup() {
        let mut state = ServiceWorkerState::begin(Registering).unwrap();
        for next in [Installing, Installed, Activating, Activated] {
            state = state.advance(next).unwrap();
        }
        assert!(state.is_ready());
    }

    #[test]
    fn test_service_worker_rejects_skips_and_redundant() {
        assert!(ServiceWorkerState::begin(Installing).is_err());
        assert!(Registering.advance(Activated).is_err());
        assert!(Installed.advance(Installing).is_err());

        let err = Installing.advance(Redundant).unwrap_err();
        assert_eq!(err.from, "installing");
        assert_eq!(err.to, "redundant");
        assert!(Redundant.advance(Redundant).is_err());
    }

    #[test]
    fn test_service_worker_repeated_state_is_noop() {
        assert_eq!(Installing.advance(Installing).unwrap(), Installing);
    }

    #[test]
    fn test_service_worker_parse() {
        assert_eq!("activating".parse::<ServiceWorkerState>().unwrap(), Activating);
        let err = "parsed".parse::<ServiceWorkerState>().unwrap_err();
        assert_eq!(err.to, "parsed");
    }
}
