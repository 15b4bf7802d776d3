use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::response::ProcessingStatus;

/// States of one invocation.
///
/// AUTHENTICATING → FETCHING → CLASSIFYING → DONE | RETRY_INVOCATION | FAIL,
/// with FETCHING → AUTHENTICATING whenever credentials must be refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverState {
    Authenticating,
    Fetching,
    Classifying,
    Done,
    RetryInvocation,
    Fail,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverState::Authenticating => write!(f, "AUTHENTICATING"),
            DriverState::Fetching => write!(f, "FETCHING"),
            DriverState::Classifying => write!(f, "CLASSIFYING"),
            DriverState::Done => write!(f, "DONE"),
            DriverState::RetryInvocation => write!(f, "RETRY_INVOCATION"),
            DriverState::Fail => write!(f, "FAIL"),
        }
    }
}

impl DriverState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DriverState::Done | DriverState::RetryInvocation | DriverState::Fail
        )
    }

    fn allows(&self, next: DriverState) -> bool {
        use DriverState::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Authenticating, Fetching)
                | (Authenticating, Fail)
                | (Fetching, Authenticating)
                | (Fetching, Classifying)
                | (Fetching, Fail)
                | (Classifying, Done)
                | (Classifying, RetryInvocation)
                | (Classifying, Fail)
        )
    }

    /// Terminal state for a classification outcome.
    pub fn after_classification(status: ProcessingStatus) -> DriverState {
        match status {
            ProcessingStatus::Succeeded => DriverState::Done,
            ProcessingStatus::InProgress | ProcessingStatus::InvalidApiResponse => {
                DriverState::RetryInvocation
            }
            ProcessingStatus::Terminated | ProcessingStatus::Failed => DriverState::Fail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal state transition {from} -> {to}")]
pub struct TransitionError {
    pub from: DriverState,
    pub to: DriverState,
}

/// Current state plus every state visited before it.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: DriverState,
    history: Vec<DriverState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: DriverState::Authenticating,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn advance(&mut self, next: DriverState) -> Result<(), TransitionError> {
        if !self.state.allows(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        self.history.push(self.state);
        self.state = next;
        Ok(())
    }

    /// Every state in visiting order, current one last.
    pub fn transitions(&self) -> Vec<DriverState> {
        let mut all = self.history.clone();
        all.push(self.state);
        all
    }
}
