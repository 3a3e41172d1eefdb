//! Per-run state machine and cancellation.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use serde::{Deserialize, Serialize};

use super::summary::RunStatus;
use crate::error::PipelineError;

/// Stage a run is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Fetching,
    Validating,
    Transforming,
    Exporting,
    Done(RunStatus),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done(_))
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Pending => write!(f, "pending"),
            RunState::Fetching => write!(f, "fetching"),
            RunState::Validating => write!(f, "validating"),
            RunState::Transforming => write!(f, "transforming"),
            RunState::Exporting => write!(f, "exporting"),
            RunState::Done(status) => write!(f, "done({})", status),
        }
    }
}

/// Allowed transitions out of every non-terminal state.
///
/// Any non-terminal state may also move to `Done(Failed)`, which covers
/// cancellation at a stage boundary.
static VALID_TRANSITIONS: LazyLock<HashMap<RunState, Vec<RunState>>> = LazyLock::new(|| {
    let mut transitions = HashMap::new();
    transitions.insert(RunState::Pending, vec![RunState::Fetching]);
    transitions.insert(
        RunState::Fetching,
        vec![
            RunState::Validating,
            RunState::Done(RunStatus::NoData),
        ],
    );
    transitions.insert(
        RunState::Validating,
        vec![
            RunState::Transforming,
            RunState::Done(RunStatus::ValidationFailed),
        ],
    );
    transitions.insert(RunState::Transforming, vec![RunState::Exporting]);
    transitions.insert(RunState::Exporting, vec![RunState::Done(RunStatus::Success)]);
    transitions
});

/// Whether the state machine may move from `from` to `to`.
pub fn can_transition(from: RunState, to: RunState) -> bool {
    if from.is_terminal() {
        return false;
    }
    if to == RunState::Done(RunStatus::Failed) {
        return true;
    }
    VALID_TRANSITIONS
        .get(&from)
        .is_some_and(|targets| targets.contains(&to))
}

/// Current state of one run plus the path it took.
#[derive(Debug, Clone)]
pub struct RunStateMachine {
    state: RunState,
    history: Vec<RunState>,
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateMachine {
    pub fn new() -> Self {
        Self {
            state: RunState::Pending,
            history: vec![RunState::Pending],
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// States visited so far, starting with `Pending`.
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    /// Move to `to`.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidTransition` if the move is not allowed;
    /// the state is then unchanged.
    pub fn transition(&mut self, to: RunState) -> Result<(), PipelineError> {
        if !can_transition(self.state, to) {
            return Err(PipelineError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        tracing::debug!(from = %self.state, to = %to, "Run state transition");
        self.state = to;
        self.history.push(to);
        Ok(())
    }

    /// Terminal status, once reached.
    pub fn status(&self) -> Option<RunStatus> {
        match self.state {
            RunState::Done(status) => Some(status),
            _ => None,
        }
    }
}

/// Cooperative cancellation shared between a caller and its runs.
///
/// Runs check the flag at stage boundaries only.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
