//! Pipeline state machine.
//!
//! ```text
//! Init -> Acquired -> Executed -> Reported -> Uploaded -> Done
//!   \________\___________\___________\
//!                                     -> Failed { step, cause }
//! ```
//!
//! `Done` and `Failed` are terminal.

use crate::result::{PipelineError, Step};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Where a run currently stands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    /// Nothing has run yet
    Init,
    /// Coverage tool resolved
    Acquired,
    /// Instrumented test suite passed
    Executed,
    /// Report written and validated
    Reported,
    /// Report accepted by the backend
    Uploaded,
    /// Run complete
    Done,
    /// A step failed; the run stopped there
    Failed {
        /// Step that failed
        step: Step,
        /// Rendered cause
        cause: String,
    },
}

/// A transition the state machine forbids
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot move from {from} to {to}")]
pub struct InvalidTransition {
    /// State the run was in
    pub from: String,
    /// State that was requested
    pub to: String,
}

impl From<InvalidTransition> for PipelineError {
    fn from(err: InvalidTransition) -> Self {
        Self::InvalidTransition(err.to_string())
    }
}

impl PipelineState {
    /// Short lowercase name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Acquired => "acquired",
            Self::Executed => "executed",
            Self::Reported => "reported",
            Self::Uploaded => "uploaded",
            Self::Done => "done",
            Self::Failed { .. } => "failed",
        }
    }

    /// The step that runs from this state, if any
    #[must_use]
    pub const fn next_step(&self) -> Option<Step> {
        match self {
            Self::Init => Some(Step::Acquire),
            Self::Acquired => Some(Step::Execute),
            Self::Executed => Some(Step::Report),
            Self::Reported => Some(Step::Upload),
            Self::Uploaded | Self::Done | Self::Failed { .. } => None,
        }
    }

    /// Whether no further transition is possible
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }

    /// The state reached when the current step succeeds
    ///
    /// # Errors
    ///
    /// Returns error from a terminal state
    pub fn advance(&self) -> Result<Self, InvalidTransition> {
        let next = match self {
            Self::Init => Self::Acquired,
            Self::Acquired => Self::Executed,
            Self::Executed => Self::Reported,
            Self::Reported => Self::Uploaded,
            Self::Uploaded => Self::Done,
            Self::Done | Self::Failed { .. } => {
                return Err(self.invalid("the next state"));
            }
        };
        Ok(next)
    }

    /// The state reached when the current step fails
    ///
    /// # Errors
    ///
    /// Returns error when no step runs from this state
    pub fn fail(&self, cause: impl Into<String>) -> Result<Self, InvalidTransition> {
        self.next_step()
            .map(|step| Self::Failed {
                step,
                cause: cause.into(),
            })
            .ok_or_else(|| self.invalid("failed"))
    }

    /// Whether `next` is a legal successor of this state
    #[must_use]
    pub fn can_transition_to(&self, next: &Self) -> bool {
        match next {
            Self::Failed { step, .. } => self.next_step() == Some(*step),
            _ => self.advance().is_ok_and(|s| &s == next),
        }
    }

    fn invalid(&self, to: &str) -> InvalidTransition {
        InvalidTransition {
            from: self.name().to_string(),
            to: to.to_string(),
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { step, .. } => write!(f, "failed({step})"),
            other => f.write_str(other.name()),
        }
    }
}
