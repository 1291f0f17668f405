use crate::result::StepResult;
use thiserror::Error;
use uni_llm::{LlmError, Message};

/// Committed state of a run at the moment it stopped. Holds only whole steps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSnapshot {
    pub steps: Vec<StepResult>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Error)]
pub enum AgentError {
    /// Rejected before any model call.
    #[error("invalid agent configuration: {0}")]
    Configuration(String),

    #[error("model call failed after {} completed step(s): {source}", .snapshot.steps.len())]
    Generation {
        #[source]
        source: LlmError,
        snapshot: RunSnapshot,
    },

    #[error("run cancelled after {} completed step(s)", .snapshot.steps.len())]
    Cancelled { snapshot: RunSnapshot },
}

impl AgentError {
    pub fn snapshot(&self) -> Option<&RunSnapshot> {
        match self {
            Self::Configuration(_) => None,
            Self::Generation { snapshot, .. } | Self::Cancelled { snapshot } => Some(snapshot),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
