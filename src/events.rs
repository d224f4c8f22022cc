//! Events emitted by the agent executor toward the embedding UI.
//!
//! Scheduler events (state changes, approval requests, streamed tool
//! output) travel on their own channel, see
//! [`crate::scheduler::SchedulerEvent`]. One producer, one consumer:
//! ordering is explicit and backpressure observable.

use crate::types::{AgentOutcome, TokenUsage};
use serde::{Deserialize, Serialize};

/// Events from an agent run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A model turn is starting.
    TurnStart { turn: usize },

    /// Which model the router picked for this turn.
    Routed {
        model: String,
        source: String,
        reasoning: Option<String>,
    },

    /// A streamed text fragment from the model.
    TextDelta { delta: String },

    /// The complete text of one model turn.
    Text { text: String },

    /// A hook surfaced a message for the user channel.
    SystemMessage { message: String },

    /// One model round-trip finished.
    TurnComplete { turn: usize, usage: TokenUsage },

    /// History was compressed.
    ContextCompressed {
        original_count: usize,
        new_count: usize,
        original_tokens: usize,
        new_tokens: usize,
    },

    /// The run reached a terminal state.
    Done { outcome: AgentOutcome },

    /// The run aborted with an error.
    Error { message: String },
}

impl AgentEvent {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
