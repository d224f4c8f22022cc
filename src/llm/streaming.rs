//! Streaming deltas from the model backend.
//!
//! Backends yield [`StreamDelta`] events; [`StreamAccumulator`] collects
//! them into final message parts. Function-call arguments may arrive as
//! incremental JSON fragments, but a call only surfaces to the rest of the
//! engine once the backend finalizes it — partial calls never escape the
//! accumulator.

use crate::llm::types::{FinishReason, Part};
use crate::types::TokenUsage;
use futures::Stream;
use std::pin::Pin;
use uuid::Uuid;

/// Events yielded during a streaming model response.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    /// A text fragment.
    TextDelta { delta: String, block_index: usize },

    /// Start of a function call (name known, args streaming).
    FunctionCallStart {
        id: Option<String>,
        name: String,
        block_index: usize,
    },

    /// Incremental JSON for the pending call's arguments.
    FunctionArgsDelta { delta: String, block_index: usize },

    /// Usage counters, typically at stream end.
    Usage(TokenUsage),

    /// Stream completed.
    Done { finish: Option<FinishReason> },
}

/// Boxed stream of deltas as produced by a [`super::ModelProvider`].
pub type StreamBox<'a> =
    Pin<Box<dyn Stream<Item = Result<StreamDelta, super::ProviderError>> + Send + 'a>>;

#[derive(Debug, Default)]
struct CallAccumulator {
    id: Option<String>,
    name: String,
    args_json: String,
    block_index: usize,
}

/// Collects stream deltas into final parts.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text_blocks: Vec<(usize, String)>,
    calls: Vec<CallAccumulator>,
    usage: Option<TokenUsage>,
    finish: Option<FinishReason>,
}

impl StreamAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, delta: &StreamDelta) {
        match delta {
            StreamDelta::TextDelta { delta, block_index } => {
                if let Some((_, text)) = self
                    .text_blocks
                    .iter_mut()
                    .find(|(idx, _)| idx == block_index)
                {
                    text.push_str(delta);
                } else {
                    self.text_blocks.push((*block_index, delta.clone()));
                }
            }
            StreamDelta::FunctionCallStart {
                id,
                name,
                block_index,
            } => {
                self.calls.push(CallAccumulator {
                    id: id.clone(),
                    name: name.clone(),
                    args_json: String::new(),
                    block_index: *block_index,
                });
            }
            StreamDelta::FunctionArgsDelta { delta, block_index } => {
                if let Some(call) = self
                    .calls
                    .iter_mut()
                    .find(|c| c.block_index == *block_index)
                {
                    call.args_json.push_str(delta);
                }
            }
            StreamDelta::Usage(usage) => {
                self.usage = Some(usage.clone());
            }
            StreamDelta::Done { finish } => {
                self.finish = *finish;
            }
        }
    }

    #[must_use]
    pub const fn usage(&self) -> Option<&TokenUsage> {
        self.usage.as_ref()
    }

    #[must_use]
    pub const fn finish_reason(&self) -> Option<FinishReason> {
        self.finish
    }

    /// Convert accumulated content into final parts in block order.
    ///
    /// Call ids missing from the backend are minted here so that every
    /// function call maps to exactly one scheduler record. Unparseable
    /// argument JSON yields a null-args call, which parameter validation
    /// rejects downstream.
    #[must_use]
    pub fn into_parts(self) -> Vec<Part> {
        let mut blocks: Vec<(usize, Part)> = Vec::new();

        for (idx, text) in self.text_blocks {
            if !text.is_empty() {
                blocks.push((idx, Part::Text { text }));
            }
        }

        for call in self.calls {
            let args: serde_json::Value =
                serde_json::from_str(&call.args_json).unwrap_or(serde_json::Value::Null);
            let id = call
                .id
                .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
            blocks.push((
                call.block_index,
                Part::FunctionCall {
                    id,
                    name: call.name,
                    args,
                },
            ));
        }

        blocks.sort_by_key(|(idx, _)| *idx);
        blocks.into_iter().map(|(_, part)| part).collect()
    }
}
