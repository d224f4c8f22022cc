//! Chat session: immutable history, streaming requests to the model
//! backend, and optional history compression.
//!
//! The session owns its history; appends and compression are the only
//! mutations and both run on `&mut self`, so they are serialized by
//! construction. Retries wrap the whole transport request, never single
//! chunks.

pub mod compactor;
pub mod estimator;

use crate::llm::{
    ChatRequest, FinishReason, Message, ModelProvider, Part, ProviderError, StreamAccumulator,
    StreamDelta,
};
use crate::types::{EngineError, RetryConfig, TokenUsage};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use compactor::{CompressionStats, SUMMARY_PREFIX};

/// Configuration for one chat session.
#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub model: String,
    pub max_tokens: u32,
    pub retry: RetryConfig,
    /// Fraction of the context window that triggers auto-compression.
    pub compress_threshold: f64,
    /// Recent messages kept intact by compression.
    pub retain_recent: usize,
    /// Minimum history length before compression is considered.
    pub min_messages_for_compression: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            max_tokens: 8_192,
            retry: RetryConfig::default(),
            compress_threshold: 0.7,
            retain_recent: 6,
            min_messages_for_compression: 12,
        }
    }
}

/// Collected output of one model turn.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub parts: Vec<Part>,
    pub text: String,
    /// `(id, name, args)` triples, in stream order.
    pub function_calls: Vec<(String, String, Value)>,
    pub usage: TokenUsage,
    pub finish: Option<FinishReason>,
}

/// One conversation with the model backend.
pub struct ChatSession {
    provider: Arc<dyn ModelProvider>,
    system_instruction: String,
    declarations: Vec<crate::llm::FunctionDeclaration>,
    history: Vec<Message>,
    config: ChatConfig,
    total_usage: TokenUsage,
    last_turn_tokens: u32,
}

impl ChatSession {
    #[must_use]
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        system_instruction: impl Into<String>,
        declarations: Vec<crate::llm::FunctionDeclaration>,
        config: ChatConfig,
    ) -> Self {
        Self {
            provider,
            system_instruction: system_instruction.into(),
            declarations,
            history: Vec::new(),
            config,
            total_usage: TokenUsage::default(),
            last_turn_tokens: 0,
        }
    }

    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn append(&mut self, message: Message) {
        self.history.push(message);
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.last_turn_tokens = 0;
    }

    #[must_use]
    pub const fn total_usage(&self) -> &TokenUsage {
        &self.total_usage
    }

    #[must_use]
    pub fn model(&self) -> &str {
        if self.config.model.is_empty() {
            self.provider.model()
        } else {
            &self.config.model
        }
    }

    /// Replace the model used for subsequent requests (routing decisions
    /// land here).
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.config.model = model.into();
    }

    /// Swap the backend serving this session, keeping history intact.
    pub fn set_provider(&mut self, provider: Arc<dyn ModelProvider>) {
        self.provider = provider;
    }

    /// Replace the advertised tool declarations.
    pub fn set_declarations(&mut self, declarations: Vec<crate::llm::FunctionDeclaration>) {
        self.declarations = declarations;
    }

    /// Drop advertised declarations the predicate rejects. Used by the
    /// tool-selection hook to narrow the tool list for a turn.
    pub fn narrow_declarations<F: Fn(&str) -> bool>(&mut self, keep: F) {
        self.declarations.retain(|d| keep(&d.name));
    }

    /// Send a message and stream the response.
    ///
    /// Text fragments are forwarded to `delta_tx` as they arrive; function
    /// calls surface only once the backend finalizes them. On success the
    /// sent message and the model reply are appended to history.
    ///
    /// # Errors
    /// `Cancelled` when the token is set, `QuotaExceeded` on quota
    /// exhaustion, `Transport` after the retry policy is spent or on a
    /// non-retryable request error.
    pub async fn send(
        &mut self,
        message: Message,
        cancel: &CancellationToken,
        delta_tx: Option<mpsc::Sender<String>>,
    ) -> Result<ModelOutput, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let mut request_messages = self.history.clone();
        request_messages.push(message.clone());

        let request = ChatRequest {
            model: self.model().to_string(),
            system: self.system_instruction.clone(),
            messages: request_messages,
            tools: if self.declarations.is_empty() {
                None
            } else {
                Some(self.declarations.clone())
            },
            max_tokens: self.config.max_tokens,
        };

        let output = self.send_with_retry(request, cancel, delta_tx).await?;

        self.history.push(message);
        self.history.push(Message::model(output.parts.clone()));
        self.total_usage.add(&output.usage);
        self.last_turn_tokens = output.usage.total();

        Ok(output)
    }

    async fn send_with_retry(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
        delta_tx: Option<mpsc::Sender<String>>,
    ) -> Result<ModelOutput, EngineError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let error = match self.provider.stream_chat(request.clone()).await {
                Ok(stream) => {
                    match drive_stream(stream, cancel, delta_tx.as_ref()).await {
                        Ok(output) => return Ok(output),
                        Err(e) => e,
                    }
                }
                Err(e) => e,
            };

            match error {
                ProviderError::QuotaExhausted(msg) => {
                    return Err(EngineError::QuotaExceeded(msg));
                }
                ProviderError::InvalidRequest(msg) => {
                    return Err(EngineError::Transport(format!("invalid request: {msg}")));
                }
                retryable if retryable.is_retryable() => {
                    if attempt >= self.config.retry.max_attempts {
                        return Err(EngineError::Transport(format!(
                            "{retryable} after {attempt} attempts"
                        )));
                    }
                    let delay = self.config.retry.backoff_delay(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %retryable,
                        "transient transport failure, retrying after backoff"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = cancel.cancelled() => return Err(EngineError::Cancelled),
                    }
                }
                other => return Err(EngineError::Transport(other.to_string())),
            }
        }
    }

    /// Whether the last reported usage crossed the compression threshold.
    #[must_use]
    pub fn needs_compression(&self) -> bool {
        if self.history.len() < self.config.min_messages_for_compression {
            return false;
        }
        let budget =
            (f64::from(self.provider.context_window()) * self.config.compress_threshold) as u32;
        self.last_turn_tokens >= budget
            || estimator::estimate_tokens(&self.history) as u32 >= budget
    }

    /// Replace older turns with a single structured summary message.
    ///
    /// # Errors
    /// Propagates transport failures from the summarization request.
    pub async fn compress(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<CompressionStats, EngineError> {
        let stats = compactor::compress_history(
            self.provider.as_ref(),
            &mut self.history,
            self.config.retain_recent,
            cancel,
        )
        .await?;
        self.last_turn_tokens = 0;
        tracing::info!(
            original_count = stats.original_count,
            new_count = stats.new_count,
            original_tokens = stats.original_tokens,
            new_tokens = stats.new_tokens,
            "history compressed"
        );
        Ok(stats)
    }
}

/// Drive one response stream to completion.
async fn drive_stream(
    mut stream: crate::llm::StreamBox<'static>,
    cancel: &CancellationToken,
    delta_tx: Option<&mpsc::Sender<String>>,
) -> Result<ModelOutput, ProviderError> {
    let mut accumulator = StreamAccumulator::new();

    loop {
        let item = tokio::select! {
            item = stream.next() => item,
            () = cancel.cancelled() => {
                // Surfaced as a network-class error; the retry loop maps a
                // set token to Cancelled before retrying.
                return Err(ProviderError::Network("cancelled".to_string()));
            }
        };
        let Some(item) = item else { break };
        let delta = item?;
        if let (StreamDelta::TextDelta { delta: text, .. }, Some(tx)) = (&delta, delta_tx) {
            let _ = tx.send(text.clone()).await;
        }
        let done = matches!(delta, StreamDelta::Done { .. });
        accumulator.apply(&delta);
        if done {
            break;
        }
    }

    let usage = accumulator.usage().cloned().unwrap_or_default();
    let finish = accumulator.finish_reason();
    let parts = accumulator.into_parts();

    let text = parts
        .iter()
        .filter_map(|p| match p {
            Part::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    let function_calls = parts
        .iter()
        .filter_map(|p| match p {
            Part::FunctionCall { id, name, args } => {
                Some((id.clone(), name.clone(), args.clone()))
            }
            _ => None,
        })
        .collect();

    Ok(ModelOutput {
        parts,
        text,
        function_calls,
        usage,
        finish,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted outcome for one `stream_chat` call.
    pub enum Scripted {
        Text(&'static str),
        Calls(Vec<(&'static str, &'static str, Value)>),
        TextAndCalls(&'static str, Vec<(&'static str, &'static str, Value)>),
        Fail(ProviderError),
    }

    /// Provider that replays scripted outcomes in order. Once the script
    /// is exhausted it answers with plain text.
    pub struct ScriptedProvider {
        script: Mutex<Vec<Scripted>>,
        pub calls: AtomicUsize,
        window: u32,
    }

    impl ScriptedProvider {
        pub fn new(script: Vec<Scripted>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
                window: 200_000,
            }
        }

        pub fn with_context_window(mut self, window: u32) -> Self {
            self.window = window;
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn deltas_for(outcome: &Scripted) -> Result<Vec<StreamDelta>, ProviderError> {
            let mut deltas = Vec::new();
            match outcome {
                Scripted::Fail(e) => return Err(e.clone()),
                Scripted::Text(text) => {
                    // Split to exercise delta accumulation.
                    let mid = text.len() / 2;
                    deltas.push(StreamDelta::TextDelta {
                        delta: text[..mid].to_string(),
                        block_index: 0,
                    });
                    deltas.push(StreamDelta::TextDelta {
                        delta: text[mid..].to_string(),
                        block_index: 0,
                    });
                }
                Scripted::Calls(calls) => {
                    for (i, (id, name, args)) in calls.iter().enumerate() {
                        deltas.push(StreamDelta::FunctionCallStart {
                            id: Some((*id).to_string()),
                            name: (*name).to_string(),
                            block_index: i,
                        });
                        deltas.push(StreamDelta::FunctionArgsDelta {
                            delta: args.to_string(),
                            block_index: i,
                        });
                    }
                }
                Scripted::TextAndCalls(text, calls) => {
                    deltas.push(StreamDelta::TextDelta {
                        delta: (*text).to_string(),
                        block_index: 0,
                    });
                    for (i, (id, name, args)) in calls.iter().enumerate() {
                        deltas.push(StreamDelta::FunctionCallStart {
                            id: Some((*id).to_string()),
                            name: (*name).to_string(),
                            block_index: i + 1,
                        });
                        deltas.push(StreamDelta::FunctionArgsDelta {
                            delta: args.to_string(),
                            block_index: i + 1,
                        });
                    }
                }
            }
            let has_calls = matches!(outcome, Scripted::Calls(_) | Scripted::TextAndCalls(..));
            deltas.push(StreamDelta::Usage(TokenUsage {
                input_tokens: 10,
                output_tokens: 20,
            }));
            deltas.push(StreamDelta::Done {
                finish: Some(if has_calls {
                    FinishReason::FunctionCall
                } else {
                    FinishReason::EndTurn
                }),
            });
            Ok(deltas)
        }
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        async fn stream_chat(
            &self,
            _request: ChatRequest,
        ) -> Result<crate::llm::StreamBox<'static>, ProviderError> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            let script = self.script.lock().unwrap();
            let deltas = if index < script.len() {
                Self::deltas_for(&script[index])?
            } else {
                Self::deltas_for(&Scripted::Text("Done"))?
            };
            drop(script);
            Ok(Box::pin(futures::stream::iter(
                deltas.into_iter().map(Ok),
            )))
        }

        fn model(&self) -> &'static str {
            "scripted-model"
        }

        fn context_window(&self) -> u32 {
            self.window
        }
    }
}
