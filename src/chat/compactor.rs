//! History compression.
//!
//! Older turns are replaced by a single summary message produced by the
//! backend. The summarization prompt asks for a structured snapshot
//! (overall goal, key knowledge, file-system state, recent actions,
//! current plan) so a follow-up compression of already-compressed history
//! converges on the same fields.

use crate::llm::{
    ChatRequest, Message, ModelProvider, Part, ProviderError, Role, StreamAccumulator,
};
use crate::types::EngineError;
use futures::StreamExt;
use std::fmt::Write as _;
use tokio_util::sync::CancellationToken;

/// Marker prefix identifying an inserted summary message.
pub const SUMMARY_PREFIX: &str = "[Conversation summary]\n\n";

const SUMMARY_SYSTEM_PROMPT: &str = "You are a precise summarizer. Produce a complete snapshot of \
the conversation state so the work can continue seamlessly from the summary alone.";

const SUMMARY_REQUEST: &str = r"Summarize the conversation below as a structured snapshot with
exactly these sections:

Overall goal: what the user is ultimately trying to achieve.
Key knowledge: facts, decisions and constraints established so far.
File system state: files read, created or modified, with paths.
Recent actions: the last few operations and their outcomes.
Current plan: the concrete next steps.

Be specific about technical details (paths, names, error messages).

Conversation:
";

const MAX_RENDERED_RESPONSE_CHARS: usize = 500;

/// Result of one compression pass.
#[derive(Debug, Clone)]
pub struct CompressionStats {
    pub original_count: usize,
    pub new_count: usize,
    pub original_tokens: usize,
    pub new_tokens: usize,
}

/// Compress `history` in place, retaining the most recent `retain_recent`
/// messages intact.
///
/// # Errors
/// Propagates transport failures from the summarization request; history
/// is left untouched on failure.
pub async fn compress_history(
    provider: &dyn ModelProvider,
    history: &mut Vec<Message>,
    retain_recent: usize,
    cancel: &CancellationToken,
) -> Result<CompressionStats, EngineError> {
    let original_count = history.len();
    let original_tokens = super::estimator::estimate_tokens(history);

    let split = split_point(history, retain_recent);
    if split == 0 {
        return Ok(CompressionStats {
            original_count,
            new_count: original_count,
            original_tokens,
            new_tokens: original_tokens,
        });
    }

    let summary = summarize(provider, &history[..split], cancel).await?;

    let tail = history.split_off(split);
    history.clear();
    history.push(Message::new(
        Role::User,
        vec![Part::text(format!("{SUMMARY_PREFIX}{summary}"))],
    ));
    history.extend(tail);

    Ok(CompressionStats {
        original_count,
        new_count: history.len(),
        original_tokens,
        new_tokens: super::estimator::estimate_tokens(history),
    })
}

/// Choose how many leading messages get summarized. The split never lands
/// between a function-call message and its function-response message.
fn split_point(history: &[Message], retain_recent: usize) -> usize {
    let mut split = history.len().saturating_sub(retain_recent);
    while split > 0 && split < history.len() {
        let prev = &history[split - 1];
        let next = &history[split];
        let crosses_pair = prev.role == Role::Model
            && prev.parts.iter().any(Part::is_function_call)
            && next.role == Role::Function;
        if crosses_pair {
            split -= 1;
        } else {
            break;
        }
    }
    split
}

async fn summarize(
    provider: &dyn ModelProvider,
    messages: &[Message],
    cancel: &CancellationToken,
) -> Result<String, EngineError> {
    let request = ChatRequest {
        model: provider.model().to_string(),
        system: SUMMARY_SYSTEM_PROMPT.to_string(),
        messages: vec![Message::user(format!(
            "{SUMMARY_REQUEST}{}",
            render_transcript(messages)
        ))],
        tools: None,
        max_tokens: 2_048,
    };

    let mut stream = provider
        .stream_chat(request)
        .await
        .map_err(provider_to_engine)?;

    let mut accumulator = StreamAccumulator::new();
    loop {
        let item = tokio::select! {
            item = stream.next() => item,
            () = cancel.cancelled() => return Err(EngineError::Cancelled),
        };
        let Some(item) = item else { break };
        accumulator.apply(&item.map_err(provider_to_engine)?);
    }

    let summary = accumulator
        .into_parts()
        .into_iter()
        .filter_map(|p| match p {
            Part::Text { text } => Some(text),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");

    if summary.trim().is_empty() {
        Err(EngineError::Transport(
            "summarization returned empty output".to_string(),
        ))
    } else {
        Ok(summary)
    }
}

fn provider_to_engine(e: ProviderError) -> EngineError {
    match e {
        ProviderError::QuotaExhausted(msg) => EngineError::QuotaExceeded(msg),
        other => EngineError::Transport(other.to_string()),
    }
}

/// Render history as plain text for the summarizer, clipping bulky
/// function responses.
fn render_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        let role = match message.role {
            Role::User => "user",
            Role::Model => "model",
            Role::Function => "function",
        };
        for part in &message.parts {
            match part {
                Part::Text { text } => {
                    let _ = writeln!(out, "{role}: {text}");
                }
                Part::FunctionCall { name, args, .. } => {
                    let _ = writeln!(out, "{role}: [call {name} {args}]");
                }
                Part::FunctionResponse { name, payload, .. } => {
                    let rendered = payload.to_string();
                    let clipped = crate::util::truncate(&rendered, MAX_RENDERED_RESPONSE_CHARS);
                    let _ = writeln!(out, "{role}: [result {name} {clipped}]");
                }
                Part::InlineData { mime_type, .. } => {
                    let _ = writeln!(out, "{role}: [inline data {mime_type}]");
                }
            }
        }
    }
    out
}
