//! Cheap token estimation for the compression trigger.
//!
//! The backend's usage metadata is authoritative; this estimator only has
//! to be good enough to notice runaway growth between turns.

use crate::llm::{Message, Part};

/// Rough chars-per-token ratio for English-heavy mixed content.
const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of a message list.
#[must_use]
pub fn estimate_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message).sum()
}

/// Estimate the token count of one message.
#[must_use]
pub fn estimate_message(message: &Message) -> usize {
    let chars: usize = message
        .parts
        .iter()
        .map(|part| match part {
            Part::Text { text } => text.len(),
            Part::FunctionCall { name, args, .. } => name.len() + args.to_string().len(),
            Part::FunctionResponse { name, payload, .. } => {
                name.len() + payload.to_string().len()
            }
            Part::InlineData { data, .. } => data.len(),
        })
        .sum();
    // Small per-message overhead for role and framing.
    chars / CHARS_PER_TOKEN + 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn longer_messages_estimate_higher() {
        let short = Message::user("hi");
        let long = Message::user("a".repeat(4_000));
        assert!(estimate_message(&long) > estimate_message(&short));
        assert!(estimate_message(&long) >= 1_000);
    }

    #[test]
    fn function_parts_are_counted() {
        let msg = Message::model(vec![Part::function_call(
            "c1",
            "read_file",
            json!({"file_path": "a-fairly-long-path/to/some/file.rs"}),
        )]);
        assert!(estimate_message(&msg) > 4);
    }

    #[test]
    fn list_estimate_is_sum() {
        let messages = vec![Message::user("one"), Message::user("two")];
        assert_eq!(
            estimate_tokens(&messages),
            estimate_message(&messages[0]) + estimate_message(&messages[1])
        );
    }
}
