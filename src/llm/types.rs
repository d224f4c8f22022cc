use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    Function,
}

/// Atomic content unit inside a [`Message`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },

    FunctionCall {
        id: String,
        name: String,
        args: Value,
    },

    FunctionResponse {
        id: String,
        name: String,
        payload: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    InlineData {
        mime_type: String,
        data: String,
    },
}

impl Part {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    #[must_use]
    pub fn function_call(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self::FunctionCall {
            id: id.into(),
            name: name.into(),
            args,
        }
    }

    #[must_use]
    pub fn function_response(id: impl Into<String>, name: impl Into<String>, payload: Value) -> Self {
        Self::FunctionResponse {
            id: id.into(),
            name: name.into(),
            payload,
            error: None,
        }
    }

    #[must_use]
    pub fn function_error(
        id: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        Self::FunctionResponse {
            id: id.into(),
            name: name.into(),
            payload: serde_json::json!({ "error": message }),
            error: Some(message),
        }
    }

    /// Synthetic response for a call that was cancelled mid-flight; keeps
    /// the history well-formed.
    #[must_use]
    pub fn function_cancelled(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::FunctionResponse {
            id: id.into(),
            name: name.into(),
            payload: serde_json::json!({ "cancelled": true }),
            error: Some("cancelled".to_string()),
        }
    }

    #[must_use]
    pub const fn is_function_call(&self) -> bool {
        matches!(self, Self::FunctionCall { .. })
    }

    #[must_use]
    pub const fn is_function_response(&self) -> bool {
        matches!(self, Self::FunctionResponse { .. })
    }
}

/// One entry in conversation history. Never mutated in place; removable
/// only by an explicit clear or by compression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            role,
            parts,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    #[must_use]
    pub fn model(parts: Vec<Part>) -> Self {
        Self::new(Role::Model, parts)
    }

    #[must_use]
    pub fn function(parts: Vec<Part>) -> Self {
        Self::new(Role::Function, parts)
    }

    /// Concatenated text of all text parts.
    #[must_use]
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn function_calls(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.parts.iter().filter_map(|p| match p {
            Part::FunctionCall { id, name, args } => Some((id.as_str(), name.as_str(), args)),
            _ => None,
        })
    }

    /// Whether any part is a function call or response. Used by the router
    /// to pick "clean" turns for classification.
    #[must_use]
    pub fn has_function_parts(&self) -> bool {
        self.parts
            .iter()
            .any(|p| p.is_function_call() || p.is_function_response())
    }
}

/// Declaration of a callable advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One request to the model backend.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Option<Vec<FunctionDeclaration>>,
    pub max_tokens: u32,
}

/// Why a model stream ended.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    EndTurn,
    FunctionCall,
    MaxTokens,
    StopSequence,
}
