//! Event payload construction.
//!
//! Every hook subprocess receives the envelope
//! `{session_id, transcript_path, cwd, hook_event_name, timestamp}` plus
//! event-specific fields merged on top.

use crate::types::SessionId;
use serde_json::{Map, Value, json};
use std::path::Path;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::config::HookEvent;

/// Builder for one event's payload.
pub struct PayloadBuilder {
    fields: Map<String, Value>,
}

impl PayloadBuilder {
    #[must_use]
    pub fn new(
        session_id: &SessionId,
        transcript_path: &Path,
        cwd: &Path,
        event: HookEvent,
    ) -> Self {
        let mut fields = Map::new();
        fields.insert("session_id".to_string(), json!(session_id.to_string()));
        fields.insert(
            "transcript_path".to_string(),
            json!(transcript_path.display().to_string()),
        );
        fields.insert("cwd".to_string(), json!(cwd.display().to_string()));
        fields.insert("hook_event_name".to_string(), json!(event.as_str()));
        fields.insert(
            "timestamp".to_string(),
            json!(
                OffsetDateTime::now_utc()
                    .format(&Rfc3339)
                    .unwrap_or_default()
            ),
        );
        Self { fields }
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    /// Merge an object of event-specific fields on top of the envelope.
    #[must_use]
    pub fn merge(mut self, extra: Value) -> Self {
        if let Value::Object(map) = extra {
            for (key, value) in map {
                self.fields.insert(key, value);
            }
        }
        self
    }

    #[must_use]
    pub fn tool(self, name: &str, input: &Value) -> Self {
        self.with("tool_name", json!(name))
            .with("tool_input", input.clone())
    }

    #[must_use]
    pub fn tool_response(self, response: &Value) -> Self {
        self.with("tool_response", response.clone())
    }

    #[must_use]
    pub fn llm_request(self, request: &Value) -> Self {
        self.with("llm_request", request.clone())
    }

    #[must_use]
    pub fn llm_response(self, response: &Value) -> Self {
        self.with("llm_response", response.clone())
    }

    #[must_use]
    pub fn trigger(self, trigger: &str) -> Self {
        self.with("trigger", json!(trigger))
    }

    #[must_use]
    pub fn reason(self, reason: &str) -> Self {
        self.with("reason", json!(reason))
    }

    #[must_use]
    pub fn prompt(self, prompt: &str) -> Self {
        self.with("prompt", json!(prompt))
    }

    #[must_use]
    pub fn notification(self, kind: &str, message: &str, details: Value) -> Self {
        self.with("notification_type", json!(kind))
            .with("message", json!(message))
            .with("details", details)
    }

    #[must_use]
    pub fn build(self) -> Value {
        Value::Object(self.fields)
    }
}
