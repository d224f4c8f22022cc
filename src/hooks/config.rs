//! Hook declarations and the registry that loads them.
//!
//! Settings schema:
//!
//! ```json
//! {
//!   "hooks": {
//!     "BeforeTool": [
//!       {
//!         "matcher": "edit|write_file",
//!         "sequential": false,
//!         "hooks": [
//!           { "type": "command", "command": "check-path.sh", "timeout": 5000 }
//!         ]
//!       }
//!     ]
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default per-command timeout.
pub const DEFAULT_HOOK_TIMEOUT_MS: u64 = 60_000;

/// Lifecycle events hooks can attach to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookEvent {
    SessionStart,
    SessionEnd,
    BeforeAgent,
    AfterAgent,
    BeforeModel,
    AfterModel,
    BeforeToolSelection,
    BeforeTool,
    AfterTool,
    PreCompress,
    Notification,
}

impl HookEvent {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SessionStart => "SessionStart",
            Self::SessionEnd => "SessionEnd",
            Self::BeforeAgent => "BeforeAgent",
            Self::AfterAgent => "AfterAgent",
            Self::BeforeModel => "BeforeModel",
            Self::AfterModel => "AfterModel",
            Self::BeforeToolSelection => "BeforeToolSelection",
            Self::BeforeTool => "BeforeTool",
            Self::AfterTool => "AfterTool",
            Self::PreCompress => "PreCompress",
            Self::Notification => "Notification",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SessionStart" => Some(Self::SessionStart),
            "SessionEnd" => Some(Self::SessionEnd),
            "BeforeAgent" => Some(Self::BeforeAgent),
            "AfterAgent" => Some(Self::AfterAgent),
            "BeforeModel" => Some(Self::BeforeModel),
            "AfterModel" => Some(Self::AfterModel),
            "BeforeToolSelection" => Some(Self::BeforeToolSelection),
            "BeforeTool" => Some(Self::BeforeTool),
            "AfterTool" => Some(Self::AfterTool),
            "PreCompress" => Some(Self::PreCompress),
            "Notification" => Some(Self::Notification),
            _ => None,
        }
    }
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a hook entry was declared. Ordering is priority: Project first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookSource {
    Project,
    User,
    Extension,
}

/// One command inside a hook entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HookCommand {
    pub command: String,
    pub timeout_ms: u64,
}

/// A registered lifecycle hook.
#[derive(Clone, Debug)]
pub struct HookEntry {
    pub event: HookEvent,
    /// Regex (with literal fallback) tested against the event context.
    /// `None` matches all contexts for the event.
    pub matcher: Option<String>,
    pub sequential: bool,
    pub commands: Vec<HookCommand>,
    pub source: HookSource,
    pub enabled: bool,
}

/// Raw settings-file shapes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawHookEntry {
    #[serde(default)]
    pub matcher: Option<String>,
    #[serde(default)]
    pub sequential: bool,
    #[serde(default)]
    pub hooks: Vec<RawHookCommand>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawHookCommand {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// All loaded hook entries, ordered by source priority.
#[derive(Clone, Debug, Default)]
pub struct HookRegistry {
    entries: Vec<HookEntry>,
}

impl HookRegistry {
    /// Load from the layered raw declarations. Project entries come first,
    /// then user, then extensions; conflicts do not override, all matching
    /// hooks run.
    #[must_use]
    pub fn load(
        project: &HashMap<String, Vec<RawHookEntry>>,
        user: &HashMap<String, Vec<RawHookEntry>>,
        extensions: &HashMap<String, Vec<RawHookEntry>>,
    ) -> Self {
        let mut registry = Self::default();
        registry.load_source(project, HookSource::Project);
        registry.load_source(user, HookSource::User);
        registry.load_source(extensions, HookSource::Extension);
        registry
    }

    fn load_source(&mut self, raw: &HashMap<String, Vec<RawHookEntry>>, source: HookSource) {
        for (event_name, entries) in raw {
            let Some(event) = HookEvent::parse(event_name) else {
                tracing::warn!(event = %event_name, "unknown hook event, skipping");
                continue;
            };
            for raw_entry in entries {
                match validate_entry(raw_entry, event, source) {
                    Ok(entry) => self.entries.push(entry),
                    Err(reason) => {
                        tracing::warn!(event = %event_name, %reason, "rejecting hook entry");
                    }
                }
            }
        }
        // Stable priority order regardless of map iteration.
        self.entries.sort_by_key(|e| e.source);
    }

    pub fn add(&mut self, entry: HookEntry) {
        self.entries.push(entry);
        self.entries.sort_by_key(|e| e.source);
    }

    /// Enabled entries for one event, in priority order.
    #[must_use]
    pub fn entries_for(&self, event: HookEvent) -> Vec<&HookEntry> {
        self.entries
            .iter()
            .filter(|e| e.event == event && e.enabled)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn validate_entry(
    raw: &RawHookEntry,
    event: HookEvent,
    source: HookSource,
) -> Result<HookEntry, String> {
    let mut commands = Vec::new();
    for raw_command in &raw.hooks {
        if raw_command.kind != "command" {
            return Err(format!("unsupported hook type '{}'", raw_command.kind));
        }
        let command = raw_command
            .command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| "hook entry omits command".to_string())?;
        commands.push(HookCommand {
            command: command.to_string(),
            timeout_ms: raw_command.timeout.unwrap_or(DEFAULT_HOOK_TIMEOUT_MS),
        });
    }
    if commands.is_empty() {
        return Err("hook entry has no commands".to_string());
    }
    Ok(HookEntry {
        event,
        matcher: raw.matcher.clone(),
        sequential: raw.sequential,
        commands,
        source,
        enabled: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(matcher: Option<&str>, commands: Vec<(&str, &str)>) -> RawHookEntry {
        RawHookEntry {
            matcher: matcher.map(String::from),
            sequential: false,
            hooks: commands
                .into_iter()
                .map(|(kind, command)| RawHookCommand {
                    kind: kind.to_string(),
                    command: Some(command.to_string()),
                    timeout: None,
                })
                .collect(),
        }
    }

    #[test]
    fn load_orders_by_source_priority() {
        let mut user = HashMap::new();
        user.insert(
            "BeforeTool".to_string(),
            vec![raw(None, vec![("command", "user.sh")])],
        );
        let mut project = HashMap::new();
        project.insert(
            "BeforeTool".to_string(),
            vec![raw(None, vec![("command", "project.sh")])],
        );
        let mut extensions = HashMap::new();
        extensions.insert(
            "BeforeTool".to_string(),
            vec![raw(None, vec![("command", "ext.sh")])],
        );

        let registry = HookRegistry::load(&project, &user, &extensions);
        let entries = registry.entries_for(HookEvent::BeforeTool);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].source, HookSource::Project);
        assert_eq!(entries[1].source, HookSource::User);
        assert_eq!(entries[2].source, HookSource::Extension);
    }

    #[test]
    fn invalid_type_is_rejected() {
        let mut project = HashMap::new();
        project.insert(
            "BeforeTool".to_string(),
            vec![raw(None, vec![("script", "x.py")])],
        );
        let registry = HookRegistry::load(&project, &HashMap::new(), &HashMap::new());
        assert!(registry.is_empty());
    }

    #[test]
    fn missing_command_is_rejected() {
        let mut project = HashMap::new();
        project.insert(
            "AfterTool".to_string(),
            vec![RawHookEntry {
                matcher: None,
                sequential: false,
                hooks: vec![RawHookCommand {
                    kind: "command".to_string(),
                    command: None,
                    timeout: None,
                }],
            }],
        );
        let registry = HookRegistry::load(&project, &HashMap::new(), &HashMap::new());
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_event_is_skipped() {
        let mut project = HashMap::new();
        project.insert(
            "OnCoffeeBreak".to_string(),
            vec![raw(None, vec![("command", "x.sh")])],
        );
        let registry = HookRegistry::load(&project, &HashMap::new(), &HashMap::new());
        assert!(registry.is_empty());
    }

    #[test]
    fn default_timeout_applied() {
        let mut project = HashMap::new();
        project.insert(
            "Notification".to_string(),
            vec![raw(None, vec![("command", "notify.sh")])],
        );
        let registry = HookRegistry::load(&project, &HashMap::new(), &HashMap::new());
        let entries = registry.entries_for(HookEvent::Notification);
        assert_eq!(entries[0].commands[0].timeout_ms, DEFAULT_HOOK_TIMEOUT_MS);
    }

    #[test]
    fn event_name_round_trip() {
        for event in [
            HookEvent::SessionStart,
            HookEvent::SessionEnd,
            HookEvent::BeforeAgent,
            HookEvent::AfterAgent,
            HookEvent::BeforeModel,
            HookEvent::AfterModel,
            HookEvent::BeforeToolSelection,
            HookEvent::BeforeTool,
            HookEvent::AfterTool,
            HookEvent::PreCompress,
            HookEvent::Notification,
        ] {
            assert_eq!(HookEvent::parse(event.as_str()), Some(event));
        }
    }
}
