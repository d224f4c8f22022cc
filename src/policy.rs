//! Declarative tool execution policy.
//!
//! The policy engine answers allow / deny / ask-user for a (tool, params)
//! pair. Rules are keyed by tool name; tools without a rule fall back to
//! their kind: mutators ask, the rest are allowed. Exclusion globs let an
//! `always_allow` rule carve out paths that still require approval, and a
//! trusted-folders set upgrades ask-user to allow for mutators when the
//! working directory is trusted.

use crate::types::ToolKind;
use crate::util::glob_match;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Answer for one policy check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny { reason: String },
    AskUser,
}

/// Configured mode for a tool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    AlwaysAllow,
    AlwaysDeny,
    AskUser,
}

/// One rule in the policy table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyRule {
    pub mode: PolicyMode,
    /// Glob patterns over path-like parameters; a match downgrades an
    /// `always_allow` rule to ask-user.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Reason reported on denial.
    #[serde(default)]
    pub reason: Option<String>,
}

impl PolicyRule {
    #[must_use]
    pub const fn allow() -> Self {
        Self {
            mode: PolicyMode::AlwaysAllow,
            exclude: Vec::new(),
            reason: None,
        }
    }

    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            mode: PolicyMode::AlwaysDeny,
            exclude: Vec::new(),
            reason: Some(reason.into()),
        }
    }

    #[must_use]
    pub const fn ask() -> Self {
        Self {
            mode: PolicyMode::AskUser,
            exclude: Vec::new(),
            reason: None,
        }
    }

    #[must_use]
    pub fn with_exclusions(mut self, patterns: Vec<String>) -> Self {
        self.exclude = patterns;
        self
    }
}

/// The policy table plus the trusted-folders set.
#[derive(Clone, Debug, Default)]
pub struct PolicyEngine {
    rules: HashMap<String, PolicyRule>,
    trusted_folders: Vec<PathBuf>,
}

impl PolicyEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rule(&mut self, tool_name: impl Into<String>, rule: PolicyRule) {
        self.rules.insert(tool_name.into(), rule);
    }

    pub fn trust_folder(&mut self, folder: impl Into<PathBuf>) {
        self.trusted_folders.push(folder.into());
    }

    #[must_use]
    pub fn is_trusted(&self, cwd: &Path) -> bool {
        self.trusted_folders.iter().any(|f| cwd.starts_with(f))
    }

    /// Evaluate the policy for one call.
    #[must_use]
    pub fn check(
        &self,
        tool_name: &str,
        kind: ToolKind,
        params: &Value,
        cwd: &Path,
    ) -> PolicyDecision {
        match self.rules.get(tool_name) {
            None => {
                if kind.is_mutator() {
                    self.ask_or_trusted(kind, cwd)
                } else {
                    PolicyDecision::Allow
                }
            }
            Some(rule) => match rule.mode {
                PolicyMode::AlwaysDeny => PolicyDecision::Deny {
                    reason: rule
                        .reason
                        .clone()
                        .unwrap_or_else(|| format!("tool '{tool_name}' is denied by policy")),
                },
                PolicyMode::AlwaysAllow => {
                    if excluded_path_matches(&rule.exclude, params) {
                        // An exclusion match is a deliberate opt-out; the
                        // trusted-folder upgrade does not apply here.
                        PolicyDecision::AskUser
                    } else {
                        PolicyDecision::Allow
                    }
                }
                PolicyMode::AskUser => self.ask_or_trusted(kind, cwd),
            },
        }
    }

    fn ask_or_trusted(&self, kind: ToolKind, cwd: &Path) -> PolicyDecision {
        if kind.is_mutator() && self.is_trusted(cwd) {
            PolicyDecision::Allow
        } else {
            PolicyDecision::AskUser
        }
    }
}

/// Collect parameter values that look like filesystem paths.
fn path_like_params(params: &Value) -> Vec<&str> {
    const PATH_KEYS: &[&str] = &["path", "file_path", "directory", "dir", "target", "source"];

    let Some(obj) = params.as_object() else {
        return Vec::new();
    };

    obj.iter()
        .filter_map(|(key, value)| {
            let s = value.as_str()?;
            if PATH_KEYS.contains(&key.as_str()) || s.contains('/') {
                Some(s)
            } else {
                None
            }
        })
        .collect()
}

fn excluded_path_matches(patterns: &[String], params: &Value) -> bool {
    let paths = path_like_params(params);
    patterns
        .iter()
        .any(|pattern| paths.iter().any(|path| glob_match(pattern, path)))
}
