//! Layered settings.
//!
//! Precedence, lowest to highest: built-in defaults → environment
//! variables → user settings file → project settings file → command-line
//! overrides. Files are JSON; layers are deep-merged before
//! deserialization so a layer can override a single nested field.

use crate::hooks::config::RawHookEntry;
use crate::policy::PolicyRule;
use crate::types::RetryConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Name of the hidden per-project settings directory.
pub const PROJECT_DIR: &str = ".agent-engine";

/// Settings file name inside user and project directories.
pub const SETTINGS_FILE: &str = "settings.json";

/// All engine settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// User-fixed model, `auto` to let the router decide.
    pub model: String,
    pub default_model: String,
    pub fallback_model: String,
    pub flash_model: String,
    pub pro_model: String,
    pub max_tokens: u32,
    pub retry: RetryConfig,
    /// Fraction of the context window that triggers compression.
    pub compress_threshold: f64,
    pub allow_private_ips: bool,
    /// Policy rules keyed by tool name.
    pub policy: HashMap<String, PolicyRule>,
    pub trusted_folders: Vec<PathBuf>,
    /// Hook declarations keyed by event name.
    pub hooks: HashMap<String, Vec<RawHookEntry>>,
    pub max_turns: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: "auto".to_string(),
            default_model: "pro".to_string(),
            fallback_model: "flash".to_string(),
            flash_model: "flash".to_string(),
            pro_model: "pro".to_string(),
            max_tokens: 8_192,
            retry: RetryConfig::default(),
            compress_threshold: 0.7,
            allow_private_ips: false,
            policy: HashMap::new(),
            trusted_folders: Vec::new(),
            hooks: HashMap::new(),
            max_turns: 50,
        }
    }
}

impl Settings {
    /// Load all layers for a project directory.
    ///
    /// `cli_overrides` is a JSON object of final overrides from argument
    /// parsing (which itself lives outside the engine).
    #[must_use]
    pub fn layered(project_root: &Path, cli_overrides: Option<Value>) -> Self {
        let mut merged = serde_json::to_value(Self::default()).unwrap_or_default();

        apply_env_overrides(&mut merged);

        if let Some(user_file) = user_settings_path()
            && let Some(layer) = read_json_file(&user_file)
        {
            deep_merge(&mut merged, layer);
        }

        let project_file = project_root.join(PROJECT_DIR).join(SETTINGS_FILE);
        if let Some(layer) = read_json_file(&project_file) {
            deep_merge(&mut merged, layer);
        }

        if let Some(cli) = cli_overrides {
            deep_merge(&mut merged, cli);
        }

        match serde_json::from_value(merged) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(error = %e, "settings failed to deserialize, using defaults");
                Self::default()
            }
        }
    }

    /// The override model, unless it is the `auto` sentinel.
    #[must_use]
    pub fn model_override(&self) -> Option<String> {
        if self.model.is_empty() || self.model == "auto" {
            None
        } else {
            Some(self.model.clone())
        }
    }

    /// Router configuration derived from these settings.
    #[must_use]
    pub fn router_config(&self) -> crate::router::RouterConfig {
        crate::router::RouterConfig {
            default_model: self.default_model.clone(),
            fallback_model: self.fallback_model.clone(),
            flash_model: self.flash_model.clone(),
            pro_model: self.pro_model.clone(),
            override_model: self.model_override(),
        }
    }

    /// Policy engine derived from these settings.
    #[must_use]
    pub fn policy_engine(&self) -> crate::policy::PolicyEngine {
        let mut engine = crate::policy::PolicyEngine::new();
        for (tool, rule) in &self.policy {
            engine.set_rule(tool.clone(), rule.clone());
        }
        for folder in &self.trusted_folders {
            engine.trust_folder(folder.clone());
        }
        engine
    }
}

fn user_settings_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(PROJECT_DIR).join(SETTINGS_FILE))
}

fn read_json_file(path: &Path) -> Option<Value> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring malformed settings file");
            None
        }
    }
}

/// Environment layer: a handful of scalar knobs.
fn apply_env_overrides(merged: &mut Value) {
    let mappings: &[(&str, &str)] = &[
        ("AGENT_ENGINE_MODEL", "model"),
        ("AGENT_ENGINE_DEFAULT_MODEL", "default_model"),
        ("AGENT_ENGINE_FALLBACK_MODEL", "fallback_model"),
    ];
    for (var, key) in mappings {
        if let Ok(value) = std::env::var(var)
            && !value.is_empty()
            && let Some(obj) = merged.as_object_mut()
        {
            obj.insert((*key).to_string(), Value::String(value));
        }
    }
    if let Ok(value) = std::env::var("AGENT_ENGINE_ALLOW_PRIVATE_IPS")
        && let Some(obj) = merged.as_object_mut()
    {
        obj.insert(
            "allow_private_ips".to_string(),
            Value::Bool(matches!(value.as_str(), "1" | "true")),
        );
    }
}

/// Recursive object merge; non-object values replace.
fn deep_merge(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base_map), Value::Object(layer_map)) => {
            for (key, value) in layer_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, layer_value) => *base_slot = layer_value,
    }
}
