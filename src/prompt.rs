//! System instruction assembly.
//!
//! The instruction is built from named sections selected by the enabled
//! tools, the sandbox posture, and whether the working directory is a git
//! repository. Environment variables can disable individual sections or
//! replace the whole prompt with a file.

use std::collections::HashSet;
use std::path::Path;

/// Environment variable prefix honored by the builder.
pub const ENV_PREFIX: &str = "AGENT_ENGINE";

/// Sandbox posture the process runs under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SandboxMode {
    None,
    Container,
    NativeProfile(String),
}

impl SandboxMode {
    /// Parse the `<prefix>_SANDBOX` value: `false|true|container|<profile>`.
    #[must_use]
    pub fn from_env_value(value: &str) -> Self {
        match value {
            "" | "false" | "0" => Self::None,
            "true" | "container" => Self::Container,
            profile => Self::NativeProfile(profile.to_string()),
        }
    }
}

/// Inputs that shape the assembled prompt.
pub struct PromptContext {
    pub tool_names: HashSet<String>,
    pub sandbox: SandboxMode,
    pub in_git_repo: bool,
    pub user_memory: Option<String>,
}

impl PromptContext {
    #[must_use]
    pub fn new(tool_names: impl IntoIterator<Item = String>) -> Self {
        Self {
            tool_names: tool_names.into_iter().collect(),
            sandbox: SandboxMode::None,
            in_git_repo: false,
            user_memory: None,
        }
    }

    #[must_use]
    pub fn with_sandbox(mut self, sandbox: SandboxMode) -> Self {
        self.sandbox = sandbox;
        self
    }

    #[must_use]
    pub const fn with_git_repo(mut self, in_git_repo: bool) -> Self {
        self.in_git_repo = in_git_repo;
        self
    }

    #[must_use]
    pub fn with_memory(mut self, memory: Option<String>) -> Self {
        self.user_memory = memory;
        self
    }

    fn has(&self, tool: &str) -> bool {
        self.tool_names.contains(tool)
    }
}

const SECTION_NAMES: &[&str] = &[
    "preamble",
    "core_mandates",
    "primary_workflows",
    "operational_guidelines",
    "sandbox",
    "git",
    "final_reminder",
];

/// Assembles the top-level system instruction.
#[derive(Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Build the full instruction.
    ///
    /// `<prefix>_SYSTEM_MD` pointing at a readable file replaces the whole
    /// assembly; `<prefix>_PROMPT_<SECTION>=0|false` drops a section;
    /// `<prefix>_WRITE_SYSTEM_MD` dumps the computed prompt for
    /// inspection.
    #[must_use]
    pub fn build(&self, ctx: &PromptContext) -> String {
        if let Ok(path) = std::env::var(format!("{ENV_PREFIX}_SYSTEM_MD"))
            && !path.is_empty()
            && let Ok(contents) = std::fs::read_to_string(&path)
        {
            return contents;
        }

        let mut sections = Vec::new();
        for name in SECTION_NAMES {
            if !section_enabled(name) {
                continue;
            }
            if let Some(body) = self.section(name, ctx) {
                sections.push(body);
            }
        }
        let mut prompt = sections.join("\n\n");

        if let Some(memory) = ctx.user_memory.as_deref().filter(|m| !m.trim().is_empty()) {
            prompt.push_str("\n\n---\n\nUser memory:\n");
            prompt.push_str(memory);
        }

        if let Ok(dump_path) = std::env::var(format!("{ENV_PREFIX}_WRITE_SYSTEM_MD"))
            && !dump_path.is_empty()
            && dump_path != "0"
            && dump_path != "false"
        {
            if let Err(e) = std::fs::write(&dump_path, &prompt) {
                tracing::warn!(path = %dump_path, error = %e, "failed to dump system prompt");
            }
        }

        prompt
    }

    fn section(&self, name: &str, ctx: &PromptContext) -> Option<String> {
        match name {
            "preamble" => Some(
                "You are an interactive agent operating on the user's machine through tools. \
                 Be precise, be safe, and prefer taking action through tools over describing \
                 what the user should do."
                    .to_string(),
            ),
            "core_mandates" => Some(
                "# Mandates\n\
                 - Never fabricate file contents or command output; read before you claim.\n\
                 - Make the smallest change that satisfies the request.\n\
                 - Report failures honestly, including partial progress."
                    .to_string(),
            ),
            "primary_workflows" => Some(self.workflows_section(ctx)),
            "operational_guidelines" => Some(
                "# Guidelines\n\
                 - Keep responses short; the user is in a terminal.\n\
                 - Use absolute paths in tool calls.\n\
                 - Stop and ask when an operation is destructive or ambiguous."
                    .to_string(),
            ),
            "sandbox" => match &ctx.sandbox {
                SandboxMode::None => Some(
                    "# Sandbox\nYou are running directly on the user's machine with no sandbox. \
                     Be conservative with commands that modify state outside the project."
                        .to_string(),
                ),
                SandboxMode::Container => Some(
                    "# Sandbox\nYou are running inside a container. Files outside the workspace \
                     mount and most network destinations are unavailable."
                        .to_string(),
                ),
                SandboxMode::NativeProfile(profile) => Some(format!(
                    "# Sandbox\nYou are running under the '{profile}' OS sandbox profile. \
                     Operations outside the allowed set will fail with permission errors."
                )),
            },
            "git" => ctx.in_git_repo.then(|| {
                "# Git\nThe working directory is a git repository. Use focused commits with \
                 descriptive messages, and never commit unless asked."
                    .to_string()
            }),
            "final_reminder" => Some(
                "Finally: verify your work with the tools available before declaring a task \
                 complete."
                    .to_string(),
            ),
            _ => None,
        }
    }

    /// Workflow guidance varies with the tool pairs actually enabled.
    fn workflows_section(&self, ctx: &PromptContext) -> String {
        let mut body = String::from("# Workflows\n");
        if ctx.has("glob") && ctx.has("grep") {
            body.push_str(
                "- Explore before editing: locate files with glob, then narrow with grep.\n",
            );
        }
        if ctx.has("read_file") && ctx.has("edit") {
            body.push_str(
                "- Edit cycle: read the file, apply a unique-match edit, re-read to verify.\n",
            );
        }
        if ctx.has("run_shell_command") {
            body.push_str("- Validate changes by running the project's own build or tests.\n");
        }
        if ctx.has("web_fetch") {
            body.push_str("- Prefer primary sources: fetch documentation pages when unsure.\n");
        }
        if body == "# Workflows\n" {
            body.push_str("- Respond directly; no file or shell tools are enabled.\n");
        }
        body.trim_end().to_string()
    }
}

/// Returns false when `<prefix>_PROMPT_<SECTION>` disables the section.
fn section_enabled(name: &str) -> bool {
    let var = format!("{ENV_PREFIX}_PROMPT_{}", name.to_uppercase());
    match std::env::var(var) {
        Ok(value) => !matches!(value.as_str(), "0" | "false"),
        Err(_) => true,
    }
}

/// Walk upward looking for a `.git` directory.
#[must_use]
pub fn detect_git_repo(start: &Path) -> bool {
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir.join(".git").exists() {
            return true;
        }
        current = dir.parent();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with_tools(tools: &[&str]) -> PromptContext {
        PromptContext::new(tools.iter().map(ToString::to_string))
    }

    #[test]
    fn full_toolset_selects_all_workflows() {
        let ctx = ctx_with_tools(&["glob", "grep", "read_file", "edit", "run_shell_command"]);
        let prompt = PromptBuilder::new().build(&ctx);
        assert!(prompt.contains("Explore before editing"));
        assert!(prompt.contains("Edit cycle"));
        assert!(prompt.contains("build or tests"));
    }

    #[test]
    fn toolless_prompt_still_has_workflows_section() {
        let prompt = PromptBuilder::new().build(&ctx_with_tools(&[]));
        assert!(prompt.contains("Respond directly"));
    }

    #[test]
    fn sandbox_variants_render_differently() {
        let builder = PromptBuilder::new();
        let none = builder.build(&ctx_with_tools(&[]).with_sandbox(SandboxMode::None));
        let container = builder.build(&ctx_with_tools(&[]).with_sandbox(SandboxMode::Container));
        let profile = builder.build(
            &ctx_with_tools(&[]).with_sandbox(SandboxMode::NativeProfile("hardened".into())),
        );
        assert!(none.contains("no sandbox"));
        assert!(container.contains("inside a container"));
        assert!(profile.contains("'hardened'"));
    }

    #[test]
    fn git_section_only_in_repositories() {
        let builder = PromptBuilder::new();
        let outside = builder.build(&ctx_with_tools(&[]).with_git_repo(false));
        let inside = builder.build(&ctx_with_tools(&[]).with_git_repo(true));
        assert!(!outside.contains("# Git"));
        assert!(inside.contains("# Git"));
    }

    #[test]
    fn memory_block_appended_when_present() {
        let builder = PromptBuilder::new();
        let without = builder.build(&ctx_with_tools(&[]));
        assert!(!without.contains("User memory"));

        let with = builder
            .build(&ctx_with_tools(&[]).with_memory(Some("- prefers tabs".to_string())));
        assert!(with.contains("User memory"));
        assert!(with.contains("- prefers tabs"));
        assert!(with.ends_with("- prefers tabs"));
    }

    #[test]
    fn sandbox_env_value_parsing() {
        assert_eq!(SandboxMode::from_env_value("false"), SandboxMode::None);
        assert_eq!(SandboxMode::from_env_value(""), SandboxMode::None);
        assert_eq!(SandboxMode::from_env_value("true"), SandboxMode::Container);
        assert_eq!(
            SandboxMode::from_env_value("container"),
            SandboxMode::Container
        );
        assert_eq!(
            SandboxMode::from_env_value("seatbelt-strict"),
            SandboxMode::NativeProfile("seatbelt-strict".to_string())
        );
    }

    #[test]
    fn git_detection_walks_upward() {
        let dir = std::env::temp_dir().join(format!("prompt-test-{}", std::process::id()));
        let nested = dir.join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        assert!(!detect_git_repo(&nested));
        std::fs::create_dir_all(dir.join(".git")).unwrap();
        assert!(detect_git_repo(&nested));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
