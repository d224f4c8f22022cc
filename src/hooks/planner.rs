//! Builds the execution plan for one triggered event.

use regex::Regex;

use super::config::{HookEvent, HookRegistry, HookSource};

/// One command scheduled to run for an event.
#[derive(Clone, Debug)]
pub struct PlannedCommand {
    pub command: String,
    pub timeout_ms: u64,
    pub source: HookSource,
}

/// Hooks that apply to one triggered event. Consumed once by the executor.
#[derive(Clone, Debug)]
pub struct HookPlan {
    pub event: HookEvent,
    pub commands: Vec<PlannedCommand>,
    /// Commands run one at a time iff any surviving entry asked for it.
    pub sequential: bool,
}

/// Build a plan for `event` against `context` (tool name for tool events,
/// trigger for session events). Returns `None` when nothing matches.
#[must_use]
pub fn plan_for_event(
    registry: &HookRegistry,
    event: HookEvent,
    context: Option<&str>,
) -> Option<HookPlan> {
    let mut commands: Vec<PlannedCommand> = Vec::new();
    let mut sequential = false;

    for entry in registry.entries_for(event) {
        if !matcher_applies(entry.matcher.as_deref(), context) {
            continue;
        }
        sequential |= entry.sequential;
        for command in &entry.commands {
            // Dedupe by (command, timeout); entries arrive in priority
            // order, so the first occurrence is the highest-priority one.
            let duplicate = commands
                .iter()
                .any(|c| c.command == command.command && c.timeout_ms == command.timeout_ms);
            if !duplicate {
                commands.push(PlannedCommand {
                    command: command.command.clone(),
                    timeout_ms: command.timeout_ms,
                    source: entry.source,
                });
            }
        }
    }

    if commands.is_empty() {
        None
    } else {
        Some(HookPlan {
            event,
            commands,
            sequential,
        })
    }
}

/// Empty matcher matches everything. Otherwise try the pattern as a regex;
/// an invalid regex falls back to literal equality.
fn matcher_applies(matcher: Option<&str>, context: Option<&str>) -> bool {
    let Some(pattern) = matcher.filter(|m| !m.is_empty()) else {
        return true;
    };
    let Some(context) = context else {
        return false;
    };
    match Regex::new(pattern) {
        Ok(re) => re.is_match(context),
        Err(_) => pattern == context,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::config::{HookCommand, HookEntry};

    fn entry(
        matcher: Option<&str>,
        sequential: bool,
        source: HookSource,
        commands: Vec<(&str, u64)>,
    ) -> HookEntry {
        HookEntry {
            event: HookEvent::BeforeTool,
            matcher: matcher.map(String::from),
            sequential,
            commands: commands
                .into_iter()
                .map(|(command, timeout_ms)| HookCommand {
                    command: command.to_string(),
                    timeout_ms,
                })
                .collect(),
            source,
            enabled: true,
        }
    }

    fn registry_with(entries: Vec<HookEntry>) -> HookRegistry {
        let mut registry = HookRegistry::default();
        for e in entries {
            registry.add(e);
        }
        registry
    }

    #[test]
    fn empty_matcher_matches_all() {
        let registry = registry_with(vec![entry(
            None,
            false,
            HookSource::User,
            vec![("audit.sh", 1000)],
        )]);
        assert!(plan_for_event(&registry, HookEvent::BeforeTool, Some("edit")).is_some());
        assert!(plan_for_event(&registry, HookEvent::BeforeTool, None).is_some());
    }

    #[test]
    fn regex_matcher_filters_by_tool_name() {
        let registry = registry_with(vec![entry(
            Some("^(edit|write_file)$"),
            false,
            HookSource::Project,
            vec![("guard.sh", 1000)],
        )]);
        assert!(plan_for_event(&registry, HookEvent::BeforeTool, Some("edit")).is_some());
        assert!(plan_for_event(&registry, HookEvent::BeforeTool, Some("glob")).is_none());
    }

    #[test]
    fn invalid_regex_falls_back_to_literal() {
        let registry = registry_with(vec![entry(
            Some("edit[" ),
            false,
            HookSource::Project,
            vec![("guard.sh", 1000)],
        )]);
        assert!(plan_for_event(&registry, HookEvent::BeforeTool, Some("edit[")).is_some());
        assert!(plan_for_event(&registry, HookEvent::BeforeTool, Some("edit")).is_none());
    }

    #[test]
    fn dedupe_keeps_highest_priority_occurrence() {
        let registry = registry_with(vec![
            entry(None, false, HookSource::Extension, vec![("same.sh", 1000)]),
            entry(None, false, HookSource::Project, vec![("same.sh", 1000)]),
        ]);
        let plan = plan_for_event(&registry, HookEvent::BeforeTool, Some("edit")).unwrap();
        assert_eq!(plan.commands.len(), 1);
        assert_eq!(plan.commands[0].source, HookSource::Project);
    }

    #[test]
    fn different_timeouts_are_not_duplicates() {
        let registry = registry_with(vec![
            entry(None, false, HookSource::Project, vec![("same.sh", 1000)]),
            entry(None, false, HookSource::User, vec![("same.sh", 2000)]),
        ]);
        let plan = plan_for_event(&registry, HookEvent::BeforeTool, Some("edit")).unwrap();
        assert_eq!(plan.commands.len(), 2);
    }

    #[test]
    fn any_sequential_entry_makes_plan_sequential() {
        let registry = registry_with(vec![
            entry(None, false, HookSource::Project, vec![("a.sh", 1000)]),
            entry(None, true, HookSource::User, vec![("b.sh", 1000)]),
        ]);
        let plan = plan_for_event(&registry, HookEvent::BeforeTool, Some("edit")).unwrap();
        assert!(plan.sequential);
    }

    #[test]
    fn no_match_yields_none() {
        let registry = registry_with(vec![entry(
            Some("glob"),
            false,
            HookSource::Project,
            vec![("x.sh", 1000)],
        )]);
        assert!(plan_for_event(&registry, HookEvent::BeforeTool, Some("edit")).is_none());
    }
}
