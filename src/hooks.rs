//! Lifecycle hook interception pipeline.
//!
//! Hooks are external commands run at lifecycle events. Each command
//! receives a JSON payload on standard input and may answer with a JSON
//! decision on standard output. Failures (timeouts, non-zero exits, bad
//! JSON) are advisory and never block the event.

pub mod config;
pub mod executor;
pub mod payload;
pub mod planner;

pub use config::{HookCommand, HookEntry, HookEvent, HookRegistry, HookSource};
pub use executor::{HookDecision, HookExecutor, HookOutcome};
pub use payload::PayloadBuilder;
pub use planner::{HookPlan, plan_for_event};

use crate::types::SessionId;
use serde_json::Value;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Facade wiring registry, planner and executor together with the session
/// envelope. One per session.
pub struct HookEngine {
    registry: HookRegistry,
    executor: HookExecutor,
    session_id: SessionId,
    transcript_path: PathBuf,
    cwd: PathBuf,
}

impl HookEngine {
    #[must_use]
    pub fn new(
        registry: HookRegistry,
        session_id: SessionId,
        transcript_path: PathBuf,
        cwd: PathBuf,
    ) -> Self {
        Self {
            registry,
            executor: HookExecutor::new(),
            session_id,
            transcript_path,
            cwd,
        }
    }

    /// Engine with no hooks configured; every `fire` is a no-op outcome.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(
            HookRegistry::default(),
            SessionId::new(),
            PathBuf::from("/dev/null"),
            PathBuf::from("."),
        )
    }

    /// Build the envelope payload for an event.
    #[must_use]
    pub fn payload(&self, event: HookEvent) -> PayloadBuilder {
        PayloadBuilder::new(
            &self.session_id,
            &self.transcript_path,
            &self.cwd,
            event,
        )
    }

    /// Plan and run all hooks for an event.
    ///
    /// `context` is the matcher input: the tool name for tool events, the
    /// trigger for session events. An event with no matching hooks yields
    /// the default (proceeding) outcome, indistinguishable from no hooks
    /// at all.
    pub async fn fire(
        &self,
        event: HookEvent,
        context: Option<&str>,
        extra: Value,
        cancel: &CancellationToken,
    ) -> HookOutcome {
        let Some(plan) = plan_for_event(&self.registry, event, context) else {
            return HookOutcome::default();
        };
        let payload = self.payload(event).merge(extra).build();
        self.executor.run(&plan, &payload, cancel).await
    }
}
