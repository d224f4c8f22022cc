//! Model routing: a prioritized strategy chain invoked once per user turn.
//!
//! Strategies either return a decision or pass to the next one:
//! fallback (degraded mode) → override (user-fixed model) → classifier
//! (small-model triage between flash and pro) → default (total).

use crate::llm::{ChatRequest, Message, ModelProvider, Part, StreamAccumulator};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Sentinel override value meaning "let the router decide".
pub const AUTO_MODEL: &str = "auto";

/// How many trailing clean turns the classifier sees.
const CLASSIFIER_TURNS: usize = 4;

/// Routing decision for one turn.
#[derive(Debug, Clone)]
pub struct ModelRoute {
    pub model: String,
    /// `agent-router/<StrategyName>`, for telemetry.
    pub source: String,
    pub latency: Duration,
    pub reasoning: Option<String>,
}

/// Model names the router can pick between.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub default_model: String,
    pub fallback_model: String,
    pub flash_model: String,
    pub pro_model: String,
    /// User-fixed model; [`AUTO_MODEL`] or empty means no override.
    pub override_model: Option<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_model: "pro".to_string(),
            fallback_model: "flash".to_string(),
            flash_model: "flash".to_string(),
            pro_model: "pro".to_string(),
            override_model: None,
        }
    }
}

/// Inputs available to each strategy.
pub struct RoutingContext<'a> {
    pub config: &'a RouterConfig,
    pub history: &'a [Message],
    pub fallback_active: bool,
}

/// Partial decision from one strategy.
pub struct RouteDecision {
    pub model: String,
    pub reasoning: Option<String>,
}

/// One link in the chain. `route` answers `None` to pass.
#[async_trait]
pub trait RouteStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn route(&self, ctx: &RoutingContext<'_>) -> Option<RouteDecision>;
}

/// Degraded-mode strategy: picked first when quota exhaustion has been
/// flagged.
pub struct FallbackStrategy;

#[async_trait]
impl RouteStrategy for FallbackStrategy {
    fn name(&self) -> &'static str {
        "FallbackStrategy"
    }

    async fn route(&self, ctx: &RoutingContext<'_>) -> Option<RouteDecision> {
        if ctx.fallback_active {
            Some(RouteDecision {
                model: ctx.config.fallback_model.clone(),
                reasoning: Some("runtime is in fallback mode".to_string()),
            })
        } else {
            None
        }
    }
}

/// User-fixed model, unless the sentinel `auto`.
pub struct OverrideStrategy;

#[async_trait]
impl RouteStrategy for OverrideStrategy {
    fn name(&self) -> &'static str {
        "OverrideStrategy"
    }

    async fn route(&self, ctx: &RoutingContext<'_>) -> Option<RouteDecision> {
        let model = ctx.config.override_model.as_deref()?;
        if model.is_empty() || model == AUTO_MODEL {
            return None;
        }
        Some(RouteDecision {
            model: model.to_string(),
            reasoning: Some("model fixed by user".to_string()),
        })
    }
}

const CLASSIFIER_SYSTEM: &str = r#"You are a model-routing classifier. Decide whether the latest
user request needs the stronger "pro" model or the faster "flash" model.

Pick "flash" for simple questions, lookups, small single-step edits.
Pick "pro" for refactoring, multi-step planning, debugging, anything
touching several files or requiring careful reasoning.

Answer with JSON only: {"reasoning": "...", "model_choice": "flash" | "pro"}"#;

#[derive(Debug, Deserialize)]
struct ClassifierVerdict {
    #[serde(default)]
    reasoning: Option<String>,
    model_choice: String,
}

/// Small-model triage over the last few clean turns. Any parse or
/// transport failure passes to the next strategy.
pub struct ClassifierStrategy {
    classifier: Arc<dyn ModelProvider>,
}

impl ClassifierStrategy {
    #[must_use]
    pub fn new(classifier: Arc<dyn ModelProvider>) -> Self {
        Self { classifier }
    }

    fn clean_turns(history: &[Message]) -> Vec<&Message> {
        history
            .iter()
            .rev()
            .filter(|m| !m.has_function_parts())
            .take(CLASSIFIER_TURNS)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    fn render_turns(turns: &[&Message]) -> String {
        turns
            .iter()
            .map(|m| {
                let role = match m.role {
                    crate::llm::Role::User => "user",
                    crate::llm::Role::Model => "model",
                    crate::llm::Role::Function => "function",
                };
                format!("{role}: {}", m.text())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl RouteStrategy for ClassifierStrategy {
    fn name(&self) -> &'static str {
        "ClassifierStrategy"
    }

    async fn route(&self, ctx: &RoutingContext<'_>) -> Option<RouteDecision> {
        let turns = Self::clean_turns(ctx.history);
        if turns.is_empty() {
            return None;
        }

        let request = ChatRequest {
            model: self.classifier.model().to_string(),
            system: CLASSIFIER_SYSTEM.to_string(),
            messages: vec![Message::user(Self::render_turns(&turns))],
            tools: None,
            max_tokens: 200,
        };

        let mut stream = match self.classifier.stream_chat(request).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::debug!(error = %e, "classifier transport failed, passing");
                return None;
            }
        };

        let mut accumulator = StreamAccumulator::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(delta) => accumulator.apply(&delta),
                Err(e) => {
                    tracing::debug!(error = %e, "classifier stream failed, passing");
                    return None;
                }
            }
        }

        let text = accumulator
            .into_parts()
            .into_iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        let verdict: ClassifierVerdict = match serde_json::from_str(extract_json(&text)) {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::debug!(error = %e, raw = %text, "classifier verdict unparseable, passing");
                return None;
            }
        };

        let model = match verdict.model_choice.as_str() {
            "flash" => ctx.config.flash_model.clone(),
            "pro" => ctx.config.pro_model.clone(),
            other => {
                tracing::debug!(choice = %other, "unknown classifier choice, passing");
                return None;
            }
        };

        Some(RouteDecision {
            model,
            reasoning: verdict.reasoning,
        })
    }
}

/// Pull the first JSON object out of possibly-fenced classifier output.
fn extract_json(text: &str) -> &str {
    let start = text.find('{').unwrap_or(0);
    let end = text.rfind('}').map_or(text.len(), |i| i + 1);
    text.get(start..end).unwrap_or(text)
}

/// Terminal strategy; always answers.
pub struct DefaultStrategy;

#[async_trait]
impl RouteStrategy for DefaultStrategy {
    fn name(&self) -> &'static str {
        "DefaultStrategy"
    }

    async fn route(&self, ctx: &RoutingContext<'_>) -> Option<RouteDecision> {
        Some(RouteDecision {
            model: ctx.config.default_model.clone(),
            reasoning: None,
        })
    }
}

/// The composite router. Total: the default strategy terminates the chain
/// for any input.
pub struct ModelRouter {
    config: RouterConfig,
    strategies: Vec<Box<dyn RouteStrategy>>,
    fallback_active: AtomicBool,
}

impl ModelRouter {
    /// Build the standard chain. Pass a classifier provider to enable the
    /// classifier strategy.
    #[must_use]
    pub fn new(config: RouterConfig, classifier: Option<Arc<dyn ModelProvider>>) -> Self {
        let mut strategies: Vec<Box<dyn RouteStrategy>> =
            vec![Box::new(FallbackStrategy), Box::new(OverrideStrategy)];
        if let Some(classifier) = classifier {
            strategies.push(Box::new(ClassifierStrategy::new(classifier)));
        }
        strategies.push(Box::new(DefaultStrategy));
        Self {
            config,
            strategies,
            fallback_active: AtomicBool::new(false),
        }
    }

    /// Flag quota exhaustion; subsequent turns route to the fallback model.
    pub fn enter_fallback_mode(&self) {
        self.fallback_active.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn in_fallback_mode(&self) -> bool {
        self.fallback_active.load(Ordering::SeqCst)
    }

    /// Walk the chain and return the first decision.
    pub async fn route(&self, history: &[Message]) -> ModelRoute {
        let started = Instant::now();
        let ctx = RoutingContext {
            config: &self.config,
            history,
            fallback_active: self.in_fallback_mode(),
        };

        for strategy in &self.strategies {
            if let Some(decision) = strategy.route(&ctx).await {
                let route = ModelRoute {
                    model: decision.model,
                    source: format!("agent-router/{}", strategy.name()),
                    latency: started.elapsed(),
                    reasoning: decision.reasoning,
                };
                tracing::debug!(
                    model = %route.model,
                    source = %route.source,
                    latency_ms = route.latency.as_millis() as u64,
                    "routed turn"
                );
                return route;
            }
        }

        // DefaultStrategy is total; reaching this means the chain was
        // constructed without it.
        ModelRoute {
            model: self.config.default_model.clone(),
            source: "agent-router/DefaultStrategy".to_string(),
            latency: started.elapsed(),
            reasoning: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::testing::{Scripted, ScriptedProvider};

    fn config() -> RouterConfig {
        RouterConfig {
            default_model: "pro-model".to_string(),
            fallback_model: "flash-lite".to_string(),
            flash_model: "flash-model".to_string(),
            pro_model: "pro-model".to_string(),
            override_model: None,
        }
    }

    #[tokio::test]
    async fn default_strategy_is_total() {
        let router = ModelRouter::new(config(), None);
        let route = router.route(&[]).await;
        assert_eq!(route.model, "pro-model");
        assert_eq!(route.source, "agent-router/DefaultStrategy");
    }

    #[tokio::test]
    async fn fallback_mode_takes_priority() {
        let mut cfg = config();
        cfg.override_model = Some("pinned".to_string());
        let router = ModelRouter::new(cfg, None);
        router.enter_fallback_mode();

        let route = router.route(&[]).await;
        assert_eq!(route.model, "flash-lite");
        assert_eq!(route.source, "agent-router/FallbackStrategy");
    }

    #[tokio::test]
    async fn override_beats_default() {
        let mut cfg = config();
        cfg.override_model = Some("pinned".to_string());
        let router = ModelRouter::new(cfg, None);

        let route = router.route(&[]).await;
        assert_eq!(route.model, "pinned");
        assert_eq!(route.source, "agent-router/OverrideStrategy");
    }

    #[tokio::test]
    async fn auto_sentinel_is_not_an_override() {
        let mut cfg = config();
        cfg.override_model = Some(AUTO_MODEL.to_string());
        let router = ModelRouter::new(cfg, None);

        let route = router.route(&[]).await;
        assert_eq!(route.source, "agent-router/DefaultStrategy");
    }

    #[tokio::test]
    async fn classifier_picks_pro_for_complex_request() {
        let classifier = Arc::new(ScriptedProvider::new(vec![Scripted::Text(
            r#"{"reasoning":"multi-file refactor","model_choice":"pro"}"#,
        )]));
        let router = ModelRouter::new(config(), Some(classifier));

        let history = vec![Message::user(
            "Refactor the auth module to use dependency injection",
        )];
        let route = router.route(&history).await;
        assert_eq!(route.model, "pro-model");
        assert_eq!(route.source, "agent-router/ClassifierStrategy");
        assert_eq!(route.reasoning.as_deref(), Some("multi-file refactor"));
    }

    #[tokio::test]
    async fn classifier_picks_flash_for_simple_request() {
        let classifier = Arc::new(ScriptedProvider::new(vec![Scripted::Text(
            r#"{"reasoning":"trivial arithmetic","model_choice":"flash"}"#,
        )]));
        let router = ModelRouter::new(config(), Some(classifier));

        let history = vec![Message::user("What's 2+2?")];
        let route = router.route(&history).await;
        assert_eq!(route.model, "flash-model");
        assert_eq!(route.source, "agent-router/ClassifierStrategy");
    }

    #[tokio::test]
    async fn classifier_parse_failure_passes_to_default() {
        let classifier = Arc::new(ScriptedProvider::new(vec![Scripted::Text(
            "definitely not json",
        )]));
        let router = ModelRouter::new(config(), Some(classifier));

        let route = router.route(&[Message::user("hello")]).await;
        assert_eq!(route.source, "agent-router/DefaultStrategy");
    }

    #[tokio::test]
    async fn classifier_transport_failure_passes() {
        let classifier = Arc::new(ScriptedProvider::new(vec![Scripted::Fail(
            crate::llm::ProviderError::ServerError("503".into()),
        )]));
        let router = ModelRouter::new(config(), Some(classifier));

        let route = router.route(&[Message::user("hello")]).await;
        assert_eq!(route.source, "agent-router/DefaultStrategy");
    }

    #[tokio::test]
    async fn classifier_sees_only_clean_turns() {
        use serde_json::json;
        let history = vec![
            Message::model(vec![Part::function_call("c1", "glob", json!({}))]),
            Message::function(vec![Part::function_response("c1", "glob", json!({}))]),
        ];
        // No clean turns at all: classifier passes without a request.
        let classifier = Arc::new(ScriptedProvider::new(vec![]));
        let router = ModelRouter::new(config(), Some(classifier.clone()));

        let route = router.route(&history).await;
        assert_eq!(route.source, "agent-router/DefaultStrategy");
        assert_eq!(classifier.call_count(), 0);
    }

    #[test]
    fn json_extraction_handles_fences() {
        let fenced = "```json\n{\"model_choice\":\"flash\"}\n```";
        assert_eq!(extract_json(fenced), "{\"model_choice\":\"flash\"}");
    }
}
