//! Agent executor: the turn loop used both for the top-level interactive
//! agent and for sub-agents invoked as tools.
//!
//! One run: build the chat from the agent definition, then loop
//! route → BeforeModel hooks → send → AfterModel hooks → validate calls →
//! BeforeTool hooks → dispatch batch → AfterTool hooks → append the
//! function-role message, until `complete_task`, a plain-text turn, the
//! turn limit, the time budget, or cancellation ends it.

use crate::chat::{ChatConfig, ChatSession, ModelOutput};
use crate::events::AgentEvent;
use crate::hooks::{HookEngine, HookEvent};
use crate::llm::{FunctionDeclaration, Message, ModelProvider, Part};
use crate::policy::PolicyDecision;
use crate::router::ModelRouter;
use crate::scheduler::{BatchEntry, ToolCallRequest, ToolScheduler};
use crate::tools::{OutputSink, Tool, ToolInvocation, ToolRegistry, schema};
use crate::types::{
    AgentOutcome, EngineError, TerminateReason, TokenUsage, ToolKind, ToolResult,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Name of the completion tool every agent carries.
pub const COMPLETE_TASK: &str = "complete_task";

/// Static description of an agent. Constant for the run.
#[derive(Clone, Debug)]
pub struct AgentDefinition {
    pub name: String,
    /// System prompt template; `${param}` placeholders are substituted.
    pub system_prompt: String,
    /// Initial user message template.
    pub query_template: String,
    /// Tool allow-list. Calls outside it are rejected without touching
    /// the scheduler.
    pub tool_names: Vec<String>,
    pub max_turns: usize,
    pub time_budget: Option<Duration>,
    /// Schema for the `result` argument of `complete_task`.
    pub output_schema: Option<Value>,
}

impl AgentDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: String::new(),
            query_template: "${input}".to_string(),
            tool_names: Vec::new(),
            max_turns: 20,
            time_budget: None,
            output_schema: None,
        }
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn with_query_template(mut self, template: impl Into<String>) -> Self {
        self.query_template = template.into();
        self
    }

    #[must_use]
    pub fn with_tools(mut self, names: Vec<String>) -> Self {
        self.tool_names = names;
        self
    }

    #[must_use]
    pub const fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    #[must_use]
    pub const fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    #[must_use]
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

/// Providers keyed by model id, with a default for everything else.
pub struct ProviderSet {
    default: Arc<dyn ModelProvider>,
    by_model: HashMap<String, Arc<dyn ModelProvider>>,
}

impl ProviderSet {
    #[must_use]
    pub fn new(default: Arc<dyn ModelProvider>) -> Self {
        Self {
            default,
            by_model: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>, provider: Arc<dyn ModelProvider>) -> Self {
        self.by_model.insert(model.into(), provider);
        self
    }

    #[must_use]
    pub fn for_model(&self, model: &str) -> Arc<dyn ModelProvider> {
        self.by_model
            .get(model)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default))
    }
}

/// Everything a run needs besides its definition. Passed explicitly, no
/// process-wide state.
pub struct AgentRuntime {
    pub registry: Arc<ToolRegistry>,
    pub scheduler: Arc<ToolScheduler>,
    pub router: Arc<ModelRouter>,
    pub providers: Arc<ProviderSet>,
    pub hooks: Arc<HookEngine>,
    pub chat_config: ChatConfig,
    pub events: mpsc::Sender<AgentEvent>,
}

/// Orchestrates one agent run.
pub struct AgentExecutor {
    definition: AgentDefinition,
    runtime: Arc<AgentRuntime>,
}

impl AgentExecutor {
    #[must_use]
    pub fn new(definition: AgentDefinition, runtime: Arc<AgentRuntime>) -> Self {
        Self {
            definition,
            runtime,
        }
    }

    /// Run to a terminal state.
    ///
    /// # Errors
    /// `Transport` when the backend stays unreachable after retries and
    /// fallback, `Internal` on invariant violations. Everything else is a
    /// normal [`AgentOutcome`].
    pub async fn run(
        &self,
        params: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<AgentOutcome, EngineError> {
        let run_cancel = cancel.child_token();
        let started = Instant::now();
        let deadline = self.definition.time_budget.map(|b| started + b);

        let _watchdog = deadline.map(|deadline| {
            let token = run_cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline.saturating_duration_since(Instant::now())).await;
                token.cancel();
            })
        });

        let mut chat = self.build_chat();
        let mut usage = TokenUsage::default();
        let mut turns = 0usize;

        let initial_text = substitute(&self.definition.query_template, params);
        let before_agent = self
            .runtime
            .hooks
            .fire(
                HookEvent::BeforeAgent,
                None,
                json!({ "prompt": initial_text }),
                &run_cancel,
            )
            .await;
        self.surface_messages(&before_agent.system_messages).await;
        if before_agent.is_blocked() {
            return Ok(self.outcome(None, TerminateReason::Cancelled, turns, usage));
        }
        let mut next_message = Message::user(attach_context(
            initial_text,
            &before_agent.additional_context,
        ));

        if self.definition.max_turns == 0 {
            return Ok(self.outcome(None, TerminateReason::MaxTurns, turns, usage));
        }

        let mut quota_retry_available = true;

        loop {
            if run_cancel.is_cancelled() {
                let reason = timeout_or_cancel(deadline);
                return Ok(self.outcome(None, reason, turns, usage));
            }
            if turns >= self.definition.max_turns {
                break;
            }
            turns += 1;

            if chat.needs_compression() {
                // PreCompress hooks are advisory only.
                let _ = self
                    .runtime
                    .hooks
                    .fire(
                        HookEvent::PreCompress,
                        Some("auto"),
                        json!({ "trigger": "auto" }),
                        &run_cancel,
                    )
                    .await;
                match chat.compress(&run_cancel).await {
                    Ok(stats) => {
                        let _ = self
                            .runtime
                            .events
                            .send(AgentEvent::ContextCompressed {
                                original_count: stats.original_count,
                                new_count: stats.new_count,
                                original_tokens: stats.original_tokens,
                                new_tokens: stats.new_tokens,
                            })
                            .await;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "compression failed, continuing with full history");
                    }
                }
            }

            let output = match self.execute_turn(&mut chat, next_message.clone(), turns, &run_cancel).await
            {
                Ok(output) => output,
                Err(EngineError::QuotaExceeded(msg)) => {
                    if quota_retry_available {
                        quota_retry_available = false;
                        self.runtime.router.enter_fallback_mode();
                        tracing::warn!(reason = %msg, "quota exhausted, entering fallback mode");
                        turns -= 1;
                        continue;
                    }
                    return Ok(self.outcome(None, TerminateReason::QuotaExceeded, turns, usage));
                }
                Err(EngineError::Cancelled) => {
                    let reason = timeout_or_cancel(deadline);
                    return Ok(self.outcome(None, reason, turns, usage));
                }
                Err(other) => return Err(other),
            };

            usage.add(&output.usage);
            let _ = self
                .runtime
                .events
                .send(AgentEvent::TurnComplete {
                    turn: turns,
                    usage: output.usage.clone(),
                })
                .await;

            // complete_task ends the run; an invalid result is bounced
            // back so the model can correct itself.
            if let Some((call_id, result)) = self.find_completion(&output) {
                match self.validate_completion(&result) {
                    Ok(()) => {
                        let outcome =
                            self.outcome(Some(result), TerminateReason::TaskComplete, turns, usage);
                        self.after_agent(&outcome, &run_cancel).await;
                        return Ok(outcome);
                    }
                    Err(reason) => {
                        next_message = Message::function(vec![Part::function_error(
                            call_id,
                            COMPLETE_TASK,
                            format!("invalid result: {reason}"),
                        )]);
                        continue;
                    }
                }
            }

            // A turn with no function calls is a completed task: the model
            // answered in text.
            if output.function_calls.is_empty() {
                let outcome = self.outcome(
                    Some(Value::String(output.text.clone())),
                    TerminateReason::TaskComplete,
                    turns,
                    usage,
                );
                self.after_agent(&outcome, &run_cancel).await;
                return Ok(outcome);
            }

            next_message = self
                .run_tool_batch(&output.function_calls, &run_cancel)
                .await;
        }

        // Turn limit: one final warning turn inviting a partial result.
        let warning = Message::user(
            "You have reached the turn limit. Call complete_task now with the best \
             partial result you have.",
        );
        if let Ok(output) = self.execute_turn(&mut chat, warning, turns, &run_cancel).await {
            usage.add(&output.usage);
            if let Some((_, result)) = self.find_completion(&output)
                && self.validate_completion(&result).is_ok()
            {
                let outcome =
                    self.outcome(Some(result), TerminateReason::TaskComplete, turns, usage);
                self.after_agent(&outcome, &run_cancel).await;
                return Ok(outcome);
            }
        }

        let outcome = self.outcome(None, TerminateReason::MaxTurns, turns, usage);
        self.after_agent(&outcome, &run_cancel).await;
        Ok(outcome)
    }

    fn build_chat(&self) -> ChatSession {
        ChatSession::new(
            self.runtime.providers.for_model(""),
            self.definition.system_prompt.clone(),
            self.build_declarations(),
            self.runtime.chat_config.clone(),
        )
    }

    /// Declarations advertised this run: the allow-listed tools plus the
    /// always-present completion tool.
    fn build_declarations(&self) -> Vec<FunctionDeclaration> {
        let mut declarations: Vec<FunctionDeclaration> = self
            .runtime
            .registry
            .function_declarations()
            .into_iter()
            .filter(|d| {
                self.definition.tool_names.is_empty()
                    || self.definition.tool_names.contains(&d.name)
            })
            .collect();
        declarations.push(self.completion_declaration());
        declarations
    }

    fn completion_declaration(&self) -> FunctionDeclaration {
        let result_schema = self
            .definition
            .output_schema
            .clone()
            .unwrap_or_else(|| json!({}));
        FunctionDeclaration {
            name: COMPLETE_TASK.to_string(),
            description: "Declare the task finished and return the final result.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "result": result_schema },
                "required": ["result"]
            }),
        }
    }

    /// One model round-trip with its hook points.
    async fn execute_turn(
        &self,
        chat: &mut ChatSession,
        mut message: Message,
        turn: usize,
        cancel: &CancellationToken,
    ) -> Result<ModelOutput, EngineError> {
        let _ = self
            .runtime
            .events
            .send(AgentEvent::TurnStart { turn })
            .await;

        let route = self.runtime.router.route(chat.history()).await;
        let _ = self
            .runtime
            .events
            .send(AgentEvent::Routed {
                model: route.model.clone(),
                source: route.source.clone(),
                reasoning: route.reasoning.clone(),
            })
            .await;
        chat.set_model(route.model.clone());
        chat.set_provider(self.runtime.providers.for_model(&route.model));

        let request_payload = json!({
            "model": route.model,
            "message": message.text(),
        });

        // BeforeToolSelection can narrow the advertised tool list; the
        // narrowing applies to this turn only.
        chat.set_declarations(self.build_declarations());
        let selection = self
            .runtime
            .hooks
            .fire(
                HookEvent::BeforeToolSelection,
                None,
                json!({ "llm_request": request_payload }),
                cancel,
            )
            .await;
        if let Some(config) = selection.tool_config
            && let Some(allowed) = config.get("allowed_tools").and_then(Value::as_array)
        {
            let allowed: Vec<String> = allowed
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect();
            chat.narrow_declarations(|name| {
                name == COMPLETE_TASK || allowed.iter().any(|a| a == name)
            });
        }

        let before_model = self
            .runtime
            .hooks
            .fire(
                HookEvent::BeforeModel,
                None,
                json!({ "llm_request": request_payload }),
                cancel,
            )
            .await;
        self.surface_messages(&before_model.system_messages).await;

        if let Some(synthetic) = before_model.synthetic_response {
            // Short-circuit the model call entirely; history still gets a
            // consistent pair of messages.
            let output = synthetic_output(&synthetic);
            chat.append(message);
            chat.append(Message::model(output.parts.clone()));
            return Ok(output);
        }
        if let Some(modified) = before_model.modified_request
            && let Some(text) = modified.get("message").and_then(Value::as_str)
        {
            message = Message::user(text.to_string());
        }

        let (delta_tx, mut delta_rx) = mpsc::channel::<String>(64);
        let event_tx = self.runtime.events.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(delta) = delta_rx.recv().await {
                let _ = event_tx.send(AgentEvent::TextDelta { delta }).await;
            }
        });

        let result = chat.send(message, cancel, Some(delta_tx)).await;
        let _ = forwarder.await;
        let mut output = result?;

        let after_model = self
            .runtime
            .hooks
            .fire(
                HookEvent::AfterModel,
                None,
                json!({
                    "llm_request": request_payload,
                    "llm_response": {
                        "text": output.text,
                        "function_calls": output.function_calls.len(),
                    },
                }),
                cancel,
            )
            .await;
        self.surface_messages(&after_model.system_messages).await;
        if let Some(modified) = after_model.modified_response
            && let Some(text) = modified.get("text").and_then(Value::as_str)
        {
            output.text = text.to_string();
        }

        if !output.text.is_empty() {
            let _ = self
                .runtime
                .events
                .send(AgentEvent::text(output.text.clone()))
                .await;
        }

        Ok(output)
    }

    /// Validate, hook, and dispatch one batch; assemble the function-role
    /// message with every response in original call order.
    async fn run_tool_batch(
        &self,
        calls: &[(String, String, Value)],
        cancel: &CancellationToken,
    ) -> Message {
        let mut responses: Vec<Option<Part>> = vec![None; calls.len()];
        let mut dispatch: Vec<(usize, BatchEntry)> = Vec::new();
        let mut hook_denied: Vec<bool> = vec![false; calls.len()];

        for (index, (id, name, args)) in calls.iter().enumerate() {
            // Allow-list and schema validation happen before the
            // scheduler is touched.
            if !self.definition.tool_names.is_empty()
                && !self.definition.tool_names.contains(name)
            {
                responses[index] = Some(Part::function_error(
                    id,
                    name,
                    format!("tool '{name}' is not available to this agent"),
                ));
                continue;
            }
            let tool = match self.runtime.registry.get(name) {
                Ok(tool) => tool,
                Err(e) => {
                    responses[index] = Some(Part::function_error(id, name, e.to_string()));
                    continue;
                }
            };
            if let Err(reason) = schema::validate(&tool.input_schema(), args, true) {
                responses[index] = Some(Part::function_error(
                    id,
                    name,
                    format!("invalid params: {reason}"),
                ));
                continue;
            }

            let before_tool = self
                .runtime
                .hooks
                .fire(
                    HookEvent::BeforeTool,
                    Some(name),
                    json!({ "tool_name": name, "tool_input": args }),
                    cancel,
                )
                .await;
            self.surface_messages(&before_tool.system_messages).await;

            let request = ToolCallRequest {
                id: id.clone(),
                name: name.clone(),
                params: args.clone(),
            };
            let entry = if before_tool.is_blocked() {
                hook_denied[index] = true;
                BatchEntry::new(request).with_decision(PolicyDecision::Deny {
                    reason: before_tool
                        .reason
                        .unwrap_or_else(|| "blocked by hook".to_string()),
                })
            } else if before_tool.asks_user() {
                BatchEntry::new(request).with_decision(PolicyDecision::AskUser)
            } else {
                BatchEntry::new(request)
            };
            dispatch.push((index, entry));
        }

        let dispatched_indices: Vec<usize> = dispatch.iter().map(|(i, _)| *i).collect();
        let batch = dispatch.into_iter().map(|(_, entry)| entry).collect();
        let parts = self.runtime.scheduler.schedule(batch, cancel).await;

        for (slot, part) in dispatched_indices.into_iter().zip(parts) {
            let part = if hook_denied[slot] {
                // Hook-denied calls never executed; AfterTool stays quiet
                // for them.
                part
            } else {
                self.after_tool(&calls[slot].1, part, cancel).await
            };
            responses[slot] = Some(part);
        }

        let parts: Vec<Part> = responses
            .into_iter()
            .map(|p| p.expect("every call produces exactly one response"))
            .collect();
        Message::function(parts)
    }

    /// Fire AfterTool and fold any additional context into the response
    /// payload.
    async fn after_tool(&self, name: &str, part: Part, cancel: &CancellationToken) -> Part {
        let (id, part_name, mut payload, error) = match part {
            Part::FunctionResponse {
                id,
                name,
                payload,
                error,
            } => (id, name, payload, error),
            other => return other,
        };

        let after = self
            .runtime
            .hooks
            .fire(
                HookEvent::AfterTool,
                Some(name),
                json!({ "tool_name": name, "tool_response": payload }),
                cancel,
            )
            .await;
        self.surface_messages(&after.system_messages).await;

        if !after.additional_context.is_empty()
            && let Some(obj) = payload.as_object_mut()
        {
            obj.insert(
                "additional_context".to_string(),
                Value::String(after.additional_context.join("\n")),
            );
        }

        Part::FunctionResponse {
            id,
            name: part_name,
            payload,
            error,
        }
    }

    fn find_completion(&self, output: &ModelOutput) -> Option<(String, Value)> {
        output
            .function_calls
            .iter()
            .find(|(_, name, _)| name == COMPLETE_TASK)
            .map(|(id, _, args)| (id.clone(), args.get("result").cloned().unwrap_or(Value::Null)))
    }

    fn validate_completion(&self, result: &Value) -> Result<(), String> {
        match &self.definition.output_schema {
            Some(schema) => schema::validate(schema, result, false),
            None => Ok(()),
        }
    }

    async fn surface_messages(&self, messages: &[String]) {
        for message in messages {
            let _ = self
                .runtime
                .events
                .send(AgentEvent::SystemMessage {
                    message: message.clone(),
                })
                .await;
        }
    }

    async fn after_agent(&self, outcome: &AgentOutcome, cancel: &CancellationToken) {
        let response = outcome
            .result
            .as_ref()
            .map(std::string::ToString::to_string)
            .unwrap_or_default();
        let after = self
            .runtime
            .hooks
            .fire(
                HookEvent::AfterAgent,
                None,
                json!({ "prompt_response": response }),
                cancel,
            )
            .await;
        self.surface_messages(&after.system_messages).await;
    }

    fn outcome(
        &self,
        result: Option<Value>,
        terminate_reason: TerminateReason,
        turns: usize,
        usage: TokenUsage,
    ) -> AgentOutcome {
        let outcome = AgentOutcome {
            result,
            terminate_reason,
            turns,
            usage,
        };
        let events = self.runtime.events.clone();
        let cloned = outcome.clone();
        tokio::spawn(async move {
            let _ = events.send(AgentEvent::Done { outcome: cloned }).await;
        });
        outcome
    }
}

fn timeout_or_cancel(deadline: Option<Instant>) -> TerminateReason {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => TerminateReason::Timeout,
        _ => TerminateReason::Cancelled,
    }
}

fn substitute(template: &str, params: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in params {
        out = out.replace(&format!("${{{key}}}"), value);
    }
    out
}

fn attach_context(text: String, context: &[String]) -> String {
    if context.is_empty() {
        text
    } else {
        format!("{text}\n\n{}", context.join("\n"))
    }
}

/// Build a [`ModelOutput`] from a hook's synthetic response value.
fn synthetic_output(value: &Value) -> ModelOutput {
    let mut parts = Vec::new();
    if let Some(text) = value.get("text").and_then(Value::as_str)
        && !text.is_empty()
    {
        parts.push(Part::text(text));
    }
    if let Some(calls) = value.get("function_calls").and_then(Value::as_array) {
        for (i, call) in calls.iter().enumerate() {
            if let Some(name) = call.get("name").and_then(Value::as_str) {
                let id = call
                    .get("id")
                    .and_then(Value::as_str)
                    .map_or_else(|| format!("synthetic_{i}"), String::from);
                parts.push(Part::function_call(
                    id,
                    name,
                    call.get("args").cloned().unwrap_or(json!({})),
                ));
            }
        }
    }

    let text = parts
        .iter()
        .filter_map(|p| match p {
            Part::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    let function_calls = parts
        .iter()
        .filter_map(|p| match p {
            Part::FunctionCall { id, name, args } => {
                Some((id.clone(), name.clone(), args.clone()))
            }
            _ => None,
        })
        .collect();

    ModelOutput {
        parts,
        text,
        function_calls,
        usage: TokenUsage::default(),
        finish: None,
    }
}

/// A sub-agent exposed as a tool. Runs a nested executor with a
/// restricted allow-list and its own time budget; the nested
/// `complete_task` result becomes this tool's response.
pub struct SubagentTool {
    definition: AgentDefinition,
    runtime: Arc<AgentRuntime>,
    description: String,
}

impl SubagentTool {
    #[must_use]
    pub fn new(definition: AgentDefinition, runtime: Arc<AgentRuntime>) -> Self {
        let description = format!(
            "Delegate a task to the '{}' agent. It works independently with its own \
             tools and returns only its final result.",
            definition.name
        );
        Self {
            definition,
            runtime,
            description,
        }
    }
}

impl Tool for SubagentTool {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Think
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The task for the sub-agent"
                }
            },
            "required": ["task"]
        })
    }

    fn build_invocation(&self, params: Value) -> Result<Box<dyn ToolInvocation>, EngineError> {
        let task = params
            .get("task")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::InvalidParams("missing 'task'".to_string()))?
            .to_string();
        Ok(Box::new(SubagentInvocation {
            definition: self.definition.clone(),
            runtime: Arc::clone(&self.runtime),
            task,
        }))
    }
}

struct SubagentInvocation {
    definition: AgentDefinition,
    runtime: Arc<AgentRuntime>,
    task: String,
}

#[async_trait]
impl ToolInvocation for SubagentInvocation {
    fn describe(&self) -> String {
        format!("sub-agent '{}'", self.definition.name)
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        _output: Option<OutputSink>,
    ) -> Result<ToolResult, EngineError> {
        // The parent batch holds the session scheduler, so the nested run
        // gets its own. Approval prompts are auto-denied inside
        // sub-agents; their tool sets are expected to be non-mutating.
        let (scheduler_tx, mut scheduler_rx) = mpsc::channel(256);
        let (event_tx, mut event_rx) = mpsc::channel(256);
        tokio::spawn(async move { while scheduler_rx.recv().await.is_some() {} });
        tokio::spawn(async move { while event_rx.recv().await.is_some() {} });

        let nested_runtime = Arc::new(AgentRuntime {
            registry: Arc::clone(&self.runtime.registry),
            scheduler: Arc::new(ToolScheduler::new(
                Arc::clone(&self.runtime.registry),
                Arc::new(crate::policy::PolicyEngine::new()),
                scheduler_tx,
                std::env::current_dir().unwrap_or_default(),
            )),
            router: Arc::clone(&self.runtime.router),
            providers: Arc::clone(&self.runtime.providers),
            hooks: Arc::clone(&self.runtime.hooks),
            chat_config: self.runtime.chat_config.clone(),
            events: event_tx,
        });

        let executor = AgentExecutor::new(self.definition.clone(), nested_runtime);
        let mut params = HashMap::new();
        params.insert("input".to_string(), self.task.clone());
        params.insert("task".to_string(), self.task.clone());

        let outcome = executor.run(&params, &cancel).await?;
        let result_text = outcome
            .result
            .as_ref()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();

        match outcome.terminate_reason {
            TerminateReason::TaskComplete => Ok(ToolResult::success_with_data(
                result_text,
                json!({ "turns": outcome.turns }),
            )),
            reason => Ok(ToolResult::error(format!(
                "sub-agent '{}' terminated without a result ({reason:?})",
                self.definition.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::testing::{Scripted, ScriptedProvider};
    use crate::hooks::config::{HookCommand, HookEntry, HookRegistry, HookSource};
    use crate::llm::ProviderError;
    use crate::policy::PolicyEngine;
    use crate::router::RouterConfig;
    use crate::types::{RetryConfig, SessionId};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Tool that counts executions, used to prove a call never ran.
    struct ProbeTool {
        name: &'static str,
        kind: ToolKind,
        executions: Arc<AtomicUsize>,
        sleep_ms: u64,
    }

    struct ProbeInvocation {
        executions: Arc<AtomicUsize>,
        sleep_ms: u64,
    }

    #[async_trait]
    impl ToolInvocation for ProbeInvocation {
        fn describe(&self) -> String {
            "probe".to_string()
        }

        async fn execute(
            &self,
            cancel: CancellationToken,
            _output: Option<OutputSink>,
        ) -> Result<ToolResult, EngineError> {
            if self.sleep_ms > 0 {
                tokio::select! {
                    () = tokio::time::sleep(Duration::from_millis(self.sleep_ms)) => {}
                    () = cancel.cancelled() => return Err(EngineError::Cancelled),
                }
            }
            self.executions.fetch_add(1, Ordering::SeqCst);
            Ok(ToolResult::success("probed"))
        }
    }

    impl Tool for ProbeTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "probe tool"
        }

        fn kind(&self) -> ToolKind {
            self.kind
        }

        fn input_schema(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }

        fn build_invocation(
            &self,
            _params: Value,
        ) -> Result<Box<dyn ToolInvocation>, EngineError> {
            Ok(Box::new(ProbeInvocation {
                executions: Arc::clone(&self.executions),
                sleep_ms: self.sleep_ms,
            }))
        }
    }

    fn runtime_with(
        script: Vec<Scripted>,
        registry: ToolRegistry,
        hooks: HookEngine,
    ) -> Arc<AgentRuntime> {
        let registry = Arc::new(registry);
        let provider: Arc<dyn ModelProvider> = Arc::new(ScriptedProvider::new(script));

        let (scheduler_tx, mut scheduler_rx) = mpsc::channel(256);
        tokio::spawn(async move { while scheduler_rx.recv().await.is_some() {} });
        let (event_tx, mut event_rx) = mpsc::channel(256);
        tokio::spawn(async move { while event_rx.recv().await.is_some() {} });

        Arc::new(AgentRuntime {
            registry: Arc::clone(&registry),
            scheduler: Arc::new(ToolScheduler::new(
                Arc::clone(&registry),
                Arc::new(PolicyEngine::new()),
                scheduler_tx,
                PathBuf::from("/tmp"),
            )),
            router: Arc::new(ModelRouter::new(RouterConfig::default(), None)),
            providers: Arc::new(ProviderSet::new(provider)),
            hooks: Arc::new(hooks),
            chat_config: ChatConfig {
                retry: RetryConfig::fast(),
                ..Default::default()
            },
            events: event_tx,
        })
    }

    fn read_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(crate::tools::testing::StaticTool::new(
            "read_file",
            ToolKind::Read,
            "# README first line",
        ));
        registry
    }

    fn run_params() -> HashMap<String, String> {
        let mut params = HashMap::new();
        params.insert("input".to_string(), "do the thing".to_string());
        params
    }

    #[tokio::test]
    async fn text_only_turn_completes_the_task() {
        let runtime = runtime_with(
            vec![Scripted::Text("All done, nothing to run.")],
            ToolRegistry::new(),
            HookEngine::disabled(),
        );
        let executor = AgentExecutor::new(AgentDefinition::new("main"), runtime);

        let outcome = executor
            .run(&run_params(), &CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(outcome.terminate_reason, TerminateReason::TaskComplete);
        assert_eq!(outcome.turns, 1);
        assert_eq!(
            outcome.result,
            Some(Value::String("All done, nothing to run.".to_string()))
        );
    }

    #[tokio::test]
    async fn tool_call_then_answer_takes_two_turns() {
        let runtime = runtime_with(
            vec![
                Scripted::Calls(vec![("c1", "read_file", json!({}))]),
                Scripted::Text("The first line is '# README first line'."),
            ],
            read_registry(),
            HookEngine::disabled(),
        );
        let executor = AgentExecutor::new(AgentDefinition::new("main"), runtime);

        let outcome = executor
            .run(&run_params(), &CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(outcome.terminate_reason, TerminateReason::TaskComplete);
        assert_eq!(outcome.turns, 2);
        let text = outcome.result.unwrap();
        assert!(text.as_str().unwrap().contains("# README first line"));
    }

    #[tokio::test]
    async fn complete_task_result_is_validated_against_schema() {
        let runtime = runtime_with(
            vec![Scripted::Calls(vec![(
                "c1",
                COMPLETE_TASK,
                json!({"result": {"answer": "42"}}),
            )])],
            ToolRegistry::new(),
            HookEngine::disabled(),
        );
        let definition = AgentDefinition::new("main").with_output_schema(json!({
            "type": "object",
            "properties": { "answer": { "type": "string" } },
            "required": ["answer"]
        }));
        let executor = AgentExecutor::new(definition, runtime);

        let outcome = executor
            .run(&run_params(), &CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(outcome.terminate_reason, TerminateReason::TaskComplete);
        assert_eq!(outcome.result.unwrap()["answer"], "42");
    }

    #[tokio::test]
    async fn invalid_completion_is_bounced_back_for_correction() {
        let runtime = runtime_with(
            vec![
                Scripted::Calls(vec![("c1", COMPLETE_TASK, json!({"result": {"wrong": 1}}))]),
                Scripted::Calls(vec![(
                    "c2",
                    COMPLETE_TASK,
                    json!({"result": {"answer": "fixed"}}),
                )]),
            ],
            ToolRegistry::new(),
            HookEngine::disabled(),
        );
        let definition = AgentDefinition::new("main").with_output_schema(json!({
            "type": "object",
            "properties": { "answer": { "type": "string" } },
            "required": ["answer"]
        }));
        let executor = AgentExecutor::new(definition, runtime);

        let outcome = executor
            .run(&run_params(), &CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(outcome.terminate_reason, TerminateReason::TaskComplete);
        assert_eq!(outcome.turns, 2);
        assert_eq!(outcome.result.unwrap()["answer"], "fixed");
    }

    #[tokio::test]
    async fn disallowed_tool_is_rejected_without_execution() {
        let executions = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(ProbeTool {
            name: "forbidden",
            kind: ToolKind::Read,
            executions: Arc::clone(&executions),
            sleep_ms: 0,
        });

        let runtime = runtime_with(
            vec![
                Scripted::Calls(vec![("c1", "forbidden", json!({}))]),
                Scripted::Text("Understood, I cannot use that tool."),
            ],
            registry,
            HookEngine::disabled(),
        );
        let definition =
            AgentDefinition::new("main").with_tools(vec!["read_file".to_string()]);
        let executor = AgentExecutor::new(definition, runtime);

        let outcome = executor
            .run(&run_params(), &CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(outcome.terminate_reason, TerminateReason::TaskComplete);
        assert_eq!(executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn zero_max_turns_terminates_immediately() {
        let runtime = runtime_with(
            vec![Scripted::Text("never sent")],
            ToolRegistry::new(),
            HookEngine::disabled(),
        );
        let executor =
            AgentExecutor::new(AgentDefinition::new("main").with_max_turns(0), runtime);

        let outcome = executor
            .run(&run_params(), &CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(outcome.terminate_reason, TerminateReason::MaxTurns);
        assert_eq!(outcome.turns, 0);
    }

    #[tokio::test]
    async fn final_warning_turn_can_still_complete() {
        let runtime = runtime_with(
            vec![
                Scripted::Calls(vec![("c1", "read_file", json!({}))]),
                Scripted::Calls(vec![("c2", COMPLETE_TASK, json!({"result": "partial"}))]),
            ],
            read_registry(),
            HookEngine::disabled(),
        );
        let executor =
            AgentExecutor::new(AgentDefinition::new("main").with_max_turns(1), runtime);

        let outcome = executor
            .run(&run_params(), &CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(outcome.terminate_reason, TerminateReason::TaskComplete);
        assert_eq!(outcome.result, Some(Value::String("partial".to_string())));
    }

    #[tokio::test]
    async fn exhausted_turns_without_completion_is_max_turns() {
        let runtime = runtime_with(
            vec![
                Scripted::Calls(vec![("c1", "read_file", json!({}))]),
                Scripted::Calls(vec![("c2", "read_file", json!({}))]),
            ],
            read_registry(),
            HookEngine::disabled(),
        );
        let executor =
            AgentExecutor::new(AgentDefinition::new("main").with_max_turns(1), runtime);

        let outcome = executor
            .run(&run_params(), &CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(outcome.terminate_reason, TerminateReason::MaxTurns);
        assert_eq!(outcome.turns, 1);
    }

    #[tokio::test]
    async fn quota_exhaustion_switches_to_fallback_model() {
        let registry = Arc::new(ToolRegistry::new());
        let failing: Arc<dyn ModelProvider> = Arc::new(ScriptedProvider::new(vec![
            Scripted::Fail(ProviderError::QuotaExhausted("daily cap".into())),
        ]));
        let fallback: Arc<dyn ModelProvider> = Arc::new(ScriptedProvider::new(vec![
            Scripted::Text("answered on fallback"),
        ]));

        let (scheduler_tx, mut scheduler_rx) = mpsc::channel(64);
        tokio::spawn(async move { while scheduler_rx.recv().await.is_some() {} });
        let (event_tx, mut event_rx) = mpsc::channel(64);
        tokio::spawn(async move { while event_rx.recv().await.is_some() {} });

        let config = RouterConfig {
            default_model: "pro".to_string(),
            fallback_model: "flash".to_string(),
            ..Default::default()
        };
        let router = Arc::new(ModelRouter::new(config, None));
        let runtime = Arc::new(AgentRuntime {
            registry: Arc::clone(&registry),
            scheduler: Arc::new(ToolScheduler::new(
                Arc::clone(&registry),
                Arc::new(PolicyEngine::new()),
                scheduler_tx,
                PathBuf::from("/tmp"),
            )),
            router: Arc::clone(&router),
            providers: Arc::new(
                ProviderSet::new(failing).with_model("flash", fallback),
            ),
            hooks: Arc::new(HookEngine::disabled()),
            chat_config: ChatConfig {
                retry: RetryConfig::fast(),
                ..Default::default()
            },
            events: event_tx,
        });

        let executor = AgentExecutor::new(AgentDefinition::new("main"), runtime);
        let outcome = executor
            .run(&run_params(), &CancellationToken::new())
            .await
            .expect("run");

        assert_eq!(outcome.terminate_reason, TerminateReason::TaskComplete);
        assert!(router.in_fallback_mode());
        assert_eq!(
            outcome.result,
            Some(Value::String("answered on fallback".to_string()))
        );
    }

    #[tokio::test]
    async fn hook_denied_tool_never_executes_and_skips_after_tool() {
        let marker_dir =
            std::env::temp_dir().join(format!("executor-hook-test-{}", std::process::id()));
        std::fs::create_dir_all(&marker_dir).unwrap();
        let marker = marker_dir.join("after-tool-ran");

        let executions = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(ProbeTool {
            name: "edit",
            kind: ToolKind::Read,
            executions: Arc::clone(&executions),
            sleep_ms: 0,
        });

        let mut hook_registry = HookRegistry::default();
        hook_registry.add(HookEntry {
            event: HookEvent::BeforeTool,
            matcher: Some("edit".to_string()),
            sequential: false,
            commands: vec![HookCommand {
                command: r#"echo '{"decision":"deny","reason":"protected path"}'"#.to_string(),
                timeout_ms: 5_000,
            }],
            source: HookSource::Project,
            enabled: true,
        });
        hook_registry.add(HookEntry {
            event: HookEvent::AfterTool,
            matcher: Some("edit".to_string()),
            sequential: false,
            commands: vec![HookCommand {
                command: format!("touch {}", marker.display()),
                timeout_ms: 5_000,
            }],
            source: HookSource::Project,
            enabled: true,
        });
        let hooks = HookEngine::new(
            hook_registry,
            SessionId::new(),
            marker_dir.join("t.jsonl"),
            marker_dir.clone(),
        );

        let runtime = runtime_with(
            vec![
                Scripted::Calls(vec![("c1", "edit", json!({}))]),
                Scripted::Text("Acknowledged, the edit was blocked."),
            ],
            registry,
            hooks,
        );
        let executor = AgentExecutor::new(AgentDefinition::new("main"), runtime);

        let outcome = executor
            .run(&run_params(), &CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(outcome.terminate_reason, TerminateReason::TaskComplete);
        assert_eq!(executions.load(Ordering::SeqCst), 0, "tool must not run");
        assert!(!marker.exists(), "AfterTool must not fire for denied call");

        let _ = std::fs::remove_dir_all(&marker_dir);
    }

    #[tokio::test]
    async fn pre_cancelled_run_terminates_as_cancelled() {
        let runtime = runtime_with(
            vec![Scripted::Text("never")],
            ToolRegistry::new(),
            HookEngine::disabled(),
        );
        let executor = AgentExecutor::new(AgentDefinition::new("main"), runtime);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = executor.run(&run_params(), &cancel).await.expect("run");
        assert_eq!(outcome.terminate_reason, TerminateReason::Cancelled);
    }

    #[tokio::test]
    async fn time_budget_expiry_terminates_as_timeout() {
        let executions = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(ProbeTool {
            name: "slow_tool",
            kind: ToolKind::Read,
            executions,
            sleep_ms: 5_000,
        });

        let runtime = runtime_with(
            vec![Scripted::Calls(vec![("c1", "slow_tool", json!({}))])],
            registry,
            HookEngine::disabled(),
        );
        let definition = AgentDefinition::new("main")
            .with_time_budget(Duration::from_millis(80))
            .with_max_turns(5);
        let executor = AgentExecutor::new(definition, runtime);

        let started = Instant::now();
        let outcome = executor
            .run(&run_params(), &CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(outcome.terminate_reason, TerminateReason::Timeout);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn subagent_result_becomes_tool_response() {
        // Shared scripted provider: parent turn, nested turn, parent turn.
        let provider: Arc<dyn ModelProvider> = Arc::new(ScriptedProvider::new(vec![
            Scripted::Calls(vec![("c1", "helper", json!({"task": "look around"}))]),
            Scripted::Text("nested result"),
            Scripted::Text("parent finished using the nested result"),
        ]));

        let (sub_event_tx, mut sub_event_rx) = mpsc::channel(64);
        tokio::spawn(async move { while sub_event_rx.recv().await.is_some() {} });
        let (sub_sched_tx, mut sub_sched_rx) = mpsc::channel(64);
        tokio::spawn(async move { while sub_sched_rx.recv().await.is_some() {} });

        let empty_registry = Arc::new(ToolRegistry::new());
        let sub_runtime = Arc::new(AgentRuntime {
            registry: Arc::clone(&empty_registry),
            scheduler: Arc::new(ToolScheduler::new(
                Arc::clone(&empty_registry),
                Arc::new(PolicyEngine::new()),
                sub_sched_tx,
                PathBuf::from("/tmp"),
            )),
            router: Arc::new(ModelRouter::new(RouterConfig::default(), None)),
            providers: Arc::new(ProviderSet::new(Arc::clone(&provider))),
            hooks: Arc::new(HookEngine::disabled()),
            chat_config: ChatConfig {
                retry: RetryConfig::fast(),
                ..Default::default()
            },
            events: sub_event_tx,
        });

        let helper_definition = AgentDefinition::new("helper")
            .with_system_prompt("You are a focused helper.")
            .with_max_turns(3);

        let mut parent_registry = ToolRegistry::new();
        parent_registry.register(SubagentTool::new(helper_definition, sub_runtime));

        let parent_registry = Arc::new(parent_registry);
        let (sched_tx, mut sched_rx) = mpsc::channel(64);
        tokio::spawn(async move { while sched_rx.recv().await.is_some() {} });
        let (event_tx, mut event_rx) = mpsc::channel(64);
        tokio::spawn(async move { while event_rx.recv().await.is_some() {} });

        let parent_runtime = Arc::new(AgentRuntime {
            registry: Arc::clone(&parent_registry),
            scheduler: Arc::new(ToolScheduler::new(
                Arc::clone(&parent_registry),
                Arc::new(PolicyEngine::new()),
                sched_tx,
                PathBuf::from("/tmp"),
            )),
            router: Arc::new(ModelRouter::new(RouterConfig::default(), None)),
            providers: Arc::new(ProviderSet::new(provider)),
            hooks: Arc::new(HookEngine::disabled()),
            chat_config: ChatConfig {
                retry: RetryConfig::fast(),
                ..Default::default()
            },
            events: event_tx,
        });

        let executor = AgentExecutor::new(AgentDefinition::new("main"), parent_runtime);
        let outcome = executor
            .run(&run_params(), &CancellationToken::new())
            .await
            .expect("run");

        assert_eq!(outcome.terminate_reason, TerminateReason::TaskComplete);
        assert_eq!(outcome.turns, 2);
        let text = outcome.result.unwrap();
        assert!(text.as_str().unwrap().contains("nested result"));
    }

    #[test]
    fn template_substitution() {
        let mut params = HashMap::new();
        params.insert("input".to_string(), "scan the repo".to_string());
        params.insert("depth".to_string(), "3".to_string());
        assert_eq!(
            substitute("Task: ${input} (depth ${depth})", &params),
            "Task: scan the repo (depth 3)"
        );
    }
}
