//! Tool scheduler: drives tool calls from validation through confirmation
//! to execution.
//!
//! Each call in a batch walks the state machine independently:
//!
//! ```text
//! validating → awaiting_approval → scheduled → executing → {successful | errored | cancelled}
//!                        │                                      ↑
//!                        └── auto-approved path ────────────────┘
//! ```
//!
//! Non-confirmation calls execute in parallel; calls that require approval
//! serialize against the user, one prompt at a time. Batches queue FIFO
//! while one is active. Responses come back in the order of the
//! originating calls regardless of completion order.

use crate::llm::Part;
use crate::policy::{PolicyDecision, PolicyEngine};
use crate::tools::{ToolInvocation, ToolRegistry, schema};
use crate::types::{EngineError, ToolResult};
use crate::util::millis_to_u64;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Status of one scheduled call. Transitions never go backward; a cancel
/// signal absorbs any non-terminal state into `Cancelled`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Validating,
    AwaitingApproval,
    Scheduled,
    Executing,
    Successful,
    Errored,
    Cancelled,
}

impl CallStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Successful | Self::Errored | Self::Cancelled)
    }
}

/// The scheduler's record of one invocation.
#[derive(Clone, Debug)]
pub struct ToolCallRecord {
    pub id: String,
    pub tool_name: String,
    pub params: Value,
    pub status: CallStatus,
    pub result: Option<ToolResult>,
    pub error: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ToolCallRecord {
    fn new(id: String, tool_name: String, params: Value) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id,
            tool_name,
            params,
            status: CallStatus::Validating,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, status: CallStatus) {
        debug_assert!(!self.status.is_terminal(), "terminal states are final");
        self.status = status;
        self.updated_at = OffsetDateTime::now_utc();
    }
}

/// One call requested by the model.
#[derive(Clone, Debug)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub params: Value,
}

/// A call plus any decision already made upstream (hook outcomes feed in
/// here as if they were policy answers).
#[derive(Debug)]
pub struct BatchEntry {
    pub request: ToolCallRequest,
    pub pre_decision: Option<PolicyDecision>,
}

impl BatchEntry {
    #[must_use]
    pub fn new(request: ToolCallRequest) -> Self {
        Self {
            request,
            pre_decision: None,
        }
    }

    #[must_use]
    pub fn with_decision(mut self, decision: PolicyDecision) -> Self {
        self.pre_decision = Some(decision);
        self
    }
}

/// Events produced by the scheduler toward the embedding UI.
#[derive(Debug)]
pub enum SchedulerEvent {
    /// A call changed state.
    CallUpdated(ToolCallRecord),

    /// A call needs user approval. Answer through the responder; dropping
    /// it counts as a denial.
    ApprovalRequest {
        call_id: String,
        tool_name: String,
        description: String,
        params: Value,
        responder: oneshot::Sender<bool>,
    },

    /// Streamed output from an executing call.
    Output { call_id: String, chunk: String },
}

/// Exactly one scheduler exists per session; at most one batch runs at a
/// time and additional batches queue FIFO on the internal gate.
pub struct ToolScheduler {
    registry: Arc<ToolRegistry>,
    policy: Arc<PolicyEngine>,
    events: mpsc::Sender<SchedulerEvent>,
    cwd: PathBuf,
    batch_gate: Mutex<()>,
}

enum Prepared {
    Ready {
        index: usize,
        record: ToolCallRecord,
        invocation: Box<dyn ToolInvocation>,
        needs_approval: Option<String>,
    },
    Finished {
        index: usize,
        record: ToolCallRecord,
    },
}

impl ToolScheduler {
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        policy: Arc<PolicyEngine>,
        events: mpsc::Sender<SchedulerEvent>,
        cwd: PathBuf,
    ) -> Self {
        Self {
            registry,
            policy,
            events,
            cwd,
            batch_gate: Mutex::new(()),
        }
    }

    /// Run one batch to completion and return the function responses in
    /// the order of the originating calls.
    pub async fn schedule(
        &self,
        batch: Vec<BatchEntry>,
        cancel: &CancellationToken,
    ) -> Vec<Part> {
        let _gate = self.batch_gate.lock().await;

        let total = batch.len();
        let mut finished: Vec<Option<(ToolCallRecord, Part)>> = (0..total).map(|_| None).collect();
        let mut ready = Vec::new();

        for (index, entry) in batch.into_iter().enumerate() {
            match self.prepare(index, entry, cancel).await {
                Prepared::Ready {
                    index,
                    record,
                    invocation,
                    needs_approval,
                } => ready.push((index, record, invocation, needs_approval)),
                Prepared::Finished { index, record } => {
                    let part = record_to_part(&record);
                    self.emit(SchedulerEvent::CallUpdated(record.clone())).await;
                    finished[index] = Some((record, part));
                }
            }
        }

        // Auto-approved calls start immediately and run in parallel.
        let mut running: Vec<(usize, JoinHandle<(ToolCallRecord, Part)>)> = Vec::new();
        let mut pending_approval = Vec::new();
        for (index, mut record, invocation, needs_approval) in ready {
            if let Some(prompt) = needs_approval {
                record.transition(CallStatus::AwaitingApproval);
                self.emit(SchedulerEvent::CallUpdated(record.clone())).await;
                pending_approval.push((index, record, invocation, prompt));
            } else {
                record.transition(CallStatus::Scheduled);
                self.emit(SchedulerEvent::CallUpdated(record.clone())).await;
                running.push((index, self.spawn_execution(record, invocation, cancel)));
            }
        }

        // Approvals serialize: at most one prompt is in flight at a time.
        for (index, mut record, invocation, prompt) in pending_approval {
            if cancel.is_cancelled() {
                record.transition(CallStatus::Cancelled);
                let part = record_to_part(&record);
                self.emit(SchedulerEvent::CallUpdated(record.clone())).await;
                finished[index] = Some((record, part));
                continue;
            }

            let (responder, answer) = oneshot::channel();
            self.emit(SchedulerEvent::ApprovalRequest {
                call_id: record.id.clone(),
                tool_name: record.tool_name.clone(),
                description: prompt,
                params: record.params.clone(),
                responder,
            })
            .await;

            let approved = tokio::select! {
                answer = answer => answer.unwrap_or(false),
                () = cancel.cancelled() => {
                    record.transition(CallStatus::Cancelled);
                    let part = record_to_part(&record);
                    self.emit(SchedulerEvent::CallUpdated(record.clone())).await;
                    finished[index] = Some((record, part));
                    continue;
                }
            };

            if approved {
                record.transition(CallStatus::Scheduled);
                self.emit(SchedulerEvent::CallUpdated(record.clone())).await;
                running.push((index, self.spawn_execution(record, invocation, cancel)));
            } else {
                record.error = Some("user denied the request".to_string());
                record.transition(CallStatus::Errored);
                let part = record_to_part(&record);
                self.emit(SchedulerEvent::CallUpdated(record.clone())).await;
                finished[index] = Some((record, part));
            }
        }

        for (index, handle) in running {
            let (record, part) = match handle.await {
                Ok(done) => done,
                Err(e) => {
                    // A panicking tool must not poison the batch.
                    tracing::error!(error = %e, "tool execution task failed");
                    let mut record = ToolCallRecord::new(
                        format!("unknown-{index}"),
                        String::new(),
                        Value::Null,
                    );
                    record.error = Some(format!("execution task failed: {e}"));
                    record.transition(CallStatus::Errored);
                    let part = record_to_part(&record);
                    (record, part)
                }
            };
            self.emit(SchedulerEvent::CallUpdated(record.clone())).await;
            finished[index] = Some((record, part));
        }

        finished
            .into_iter()
            .flatten()
            .map(|(_, part)| part)
            .collect()
    }

    async fn prepare(
        &self,
        index: usize,
        entry: BatchEntry,
        cancel: &CancellationToken,
    ) -> Prepared {
        let ToolCallRequest { id, name, params } = entry.request;
        let mut record = ToolCallRecord::new(id, name, params);
        self.emit(SchedulerEvent::CallUpdated(record.clone())).await;

        if cancel.is_cancelled() {
            record.transition(CallStatus::Cancelled);
            return Prepared::Finished { index, record };
        }

        let tool = match self.registry.get(&record.tool_name) {
            Ok(tool) => tool,
            Err(e) => {
                record.error = Some(e.to_string());
                record.transition(CallStatus::Errored);
                return Prepared::Finished { index, record };
            }
        };

        if let Err(reason) = schema::validate(&tool.input_schema(), &record.params, true) {
            record.error = Some(format!("invalid params: {reason}"));
            record.transition(CallStatus::Errored);
            return Prepared::Finished { index, record };
        }

        let invocation = match tool.build_invocation(record.params.clone()) {
            Ok(invocation) => invocation,
            Err(e) => {
                record.error = Some(e.to_string());
                record.transition(CallStatus::Errored);
                return Prepared::Finished { index, record };
            }
        };

        let decision = entry.pre_decision.unwrap_or_else(|| {
            self.policy
                .check(&record.tool_name, tool.kind(), &record.params, &self.cwd)
        });

        match decision {
            PolicyDecision::Deny { reason } => {
                // Denied before the user is even prompted.
                record.error = Some(reason);
                record.transition(CallStatus::Errored);
                Prepared::Finished { index, record }
            }
            PolicyDecision::AskUser => {
                let prompt = invocation
                    .needs_confirmation()
                    .unwrap_or_else(|| invocation.describe());
                Prepared::Ready {
                    index,
                    record,
                    invocation,
                    needs_approval: Some(prompt),
                }
            }
            PolicyDecision::Allow => {
                let needs_approval = invocation.needs_confirmation();
                Prepared::Ready {
                    index,
                    record,
                    invocation,
                    needs_approval,
                }
            }
        }
    }

    fn spawn_execution(
        &self,
        mut record: ToolCallRecord,
        invocation: Box<dyn ToolInvocation>,
        cancel: &CancellationToken,
    ) -> JoinHandle<(ToolCallRecord, Part)> {
        let events = self.events.clone();
        let token = cancel.child_token();

        tokio::spawn(async move {
            record.transition(CallStatus::Executing);
            let _ = events
                .send(SchedulerEvent::CallUpdated(record.clone()))
                .await;

            // Streamed chunks are forwarded without blocking execution.
            let (chunk_tx, mut chunk_rx) = mpsc::channel::<String>(64);
            let forward_events = events.clone();
            let call_id = record.id.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(chunk) = chunk_rx.recv().await {
                    let _ = forward_events
                        .send(SchedulerEvent::Output {
                            call_id: call_id.clone(),
                            chunk,
                        })
                        .await;
                }
            });

            let started = Instant::now();
            let outcome = tokio::select! {
                outcome = invocation.execute(token.clone(), Some(chunk_tx)) => outcome,
                () = token.cancelled() => Err(EngineError::Cancelled),
            };
            let _ = forwarder.await;

            match outcome {
                Ok(mut result) => {
                    if result.duration_ms.is_none() {
                        result.duration_ms = Some(millis_to_u64(started.elapsed().as_millis()));
                    }
                    let success = result.success;
                    if !success {
                        record.error = Some(result.output.clone());
                    }
                    record.result = Some(result);
                    record.transition(if success {
                        CallStatus::Successful
                    } else {
                        CallStatus::Errored
                    });
                }
                Err(EngineError::Cancelled) => {
                    record.transition(CallStatus::Cancelled);
                }
                Err(e) => {
                    record.error = Some(e.to_string());
                    record.transition(CallStatus::Errored);
                }
            }

            let part = record_to_part(&record);
            (record, part)
        })
    }

    async fn emit(&self, event: SchedulerEvent) {
        let _ = self.events.send(event).await;
    }
}

/// Map a terminal record to its function response. A cancelled call still
/// gets a synthetic response carrying the cancelled marker so history
/// stays well-formed.
fn record_to_part(record: &ToolCallRecord) -> Part {
    match record.status {
        CallStatus::Successful => {
            let result = record.result.as_ref();
            let mut payload = serde_json::Map::new();
            payload.insert(
                "output".to_string(),
                Value::String(result.map(|r| r.output.clone()).unwrap_or_default()),
            );
            if let Some(data) = result.and_then(|r| r.data.clone()) {
                payload.insert("data".to_string(), data);
            }
            Part::function_response(&record.id, &record.tool_name, Value::Object(payload))
        }
        CallStatus::Cancelled => Part::function_cancelled(&record.id, &record.tool_name),
        _ => Part::function_error(
            &record.id,
            &record.tool_name,
            record
                .error
                .clone()
                .unwrap_or_else(|| "tool call failed".to_string()),
        ),
    }
}
