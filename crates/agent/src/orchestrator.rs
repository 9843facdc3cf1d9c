//! The step orchestrator: generation and tool execution for one user turn.
//!
//! ```text
//! Idle -> Generating -> { ToolsPending -> Executing -> Generating }* -> Done
//! ```
//!
//! `Cancelled` is reachable from every non-terminal state. Each step streams
//! one generation call; the tool calls it requests run in emission order and
//! their call/result parts are appended before the next step starts. A call
//! is committed only together with its result, so a cancelled turn never
//! leaves a dangling tool call behind.
//!
//! Client-owned tools and approval-gated tools park the turn in a pending
//! state keyed by a correlation id until the matching [`ExternalResolution`]
//! arrives or the external timeout expires.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use deepdive_config::{AppConfig, MAX_STEPS};
use deepdive_core::error::{ProviderError, ToolError};
use deepdive_core::event::{DomainEvent, EventBus};
use deepdive_core::message::{
    ApprovalState, Conversation, Message, Part, ReasoningState, Role, ToolOutput,
};
use deepdive_core::provider::{
    ExecutionMode, GenerationRequest, Provider, ToolCallRequest, ToolDefinition, Usage,
};
use deepdive_core::tool::{ToolCall, ToolRegistry};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::token::{estimate_messages_tokens, estimate_tools_tokens};
use crate::context::{ContextPruner, PrunePolicy};
use crate::prompt::research_directive;
use crate::stream_event::{FinishReason, UiEvent};

/// Called with the assembled assistant message when a turn completes normally.
pub type FinishCallback = Arc<dyn Fn(&Message) + Send + Sync>;

/// An answer for a call that is waiting on the outside world.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalResolution {
    /// Result of a client-owned tool, keyed by call id.
    ToolOutput { call_id: String, output: ToolOutput },
    /// Decision on an approval request, keyed by approval id.
    Approval { approval_id: String, approved: bool },
}

/// The orchestrator's end of a running turn.
pub struct TurnIo {
    pub events: mpsc::Sender<UiEvent>,
    pub resolutions: mpsc::Receiver<ExternalResolution>,
    pub cancel: CancellationToken,
}

/// The caller's end of a running turn.
pub struct TurnHandle {
    pub events: mpsc::Receiver<UiEvent>,
    pub resolutions: mpsc::Sender<ExternalResolution>,
    pub cancel: CancellationToken,
}

impl TurnIo {
    /// Create both ends of a turn's plumbing.
    pub fn channel(capacity: usize) -> (TurnIo, TurnHandle) {
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let (resolution_tx, resolution_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        (
            TurnIo {
                events: event_tx,
                resolutions: resolution_rx,
                cancel: cancel.clone(),
            },
            TurnHandle {
                events: event_rx,
                resolutions: resolution_tx,
                cancel,
            },
        )
    }

    async fn emit(&self, event: UiEvent) {
        // A departed listener doesn't stop the turn
        let _ = self.events.send(event).await;
    }
}

/// Terminal state of a turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Everything the assistant produced, possibly partial.
    pub message: Message,
    pub finish: FinishReason,
    pub steps: u32,
    pub usage: Option<Usage>,
    /// Set when `finish` is [`FinishReason::Error`].
    pub error: Option<ProviderError>,
}

impl TurnOutcome {
    pub fn has_content(&self) -> bool {
        !self.message.parts.is_empty()
    }
}

enum StepEnd {
    Completed {
        tool_calls: Vec<ToolCallRequest>,
        usage: Option<Usage>,
    },
    Cancelled,
    Failed(ProviderError),
}

enum Waited<T> {
    Resolved(T),
    TimedOut,
    Cancelled,
}

/// Text and reasoning streamed during one step.
#[derive(Default)]
struct StepDraft {
    reasoning: String,
    reasoning_closed: bool,
    text: String,
}

impl StepDraft {
    async fn close_reasoning(&mut self, io: &TurnIo) {
        if !self.reasoning.is_empty() && !self.reasoning_closed {
            self.reasoning_closed = true;
            io.emit(UiEvent::ReasoningEnd).await;
        }
    }

    fn commit(self, message: &mut Message) {
        if !self.reasoning.is_empty() {
            let state = if self.reasoning_closed {
                ReasoningState::Done
            } else {
                ReasoningState::Streaming
            };
            message.parts.push(Part::Reasoning {
                text: self.reasoning,
                state,
            });
        }
        if !self.text.is_empty() {
            message.parts.push(Part::Text { text: self.text });
        }
    }
}

/// Runs the generation / tool-call loop.
pub struct StepOrchestrator {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    tools: Arc<ToolRegistry>,
    pruner: ContextPruner,
    directive: String,
    max_steps: u32,
    external_timeout: Duration,
    event_bus: Arc<EventBus>,
    on_finish: Option<FinishCallback>,
}

impl StepOrchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: Arc<ToolRegistry>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            tools,
            pruner: ContextPruner::default(),
            directive: research_directive(None),
            max_steps: 10,
            external_timeout: Duration::from_secs(120),
            event_bus,
            on_finish: None,
        }
    }

    /// Build an orchestrator with the model and loop settings from `config`.
    ///
    /// A `default_model` set on the active provider's table wins over the
    /// global one.
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let model = config
            .providers
            .get(&config.default_provider)
            .and_then(|p| p.default_model.clone())
            .unwrap_or_else(|| config.default_model.clone());

        Self::new(provider, model, tools, event_bus)
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens)
            .with_max_steps(config.agent.max_steps)
            .with_prune_policy(PrunePolicy::BeforeLastMessages(config.agent.prune_keep_last))
            .with_external_timeout(Duration::from_secs(config.agent.external_timeout_secs))
            .with_directive(research_directive(config.agent.extra_instructions.as_deref()))
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Set the maximum number of generation steps per turn, capped at
    /// [`MAX_STEPS`].
    pub fn with_max_steps(mut self, max: u32) -> Self {
        self.max_steps = max.clamp(1, MAX_STEPS);
        self
    }

    pub fn with_prune_policy(mut self, policy: PrunePolicy) -> Self {
        self.pruner = ContextPruner::new(policy);
        self
    }

    /// How long a client tool or approval may stay pending.
    pub fn with_external_timeout(mut self, timeout: Duration) -> Self {
        self.external_timeout = timeout;
        self
    }

    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directive = directive.into();
        self
    }

    pub fn with_on_finish(mut self, callback: FinishCallback) -> Self {
        self.on_finish = Some(callback);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Answer the last user message of `conversation`.
    ///
    /// The conversation is read, never written: the caller appends the
    /// returned message. Every failure mode ends in a [`TurnOutcome`];
    /// generation failures also emit [`UiEvent::Error`].
    pub async fn run(&self, conversation: &Conversation, mut io: TurnIo) -> TurnOutcome {
        let conversation_id = conversation.id.to_string();
        let mut message = Message::new(Role::Assistant, Vec::new());
        let tools = self.tools.describe();

        info!(
            conversation_id = %conversation_id,
            messages = conversation.messages.len(),
            "Starting turn"
        );
        io.emit(UiEvent::Start {
            message_id: message.id.clone(),
        })
        .await;

        let mut steps = 0;
        let mut usage: Option<Usage> = None;
        let mut error = None;

        let finish = 'turn: loop {
            if steps >= self.max_steps {
                warn!(
                    conversation_id = %conversation_id,
                    steps,
                    "Step limit reached, ending turn"
                );
                break FinishReason::StepLimit;
            }
            steps += 1;

            let request = self.build_request(&conversation.messages, &message, &tools);
            debug!(
                conversation_id = %conversation_id,
                step = steps,
                messages = request.messages.len(),
                estimated_tokens = estimate_messages_tokens(&request.messages)
                    + estimate_tools_tokens(&request.tools),
                "Issuing generation step"
            );

            let tool_calls = match self.stream_step(request, &mut message, &io).await {
                StepEnd::Completed {
                    tool_calls,
                    usage: step_usage,
                } => {
                    if let Some(step_usage) = step_usage {
                        usage = Some(usage.unwrap_or_default().add(step_usage));
                    }
                    tool_calls
                }
                StepEnd::Cancelled => break FinishReason::Cancelled,
                StepEnd::Failed(e) => {
                    warn!(conversation_id = %conversation_id, step = steps, error = %e, "Generation failed");
                    io.emit(UiEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                    self.event_bus.publish(DomainEvent::ErrorOccurred {
                        context: format!("generation step {steps}"),
                        error_message: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    error = Some(e);
                    break FinishReason::Error;
                }
            };

            self.event_bus.publish(DomainEvent::StepCompleted {
                conversation_id: conversation_id.clone(),
                step: steps,
                tool_calls: tool_calls.len(),
                timestamp: Utc::now(),
            });

            if tool_calls.is_empty() {
                break FinishReason::Stop;
            }

            debug!(step = steps, count = tool_calls.len(), "Executing tool calls");

            let mut calls = Vec::with_capacity(tool_calls.len());
            let mut results = Vec::with_capacity(tool_calls.len());
            for request in &tool_calls {
                match self.execute_call(request, &mut io).await {
                    Some((call, result)) => {
                        calls.push(call);
                        results.push(result);
                    }
                    None => {
                        debug!(call_id = %request.id, "Dropping in-flight tool call on cancel");
                        message.parts.extend(calls);
                        message.parts.extend(results);
                        break 'turn FinishReason::Cancelled;
                    }
                }
            }
            message.parts.extend(calls);
            message.parts.extend(results);
        };

        io.emit(UiEvent::Finish {
            message_id: message.id.clone(),
            finish_reason: finish,
            steps,
            usage,
        })
        .await;

        self.event_bus.publish(DomainEvent::TurnFinished {
            conversation_id: conversation_id.clone(),
            finish_reason: finish.as_str().into(),
            steps,
            timestamp: Utc::now(),
        });

        info!(
            conversation_id = %conversation_id,
            finish = finish.as_str(),
            steps,
            parts = message.parts.len(),
            "Turn finished"
        );

        if matches!(finish, FinishReason::Stop | FinishReason::StepLimit) {
            if let Some(callback) = &self.on_finish {
                callback(&message);
            }
        }

        TurnOutcome {
            message,
            finish,
            steps,
            usage,
            error,
        }
    }

    fn build_request(
        &self,
        history: &[Message],
        in_progress: &Message,
        tools: &[ToolDefinition],
    ) -> GenerationRequest {
        let mut context = history.to_vec();
        if !in_progress.parts.is_empty() {
            context.push(in_progress.clone());
        }

        let mut messages = vec![Message::system(&self.directive)];
        messages.extend(self.pruner.prune(&context));

        GenerationRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: tools.to_vec(),
        }
    }

    /// Stream one generation call, forwarding deltas and committing the
    /// step's reasoning and text to `message`.
    async fn stream_step(
        &self,
        request: GenerationRequest,
        message: &mut Message,
        io: &TurnIo,
    ) -> StepEnd {
        let mut rx = tokio::select! {
            biased;
            _ = io.cancel.cancelled() => return StepEnd::Cancelled,
            result = self.provider.stream(request) => match result {
                Ok(rx) => rx,
                Err(e) => return StepEnd::Failed(e),
            },
        };

        let mut draft = StepDraft::default();
        let end = loop {
            let next = tokio::select! {
                biased;
                _ = io.cancel.cancelled() => break StepEnd::Cancelled,
                next = rx.recv() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    if let Some(delta) = chunk.reasoning {
                        draft.reasoning.push_str(&delta);
                        io.emit(UiEvent::ReasoningDelta { delta }).await;
                    }
                    if let Some(delta) = chunk.content {
                        draft.close_reasoning(io).await;
                        draft.text.push_str(&delta);
                        io.emit(UiEvent::TextDelta { delta }).await;
                    }
                    if chunk.done {
                        break StepEnd::Completed {
                            tool_calls: chunk.tool_calls,
                            usage: chunk.usage,
                        };
                    }
                }
                Some(Err(e)) => break StepEnd::Failed(e),
                None => {
                    break StepEnd::Completed {
                        tool_calls: Vec::new(),
                        usage: None,
                    };
                }
            }
        };

        // Reasoning cut short by a cancel or failure stays `Streaming`
        if matches!(end, StepEnd::Completed { .. }) {
            draft.close_reasoning(io).await;
        }
        draft.commit(message);
        end
    }

    /// Run one tool call to completion. `None` means the turn was cancelled
    /// before a result existed.
    async fn execute_call(
        &self,
        request: &ToolCallRequest,
        io: &mut TurnIo,
    ) -> Option<(Part, Part)> {
        let started = Instant::now();
        let parsed = parse_arguments(&request.arguments);
        let input = match &parsed {
            Ok(input) => input.clone(),
            Err(_) => serde_json::Value::String(request.arguments.clone()),
        };

        io.emit(UiEvent::ToolInputAvailable {
            call_id: request.id.clone(),
            tool_name: request.name.clone(),
            input: input.clone(),
        })
        .await;

        let (output, approval) = match parsed {
            Ok(_) => self.resolve_call(request, &input, io).await?,
            Err(reason) => (
                ToolOutput::Error(
                    ToolError::InvalidInput {
                        tool_name: request.name.clone(),
                        reason: format!("arguments are not valid JSON: {reason}"),
                    }
                    .to_string(),
                ),
                ApprovalState::Completed,
            ),
        };

        match &output {
            ToolOutput::Value(value) => {
                io.emit(UiEvent::ToolOutputAvailable {
                    call_id: request.id.clone(),
                    output: value.clone(),
                })
                .await;
            }
            ToolOutput::Error(error_text) => {
                warn!(tool = %request.name, call_id = %request.id, error = %error_text, "Tool call failed");
                io.emit(UiEvent::ToolOutputError {
                    call_id: request.id.clone(),
                    error_text: error_text.clone(),
                })
                .await;
            }
        }

        self.event_bus.publish(DomainEvent::ToolExecuted {
            tool_name: request.name.clone(),
            success: !output.is_error(),
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });

        Some((
            Part::ToolCall {
                call_id: request.id.clone(),
                tool_name: request.name.clone(),
                input,
            },
            Part::ToolResult {
                call_id: request.id.clone(),
                tool_name: request.name.clone(),
                output,
                approval,
            },
        ))
    }

    async fn resolve_call(
        &self,
        request: &ToolCallRequest,
        input: &serde_json::Value,
        io: &mut TurnIo,
    ) -> Option<(ToolOutput, ApprovalState)> {
        let tool = match self
            .tools
            .resolve(&request.name)
            .and_then(|kind| {
                self.tools
                    .get(kind)
                    .ok_or_else(|| ToolError::NotFound(request.name.clone()))
            }) {
            Ok(tool) => tool,
            Err(e) => return Some((ToolOutput::Error(e.to_string()), ApprovalState::Completed)),
        };

        if let Err(e) = tool.validate(input) {
            return Some((ToolOutput::Error(e.to_string()), ApprovalState::Completed));
        }

        let mut approval = ApprovalState::Completed;
        if self.tools.needs_approval(tool.kind()) {
            let rejected = ToolError::Rejected(request.name.clone()).to_string();
            match self.await_approval(request, input, io).await {
                Waited::Resolved(true) => approval = ApprovalState::Approved,
                Waited::Resolved(false) => {
                    return Some((ToolOutput::Error(rejected), ApprovalState::Rejected));
                }
                Waited::TimedOut => {
                    return Some((
                        ToolOutput::Error(format!(
                            "{rejected}: no decision within {}s",
                            self.external_timeout.as_secs()
                        )),
                        ApprovalState::Rejected,
                    ));
                }
                Waited::Cancelled => return None,
            }
        }

        let output = match tool.execution() {
            ExecutionMode::Server => {
                let call = ToolCall {
                    id: request.id.clone(),
                    name: request.name.clone(),
                    arguments: input.clone(),
                };
                tokio::select! {
                    biased;
                    _ = io.cancel.cancelled() => return None,
                    result = self.tools.execute(&call) => match result {
                        Ok(result) => ToolOutput::Value(result.output),
                        Err(e) => ToolOutput::Error(e.to_string()),
                    },
                }
            }
            ExecutionMode::Client => {
                io.emit(UiEvent::ToolAwaitingClient {
                    call_id: request.id.clone(),
                    tool_name: request.name.clone(),
                    input: input.clone(),
                })
                .await;

                let call_id = request.id.clone();
                let waited = self
                    .await_external(io, |resolution| match resolution {
                        ExternalResolution::ToolOutput {
                            call_id: id,
                            output,
                        } if id == call_id => Ok(output),
                        other => Err(other),
                    })
                    .await;

                match waited {
                    Waited::Resolved(output) => output,
                    Waited::TimedOut => ToolOutput::Error(
                        ToolError::Timeout {
                            tool_name: request.name.clone(),
                            timeout_secs: self.external_timeout.as_secs(),
                        }
                        .to_string(),
                    ),
                    Waited::Cancelled => return None,
                }
            }
        };

        Some((output, approval))
    }

    async fn await_approval(
        &self,
        request: &ToolCallRequest,
        input: &serde_json::Value,
        io: &mut TurnIo,
    ) -> Waited<bool> {
        let approval_id = Uuid::new_v4().to_string();
        io.emit(UiEvent::ApprovalRequested {
            approval_id: approval_id.clone(),
            call_id: request.id.clone(),
            tool_name: request.name.clone(),
            input: input.clone(),
        })
        .await;

        self.await_external(io, |resolution| match resolution {
            ExternalResolution::Approval {
                approval_id: id,
                approved,
            } if id == approval_id => Ok(approved),
            other => Err(other),
        })
        .await
    }

    /// Wait for the resolution `accept` claims, ignoring any other.
    async fn await_external<T>(
        &self,
        io: &mut TurnIo,
        mut accept: impl FnMut(ExternalResolution) -> Result<T, ExternalResolution>,
    ) -> Waited<T> {
        let deadline = tokio::time::sleep(self.external_timeout);
        tokio::pin!(deadline);
        let mut open = true;

        loop {
            tokio::select! {
                biased;
                _ = io.cancel.cancelled() => return Waited::Cancelled,
                _ = &mut deadline => {
                    warn!(timeout_secs = self.external_timeout.as_secs(), "External resolution timed out");
                    return Waited::TimedOut;
                }
                next = io.resolutions.recv(), if open => match next {
                    Some(resolution) => match accept(resolution) {
                        Ok(value) => return Waited::Resolved(value),
                        Err(other) => warn!(resolution = ?other, "Ignoring resolution for an unknown id"),
                    },
                    None => open = false,
                },
            }
        }
    }
}

/// Parse model-supplied arguments. Empty or `null` arguments mean `{}`.
fn parse_arguments(raw: &str) -> Result<serde_json::Value, String> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    match serde_json::from_str(raw) {
        Ok(serde_json::Value::Null) => Ok(serde_json::json!({})),
        Ok(value) => Ok(value),
        Err(e) => Err(e.to_string()),
    }
}
