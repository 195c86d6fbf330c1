//! The reason-act event loop: a state machine that calls the model, appends
//! its assistant message, dispatches any tool calls concurrently, appends
//! the resulting tool-result message, and repeats until the model stops
//! requesting tools. `task()` delegation runs its nested loop to completion
//! synchronously rather than suspending the outer state machine, so there is
//! no separate "waiting on an external event" state to model.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::RuntimeConfig;
use crate::error::AgentError;
use crate::executor::{execute_batch, PendingCall};
use crate::message::{Block, Message, MessageStore, ToolResultStatus};
use crate::model::{ModelClient, StopReason, StreamEvent};
use crate::state::AgentState;
use crate::tools::{ToolContext, ToolRegistry};

/// Incremental progress emitted during [`run_turn`] when a
/// `TurnContext::event_sink` is attached — backs `Agent::invoke_stream`.
#[derive(Debug, Clone)]
pub enum AgentStreamEvent {
    TextDelta(String),
    ToolEvent {
        id: String,
        name: String,
        status: ToolResultStatus,
    },
    Done(TurnOutcome),
}

async fn emit(ctx: &TurnContext<'_>, event: AgentStreamEvent) {
    if let Some(sink) = &ctx.event_sink {
        let _ = sink.send(Ok(event)).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    BeforeLlmCall,
    CallLlm,
    AfterLlm,
    ProcessingToolCalls,
    Complete,
    Stopped,
    Cancelled,
}

impl ExecutionState {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionState::BeforeLlmCall => "BeforeLlmCall",
            ExecutionState::CallLlm => "CallLlm",
            ExecutionState::AfterLlm => "AfterLlm",
            ExecutionState::ProcessingToolCalls => "ProcessingToolCalls",
            ExecutionState::Complete => "Complete",
            ExecutionState::Stopped => "Stopped",
            ExecutionState::Cancelled => "Cancelled",
        }
    }
}

/// Outcome of a completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub final_text: String,
    pub steps_taken: usize,
    pub state: ExecutionStateKind,
    /// Set when the turn was cut off by `max_steps_per_turn` rather than a
    /// model-chosen stop. Unlike `TurnTimeout`, this is returned as a flag
    /// on the final result rather than raised to the caller.
    pub step_budget_exceeded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStateKind {
    Complete,
    Stopped,
    Cancelled,
}

/// Everything a single turn needs that doesn't live on [`AgentState`]:
/// the model adapter, tool registry, and shared runtime knobs.
pub struct TurnContext<'a> {
    pub model: &'a dyn ModelClient,
    pub tools: &'a ToolRegistry,
    pub config: &'a RuntimeConfig,
    pub session_id: String,
    pub cancellation_token: CancellationToken,
    /// Set by [`crate::agent::Agent::invoke_stream`]; left `None` for the
    /// blocking `invoke` path and for nested sub-agent turns, which run to
    /// completion synchronously and have nothing external to stream to.
    pub event_sink: Option<mpsc::Sender<Result<AgentStreamEvent, AgentError>>>,
}

/// Drives `messages`/`state` through the BeforeLlmCall -> CallLlm -> AfterLlm
/// -> ProcessingToolCalls loop until the model stops requesting tools, the
/// step budget is exhausted, the turn deadline elapses, or cancellation
/// fires. Retries transient model errors up to
/// `config.model_request_retries` times with exponential backoff before
/// giving up — a retry never partially mutates `messages`: either a full
/// assistant turn is appended or nothing is.
#[instrument(name = "agent.turn", skip(messages, state, ctx), fields(session_id = %ctx.session_id))]
pub async fn run_turn(
    messages: &MessageStore,
    state: &Arc<AgentState>,
    ctx: &TurnContext<'_>,
) -> Result<TurnOutcome, AgentError> {
    let permits = Arc::new(Semaphore::new(ctx.config.max_parallel_tools.max(1)));
    let mut steps = 0usize;
    let mut execution_state = ExecutionState::BeforeLlmCall;
    let mut final_text = String::new();

    let deadline = tokio::time::Instant::now() + Duration::from_millis(ctx.config.turn_timeout_ms);

    loop {
        if ctx.cancellation_token.is_cancelled() {
            let outcome = TurnOutcome {
                final_text,
                steps_taken: steps,
                state: ExecutionStateKind::Cancelled,
                step_budget_exceeded: false,
            };
            emit(ctx, AgentStreamEvent::Done(outcome.clone())).await;
            return Ok(outcome);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(AgentError::TurnTimeout {
                millis: ctx.config.turn_timeout_ms,
            });
        }

        match execution_state {
            ExecutionState::BeforeLlmCall => {
                if steps >= ctx.config.max_steps_per_turn {
                    // A synthetic assistant message, not a raised error — the
                    // model never sees this, but the caller gets a
                    // well-formed transcript ending on an assistant turn.
                    messages.append(Message::assistant(vec![Block::text(
                        "step budget exhausted",
                    )]))?;
                    final_text = "step budget exhausted".to_string();
                    let outcome = TurnOutcome {
                        final_text,
                        steps_taken: steps,
                        state: ExecutionStateKind::Complete,
                        step_budget_exceeded: true,
                    };
                    emit(ctx, AgentStreamEvent::Done(outcome.clone())).await;
                    return Ok(outcome);
                }
                execution_state = ExecutionState::CallLlm;
            }

            ExecutionState::CallLlm => {
                steps += 1;
                let snapshot = messages.view();
                let events = call_model_with_retry(ctx, &snapshot).await?;
                for event in &events {
                    if let StreamEvent::TextDelta(delta) = event {
                        emit(ctx, AgentStreamEvent::TextDelta(delta.clone())).await;
                    }
                }
                let assistant_message = assemble_assistant_message(&events);
                messages.append(assistant_message)?;
                execution_state = ExecutionState::AfterLlm;
            }

            ExecutionState::AfterLlm => {
                let last = messages
                    .view()
                    .last()
                    .cloned()
                    .ok_or_else(|| AgentError::Internal("no assistant message after call".into()))?;

                final_text = last
                    .content
                    .iter()
                    .filter_map(|b| match b {
                        Block::Text { text } => Some(text.clone()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("");

                let pending_calls = PendingCall::from_blocks(&last.content);
                execution_state = if pending_calls.is_empty() {
                    ExecutionState::Complete
                } else {
                    ExecutionState::ProcessingToolCalls
                };
            }

            ExecutionState::ProcessingToolCalls => {
                let last = messages.view().last().cloned().ok_or_else(|| {
                    AgentError::Internal("no assistant message to process tool calls for".into())
                })?;
                let calls = PendingCall::from_blocks(&last.content);

                // Consent gate: state/external calls are asked about before
                // dispatch, unless bypassed. A denial never reaches the
                // tool — it becomes a PermissionDenied result directly.
                let mut runnable = Vec::with_capacity(calls.len());
                let mut denied = Vec::new();
                for call in &calls {
                    let effect = ctx.tools.lookup(&call.name).map(|t| t.effect_class());
                    let gate = effect
                        .map(|e| ctx.config.requires_consent(e))
                        .unwrap_or(false);
                    if gate {
                        if let Some(hook) = &ctx.config.consent_hook {
                            if !hook.allow(&call.name, &call.input).await {
                                denied.push(crate::executor::CompletedCall {
                                    id: call.id.clone(),
                                    result: Err(crate::tools::ToolError::PermissionDenied(
                                        format!("consent denied for '{}'", call.name),
                                    )),
                                });
                                continue;
                            }
                        }
                    }
                    runnable.push(call.clone());
                }

                let state_for_context = state.clone();
                let session_id = ctx.session_id.clone();
                let call_token = ctx.cancellation_token.clone();
                let turn = steps as u64;
                let mut completed = execute_batch(
                    ctx.tools,
                    &runnable,
                    permits.clone(),
                    move |_| {
                        ToolContext::new(state_for_context.clone(), session_id.clone())
                            .with_cancellation(call_token.clone())
                            .with_turn(turn)
                    },
                    ctx.cancellation_token.clone(),
                    Duration::from_millis(ctx.config.tool_timeout_ms),
                )
                .await;
                completed.extend(denied);

                let by_id: std::collections::HashMap<_, _> =
                    completed.into_iter().map(|c| (c.id.clone(), c)).collect();

                let call_names: std::collections::HashMap<&str, &str> =
                    calls.iter().map(|c| (c.id.as_str(), c.name.as_str())).collect();
                let mut result_blocks = Vec::with_capacity(calls.len());
                for c in calls.iter().filter_map(|c| by_id.get(&c.id).cloned()) {
                    let (block, status) = match c.result {
                        Ok(payload) => (
                            Block::tool_result(c.id.clone(), ToolResultStatus::Ok, payload),
                            ToolResultStatus::Ok,
                        ),
                        Err(e) => (
                            Block::tool_result(
                                c.id.clone(),
                                ToolResultStatus::Error,
                                serde_json::json!({ "error": e.to_string() }),
                            ),
                            ToolResultStatus::Error,
                        ),
                    };
                    emit(
                        ctx,
                        AgentStreamEvent::ToolEvent {
                            id: c.id.clone(),
                            name: call_names.get(c.id.as_str()).map(|s| s.to_string()).unwrap_or_default(),
                            status,
                        },
                    )
                    .await;
                    result_blocks.push(block);
                }

                messages.append(Message {
                    role: crate::message::Role::User,
                    content: result_blocks,
                })?;

                execution_state = if ctx.cancellation_token.is_cancelled() {
                    ExecutionState::Cancelled
                } else {
                    ExecutionState::BeforeLlmCall
                };
            }

            ExecutionState::Complete | ExecutionState::Stopped | ExecutionState::Cancelled => break,
        }
    }

    let kind = match execution_state {
        ExecutionState::Complete => ExecutionStateKind::Complete,
        ExecutionState::Stopped => ExecutionStateKind::Stopped,
        ExecutionState::Cancelled => ExecutionStateKind::Cancelled,
        _ => unreachable!("loop only exits on a terminal state"),
    };

    let outcome = TurnOutcome {
        final_text,
        steps_taken: steps,
        state: kind,
        step_budget_exceeded: false,
    };
    emit(ctx, AgentStreamEvent::Done(outcome.clone())).await;
    Ok(outcome)
}

async fn call_model_with_retry(
    ctx: &TurnContext<'_>,
    messages: &[Message],
) -> Result<Vec<StreamEvent>, AgentError> {
    let tool_schemas = ctx.tools.tool_schemas();
    let mut attempt = 0usize;
    loop {
        match ctx.model.complete(messages, &tool_schemas).await {
            Ok(events) => return Ok(events),
            // Only ModelTransient is retry-worthy; ModelError and anything
            // else propagate on the first failure with no backoff.
            Err(AgentError::ModelTransient(reason)) if attempt < ctx.config.model_request_retries => {
                attempt += 1;
                let backoff_ms = 50u64.saturating_mul(1 << attempt.min(6));
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                tracing::debug!(attempt, %reason, "retrying model request after transient error");
            }
            Err(AgentError::ModelTransient(reason)) => {
                return Err(AgentError::ModelError(format!(
                    "transient error persisted after {attempt} retries: {reason}"
                )))
            }
            Err(err) => return Err(err),
        }
    }
}

fn assemble_assistant_message(events: &[StreamEvent]) -> Message {
    let mut blocks = Vec::new();
    let mut text = String::new();
    let mut current_tool: Option<(String, String, String)> = None;

    for event in events {
        match event {
            StreamEvent::TextDelta(delta) => text.push_str(delta),
            StreamEvent::ToolUseStart { id, name } => {
                if let Some((id, name, json)) = current_tool.take() {
                    blocks.push(tool_use_block(id, name, json));
                }
                current_tool = Some((id.clone(), name.clone(), String::new()));
            }
            StreamEvent::ToolUseInputDelta { partial_json, .. } => {
                if let Some((_, _, json)) = current_tool.as_mut() {
                    json.push_str(partial_json);
                }
            }
            StreamEvent::BlockEnd => {
                if !text.is_empty() {
                    blocks.push(Block::text(std::mem::take(&mut text)));
                }
                if let Some((id, name, json)) = current_tool.take() {
                    blocks.push(tool_use_block(id, name, json));
                }
            }
            StreamEvent::StopReason(StopReason::EndTurn | StopReason::MaxTokens | StopReason::ToolUse) => {}
        }
    }

    if !text.is_empty() {
        blocks.push(Block::text(text));
    }
    if let Some((id, name, json)) = current_tool.take() {
        blocks.push(tool_use_block(id, name, json));
    }

    Message::assistant(blocks)
}

fn tool_use_block(id: String, name: String, json: String) -> Block {
    let input = if json.is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_str(&json).unwrap_or(serde_json::json!({}))
    };
    Block::tool_use(id, name, input)
}
