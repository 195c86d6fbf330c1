//! Public entry point: `create_deep_agent`/`AgentBuilder`/`Agent`.
//!
//! `AgentBuilder` accumulates tools, sub-agents, and config by consuming
//! `with_*`-style calls, then `build()` compiles the tool registry,
//! sub-agent registry, and runtime config exactly once and stores them
//! behind `Arc` on the returned [`Agent`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::RuntimeConfig;
use crate::error::AgentError;
use crate::message::{Block, Message, MessageStore};
use crate::model::ModelClient;
use crate::session::SessionManager;
use crate::state::{AgentState, TodoItem};
use crate::subagent::{SubAgentRegistry, SubAgentSpec};
use crate::tools::builtins::{
    ListFilesTool, ReadFileTool, ReadTodosTool, TaskTool, UpdateTodoStatusTool, WriteFileTool,
    WriteTodosTool,
};
use crate::tools::{Tool, ToolRegistry};

pub struct AgentBuilder {
    instructions: String,
    model: Option<Arc<dyn ModelClient>>,
    tools: ToolRegistry,
    /// Raw specs, resolved into a [`SubAgentRegistry`] in [`Self::build`] once
    /// the lead's own tool set (including built-ins) is final — a spec with
    /// no explicit tools inherits that final set, so resolution can't happen
    /// any earlier than `build()`.
    subagent_specs: Vec<SubAgentSpec>,
    config: RuntimeConfig,
    session_id: Option<String>,
    restored: Option<crate::session::LoadedSession>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        AgentBuilder {
            instructions: String::new(),
            model: None,
            tools: ToolRegistry::new(),
            subagent_specs: Vec::new(),
            config: RuntimeConfig::default(),
            session_id: None,
            restored: None,
        }
    }

    pub fn instructions(mut self, text: impl Into<String>) -> Self {
        self.instructions = text.into();
        self
    }

    pub fn model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn subagent(mut self, spec: SubAgentSpec) -> Self {
        self.subagent_specs.push(spec);
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Seeds the built [`Agent`] from a previously persisted session (spec
    /// §6's `state?`/`session?` constructor inputs) instead of starting with
    /// an empty transcript and a fresh [`AgentState`] under a new random id.
    /// Takes the [`crate::session::LoadedSession`] returned by
    /// [`SessionManager::load`] directly, so the caller never has to
    /// reconstruct a `session_id` by hand.
    pub fn resume(mut self, session_id: impl Into<String>, loaded: crate::session::LoadedSession) -> Self {
        self.session_id = Some(session_id.into());
        self.restored = Some(loaded);
        self
    }

    /// Compiles the builder into a runnable [`Agent`]. Registers the
    /// built-in planning (`write_todos`/`read_todos`/`update_todo_status`)
    /// and filesystem (`read_file`/`write_file`/`list_files`) tools
    /// automatically, plus `task` if at least one sub-agent type was
    /// registered.
    pub fn build(mut self) -> Result<Agent, AgentError> {
        let model = self
            .model
            .ok_or_else(|| AgentError::Internal("no model client configured".into()))?;

        self.tools.register(Arc::new(WriteTodosTool));
        self.tools.register(Arc::new(ReadTodosTool));
        self.tools.register(Arc::new(UpdateTodoStatusTool));
        self.tools.register(Arc::new(ReadFileTool));
        self.tools.register(Arc::new(WriteFileTool));
        self.tools.register(Arc::new(ListFilesTool));

        // Resolved now that the lead's tool set (built-ins + whatever the
        // caller added) is final but before `task` itself is registered, so
        // a spec that inherits "the lead's tools minus the delegation tool"
        // never has to special-case excluding `task` from the merge.
        let mut subagents = SubAgentRegistry::new();
        for spec in self.subagent_specs {
            subagents.register_resolved(spec, &self.tools);
        }
        let subagents = Arc::new(subagents);
        let config = Arc::new(self.config);

        if !subagents.names().is_empty() {
            self.tools.register(Arc::new(TaskTool::new(
                subagents.clone(),
                model.clone(),
                config.clone(),
            )));
        }

        let (messages, state, session_id) = match self.restored {
            Some(loaded) => (
                Arc::new(loaded.messages),
                loaded.state,
                self.session_id.expect("resume() always sets session_id"),
            ),
            None => (
                Arc::new(MessageStore::new()),
                Arc::new(AgentState::new()),
                self.session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            ),
        };

        Ok(Agent {
            instructions: self.instructions,
            model,
            tools: Arc::new(self.tools),
            subagents,
            config,
            messages,
            state,
            session_id,
        })
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Starts building an [`Agent`]: `create_deep_agent().model(...).build()`.
pub fn create_deep_agent() -> AgentBuilder {
    AgentBuilder::new()
}

/// A runnable agent: one session's worth of transcript and state, plus the
/// shared, immutable configuration compiled by [`AgentBuilder::build`].
pub struct Agent {
    instructions: String,
    model: Arc<dyn ModelClient>,
    tools: Arc<ToolRegistry>,
    subagents: Arc<SubAgentRegistry>,
    config: Arc<RuntimeConfig>,
    messages: Arc<MessageStore>,
    state: Arc<AgentState>,
    session_id: String,
}

/// Result of [`Agent::invoke`].
#[derive(Debug, Clone)]
pub struct InvokeOutcome {
    pub text: String,
    pub steps_taken: usize,
    /// Set when the turn was cut off by `max_steps_per_turn` before the
    /// model reached a terminal stop.
    pub step_budget_exceeded: bool,
}

/// Read-only view over an [`Agent`]'s session state.
pub struct StateView<'a> {
    state: &'a AgentState,
}

impl<'a> StateView<'a> {
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.state.scratch_get(key).await
    }

    pub async fn list_todos(&self) -> Vec<TodoItem> {
        self.state.read_todos().await
    }

    pub async fn list_files(&self) -> Vec<String> {
        self.state.list_files(None).await
    }
}

impl Agent {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> StateView<'_> {
        StateView { state: &self.state }
    }

    /// Blocking single-turn invocation: appends `user_text` to the
    /// transcript, drives the reason-act loop to completion, and returns the
    /// model's final text. On the first call, `instructions` are folded into
    /// the opening user message — the transcript invariant forbids two
    /// consecutive user messages, so there is no separate "system turn" to
    /// append them as.
    pub async fn invoke(&self, user_text: impl Into<String>) -> Result<InvokeOutcome, AgentError> {
        let user_text = user_text.into();
        let content = if self.messages.is_empty() && !self.instructions.is_empty() {
            format!("{}\n\n{}", self.instructions, user_text)
        } else {
            user_text
        };

        self.messages.append(Message::user(vec![Block::text(content)]))?;

        let ctx = crate::driver::TurnContext {
            model: self.model.as_ref(),
            tools: self.tools.as_ref(),
            config: self.config.as_ref(),
            session_id: self.session_id.clone(),
            cancellation_token: CancellationToken::new(),
        event_sink: None,
        };

        let outcome = crate::driver::run_turn(&self.messages, &self.state, &ctx).await?;
        Ok(InvokeOutcome {
            text: outcome.final_text,
            steps_taken: outcome.steps_taken,
            step_budget_exceeded: outcome.step_budget_exceeded,
        })
    }

    /// Streaming variant of [`Self::invoke`]: appends `user_text` the same
    /// way, then drives the turn on a background task and returns a
    /// [`tokio_stream::wrappers::ReceiverStream`] of incremental
    /// [`crate::driver::AgentStreamEvent`]s terminated by a `Done` event (or
    /// an `Err` if the turn itself fails).
    pub async fn invoke_stream(
        &self,
        user_text: impl Into<String>,
    ) -> Result<
        tokio_stream::wrappers::ReceiverStream<Result<crate::driver::AgentStreamEvent, AgentError>>,
        AgentError,
    > {
        let user_text = user_text.into();
        let content = if self.messages.is_empty() && !self.instructions.is_empty() {
            format!("{}\n\n{}", self.instructions, user_text)
        } else {
            user_text
        };
        self.messages.append(Message::user(vec![Block::text(content)]))?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        let model = self.model.clone();
        let tools = self.tools.clone();
        let config = self.config.clone();
        let messages = self.messages.clone();
        let state = self.state.clone();
        let session_id = self.session_id.clone();

        tokio::spawn(async move {
            let ctx = crate::driver::TurnContext {
                model: model.as_ref(),
                tools: tools.as_ref(),
                config: config.as_ref(),
                session_id,
                cancellation_token: CancellationToken::new(),
                event_sink: Some(tx.clone()),
            };

            // run_turn itself emits a Done event on every return path; a
            // hard Err (InvariantViolation, ModelError, TurnTimeout) never
            // reaches a Done, so surface it explicitly here instead.
            if let Err(e) = crate::driver::run_turn(&messages, &state, &ctx).await {
                let _ = tx.send(Err(e)).await;
            }
        });

        Ok(tokio_stream::wrappers::ReceiverStream::new(rx))
    }

    pub async fn save(&self, sessions: &SessionManager) -> Result<(), AgentError> {
        sessions.save(&self.session_id, &self.messages, &self.state).await
    }
}
