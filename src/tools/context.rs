//! Tool trait, descriptor, and execution context. A handler receives
//! `(input, context)` where `context` exposes state, session id, and a
//! cancellation token.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::state::AgentState;

/// Unified error type for tool handlers. Unlike [`crate::error::AgentError`]
/// these are always captured into a tool-result payload — a tool raising is
/// never a fatal condition for the driver.
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum ToolError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("cancelled: {0}")]
    Cancelled(String),
    #[error("other error: {0}")]
    Other(String),
}

/// Whether a tool call needs the single-writer state lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectClass {
    /// No side effects, no shared state read — safe to run fully concurrently.
    Pure,
    /// Reads or mutates [`AgentState`] and must hold the state lease.
    State,
    /// Touches something outside the process (network, filesystem outside
    /// the virtual FS, subprocess). No lease, but not reorderable either —
    /// the executor still dispatches it concurrently with the others.
    External,
}

/// What a tool handler receives on every call.
pub struct ToolContext {
    pub state: Arc<AgentState>,
    pub session_id: String,
    pub cancellation_token: CancellationToken,
    /// The driver's step counter for the turn this call was dispatched from
    /// (§4.8's `steps`), threaded through so state-effect tools can stamp
    /// writes with the turn that produced them — e.g.
    /// [`crate::state::VirtualFile::last_write_turn`].
    pub turn: u64,
}

impl ToolContext {
    pub fn new(state: Arc<AgentState>, session_id: impl Into<String>) -> Self {
        ToolContext {
            state,
            session_id: session_id.into(),
            cancellation_token: CancellationToken::new(),
            turn: 0,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn with_turn(mut self, turn: u64) -> Self {
        self.turn = turn;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

/// A registered tool: name, input schema, handler, and effect classification.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema the input must validate against before dispatch.
    fn input_schema(&self) -> serde_json::Value;

    fn effect_class(&self) -> EffectClass;

    async fn call(
        &self,
        input: serde_json::Value,
        context: &ToolContext,
    ) -> Result<serde_json::Value, ToolError>;
}
