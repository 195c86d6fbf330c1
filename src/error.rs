//! Crate-wide error type for the agent runtime.
//!
//! Tool-level failures stay in [`crate::tools::ToolError`] and are captured
//! into tool-result payloads rather than promoted here. This enum only
//! carries errors the driver cannot hand back to the model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised to the caller of [`crate::Agent::invoke`] or surfaced
/// through the driver when something is not a model-correctable condition.
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub enum AgentError {
    /// A message-store append would have violated the role-alternation or
    /// tool-result invariants. This is always a programmer bug, never
    /// surfaced to the model.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The model provider failed in a way retries cannot fix.
    #[error("model error: {0}")]
    ModelError(String),

    /// A transient model-provider failure (timeout, connection drop, 5xx,
    /// stream truncation) that the driver retries up to
    /// `model_request_retries` times before giving up.
    #[error("transient model error: {0}")]
    ModelTransient(String),

    /// A turn exceeded `max_steps_per_turn` before the model reached a
    /// terminal stop.
    #[error("step budget exhausted after {steps} steps")]
    StepBudgetExceeded { steps: usize },

    /// A turn exceeded `turn_timeout_ms` end to end.
    #[error("turn timed out after {millis}ms")]
    TurnTimeout { millis: u64 },

    /// A persisted session could not be deserialized or was missing
    /// required fields.
    #[error("failed to load session {session_id}: {reason}")]
    SessionLoadError { session_id: String, reason: String },

    /// A second opener tried to load/save the same session concurrently.
    #[error("session {session_id} is busy")]
    SessionBusy { session_id: String },

    /// No session exists under the given id.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Delegation to an unknown sub-agent type.
    #[error("unknown subagent type: {0}")]
    UnknownSubAgent(String),

    /// Catch-all for I/O and serialization failures that don't warrant
    /// their own variant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for AgentError {
    fn from(e: anyhow::Error) -> Self {
        AgentError::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Internal(format!("serialization error: {e}"))
    }
}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        AgentError::Internal(format!("io error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_readable() {
        assert_eq!(
            AgentError::StepBudgetExceeded { steps: 3 }.to_string(),
            "step budget exhausted after 3 steps"
        );
        assert_eq!(
            AgentError::SessionNotFound("s1".into()).to_string(),
            "session not found: s1"
        );
    }

    #[test]
    fn agent_error_serde_round_trip() {
        let original = AgentError::SessionLoadError {
            session_id: "abc".into(),
            reason: "missing field".into(),
        };
        let json = serde_json::to_string(&original).unwrap();
        let restored: AgentError = serde_json::from_str(&json).unwrap();
        assert_eq!(original.to_string(), restored.to_string());
    }

    #[test]
    fn from_anyhow_wraps_as_internal() {
        let e: AgentError = anyhow::anyhow!("boom").into();
        assert!(matches!(e, AgentError::Internal(_)));
    }
}
