//! Runtime configuration knobs and the pre-tool-call consent hook.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

/// Asked before dispatching a `State` or `External` effect-class tool call,
/// unless `bypass_tool_consent` is set. Returning `false` turns the call into
/// a `ToolError::PermissionDenied` result rather than aborting the turn.
#[async_trait]
pub trait ConsentHook: Send + Sync {
    async fn allow(&self, tool_name: &str, input: &serde_json::Value) -> bool;
}

/// A hook that allows everything; the default when no hook is configured and
/// `bypass_tool_consent` is true.
pub struct AllowAll;

#[async_trait]
impl ConsentHook for AllowAll {
    async fn allow(&self, _tool_name: &str, _input: &serde_json::Value) -> bool {
        true
    }
}

#[derive(Clone)]
pub struct RuntimeConfig {
    pub max_parallel_tools: usize,
    pub max_steps_per_turn: usize,
    pub model_request_retries: usize,
    pub model_request_timeout_ms: u64,
    pub tool_timeout_ms: u64,
    pub turn_timeout_ms: u64,
    pub session_storage_dir: PathBuf,
    pub bypass_tool_consent: bool,
    pub consent_hook: Option<Arc<dyn ConsentHook>>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            max_parallel_tools: 4,
            max_steps_per_turn: 50,
            model_request_retries: 3,
            model_request_timeout_ms: 60_000,
            tool_timeout_ms: 30_000,
            turn_timeout_ms: 300_000,
            session_storage_dir: PathBuf::from(".deepagent/sessions"),
            bypass_tool_consent: false,
            consent_hook: None,
        }
    }
}

impl RuntimeConfig {
    /// Whether `tool_name` requires a consent check before it can run: only
    /// non-pure tools are gated.
    pub fn requires_consent(&self, effect: crate::tools::EffectClass) -> bool {
        !self.bypass_tool_consent && effect != crate::tools::EffectClass::Pure
    }
}
