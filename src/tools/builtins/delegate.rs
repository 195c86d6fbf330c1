//! The `task` delegation tool: looks up a sub-agent config by name, then
//! blocks until the sub-agent's own turn is finished, driving
//! [`crate::driver::run_turn`] directly on a brand-new
//! [`MessageStore`]/[`AgentState`] pair rather than handing off to an
//! external orchestrator.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::config::RuntimeConfig;
use crate::driver::{self, TurnContext};
use crate::message::{Block, Message, MessageStore};
use crate::model::ModelClient;
use crate::state::AgentState;
use crate::subagent::SubAgentRegistry;
use crate::tools::context::{EffectClass, Tool, ToolContext, ToolError};

pub struct TaskTool {
    subagents: Arc<SubAgentRegistry>,
    model: Arc<dyn ModelClient>,
    config: Arc<RuntimeConfig>,
}

impl TaskTool {
    pub fn new(
        subagents: Arc<SubAgentRegistry>,
        model: Arc<dyn ModelClient>,
        config: Arc<RuntimeConfig>,
    ) -> Self {
        TaskTool {
            subagents,
            model,
            config,
        }
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "task"
    }

    fn description(&self) -> &str {
        "Delegate a task to a named sub-agent and block until it finishes, returning its final answer."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "subagent_type": { "type": "string" },
                "description": { "type": "string" }
            },
            "required": ["subagent_type", "description"]
        })
    }

    fn effect_class(&self) -> EffectClass {
        EffectClass::External
    }

    async fn call(
        &self,
        input: serde_json::Value,
        context: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let subagent_type = input
            .get("subagent_type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidRequest("subagent_type is required".into()))?;
        let description = input
            .get("description")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidRequest("description is required".into()))?;

        let spec = self
            .subagents
            .get(subagent_type)
            .ok_or_else(|| ToolError::NotFound(format!("unknown sub-agent: {subagent_type}")))?;

        // Fresh state every call: two invocations of the same sub-agent
        // type, whether sequential retries or concurrent fan-out within one
        // executor batch, never share a transcript or virtual filesystem.
        let sub_state = Arc::new(AgentState::new());
        if spec.inherit_files {
            let inherited = context.state.clone_files().await;
            sub_state.seed_files(inherited).await;
        }

        let sub_messages = MessageStore::new();
        let mut opening = String::new();
        if !spec.instructions.is_empty() {
            opening.push_str(&spec.instructions);
            opening.push_str("\n\n");
        }
        opening.push_str(description);
        sub_messages
            .append(Message::user(vec![Block::text(opening)]))
            .map_err(|e| ToolError::Other(e.to_string()))?;

        let mut sub_config = (*self.config).clone();
        if let Some(max_steps) = spec.max_steps_per_turn {
            sub_config.max_steps_per_turn = max_steps;
        }

        let turn_ctx = TurnContext {
            model: self.model.as_ref(),
            tools: spec.tools.as_ref(),
            config: &sub_config,
            session_id: format!("{}::{}", context.session_id, subagent_type),
            cancellation_token: context.cancellation_token.child_token(),
            event_sink: None,
        };

        let outcome = driver::run_turn(&sub_messages, &sub_state, &turn_ctx)
            .await
            .map_err(|e| ToolError::Other(e.to_string()))?;

        Ok(json!({
            "subagent_type": subagent_type,
            "result": outcome.final_text,
            "steps_taken": outcome.steps_taken,
        }))
    }
}
