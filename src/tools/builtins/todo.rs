//! Planning tools: `write_todos`, `read_todos`, `update_todo_status`, each
//! acting on the per-session [`AgentState`] TODO list.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::state::{TodoItem, TodoStatus};
use crate::tools::context::{EffectClass, Tool, ToolContext, ToolError};

pub struct WriteTodosTool;

#[async_trait]
impl Tool for WriteTodosTool {
    fn name(&self) -> &str {
        "write_todos"
    }

    fn description(&self) -> &str {
        "Replace the current task list wholesale. Use this to plan out a multi-step task; at most one item may be in_progress at a time."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "content": { "type": "string" },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed", "cancelled"]
                            },
                            "priority": {
                                "type": "string",
                                "enum": ["high", "medium", "low"]
                            }
                        },
                        "required": ["id", "content", "status"]
                    }
                }
            },
            "required": ["todos"]
        })
    }

    fn effect_class(&self) -> EffectClass {
        EffectClass::State
    }

    async fn call(
        &self,
        input: serde_json::Value,
        context: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let todos: Vec<TodoItem> = serde_json::from_value(
            input
                .get("todos")
                .cloned()
                .ok_or_else(|| ToolError::InvalidRequest("todos is required".into()))?,
        )
        .map_err(|e| ToolError::InvalidRequest(format!("invalid todo format: {e}")))?;

        let total = todos.len();
        context
            .state
            .write_todos(todos)
            .await
            .map_err(|e| ToolError::InvalidRequest(e.to_string()))?;

        Ok(json!({ "success": true, "total_todos": total }))
    }
}

pub struct ReadTodosTool;

#[async_trait]
impl Tool for ReadTodosTool {
    fn name(&self) -> &str {
        "read_todos"
    }

    fn description(&self) -> &str {
        "Read the current task list for this session."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {}, "required": [] })
    }

    fn effect_class(&self) -> EffectClass {
        EffectClass::State
    }

    async fn call(
        &self,
        _input: serde_json::Value,
        context: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let todos = context.state.read_todos().await;
        Ok(json!({ "todos": todos, "total": todos.len() }))
    }
}

#[derive(Deserialize)]
struct UpdateTodoStatusInput {
    id: String,
    status: TodoStatus,
}

pub struct UpdateTodoStatusTool;

#[async_trait]
impl Tool for UpdateTodoStatusTool {
    fn name(&self) -> &str {
        "update_todo_status"
    }

    fn description(&self) -> &str {
        "Transition a single task's status. Permitted transitions: pending -> in_progress, in_progress -> completed, in_progress -> cancelled, pending -> cancelled."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "status": {
                    "type": "string",
                    "enum": ["pending", "in_progress", "completed", "cancelled"]
                }
            },
            "required": ["id", "status"]
        })
    }

    fn effect_class(&self) -> EffectClass {
        EffectClass::State
    }

    async fn call(
        &self,
        input: serde_json::Value,
        context: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let req: UpdateTodoStatusInput = serde_json::from_value(input)
            .map_err(|e| ToolError::InvalidRequest(format!("invalid input: {e}")))?;

        context
            .state
            .update_todo_status(&req.id, req.status)
            .await
            .map_err(|e| ToolError::InvalidRequest(e.to_string()))?;

        Ok(json!({ "success": true, "id": req.id, "status": req.status }))
    }
}
