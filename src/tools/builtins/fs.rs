//! Virtual filesystem tools: `read_file`, `write_file`, `list_files` against
//! the in-memory, session-scoped store in [`crate::state::AgentState`].
//! Paths are opaque strings with prefix-match listing, not a real
//! hierarchical filesystem.

use async_trait::async_trait;
use serde_json::json;

use crate::tools::context::{EffectClass, Tool, ToolContext, ToolError};

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the session's virtual filesystem."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
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
        let path = input
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidRequest("path is required".into()))?;

        match context.state.read_file(path).await {
            Some(bytes) => {
                let content = String::from_utf8_lossy(&bytes).into_owned();
                Ok(json!({ "path": path, "content": content }))
            }
            None => Err(ToolError::NotFound(format!("no such file: {path}"))),
        }
    }
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file in the session's virtual filesystem, creating it if it does not exist."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
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
        let path = input
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidRequest("path is required".into()))?;
        let content = input
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidRequest("content is required".into()))?;

        context
            .state
            .write_file(path, content.as_bytes().to_vec(), context.turn)
            .await;

        Ok(json!({ "success": true, "path": path, "bytes_written": content.len() }))
    }
}

pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files in the session's virtual filesystem, optionally filtered by path prefix."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "prefix": { "type": "string" } },
            "required": []
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
        let prefix = input.get("prefix").and_then(|v| v.as_str());
        let mut files = context.state.list_files(prefix).await;
        files.sort();
        Ok(json!({ "files": files }))
    }
}
