//! Name -> handler map with a schema-validation gate. Input is validated
//! against each tool's JSON Schema before dispatch, as an explicit step
//! rather than a try/catch wrapped around the handler body.

use std::collections::HashMap;
use std::sync::Arc;

use jsonschema::Validator;

use super::context::{Tool, ToolError};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no tool registered with name '{0}'")]
    NotFound(String),
}

struct CompiledTool {
    tool: Arc<dyn Tool>,
    validator: Option<Validator>,
}

/// Registry for managing available tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, CompiledTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, compiling its input schema once up front so
    /// per-call validation in [`Self::validate`] is cheap.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        let schema = tool.input_schema();
        let validator = jsonschema::validator_for(&schema).ok();
        self.tools.insert(
            tool.name().to_string(),
            CompiledTool { tool, validator },
        );
        self
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|c| c.tool.clone())
    }

    /// Registers every tool from `other` whose name is not in `exclude`.
    /// Used to backfill a sub-agent spec that didn't list its own tools with
    /// the lead's tool set (minus the delegation tool itself), per spec §6:
    /// "Omitted tools inherits the lead's tools minus the delegation tool".
    pub fn merge_from(&mut self, other: &ToolRegistry, exclude: &[&str]) {
        for compiled in other.tools.values() {
            if exclude.contains(&compiled.tool.name()) {
                continue;
            }
            self.register(compiled.tool.clone());
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The `{name, description, input_schema}` triples for every registered
    /// tool, in the shape a [`crate::model::ModelClient`] needs to advertise
    /// tool-use to the provider.
    pub fn tool_schemas(&self) -> Vec<serde_json::Value> {
        self.tools
            .values()
            .map(|c| {
                serde_json::json!({
                    "name": c.tool.name(),
                    "description": c.tool.description(),
                    "input_schema": c.tool.input_schema(),
                })
            })
            .collect()
    }

    /// Validate `input` against the named tool's schema. Returns `Ok(())`
    /// when the tool has no compilable schema (treated as "anything goes")
    /// so a malformed schema never blocks dispatch outright — only a real
    /// validation failure does.
    pub fn validate(&self, name: &str, input: &serde_json::Value) -> Result<(), ToolError> {
        let compiled = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        if let Some(validator) = &compiled.validator {
            if let Some(err) = validator.iter_errors(input).next() {
                return Err(ToolError::InvalidRequest(format!(
                    "input failed schema validation: {err}"
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
