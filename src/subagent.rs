//! Sub-agent delegation configs and factory.
//!
//! A `SubAgentConfig` is compiled once, stored behind `Arc`, and never
//! carries a transcript slot — every `task()` invocation builds a brand new
//! [`crate::message::MessageStore`]/[`crate::state::AgentState`] pair from
//! it, so two concurrent or sequential delegations to the same sub-agent
//! type never share history.

use std::collections::HashMap;
use std::sync::Arc;

use crate::tools::ToolRegistry;

/// Immutable, shareable description of a sub-agent type. Built once when the
/// parent [`crate::agent::Agent`] is constructed.
pub struct SubAgentConfig {
    pub name: String,
    pub description: String,
    pub instructions: String,
    pub tools: Arc<ToolRegistry>,
    pub inherit_files: bool,
    pub max_steps_per_turn: Option<usize>,
}

/// Builder input for registering a sub-agent type on an [`crate::agent::AgentBuilder`].
///
/// Per spec §6's sub-agent spec contract, a spec with no explicit `.tool(..)`
/// calls inherits the lead's tools minus the delegation tool itself (so a
/// sub-agent cannot recursively `task()` itself unless a tool list is given
/// explicitly, in which case only those tools apply). [`Self::explicit_tools`]
/// tracks whether `.tool(..)` was ever called so
/// [`crate::agent::AgentBuilder::build`] knows which specs to backfill.
pub struct SubAgentSpec {
    pub name: String,
    pub description: String,
    pub instructions: String,
    pub tools: ToolRegistry,
    pub explicit_tools: bool,
    pub inherit_files: bool,
    pub max_steps_per_turn: Option<usize>,
}

impl SubAgentSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        SubAgentSpec {
            name: name.into(),
            description: description.into(),
            instructions: String::new(),
            tools: ToolRegistry::new(),
            explicit_tools: false,
            inherit_files: false,
            max_steps_per_turn: None,
        }
    }

    pub fn instructions(mut self, text: impl Into<String>) -> Self {
        self.instructions = text.into();
        self
    }

    pub fn tool(mut self, tool: Arc<dyn crate::tools::Tool>) -> Self {
        self.explicit_tools = true;
        self.tools.register(tool);
        self
    }

    /// When true, the sub-agent's virtual filesystem is seeded with a
    /// one-way clone of the parent's files at delegation time. The clone is
    /// never written back to the parent.
    pub fn inherit_files(mut self, inherit: bool) -> Self {
        self.inherit_files = inherit;
        self
    }

    pub fn max_steps_per_turn(mut self, steps: usize) -> Self {
        self.max_steps_per_turn = Some(steps);
        self
    }

    fn compile(self) -> SubAgentConfig {
        SubAgentConfig {
            name: self.name,
            description: self.description,
            instructions: self.instructions,
            tools: Arc::new(self.tools),
            inherit_files: self.inherit_files,
            max_steps_per_turn: self.max_steps_per_turn,
        }
    }
}

/// Name -> compiled config lookup table, built once at agent-construction
/// time and shared read-only across every delegation, retry, and parallel
/// fan-out for the lifetime of the parent agent.
#[derive(Default)]
pub struct SubAgentRegistry {
    configs: HashMap<String, Arc<SubAgentConfig>>,
}

impl SubAgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: SubAgentSpec) -> &mut Self {
        let compiled = spec.compile();
        self.configs.insert(compiled.name.clone(), Arc::new(compiled));
        self
    }

    /// Like [`Self::register`], but if `spec` never had `.tool(..)` called on
    /// it, backfills its tool registry with `lead_tools` minus `task` before
    /// compiling — the concrete implementation of spec §6's "omitted tools
    /// inherits the lead's tools minus the delegation tool itself".
    pub fn register_resolved(&mut self, mut spec: SubAgentSpec, lead_tools: &crate::tools::ToolRegistry) -> &mut Self {
        if !spec.explicit_tools {
            spec.tools.merge_from(lead_tools, &["task"]);
        }
        self.register(spec)
    }

    pub fn get(&self, name: &str) -> Option<Arc<SubAgentConfig>> {
        self.configs.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.configs.keys().cloned().collect()
    }

    pub fn descriptions(&self) -> Vec<(String, String)> {
        self.configs
            .values()
            .map(|c| (c.name.clone(), c.description.clone()))
            .collect()
    }
}
