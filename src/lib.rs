//! A deep-agent orchestration runtime: a reason-act event loop over an LLM
//! provider with TODO planning, a session-scoped virtual filesystem,
//! concurrent tool-call dispatch, and isolated sub-agent delegation.
//!
//! See `DESIGN.md` for how each module's behavior is derived.

pub mod agent;
pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod message;
pub mod model;
pub mod session;
pub mod state;
pub mod subagent;
pub mod tools;

pub use agent::{create_deep_agent, Agent, AgentBuilder, InvokeOutcome, StateView};
pub use config::{AllowAll, ConsentHook, RuntimeConfig};
pub use driver::AgentStreamEvent;
pub use error::AgentError;
pub use message::{Block, Message, MessageStore, Role, ToolResultStatus};
pub use model::{ModelClient, StopReason, StreamEvent};
pub use session::{LoadedSession, SessionManager};
pub use state::{AgentState, AgentStateSnapshot, TodoItem, TodoPriority, TodoStatus};
pub use subagent::{SubAgentConfig, SubAgentRegistry, SubAgentSpec};
pub use tools::{EffectClass, Tool, ToolContext, ToolError, ToolRegistry};
