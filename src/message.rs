//! Append-only conversation transcript: an ordered log of user/assistant
//! turns, each holding text, tool-use, or tool-result blocks, with the
//! role-alternation and tool-use/tool-result pairing invariants enforced on
//! every append.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::AgentError;

/// Who produced a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
}

/// A single piece of message content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Text { text: String },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        id: String,
        status: ToolResultStatus,
        payload: serde_json::Value,
    },
}

impl Block {
    pub fn text(text: impl Into<String>) -> Self {
        Block::Text { text: text.into() }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Block::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn tool_result(
        id: impl Into<String>,
        status: ToolResultStatus,
        payload: serde_json::Value,
    ) -> Self {
        Block::ToolResult {
            id: id.into(),
            status,
            payload,
        }
    }

    pub fn as_tool_use_id(&self) -> Option<&str> {
        match self {
            Block::ToolUse { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn as_tool_result_id(&self) -> Option<&str> {
        match self {
            Block::ToolResult { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Block::Text { .. })
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Block::ToolResult { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResultStatus {
    Ok,
    Error,
}

/// One turn of the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<Block>,
}

impl Message {
    pub fn user(content: Vec<Block>) -> Self {
        Message {
            role: Role::User,
            content,
        }
    }

    pub fn assistant(content: Vec<Block>) -> Self {
        Message {
            role: Role::Assistant,
            content,
        }
    }

    fn tool_use_ids(&self) -> Vec<&str> {
        self.content.iter().filter_map(Block::as_tool_use_id).collect()
    }

    fn tool_result_ids(&self) -> Vec<&str> {
        self.content.iter().filter_map(Block::as_tool_result_id).collect()
    }

    fn is_pure_tool_result_message(&self) -> bool {
        !self.content.is_empty() && self.content.iter().all(Block::is_tool_result)
    }

    fn has_text_and_tool_result(&self) -> bool {
        let has_text = self.content.iter().any(Block::is_text);
        let has_result = self.content.iter().any(Block::is_tool_result);
        has_text && has_result
    }
}

/// Append-only transcript guarded so that invariant-violating appends fail
/// with [`AgentError::InvariantViolation`] rather than corrupt the log.
///
/// Invariants enforced on every [`MessageStore::append`]:
/// - roles strictly alternate
/// - a user message never mixes `ToolResult` blocks with `Text`
/// - a user message following an assistant message with tool-uses contains
///   *only* `ToolResult` blocks, whose id set exactly matches the prior
///   assistant message's tool-use id set, in the same positional order
#[derive(Default)]
pub struct MessageStore {
    messages: Mutex<Vec<Message>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        MessageStore {
            messages: Mutex::new(messages),
        }
    }

    /// Read-only snapshot for the model adapter.
    pub fn view(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// The ordered tool-use ids of the most recent assistant message, if any.
    pub fn last_assistant_tool_uses(&self) -> Vec<String> {
        let messages = self.messages.lock();
        messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.tool_use_ids().into_iter().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn append(&self, message: Message) -> Result<(), AgentError> {
        let mut messages = self.messages.lock();
        Self::validate_append(&messages, &message)?;
        messages.push(message);
        Ok(())
    }

    fn validate_append(existing: &[Message], incoming: &Message) -> Result<(), AgentError> {
        if let Some(last) = existing.last() {
            if last.role == incoming.role {
                return Err(AgentError::InvariantViolation(format!(
                    "consecutive {:?} messages are not allowed",
                    incoming.role
                )));
            }

            if incoming.role == Role::User && incoming.has_text_and_tool_result() {
                return Err(AgentError::InvariantViolation(
                    "a user message may not mix tool results with text".into(),
                ));
            }

            let last_tool_uses = last.tool_use_ids();
            if !last_tool_uses.is_empty() {
                if incoming.role != Role::User || !incoming.is_pure_tool_result_message() {
                    return Err(AgentError::InvariantViolation(
                        "assistant message with tool uses must be followed by a pure tool-result user message".into(),
                    ));
                }

                let incoming_ids = incoming.tool_result_ids();
                if incoming_ids.len() != last_tool_uses.len()
                    || incoming_ids.iter().zip(last_tool_uses.iter()).any(|(a, b)| a != b)
                {
                    let expected: BTreeSet<&str> = last_tool_uses.into_iter().collect();
                    let got: BTreeSet<&str> = incoming_ids.into_iter().collect();
                    if expected != got {
                        return Err(AgentError::InvariantViolation(format!(
                            "tool-result id set does not match prior tool-use id set: expected {:?}, got {:?}",
                            expected, got
                        )));
                    }
                    return Err(AgentError::InvariantViolation(
                        "tool-result blocks must appear in the same order as their tool-use counterparts".into(),
                    ));
                }
            }
        } else if incoming.role != Role::User {
            return Err(AgentError::InvariantViolation(
                "the first message in a transcript must be from the user".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_result(id: &str) -> Block {
        Block::tool_result(id, ToolResultStatus::Ok, serde_json::json!("done"))
    }

    #[test]
    fn first_message_must_be_user() {
        let store = MessageStore::new();
        let err = store
            .append(Message::assistant(vec![Block::text("hi")]))
            .unwrap_err();
        assert!(matches!(err, AgentError::InvariantViolation(_)));
    }

    #[test]
    fn alternation_is_enforced() {
        let store = MessageStore::new();
        store
            .append(Message::user(vec![Block::text("hello")]))
            .unwrap();
        let err = store
            .append(Message::user(vec![Block::text("again")]))
            .unwrap_err();
        assert!(matches!(err, AgentError::InvariantViolation(_)));
    }

    #[test]
    fn tool_result_order_must_match_tool_use_order() {
        let store = MessageStore::new();
        store
            .append(Message::user(vec![Block::text("go")]))
            .unwrap();
        store
            .append(Message::assistant(vec![
                Block::tool_use("a", "t", serde_json::json!({})),
                Block::tool_use("b", "t", serde_json::json!({})),
            ]))
            .unwrap();

        let err = store
            .append(Message::user(vec![ok_result("b"), ok_result("a")]))
            .unwrap_err();
        assert!(matches!(err, AgentError::InvariantViolation(_)));

        store
            .append(Message::user(vec![ok_result("a"), ok_result("b")]))
            .unwrap();
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn tool_result_message_cannot_mix_text() {
        let store = MessageStore::new();
        store
            .append(Message::user(vec![Block::text("go")]))
            .unwrap();
        store
            .append(Message::assistant(vec![Block::tool_use(
                "a",
                "t",
                serde_json::json!({}),
            )]))
            .unwrap();

        let err = store
            .append(Message::user(vec![ok_result("a"), Block::text("oops")]))
            .unwrap_err();
        assert!(matches!(err, AgentError::InvariantViolation(_)));
    }

    #[test]
    fn missing_or_extra_ids_are_rejected() {
        let store = MessageStore::new();
        store
            .append(Message::user(vec![Block::text("go")]))
            .unwrap();
        store
            .append(Message::assistant(vec![
                Block::tool_use("a", "t", serde_json::json!({})),
                Block::tool_use("b", "t", serde_json::json!({})),
            ]))
            .unwrap();

        let err = store
            .append(Message::user(vec![ok_result("a")]))
            .unwrap_err();
        assert!(matches!(err, AgentError::InvariantViolation(_)));
    }

    #[test]
    fn last_assistant_tool_uses_returns_ordered_ids() {
        let store = MessageStore::new();
        store
            .append(Message::user(vec![Block::text("go")]))
            .unwrap();
        store
            .append(Message::assistant(vec![
                Block::tool_use("a", "t", serde_json::json!({})),
                Block::tool_use("b", "t", serde_json::json!({})),
            ]))
            .unwrap();

        assert_eq!(store.last_assistant_tool_uses(), vec!["a", "b"]);
    }
}
