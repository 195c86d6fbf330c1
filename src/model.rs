//! Model adapter boundary: the trait a remote LLM provider must implement,
//! plus a hand-rolled scriptable test double (`MockModelClient`) used
//! throughout the driver tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::AgentError;
use crate::message::Message;

/// One event emitted while assembling a single model turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamEvent {
    TextDelta(String),
    ToolUseStart { id: String, name: String },
    ToolUseInputDelta { id: String, partial_json: String },
    BlockEnd,
    StopReason(StopReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

/// Adapter boundary to a remote LLM provider. Implementations
/// own retry-worthy transport details; [`crate::driver`] only sees
/// [`AgentError::ModelError`] for anything unrecoverable within a single
/// attempt.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        tool_schemas: &[serde_json::Value],
    ) -> Result<Vec<StreamEvent>, AgentError>;
}

/// Scriptable test double: replays a queue of canned responses (or errors)
/// for successive `complete` calls, recording every prompt it was given.
pub struct MockModelClient {
    responses: Mutex<Vec<Result<Vec<StreamEvent>, AgentError>>>,
    calls_seen: AtomicUsize,
    prompts: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockModelClient {
    pub fn new(responses: Vec<Result<Vec<StreamEvent>, AgentError>>) -> Self {
        MockModelClient {
            responses: Mutex::new(responses),
            calls_seen: AtomicUsize::new(0),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls_seen(&self) -> usize {
        self.calls_seen.load(Ordering::SeqCst)
    }

    pub async fn prompts(&self) -> Vec<Vec<Message>> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn complete(
        &self,
        messages: &[Message],
        _tool_schemas: &[serde_json::Value],
    ) -> Result<Vec<StreamEvent>, AgentError> {
        self.calls_seen.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().await.push(messages.to_vec());

        let mut queue = self.responses.lock().await;
        if queue.is_empty() {
            return Err(AgentError::ModelError(
                "MockModelClient exhausted its scripted responses".into(),
            ));
        }
        queue.remove(0)
    }
}

/// Helper for building a scripted text-only response.
pub fn text_turn(text: impl Into<String>) -> Vec<StreamEvent> {
    vec![
        StreamEvent::TextDelta(text.into()),
        StreamEvent::BlockEnd,
        StreamEvent::StopReason(StopReason::EndTurn),
    ]
}

/// Helper for building a scripted single-tool-call response.
pub fn tool_call_turn(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Vec<StreamEvent> {
    vec![
        StreamEvent::ToolUseStart {
            id: id.into(),
            name: name.into(),
        },
        StreamEvent::ToolUseInputDelta {
            id: String::new(),
            partial_json: input.to_string(),
        },
        StreamEvent::BlockEnd,
        StreamEvent::StopReason(StopReason::ToolUse),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[tokio::test]
    async fn mock_replays_scripted_responses_in_order() {
        let mock = MockModelClient::new(vec![
            Ok(text_turn("hello")),
            Ok(text_turn("world")),
        ]);

        let msgs = vec![Message::user(vec![crate::message::Block::text("hi")])];
        let first = mock.complete(&msgs, &[]).await.unwrap();
        let second = mock.complete(&msgs, &[]).await.unwrap();

        assert!(matches!(&first[0], StreamEvent::TextDelta(t) if t == "hello"));
        assert!(matches!(&second[0], StreamEvent::TextDelta(t) if t == "world"));
        assert_eq!(mock.calls_seen(), 2);
    }

    #[tokio::test]
    async fn mock_errors_when_queue_exhausted() {
        let mock = MockModelClient::new(vec![]);
        let msgs = vec![Message::user(vec![crate::message::Block::text("hi")])];
        let err = mock.complete(&msgs, &[]).await.unwrap_err();
        assert!(matches!(err, AgentError::ModelError(_)));
    }
}
