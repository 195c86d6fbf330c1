//! Session persistence: one JSON file per session id under
//! `session_storage_dir`, holding a durable `{messages, state}` snapshot.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::AgentError;
use crate::message::{Message, MessageStore};
use crate::state::{AgentState, AgentStateSnapshot};

const ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SessionEnvelope {
    envelope_version: u32,
    session_id: String,
    messages: Vec<Message>,
    state: AgentStateSnapshot,
}

/// A loaded session's live halves, ready to hand to [`crate::driver::run_turn`].
pub struct LoadedSession {
    pub messages: MessageStore,
    pub state: Arc<AgentState>,
}

/// Persists and restores `{messages, state}` pairs as one JSON file per
/// session id. A process-local lock set serializes concurrent
/// save/load of the *same* session id; a second concurrent opener of an
/// already-open session id gets [`AgentError::SessionBusy`] rather than
/// silently interleaving writes.
pub struct SessionManager {
    storage_dir: PathBuf,
    open_sessions: Mutex<HashMap<String, ()>>,
}

impl SessionManager {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        SessionManager {
            storage_dir: storage_dir.into(),
            open_sessions: Mutex::new(HashMap::new()),
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.storage_dir.join(format!("{session_id}.json"))
    }

    /// Marks `session_id` open for the duration of the returned guard's
    /// scope is the caller's responsibility: call [`Self::release`] when
    /// done. Returns [`AgentError::SessionBusy`] if already open.
    async fn acquire(&self, session_id: &str) -> Result<(), AgentError> {
        let mut open = self.open_sessions.lock().await;
        if open.contains_key(session_id) {
            return Err(AgentError::SessionBusy {
                session_id: session_id.to_string(),
            });
        }
        open.insert(session_id.to_string(), ());
        Ok(())
    }

    pub async fn release(&self, session_id: &str) {
        self.open_sessions.lock().await.remove(session_id);
    }

    pub async fn save(
        &self,
        session_id: &str,
        messages: &MessageStore,
        state: &AgentState,
    ) -> Result<(), AgentError> {
        fs::create_dir_all(&self.storage_dir).await?;

        let envelope = SessionEnvelope {
            envelope_version: ENVELOPE_VERSION,
            session_id: session_id.to_string(),
            messages: messages.view(),
            state: state.snapshot().await,
        };

        let json = serde_json::to_vec_pretty(&envelope)?;
        let path = self.path_for(session_id);
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json).await?;
        fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    pub async fn load(&self, session_id: &str) -> Result<LoadedSession, AgentError> {
        self.acquire(session_id).await?;
        let path = self.path_for(session_id);
        let bytes = fs::read(&path).await.map_err(|e| AgentError::SessionLoadError {
            session_id: session_id.to_string(),
            reason: e.to_string(),
        })?;

        let envelope: SessionEnvelope = serde_json::from_slice(&bytes).map_err(|e| {
            AgentError::SessionLoadError {
                session_id: session_id.to_string(),
                reason: e.to_string(),
            }
        })?;

        if envelope.envelope_version != ENVELOPE_VERSION {
            return Err(AgentError::SessionLoadError {
                session_id: session_id.to_string(),
                reason: format!(
                    "unsupported envelope version {}",
                    envelope.envelope_version
                ),
            });
        }

        Ok(LoadedSession {
            messages: MessageStore::from_messages(envelope.messages),
            state: Arc::new(AgentState::from_snapshot(envelope.state)),
        })
    }

    pub async fn exists(&self, session_id: &str) -> bool {
        fs::metadata(self.path_for(session_id)).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Block;
    use crate::state::{TodoItem, TodoPriority, TodoStatus};

    #[tokio::test]
    async fn save_then_load_round_trips_messages_and_state() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(dir.path());

        let messages = MessageStore::new();
        messages
            .append(Message::user(vec![Block::text("hello")]))
            .unwrap();
        let state = AgentState::new();
        state
            .write_todos(vec![TodoItem {
                id: "1".into(),
                content: "write tests".into(),
                status: TodoStatus::Pending,
                priority: TodoPriority::High,
            }])
            .await
            .unwrap();

        manager.save("sess-1", &messages, &state).await.unwrap();
        manager.release("sess-1").await;

        let loaded = manager.load("sess-1").await.unwrap();
        assert_eq!(loaded.messages.len(), 1);
        let todos = loaded.state.read_todos().await;
        assert_eq!(todos.len(), 1);
        assert_eq!(todos[0].priority, TodoPriority::High);
    }

    #[tokio::test]
    async fn loading_the_same_session_twice_concurrently_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(dir.path());
        let messages = MessageStore::new();
        messages
            .append(Message::user(vec![Block::text("hi")]))
            .unwrap();
        let state = AgentState::new();
        manager.save("sess-2", &messages, &state).await.unwrap();

        let _first = manager.load("sess-2").await.unwrap();
        let err = manager.load("sess-2").await.unwrap_err();
        assert!(matches!(err, AgentError::SessionBusy { .. }));
    }

    #[tokio::test]
    async fn loading_an_unknown_session_errors() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(dir.path());
        let err = manager.load("never-existed").await.unwrap_err();
        assert!(matches!(err, AgentError::SessionLoadError { .. }));
    }
}
