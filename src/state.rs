//! Session-scoped agent state: TODOs, virtual filesystem, and a free-form
//! scratch map. Owned per-session rather than as process-global storage, so
//! two sessions (or a session and its sub-agents) never see each other's
//! writes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TodoPriority {
    High,
    Medium,
    Low,
}

impl Default for TodoPriority {
    fn default() -> Self {
        TodoPriority::Medium
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
    #[serde(default)]
    pub priority: TodoPriority,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualFile {
    pub content: Vec<u8>,
    pub last_write_turn: u64,
}

/// The three conceptual slices of `AgentState`, all JSON-serializable so
/// [`crate::session::SessionManager`] can round-trip them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStateSnapshot {
    pub todos: Vec<TodoItem>,
    pub files: BTreeMap<String, VirtualFile>,
    pub scratch: BTreeMap<String, serde_json::Value>,
}

/// Owns one logical serialization point over the three slices so that
/// concurrent `state`-class tool calls within a batch observe linearizable
/// semantics.
#[derive(Default)]
pub struct AgentState {
    inner: Mutex<AgentStateSnapshot>,
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: AgentStateSnapshot) -> Self {
        AgentState {
            inner: Mutex::new(snapshot),
        }
    }

    pub async fn snapshot(&self) -> AgentStateSnapshot {
        self.inner.lock().await.clone()
    }

    /// Replace the TODO list wholesale, validating the at-most-one
    /// `in_progress` invariant.
    pub async fn write_todos(&self, items: Vec<TodoItem>) -> Result<(), AgentError> {
        let in_progress = items
            .iter()
            .filter(|t| t.status == TodoStatus::InProgress)
            .count();
        if in_progress > 1 {
            return Err(AgentError::Internal(
                "at most one todo may be in_progress at a time".into(),
            ));
        }
        self.inner.lock().await.todos = items;
        Ok(())
    }

    pub async fn read_todos(&self) -> Vec<TodoItem> {
        self.inner.lock().await.todos.clone()
    }

    /// Apply a status transition, enforcing the permitted-transition table.
    /// Returns an error (never panics, never corrupts state) on any other
    /// transition, including unknown ids.
    pub async fn update_todo_status(
        &self,
        id: &str,
        new_status: TodoStatus,
    ) -> Result<(), AgentError> {
        use TodoStatus::*;
        let mut guard = self.inner.lock().await;
        let todo = guard
            .todos
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| AgentError::Internal(format!("no such todo: {id}")))?;

        let allowed = matches!(
            (todo.status, new_status),
            (Pending, InProgress) | (InProgress, Completed) | (InProgress, Cancelled) | (Pending, Cancelled)
        );
        if !allowed {
            return Err(AgentError::Internal(format!(
                "illegal todo transition: {:?} -> {:?}",
                todo.status, new_status
            )));
        }

        if new_status == InProgress {
            let already_in_progress = guard
                .todos
                .iter()
                .any(|t| t.id != id && t.status == InProgress);
            if already_in_progress {
                return Err(AgentError::Internal(
                    "another todo is already in_progress".into(),
                ));
            }
        }

        // Re-borrow after the read-only scan above released its borrow.
        let todo = guard.todos.iter_mut().find(|t| t.id == id).unwrap();
        todo.status = new_status;
        Ok(())
    }

    pub async fn write_file(&self, path: &str, content: Vec<u8>, turn: u64) {
        self.inner.lock().await.files.insert(
            path.to_string(),
            VirtualFile {
                content,
                last_write_turn: turn,
            },
        );
    }

    pub async fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .await
            .files
            .get(path)
            .map(|f| f.content.clone())
    }

    pub async fn list_files(&self, prefix: Option<&str>) -> Vec<String> {
        let guard = self.inner.lock().await;
        guard
            .files
            .keys()
            .filter(|p| prefix.is_none_or(|pre| p.starts_with(pre)))
            .cloned()
            .collect()
    }

    pub async fn scratch_get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.lock().await.scratch.get(key).cloned()
    }

    pub async fn scratch_set(&self, key: &str, value: serde_json::Value) {
        self.inner.lock().await.scratch.insert(key.to_string(), value);
    }

    /// Clone the file slice only — used when a sub-agent is configured to
    /// inherit the parent's virtual filesystem.
    pub async fn clone_files(&self) -> BTreeMap<String, VirtualFile> {
        self.inner.lock().await.files.clone()
    }

    pub async fn seed_files(&self, files: BTreeMap<String, VirtualFile>) {
        self.inner.lock().await.files = files;
    }
}

/// Timestamp helper kept at module scope so callers don't each pull in
/// `chrono` directly for a one-off turn counter.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_todos_rejects_two_in_progress() {
        let state = AgentState::new();
        let err = state
            .write_todos(vec![
                TodoItem {
                    id: "1".into(),
                    content: "a".into(),
                    status: TodoStatus::InProgress,
                    priority: TodoPriority::Medium,
                },
                TodoItem {
                    id: "2".into(),
                    content: "b".into(),
                    status: TodoStatus::InProgress,
                    priority: TodoPriority::Medium,
                },
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Internal(_)));
    }

    #[tokio::test]
    async fn todo_lifecycle_e4() {
        let state = AgentState::new();
        state
            .write_todos(vec![
                TodoItem {
                    id: "1".into(),
                    content: "A".into(),
                    status: TodoStatus::Pending,
                    priority: TodoPriority::Medium,
                },
                TodoItem {
                    id: "2".into(),
                    content: "B".into(),
                    status: TodoStatus::Pending,
                    priority: TodoPriority::Medium,
                },
            ])
            .await
            .unwrap();

        state
            .update_todo_status("1", TodoStatus::InProgress)
            .await
            .unwrap();

        let err = state
            .update_todo_status("2", TodoStatus::InProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Internal(_)));

        let todos = state.read_todos().await;
        assert_eq!(todos[0].status, TodoStatus::InProgress);
        assert_eq!(todos[1].status, TodoStatus::Pending);
    }

    #[tokio::test]
    async fn illegal_transitions_are_rejected() {
        let state = AgentState::new();
        state
            .write_todos(vec![TodoItem {
                id: "1".into(),
                content: "A".into(),
                status: TodoStatus::Completed,
                priority: TodoPriority::Medium,
            }])
            .await
            .unwrap();

        let err = state
            .update_todo_status("1", TodoStatus::InProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Internal(_)));
    }

    #[tokio::test]
    async fn virtual_filesystem_roundtrip() {
        let state = AgentState::new();
        state.write_file("/notes.md", b"hello".to_vec(), 1).await;
        assert_eq!(state.read_file("/notes.md").await, Some(b"hello".to_vec()));
        assert_eq!(state.read_file("/missing.md").await, None);

        state.write_file("/dir/a.txt", b"a".to_vec(), 2).await;
        state.write_file("/dir/b.txt", b"b".to_vec(), 2).await;
        let mut listed = state.list_files(Some("/dir/")).await;
        listed.sort();
        assert_eq!(listed, vec!["/dir/a.txt", "/dir/b.txt"]);
    }
}
