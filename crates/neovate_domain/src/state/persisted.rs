use super::{MessageRole, PendingChangeKind};
use std::path::PathBuf;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PersistedAppState {
    pub repos: Vec<PersistedRepo>,
    pub selected_repo_path: Option<PathBuf>,
    pub selected_workspace_id: Option<u64>,
    pub selected_session_id: Option<u64>,
    pub next_workspace_id: u64,
    pub next_session_id: u64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PersistedRepo {
    pub path: PathBuf,
    pub name: String,
    pub workspaces: Vec<PersistedWorkspace>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PersistedWorkspace {
    pub id: u64,
    pub branch: String,
    pub pending_changes: Vec<PersistedPendingChange>,
    pub sessions: Vec<PersistedSession>,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PersistedPendingChange {
    pub path: String,
    pub kind: PendingChangeKind,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PersistedSession {
    pub id: u64,
    pub messages: Vec<PersistedMessage>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PersistedMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp_unix_ms: u64,
}
