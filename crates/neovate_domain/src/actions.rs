use crate::{Message, PendingChange, PersistedAppState, SessionId, WorkspaceId};
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub enum Action {
    AppStateLoaded {
        persisted: Box<PersistedAppState>,
    },

    AddRepo {
        path: PathBuf,
        name: String,
    },
    DeleteRepo {
        path: PathBuf,
    },

    CreateWorkspace {
        repo_path: PathBuf,
        branch: String,
    },
    DeleteWorkspace {
        workspace_id: WorkspaceId,
    },
    WorkspaceGitStateRefreshed {
        workspace_id: WorkspaceId,
        pending_changes: Vec<PendingChange>,
    },

    CreateSession {
        workspace_id: WorkspaceId,
    },

    SelectRepo {
        path: Option<PathBuf>,
    },
    SelectWorkspace {
        workspace_id: Option<WorkspaceId>,
    },
    SelectSession {
        session_id: Option<SessionId>,
    },

    AddMessage {
        session_id: SessionId,
        message: Message,
    },
    SendMessage {
        session_id: SessionId,
        content: String,
    },
    AssistantReplied {
        session_id: SessionId,
        content: String,
    },
    RunCommand {
        session_id: SessionId,
        command: String,
    },
}
