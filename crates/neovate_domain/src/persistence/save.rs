use crate::{
    AppState, PersistedAppState, PersistedMessage, PersistedPendingChange, PersistedRepo,
    PersistedSession, PersistedWorkspace,
};

pub(crate) fn to_persisted_app_state(state: &AppState) -> PersistedAppState {
    PersistedAppState {
        repos: state
            .repos
            .iter()
            .map(|repo| PersistedRepo {
                path: repo.path.clone(),
                name: repo.name.clone(),
                workspaces: repo
                    .workspace_ids
                    .iter()
                    .filter_map(|id| state.workspaces.get(id))
                    .map(|w| PersistedWorkspace {
                        id: w.id.0,
                        branch: w.branch.clone(),
                        pending_changes: w
                            .git_state
                            .pending_changes
                            .iter()
                            .map(|c| PersistedPendingChange {
                                path: c.path.clone(),
                                kind: c.kind,
                            })
                            .collect(),
                        sessions: state
                            .sessions_of(w.id)
                            .map(|s| PersistedSession {
                                id: s.id.0,
                                messages: s
                                    .messages()
                                    .iter()
                                    .map(|m| PersistedMessage {
                                        role: m.role,
                                        content: m.content.clone(),
                                        timestamp_unix_ms: m.timestamp_unix_ms,
                                    })
                                    .collect(),
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect(),
        selected_repo_path: state.selection.repo_path.clone(),
        selected_workspace_id: state.selection.workspace_id.map(|id| id.0),
        selected_session_id: state.selection.session_id.map(|id| id.0),
        next_workspace_id: state.next_workspace_id,
        next_session_id: state.next_session_id,
    }
}
