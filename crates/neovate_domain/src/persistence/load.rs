use crate::{
    AppState, GitState, Message, PendingChange, PersistedAppState, PersistedRepo, Repo, Selection,
    Session, SessionId, Workspace, WorkspaceId,
};
use std::collections::{BTreeMap, HashSet};

/// Installs a loaded snapshot into an empty store. Entries that would break
/// the table invariants (duplicate keys, blank paths) are dropped, and the
/// selection is cut back to whatever still resolves.
pub(crate) fn apply_persisted_app_state(state: &mut AppState, persisted: PersistedAppState) {
    if !state.repos.is_empty() {
        return;
    }

    let (repos, workspaces, sessions) = load_tables(persisted.repos);

    let max_workspace_id = workspaces.keys().map(|id| id.0).max().unwrap_or(0);
    let max_session_id = sessions.keys().map(|id| id.0).max().unwrap_or(0);

    state.repos = repos;
    state.workspaces = workspaces;
    state.sessions = sessions;
    state.next_workspace_id = persisted.next_workspace_id.max(max_workspace_id.saturating_add(1));
    state.next_session_id = persisted.next_session_id.max(max_session_id.saturating_add(1));

    state.selection = Selection {
        repo_path: persisted.selected_repo_path,
        workspace_id: persisted.selected_workspace_id.map(WorkspaceId),
        session_id: persisted.selected_session_id.map(SessionId),
    };
    state.clear_dangling_selection();
}

/// 0 is never allocated and `u64::MAX` leaves no room for the next id.
fn usable_id(id: u64) -> bool {
    id != 0 && id != u64::MAX
}

type Tables = (
    Vec<Repo>,
    BTreeMap<WorkspaceId, Workspace>,
    BTreeMap<SessionId, Session>,
);

fn load_tables(persisted: Vec<PersistedRepo>) -> Tables {
    let mut repos: Vec<Repo> = Vec::with_capacity(persisted.len());
    let mut workspaces = BTreeMap::new();
    let mut sessions = BTreeMap::new();
    let mut seen_paths = HashSet::new();

    for repo in persisted {
        if repo.path.as_os_str().is_empty() || !seen_paths.insert(repo.path.clone()) {
            continue;
        }

        let mut workspace_ids = Vec::with_capacity(repo.workspaces.len());
        for workspace in repo.workspaces {
            let workspace_id = WorkspaceId(workspace.id);
            if !usable_id(workspace.id) || workspaces.contains_key(&workspace_id) {
                continue;
            }

            for session in workspace.sessions {
                let session_id = SessionId(session.id);
                if !usable_id(session.id) || sessions.contains_key(&session_id) {
                    continue;
                }
                let messages = session
                    .messages
                    .into_iter()
                    .map(|m| Message {
                        role: m.role,
                        content: m.content,
                        timestamp_unix_ms: m.timestamp_unix_ms,
                    })
                    .collect();
                sessions.insert(
                    session_id,
                    Session::with_messages(session_id, workspace_id, messages),
                );
            }

            workspace_ids.push(workspace_id);
            workspaces.insert(
                workspace_id,
                Workspace {
                    id: workspace_id,
                    repo_path: repo.path.clone(),
                    branch: workspace.branch,
                    git_state: GitState {
                        pending_changes: workspace
                            .pending_changes
                            .into_iter()
                            .map(|c| PendingChange {
                                path: c.path,
                                kind: c.kind,
                            })
                            .collect(),
                    },
                },
            );
        }

        repos.push(Repo {
            path: repo.path,
            name: repo.name,
            workspace_ids,
        });
    }

    (repos, workspaces, sessions)
}
