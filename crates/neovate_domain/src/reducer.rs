use crate::persistence;
use crate::{
    Action, AppState, Effect, GitState, Message, PersistedAppState, Repo, Selection, Session,
    SessionId, Workspace, WorkspaceId,
};
use std::collections::BTreeMap;
use std::path::PathBuf;

mod selection;

fn now_unix_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u64::try_from(d.as_millis()).ok())
        .unwrap_or(0)
}

impl AppState {
    pub fn new() -> Self {
        Self {
            next_workspace_id: 1,
            next_session_id: 1,
            repos: Vec::new(),
            workspaces: BTreeMap::new(),
            sessions: BTreeMap::new(),
            selection: Selection::default(),
        }
    }

    pub fn apply(&mut self, action: Action) -> Vec<Effect> {
        match action {
            Action::AppStateLoaded { persisted } => {
                persistence::apply_persisted_app_state(self, *persisted);
                Vec::new()
            }

            Action::AddRepo { path, name } => {
                if !self.add_repo(path, name) {
                    return Vec::new();
                }
                vec![Effect::SaveAppState]
            }
            Action::DeleteRepo { path } => {
                if !self.delete_repo(&path) {
                    return Vec::new();
                }
                vec![Effect::SaveAppState]
            }

            Action::CreateWorkspace { repo_path, branch } => {
                let branch = branch.trim();
                if branch.is_empty() {
                    return Vec::new();
                }
                let Some(workspace_id) = self.insert_workspace(&repo_path, branch) else {
                    return Vec::new();
                };
                self.select_workspace(Some(workspace_id));
                vec![Effect::SaveAppState]
            }
            Action::DeleteWorkspace { workspace_id } => {
                if !self.delete_workspace(workspace_id) {
                    return Vec::new();
                }
                vec![Effect::SaveAppState]
            }
            Action::WorkspaceGitStateRefreshed {
                workspace_id,
                pending_changes,
            } => {
                let Some(workspace) = self.workspaces.get_mut(&workspace_id) else {
                    return Vec::new();
                };
                if workspace.git_state.pending_changes == pending_changes {
                    return Vec::new();
                }
                workspace.git_state = GitState { pending_changes };
                vec![Effect::SaveAppState]
            }

            Action::CreateSession { workspace_id } => {
                if !self.workspaces.contains_key(&workspace_id) {
                    return Vec::new();
                }
                let Some(next_session_id) = self.next_session_id.checked_add(1) else {
                    return Vec::new();
                };
                let session_id = SessionId(self.next_session_id);
                self.next_session_id = next_session_id;
                self.sessions
                    .insert(session_id, Session::new(session_id, workspace_id));
                self.select_session(Some(session_id));
                vec![Effect::SaveAppState]
            }

            Action::SelectRepo { path } => {
                if !self.select_repo(path) {
                    return Vec::new();
                }
                vec![Effect::SaveAppState]
            }
            Action::SelectWorkspace { workspace_id } => {
                if !self.select_workspace(workspace_id) {
                    return Vec::new();
                }
                vec![Effect::SaveAppState]
            }
            Action::SelectSession { session_id } => {
                if !self.select_session(session_id) {
                    return Vec::new();
                }
                vec![Effect::SaveAppState]
            }

            Action::AddMessage {
                session_id,
                message,
            } => {
                let Some(session) = self.sessions.get_mut(&session_id) else {
                    return Vec::new();
                };
                session.push(message);
                vec![Effect::SaveAppState]
            }
            Action::SendMessage {
                session_id,
                content,
            } => {
                let content = content.trim();
                if content.is_empty() {
                    return Vec::new();
                }
                if !self.push_now(session_id, Message::user(content, 0)) {
                    return Vec::new();
                }
                vec![
                    Effect::SaveAppState,
                    Effect::RequestAssistantReply {
                        session_id,
                        content: content.to_owned(),
                    },
                ]
            }
            Action::AssistantReplied {
                session_id,
                content,
            } => {
                if !self.push_now(session_id, Message::assistant(content, 0)) {
                    return Vec::new();
                }
                vec![Effect::SaveAppState]
            }
            Action::RunCommand {
                session_id,
                command,
            } => {
                let command = command.trim();
                if command.is_empty() || !self.sessions.contains_key(&session_id) {
                    return Vec::new();
                }
                vec![Effect::RunCommand {
                    session_id,
                    command: command.to_owned(),
                }]
            }
        }
    }

    pub fn to_persisted(&self) -> PersistedAppState {
        persistence::to_persisted_app_state(self)
    }

    /// Same as applying `Action::AppStateLoaded`; a no-op on a non-empty store.
    pub fn apply_persisted(&mut self, persisted: PersistedAppState) {
        persistence::apply_persisted_app_state(self, persisted);
    }

    fn add_repo(&mut self, path: PathBuf, name: String) -> bool {
        if self.repo(&path).is_some() {
            return false;
        }
        let name = match name.trim() {
            "" => derive_repo_name(&path),
            trimmed => trimmed.to_owned(),
        };
        self.repos.push(Repo {
            path,
            name,
            workspace_ids: Vec::new(),
        });
        true
    }

    fn delete_repo(&mut self, path: &std::path::Path) -> bool {
        let Some(repo_idx) = self.repos.iter().position(|r| r.path == path) else {
            return false;
        };
        let repo = self.repos.remove(repo_idx);

        let mut workspace_ids = repo.workspace_ids;
        workspace_ids.extend(
            self.workspaces
                .values()
                .filter(|w| w.repo_path == path)
                .map(|w| w.id),
        );
        for workspace_id in &workspace_ids {
            self.workspaces.remove(workspace_id);
        }
        self.sessions
            .retain(|_, session| !workspace_ids.contains(&session.workspace_id));

        if self.selection.repo_path.as_deref() == Some(path) {
            self.selection = Selection::default();
        }
        self.clear_dangling_selection();
        true
    }

    fn insert_workspace(&mut self, repo_path: &std::path::Path, branch: &str) -> Option<WorkspaceId> {
        let repo = self.repos.iter_mut().find(|r| r.path == repo_path)?;
        let next_workspace_id = self.next_workspace_id.checked_add(1)?;
        let workspace_id = WorkspaceId(self.next_workspace_id);
        self.next_workspace_id = next_workspace_id;
        repo.workspace_ids.push(workspace_id);
        self.workspaces.insert(
            workspace_id,
            Workspace {
                id: workspace_id,
                repo_path: repo.path.clone(),
                branch: branch.to_owned(),
                git_state: GitState::default(),
            },
        );
        Some(workspace_id)
    }

    fn delete_workspace(&mut self, workspace_id: WorkspaceId) -> bool {
        let Some(workspace) = self.workspaces.remove(&workspace_id) else {
            return false;
        };
        if let Some(repo) = self.repos.iter_mut().find(|r| r.path == workspace.repo_path) {
            repo.workspace_ids.retain(|id| *id != workspace_id);
        }
        self.sessions
            .retain(|_, session| session.workspace_id != workspace_id);
        self.clear_dangling_selection();
        true
    }

    /// Appends with a timestamp that never goes backwards within the session.
    fn push_now(&mut self, session_id: SessionId, mut message: Message) -> bool {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return false;
        };
        let now = now_unix_ms();
        message.timestamp_unix_ms = session
            .last_timestamp_unix_ms()
            .map_or(now, |last| last.max(now));
        session.push(message);
        true
    }
}

fn derive_repo_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MessageRole, PendingChange, PendingChangeKind};

    fn state_with_repo(path: &str) -> AppState {
        let mut state = AppState::new();
        state.apply(Action::AddRepo {
            path: PathBuf::from(path),
            name: String::new(),
        });
        state
    }

    fn create_workspace(state: &mut AppState, repo: &str, branch: &str) -> WorkspaceId {
        state.apply(Action::CreateWorkspace {
            repo_path: PathBuf::from(repo),
            branch: branch.to_owned(),
        });
        state.selected_workspace_id().expect("workspace selected")
    }

    fn create_session(state: &mut AppState, workspace_id: WorkspaceId) -> SessionId {
        state.apply(Action::CreateSession { workspace_id });
        state.selected_session_id().expect("session selected")
    }

    #[test]
    fn add_repo_creates_no_workspaces_and_emits_save() {
        let mut state = AppState::new();
        let effects = state.apply(Action::AddRepo {
            path: PathBuf::from("/a"),
            name: "A".to_owned(),
        });
        assert_eq!(effects, vec![Effect::SaveAppState]);
        let repo = state.repo(std::path::Path::new("/a")).expect("missing repo");
        assert_eq!(repo.name, "A");
        assert!(repo.workspace_ids.is_empty());
        assert_eq!(state.workspace_count(), 0);
    }

    #[test]
    fn add_repo_twice_is_a_noop() {
        let mut state = state_with_repo("/tmp/repo");
        let effects = state.apply(Action::AddRepo {
            path: PathBuf::from("/tmp/repo"),
            name: "other".to_owned(),
        });
        assert!(effects.is_empty());
        assert_eq!(state.repos().len(), 1);
        assert_eq!(state.repos()[0].name, "repo");
    }

    #[test]
    fn delete_repo_cascades_and_clears_selection() {
        let mut state = state_with_repo("/tmp/a");
        state.apply(Action::AddRepo {
            path: PathBuf::from("/tmp/b"),
            name: "b".to_owned(),
        });
        let a1 = create_workspace(&mut state, "/tmp/a", "main");
        let a2 = create_workspace(&mut state, "/tmp/a", "feature");
        let b1 = create_workspace(&mut state, "/tmp/b", "main");
        create_session(&mut state, a1);
        create_session(&mut state, a2);
        let survivor = create_session(&mut state, b1);
        let doomed = create_session(&mut state, a2);
        assert_eq!(state.selected_repo_path(), Some(&PathBuf::from("/tmp/a")));

        let effects = state.apply(Action::DeleteRepo {
            path: PathBuf::from("/tmp/a"),
        });
        assert_eq!(effects, vec![Effect::SaveAppState]);

        assert!(state.repo(std::path::Path::new("/tmp/a")).is_none());
        assert!(state.workspace(a1).is_none());
        assert!(state.workspace(a2).is_none());
        assert!(state.workspace(b1).is_some());
        assert!(state.session(doomed).is_none());
        assert!(state.session(survivor).is_some());
        assert_eq!(state.session_count(), 1);
        assert!(state.selection().is_empty());
    }

    #[test]
    fn delete_other_repo_keeps_selection() {
        let mut state = state_with_repo("/tmp/a");
        state.apply(Action::AddRepo {
            path: PathBuf::from("/tmp/b"),
            name: "b".to_owned(),
        });
        let a1 = create_workspace(&mut state, "/tmp/a", "main");
        let session = create_session(&mut state, a1);

        state.apply(Action::DeleteRepo {
            path: PathBuf::from("/tmp/b"),
        });

        assert_eq!(state.selected_workspace_id(), Some(a1));
        assert_eq!(state.selected_session_id(), Some(session));
    }

    #[test]
    fn delete_unknown_repo_is_a_noop() {
        let mut state = state_with_repo("/tmp/a");
        let before = state.clone();
        let effects = state.apply(Action::DeleteRepo {
            path: PathBuf::from("/tmp/missing"),
        });
        assert!(effects.is_empty());
        assert_eq!(state, before);
    }

    #[test]
    fn delete_workspace_removes_its_sessions() {
        let mut state = state_with_repo("/tmp/a");
        let w1 = create_workspace(&mut state, "/tmp/a", "main");
        let w2 = create_workspace(&mut state, "/tmp/a", "feature");
        let s1 = create_session(&mut state, w1);
        let s2 = create_session(&mut state, w2);

        state.apply(Action::DeleteWorkspace { workspace_id: w2 });

        assert!(state.session(s2).is_none());
        assert!(state.session(s1).is_some());
        assert_eq!(
            state.repo(std::path::Path::new("/tmp/a")).unwrap().workspace_ids,
            vec![w1]
        );
        assert_eq!(state.selected_workspace_id(), None);
        assert_eq!(state.selected_session_id(), None);
        assert_eq!(state.selected_repo_path(), Some(&PathBuf::from("/tmp/a")));
    }

    #[test]
    fn add_message_to_unknown_session_leaves_store_unchanged() {
        let mut state = state_with_repo("/a");
        let before = state.clone();
        let effects = state.apply(Action::AddMessage {
            session_id: SessionId::from_u64(42),
            message: Message::user("hello", 1),
        });
        assert!(effects.is_empty());
        assert_eq!(state, before);
    }

    #[test]
    fn add_message_appends_in_order() {
        let mut state = state_with_repo("/a");
        let workspace_id = create_workspace(&mut state, "/a", "main");
        let session_id = create_session(&mut state, workspace_id);

        for (idx, text) in ["one", "two", "three"].into_iter().enumerate() {
            state.apply(Action::AddMessage {
                session_id,
                message: Message::user(text, idx as u64),
            });
        }

        let contents: Vec<&str> = state
            .session(session_id)
            .unwrap()
            .messages()
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }

    #[test]
    fn send_message_is_optimistic_and_requests_reply() {
        let mut state = state_with_repo("/a");
        let workspace_id = create_workspace(&mut state, "/a", "main");
        let session_id = create_session(&mut state, workspace_id);

        let effects = state.apply(Action::SendMessage {
            session_id,
            content: "  hi there ".to_owned(),
        });
        assert_eq!(
            effects,
            vec![
                Effect::SaveAppState,
                Effect::RequestAssistantReply {
                    session_id,
                    content: "hi there".to_owned(),
                },
            ]
        );

        state.apply(Action::AssistantReplied {
            session_id,
            content: "hello".to_owned(),
        });
        let messages = state.session(session_id).unwrap().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].content, "hi there");
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert!(messages[1].timestamp_unix_ms >= messages[0].timestamp_unix_ms);
    }

    #[test]
    fn send_empty_message_is_ignored() {
        let mut state = state_with_repo("/a");
        let workspace_id = create_workspace(&mut state, "/a", "main");
        let session_id = create_session(&mut state, workspace_id);
        let effects = state.apply(Action::SendMessage {
            session_id,
            content: "   ".to_owned(),
        });
        assert!(effects.is_empty());
        assert!(state.session(session_id).unwrap().messages().is_empty());
    }

    #[test]
    fn assistant_reply_after_session_deletion_is_dropped() {
        let mut state = state_with_repo("/a");
        let workspace_id = create_workspace(&mut state, "/a", "main");
        let session_id = create_session(&mut state, workspace_id);
        state.apply(Action::DeleteWorkspace { workspace_id });

        let effects = state.apply(Action::AssistantReplied {
            session_id,
            content: "late".to_owned(),
        });
        assert!(effects.is_empty());
        assert_eq!(state.session_count(), 0);
    }

    #[test]
    fn run_command_emits_effect_without_state_change() {
        let mut state = state_with_repo("/a");
        let workspace_id = create_workspace(&mut state, "/a", "main");
        let session_id = create_session(&mut state, workspace_id);
        let before = state.clone();

        let effects = state.apply(Action::RunCommand {
            session_id,
            command: " /compact ".to_owned(),
        });
        assert_eq!(
            effects,
            vec![Effect::RunCommand {
                session_id,
                command: "/compact".to_owned(),
            }]
        );
        assert_eq!(state, before);
    }

    #[test]
    fn create_workspace_requires_known_repo_and_branch() {
        let mut state = state_with_repo("/a");
        assert!(
            state
                .apply(Action::CreateWorkspace {
                    repo_path: PathBuf::from("/missing"),
                    branch: "main".to_owned(),
                })
                .is_empty()
        );
        assert!(
            state
                .apply(Action::CreateWorkspace {
                    repo_path: PathBuf::from("/a"),
                    branch: "  ".to_owned(),
                })
                .is_empty()
        );
        assert_eq!(state.workspace_count(), 0);
    }

    #[test]
    fn workspace_ids_are_never_reused() {
        let mut state = state_with_repo("/a");
        let w1 = create_workspace(&mut state, "/a", "main");
        state.apply(Action::DeleteWorkspace { workspace_id: w1 });
        let w2 = create_workspace(&mut state, "/a", "main");
        assert_ne!(w1, w2);
    }

    #[test]
    fn git_state_refresh_replaces_pending_changes_once() {
        let mut state = state_with_repo("/a");
        let workspace_id = create_workspace(&mut state, "/a", "main");
        let changes = vec![PendingChange {
            path: "src/lib.rs".to_owned(),
            kind: PendingChangeKind::Modified,
        }];

        let first = state.apply(Action::WorkspaceGitStateRefreshed {
            workspace_id,
            pending_changes: changes.clone(),
        });
        let second = state.apply(Action::WorkspaceGitStateRefreshed {
            workspace_id,
            pending_changes: changes.clone(),
        });

        assert_eq!(first, vec![Effect::SaveAppState]);
        assert!(second.is_empty());
        assert_eq!(
            state.workspace(workspace_id).unwrap().git_state.pending_changes,
            changes
        );
    }
}
