use crate::{AppState, Selection, SessionId, WorkspaceId};
use std::path::PathBuf;

impl AppState {
    /// Returns whether the selection changed. Changing the repo drops the
    /// workspace and session below it.
    pub(super) fn select_repo(&mut self, path: Option<PathBuf>) -> bool {
        let next = match path {
            Some(path) => {
                if self.repo(&path).is_none() {
                    return false;
                }
                if self.selection.repo_path.as_ref() == Some(&path) {
                    return false;
                }
                Selection {
                    repo_path: Some(path),
                    workspace_id: None,
                    session_id: None,
                }
            }
            None => Selection::default(),
        };
        self.replace_selection(next)
    }

    pub(super) fn select_workspace(&mut self, workspace_id: Option<WorkspaceId>) -> bool {
        let next = match workspace_id {
            Some(workspace_id) => {
                let Some(workspace) = self.workspaces.get(&workspace_id) else {
                    return false;
                };
                let session_id = self
                    .selection
                    .session_id
                    .filter(|id| {
                        self.sessions
                            .get(id)
                            .is_some_and(|s| s.workspace_id == workspace_id)
                    });
                Selection {
                    repo_path: Some(workspace.repo_path.clone()),
                    workspace_id: Some(workspace_id),
                    session_id,
                }
            }
            None => Selection {
                repo_path: self.selection.repo_path.clone(),
                workspace_id: None,
                session_id: None,
            },
        };
        self.replace_selection(next)
    }

    pub(super) fn select_session(&mut self, session_id: Option<SessionId>) -> bool {
        let next = match session_id {
            Some(session_id) => {
                let Some(session) = self.sessions.get(&session_id) else {
                    return false;
                };
                let Some(workspace) = self.workspaces.get(&session.workspace_id) else {
                    return false;
                };
                Selection {
                    repo_path: Some(workspace.repo_path.clone()),
                    workspace_id: Some(workspace.id),
                    session_id: Some(session_id),
                }
            }
            None => Selection {
                session_id: None,
                ..self.selection.clone()
            },
        };
        self.replace_selection(next)
    }

    /// Drops selection levels whose entity is gone or no longer sits under the
    /// level above it.
    pub(crate) fn clear_dangling_selection(&mut self) {
        if let Some(path) = &self.selection.repo_path
            && self.repo(path).is_none()
        {
            self.selection = Selection::default();
            return;
        }

        let workspace_ok = match (self.selection.workspace_id, &self.selection.repo_path) {
            (Some(id), Some(path)) => self
                .workspaces
                .get(&id)
                .is_some_and(|w| &w.repo_path == path),
            (Some(_), None) => false,
            (None, _) => true,
        };
        if !workspace_ok {
            self.selection.workspace_id = None;
            self.selection.session_id = None;
            return;
        }

        let session_ok = match (self.selection.session_id, self.selection.workspace_id) {
            (Some(id), Some(workspace_id)) => self
                .sessions
                .get(&id)
                .is_some_and(|s| s.workspace_id == workspace_id),
            (Some(_), None) => false,
            (None, _) => true,
        };
        if !session_ok {
            self.selection.session_id = None;
        }
    }

    fn replace_selection(&mut self, next: Selection) -> bool {
        if self.selection == next {
            return false;
        }
        self.selection = next;
        true
    }
}
