use super::{Repo, Selection, Session, SessionId, Workspace, WorkspaceId};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Normalized in-memory tables. Only this struct owns entities; everything
/// else refers to them by key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AppState {
    pub(crate) next_workspace_id: u64,
    pub(crate) next_session_id: u64,

    pub(crate) repos: Vec<Repo>,
    pub(crate) workspaces: BTreeMap<WorkspaceId, Workspace>,
    pub(crate) sessions: BTreeMap<SessionId, Session>,
    pub(crate) selection: Selection,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn repos(&self) -> &[Repo] {
        &self.repos
    }

    pub fn repo(&self, path: &Path) -> Option<&Repo> {
        self.repos.iter().find(|r| r.path == path)
    }

    pub fn workspace(&self, workspace_id: WorkspaceId) -> Option<&Workspace> {
        self.workspaces.get(&workspace_id)
    }

    pub fn session(&self, session_id: SessionId) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    pub fn workspaces_of<'a>(&'a self, path: &Path) -> impl Iterator<Item = &'a Workspace> + 'a {
        self.repo(path)
            .into_iter()
            .flat_map(|repo| repo.workspace_ids.iter())
            .filter_map(|id| self.workspaces.get(id))
    }

    pub fn sessions_of(&self, workspace_id: WorkspaceId) -> impl Iterator<Item = &Session> + '_ {
        self.sessions
            .values()
            .filter(move |s| s.workspace_id == workspace_id)
    }

    pub fn workspace_count(&self) -> usize {
        self.workspaces.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn selected_repo_path(&self) -> Option<&PathBuf> {
        self.selection.repo_path.as_ref()
    }

    pub fn selected_workspace_id(&self) -> Option<WorkspaceId> {
        self.selection.workspace_id
    }

    pub fn selected_session_id(&self) -> Option<SessionId> {
        self.selection.session_id
    }

    pub fn selected_session(&self) -> Option<&Session> {
        self.selection.session_id.and_then(|id| self.sessions.get(&id))
    }
}
