use super::{SessionId, WorkspaceId};
use std::path::PathBuf;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Selection {
    pub repo_path: Option<PathBuf>,
    pub workspace_id: Option<WorkspaceId>,
    pub session_id: Option<SessionId>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.repo_path.is_none() && self.workspace_id.is_none() && self.session_id.is_none()
    }
}
