use super::WorkspaceId;
use std::path::PathBuf;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Repo {
    pub path: PathBuf,
    pub name: String,
    pub workspace_ids: Vec<WorkspaceId>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
    Untracked,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingChange {
    pub path: String,
    pub kind: PendingChangeKind,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GitState {
    pub pending_changes: Vec<PendingChange>,
}

/// A checkout of a repository. `repo_path` only points back at the owning
/// [`Repo`]; the repo's `workspace_ids` list is what owns the membership.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub repo_path: PathBuf,
    pub branch: String,
    pub git_state: GitState,
}
