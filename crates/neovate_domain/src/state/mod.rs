mod app;
mod ids;
mod persisted;
mod repo;
mod selection;
mod session;

pub use app::AppState;
pub use ids::{SessionId, WorkspaceId};
pub use persisted::{
    PersistedAppState, PersistedMessage, PersistedPendingChange, PersistedRepo, PersistedSession,
    PersistedWorkspace,
};
pub use repo::{GitState, PendingChange, PendingChangeKind, Repo, Workspace};
pub use selection::Selection;
pub use session::{Message, MessageRole, Session};
