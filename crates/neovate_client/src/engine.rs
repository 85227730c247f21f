use anyhow::Context as _;
use neovate_api::AppSnapshot;
use neovate_domain::{
    Action, AppState, ClientServices, Effect, Message, PendingChange, PendingChangeKind,
    PersistedAppState, SessionId, WorkspaceId,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// Cloneable access to the store. The engine task is the only owner of
/// `AppState`; every read and mutation goes through its command queue.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<EngineCommand>,
    changes: watch::Receiver<u64>,
}

impl StoreHandle {
    pub async fn app_snapshot(&self) -> anyhow::Result<AppSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::GetAppSnapshot { reply: tx })
            .await
            .context("engine unavailable")?;
        rx.await.context("engine stopped")
    }

    /// The latest persisted form of the store together with its revision.
    pub async fn persisted_snapshot(&self) -> anyhow::Result<(u64, PersistedAppState)> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::GetPersistedSnapshot { reply: tx })
            .await
            .context("engine unavailable")?;
        rx.await.context("engine stopped")
    }

    /// Revision of the last persisted mutation. Starts at 0 after hydration.
    pub fn rev(&self) -> u64 {
        *self.changes.borrow()
    }

    /// A receiver that is marked changed on every persisted mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        let mut rx = self.changes.clone();
        rx.mark_unchanged();
        rx
    }

    /// Applies `action` and returns the revision right after it.
    pub async fn dispatch(&self, action: Action) -> anyhow::Result<u64> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::Dispatch {
                action,
                reply: Some(tx),
            })
            .await
            .context("engine unavailable")?;
        rx.await.context("engine stopped")
    }

    pub async fn add_repo(
        &self,
        path: impl Into<PathBuf>,
        name: impl Into<String>,
    ) -> anyhow::Result<u64> {
        self.dispatch(Action::AddRepo {
            path: path.into(),
            name: name.into(),
        })
        .await
    }

    pub async fn delete_repo(&self, path: impl Into<PathBuf>) -> anyhow::Result<u64> {
        self.dispatch(Action::DeleteRepo { path: path.into() }).await
    }

    pub async fn create_workspace(
        &self,
        repo_path: impl Into<PathBuf>,
        branch: impl Into<String>,
    ) -> anyhow::Result<u64> {
        self.dispatch(Action::CreateWorkspace {
            repo_path: repo_path.into(),
            branch: branch.into(),
        })
        .await
    }

    pub async fn delete_workspace(&self, workspace_id: WorkspaceId) -> anyhow::Result<u64> {
        self.dispatch(Action::DeleteWorkspace { workspace_id }).await
    }

    pub async fn refresh_git_state(
        &self,
        workspace_id: WorkspaceId,
        pending_changes: Vec<PendingChange>,
    ) -> anyhow::Result<u64> {
        self.dispatch(Action::WorkspaceGitStateRefreshed {
            workspace_id,
            pending_changes,
        })
        .await
    }

    pub async fn create_session(&self, workspace_id: WorkspaceId) -> anyhow::Result<u64> {
        self.dispatch(Action::CreateSession { workspace_id }).await
    }

    pub async fn select_repo(&self, path: Option<PathBuf>) -> anyhow::Result<u64> {
        self.dispatch(Action::SelectRepo { path }).await
    }

    pub async fn select_workspace(
        &self,
        workspace_id: Option<WorkspaceId>,
    ) -> anyhow::Result<u64> {
        self.dispatch(Action::SelectWorkspace { workspace_id }).await
    }

    pub async fn select_session(&self, session_id: Option<SessionId>) -> anyhow::Result<u64> {
        self.dispatch(Action::SelectSession { session_id }).await
    }

    pub async fn add_message(
        &self,
        session_id: SessionId,
        message: Message,
    ) -> anyhow::Result<u64> {
        self.dispatch(Action::AddMessage {
            session_id,
            message,
        })
        .await
    }

    /// Appends the user message right away; the assistant reply lands later
    /// as its own mutation.
    pub async fn send_message(
        &self,
        session_id: SessionId,
        content: impl Into<String>,
    ) -> anyhow::Result<u64> {
        self.dispatch(Action::SendMessage {
            session_id,
            content: content.into(),
        })
        .await
    }

    pub async fn run_command(
        &self,
        session_id: SessionId,
        command: impl Into<String>,
    ) -> anyhow::Result<u64> {
        self.dispatch(Action::RunCommand {
            session_id,
            command: command.into(),
        })
        .await
    }
}

enum EngineCommand {
    GetAppSnapshot {
        reply: oneshot::Sender<AppSnapshot>,
    },
    GetPersistedSnapshot {
        reply: oneshot::Sender<(u64, PersistedAppState)>,
    },
    Dispatch {
        action: Action,
        reply: Option<oneshot::Sender<u64>>,
    },
}

pub struct Engine {
    state: AppState,
    rev: u64,
    services: Arc<dyn ClientServices>,
    changes: watch::Sender<u64>,
    tx: mpsc::WeakSender<EngineCommand>,
}

impl Engine {
    /// Takes ownership of an already hydrated state. The task stops once the
    /// last `StoreHandle` is dropped.
    pub fn start(state: AppState, services: Arc<dyn ClientServices>) -> StoreHandle {
        let (tx, mut rx) = mpsc::channel::<EngineCommand>(256);
        let (changes, changes_rx) = watch::channel(0u64);

        let mut engine = Self {
            state,
            rev: 0,
            services,
            changes,
            tx: tx.downgrade(),
        };

        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                engine.handle(cmd);
            }
            tracing::debug!("engine stopped");
        });

        StoreHandle {
            tx,
            changes: changes_rx,
        }
    }

    fn handle(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::GetAppSnapshot { reply } => {
                let _ = reply.send(app_snapshot(&self.state, self.rev));
            }
            EngineCommand::GetPersistedSnapshot { reply } => {
                let _ = reply.send((self.rev, self.state.to_persisted()));
            }
            EngineCommand::Dispatch { action, reply } => {
                self.process_action(action);
                if let Some(reply) = reply {
                    let _ = reply.send(self.rev);
                }
            }
        }
    }

    fn process_action(&mut self, action: Action) {
        let effects = self.state.apply(action);

        // The revision moves in the same step as the mutation it describes.
        if effects.contains(&Effect::SaveAppState) {
            self.rev = self.rev.saturating_add(1);
            self.changes.send_replace(self.rev);
        }

        for effect in effects {
            match effect {
                Effect::SaveAppState => {}
                Effect::RequestAssistantReply {
                    session_id,
                    content,
                } => self.spawn_assistant_reply(session_id, content),
                Effect::RunCommand {
                    session_id,
                    command,
                } => self.spawn_command(session_id, command),
            }
        }
    }

    fn spawn_assistant_reply(&self, session_id: SessionId, content: String) {
        let services = self.services.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let reply =
                tokio::task::spawn_blocking(move || services.assistant_reply(session_id, content))
                    .await
                    .ok()
                    .unwrap_or_else(|| Err("failed to join assistant reply task".to_owned()));
            match reply {
                Ok(content) => {
                    let Some(tx) = tx.upgrade() else {
                        return;
                    };
                    let _ = tx
                        .send(EngineCommand::Dispatch {
                            action: Action::AssistantReplied {
                                session_id,
                                content,
                            },
                            reply: None,
                        })
                        .await;
                }
                Err(err) => {
                    tracing::error!(
                        session_id = session_id.as_u64(),
                        error = %err,
                        "assistant reply failed"
                    );
                }
            }
        });
    }

    fn spawn_command(&self, session_id: SessionId, command: String) {
        let services = self.services.clone();
        tokio::spawn(async move {
            let result =
                tokio::task::spawn_blocking(move || services.run_command(session_id, command))
                    .await
                    .ok()
                    .unwrap_or_else(|| Err("failed to join command task".to_owned()));
            if let Err(err) = result {
                tracing::error!(
                    session_id = session_id.as_u64(),
                    error = %err,
                    "command failed"
                );
            }
        });
    }
}

fn app_snapshot(state: &AppState, rev: u64) -> AppSnapshot {
    let selection = state.selection();
    AppSnapshot {
        rev,
        repos: state
            .repos()
            .iter()
            .map(|repo| neovate_api::RepoSnapshot {
                path: repo.path.to_string_lossy().into_owned(),
                name: repo.name.clone(),
                workspaces: state
                    .workspaces_of(&repo.path)
                    .map(|workspace| neovate_api::WorkspaceSnapshot {
                        id: neovate_api::WorkspaceId(workspace.id.as_u64()),
                        branch: workspace.branch.clone(),
                        pending_changes: workspace
                            .git_state
                            .pending_changes
                            .iter()
                            .map(|change| neovate_api::PendingChangeSnapshot {
                                path: change.path.clone(),
                                kind: map_pending_change_kind(change.kind),
                            })
                            .collect(),
                        sessions: state
                            .sessions_of(workspace.id)
                            .map(|session| neovate_api::SessionSnapshot {
                                id: neovate_api::SessionId(session.id.as_u64()),
                                messages: session
                                    .messages()
                                    .iter()
                                    .map(|message| neovate_api::MessageSnapshot {
                                        role: match message.role {
                                            neovate_domain::MessageRole::User => {
                                                neovate_api::MessageRole::User
                                            }
                                            neovate_domain::MessageRole::Assistant => {
                                                neovate_api::MessageRole::Assistant
                                            }
                                        },
                                        content: message.content.clone(),
                                        timestamp_unix_ms: message.timestamp_unix_ms,
                                    })
                                    .collect(),
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect(),
        selection: neovate_api::SelectionSnapshot {
            repo_path: selection
                .repo_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            workspace_id: selection
                .workspace_id
                .map(|id| neovate_api::WorkspaceId(id.as_u64())),
            session_id: selection
                .session_id
                .map(|id| neovate_api::SessionId(id.as_u64())),
        },
    }
}

fn map_pending_change_kind(kind: PendingChangeKind) -> neovate_api::PendingChangeKind {
    match kind {
        PendingChangeKind::Added => neovate_api::PendingChangeKind::Added,
        PendingChangeKind::Modified => neovate_api::PendingChangeKind::Modified,
        PendingChangeKind::Deleted => neovate_api::PendingChangeKind::Deleted,
        PendingChangeKind::Renamed => neovate_api::PendingChangeKind::Renamed,
        PendingChangeKind::Untracked => neovate_api::PendingChangeKind::Untracked,
    }
}
