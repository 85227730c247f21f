use anyhow::anyhow;
use neovate_domain::{Action, AppState, ClientServices};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

use crate::engine::StoreHandle;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HydrationOutcome {
    /// A saved snapshot was installed.
    Restored,
    /// Nothing had been saved yet.
    Empty,
    /// Loading failed; the store starts empty.
    Recovered { message: String },
}

/// Loads the last snapshot into `state`. Runs before the engine exists, so
/// nothing can observe a half-hydrated store.
pub async fn hydrate(state: &mut AppState, services: Arc<dyn ClientServices>) -> HydrationOutcome {
    let loaded = tokio::task::spawn_blocking(move || services.load_app_state())
        .await
        .ok()
        .unwrap_or_else(|| Err("failed to join load task".to_owned()));

    match loaded {
        Ok(Some(persisted)) => {
            state.apply(Action::AppStateLoaded {
                persisted: Box::new(persisted),
            });
            tracing::info!(
                repos = state.repos().len(),
                workspaces = state.workspace_count(),
                sessions = state.session_count(),
                "app state restored"
            );
            HydrationOutcome::Restored
        }
        Ok(None) => {
            tracing::info!("no saved app state; starting empty");
            HydrationOutcome::Empty
        }
        Err(message) => {
            tracing::warn!(error = %message, "failed to load app state; starting empty");
            HydrationOutcome::Recovered { message }
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AutosaveConfig {
    /// Quiet period after a change before the latest snapshot is written.
    pub debounce: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(250),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AutosaveStats {
    pub saves: u64,
    pub failures: u64,
    pub last_saved_rev: Option<u64>,
}

enum AutosaveCommand {
    Flush {
        reply: oneshot::Sender<anyhow::Result<()>>,
    },
}

pub struct AutosaveHandle {
    tx: mpsc::UnboundedSender<AutosaveCommand>,
    stats: watch::Receiver<AutosaveStats>,
}

impl AutosaveHandle {
    /// Writes the latest snapshot now unless it is already on disk.
    pub async fn flush(&self) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(AutosaveCommand::Flush { reply: tx })
            .map_err(|_| anyhow!("autosave task stopped"))?;
        rx.await.map_err(|_| anyhow!("autosave task stopped"))?
    }

    pub fn stats(&self) -> AutosaveStats {
        *self.stats.borrow()
    }

    pub fn subscribe_stats(&self) -> watch::Receiver<AutosaveStats> {
        self.stats.clone()
    }
}

/// Starts the autosave task. Install it after hydration and the first render:
/// the revision current at this point counts as already persisted.
pub fn setup_persistence(
    store: &StoreHandle,
    services: Arc<dyn ClientServices>,
    config: AutosaveConfig,
) -> AutosaveHandle {
    let (tx, commands) = mpsc::unbounded_channel();
    let (stats_tx, stats) = watch::channel(AutosaveStats::default());

    let task = Autosave {
        store: store.clone(),
        changes: store.subscribe(),
        commands,
        services,
        debounce: config.debounce,
        saved_rev: store.rev(),
        stats: AutosaveStats::default(),
        stats_tx,
    };
    tokio::spawn(task.run());

    AutosaveHandle { tx, stats }
}

struct Autosave {
    store: StoreHandle,
    changes: watch::Receiver<u64>,
    commands: mpsc::UnboundedReceiver<AutosaveCommand>,
    services: Arc<dyn ClientServices>,
    debounce: Duration,
    saved_rev: u64,
    stats: AutosaveStats,
    stats_tx: watch::Sender<AutosaveStats>,
}

impl Autosave {
    // One save at a time: the channel is only polled again after the write
    // returns, and any mutation made meanwhile leaves it marked changed.
    async fn run(mut self) {
        loop {
            tokio::select! {
                changed = self.changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if !self.debounce_then_save().await {
                        break;
                    }
                }
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else {
                        break;
                    };
                    self.handle_command(cmd).await;
                }
            }
        }
        tracing::debug!("autosave stopped");
    }

    /// Returns false once the handle is gone.
    async fn debounce_then_save(&mut self) -> bool {
        let sleep = tokio::time::sleep(self.debounce);
        tokio::pin!(sleep);
        tokio::select! {
            _ = &mut sleep => {
                let _ = self.save_latest().await;
                true
            }
            cmd = self.commands.recv() => match cmd {
                Some(cmd) => {
                    self.handle_command(cmd).await;
                    true
                }
                None => {
                    let _ = self.save_latest().await;
                    false
                }
            },
        }
    }

    async fn handle_command(&mut self, cmd: AutosaveCommand) {
        match cmd {
            AutosaveCommand::Flush { reply } => {
                let _ = reply.send(self.save_latest().await);
            }
        }
    }

    async fn save_latest(&mut self) -> anyhow::Result<()> {
        self.changes.mark_unchanged();
        let (rev, snapshot) = self.store.persisted_snapshot().await?;
        if rev == self.saved_rev {
            return Ok(());
        }

        let services = self.services.clone();
        let saved = tokio::task::spawn_blocking(move || services.save_app_state(snapshot))
            .await
            .ok()
            .unwrap_or_else(|| Err("failed to join save task".to_owned()));

        let result = match saved {
            Ok(()) => {
                self.saved_rev = rev;
                self.stats.saves += 1;
                self.stats.last_saved_rev = Some(rev);
                tracing::debug!(rev, "app state saved");
                Ok(())
            }
            Err(message) => {
                self.stats.failures += 1;
                tracing::warn!(rev, error = %message, "failed to save app state");
                Err(anyhow!(message))
            }
        };
        self.stats_tx.send_replace(self.stats);
        result
    }
}
