use anyhow::Context as _;
use neovate_domain::{ClientServices, PersistedAppState, SessionId, paths};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::env::resolve_neovate_root;
use crate::sqlite_store::SqliteStore;

/// Local services for the desktop client: SQLite snapshots, an echo chat
/// backend and a command runner that accepts everything and does nothing.
pub struct DesktopServices {
    root: PathBuf,
    sqlite: SqliteStore,
}

impl DesktopServices {
    pub fn new() -> anyhow::Result<Arc<Self>> {
        let root = resolve_neovate_root()?;
        Self::with_root(root)
    }

    pub fn with_root(root: PathBuf) -> anyhow::Result<Arc<Self>> {
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create {}", root.display()))?;

        let sqlite =
            SqliteStore::new(paths::sqlite_path(&root)).context("failed to init sqlite store")?;

        Ok(Arc::new(Self { root, sqlite }))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

pub(crate) fn echo_reply(content: &str) -> String {
    format!("Echo: {}", content.trim())
}

impl ClientServices for DesktopServices {
    fn load_app_state(&self) -> Result<Option<PersistedAppState>, String> {
        self.sqlite.load_app_state().map_err(|e| format!("{e:#}"))
    }

    fn save_app_state(&self, snapshot: PersistedAppState) -> Result<(), String> {
        self.sqlite
            .save_app_state(snapshot)
            .map_err(|e| format!("{e:#}"))
    }

    fn assistant_reply(&self, _session_id: SessionId, content: String) -> Result<String, String> {
        Ok(echo_reply(&content))
    }

    fn run_command(&self, _session_id: SessionId, _command: String) -> Result<(), String> {
        Ok(())
    }
}
