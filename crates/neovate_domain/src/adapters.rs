use crate::{PersistedAppState, SessionId};

/// Everything the client core needs from the outside world. Calls are
/// blocking; async callers are expected to move them onto a blocking pool.
pub trait ClientServices: Send + Sync {
    /// Returns `Ok(None)` when nothing has been saved yet.
    fn load_app_state(&self) -> Result<Option<PersistedAppState>, String>;

    fn save_app_state(&self, snapshot: PersistedAppState) -> Result<(), String>;

    fn assistant_reply(&self, session_id: SessionId, content: String) -> Result<String, String>;

    fn run_command(&self, _session_id: SessionId, _command: String) -> Result<(), String> {
        Ok(())
    }
}
