use neovate_domain::{ClientServices, PersistedAppState, SessionId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory services with knobs for slow and failing saves.
#[derive(Default)]
pub(crate) struct MemoryServices {
    stored: Mutex<Option<PersistedAppState>>,
    saves: Mutex<Vec<PersistedAppState>>,
    load_error: Mutex<Option<String>>,
    fail_saves: AtomicBool,
    save_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryServices {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn with_stored(snapshot: PersistedAppState) -> Arc<Self> {
        let this = Self::default();
        *this.stored.lock().unwrap() = Some(snapshot);
        Arc::new(this)
    }

    pub(crate) fn failing_load(message: &str) -> Arc<Self> {
        let this = Self::default();
        *this.load_error.lock().unwrap() = Some(message.to_owned());
        Arc::new(this)
    }

    pub(crate) fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_save_delay(&self, delay: Duration) {
        *self.save_delay.lock().unwrap() = delay;
    }

    pub(crate) fn saves(&self) -> Vec<PersistedAppState> {
        self.saves.lock().unwrap().clone()
    }

    pub(crate) fn stored(&self) -> Option<PersistedAppState> {
        self.stored.lock().unwrap().clone()
    }

    pub(crate) fn max_concurrent_saves(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl ClientServices for MemoryServices {
    fn load_app_state(&self) -> Result<Option<PersistedAppState>, String> {
        if let Some(message) = self.load_error.lock().unwrap().clone() {
            return Err(message);
        }
        Ok(self.stored.lock().unwrap().clone())
    }

    fn save_app_state(&self, snapshot: PersistedAppState) -> Result<(), String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.save_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let result = if self.fail_saves.load(Ordering::SeqCst) {
            Err("disk full".to_owned())
        } else {
            self.saves.lock().unwrap().push(snapshot.clone());
            *self.stored.lock().unwrap() = Some(snapshot);
            Ok(())
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn assistant_reply(&self, _session_id: SessionId, content: String) -> Result<String, String> {
        Ok(format!("Echo: {content}"))
    }
}
