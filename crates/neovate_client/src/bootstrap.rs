use neovate_api::{AppSnapshot, ConnectionState};
use neovate_domain::{AppState, ClientServices};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, watch};

use crate::config::ClientConfig;
use crate::connection::{ConnectionHandle, Transport};
use crate::engine::{Engine, StoreHandle};
use crate::persistence::{AutosaveHandle, HydrationOutcome, hydrate, setup_persistence};

/// The rendering side. `mount` runs once with the first snapshot, after
/// hydration and before any connection attempt.
pub trait UiShell {
    fn mount(&mut self, snapshot: &AppSnapshot);
}

/// What a lost connection does to the UI once it has been connected before.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DisconnectPolicy {
    /// Keep showing the last known state.
    #[default]
    KeepStale,
    /// Keep the state and show a notice.
    Notify,
    /// Go back to the waiting screen.
    BlockUi,
}

impl DisconnectPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "keep_stale" => Some(Self::KeepStale),
            "notify" => Some(Self::Notify),
            "block_ui" => Some(Self::BlockUi),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::KeepStale => "keep_stale",
            Self::Notify => "notify",
            Self::BlockUi => "block_ui",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UiSurface {
    Waiting,
    Ready { notice: Option<String> },
}

/// Maps connection states to what the UI may show.
#[derive(Clone, Debug)]
pub struct UiGate {
    policy: DisconnectPolicy,
    connected_once: bool,
}

impl UiGate {
    pub fn new(policy: DisconnectPolicy) -> Self {
        Self {
            policy,
            connected_once: false,
        }
    }

    pub fn surface(&mut self, state: ConnectionState) -> UiSurface {
        if state == ConnectionState::Connected {
            self.connected_once = true;
            return UiSurface::Ready { notice: None };
        }
        if !self.connected_once {
            return UiSurface::Waiting;
        }
        match self.policy {
            DisconnectPolicy::KeepStale => UiSurface::Ready { notice: None },
            DisconnectPolicy::Notify => UiSurface::Ready {
                notice: Some(format!("Connection lost ({state}). Showing last known state.")),
            },
            DisconnectPolicy::BlockUi => UiSurface::Waiting,
        }
    }

    /// Follows every transition so a short-lived `Connected` is never missed.
    pub fn spawn(mut self, connection: &ConnectionHandle) -> watch::Receiver<UiSurface> {
        let mut transitions = connection.transitions();
        let states = connection.subscribe();
        let (tx, rx) = watch::channel(self.surface(connection.state()));

        tokio::spawn(async move {
            loop {
                let state = match transitions.recv().await {
                    Ok(transition) => transition.to,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "ui gate lagged behind connection");
                        *states.borrow()
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                tx.send_replace(self.surface(state));
            }
        });

        rx
    }
}

/// The effect a mounted UI runs to start the connection. Re-running it, for
/// example on every re-render, connects only once.
#[derive(Clone)]
pub struct ConnectOnMount {
    connection: ConnectionHandle,
    fired: Arc<AtomicBool>,
}

impl ConnectOnMount {
    pub fn new(connection: ConnectionHandle) -> Self {
        Self {
            connection,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns whether this call requested the connection.
    pub fn run(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        tracing::info!("requesting backend connection");
        self.connection.request_connect();
        true
    }
}

pub struct Client {
    pub store: StoreHandle,
    pub connection: ConnectionHandle,
    pub autosave: AutosaveHandle,
    pub surface: watch::Receiver<UiSurface>,
    pub mount: ConnectOnMount,
    pub hydration: HydrationOutcome,
}

impl Client {
    /// hydrate, then start the engine and mount, then connect, then autosave.
    /// Each step waits for the one before it.
    pub async fn start(
        services: Arc<dyn ClientServices>,
        transport: Arc<dyn Transport>,
        shell: &mut dyn UiShell,
        config: &ClientConfig,
    ) -> anyhow::Result<Self> {
        let mut state = AppState::new();
        let hydration = hydrate(&mut state, services.clone()).await;
        tracing::info!(outcome = ?hydration, "hydration finished");

        let store = Engine::start(state, services.clone());
        let connection = ConnectionHandle::spawn(transport, config.connection());
        let surface = UiGate::new(config.disconnect_policy).spawn(&connection);

        let first = store.app_snapshot().await?;
        shell.mount(&first);
        tracing::info!(rev = first.rev, repos = first.repos.len(), "ui mounted");

        let mount = ConnectOnMount::new(connection.clone());
        mount.run();

        let autosave = setup_persistence(&store, services, config.autosave());
        tracing::info!("autosave installed");

        Ok(Self {
            store,
            connection,
            autosave,
            surface,
            mount,
            hydration,
        })
    }

    /// Writes any unsaved change and drops the connection.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let flushed = self.autosave.flush().await;
        self.connection.disconnect();
        flushed
    }
}
