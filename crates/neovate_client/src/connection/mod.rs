mod driver;
mod machine;
mod transport;
mod ws;

pub use machine::{ConnectionCommand, ConnectionEvent, ConnectionMachine, RetryPolicy};
pub use neovate_api::ConnectionState;
pub use transport::{Link, LinkPeer, Transport};
pub use ws::WsTransport;

use driver::{Driver, DriverInput};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConnectionConfig {
    pub handshake_timeout: Duration,
    pub retry: RetryPolicy,
    /// Start a new connect round when an established link drops.
    pub reconnect_on_drop: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_millis(10_000),
            retry: RetryPolicy::default(),
            reconnect_on_drop: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Shared handle to the connection driver task. All clones drive the same
/// connection; the task stops when the last one is dropped.
#[derive(Clone)]
pub struct ConnectionHandle {
    inputs: mpsc::UnboundedSender<DriverInput>,
    state: watch::Receiver<ConnectionState>,
    transitions: broadcast::Sender<Transition>,
}

impl ConnectionHandle {
    pub fn spawn(transport: Arc<dyn Transport>, config: ConnectionConfig) -> Self {
        let (inputs, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let (transitions, _) = broadcast::channel(64);

        let driver = Driver::new(
            transport,
            &config,
            inputs.downgrade(),
            state_tx,
            transitions.clone(),
        );
        tokio::spawn(driver.run(rx));

        Self {
            inputs,
            state,
            transitions,
        }
    }

    /// Starts connecting unless an attempt is already under way or a retry is
    /// pending, then resolves at the next `Connected` or `Error`. Resolves at
    /// once when already connected.
    pub async fn connect(&self) -> ConnectionState {
        let (tx, rx) = oneshot::channel();
        if self
            .inputs
            .send(DriverInput::Connect { waiter: Some(tx) })
            .is_err()
        {
            return self.state();
        }
        match rx.await {
            Ok(state) => state,
            Err(_) => self.state(),
        }
    }

    /// Fire-and-forget variant of [`connect`](Self::connect).
    pub fn request_connect(&self) {
        let _ = self.inputs.send(DriverInput::Connect { waiter: None });
    }

    /// Closes an established link or cancels a pending retry. Ignored while
    /// an attempt is in flight.
    pub fn disconnect(&self) {
        let _ = self.inputs.send(DriverInput::Disconnect);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn transitions(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }
}
