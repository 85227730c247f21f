use neovate_api::ConnectionState;
use rand::Rng as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::machine::{ConnectionCommand, ConnectionEvent, ConnectionMachine, RetryPolicy};
use super::transport::{Link, Transport};
use super::{ConnectionConfig, Transition};

pub(super) enum DriverInput {
    Connect {
        waiter: Option<oneshot::Sender<ConnectionState>>,
    },
    Disconnect,
    AttemptFinished {
        attempt: u32,
        outcome: AttemptOutcome,
    },
    LinkClosed {
        link_id: u64,
    },
    RetryElapsed {
        generation: u64,
    },
}

pub(super) enum AttemptOutcome {
    Opened(Link),
    Failed(String),
    TimedOut,
}

pub(super) struct Driver {
    machine: ConnectionMachine,
    policy: RetryPolicy,
    transport: Arc<dyn Transport>,
    handshake_timeout: Duration,
    reconnect_on_drop: bool,
    inputs: mpsc::WeakUnboundedSender<DriverInput>,
    state_tx: watch::Sender<ConnectionState>,
    transitions: broadcast::Sender<Transition>,
    waiters: Vec<oneshot::Sender<ConnectionState>>,
    link: Option<(u64, oneshot::Sender<()>)>,
    next_link_id: u64,
}

impl Driver {
    pub(super) fn new(
        transport: Arc<dyn Transport>,
        config: &ConnectionConfig,
        inputs: mpsc::WeakUnboundedSender<DriverInput>,
        state_tx: watch::Sender<ConnectionState>,
        transitions: broadcast::Sender<Transition>,
    ) -> Self {
        Self {
            machine: ConnectionMachine::new(config.retry),
            policy: config.retry,
            transport,
            handshake_timeout: config.handshake_timeout,
            reconnect_on_drop: config.reconnect_on_drop,
            inputs,
            state_tx,
            transitions,
            waiters: Vec::new(),
            link: None,
            next_link_id: 1,
        }
    }

    pub(super) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<DriverInput>) {
        while let Some(input) = rx.recv().await {
            self.handle_input(input);
        }
        if let Some((_, shutdown)) = self.link.take() {
            let _ = shutdown.send(());
        }
        tracing::debug!("connection driver stopped");
    }

    fn handle_input(&mut self, input: DriverInput) {
        match input {
            DriverInput::Connect { waiter } => {
                self.apply(ConnectionEvent::ConnectRequested);
                if let Some(waiter) = waiter {
                    if self.machine.state() == ConnectionState::Connected {
                        let _ = waiter.send(ConnectionState::Connected);
                    } else {
                        self.waiters.push(waiter);
                    }
                }
            }
            DriverInput::Disconnect => self.apply(ConnectionEvent::LocalTeardown),
            DriverInput::AttemptFinished { attempt, outcome } => match outcome {
                AttemptOutcome::Opened(link) => {
                    if self.machine.state() != ConnectionState::Connecting {
                        link.close();
                        return;
                    }
                    self.install_link(link);
                    tracing::info!(attempt, "connected");
                    self.apply(ConnectionEvent::HandshakeSucceeded);
                }
                AttemptOutcome::Failed(reason) => {
                    tracing::warn!(attempt, error = %reason, "connect attempt failed");
                    self.apply(ConnectionEvent::HandshakeFailed { reason });
                }
                AttemptOutcome::TimedOut => {
                    tracing::warn!(
                        attempt,
                        timeout_ms = self.handshake_timeout.as_millis() as u64,
                        "connect attempt timed out"
                    );
                    self.apply(ConnectionEvent::HandshakeTimedOut);
                }
            },
            DriverInput::LinkClosed { link_id } => {
                if !matches!(self.link, Some((current, _)) if current == link_id) {
                    return;
                }
                self.link = None;
                tracing::info!("connection closed by remote");
                self.apply(ConnectionEvent::RemoteClosed);
                if self.reconnect_on_drop && self.machine.state() == ConnectionState::Disconnected {
                    self.apply(ConnectionEvent::ConnectRequested);
                }
            }
            DriverInput::RetryElapsed { generation } => {
                self.apply(ConnectionEvent::RetryElapsed { generation });
            }
        }
    }

    fn apply(&mut self, event: ConnectionEvent) {
        let from = self.machine.state();
        let commands = self.machine.handle(event);
        let to = self.machine.state();

        if from != to {
            tracing::info!(%from, %to, "connection state changed");
            self.state_tx.send_replace(to);
            let _ = self.transitions.send(Transition { from, to });
            if to != ConnectionState::Connecting {
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(to);
                }
            }
        }

        for command in commands {
            self.run_command(command);
        }
    }

    fn run_command(&mut self, command: ConnectionCommand) {
        match command {
            ConnectionCommand::StartAttempt { attempt } => self.start_attempt(attempt),
            ConnectionCommand::ScheduleRetry { delay, generation } => {
                let delay = delay + jitter(self.policy.max_jitter);
                tracing::info!(
                    delay_ms = delay.as_millis() as u64,
                    attempt = self.machine.attempt(),
                    max_attempts = self.policy.max_attempts,
                    "retrying connection"
                );
                let inputs = self.inputs.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(inputs) = inputs.upgrade() {
                        let _ = inputs.send(DriverInput::RetryElapsed { generation });
                    }
                });
            }
            ConnectionCommand::CloseLink => {
                if let Some((_, shutdown)) = self.link.take() {
                    let _ = shutdown.send(());
                }
            }
        }
    }

    fn start_attempt(&self, attempt: u32) {
        tracing::info!(attempt, "connecting");
        let open = self.transport.open();
        let timeout = self.handshake_timeout;
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, open).await {
                Ok(Ok(link)) => AttemptOutcome::Opened(link),
                Ok(Err(err)) => AttemptOutcome::Failed(format!("{err:#}")),
                Err(_) => AttemptOutcome::TimedOut,
            };
            match inputs.upgrade() {
                Some(inputs) => {
                    let _ = inputs.send(DriverInput::AttemptFinished { attempt, outcome });
                }
                None => {
                    if let AttemptOutcome::Opened(link) = outcome {
                        link.close();
                    }
                }
            }
        });
    }

    fn install_link(&mut self, link: Link) {
        let link_id = self.next_link_id;
        self.next_link_id += 1;

        let (closed, shutdown) = link.into_parts();
        self.link = Some((link_id, shutdown));

        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            let _ = closed.await;
            if let Some(inputs) = inputs.upgrade() {
                let _ = inputs.send(DriverInput::LinkClosed { link_id });
            }
        });
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}
