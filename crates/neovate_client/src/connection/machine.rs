use neovate_api::ConnectionState;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per connect round, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Upper bound of the random delay added on top of the backoff.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_factor: 2.0,
            max_jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0 for the first retry), without
    /// jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay.as_millis() as f64;
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let delay =
            (base * self.backoff_factor.powi(exponent)).min(self.max_delay.as_millis() as f64);
        if delay.is_finite() && delay > 0.0 {
            Duration::from_millis(delay as u64)
        } else {
            Duration::ZERO
        }
    }

    fn attempts_per_round(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConnectionEvent {
    ConnectRequested,
    HandshakeSucceeded,
    HandshakeFailed { reason: String },
    HandshakeTimedOut,
    RemoteClosed,
    LocalTeardown,
    RetryElapsed { generation: u64 },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConnectionCommand {
    StartAttempt { attempt: u32 },
    ScheduleRetry { delay: Duration, generation: u64 },
    CloseLink,
}

/// Synchronous connection lifecycle. Feeding it events never performs I/O;
/// the returned commands tell the caller what to do next.
#[derive(Clone, Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    policy: RetryPolicy,
    attempt: u32,
    generation: u64,
    retry_pending: bool,
}

impl ConnectionMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            attempt: 0,
            generation: 0,
            retry_pending: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Attempt number within the current round; 0 when idle or connected.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    pub fn handle(&mut self, event: ConnectionEvent) -> Vec<ConnectionCommand> {
        use ConnectionState::*;

        match (self.state, event) {
            (Disconnected, ConnectionEvent::ConnectRequested) => self.start_round(),
            (Connecting | Connected, ConnectionEvent::ConnectRequested) => Vec::new(),
            (Error, ConnectionEvent::ConnectRequested) => {
                if self.retry_pending {
                    Vec::new()
                } else {
                    self.start_round()
                }
            }

            (Connecting, ConnectionEvent::HandshakeSucceeded) => {
                self.state = Connected;
                self.attempt = 0;
                Vec::new()
            }
            (Connecting, ConnectionEvent::HandshakeFailed { .. })
            | (Connecting, ConnectionEvent::HandshakeTimedOut) => {
                self.state = Error;
                if self.attempt >= self.policy.attempts_per_round() {
                    self.retry_pending = false;
                    return Vec::new();
                }
                self.generation += 1;
                self.retry_pending = true;
                vec![ConnectionCommand::ScheduleRetry {
                    delay: self.policy.delay_for(self.attempt.saturating_sub(1)),
                    generation: self.generation,
                }]
            }

            (Error, ConnectionEvent::RetryElapsed { generation }) => {
                if !self.retry_pending || generation != self.generation {
                    return Vec::new();
                }
                self.retry_pending = false;
                self.state = Connecting;
                self.attempt += 1;
                vec![ConnectionCommand::StartAttempt {
                    attempt: self.attempt,
                }]
            }

            (Connected, ConnectionEvent::RemoteClosed) => {
                self.state = Disconnected;
                Vec::new()
            }
            (Connected, ConnectionEvent::LocalTeardown) => {
                self.state = Disconnected;
                vec![ConnectionCommand::CloseLink]
            }
            (Error, ConnectionEvent::LocalTeardown) => {
                self.state = Disconnected;
                self.attempt = 0;
                self.retry_pending = false;
                self.generation += 1;
                Vec::new()
            }

            // A connect attempt always ends in Connected or Error, so
            // teardown while Connecting is dropped.
            _ => Vec::new(),
        }
    }

    fn start_round(&mut self) -> Vec<ConnectionCommand> {
        self.state = ConnectionState::Connecting;
        self.attempt = 1;
        self.retry_pending = false;
        self.generation += 1;
        vec![ConnectionCommand::StartAttempt { attempt: 1 }]
    }
}
