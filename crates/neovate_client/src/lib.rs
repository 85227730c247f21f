pub mod bootstrap;
pub mod config;
pub mod connection;
pub mod engine;
pub mod persistence;

#[cfg(test)]
mod test_support;

pub use bootstrap::{Client, ConnectOnMount, DisconnectPolicy, UiGate, UiShell, UiSurface};
pub use config::ClientConfig;
pub use connection::{ConnectionConfig, ConnectionHandle, ConnectionState, Transport, WsTransport};
pub use engine::{Engine, StoreHandle};
pub use persistence::{AutosaveConfig, AutosaveHandle, AutosaveStats, HydrationOutcome};
