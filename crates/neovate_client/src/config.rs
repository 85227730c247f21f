use std::str::FromStr;
use std::time::Duration;

use crate::bootstrap::DisconnectPolicy;
use crate::connection::{ConnectionConfig, RetryPolicy};
use crate::persistence::AutosaveConfig;

pub const DEFAULT_BACKEND_URL: &str = "ws://127.0.0.1:8421/api/events";

#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    pub backend_url: String,
    pub autosave_debounce: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
    pub reconnect_on_drop: bool,
    pub disconnect_policy: DisconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_owned(),
            autosave_debounce: AutosaveConfig::default().debounce,
            connect_timeout: ConnectionConfig::default().handshake_timeout,
            retry: RetryPolicy::default(),
            reconnect_on_drop: true,
            disconnect_policy: DisconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut out = Self::default();
        let get = |key: &str| var(&lookup, key);
        let millis = |key: &str| parse_var::<u64>(key, get(key)).map(Duration::from_millis);

        if let Some(url) = get("NEOVATE_BACKEND_URL") {
            if url.starts_with("ws://") || url.starts_with("wss://") {
                out.backend_url = url;
            } else {
                tracing::warn!(value = %url, "NEOVATE_BACKEND_URL is not a ws:// url; using default");
            }
        }

        if let Some(debounce) = millis("NEOVATE_AUTOSAVE_DEBOUNCE_MS") {
            out.autosave_debounce = debounce;
        }
        if let Some(timeout) = millis("NEOVATE_CONNECT_TIMEOUT_MS")
            .filter(|d| positive("NEOVATE_CONNECT_TIMEOUT_MS", d.as_millis() as u64))
        {
            out.connect_timeout = timeout;
        }
        if let Some(n) = parse_var::<u32>(
            "NEOVATE_RECONNECT_MAX_ATTEMPTS",
            get("NEOVATE_RECONNECT_MAX_ATTEMPTS"),
        )
        .filter(|n| positive("NEOVATE_RECONNECT_MAX_ATTEMPTS", u64::from(*n)))
        {
            out.retry.max_attempts = n;
        }
        if let Some(base) = millis("NEOVATE_RECONNECT_BASE_DELAY_MS") {
            out.retry.base_delay = base;
        }
        if let Some(max) = millis("NEOVATE_RECONNECT_MAX_DELAY_MS") {
            out.retry.max_delay = max;
        }
        if out.retry.max_delay < out.retry.base_delay {
            tracing::warn!(
                base_ms = out.retry.base_delay.as_millis() as u64,
                max_ms = out.retry.max_delay.as_millis() as u64,
                "reconnect max delay below base delay; raising it"
            );
            out.retry.max_delay = out.retry.base_delay;
        }

        if let Some(raw) = get("NEOVATE_RECONNECT_ON_DROP") {
            match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => out.reconnect_on_drop = true,
                "0" | "false" | "no" | "off" => out.reconnect_on_drop = false,
                _ => tracing::warn!(value = %raw, "invalid NEOVATE_RECONNECT_ON_DROP; using default"),
            }
        }

        if let Some(raw) = get("NEOVATE_DISCONNECT_POLICY") {
            match DisconnectPolicy::parse(&raw) {
                Some(policy) => out.disconnect_policy = policy,
                None => {
                    tracing::warn!(value = %raw, "invalid NEOVATE_DISCONNECT_POLICY; using default")
                }
            }
        }

        out
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            handshake_timeout: self.connect_timeout,
            retry: self.retry,
            reconnect_on_drop: self.reconnect_on_drop,
        }
    }

    pub fn autosave(&self) -> AutosaveConfig {
        AutosaveConfig {
            debounce: self.autosave_debounce,
        }
    }
}

fn var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(key: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "invalid value; using default");
            None
        }
    }
}

fn positive(key: &str, value: u64) -> bool {
    if value == 0 {
        tracing::warn!(key, "value must be positive; using default");
    }
    value > 0
}
