//! Client and server configuration.
//!
//! Both structs have working defaults and `with_*` builders. The client can
//! also pick up overrides from the environment:
//!
//! - `MUXRUN_SERVER_QUEUE`: queue the client sends requests to.
//! - `MUXRUN_CALL_TIMEOUT_MS`: per-call timeout in milliseconds (non-zero).
//! - `MUXRUN_CLIENT_NAME`: name embedded in the reply address.

use std::time::Duration;

pub const DEFAULT_SERVER_QUEUE: &str = "rpc.server";
pub const DEFAULT_REPLY_PREFIX: &str = "rpc.client.";
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

pub const ENV_SERVER_QUEUE: &str = "MUXRUN_SERVER_QUEUE";
pub const ENV_CALL_TIMEOUT_MS: &str = "MUXRUN_CALL_TIMEOUT_MS";
pub const ENV_CLIENT_NAME: &str = "MUXRUN_CLIENT_NAME";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Queue requests and close messages are sent to.
    pub server_queue: String,
    /// Reply addresses are `{reply_prefix}{name}.{random hex}`.
    pub reply_prefix: String,
    pub name: String,
    /// How long `Client::call` waits for a reply.
    pub call_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_queue: DEFAULT_SERVER_QUEUE.to_string(),
            reply_prefix: DEFAULT_REPLY_PREFIX.to_string(),
            name: "anonymous".to_string(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with whatever the process environment sets.
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`. Unparseable values are ignored with a warning.
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(queue) = lookup(ENV_SERVER_QUEUE).filter(|q| !q.is_empty()) {
            self.server_queue = queue;
        }
        if let Some(name) = lookup(ENV_CLIENT_NAME).filter(|n| !n.is_empty()) {
            self.name = name;
        }
        if let Some(raw) = lookup(ENV_CALL_TIMEOUT_MS) {
            match raw.parse::<u64>().ok().filter(|ms| *ms > 0) {
                Some(ms) => self.call_timeout = Duration::from_millis(ms),
                None => tracing::warn!(value = %raw, "ignoring invalid {}", ENV_CALL_TIMEOUT_MS),
            }
        }
        self
    }

    pub fn with_server_queue(mut self, queue: impl Into<String>) -> Self {
        self.server_queue = queue.into();
        self
    }

    pub fn with_reply_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.reply_prefix = prefix.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Builds a fresh reply address for one session.
    pub fn reply_address(&self) -> String {
        format!("{}{}.{:016x}", self.reply_prefix, self.name, rand::random::<u64>())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Queue the server consumes requests from.
    pub queue: String,
    /// Departures matching this pattern are treated as client disconnects.
    pub client_pattern: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            queue: DEFAULT_SERVER_QUEUE.to_string(),
            client_pattern: format!("{}*", DEFAULT_REPLY_PREFIX),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(queue) = lookup(ENV_SERVER_QUEUE).filter(|q| !q.is_empty()) {
            self.queue = queue;
        }
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_client_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.client_pattern = pattern.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let client = ClientConfig::default();
        let server = ServerConfig::default();
        assert_eq!(client.server_queue, server.queue);
        assert_eq!(client.call_timeout, Duration::from_secs(30));
        assert_eq!(server.client_pattern, "rpc.client.*");
    }

    #[test]
    fn test_overlay_applies_valid_values() {
        let config = ClientConfig::default().overlay(env(&[
            (ENV_SERVER_QUEUE, "rpc.bank"),
            (ENV_CALL_TIMEOUT_MS, "250"),
            (ENV_CLIENT_NAME, "alice"),
        ]));
        assert_eq!(config.server_queue, "rpc.bank");
        assert_eq!(config.call_timeout, Duration::from_millis(250));
        assert!(config.reply_address().starts_with("rpc.client.alice."));
    }

    #[test]
    fn test_overlay_ignores_garbage() {
        for raw in ["soon", "0", "-5", ""] {
            let config = ClientConfig::default().overlay(env(&[(ENV_CALL_TIMEOUT_MS, raw)]));
            assert_eq!(config.call_timeout, DEFAULT_CALL_TIMEOUT);
        }
    }

    #[test]
    fn test_reply_addresses_are_unique() {
        let config = ClientConfig::default().with_name("bob");
        assert_ne!(config.reply_address(), config.reply_address());
    }
}
