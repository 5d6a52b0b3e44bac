//! Engine configuration.
//!
//! Defaults target Solana devnet. [`EngineConfig::from_env`] overlays a few
//! environment variables on top of the defaults.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::Commitment;

/// Public devnet RPC endpoint.
pub const DEVNET_RPC_URL: &str = "https://api.devnet.solana.com";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// JSON-RPC endpoint of the ledger.
    pub rpc_url: String,
    /// Commitment level transactions are confirmed at.
    pub commitment: Commitment,
    /// Seconds between balance refreshes while connected.
    pub poll_interval_secs: u64,
    /// Upper bound on waiting for a confirmation.
    pub confirm_timeout_secs: u64,
    /// Delay between signature status queries while confirming.
    pub confirm_poll_interval_ms: u64,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEVNET_RPC_URL.to_string(),
            commitment: Commitment::Confirmed,
            poll_interval_secs: 5,
            confirm_timeout_secs: 60,
            confirm_poll_interval_ms: 500,
            request_timeout_secs: 30,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `TOKEN_MANAGER_RPC_URL`,
    /// `TOKEN_MANAGER_POLL_INTERVAL_SECS` and `TOKEN_MANAGER_COMMITMENT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup("TOKEN_MANAGER_RPC_URL") {
            config.rpc_url = url;
        }
        if let Some(secs) = lookup("TOKEN_MANAGER_POLL_INTERVAL_SECS") {
            config.poll_interval_secs = secs.trim().parse().map_err(|e| ConfigError::InvalidValue {
                name: "TOKEN_MANAGER_POLL_INTERVAL_SECS",
                reason: format!("{e}"),
            })?;
        }
        if let Some(level) = lookup("TOKEN_MANAGER_COMMITMENT") {
            config.commitment = level
                .parse()
                .map_err(|reason| ConfigError::InvalidValue {
                    name: "TOKEN_MANAGER_COMMITMENT",
                    reason,
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.rpc_url.starts_with("http://") || self.rpc_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                name: "rpc_url",
                reason: format!("expected an http(s) url, got `{}`", self.rpc_url),
            });
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "poll_interval_secs",
                reason: "must be at least 1".into(),
            });
        }
        if self.confirm_poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                name: "confirm_poll_interval_ms",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn confirm_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_target_devnet() {
        let config = EngineConfig::default();
        assert_eq!(config.rpc_url, DEVNET_RPC_URL);
        assert_eq!(config.commitment, Commitment::Confirmed);
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        config.validate().unwrap();
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("TOKEN_MANAGER_RPC_URL", "http://127.0.0.1:8899"),
            ("TOKEN_MANAGER_POLL_INTERVAL_SECS", "2"),
            ("TOKEN_MANAGER_COMMITMENT", "finalized"),
        ]))
        .unwrap();

        assert_eq!(config.rpc_url, "http://127.0.0.1:8899");
        assert_eq!(config.poll_interval_secs, 2);
        assert_eq!(config.commitment, Commitment::Finalized);
    }

    #[test]
    fn bad_env_values_are_reported() {
        let err = EngineConfig::from_lookup(lookup(&[("TOKEN_MANAGER_POLL_INTERVAL_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("TOKEN_MANAGER_POLL_INTERVAL_SECS"));

        let err = EngineConfig::from_lookup(lookup(&[("TOKEN_MANAGER_COMMITMENT", "fast")]))
            .unwrap_err();
        assert!(err.to_string().contains("unknown commitment"));
    }

    #[test]
    fn zero_poll_interval_is_invalid() {
        let err = EngineConfig::from_lookup(lookup(&[("TOKEN_MANAGER_POLL_INTERVAL_SECS", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("poll_interval_secs"));
    }

    #[test]
    fn non_http_url_is_invalid() {
        let config = EngineConfig {
            rpc_url: "devnet".into(),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "rpc_url": "http://localhost:8899", "commitment": "processed" }"#)
                .unwrap();
        assert_eq!(config.rpc_url, "http://localhost:8899");
        assert_eq!(config.commitment, Commitment::Processed);
        assert_eq!(config.confirm_timeout_secs, 60);
    }
}
