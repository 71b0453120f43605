//! Endpoint and retry configuration.

use serde::{Deserialize, Serialize};

/// JSON-RPC endpoints for both chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// HTTP RPC URL of the root chain (receipts, checkpoint headers, seed blocks).
    pub main_chain_url: String,
    /// HTTP RPC URL of the child chain (block headers for checkpoint roots).
    pub child_chain_url: String,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
    /// Concurrent header fetches when computing a checkpoint root.
    pub header_concurrency: usize,
    pub retry: RetryConfig,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            main_chain_url: "http://127.0.0.1:8545".into(),
            child_chain_url: "http://127.0.0.1:8546".into(),
            request_timeout_secs: 5,
            header_concurrency: 16,
            retry: RetryConfig::default(),
        }
    }
}

impl RpcConfig {
    /// Defaults overridden by `ROOTCHAIN_MAIN_URL`, `ROOTCHAIN_CHILD_URL` and
    /// `ROOTCHAIN_TIMEOUT_SECS` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("ROOTCHAIN_MAIN_URL") {
            config.main_chain_url = url;
        }
        if let Ok(url) = std::env::var("ROOTCHAIN_CHILD_URL") {
            config.child_chain_url = url;
        }
        if let Some(secs) = std::env::var("ROOTCHAIN_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.request_timeout_secs = secs;
        }
        config
    }
}

/// Retry backoff for transport failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per request, including the first.
    pub attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry `attempt` (1-based), doubling up to the cap. Jitter is added by
    /// the caller.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_config_default() {
        let c = RetryConfig::default();
        assert_eq!(c.attempts, 3);
        assert_eq!(c.backoff_ms(1), 100);
        assert_eq!(c.backoff_ms(2), 200);
        assert_eq!(c.backoff_ms(10), 2_000);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let c: RpcConfig = serde_json::from_str(r#"{"main_chain_url":"http://node:8545"}"#).unwrap();
        assert_eq!(c.main_chain_url, "http://node:8545");
        assert_eq!(c.retry, RetryConfig::default());
    }
}
