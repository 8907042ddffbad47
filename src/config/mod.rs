//! Configuration for the bridge.
//!
//! Every tunable has a built-in default and an optional `KEYWARD_*`
//! environment override. The library never reads config files; embedders
//! construct a [`BridgeConfig`] directly or call [`BridgeConfig::from_env`].

use std::time::Duration;

use crate::error::ConfigError;

/// Timeout for a page request awaiting its RESPONSE.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;
/// Trailing window in which a trusted input event admits `eth_requestAccounts`.
pub const DEFAULT_GESTURE_WINDOW_MS: u64 = 5_000;
/// Completion-reconciler deadline after an approval is confirmed.
pub const DEFAULT_COMPLETION_TIMEOUT_MS: u64 = 45_000;
/// Re-broadcast period for provider-identity announcements.
pub const DEFAULT_ANNOUNCE_INTERVAL_MS: u64 = 30_000;
/// Per-oracle budget for advisory lookups.
pub const DEFAULT_ADVISORY_TIMEOUT_MS: u64 = 3_000;
/// Cap on simultaneously pending page requests per client.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 128;

/// Main configuration for the bridge runtime.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub request_timeout: Duration,
    pub gesture_window: Duration,
    pub completion_timeout: Duration,
    pub announce_interval: Duration,
    pub advisory_timeout: Duration,
    pub max_pending_requests: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            gesture_window: Duration::from_millis(DEFAULT_GESTURE_WINDOW_MS),
            completion_timeout: Duration::from_millis(DEFAULT_COMPLETION_TIMEOUT_MS),
            announce_interval: Duration::from_millis(DEFAULT_ANNOUNCE_INTERVAL_MS),
            advisory_timeout: Duration::from_millis(DEFAULT_ADVISORY_TIMEOUT_MS),
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
        }
    }
}

impl BridgeConfig {
    /// Resolve from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(optional_env)
    }

    /// Resolve with an injected lookup so tests avoid mutating process env.
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            request_timeout: duration_ms(
                "KEYWARD_REQUEST_TIMEOUT_MS",
                &lookup,
                defaults.request_timeout,
            )?,
            gesture_window: duration_ms(
                "KEYWARD_GESTURE_WINDOW_MS",
                &lookup,
                defaults.gesture_window,
            )?,
            completion_timeout: duration_ms(
                "KEYWARD_COMPLETION_TIMEOUT_MS",
                &lookup,
                defaults.completion_timeout,
            )?,
            announce_interval: duration_ms(
                "KEYWARD_ANNOUNCE_INTERVAL_MS",
                &lookup,
                defaults.announce_interval,
            )?,
            advisory_timeout: duration_ms(
                "KEYWARD_ADVISORY_TIMEOUT_MS",
                &lookup,
                defaults.advisory_timeout,
            )?,
            max_pending_requests: parse_usize(
                "KEYWARD_MAX_PENDING_REQUESTS",
                &lookup,
                defaults.max_pending_requests,
            )?,
        })
    }
}

/// Read an env var, treating empty/whitespace values as unset.
fn optional_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn duration_ms(
    key: &str,
    lookup: impl Fn(&str) -> Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match lookup(key) {
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected milliseconds, got '{raw}'"),
            }),
        None => Ok(default),
    }
}

fn parse_usize(
    key: &str,
    lookup: impl Fn(&str) -> Option<String>,
    default: usize,
) -> Result<usize, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.parse::<usize>().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a positive integer, got '{raw}'"),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = BridgeConfig::default();
        assert_eq!(config.request_timeout, Duration::from_millis(60_000));
        assert_eq!(config.gesture_window, Duration::from_millis(5_000));
        assert_eq!(config.completion_timeout, Duration::from_millis(45_000));
    }

    #[test]
    fn resolves_overrides_from_lookup() {
        let config = BridgeConfig::resolve(|key| match key {
            "KEYWARD_REQUEST_TIMEOUT_MS" => Some("1500".to_string()),
            "KEYWARD_MAX_PENDING_REQUESTS" => Some("4".to_string()),
            _ => None,
        })
        .expect("valid config");

        assert_eq!(config.request_timeout, Duration::from_millis(1500));
        assert_eq!(config.max_pending_requests, 4);
        assert_eq!(config.gesture_window, Duration::from_millis(5_000));
    }

    #[test]
    fn rejects_non_numeric_override() {
        let err = BridgeConfig::resolve(|key| {
            (key == "KEYWARD_COMPLETION_TIMEOUT_MS").then(|| "soon".to_string())
        })
        .expect_err("invalid value must fail");

        match err {
            ConfigError::InvalidValue { key, .. } => {
                assert_eq!(key, "KEYWARD_COMPLETION_TIMEOUT_MS");
            }
        }
    }
}
