use crate::realtime::RealTimeMethod;
use crate::types::Feed;
use anyhow::Result;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    // Access control - comma-separated wallet allow-lists per feed.
    // Absent or empty variables mean an empty list: deny all.
    pub kom_owner_wallets: Vec<String>,
    pub bba_owner_wallets: Vec<String>,

    // Upstream feed endpoints
    pub kom_feed_url: String,
    pub bba_feed_url: String,
    pub sse_url: String,
    pub ws_url: String,

    // Polling parameters (milliseconds)
    pub base_interval_ms: u64,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,

    // System
    pub database_path: String,
    pub method: RealTimeMethod,
    pub history_hours: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            kom_owner_wallets: wallet_list("KOM_OWNER_WALLETS"),
            bba_owner_wallets: wallet_list("BBA_OWNER_WALLETS"),

            kom_feed_url: env::var("KOM_FEED_URL")
                .unwrap_or_else(|_| "http://localhost:3000/api/liquidex".to_string()),
            bba_feed_url: env::var("BBA_FEED_URL")
                .unwrap_or_else(|_| "http://localhost:3000/api/liquidex/bba".to_string()),
            sse_url: env::var("SSE_URL")
                .unwrap_or_else(|_| "http://localhost:3000/api/sse".to_string()),
            ws_url: env::var("WS_URL")
                .unwrap_or_else(|_| "ws://localhost:3000/api/ws".to_string()),

            base_interval_ms: env_u64("BASE_INTERVAL_MS", 30_000),
            min_interval_ms: env_u64("MIN_INTERVAL_MS", 10_000),
            max_interval_ms: env_u64("MAX_INTERVAL_MS", 120_000),

            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "./metrics_history.db".to_string()),
            method: env::var("REALTIME_METHOD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(RealTimeMethod::AdaptivePolling),
            history_hours: env::var("HISTORY_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(24),
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.min_interval_ms == 0 || self.base_interval_ms == 0 {
            anyhow::bail!("Polling intervals must be greater than 0");
        }

        if self.min_interval_ms > self.base_interval_ms {
            anyhow::bail!("MIN_INTERVAL_MS must not exceed BASE_INTERVAL_MS");
        }

        if self.max_interval_ms < self.base_interval_ms {
            anyhow::bail!("MAX_INTERVAL_MS must not be below BASE_INTERVAL_MS");
        }

        if self.history_hours <= 0 {
            anyhow::bail!("HISTORY_HOURS must be greater than 0");
        }

        for wallet in self
            .kom_owner_wallets
            .iter()
            .chain(self.bba_owner_wallets.iter())
        {
            if !wallet.starts_with("0x") {
                anyhow::bail!("Allow-list entry must start with '0x': {}", wallet);
            }
        }

        Ok(())
    }

    pub fn feed_url(&self, feed: Feed) -> &str {
        match feed {
            Feed::Kom => &self.kom_feed_url,
            Feed::Bba => &self.bba_feed_url,
        }
    }

    pub fn owner_wallets(&self, feed: Feed) -> &[String] {
        match feed {
            Feed::Kom => &self.kom_owner_wallets,
            Feed::Bba => &self.bba_owner_wallets,
        }
    }
}

/// Parse a comma-separated wallet list. A missing variable yields an empty
/// list, which denies all wallets for that feed - there is deliberately no
/// built-in fallback address set.
fn wallet_list(var: &str) -> Vec<String> {
    env::var(var)
        .map(|v| {
            v.split(',')
                .map(|w| w.trim().to_string())
                .filter(|w| !w.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn env_u64(var: &str, default: u64) -> u64 {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            kom_owner_wallets: vec![],
            bba_owner_wallets: vec![],
            kom_feed_url: "http://localhost/kom".into(),
            bba_feed_url: "http://localhost/bba".into(),
            sse_url: "http://localhost/sse".into(),
            ws_url: "ws://localhost/ws".into(),
            base_interval_ms: 30_000,
            min_interval_ms: 10_000,
            max_interval_ms: 120_000,
            database_path: ":memory:".into(),
            method: RealTimeMethod::AdaptivePolling,
            history_hours: 24,
        }
    }

    #[test]
    fn absent_allow_list_denies_all() {
        // No env var set in the test process for this name.
        assert!(wallet_list("MM_DASHBOARD_TEST_UNSET_VAR").is_empty());
    }

    #[test]
    fn empty_allow_lists_are_valid_config() {
        // Fail-closed is a configuration state, not a config error.
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_interval_bounds() {
        let mut config = base_config();
        config.max_interval_ms = 1_000;
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.min_interval_ms = 60_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn feed_url_maps_per_feed() {
        let config = base_config();
        assert_eq!(config.feed_url(Feed::Kom), "http://localhost/kom");
        assert_eq!(config.feed_url(Feed::Bba), "http://localhost/bba");
    }

    #[test]
    fn rejects_malformed_wallets() {
        let mut config = base_config();
        config.kom_owner_wallets = vec!["not-an-address".into()];
        assert!(config.validate().is_err());
    }
}
