//! Core configuration - passed from the embedding application

use crate::core::NetworkTier;
use crate::retry::RetryPolicy;
use std::time::Duration;

/// Core configuration. Embedding applications construct this.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub app: String,
    pub network: NetworkTier,
    pub session: SessionConfig,
    pub providers: ProviderConfig,
    pub watcher: WatcherConfig,
    pub bus_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            app: "walletlink".into(),
            network: NetworkTier::default(),
            session: SessionConfig::default(),
            providers: ProviderConfig::default(),
            watcher: WatcherConfig::default(),
            bus_capacity: 64,
        }
    }
}

impl CoreConfig {
    pub fn new(app: impl Into<String>) -> Self {
        Self { app: app.into(), ..Default::default() }
    }
    pub fn with_network(mut self, network: NetworkTier) -> Self { self.network = network; self }
    pub fn with_session(mut self, c: SessionConfig) -> Self { self.session = c; self }
    pub fn with_providers(mut self, c: ProviderConfig) -> Self { self.providers = c; self }
    pub fn with_watcher(mut self, c: WatcherConfig) -> Self { self.watcher = c; self }

    /// Millisecond-scale timings for tests.
    pub fn fast_test() -> Self {
        Self {
            app: "walletlink-test".into(),
            providers: ProviderConfig::fast_test(),
            watcher: WatcherConfig::fast_test(),
            session: SessionConfig { profile_timeout: Duration::from_millis(500), ..Default::default() },
            ..Default::default()
        }
    }

    /// Overlay `WALLETLINK_*` environment variables on top of `self`.
    pub fn from_env(mut self) -> Self {
        if let Ok(value) = std::env::var("WALLETLINK_NETWORK") {
            match NetworkTier::from_str(&value) {
                Some(network) => self.network = network,
                None => tracing::warn!(value = %value, "ignoring unknown WALLETLINK_NETWORK"),
            }
        }
        if let Some(secs) = env_u64("WALLETLINK_VERIFY_INTERVAL_SECS") {
            self.watcher.verify_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(ms) = env_u64("WALLETLINK_DEBOUNCE_MS") {
            self.watcher.debounce = Duration::from_millis(ms);
        }
        if let Some(hours) = env_u64("WALLETLINK_SESSION_HOURS") {
            self.session.freshness = Duration::from_secs(hours.max(1).saturating_mul(3600));
        }
        self
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(name, raw = %raw, "ignoring non-numeric setting");
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sessions older than this are expired.
    pub freshness: Duration,
    /// Bound on the profile load that follows a session start.
    pub profile_timeout: Duration,
    /// Regenerated-username attempts after a username collision.
    pub username_retries: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            freshness: Duration::from_secs(24 * 3600),
            profile_timeout: Duration::from_secs(10),
            username_retries: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub injection: RetryPolicy,
    pub request: RetryPolicy,
    pub account_population: RetryPolicy,
    /// Bound on a prompting request (user decision time).
    pub request_timeout: Duration,
    /// Bound on silent, non-prompting reads.
    pub probe_timeout: Duration,
    /// Bound on the out-of-band pairing modal.
    pub pairing_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            injection: RetryPolicy::injection(),
            request: RetryPolicy::request(),
            account_population: RetryPolicy::account_population(),
            request_timeout: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(3),
            pairing_timeout: Duration::from_secs(120),
        }
    }
}

impl ProviderConfig {
    pub fn fast_test() -> Self {
        let quick = |n| RetryPolicy::new(n, Duration::from_millis(1), Duration::from_millis(4)).with_jitter(false);
        Self {
            injection: quick(3),
            request: quick(2),
            account_population: quick(15),
            request_timeout: Duration::from_millis(300),
            probe_timeout: Duration::from_millis(100),
            pairing_timeout: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub verify_interval: Duration,
    /// Checks closer together than this are skipped.
    pub debounce: Duration,
    /// Bound on a single reconnection attempt.
    pub reconnect_timeout: Duration,
    /// An in-flight guard older than this is considered stale.
    pub guard_ttl: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            verify_interval: Duration::from_secs(15),
            debounce: Duration::from_secs(3),
            reconnect_timeout: Duration::from_secs(10),
            guard_ttl: Duration::from_secs(15),
        }
    }
}

impl WatcherConfig {
    pub fn fast_test() -> Self {
        Self {
            verify_interval: Duration::from_millis(50),
            debounce: Duration::from_millis(300),
            reconnect_timeout: Duration::from_millis(500),
            guard_ttl: Duration::from_millis(800),
        }
    }
}
