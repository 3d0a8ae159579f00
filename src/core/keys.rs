//! Key and topic constants for the key-value store.
//!
//! Centralized registry for every key the core reads or writes. The isolation
//! wipe relies on all wallet-scoped keys sharing [`scoped::PREFIX`].

/// Active session record
pub mod session {
    pub const CURRENT: &str = "wallet/session";
}

/// Keys scoped to the currently connected wallet. Wiped on every session
/// start and end.
pub mod scoped {
    pub const PREFIX: &str = "wallet/scoped/";

    pub const AUTH_TOKEN: &str = "wallet/scoped/auth_token";
    pub const POINTS: &str = "wallet/scoped/points";
    pub const QUIZ_PROGRESS: &str = "wallet/scoped/quiz_progress";
    pub const TRANSACTIONS: &str = "wallet/scoped/transactions";
    pub const CURRENT_PROFILE: &str = "wallet/scoped/current_profile";

    pub const ALL: &[&str] = &[AUTH_TOKEN, POINTS, QUIZ_PROGRESS, TRANSACTIONS, CURRENT_PROFILE];

    /// Scoped key for an application-defined name (`points`, `quiz/3`, ...).
    /// Names already under the prefix are returned unchanged.
    pub fn key(name: &str) -> String {
        if name.starts_with(PREFIX) {
            return name.to_string();
        }
        format!("{}{}", PREFIX, name.trim_start_matches('/'))
    }
}

/// Per-provider connection records
pub mod provider {
    pub const PREFIX: &str = "wallet/provider/";

    pub fn address(provider: &str) -> String {
        format!("{}{}/address", PREFIX, provider)
    }
}

/// Durable, identity-keyed profile cache. Never touched by the isolation wipe.
pub mod profile {
    pub const CACHE_PREFIX: &str = "profile/cache/";

    pub fn cache_key(provider: &str, address: &str) -> String {
        format!("{}{}/{}", CACHE_PREFIX, provider, address)
    }
}
