//! Wallet sessions and the identity-keyed profile cache
//!
//! # Isolation
//!
//! ```text
//! start_new_session(B)            end_current_session()
//!     │                                 │
//!     ├── end A (if any) ───────────────┤
//!     │                                 ├── wipe wallet/scoped/*
//!     ├── wipe wallet/scoped/*          ├── remove wallet/session
//!     ├── write wallet/session (B)      └── publish session-ended
//!     ├── publish session-ended (A), session-changed (B)
//!     └── load profile/cache/B → publish profile-loaded
//! ```
//!
//! `profile/cache/*` survives both paths, so reconnecting A later finds A's
//! profile again while B never sees A's scoped keys.

mod manager;
mod profile;

pub use manager::SessionManager;
pub use profile::{default_username, MemoryProfileRepository, Profile, ProfileRepository, RepositoryError, UniqueField};

use crate::core::ProviderId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The single process-wide record of what is connected right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSession {
    pub provider: ProviderId,
    pub address: String,
    pub started_at: DateTime<Utc>,
    pub token: String,
}

impl WalletSession {
    pub(crate) fn begin(provider: ProviderId, address: &str) -> Self {
        let bytes: [u8; 16] = rand::random();
        Self { provider, address: address.to_string(), started_at: Utc::now(), token: hex::encode(bytes) }
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.started_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>, freshness: Duration) -> bool {
        self.age_at(now) > freshness
    }

    pub fn matches(&self, provider: &ProviderId, address: &str) -> bool {
        &self.provider == provider && self.address == address
    }
}
