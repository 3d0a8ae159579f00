//! Profile record and the persistence collaborator seam.

use crate::core::ProviderId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;

/// Durable record bound to one `(wallet_type, wallet_address)` identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub id: Option<String>,
    pub wallet_address: String,
    pub wallet_type: ProviderId,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub points: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Default profile for a first-seen identity: generated username, zero points.
    pub fn new_default(provider: &ProviderId, address: &str) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            wallet_address: address.to_string(),
            wallet_type: provider.clone(),
            username: default_username(address),
            avatar_url: None,
            points: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn belongs_to(&self, provider: &ProviderId, address: &str) -> bool {
        &self.wallet_type == provider && self.wallet_address == address
    }

    pub fn regenerate_username(&mut self) {
        self.username = default_username(&self.wallet_address);
    }
}

/// `user_<address fragment>_<4 random digits>`.
pub fn default_username(address: &str) -> String {
    let fragment: String = address
        .trim_start_matches("0x")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(6)
        .collect::<String>()
        .to_ascii_lowercase();
    let fragment = if fragment.is_empty() { "wallet".to_string() } else { fragment };
    let disambiguator: u16 = rand::thread_rng().gen_range(1000..10000);
    format!("user_{}_{}", fragment, disambiguator)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    /// `(wallet_address, wallet_type)`
    Identity,
    Username,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("no rows returned")]
    NotFound,
    /// Persistence layer rejected the query shape (missing column, relation).
    #[error("schema: {0}")]
    Schema(String),
    #[error("unique violation on {0:?}")]
    UniqueViolation(UniqueField),
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// External profile persistence. Opaque to the core beyond these three calls.
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn find(&self, address: &str, wallet_type: &ProviderId) -> Result<Option<Profile>, RepositoryError>;
    async fn insert(&self, profile: &Profile) -> Result<Profile, RepositoryError>;
    async fn update(&self, profile: &Profile) -> Result<Profile, RepositoryError>;
}

/// In-process repository enforcing the same uniqueness constraints as the
/// hosted table.
#[derive(Debug, Default)]
pub struct MemoryProfileRepository {
    rows: Mutex<Vec<Profile>>,
    next_id: AtomicU64,
    offline: AtomicBool,
}

impl MemoryProfileRepository {
    pub fn new() -> Self { Self::default() }

    /// Simulate an outage: every call fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) { self.offline.store(offline, Ordering::SeqCst); }

    pub fn rows(&self) -> Vec<Profile> { self.rows.lock().map(|r| r.clone()).unwrap_or_default() }

    fn check_online(&self) -> Result<(), RepositoryError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("repository offline".into()));
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Profile>>, RepositoryError> {
        self.rows.lock().map_err(|_| RepositoryError::Unavailable("repository lock".into()))
    }
}

#[async_trait]
impl ProfileRepository for MemoryProfileRepository {
    async fn find(&self, address: &str, wallet_type: &ProviderId) -> Result<Option<Profile>, RepositoryError> {
        self.check_online()?;
        Ok(self.lock()?.iter().find(|p| p.belongs_to(wallet_type, address)).cloned())
    }

    async fn insert(&self, profile: &Profile) -> Result<Profile, RepositoryError> {
        self.check_online()?;
        let mut rows = self.lock()?;
        if rows.iter().any(|p| p.belongs_to(&profile.wallet_type, &profile.wallet_address)) {
            return Err(RepositoryError::UniqueViolation(UniqueField::Identity));
        }
        if rows.iter().any(|p| p.username == profile.username) {
            return Err(RepositoryError::UniqueViolation(UniqueField::Username));
        }
        let mut row = profile.clone();
        row.id = Some(format!("p-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1));
        rows.push(row.clone());
        Ok(row)
    }

    async fn update(&self, profile: &Profile) -> Result<Profile, RepositoryError> {
        self.check_online()?;
        let mut rows = self.lock()?;
        let index = rows
            .iter()
            .position(|p| p.belongs_to(&profile.wallet_type, &profile.wallet_address))
            .ok_or(RepositoryError::NotFound)?;
        if rows.iter().enumerate().any(|(i, p)| i != index && p.username == profile.username) {
            return Err(RepositoryError::UniqueViolation(UniqueField::Username));
        }
        let mut row = profile.clone();
        row.id = rows[index].id.clone();
        row.created_at = rows[index].created_at;
        rows[index] = row.clone();
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_username_uses_address_fragment() {
        let name = default_username("0xABCDEF0123456789");
        assert!(name.starts_with("user_abcdef_"), "{name}");
        let digits = name.rsplit('_').next().unwrap();
        assert_eq!(digits.len(), 4);
        assert!(default_username("").starts_with("user_wallet_"));
    }

    #[tokio::test]
    async fn repository_enforces_identity_and_username_uniqueness() {
        let repo = MemoryProfileRepository::new();
        let mut a = Profile::new_default(&ProviderId::METAMASK, "0xaaa");
        a.username = "alice".into();
        let stored = repo.insert(&a).await.unwrap();
        assert_eq!(stored.id.as_deref(), Some("p-1"));

        assert_eq!(repo.insert(&a).await, Err(RepositoryError::UniqueViolation(UniqueField::Identity)));

        let mut b = Profile::new_default(&ProviderId::METAMASK, "0xbbb");
        b.username = "alice".into();
        assert_eq!(repo.insert(&b).await, Err(RepositoryError::UniqueViolation(UniqueField::Username)));

        // same address under another provider is a distinct identity
        let mut c = Profile::new_default(&ProviderId::COINBASE, "0xaaa");
        c.username = "carol".into();
        assert!(repo.insert(&c).await.is_ok());
        assert_eq!(repo.rows().len(), 2);
    }

    #[tokio::test]
    async fn update_requires_existing_row() {
        let repo = MemoryProfileRepository::new();
        let mut p = Profile::new_default(&ProviderId::PHANTOM_SOLANA, "So1ana");
        assert_eq!(repo.update(&p).await, Err(RepositoryError::NotFound));
        repo.insert(&p).await.unwrap();
        p.points = 40;
        let updated = repo.update(&p).await.unwrap();
        assert_eq!(updated.points, 40);
        assert_eq!(updated.id.as_deref(), Some("p-1"));

        repo.set_offline(true);
        assert!(matches!(repo.find("So1ana", &ProviderId::PHANTOM_SOLANA).await, Err(RepositoryError::Unavailable(_))));
    }
}
