//! SessionManager - owns session lifecycle, the isolation wipe and the profile bridge.

use super::profile::{Profile, ProfileRepository, RepositoryError, UniqueField};
use super::WalletSession;
use crate::bus::{EventBus, WalletEvent};
use crate::config::SessionConfig;
use crate::core::keys;
use crate::core::ProviderId;
use crate::error::{WalletError, WalletResult};
use crate::store::{read_json, write_json, KvStore};
use chrono::Utc;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PersistMode {
    /// First profile for an identity; a concurrent creator wins.
    CreateDefault,
    Upsert,
}

pub struct SessionManager {
    store: Arc<dyn KvStore>,
    profiles: Arc<dyn ProfileRepository>,
    bus: EventBus,
    config: SessionConfig,
    current: RwLock<Option<WalletSession>>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn KvStore>, profiles: Arc<dyn ProfileRepository>, bus: EventBus, config: SessionConfig) -> Self {
        Self { store, profiles, bus, config, current: RwLock::new(None), lifecycle: tokio::sync::Mutex::new(()) }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> { &self.store }
    pub fn bus(&self) -> &EventBus { &self.bus }

    /// Reload the persisted session after a restart. An expired record is ended.
    pub async fn restore(&self) -> WalletResult<Option<WalletSession>> {
        let _guard = self.lifecycle.lock().await;
        let Some(stored) = self.persisted_session()? else {
            return Ok(None);
        };
        if self.is_expired(&stored) {
            info!(provider = %stored.provider, "persisted session expired");
            let ended = self.end_locked()?;
            if let Some(old) = ended {
                self.bus.publish(WalletEvent::SessionEnded { provider: old.provider, address: old.address });
            }
            return Ok(None);
        }
        info!(provider = %stored.provider, address = %stored.address, "restored session");
        self.set_current(Some(stored.clone()));
        Ok(Some(stored))
    }

    /// The session record as persisted, fresh or not.
    pub fn persisted_session(&self) -> WalletResult<Option<WalletSession>> {
        read_json::<WalletSession>(&*self.store, keys::session::CURRENT)
    }

    pub fn is_expired(&self, session: &WalletSession) -> bool {
        session.is_expired_at(Utc::now(), self.config.freshness)
    }

    /// The in-memory session when it outlived the freshness window and has
    /// not been ended yet.
    pub fn stale_session(&self) -> Option<WalletSession> {
        let current = self.current.read().unwrap_or_else(|p| p.into_inner()).clone()?;
        if self.is_expired(&current) { Some(current) } else { None }
    }

    /// The active session, never an expired one.
    pub fn current_session(&self) -> Option<WalletSession> {
        let current = self.current.read().unwrap_or_else(|p| p.into_inner()).clone()?;
        if self.is_expired(&current) { None } else { Some(current) }
    }

    pub fn is_connected(&self) -> bool { self.current_session().is_some() }

    pub fn current_address(&self) -> Option<String> { self.current_session().map(|s| s.address) }

    pub fn current_provider(&self) -> Option<ProviderId> { self.current_session().map(|s| s.provider) }

    /// End any current session, wipe wallet-scoped state and start a new one.
    /// The profile for the new identity is loaded before returning; a failed
    /// load leaves the session valid.
    pub async fn start_new_session(&self, provider: &ProviderId, address: &str) -> WalletResult<WalletSession> {
        let session = {
            let _guard = self.lifecycle.lock().await;
            let ended = self.end_locked()?;
            if ended.is_none() {
                self.wipe()?;
            }
            let session = WalletSession::begin(provider.clone(), address);
            write_json(&*self.store, keys::session::CURRENT, &session)?;
            self.set_current(Some(session.clone()));
            info!(provider = %provider, address, "session started");

            if let Some(old) = ended {
                self.bus.publish(WalletEvent::SessionEnded { provider: old.provider, address: old.address });
            }
            self.bus.publish(WalletEvent::SessionChanged { session: session.clone() });
            session
        };
        self.load_profile_for(&session).await;
        Ok(session)
    }

    /// Wipe wallet-scoped state and clear the session. Returns whether a
    /// session existed; ending nothing is a no-op.
    pub async fn end_current_session(&self) -> WalletResult<bool> {
        let _guard = self.lifecycle.lock().await;
        let ended = self.end_locked()?;
        match ended {
            Some(old) => {
                info!(provider = %old.provider, address = %old.address, "session ended");
                self.bus.publish(WalletEvent::SessionEnded { provider: old.provider, address: old.address });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// End the session if it outlived the freshness window.
    pub async fn expire_if_stale(&self) -> WalletResult<bool> {
        let _guard = self.lifecycle.lock().await;
        if self.stale_session().is_none() {
            return Ok(false);
        }
        if let Some(old) = self.end_locked()? {
            info!(provider = %old.provider, "session expired");
            self.bus.publish(WalletEvent::SessionEnded { provider: old.provider, address: old.address });
        }
        Ok(true)
    }

    fn end_locked(&self) -> WalletResult<Option<WalletSession>> {
        let previous = self.current.write().unwrap_or_else(|p| p.into_inner()).take();
        let previous = match previous {
            Some(s) => Some(s),
            None => read_json::<WalletSession>(&*self.store, keys::session::CURRENT)?,
        };
        if previous.is_none() {
            return Ok(None);
        }
        self.wipe()?;
        self.store.remove(keys::session::CURRENT)?;
        Ok(previous)
    }

    fn wipe(&self) -> WalletResult<usize> {
        let removed = self.store.remove_prefix(keys::scoped::PREFIX)?;
        debug!(removed, "wiped wallet-scoped state");
        Ok(removed)
    }

    fn set_current(&self, session: Option<WalletSession>) {
        *self.current.write().unwrap_or_else(|p| p.into_inner()) = session;
    }

    fn is_current(&self, session: &WalletSession) -> bool {
        self.current.read().unwrap_or_else(|p| p.into_inner()).as_ref().map_or(false, |c| c.token == session.token)
    }

    // =========================================================================
    // Wallet-scoped storage
    // =========================================================================

    /// Write a key that belongs to the connected wallet; removed by the next wipe.
    pub fn put_scoped(&self, name: &str, value: Value) -> WalletResult<()> {
        if !self.is_connected() {
            return Err(WalletError::Storage("no active wallet session".into()));
        }
        self.store.put(&keys::scoped::key(name), value)
    }

    pub fn get_scoped(&self, name: &str) -> WalletResult<Option<Value>> {
        if !self.is_connected() {
            return Ok(None);
        }
        self.store.get(&keys::scoped::key(name))
    }

    // =========================================================================
    // Profiles
    // =========================================================================

    /// Cache-first profile lookup for one identity, creating and persisting a
    /// default profile when none exists anywhere.
    pub async fn get_isolated_profile(&self, provider: &ProviderId, address: &str) -> WalletResult<Profile> {
        if let Some(cached) = self.cached_profile(provider, address)? {
            debug!(provider = %provider, address, "profile cache hit");
            return Ok(cached);
        }
        match self.profiles.find(address, provider).await {
            Ok(Some(row)) => {
                self.cache_profile(&row).await?;
                return Ok(row);
            }
            Ok(None) | Err(RepositoryError::NotFound) => {}
            Err(RepositoryError::Schema(msg)) => warn!(error = %msg, "profile lookup schema error, treating as not found"),
            Err(RepositoryError::UniqueViolation(_)) => {}
            Err(RepositoryError::Unavailable(msg)) => return Err(WalletError::PersistenceUnavailable(msg)),
        }
        info!(provider = %provider, address, "creating default profile");
        let saved = self.persist(Profile::new_default(provider, address), PersistMode::CreateDefault).await?;
        self.cache_profile(&saved).await?;
        Ok(saved)
    }

    /// Upsert keyed by `(wallet_address, wallet_type)`, then refresh the cache.
    /// With persistence down the cache alone is updated.
    pub async fn save_profile(&self, profile: Profile) -> WalletResult<Profile> {
        let mut profile = profile;
        profile.updated_at = Utc::now();
        let saved = match self.persist(profile.clone(), PersistMode::Upsert).await {
            Ok(saved) => saved,
            Err(WalletError::PersistenceUnavailable(msg)) => {
                warn!(error = %msg, "profile saved to local cache only");
                profile
            }
            Err(e) => return Err(e),
        };
        self.cache_profile(&saved).await?;
        Ok(saved)
    }

    /// Profile for the active session, published as `profile-loaded`.
    pub async fn load_profile_for_current_wallet(&self) -> Option<Profile> {
        let session = self.current_session()?;
        self.load_profile_for(&session).await
    }

    /// Reconcile the cached profile of the active identity with the persisted
    /// store; the persisted row wins on conflict.
    pub async fn sync_profile(&self) -> WalletResult<Option<Profile>> {
        let Some(session) = self.current_session() else { return Ok(None) };
        let cached = self.cached_profile(&session.provider, &session.address)?;
        let resolved = match self.profiles.find(&session.address, &session.provider).await {
            Ok(Some(row)) => row,
            Ok(None) | Err(RepositoryError::NotFound) | Err(RepositoryError::Schema(_)) => match cached.clone() {
                Some(local) => self.persist(local, PersistMode::Upsert).await?,
                None => return Ok(None),
            },
            Err(RepositoryError::Unavailable(msg)) => {
                warn!(error = %msg, "profile sync skipped, using cache");
                return Ok(cached);
            }
            Err(RepositoryError::UniqueViolation(_)) => return Ok(cached),
        };
        if cached.as_ref() != Some(&resolved) {
            debug!(provider = %session.provider, "persisted profile replaces cached copy");
            self.cache_profile(&resolved).await?;
            if self.is_current(&session) {
                self.bus.publish(WalletEvent::ProfileLoaded { profile: resolved.clone() });
            }
        }
        Ok(Some(resolved))
    }

    async fn load_profile_for(&self, session: &WalletSession) -> Option<Profile> {
        let lookup = self.get_isolated_profile(&session.provider, &session.address);
        let profile = match tokio::time::timeout(self.config.profile_timeout, lookup).await {
            Ok(Ok(profile)) => profile,
            Ok(Err(e)) => {
                warn!(provider = %session.provider, error = %e, "profile load failed, session stays valid");
                return None;
            }
            Err(_) => {
                warn!(provider = %session.provider, "profile load timed out, session stays valid");
                return None;
            }
        };
        let _guard = self.lifecycle.lock().await;
        if !self.is_current(session) {
            debug!("session changed during profile load, dropping result");
            return None;
        }
        if let Err(e) = write_json(&*self.store, keys::scoped::CURRENT_PROFILE, &profile) {
            warn!(error = %e, "could not record current profile");
        }
        self.bus.publish(WalletEvent::ProfileLoaded { profile: profile.clone() });
        Some(profile)
    }

    fn cached_profile(&self, provider: &ProviderId, address: &str) -> WalletResult<Option<Profile>> {
        let key = keys::profile::cache_key(provider.as_str(), address);
        Ok(read_json::<Profile>(&*self.store, &key)?.filter(|p| p.belongs_to(provider, address)))
    }

    /// Durable cache write, mirrored into the scoped slot when the profile
    /// belongs to the active session. The check and the scoped write share
    /// the lifecycle lock with session start.
    async fn cache_profile(&self, profile: &Profile) -> WalletResult<()> {
        let key = keys::profile::cache_key(profile.wallet_type.as_str(), &profile.wallet_address);
        write_json(&*self.store, &key, profile)?;
        let _guard = self.lifecycle.lock().await;
        let is_active = self
            .current_session()
            .map_or(false, |s| s.matches(&profile.wallet_type, &profile.wallet_address));
        if is_active {
            write_json(&*self.store, keys::scoped::CURRENT_PROFILE, profile)?;
        }
        Ok(())
    }

    async fn persist(&self, mut profile: Profile, mode: PersistMode) -> WalletResult<Profile> {
        let mut username_retries = 0;
        let mut rounds = 0;
        loop {
            rounds += 1;
            let existing = match self.profiles.find(&profile.wallet_address, &profile.wallet_type).await {
                Ok(found) => found,
                Err(RepositoryError::NotFound) | Err(RepositoryError::Schema(_)) | Err(RepositoryError::UniqueViolation(_)) => None,
                Err(RepositoryError::Unavailable(msg)) => return Err(WalletError::PersistenceUnavailable(msg)),
            };
            let result = match existing {
                Some(row) if mode == PersistMode::CreateDefault => return Ok(row),
                Some(row) => {
                    profile.id = row.id.clone();
                    profile.created_at = row.created_at;
                    self.profiles.update(&profile).await
                }
                None => self.profiles.insert(&profile).await,
            };
            match result {
                Ok(saved) => return Ok(saved),
                Err(RepositoryError::UniqueViolation(UniqueField::Identity)) => {
                    debug!(address = %profile.wallet_address, "profile creation raced");
                    if mode == PersistMode::CreateDefault {
                        return match self.profiles.find(&profile.wallet_address, &profile.wallet_type).await {
                            Ok(Some(row)) => Ok(row),
                            Ok(None) | Err(_) => Err(WalletError::UniquenessCollision("wallet identity".into())),
                        };
                    }
                    if rounds > self.config.username_retries + 1 {
                        return Err(WalletError::UniquenessCollision("wallet identity".into()));
                    }
                }
                Err(RepositoryError::UniqueViolation(UniqueField::Username)) => {
                    if username_retries >= self.config.username_retries {
                        return Err(WalletError::UniquenessCollision(format!("username {}", profile.username)));
                    }
                    username_retries += 1;
                    profile.regenerate_username();
                    debug!(attempt = username_retries, username = %profile.username, "username taken, regenerated");
                }
                Err(RepositoryError::NotFound) if rounds <= self.config.username_retries + 1 => {}
                Err(RepositoryError::NotFound) => return Err(WalletError::PersistenceUnavailable("profile row vanished".into())),
                Err(RepositoryError::Schema(msg)) | Err(RepositoryError::Unavailable(msg)) => {
                    return Err(WalletError::PersistenceUnavailable(msg));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryProfileRepository;
    use crate::store::MemoryStore;
    use crate::bus::Topic;
    use serde_json::json;
    use std::time::Duration;

    fn manager() -> (SessionManager, Arc<MemoryStore>, Arc<MemoryProfileRepository>, EventBus) {
        let store = Arc::new(MemoryStore::new());
        let repo = Arc::new(MemoryProfileRepository::new());
        let bus = EventBus::new(32);
        let manager = SessionManager::new(store.clone(), repo.clone(), bus.clone(), SessionConfig::default());
        (manager, store, repo, bus)
    }

    const A: &str = "0xaaa0000000000000000000000000000000000001";
    const B: &str = "0xbbb0000000000000000000000000000000000002";

    #[tokio::test]
    async fn new_session_wipes_previous_wallet_state() {
        let (manager, store, _, _) = manager();
        manager.start_new_session(&ProviderId::METAMASK, A).await.unwrap();
        manager.put_scoped("points", json!(120)).unwrap();
        manager.put_scoped("quiz/7", json!({"answered": 3})).unwrap();

        let session = manager.start_new_session(&ProviderId::COINBASE, B).await.unwrap();
        assert_eq!(session.address, B);
        assert_eq!(manager.get_scoped("points").unwrap(), None);
        assert_eq!(manager.get_scoped("quiz/7").unwrap(), None);

        // A's durable profile cache is untouched
        assert!(store.get(&keys::profile::cache_key("metamask", A)).unwrap().is_some());
        let current: Profile = read_json(&*store, keys::scoped::CURRENT_PROFILE).unwrap().unwrap();
        assert_eq!(current.wallet_address, B);
    }

    #[tokio::test]
    async fn reconnect_recovers_first_profile() {
        let (manager, _, repo, _) = manager();
        manager.start_new_session(&ProviderId::METAMASK, A).await.unwrap();
        let mut profile = manager.load_profile_for_current_wallet().await.unwrap();
        profile.points = 250;
        profile.username = "alice".into();
        manager.save_profile(profile).await.unwrap();

        manager.start_new_session(&ProviderId::COINBASE, B).await.unwrap();
        manager.start_new_session(&ProviderId::METAMASK, A).await.unwrap();
        let again = manager.load_profile_for_current_wallet().await.unwrap();
        assert_eq!(again.points, 250);
        assert_eq!(again.username, "alice");
        assert_eq!(repo.rows().len(), 2);
    }

    #[tokio::test]
    async fn end_is_idempotent() {
        let (manager, store, _, bus) = manager();
        let mut ended = bus.subscribe_to(&[Topic::SessionEnded]);
        assert!(!manager.end_current_session().await.unwrap());

        manager.start_new_session(&ProviderId::METAMASK, A).await.unwrap();
        assert!(manager.end_current_session().await.unwrap());
        assert!(!manager.end_current_session().await.unwrap());
        assert!(!manager.is_connected());
        assert!(store.get(keys::session::CURRENT).unwrap().is_none());
        assert_eq!(ended.drain().len(), 1);
    }

    #[tokio::test]
    async fn default_profile_then_cache_hit() {
        let (manager, _, repo, _) = manager();
        let first = manager.get_isolated_profile(&ProviderId::METAMASK, A).await.unwrap();
        assert_eq!(first.points, 0);
        assert!(first.username.starts_with("user_aaa000_"));
        let second = manager.get_isolated_profile(&ProviderId::METAMASK, A).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(repo.rows().len(), 1);
    }

    #[tokio::test]
    async fn events_follow_state() {
        let (manager, _, _, bus) = manager();
        let mut events = bus.subscribe();
        manager.start_new_session(&ProviderId::METAMASK, A).await.unwrap();
        manager.start_new_session(&ProviderId::COINBASE, B).await.unwrap();

        let topics: Vec<Topic> = events.drain().iter().map(|e| e.topic()).collect();
        assert_eq!(
            topics,
            vec![Topic::SessionChanged, Topic::ProfileLoaded, Topic::SessionEnded, Topic::SessionChanged, Topic::ProfileLoaded]
        );
    }

    #[tokio::test]
    async fn profile_outage_keeps_session() {
        let (manager, _, repo, _) = manager();
        repo.set_offline(true);
        let session = manager.start_new_session(&ProviderId::METAMASK, A).await.unwrap();
        assert!(manager.is_connected());
        assert_eq!(manager.current_session(), Some(session));
        assert!(manager.load_profile_for_current_wallet().await.is_none());
        assert!(matches!(
            manager.get_isolated_profile(&ProviderId::METAMASK, A).await,
            Err(WalletError::PersistenceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn save_during_outage_is_cache_only_then_synced() {
        let (manager, _, repo, _) = manager();
        manager.start_new_session(&ProviderId::METAMASK, A).await.unwrap();
        let mut profile = manager.load_profile_for_current_wallet().await.unwrap();

        repo.set_offline(true);
        profile.points = 77;
        let saved = manager.save_profile(profile).await.unwrap();
        assert_eq!(saved.points, 77);
        assert_eq!(manager.get_isolated_profile(&ProviderId::METAMASK, A).await.unwrap().points, 77);
        assert_eq!(repo.rows()[0].points, 0);

        repo.set_offline(false);
        // persisted row wins on reconciliation
        let synced = manager.sync_profile().await.unwrap().unwrap();
        assert_eq!(synced.points, 0);
        assert_eq!(manager.get_isolated_profile(&ProviderId::METAMASK, A).await.unwrap().points, 0);
    }

    #[tokio::test]
    async fn username_collision_regenerates() {
        let (manager, _, repo, _) = manager();
        let mut other = Profile::new_default(&ProviderId::METAMASK, B);
        other.username = "taken".into();
        repo.insert(&other).await.unwrap();

        let mut mine = Profile::new_default(&ProviderId::METAMASK, A);
        mine.username = "taken".into();
        let saved = manager.save_profile(mine).await.unwrap();
        assert_ne!(saved.username, "taken");
        assert_eq!(repo.rows().len(), 2);
    }

    #[tokio::test]
    async fn expired_session_is_not_current_and_is_ended() {
        let store = Arc::new(MemoryStore::new());
        let config = SessionConfig { freshness: Duration::from_millis(20), ..Default::default() };
        let manager = SessionManager::new(store.clone(), Arc::new(MemoryProfileRepository::new()), EventBus::default(), config);
        manager.start_new_session(&ProviderId::METAMASK, A).await.unwrap();
        manager.put_scoped("points", json!(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(manager.current_session().is_none());
        assert!(manager.expire_if_stale().await.unwrap());
        assert!(store.keys(keys::scoped::PREFIX).unwrap().is_empty());
        assert!(!manager.expire_if_stale().await.unwrap());
    }

    #[tokio::test]
    async fn restore_picks_up_persisted_session() {
        let store = Arc::new(MemoryStore::new());
        let repo = Arc::new(MemoryProfileRepository::new());
        let first = SessionManager::new(store.clone(), repo.clone(), EventBus::default(), SessionConfig::default());
        let session = first.start_new_session(&ProviderId::WALLETCONNECT, A).await.unwrap();

        let second = SessionManager::new(store.clone(), repo, EventBus::default(), SessionConfig::default());
        assert!(second.current_session().is_none());
        assert_eq!(second.restore().await.unwrap(), Some(session.clone()));
        assert_eq!(second.current_session(), Some(session));
    }

    /// Answers `find` from a script first, then from an in-memory table.
    #[derive(Default)]
    struct ScriptedRepo {
        inner: MemoryProfileRepository,
        finds: std::sync::Mutex<std::collections::VecDeque<Result<Option<Profile>, RepositoryError>>>,
        insert_collides: bool,
        slow: Option<(String, Duration)>,
    }

    impl ScriptedRepo {
        fn script(self, finds: Vec<Result<Option<Profile>, RepositoryError>>) -> Self {
            *self.finds.lock().unwrap() = finds.into();
            self
        }
    }

    #[async_trait::async_trait]
    impl ProfileRepository for ScriptedRepo {
        async fn find(&self, address: &str, wallet_type: &ProviderId) -> Result<Option<Profile>, RepositoryError> {
            if let Some((slow, delay)) = &self.slow {
                if slow == address {
                    tokio::time::sleep(*delay).await;
                }
            }
            let scripted = self.finds.lock().unwrap().pop_front();
            match scripted {
                Some(answer) => answer,
                None => self.inner.find(address, wallet_type).await,
            }
        }

        async fn insert(&self, profile: &Profile) -> Result<Profile, RepositoryError> {
            if self.insert_collides {
                return Err(RepositoryError::UniqueViolation(UniqueField::Identity));
            }
            self.inner.insert(profile).await
        }

        async fn update(&self, profile: &Profile) -> Result<Profile, RepositoryError> {
            self.inner.update(profile).await
        }
    }

    fn manager_over(repo: Arc<ScriptedRepo>) -> (Arc<SessionManager>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(store.clone(), repo, EventBus::new(32), SessionConfig::default());
        (Arc::new(manager), store)
    }

    #[tokio::test]
    async fn creation_race_returns_existing_row() {
        let mut winner = Profile::new_default(&ProviderId::METAMASK, A);
        winner.username = "first_writer".into();
        let repo = ScriptedRepo { insert_collides: true, ..Default::default() }.script(vec![Ok(None), Ok(None)]);
        let winner = repo.inner.insert(&winner).await.unwrap();
        let (manager, store) = manager_over(Arc::new(repo));

        let profile = manager.get_isolated_profile(&ProviderId::METAMASK, A).await.unwrap();
        assert_eq!(profile, winner);
        let cached: Profile = read_json(&*store, &keys::profile::cache_key("metamask", A)).unwrap().unwrap();
        assert_eq!(cached.username, "first_writer");
    }

    #[tokio::test]
    async fn schema_error_counts_as_not_found() {
        let schema = || Err(RepositoryError::Schema("relation \"profiles\" has no column \"wallet_type\"".into()));
        let repo = Arc::new(ScriptedRepo::default().script(vec![schema(), schema()]));
        let (manager, _) = manager_over(repo.clone());

        let profile = manager.get_isolated_profile(&ProviderId::METAMASK, A).await.unwrap();
        assert_eq!(profile.points, 0);
        assert!(profile.username.starts_with("user_aaa000_"));
        assert_eq!(repo.inner.rows().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_profile_load_never_lands_in_next_session() {
        let repo = ScriptedRepo { slow: Some((A.to_string(), Duration::from_millis(80))), ..Default::default() };
        let (manager, store) = manager_over(Arc::new(repo));

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.start_new_session(&ProviderId::METAMASK, A).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.start_new_session(&ProviderId::COINBASE, B).await.unwrap();
        first.await.unwrap().unwrap();

        assert_eq!(manager.current_address().as_deref(), Some(B));
        let current: Profile = read_json(&*store, keys::scoped::CURRENT_PROFILE).unwrap().unwrap();
        assert_eq!(current.wallet_address, B);
        // A's profile still reached its durable cache
        assert!(store.get(&keys::profile::cache_key("metamask", A)).unwrap().is_some());
    }

    #[tokio::test]
    async fn scoped_writes_require_session() {
        let (manager, _, _, _) = manager();
        assert!(manager.put_scoped("points", json!(1)).is_err());
        assert_eq!(manager.get_scoped("points").unwrap(), None);
    }
}
