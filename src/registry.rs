//! Provider registry - resolves providers and keeps the single-session rule
//!
//! ```text
//! connect_wallet(B)
//!   ├── resolve B ──────────── unknown → failed result
//!   ├── B available? ───────── no → failed result, nothing touched
//!   ├── disconnect A (if any): A.disconnect() then end session
//!   ├── B.connect() ────────── failed → result returned as-is
//!   └── start_new_session(B, addr) → wallet-changed
//! ```
//!
//! Connect, disconnect, reconnect and expiry are serialized, so the previous wallet's
//! teardown always completes before the next backend is asked for accounts.

use crate::bus::{EventBus, WalletEvent};
use crate::core::{NetworkTier, ProviderId};
use crate::error::{WalletError, WalletResult};
use crate::providers::{
    default_providers, ConnectOptions, ConnectionResult, ProviderContext, ProviderDescriptor, WalletProvider,
};
use crate::retry::{retry, RetryPolicy};
use crate::session::{SessionManager, WalletSession};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Result of re-checking the active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    NoSession,
    /// The session outlived its freshness window and was ended.
    Expired,
    Valid,
    /// Backend gone, disconnected or reporting another account.
    Invalid,
}

pub struct ProviderRegistry {
    providers: Vec<Arc<dyn WalletProvider>>,
    sessions: Arc<SessionManager>,
    bus: EventBus,
    availability: RetryPolicy,
    network: NetworkTier,
    connect_lock: Mutex<()>,
}

impl ProviderRegistry {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        let bus = sessions.bus().clone();
        Self {
            providers: Vec::new(),
            sessions,
            bus,
            availability: RetryPolicy::once(),
            network: NetworkTier::default(),
            connect_lock: Mutex::new(()),
        }
    }

    /// Registry with the five built-in providers. Availability is polled with
    /// the injection policy so a late extension is still found.
    pub fn with_defaults(ctx: &ProviderContext, sessions: Arc<SessionManager>) -> Self {
        let mut registry = Self::new(sessions).with_availability_policy(ctx.config.injection);
        for provider in default_providers(ctx) {
            registry.register(provider);
        }
        registry
    }

    pub fn with_availability_policy(mut self, policy: RetryPolicy) -> Self { self.availability = policy; self }
    pub fn with_network(mut self, network: NetworkTier) -> Self { self.network = network; self }

    /// Add a provider, replacing any registered under the same id.
    pub fn register(&mut self, provider: Arc<dyn WalletProvider>) {
        self.providers.retain(|p| p.id() != provider.id());
        self.providers.push(provider);
    }

    pub fn sessions(&self) -> &Arc<SessionManager> { &self.sessions }
    pub fn bus(&self) -> &EventBus { &self.bus }
    pub fn network(&self) -> NetworkTier { self.network }

    pub fn get(&self, id: &str) -> Option<Arc<dyn WalletProvider>> {
        self.providers.iter().find(|p| p.id() == id).cloned()
    }

    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        self.providers.iter().map(|p| p.descriptor().clone()).collect()
    }

    /// Ids of providers whose backend is present right now.
    pub async fn available(&self) -> Vec<ProviderId> {
        let mut ids = Vec::new();
        for provider in &self.providers {
            if provider.is_available().await {
                ids.push(provider.id().clone());
            }
        }
        ids
    }

    /// Provider behind the active session.
    pub fn active_provider(&self) -> Option<Arc<dyn WalletProvider>> {
        let id = self.sessions.current_provider()?;
        self.get(id.as_str())
    }

    /// Connect `id`, tearing down whatever was connected before.
    pub async fn connect_wallet(&self, id: &str, options: ConnectOptions) -> ConnectionResult {
        let _guard = self.connect_lock.lock().await;
        let Some(provider) = self.get(id) else {
            warn!(provider = id, "connect requested for unknown provider");
            return ConnectionResult::failed(&WalletError::UnknownProvider(id.to_string()));
        };
        if !self.wait_available(&provider).await {
            info!(provider = id, "provider not available");
            return ConnectionResult::failed(&WalletError::BackendAbsent(provider.descriptor().name.clone()));
        }

        self.disconnect_locked().await;

        let result = provider.connect(&options).await;
        let Some((connected, address)) = result.identity() else {
            return result;
        };
        match self.sessions.start_new_session(connected, address).await {
            Ok(session) => {
                self.bus.publish(WalletEvent::WalletChanged {
                    connected: true,
                    address: Some(session.address),
                    provider: Some(session.provider),
                });
                result
            }
            Err(e) => {
                warn!(provider = id, error = %e, "session start failed, releasing provider");
                provider.disconnect().await;
                ConnectionResult::failed(&e)
            }
        }
    }

    /// Disconnect the active provider and end the session. Returns whether a
    /// session was torn down; with none active this is a no-op.
    pub async fn disconnect_wallet(&self) -> bool {
        let _guard = self.connect_lock.lock().await;
        self.disconnect_locked().await
    }

    async fn disconnect_locked(&self) -> bool {
        if let Some(session) = self.sessions.current_session() {
            self.release(&session.provider).await;
        }
        self.end_session().await
    }

    async fn release(&self, id: &ProviderId) {
        match self.get(id.as_str()) {
            Some(provider) => {
                if !provider.disconnect().await {
                    warn!(provider = %id, "provider disconnect incomplete");
                }
            }
            None => debug!(provider = %id, "session provider no longer registered"),
        }
    }

    async fn end_session(&self) -> bool {
        let ended = match self.sessions.end_current_session().await {
            Ok(ended) => ended,
            Err(e) => {
                warn!(error = %e, "session end failed");
                true
            }
        };
        if ended {
            self.bus.publish(WalletEvent::WalletChanged { connected: false, address: None, provider: None });
        }
        ended
    }

    /// Re-check the active session without prompting.
    pub async fn verify_active(&self) -> Verification {
        if self.expire_stale().await {
            return Verification::Expired;
        }
        let Some(session) = self.sessions.current_session() else { return Verification::NoSession };
        let Some(provider) = self.get(session.provider.as_str()) else {
            return Verification::Invalid;
        };
        if provider.verify_connection().await {
            Verification::Valid
        } else {
            debug!(provider = %session.provider, "active session failed verification");
            Verification::Invalid
        }
    }

    /// Reconnect the active provider without prompting. Only the same
    /// identity keeps the session; another account is reported as
    /// `AddressMismatch` and the session is left for the caller to end.
    pub async fn reconnect_wallet(&self) -> ConnectionResult {
        let _guard = self.connect_lock.lock().await;
        let Some(session) = self.sessions.current_session() else {
            return ConnectionResult::failed(&WalletError::Backend("no active wallet session".into()));
        };
        let Some(provider) = self.get(session.provider.as_str()) else {
            return ConnectionResult::failed(&WalletError::UnknownProvider(session.provider.to_string()));
        };
        let result = provider.connect(&ConnectOptions::silent().with_network(self.network)).await;
        let Some((connected, address)) = result.identity() else {
            return result;
        };
        if !session.matches(connected, address) {
            info!(provider = %connected, expected = %session.address, actual = address, "wallet now reports another account");
            return ConnectionResult::failed(&WalletError::AddressMismatch {
                expected: session.address,
                actual: address.to_string(),
            });
        }
        info!(provider = %connected, "reconnected");
        self.bus.publish(WalletEvent::WalletChanged {
            connected: true,
            address: Some(address.to_string()),
            provider: Some(connected.clone()),
        });
        result
    }

    /// Reload the persisted session after a restart. An expired record is
    /// torn down like a disconnect: its provider is released and
    /// `wallet-changed` is published.
    pub async fn restore(&self) -> WalletResult<Option<WalletSession>> {
        let _guard = self.connect_lock.lock().await;
        let Some(stored) = self.sessions.persisted_session()? else { return Ok(None) };
        if self.sessions.is_expired(&stored) {
            self.release(&stored.provider).await;
        }
        let restored = self.sessions.restore().await?;
        match &restored {
            Some(session) => self.bus.publish(WalletEvent::WalletChanged {
                connected: true,
                address: Some(session.address.clone()),
                provider: Some(session.provider.clone()),
            }),
            None => self.bus.publish(WalletEvent::WalletChanged { connected: false, address: None, provider: None }),
        };
        Ok(restored)
    }

    /// End a session that outlived its freshness window, releasing its
    /// provider first. Returns whether one was ended.
    async fn expire_stale(&self) -> bool {
        if self.sessions.stale_session().is_none() {
            return false;
        }
        let _guard = self.connect_lock.lock().await;
        let Some(stale) = self.sessions.stale_session() else { return false };
        self.release(&stale.provider).await;
        match self.sessions.expire_if_stale().await {
            Ok(true) => {
                self.bus.publish(WalletEvent::WalletChanged { connected: false, address: None, provider: None });
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(error = %e, "could not expire stale session");
                false
            }
        }
    }

    async fn wait_available(&self, provider: &Arc<dyn WalletProvider>) -> bool {
        retry(
            &self.availability,
            |_| async move { if provider.is_available().await { Ok(()) } else { Err(()) } },
            |_, attempt| debug!(provider = %provider.id(), attempt, "provider not injected yet"),
        )
        .await
        .is_ok()
    }
}
