//! Wallet providers - one adapter per external wallet backend
//!
//! Every provider exposes the same capability set over a different backend:
//!
//! | Provider | Backend | Chain | Nuance |
//! |----------|---------|-------|--------|
//! | `metamask` | injected EIP-1193 | EVM | permission prompt on force, revoke on disconnect |
//! | `phantom-ethereum` | injected EIP-1193 | EVM | - |
//! | `coinbase` | injected EIP-1193 | EVM | account list may arrive empty, `selected_address` fills in |
//! | `phantom-solana` | injected Solana | Solana | public key populates late, focus/refresh nudges |
//! | `walletconnect` | pairing client | EVM | always available, pairing modal |
//!
//! Providers never throw past their own boundary: `connect` always yields a
//! [`ConnectionResult`], `disconnect` always clears local state.

pub mod backend;
mod evm;
mod pairing;
mod solana;

pub use backend::{
    BackendError, Eip1193Backend, Environment, EvmSlot, HeadlessEnvironment, Nudge, PairingClient, PairingRequest,
    PairingSession, SolanaBackend,
};
pub use evm::{EvmProvider, EvmVariant};
pub use pairing::WalletConnectProvider;
pub use solana::PhantomSolanaProvider;

use crate::config::ProviderConfig;
use crate::core::{keys, ChainFamily, NetworkTier, ProviderId};
use crate::error::{WalletError, WalletResult};
use crate::store::KvStore;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Static capability description, registered once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    pub name: String,
    pub networks: Vec<NetworkTier>,
    pub chains: Vec<ChainFamily>,
}

impl ProviderDescriptor {
    pub fn new(id: ProviderId, name: impl Into<String>, chain: ChainFamily) -> Self {
        Self { id, name: name.into(), networks: vec![NetworkTier::Mainnet, NetworkTier::Testnet], chains: vec![chain] }
    }

    pub fn with_networks(mut self, networks: Vec<NetworkTier>) -> Self { self.networks = networks; self }

    pub fn supports(&self, network: NetworkTier) -> bool { self.networks.contains(&network) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectOptions {
    /// Bypass the silent reconnect fast path and show the backend prompt.
    pub force_prompt: bool,
    pub network: NetworkTier,
}

impl ConnectOptions {
    pub fn prompt() -> Self { Self { force_prompt: true, ..Default::default() } }
    pub fn silent() -> Self { Self::default() }
    pub fn with_network(mut self, network: NetworkTier) -> Self { self.network = network; self }
}

/// Machine-readable failure class carried next to the error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    UnknownProvider,
    BackendAbsent,
    UserRejected,
    Timeout,
    RequestPending,
    AddressMismatch,
    Persistence,
    Storage,
    Backend,
}

impl From<&WalletError> for FailureReason {
    fn from(e: &WalletError) -> Self {
        match e {
            WalletError::UnknownProvider(_) => FailureReason::UnknownProvider,
            WalletError::BackendAbsent(_) => FailureReason::BackendAbsent,
            WalletError::UserRejected => FailureReason::UserRejected,
            WalletError::Timeout(_) => FailureReason::Timeout,
            WalletError::RequestPending => FailureReason::RequestPending,
            WalletError::AddressMismatch { .. } => FailureReason::AddressMismatch,
            WalletError::PersistenceUnavailable(_) | WalletError::UniquenessCollision(_) => FailureReason::Persistence,
            WalletError::Storage(_) => FailureReason::Storage,
            WalletError::Backend(_) => FailureReason::Backend,
        }
    }
}

/// Outcome of a connect attempt. Success carries both address and provider,
/// failure carries neither.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionResult {
    success: bool,
    address: Option<String>,
    provider: Option<ProviderId>,
    error: Option<String>,
    reason: Option<FailureReason>,
}

impl ConnectionResult {
    pub fn connected(provider: ProviderId, address: impl Into<String>) -> Self {
        Self { success: true, address: Some(address.into()), provider: Some(provider), error: None, reason: None }
    }

    pub fn failed(error: &WalletError) -> Self {
        Self { success: false, address: None, provider: None, error: Some(error.to_string()), reason: Some(error.into()) }
    }

    pub fn success(&self) -> bool { self.success }
    pub fn address(&self) -> Option<&str> { self.address.as_deref() }
    pub fn provider(&self) -> Option<&ProviderId> { self.provider.as_ref() }
    pub fn error(&self) -> Option<&str> { self.error.as_deref() }
    pub fn reason(&self) -> Option<FailureReason> { self.reason }

    /// Provider and address of a successful result.
    pub fn identity(&self) -> Option<(&ProviderId, &str)> {
        Some((self.provider.as_ref()?, self.address.as_deref()?))
    }
}

/// Uniform capability set over one wallet backend.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    fn id(&self) -> &ProviderId { &self.descriptor().id }

    /// Backend object present. Never prompts, never connects.
    async fn is_available(&self) -> bool;

    async fn connect(&self, options: &ConnectOptions) -> ConnectionResult;

    /// Best-effort backend release; local connection state is always cleared.
    async fn disconnect(&self) -> bool;

    /// Backend still connected and reporting the locally recorded account.
    /// Read-only, never prompts.
    async fn verify_connection(&self) -> bool;

    /// Accounts the backend exposes without prompting.
    async fn get_accounts(&self) -> Vec<String>;
}

/// What every built-in provider is constructed with.
#[derive(Clone)]
pub struct ProviderContext {
    pub env: Arc<dyn Environment>,
    pub store: Arc<dyn KvStore>,
    pub config: ProviderConfig,
}

impl ProviderContext {
    pub fn new(env: Arc<dyn Environment>, store: Arc<dyn KvStore>, config: ProviderConfig) -> Self {
        Self { env, store, config }
    }
}

/// The five built-in providers, in display order.
pub fn default_providers(ctx: &ProviderContext) -> Vec<Arc<dyn WalletProvider>> {
    vec![
        Arc::new(EvmProvider::metamask(ctx.clone())),
        Arc::new(PhantomSolanaProvider::new(ctx.clone())),
        Arc::new(EvmProvider::phantom_ethereum(ctx.clone())),
        Arc::new(EvmProvider::coinbase(ctx.clone())),
        Arc::new(WalletConnectProvider::new(ctx.clone())),
    ]
}

/// A provider's own record of the account it connected, kept outside the
/// wallet-scoped prefix so it survives restarts until `disconnect`.
pub(crate) struct LocalAccount {
    store: Arc<dyn KvStore>,
    key: String,
}

impl LocalAccount {
    pub(crate) fn new(store: Arc<dyn KvStore>, provider: &ProviderId) -> Self {
        Self { store, key: keys::provider::address(provider.as_str()) }
    }

    pub(crate) fn get(&self) -> Option<String> {
        match self.store.get(&self.key) {
            Ok(value) => value.and_then(|v| v.as_str().map(str::to_string)),
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "could not read provider account");
                None
            }
        }
    }

    pub(crate) fn set(&self, address: &str) -> WalletResult<()> {
        self.store.put(&self.key, json!(address))
    }

    pub(crate) fn clear(&self) -> bool {
        match self.store.remove(&self.key) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "could not clear provider account");
                false
            }
        }
    }
}

/// Await a backend call for at most `limit`.
pub(crate) async fn bounded<T, F>(limit: Duration, what: &str, call: F) -> WalletResult<T>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(WalletError::from),
        Err(_) => Err(WalletError::Timeout(what.to_string())),
    }
}

/// EVM addresses compare case-insensitively; store them lowercase.
pub(crate) fn normalize_evm(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}
