//! Backend seams: the injected objects each provider talks to.
//!
//! Nothing here is ambient. An [`Environment`] probe hands providers the
//! backend objects currently present, so a missing extension is simply `None`.

use crate::error::WalletError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Error reported by a backend, with its numeric code convention.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("wallet error {code}: {message}")]
pub struct BackendError {
    pub code: i64,
    pub message: String,
}

impl BackendError {
    /// EIP-1193 user rejected the request.
    pub const USER_REJECTED: i64 = 4001;
    pub const UNAUTHORIZED: i64 = 4100;
    pub const UNSUPPORTED_METHOD: i64 = 4200;
    pub const DISCONNECTED: i64 = 4900;
    pub const CHAIN_DISCONNECTED: i64 = 4901;
    /// Unrecognized chain id on `wallet_switchEthereumChain`.
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;
    /// A permission request is already showing.
    pub const REQUEST_PENDING: i64 = -32002;
    pub const INTERNAL: i64 = -32603;
    /// Pairing protocol user rejection.
    pub const PAIRING_USER_REJECTED: i64 = 5000;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn user_rejected() -> Self { Self::new(Self::USER_REJECTED, "User rejected the request.") }

    pub fn is_user_rejected(&self) -> bool {
        self.code == Self::USER_REJECTED
            || self.code == Self::PAIRING_USER_REJECTED
            || self.message.to_ascii_lowercase().contains("user rejected")
    }
}

impl From<BackendError> for WalletError {
    fn from(e: BackendError) -> Self {
        if e.is_user_rejected() {
            WalletError::UserRejected
        } else if e.code == BackendError::REQUEST_PENDING {
            WalletError::RequestPending
        } else {
            WalletError::Backend(e.to_string())
        }
    }
}

/// EIP-1193 style injected object (`window.ethereum` and friends).
#[async_trait]
pub trait Eip1193Backend: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, BackendError>;

    /// Synchronously readable connected-account field, if the backend has one.
    fn selected_address(&self) -> Option<String> { None }

    fn is_connected(&self) -> bool { true }
}

/// Solana injected object (`window.phantom.solana`).
#[async_trait]
pub trait SolanaBackend: Send + Sync {
    /// `only_if_trusted` connects silently or fails without prompting.
    async fn connect(&self, only_if_trusted: bool) -> Result<(), BackendError>;
    async fn disconnect(&self) -> Result<(), BackendError>;
    /// Populated some time after `connect` resolves.
    fn public_key(&self) -> Option<String>;
    fn is_connected(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingRequest {
    /// CAIP-2 chains, e.g. `eip155:1`.
    pub chains: Vec<String>,
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingSession {
    pub topic: String,
    /// CAIP-10 accounts, e.g. `eip155:1:0xabc...`.
    pub accounts: Vec<String>,
}

/// Remote pairing protocol client. Has no injected object; `open_pairing`
/// shows the out-of-band pairing modal.
#[async_trait]
pub trait PairingClient: Send + Sync {
    async fn open_pairing(&self, request: &PairingRequest) -> Result<PairingSession, BackendError>;
    async fn active_session(&self) -> Option<PairingSession>;
    async fn disconnect(&self) -> Result<(), BackendError>;
}

/// Where an EVM extension injects itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvmSlot {
    MetaMask,
    PhantomEthereum,
    Coinbase,
}

/// Best-effort side-channel nudges for backends that stall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nudge {
    /// Re-focus the page so the extension flushes its state.
    Focus,
    /// Ask the extension to refresh its account state.
    Refresh,
}

/// Read-only probe of the execution environment.
pub trait Environment: Send + Sync {
    fn evm(&self, slot: EvmSlot) -> Option<Arc<dyn Eip1193Backend>>;
    fn solana(&self) -> Option<Arc<dyn SolanaBackend>>;
    fn pairing(&self) -> Option<Arc<dyn PairingClient>>;
    fn nudge(&self, _nudge: Nudge) {}

    /// Whether any wallet backend is reachable from here at all.
    fn has_backends(&self) -> bool {
        [EvmSlot::MetaMask, EvmSlot::PhantomEthereum, EvmSlot::Coinbase].into_iter().any(|slot| self.evm(slot).is_some())
            || self.solana().is_some()
            || self.pairing().is_some()
    }
}

/// Environment with no wallet backends at all (CLI, server-side rendering).
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessEnvironment;

impl Environment for HeadlessEnvironment {
    fn evm(&self, _slot: EvmSlot) -> Option<Arc<dyn Eip1193Backend>> { None }
    fn solana(&self) -> Option<Arc<dyn SolanaBackend>> { None }
    fn pairing(&self) -> Option<Arc<dyn PairingClient>> { None }
}
