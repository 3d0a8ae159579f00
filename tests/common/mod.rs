//! Shared fakes: scriptable wallet backends, an environment that injects
//! them, and a provider with call counters.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use walletlink::config::{ProviderConfig, SessionConfig};
use walletlink::providers::{
    BackendError, Eip1193Backend, Environment, EvmSlot, Nudge, PairingClient, PairingRequest, PairingSession,
    SolanaBackend,
};
use walletlink::watcher::{Notice, Notifier};
use walletlink::{
    ConnectOptions, ConnectionResult, EventBus, MemoryProfileRepository, MemoryStore, ProviderContext,
    ProviderDescriptor, ProviderId, ProviderRegistry, SessionManager, WalletError, WalletProvider,
};

// =============================================================================
// EIP-1193
// =============================================================================

#[derive(Default)]
pub struct FakeEip1193 {
    /// Accounts the wallet hands over once the site is approved.
    pub accounts: Mutex<Vec<String>>,
    pub authorized: AtomicBool,
    pub chain_id: Mutex<String>,
    pub selected: Mutex<Option<String>>,
    pub disconnected: AtomicBool,
    /// Queued responses for `eth_requestAccounts`, consumed front first.
    pub script: Mutex<VecDeque<Result<Value, BackendError>>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeEip1193 {
    pub fn with_account(address: &str) -> Arc<Self> {
        let fake = Self::default();
        *fake.accounts.lock().unwrap() = vec![address.to_string()];
        *fake.chain_id.lock().unwrap() = "0x1".to_string();
        Arc::new(fake)
    }

    pub fn approved(address: &str) -> Arc<Self> {
        let fake = Self::with_account(address);
        fake.authorized.store(true, Ordering::SeqCst);
        fake
    }

    pub fn set_account(&self, address: &str) {
        *self.accounts.lock().unwrap() = vec![address.to_string()];
    }

    pub fn push_response(&self, response: Result<Value, BackendError>) {
        self.script.lock().unwrap().push_back(response);
    }

    pub fn calls_of(&self, method: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|m| *m == method).count()
    }
}

#[async_trait]
impl Eip1193Backend for FakeEip1193 {
    async fn request(&self, method: &str, params: Value) -> Result<Value, BackendError> {
        self.calls.lock().unwrap().push(method.to_string());
        match method {
            "eth_accounts" => {
                if self.authorized.load(Ordering::SeqCst) {
                    Ok(json!(self.accounts.lock().unwrap().clone()))
                } else {
                    Ok(json!([]))
                }
            }
            "eth_requestAccounts" => {
                let scripted = self.script.lock().unwrap().pop_front();
                match scripted {
                    Some(Err(e)) => Err(e),
                    Some(Ok(value)) => {
                        self.authorized.store(true, Ordering::SeqCst);
                        Ok(value)
                    }
                    None => {
                        self.authorized.store(true, Ordering::SeqCst);
                        Ok(json!(self.accounts.lock().unwrap().clone()))
                    }
                }
            }
            "wallet_requestPermissions" => Ok(json!([{ "parentCapability": "eth_accounts" }])),
            "wallet_revokePermissions" => {
                self.authorized.store(false, Ordering::SeqCst);
                Ok(Value::Null)
            }
            "eth_chainId" => Ok(json!(self.chain_id.lock().unwrap().clone())),
            "wallet_switchEthereumChain" => {
                let chain = params[0]["chainId"].as_str().unwrap_or_default().to_string();
                *self.chain_id.lock().unwrap() = chain;
                Ok(Value::Null)
            }
            other => Err(BackendError::new(BackendError::UNSUPPORTED_METHOD, format!("{other} unsupported"))),
        }
    }

    fn selected_address(&self) -> Option<String> {
        self.selected.lock().unwrap().clone()
    }

    fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Solana
// =============================================================================

#[derive(Default)]
pub struct FakeSolana {
    /// Key revealed once connected; `None` never populates.
    pub key: Mutex<Option<String>>,
    pub connected: AtomicBool,
    pub trusted: AtomicBool,
    pub reject: AtomicBool,
    /// `public_key` reads that still return `None` after connecting.
    pub hidden_reads: AtomicU32,
    pub prompted_connects: AtomicU32,
    pub trusted_connects: AtomicU32,
    pub disconnects: AtomicU32,
}

impl FakeSolana {
    pub fn with_key(key: &str) -> Arc<Self> {
        let fake = Self::default();
        *fake.key.lock().unwrap() = Some(key.to_string());
        Arc::new(fake)
    }

    pub fn reveal(&self) {
        self.hidden_reads.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl SolanaBackend for FakeSolana {
    async fn connect(&self, only_if_trusted: bool) -> Result<(), BackendError> {
        if only_if_trusted {
            self.trusted_connects.fetch_add(1, Ordering::SeqCst);
            if !self.trusted.load(Ordering::SeqCst) {
                return Err(BackendError::user_rejected());
            }
        } else {
            self.prompted_connects.fetch_add(1, Ordering::SeqCst);
            if self.reject.load(Ordering::SeqCst) {
                return Err(BackendError::user_rejected());
            }
        }
        self.trusted.store(true, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn public_key(&self) -> Option<String> {
        if !self.connected.load(Ordering::SeqCst) {
            return None;
        }
        let hidden = self.hidden_reads.load(Ordering::SeqCst);
        if hidden > 0 {
            self.hidden_reads.store(hidden - 1, Ordering::SeqCst);
            return None;
        }
        self.key.lock().unwrap().clone()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Pairing
// =============================================================================

#[derive(Default)]
pub struct FakePairing {
    pub session: Mutex<Option<PairingSession>>,
    /// Accounts approved on the next pairing; `None` rejects.
    pub approve: Mutex<Option<Vec<String>>>,
    pub hang: AtomicBool,
    pub opened: AtomicU32,
    pub requests: Mutex<Vec<PairingRequest>>,
}

impl FakePairing {
    pub fn approving(accounts: &[&str]) -> Arc<Self> {
        let fake = Self::default();
        *fake.approve.lock().unwrap() = Some(accounts.iter().map(|a| a.to_string()).collect());
        Arc::new(fake)
    }
}

#[async_trait]
impl PairingClient for FakePairing {
    async fn open_pairing(&self, request: &PairingRequest) -> Result<PairingSession, BackendError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        let approved = self.approve.lock().unwrap().clone();
        match approved {
            Some(accounts) => {
                let session = PairingSession { topic: format!("topic-{}", self.opened.load(Ordering::SeqCst)), accounts };
                *self.session.lock().unwrap() = Some(session.clone());
                Ok(session)
            }
            None => Err(BackendError::new(BackendError::PAIRING_USER_REJECTED, "User rejected.")),
        }
    }

    async fn active_session(&self) -> Option<PairingSession> {
        self.session.lock().unwrap().clone()
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        *self.session.lock().unwrap() = None;
        Ok(())
    }
}

// =============================================================================
// Environment
// =============================================================================

#[derive(Default)]
pub struct FakeEnvironment {
    pub metamask: Mutex<Option<Arc<FakeEip1193>>>,
    pub phantom_ethereum: Mutex<Option<Arc<FakeEip1193>>>,
    pub coinbase: Mutex<Option<Arc<FakeEip1193>>>,
    pub solana: Mutex<Option<Arc<FakeSolana>>>,
    pub pairing: Mutex<Option<Arc<FakePairing>>>,
    /// EVM probes answered with `None` before the object appears.
    pub injection_delay: AtomicU32,
    pub reveal_on_refresh: AtomicBool,
    pub nudges: Mutex<Vec<Nudge>>,
}

impl FakeEnvironment {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_metamask(backend: Arc<FakeEip1193>) -> Arc<Self> {
        let env = Self::default();
        *env.metamask.lock().unwrap() = Some(backend);
        Arc::new(env)
    }

    pub fn with_coinbase(backend: Arc<FakeEip1193>) -> Arc<Self> {
        let env = Self::default();
        *env.coinbase.lock().unwrap() = Some(backend);
        Arc::new(env)
    }

    pub fn with_solana(backend: Arc<FakeSolana>) -> Arc<Self> {
        let env = Self::default();
        *env.solana.lock().unwrap() = Some(backend);
        Arc::new(env)
    }

    pub fn with_pairing(client: Arc<FakePairing>) -> Arc<Self> {
        let env = Self::default();
        *env.pairing.lock().unwrap() = Some(client);
        Arc::new(env)
    }

    pub fn remove_metamask(&self) {
        *self.metamask.lock().unwrap() = None;
    }
}

impl Environment for FakeEnvironment {
    fn evm(&self, slot: EvmSlot) -> Option<Arc<dyn Eip1193Backend>> {
        let pending = self.injection_delay.load(Ordering::SeqCst);
        if pending > 0 {
            self.injection_delay.store(pending - 1, Ordering::SeqCst);
            return None;
        }
        let backend = match slot {
            EvmSlot::MetaMask => self.metamask.lock().unwrap().clone(),
            EvmSlot::PhantomEthereum => self.phantom_ethereum.lock().unwrap().clone(),
            EvmSlot::Coinbase => self.coinbase.lock().unwrap().clone(),
        };
        backend.map(|b| b as Arc<dyn Eip1193Backend>)
    }

    fn solana(&self) -> Option<Arc<dyn SolanaBackend>> {
        self.solana.lock().unwrap().clone().map(|b| b as Arc<dyn SolanaBackend>)
    }

    fn pairing(&self) -> Option<Arc<dyn PairingClient>> {
        self.pairing.lock().unwrap().clone().map(|c| c as Arc<dyn PairingClient>)
    }

    fn nudge(&self, nudge: Nudge) {
        self.nudges.lock().unwrap().push(nudge);
        if nudge == Nudge::Refresh && self.reveal_on_refresh.load(Ordering::SeqCst) {
            if let Some(solana) = self.solana.lock().unwrap().as_ref() {
                solana.reveal();
            }
        }
    }
}

pub fn provider_ctx(env: Arc<FakeEnvironment>) -> (ProviderContext, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (ProviderContext::new(env, store.clone(), ProviderConfig::fast_test()), store)
}

// =============================================================================
// Scripted provider
// =============================================================================

pub struct ScriptedProvider {
    descriptor: ProviderDescriptor,
    pub available: AtomicBool,
    pub address: Mutex<String>,
    /// Error returned by the next connects; `None` succeeds.
    pub failure: Mutex<Option<WalletError>>,
    pub healthy: AtomicBool,
    pub connect_delay: Mutex<Duration>,
    pub connects: AtomicU32,
    pub disconnects: AtomicU32,
    pub verifies: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(id: &str, address: &str) -> Arc<Self> {
        Self::with_chain(id, address, walletlink::ChainFamily::Evm)
    }

    pub fn solana(id: &str, address: &str) -> Arc<Self> {
        Self::with_chain(id, address, walletlink::ChainFamily::Solana)
    }

    fn with_chain(id: &str, address: &str, chain: walletlink::ChainFamily) -> Arc<Self> {
        Arc::new(Self {
            descriptor: ProviderDescriptor::new(ProviderId::new(id), id.to_uppercase(), chain),
            available: AtomicBool::new(true),
            address: Mutex::new(address.to_string()),
            failure: Mutex::new(None),
            healthy: AtomicBool::new(true),
            connect_delay: Mutex::new(Duration::ZERO),
            connects: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
            verifies: AtomicU32::new(0),
        })
    }

    pub fn fail_with(&self, error: Option<WalletError>) {
        *self.failure.lock().unwrap() = error;
    }

    pub fn set_address(&self, address: &str) {
        *self.address.lock().unwrap() = address.to_string();
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = delay;
    }

    pub fn connects(&self) -> u32 { self.connects.load(Ordering::SeqCst) }
    pub fn disconnects(&self) -> u32 { self.disconnects.load(Ordering::SeqCst) }
    pub fn verifies(&self) -> u32 { self.verifies.load(Ordering::SeqCst) }
}

#[async_trait]
impl WalletProvider for ScriptedProvider {
    fn descriptor(&self) -> &ProviderDescriptor { &self.descriptor }

    async fn is_available(&self) -> bool { self.available.load(Ordering::SeqCst) }

    async fn connect(&self, _options: &ConnectOptions) -> ConnectionResult {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failure.lock().unwrap().clone();
        match failure {
            Some(e) => ConnectionResult::failed(&e),
            None => ConnectionResult::connected(self.descriptor.id.clone(), self.address.lock().unwrap().clone()),
        }
    }

    async fn disconnect(&self) -> bool {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        true
    }

    async fn verify_connection(&self) -> bool {
        self.verifies.fetch_add(1, Ordering::SeqCst);
        self.healthy.load(Ordering::SeqCst)
    }

    async fn get_accounts(&self) -> Vec<String> {
        vec![self.address.lock().unwrap().clone()]
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub profiles: Arc<MemoryProfileRepository>,
    pub bus: EventBus,
    pub sessions: Arc<SessionManager>,
    pub registry: Arc<ProviderRegistry>,
}

pub fn harness(providers: &[Arc<ScriptedProvider>]) -> Harness {
    harness_with(providers, SessionConfig::default())
}

pub fn harness_with(providers: &[Arc<ScriptedProvider>], config: SessionConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let profiles = Arc::new(MemoryProfileRepository::new());
    let bus = EventBus::default();
    let sessions = Arc::new(SessionManager::new(store.clone(), profiles.clone(), bus.clone(), config));
    let mut registry = ProviderRegistry::new(sessions.clone());
    for provider in providers {
        registry.register(provider.clone());
    }
    Harness { store, profiles, bus, sessions, registry: Arc::new(registry) }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}
