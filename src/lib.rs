//! Walletlink: client-side wallet connection core. One session at a time,
//! isolated per wallet identity.
//!
//! # Architecture
//!
//! ```text
//! WalletCore (entry point)
//!   │
//!   ├── ConnectionWatcher (interval + signal driven health checks)
//!   │     └── ProviderRegistry
//!   │           ├── providers: metamask, phantom-solana, phantom-ethereum,
//!   │           │              coinbase, walletconnect
//!   │           │     └── Environment (injected backend objects)
//!   │           └── SessionManager
//!   │                 ├── KvStore ("wallet/session", "wallet/scoped/*", "profile/cache/*")
//!   │                 └── ProfileRepository (external persistence)
//!   │
//!   └── EventBus (wallet-changed, session-changed, session-ended,
//!                 profile-loaded, connection-lost, verification-requested)
//! ```
//!
//! # Features
//!
//! - `native` - file-backed store, tracing subscriber, signal handling, CLI
//!
//! # Usage
//!
//! ```ignore
//! use walletlink::{CoreConfig, ConnectOptions, MemoryProfileRepository, MemoryStore, WalletCore};
//!
//! let core = WalletCore::new(CoreConfig::new("myapp"), env, Arc::new(MemoryStore::new()), Arc::new(MemoryProfileRepository::new()));
//! core.restore().await?;
//! let watcher = core.start();
//!
//! let result = core.connect("metamask", ConnectOptions::prompt()).await;
//! if result.success() {
//!     let profile = core.sessions().load_profile_for_current_wallet().await;
//! }
//! ```

pub mod bus;
pub mod config;
pub mod core;
pub mod error;
pub mod providers;
pub mod registry;
pub mod retry;
pub mod runtime;
pub mod session;
pub mod store;
pub mod watcher;

#[cfg(feature = "native")]
pub mod logging;

pub use bus::{EventBus, EventStream, Topic, WalletEvent};
pub use config::{CoreConfig, ProviderConfig, SessionConfig, WatcherConfig};
pub use crate::core::{ChainFamily, NetworkTier, ProviderId};
pub use error::{WalletError, WalletResult};
pub use providers::{
    BackendError, ConnectOptions, ConnectionResult, Environment, FailureReason, HeadlessEnvironment, ProviderContext,
    ProviderDescriptor, WalletProvider,
};
pub use registry::{ProviderRegistry, Verification};
pub use retry::{retry, retry_when, RetryPolicy};
pub use runtime::Shutdown;
pub use session::{MemoryProfileRepository, Profile, ProfileRepository, SessionManager, WalletSession};
pub use store::{KvStore, MemoryStore};
pub use watcher::{CheckOutcome, ConnectionState, ConnectionStatus, ConnectionWatcher, Notice, Notifier};

#[cfg(feature = "native")]
pub use runtime::install_signal_handlers;
#[cfg(feature = "native")]
pub use store::FileStore;

use std::sync::Arc;
use tokio::task::JoinHandle;

/// Wires bus, session manager, registry and watcher over the injected
/// collaborators.
pub struct WalletCore {
    config: CoreConfig,
    bus: EventBus,
    sessions: Arc<SessionManager>,
    registry: Arc<ProviderRegistry>,
    watcher: Arc<ConnectionWatcher>,
    shutdown: Shutdown,
}

impl WalletCore {
    pub fn new(
        config: CoreConfig,
        env: Arc<dyn Environment>,
        store: Arc<dyn KvStore>,
        profiles: Arc<dyn ProfileRepository>,
    ) -> Self {
        let ctx = ProviderContext::new(env, store.clone(), config.providers.clone());
        Self::with_registry(config, store, profiles, |sessions| ProviderRegistry::with_defaults(&ctx, sessions))
    }

    /// Like [`WalletCore::new`] with a caller-built registry.
    pub fn with_registry<F>(config: CoreConfig, store: Arc<dyn KvStore>, profiles: Arc<dyn ProfileRepository>, build: F) -> Self
    where
        F: FnOnce(Arc<SessionManager>) -> ProviderRegistry,
    {
        let bus = EventBus::new(config.bus_capacity);
        let sessions = Arc::new(SessionManager::new(store, profiles, bus.clone(), config.session.clone()));
        let registry = Arc::new(build(sessions.clone()).with_network(config.network));
        let watcher = Arc::new(ConnectionWatcher::new(registry.clone(), config.watcher.clone()));
        Self { config, bus, sessions, registry, watcher, shutdown: Shutdown::new() }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        let watcher = ConnectionWatcher::new(self.registry.clone(), self.config.watcher.clone()).with_notifier(notifier);
        self.watcher = Arc::new(watcher);
        self
    }

    pub fn config(&self) -> &CoreConfig { &self.config }
    pub fn bus(&self) -> &EventBus { &self.bus }
    pub fn sessions(&self) -> &Arc<SessionManager> { &self.sessions }
    pub fn registry(&self) -> &Arc<ProviderRegistry> { &self.registry }
    pub fn watcher(&self) -> &Arc<ConnectionWatcher> { &self.watcher }

    /// Reload the persisted session, if still fresh. An expired one is torn
    /// down through the registry.
    pub async fn restore(&self) -> WalletResult<Option<WalletSession>> {
        self.registry.restore().await
    }

    pub async fn connect(&self, id: &str, options: ConnectOptions) -> ConnectionResult {
        self.watcher.connect(id, options).await
    }

    pub async fn disconnect(&self) -> bool {
        self.watcher.disconnect().await
    }

    /// Start the watcher loop; it runs until [`WalletCore::shutdown`].
    pub fn start(&self) -> JoinHandle<()> {
        self.watcher.clone().spawn(self.shutdown.subscribe())
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Handle that stops the watcher when triggered, e.g. from a signal.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }
}
