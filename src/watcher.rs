//! Connection-health watcher
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Connected ◀──valid── Verifying
//!      ▲                        │                  │  ▲                 ▲
//!      │                        └──failed──────────┤  │                 │
//!      │                                           │  └──tick / route───┘
//!      ├──────────── explicit disconnect ──────────┘
//!      │
//!      └──failed── ReconnectAttempt ◀──invalid / connection lost
//!                        │
//!                        └──ok──▶ Connected
//! ```
//!
//! Checks are debounced. At most one reconnection runs at a time; its guard is
//! released when the attempt finishes, times out or is dropped, and a guard
//! older than its TTL is treated as abandoned.

use crate::bus::{Topic, WalletEvent};
use crate::config::WatcherConfig;
use crate::core::{ChainFamily, ProviderId};
use crate::providers::{ConnectOptions, ConnectionResult, FailureReason};
use crate::registry::{ProviderRegistry, Verification};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Floor for the verification interval; a zero period is not a valid ticker.
const MIN_VERIFY_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Verifying,
    ReconnectAttempt,
}

impl ConnectionState {
    /// Only these states may show a backend prompt.
    pub fn may_prompt(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::ReconnectAttempt)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub address: Option<String>,
    pub provider: Option<ProviderId>,
}

/// Transient, dismissable user-facing notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Reconnecting,
    Reconnected,
    ReconnectFailed,
    /// The user declined in the wallet.
    UserDeclined,
    /// The wallet could not be reached.
    Unreachable,
    PleaseReconnect,
}

impl Notice {
    fn for_failure(reason: Option<FailureReason>) -> Self {
        match reason {
            Some(FailureReason::UserRejected) => Notice::UserDeclined,
            Some(FailureReason::BackendAbsent) | Some(FailureReason::Timeout) => Notice::Unreachable,
            Some(FailureReason::AddressMismatch) => Notice::PleaseReconnect,
            _ => Notice::ReconnectFailed,
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Logs notices; embedders supply their own toast layer.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match notice {
            Notice::Reconnecting | Notice::Reconnected => info!(?notice, "wallet notice"),
            _ => warn!(?notice, "wallet notice"),
        }
    }
}

/// What a single check or trigger did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Within the debounce window.
    Skipped,
    /// Another reconnection holds the guard.
    InFlight,
    NoSession,
    Healthy,
    Reconnected,
    Disconnected,
}

#[derive(Default)]
struct GuardSlot {
    held: Option<(u64, Instant)>,
}

/// Held for the lifetime of one reconnection attempt.
struct ReconnectGuard {
    slot: Arc<Mutex<GuardSlot>>,
    id: u64,
}

impl Drop for ReconnectGuard {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
        if slot.held.map_or(false, |(id, _)| id == self.id) {
            slot.held = None;
        }
    }
}

pub struct ConnectionWatcher {
    registry: Arc<ProviderRegistry>,
    config: WatcherConfig,
    notifier: Arc<dyn Notifier>,
    status: watch::Sender<ConnectionStatus>,
    last_check: Mutex<Option<Instant>>,
    last_reconnect: Mutex<Option<Instant>>,
    guard: Arc<Mutex<GuardSlot>>,
    guard_ids: AtomicU64,
    reconnect_attempts: AtomicU32,
    last_provider: Mutex<Option<ProviderId>>,
}

impl ConnectionWatcher {
    pub fn new(registry: Arc<ProviderRegistry>, config: WatcherConfig) -> Self {
        let initial = match registry.sessions().current_session() {
            Some(s) => ConnectionStatus { state: ConnectionState::Connected, address: Some(s.address), provider: Some(s.provider) },
            None => ConnectionStatus::default(),
        };
        let (status, _) = watch::channel(initial);
        Self {
            registry,
            config,
            notifier: Arc::new(TracingNotifier),
            status,
            last_check: Mutex::new(None),
            last_reconnect: Mutex::new(None),
            guard: Arc::new(Mutex::new(GuardSlot::default())),
            guard_ids: AtomicU64::new(0),
            reconnect_attempts: AtomicU32::new(0),
            last_provider: Mutex::new(None),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self { self.notifier = notifier; self }

    pub fn registry(&self) -> &Arc<ProviderRegistry> { &self.registry }

    pub fn status(&self) -> ConnectionStatus { self.status.borrow().clone() }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> { self.status.subscribe() }

    /// Reconnection attempts started since creation.
    pub fn reconnect_attempts(&self) -> u32 { self.reconnect_attempts.load(Ordering::SeqCst) }

    pub fn reconnect_in_flight(&self) -> bool {
        let slot = self.guard.lock().unwrap_or_else(|p| p.into_inner());
        slot.held.map_or(false, |(_, at)| at.elapsed() < self.config.guard_ttl)
    }

    // =========================================================================
    // User actions
    // =========================================================================

    pub async fn connect(&self, id: &str, options: ConnectOptions) -> ConnectionResult {
        self.set_state(ConnectionState::Connecting, None, Some(ProviderId::new(id)));
        let result = self.registry.connect_wallet(id, options).await;
        match result.identity() {
            Some((provider, address)) => {
                self.remember(provider);
                self.set_state(ConnectionState::Connected, Some(address.to_string()), Some(provider.clone()));
            }
            None => {
                self.notifier.notify(Notice::for_failure(result.reason()));
                self.set_disconnected();
            }
        }
        result
    }

    /// Explicit user disconnect. No retry is offered afterwards.
    pub async fn disconnect(&self) -> bool {
        let ended = self.registry.disconnect_wallet().await;
        *self.last_provider.lock().unwrap_or_else(|p| p.into_inner()) = None;
        self.set_disconnected();
        ended
    }

    /// User-triggered retry after automatic reconnection gave up.
    pub async fn retry(&self) -> Option<ConnectionResult> {
        let provider = self.last_provider.lock().unwrap_or_else(|p| p.into_inner()).clone()?;
        let network = self.registry.network();
        Some(self.connect(provider.as_str(), ConnectOptions::prompt().with_network(network)).await)
    }

    // =========================================================================
    // Signals
    // =========================================================================

    /// Ask the running loop to verify now (route change and similar).
    pub fn request_verification(&self) {
        self.registry.bus().publish(WalletEvent::VerificationRequested);
    }

    /// Announce an external connection-lost signal to every subscriber.
    pub fn report_connection_lost(&self, reason: impl Into<String>) {
        let provider = self.registry.sessions().current_provider();
        self.registry.bus().publish(WalletEvent::ConnectionLost { provider, reason: reason.into() });
    }

    /// Backend account-change signal. An empty list means the connection is
    /// gone; another account means this session is no longer valid.
    pub async fn handle_accounts_changed(&self, accounts: &[String]) -> CheckOutcome {
        let Some(session) = self.registry.sessions().current_session() else { return CheckOutcome::NoSession };
        match accounts.first() {
            None => self.handle_connection_lost("wallet reported no accounts").await,
            Some(account) if self.same_account(&session.provider, account, &session.address) => CheckOutcome::Healthy,
            Some(account) => {
                info!(expected = %session.address, actual = %account, "wallet switched accounts");
                self.registry.disconnect_wallet().await;
                self.remember(&session.provider);
                self.notifier.notify(Notice::PleaseReconnect);
                self.set_disconnected();
                CheckOutcome::Disconnected
            }
        }
    }

    /// Guarded reconnection in response to a connection-lost signal.
    pub async fn handle_connection_lost(&self, reason: &str) -> CheckOutcome {
        info!(reason, "connection lost");
        if self.registry.sessions().current_session().is_none() {
            self.set_disconnected();
            return CheckOutcome::NoSession;
        }
        self.reconnect().await
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Debounced verification of the active session.
    pub async fn check(&self) -> CheckOutcome {
        {
            let mut last = self.last_check.lock().unwrap_or_else(|p| p.into_inner());
            if last.map_or(false, |at| at.elapsed() < self.config.debounce) {
                return CheckOutcome::Skipped;
            }
            *last = Some(Instant::now());
        }
        if self.reconnect_in_flight() {
            return CheckOutcome::InFlight;
        }
        // an expired session is already hidden here; verify_active ends it
        let session = self.registry.sessions().current_session();
        if let Some(s) = &session {
            self.set_state(ConnectionState::Verifying, Some(s.address.clone()), Some(s.provider.clone()));
        }
        match (self.registry.verify_active().await, session) {
            (Verification::Valid, Some(s)) => {
                self.set_state(ConnectionState::Connected, Some(s.address), Some(s.provider));
                CheckOutcome::Healthy
            }
            (Verification::Invalid, Some(_)) => self.reconnect().await,
            (Verification::Expired, _) => {
                info!("session expired");
                self.notifier.notify(Notice::PleaseReconnect);
                self.set_disconnected();
                CheckOutcome::Disconnected
            }
            _ => {
                self.set_disconnected();
                CheckOutcome::NoSession
            }
        }
    }

    async fn reconnect(&self) -> CheckOutcome {
        let Some(_guard) = self.try_guard() else {
            debug!("reconnection already in flight");
            return CheckOutcome::InFlight;
        };
        {
            let mut last = self.last_reconnect.lock().unwrap_or_else(|p| p.into_inner());
            if last.map_or(false, |at| at.elapsed() < self.config.debounce) {
                return CheckOutcome::Skipped;
            }
            *last = Some(Instant::now());
        }
        let Some(session) = self.registry.sessions().current_session() else {
            self.set_disconnected();
            return CheckOutcome::NoSession;
        };

        self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnectionState::ReconnectAttempt, Some(session.address.clone()), Some(session.provider.clone()));
        self.notifier.notify(Notice::Reconnecting);
        info!(provider = %session.provider, "attempting reconnection");

        let attempt = tokio::time::timeout(self.config.reconnect_timeout, self.registry.reconnect_wallet()).await;
        let notice = match attempt {
            Ok(result) => match result.identity() {
                Some((provider, address)) => {
                    self.notifier.notify(Notice::Reconnected);
                    self.set_state(ConnectionState::Connected, Some(address.to_string()), Some(provider.clone()));
                    return CheckOutcome::Reconnected;
                }
                None => Notice::for_failure(result.reason()),
            },
            Err(_) => {
                warn!(provider = %session.provider, "reconnection timed out");
                Notice::Unreachable
            }
        };
        self.registry.disconnect_wallet().await;
        self.remember(&session.provider);
        self.notifier.notify(notice);
        self.set_disconnected();
        CheckOutcome::Disconnected
    }

    fn try_guard(&self) -> Option<ReconnectGuard> {
        let mut slot = self.guard.lock().unwrap_or_else(|p| p.into_inner());
        if let Some((_, at)) = slot.held {
            if at.elapsed() < self.config.guard_ttl {
                return None;
            }
            warn!("stale reconnection guard released");
        }
        let id = self.guard_ids.fetch_add(1, Ordering::SeqCst);
        slot.held = Some((id, Instant::now()));
        Some(ReconnectGuard { slot: self.guard.clone(), id })
    }

    /// EVM addresses compare without case; base58 keys are case-sensitive.
    fn same_account(&self, provider: &ProviderId, reported: &str, expected: &str) -> bool {
        let evm = self
            .registry
            .get(provider.as_str())
            .map_or(false, |p| p.descriptor().chains.iter().all(|c| *c == ChainFamily::Evm));
        if evm { reported.eq_ignore_ascii_case(expected) } else { reported == expected }
    }

    fn remember(&self, provider: &ProviderId) {
        *self.last_provider.lock().unwrap_or_else(|p| p.into_inner()) = Some(provider.clone());
    }

    fn set_state(&self, state: ConnectionState, address: Option<String>, provider: Option<ProviderId>) {
        let next = ConnectionStatus { state, address, provider };
        if self.status.borrow().state != state {
            debug!(?state, "connection state");
        }
        self.status.send_replace(next);
    }

    fn set_disconnected(&self) { self.set_state(ConnectionState::Disconnected, None, None); }

    // =========================================================================
    // Loop
    // =========================================================================

    /// Run interval checks and react to bus signals until `shutdown` fires.
    pub fn spawn(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let mut events = self.registry.bus().subscribe_to(&[
            Topic::ConnectionLost,
            Topic::VerificationRequested,
            Topic::SessionChanged,
            Topic::SessionEnded,
        ]);
        tokio::spawn(async move {
            let period = self.config.verify_interval.max(MIN_VERIFY_INTERVAL);
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            info!(interval = ?period, "connection watcher started");
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        self.check().await;
                    }
                    event = events.recv() => match event {
                        Some(WalletEvent::ConnectionLost { reason, .. }) => {
                            self.handle_connection_lost(&reason).await;
                        }
                        Some(WalletEvent::VerificationRequested) => {
                            self.check().await;
                        }
                        Some(WalletEvent::SessionChanged { session }) => {
                            self.set_state(ConnectionState::Connected, Some(session.address), Some(session.provider));
                        }
                        Some(WalletEvent::SessionEnded { .. }) => {
                            if self.registry.sessions().current_session().is_none() {
                                self.set_disconnected();
                            }
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
            info!("connection watcher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connecting_states_prompt() {
        assert!(ConnectionState::Connecting.may_prompt());
        assert!(ConnectionState::ReconnectAttempt.may_prompt());
        assert!(!ConnectionState::Verifying.may_prompt());
        assert!(!ConnectionState::Connected.may_prompt());
    }

    #[test]
    fn failure_notices_distinguish_causes() {
        assert_eq!(Notice::for_failure(Some(FailureReason::UserRejected)), Notice::UserDeclined);
        assert_eq!(Notice::for_failure(Some(FailureReason::Timeout)), Notice::Unreachable);
        assert_eq!(Notice::for_failure(Some(FailureReason::Backend)), Notice::ReconnectFailed);
        assert_eq!(Notice::for_failure(Some(FailureReason::AddressMismatch)), Notice::PleaseReconnect);
    }

    #[test]
    fn guard_releases_only_its_own_slot() {
        let slot = Arc::new(Mutex::new(GuardSlot { held: Some((2, Instant::now())) }));
        drop(ReconnectGuard { slot: slot.clone(), id: 1 });
        assert!(slot.lock().unwrap().held.is_some());
        drop(ReconnectGuard { slot: slot.clone(), id: 2 });
        assert!(slot.lock().unwrap().held.is_none());
    }
}
