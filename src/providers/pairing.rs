//! Remote pairing provider (WalletConnect-style).
//!
//! There is no injected object to wait for: the provider is always offered and
//! a missing client only surfaces on connect.

use super::backend::{PairingClient, PairingRequest, PairingSession};
use super::{bounded, normalize_evm, ConnectOptions, ConnectionResult, LocalAccount, ProviderContext, ProviderDescriptor, WalletProvider};
use crate::core::{ChainFamily, NetworkTier, ProviderId};
use crate::error::{WalletError, WalletResult};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

const METHODS: &[&str] = &["eth_sendTransaction", "personal_sign", "eth_signTypedData_v4"];

pub struct WalletConnectProvider {
    descriptor: ProviderDescriptor,
    ctx: ProviderContext,
    account: LocalAccount,
}

impl WalletConnectProvider {
    pub fn new(ctx: ProviderContext) -> Self {
        let descriptor = ProviderDescriptor::new(ProviderId::WALLETCONNECT, "WalletConnect", ChainFamily::Evm);
        let account = LocalAccount::new(ctx.store.clone(), &descriptor.id);
        Self { descriptor, ctx, account }
    }

    fn client(&self) -> WalletResult<Arc<dyn PairingClient>> {
        self.ctx.env.pairing().ok_or_else(|| WalletError::BackendAbsent("pairing client not configured".into()))
    }

    async fn active_session(&self, client: &Arc<dyn PairingClient>) -> Option<PairingSession> {
        tokio::time::timeout(self.ctx.config.probe_timeout, client.active_session()).await.ok().flatten()
    }

    async fn pair(&self, client: &Arc<dyn PairingClient>, network: NetworkTier) -> WalletResult<String> {
        let request = PairingRequest {
            chains: vec![network.caip2().to_string()],
            methods: METHODS.iter().map(|m| m.to_string()).collect(),
        };
        let session = bounded(self.ctx.config.pairing_timeout, "pairing approval", client.open_pairing(&request)).await?;
        debug!(topic = %session.topic, accounts = session.accounts.len(), "pairing approved");
        pick_account(&session.accounts, network)
            .ok_or_else(|| WalletError::Backend("pairing session has no accounts".into()))
    }
}

#[async_trait]
impl WalletProvider for WalletConnectProvider {
    fn descriptor(&self) -> &ProviderDescriptor { &self.descriptor }

    async fn is_available(&self) -> bool { true }

    async fn connect(&self, options: &ConnectOptions) -> ConnectionResult {
        let client = match self.client() {
            Ok(client) => client,
            Err(e) => return ConnectionResult::failed(&e),
        };
        let existing = if options.force_prompt {
            None
        } else {
            self.active_session(&client).await.and_then(|s| pick_account(&s.accounts, options.network))
        };
        let address = match existing {
            Some(address) => {
                debug!("reusing active pairing session");
                Ok(address)
            }
            None => self.pair(&client, options.network).await,
        };
        match address {
            Ok(address) => {
                if let Err(e) = self.account.set(&address) {
                    return ConnectionResult::failed(&e);
                }
                info!(address = %address, "pairing connected");
                ConnectionResult::connected(self.descriptor.id.clone(), address)
            }
            Err(e) => {
                info!(error = %e, "pairing failed");
                ConnectionResult::failed(&e)
            }
        }
    }

    async fn disconnect(&self) -> bool {
        if let Ok(client) = self.client() {
            if let Err(e) = bounded(self.ctx.config.probe_timeout, "pairing disconnect", client.disconnect()).await {
                debug!(error = %e, "pairing disconnect failed");
            }
        }
        self.account.clear()
    }

    async fn verify_connection(&self) -> bool {
        let Some(expected) = self.account.get() else { return false };
        let Ok(client) = self.client() else { return false };
        match self.active_session(&client).await {
            Some(session) => session_accounts(&session.accounts).any(|(_, address)| address == expected),
            None => false,
        }
    }

    async fn get_accounts(&self) -> Vec<String> {
        let Ok(client) = self.client() else { return Vec::new() };
        let Some(session) = self.active_session(&client).await else { return Vec::new() };
        let mut accounts: Vec<String> = Vec::new();
        for (_, address) in session_accounts(&session.accounts) {
            if !accounts.contains(&address) {
                accounts.push(address);
            }
        }
        accounts
    }
}

/// `(chain, address)` pairs from CAIP-10 account ids. Bare addresses are
/// accepted with no chain.
fn session_accounts(accounts: &[String]) -> impl Iterator<Item = (Option<String>, String)> + '_ {
    accounts.iter().filter_map(|raw| {
        let mut parts = raw.rsplitn(2, ':');
        let address = parts.next()?.trim();
        if address.is_empty() {
            return None;
        }
        Some((parts.next().map(str::to_string), normalize_evm(address)))
    })
}

/// Prefer an account on the hinted chain, fall back to the first one.
fn pick_account(accounts: &[String], network: NetworkTier) -> Option<String> {
    let wanted = network.caip2();
    let mut first = None;
    for (chain, address) in session_accounts(accounts) {
        if chain.as_deref() == Some(wanted) {
            return Some(address);
        }
        first.get_or_insert(address);
    }
    first
}
