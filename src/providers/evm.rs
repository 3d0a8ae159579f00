//! EVM extension providers over an injected EIP-1193 object.

use super::backend::{Eip1193Backend, EvmSlot};
use super::{bounded, normalize_evm, ConnectOptions, ConnectionResult, LocalAccount, ProviderContext, ProviderDescriptor, WalletProvider};
use crate::core::{ChainFamily, NetworkTier, ProviderId};
use crate::error::{WalletError, WalletResult};
use crate::retry::{retry, retry_when};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-extension behaviour switches.
#[derive(Debug, Clone)]
pub struct EvmVariant {
    pub slot: EvmSlot,
    pub descriptor: ProviderDescriptor,
    /// `wallet_requestPermissions` before `eth_requestAccounts` on a forced prompt.
    pub permission_prompt: bool,
    /// `wallet_revokePermissions` on disconnect.
    pub revoke_on_disconnect: bool,
    /// Poll `selected_address` when the account list comes back empty.
    pub selected_address_fallback: bool,
}

impl EvmVariant {
    pub fn metamask() -> Self {
        Self {
            slot: EvmSlot::MetaMask,
            descriptor: ProviderDescriptor::new(ProviderId::METAMASK, "MetaMask", ChainFamily::Evm),
            permission_prompt: true,
            revoke_on_disconnect: true,
            selected_address_fallback: false,
        }
    }

    pub fn phantom_ethereum() -> Self {
        Self {
            slot: EvmSlot::PhantomEthereum,
            descriptor: ProviderDescriptor::new(ProviderId::PHANTOM_ETHEREUM, "Phantom (Ethereum)", ChainFamily::Evm),
            permission_prompt: false,
            revoke_on_disconnect: false,
            selected_address_fallback: false,
        }
    }

    pub fn coinbase() -> Self {
        Self {
            slot: EvmSlot::Coinbase,
            descriptor: ProviderDescriptor::new(ProviderId::COINBASE, "Coinbase Wallet", ChainFamily::Evm),
            permission_prompt: false,
            revoke_on_disconnect: false,
            selected_address_fallback: true,
        }
    }
}

pub struct EvmProvider {
    variant: EvmVariant,
    ctx: ProviderContext,
    account: LocalAccount,
}

impl EvmProvider {
    pub fn new(variant: EvmVariant, ctx: ProviderContext) -> Self {
        let account = LocalAccount::new(ctx.store.clone(), &variant.descriptor.id);
        Self { variant, ctx, account }
    }

    pub fn metamask(ctx: ProviderContext) -> Self { Self::new(EvmVariant::metamask(), ctx) }
    pub fn phantom_ethereum(ctx: ProviderContext) -> Self { Self::new(EvmVariant::phantom_ethereum(), ctx) }
    pub fn coinbase(ctx: ProviderContext) -> Self { Self::new(EvmVariant::coinbase(), ctx) }

    fn name(&self) -> &str { &self.variant.descriptor.name }

    fn backend(&self) -> Option<Arc<dyn Eip1193Backend>> { self.ctx.env.evm(self.variant.slot) }

    /// Extensions inject asynchronously; give them a bounded head start.
    async fn wait_for_backend(&self) -> WalletResult<Arc<dyn Eip1193Backend>> {
        retry(
            &self.ctx.config.injection,
            |_| async move { self.backend().ok_or_else(|| WalletError::BackendAbsent(self.name().to_string())) },
            |_, attempt| debug!(provider = self.name(), attempt, "waiting for injected provider"),
        )
        .await
    }

    async fn silent_accounts(&self, backend: &Arc<dyn Eip1193Backend>) -> WalletResult<Vec<String>> {
        let value = bounded(self.ctx.config.probe_timeout, "eth_accounts", backend.request("eth_accounts", json!([]))).await?;
        Ok(parse_accounts(&value))
    }

    async fn request_accounts(&self, backend: &Arc<dyn Eip1193Backend>, options: &ConnectOptions) -> WalletResult<Vec<String>> {
        let config = &self.ctx.config;
        if options.force_prompt && self.variant.permission_prompt {
            let permissions = backend.request("wallet_requestPermissions", json!([{ "eth_accounts": {} }]));
            match bounded(config.request_timeout, "wallet_requestPermissions", permissions).await {
                Ok(_) => {}
                Err(WalletError::Backend(msg)) => debug!(provider = self.name(), error = %msg, "permission request unsupported"),
                Err(e) => return Err(e),
            }
        }
        retry_when(
            &config.request,
            |e: &WalletError| e.is_transient(),
            |_| async move {
                let value = bounded(config.request_timeout, "eth_requestAccounts", backend.request("eth_requestAccounts", json!([]))).await?;
                Ok(parse_accounts(&value))
            },
            |e, attempt| warn!(provider = self.name(), attempt, error = %e, "account request failed, retrying"),
        )
        .await
    }

    async fn first_account(&self, backend: &Arc<dyn Eip1193Backend>, accounts: Vec<String>) -> WalletResult<String> {
        if let Some(first) = accounts.into_iter().next() {
            return Ok(first);
        }
        if !self.variant.selected_address_fallback {
            return Err(WalletError::Backend(format!("{} returned no accounts", self.name())));
        }
        retry(
            &self.ctx.config.account_population,
            |_| async move {
                backend
                    .selected_address()
                    .map(|a| normalize_evm(&a))
                    .filter(|a| !a.is_empty())
                    .ok_or_else(|| WalletError::Timeout("selected address".into()))
            },
            |_, attempt| debug!(provider = self.name(), attempt, "selected address not populated yet"),
        )
        .await
    }

    /// Best effort: a wrong chain never fails the connection.
    async fn ensure_chain(&self, backend: &Arc<dyn Eip1193Backend>, network: NetworkTier) {
        let expected = network.evm_chain_id();
        let current = bounded(self.ctx.config.probe_timeout, "eth_chainId", backend.request("eth_chainId", json!([]))).await;
        match current {
            Ok(Value::String(chain)) if chain.eq_ignore_ascii_case(expected) => {}
            Ok(other) => {
                debug!(provider = self.name(), current = %other, expected, "switching chain");
                let switch = backend.request("wallet_switchEthereumChain", json!([{ "chainId": expected }]));
                if let Err(e) = bounded(self.ctx.config.request_timeout, "wallet_switchEthereumChain", switch).await {
                    warn!(provider = self.name(), error = %e, expected, "chain switch declined");
                }
            }
            Err(e) => debug!(provider = self.name(), error = %e, "chain id unavailable"),
        }
    }

    async fn establish(&self, backend: &Arc<dyn Eip1193Backend>, options: &ConnectOptions) -> WalletResult<String> {
        if !options.force_prompt {
            match self.silent_accounts(backend).await {
                Ok(accounts) if !accounts.is_empty() => {
                    debug!(provider = self.name(), "silent reconnect");
                    return self.first_account(backend, accounts).await;
                }
                Ok(_) => {}
                Err(e) => debug!(provider = self.name(), error = %e, "silent account probe failed"),
            }
        }
        let accounts = self.request_accounts(backend, options).await?;
        self.first_account(backend, accounts).await
    }
}

#[async_trait]
impl WalletProvider for EvmProvider {
    fn descriptor(&self) -> &ProviderDescriptor { &self.variant.descriptor }

    async fn is_available(&self) -> bool { self.backend().is_some() }

    async fn connect(&self, options: &ConnectOptions) -> ConnectionResult {
        let backend = match self.wait_for_backend().await {
            Ok(backend) => backend,
            Err(e) => {
                info!(provider = self.name(), "extension not injected");
                return ConnectionResult::failed(&e);
            }
        };
        match self.establish(&backend, options).await {
            Ok(address) => {
                self.ensure_chain(&backend, options.network).await;
                if let Err(e) = self.account.set(&address) {
                    return ConnectionResult::failed(&e);
                }
                info!(provider = self.name(), address = %address, "connected");
                ConnectionResult::connected(self.variant.descriptor.id.clone(), address)
            }
            Err(e) => {
                info!(provider = self.name(), error = %e, "connect failed");
                ConnectionResult::failed(&e)
            }
        }
    }

    async fn disconnect(&self) -> bool {
        if self.variant.revoke_on_disconnect {
            if let Some(backend) = self.backend() {
                let revoke = backend.request("wallet_revokePermissions", json!([{ "eth_accounts": {} }]));
                if let Err(e) = bounded(self.ctx.config.probe_timeout, "wallet_revokePermissions", revoke).await {
                    debug!(provider = self.name(), error = %e, "permission revoke failed");
                }
            }
        }
        self.account.clear()
    }

    async fn verify_connection(&self) -> bool {
        let Some(expected) = self.account.get() else { return false };
        let Some(backend) = self.backend() else { return false };
        if !backend.is_connected() {
            return false;
        }
        let mut accounts = match self.silent_accounts(&backend).await {
            Ok(accounts) => accounts,
            Err(e) => {
                debug!(provider = self.name(), error = %e, "verification probe failed");
                return false;
            }
        };
        if accounts.is_empty() && self.variant.selected_address_fallback {
            accounts.extend(backend.selected_address().map(|a| normalize_evm(&a)));
        }
        match accounts.first() {
            Some(actual) if *actual == expected => true,
            Some(actual) => {
                let mismatch = WalletError::AddressMismatch { expected, actual: actual.clone() };
                debug!(provider = self.name(), error = %mismatch, "verification failed");
                false
            }
            None => false,
        }
    }

    async fn get_accounts(&self) -> Vec<String> {
        let Some(backend) = self.backend() else { return Vec::new() };
        self.silent_accounts(&backend).await.unwrap_or_default()
    }
}

fn parse_accounts(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(normalize_evm)
                .filter(|a| !a.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accounts_are_normalized() {
        let accounts = parse_accounts(&json!(["0xABCdef", " 0x123 ", 7, ""]));
        assert_eq!(accounts, vec!["0xabcdef", "0x123"]);
        assert!(parse_accounts(&json!(null)).is_empty());
    }

    #[test]
    fn variants_have_distinct_ids() {
        let ids = [EvmVariant::metamask(), EvmVariant::phantom_ethereum(), EvmVariant::coinbase()]
            .map(|v| v.descriptor.id);
        assert_eq!(ids, [ProviderId::METAMASK, ProviderId::PHANTOM_ETHEREUM, ProviderId::COINBASE]);
    }
}
