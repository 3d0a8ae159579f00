//! Solana extension provider.
//!
//! The injected object resolves `connect` before its public key is readable,
//! so a successful connect is followed by a bounded poll. When the poll runs
//! dry the environment is nudged (focus, then refresh) and checked once after
//! each nudge before giving up.

use super::backend::{Nudge, SolanaBackend};
use super::{bounded, ConnectOptions, ConnectionResult, LocalAccount, ProviderContext, ProviderDescriptor, WalletProvider};
use crate::core::{ChainFamily, NetworkTier, ProviderId};
use crate::error::{WalletError, WalletResult};
use crate::retry::{retry, retry_when};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct PhantomSolanaProvider {
    descriptor: ProviderDescriptor,
    ctx: ProviderContext,
    account: LocalAccount,
}

impl PhantomSolanaProvider {
    pub fn new(ctx: ProviderContext) -> Self {
        let descriptor = ProviderDescriptor::new(ProviderId::PHANTOM_SOLANA, "Phantom (Solana)", ChainFamily::Solana);
        let account = LocalAccount::new(ctx.store.clone(), &descriptor.id);
        Self { descriptor, ctx, account }
    }

    fn backend(&self) -> Option<Arc<dyn SolanaBackend>> { self.ctx.env.solana() }

    async fn wait_for_backend(&self) -> WalletResult<Arc<dyn SolanaBackend>> {
        retry(
            &self.ctx.config.injection,
            |_| async move { self.backend().ok_or_else(|| WalletError::BackendAbsent(self.descriptor.name.clone())) },
            |_, attempt| debug!(attempt, "waiting for injected Solana provider"),
        )
        .await
    }

    /// Trusted connect: succeeds only for an already-approved site.
    async fn silent_connect(&self, backend: &Arc<dyn SolanaBackend>) -> Option<String> {
        if backend.is_connected() {
            if let Some(key) = backend.public_key() {
                return Some(key);
            }
        }
        match bounded(self.ctx.config.probe_timeout, "trusted connect", backend.connect(true)).await {
            Ok(()) => backend.public_key(),
            Err(e) => {
                debug!(error = %e, "trusted connect declined");
                None
            }
        }
    }

    async fn prompted_connect(&self, backend: &Arc<dyn SolanaBackend>) -> WalletResult<String> {
        let config = &self.ctx.config;
        retry_when(
            &config.request,
            |e: &WalletError| e.is_transient(),
            |_| async move { bounded(config.request_timeout, "Phantom approval", backend.connect(false)).await },
            |e, attempt| warn!(attempt, error = %e, "Solana connect failed, retrying"),
        )
        .await?;
        self.await_public_key(backend).await
    }

    async fn await_public_key(&self, backend: &Arc<dyn SolanaBackend>) -> WalletResult<String> {
        let polled = retry(
            &self.ctx.config.account_population,
            |_| async move { backend.public_key().ok_or_else(|| WalletError::Timeout("Solana public key".into())) },
            |_, attempt| debug!(attempt, "public key not populated yet"),
        )
        .await;
        let err = match polled {
            Ok(key) => return Ok(key),
            Err(e) => e,
        };
        for nudge in [Nudge::Focus, Nudge::Refresh] {
            self.ctx.env.nudge(nudge);
            tokio::time::sleep(self.ctx.config.account_population.max_delay).await;
            if let Some(key) = backend.public_key() {
                info!(?nudge, "public key appeared after nudge");
                return Ok(key);
            }
        }
        Err(err)
    }
}

#[async_trait]
impl WalletProvider for PhantomSolanaProvider {
    fn descriptor(&self) -> &ProviderDescriptor { &self.descriptor }

    async fn is_available(&self) -> bool { self.backend().is_some() }

    async fn connect(&self, options: &ConnectOptions) -> ConnectionResult {
        let backend = match self.wait_for_backend().await {
            Ok(backend) => backend,
            Err(e) => return ConnectionResult::failed(&e),
        };
        if options.network == NetworkTier::Testnet {
            // cluster selection lives in the extension UI
            debug!("testnet requested, Solana cluster left to the wallet");
        }
        let silent = if options.force_prompt { None } else { self.silent_connect(&backend).await };
        let key = match silent {
            Some(key) => Ok(key),
            None => self.prompted_connect(&backend).await,
        };
        match key {
            Ok(key) => {
                if let Err(e) = self.account.set(&key) {
                    return ConnectionResult::failed(&e);
                }
                info!(address = %key, "Solana wallet connected");
                ConnectionResult::connected(self.descriptor.id.clone(), key)
            }
            Err(e) => {
                info!(error = %e, "Solana connect failed");
                ConnectionResult::failed(&e)
            }
        }
    }

    async fn disconnect(&self) -> bool {
        if let Some(backend) = self.backend() {
            if let Err(e) = bounded(self.ctx.config.probe_timeout, "Solana disconnect", backend.disconnect()).await {
                debug!(error = %e, "backend disconnect failed");
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
        match backend.public_key() {
            Some(actual) if actual == expected => true,
            Some(actual) => {
                debug!(error = %WalletError::AddressMismatch { expected, actual }, "verification failed");
                false
            }
            None => false,
        }
    }

    async fn get_accounts(&self) -> Vec<String> {
        self.backend()
            .filter(|b| b.is_connected())
            .and_then(|b| b.public_key())
            .into_iter()
            .collect()
    }
}
