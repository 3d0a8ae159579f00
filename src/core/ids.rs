//! Identifiers shared by providers, sessions and profiles.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Wallet provider identifier (`metamask`, `phantom-solana`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(Cow<'static, str>);

impl ProviderId {
    pub const METAMASK: ProviderId = ProviderId::from_static("metamask");
    pub const PHANTOM_SOLANA: ProviderId = ProviderId::from_static("phantom-solana");
    pub const PHANTOM_ETHEREUM: ProviderId = ProviderId::from_static("phantom-ethereum");
    pub const COINBASE: ProviderId = ProviderId::from_static("coinbase");
    pub const WALLETCONNECT: ProviderId = ProviderId::from_static("walletconnect");

    pub const fn from_static(id: &'static str) -> Self { Self(Cow::Borrowed(id)) }

    pub fn new(id: impl Into<String>) -> Self { Self(Cow::Owned(id.into())) }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self { Self::new(id) }
}

impl PartialEq<str> for ProviderId {
    fn eq(&self, other: &str) -> bool { self.as_str() == other }
}

impl PartialEq<&str> for ProviderId {
    fn eq(&self, other: &&str) -> bool { self.as_str() == *other }
}

/// Network tier a provider supports and a connect call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkTier {
    #[default]
    Mainnet,
    Testnet,
}

impl NetworkTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkTier::Mainnet => "mainnet",
            NetworkTier::Testnet => "testnet",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "production" | "main" => Some(NetworkTier::Mainnet),
            "testnet" | "test" | "devnet" | "sepolia" => Some(NetworkTier::Testnet),
            _ => None,
        }
    }

    /// EIP-155 chain id (hex) used for EVM chain checks.
    pub fn evm_chain_id(&self) -> &'static str {
        match self {
            NetworkTier::Mainnet => "0x1",
            NetworkTier::Testnet => "0xaa36a7",
        }
    }

    /// CAIP-2 chain reference for the pairing protocol.
    pub fn caip2(&self) -> &'static str {
        match self {
            NetworkTier::Mainnet => "eip155:1",
            NetworkTier::Testnet => "eip155:11155111",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Evm,
    Solana,
}

impl ChainFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainFamily::Evm => "evm",
            ChainFamily::Solana => "solana",
        }
    }
}
