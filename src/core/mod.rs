//! Shared identifiers and storage key layout.

pub mod ids;
pub mod keys;

pub use ids::{ChainFamily, NetworkTier, ProviderId};
