//! CAIP-2 network identifiers and the supported-network allow-list.
//!
//! Network identifiers follow the [CAIP-2](https://standards.chainagnostic.org/CAIPs/caip-2)
//! `namespace:reference` format. Two namespaces denote the same chain family
//! here: the canonical `eip155` and the `vechain` alias. [`ChainId::normalize`]
//! rewrites the alias to the canonical namespace; supported-network membership
//! is decided by exact string equality against the normalized form.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The canonical CAIP-2 namespace for the supported chain family.
pub const CANONICAL_NAMESPACE: &str = "eip155";

/// Alias namespace denoting the same chain family as [`CANONICAL_NAMESPACE`].
pub const ALIAS_NAMESPACE: &str = "vechain";

/// A CAIP-2 compliant network identifier.
///
/// # Serialization
///
/// Serializes to/from a colon-separated string: `"eip155:100009"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainId {
    /// The chain-family namespace (`eip155` or the `vechain` alias).
    pub namespace: String,
    /// The chain-specific reference (e.g. `100009` for mainnet).
    pub reference: String,
}

impl ChainId {
    /// Creates a chain id from namespace and reference components.
    pub fn new<N: Into<String>, R: Into<String>>(namespace: N, reference: R) -> Self {
        Self {
            namespace: namespace.into(),
            reference: reference.into(),
        }
    }

    /// Parses a CAIP-2 identifier.
    ///
    /// Requires exactly two colon-separated parts and a namespace from the
    /// allow-list. Anything else yields `None`; callers decide whether that
    /// is significant.
    pub fn parse(id: &str) -> Option<Self> {
        let parts: Vec<&str> = id.split(':').collect();
        if parts.len() != 2 {
            return None;
        }
        let (namespace, reference) = (parts[0], parts[1]);
        if reference.is_empty() {
            return None;
        }
        if namespace != CANONICAL_NAMESPACE && namespace != ALIAS_NAMESPACE {
            return None;
        }
        Some(Self::new(namespace, reference))
    }

    /// Rewrites the alias namespace to the canonical one, reference unchanged.
    ///
    /// Unparseable input is returned unchanged; callers must not assume
    /// normalization succeeded.
    pub fn normalize(id: &str) -> String {
        match Self::parse(id) {
            Some(chain_id) => format!("{}:{}", CANONICAL_NAMESPACE, chain_id.reference),
            None => id.to_string(),
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

/// Error returned when parsing an invalid chain id string.
#[derive(Debug, thiserror::Error)]
#[error("Invalid network identifier: {0}")]
pub struct ChainIdFormatError(String);

impl FromStr for ChainId {
    type Err = ChainIdFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChainId::parse(s).ok_or_else(|| ChainIdFormatError(s.into()))
    }
}

impl Serialize for ChainId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ChainId::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Supported VeChain networks.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    /// VeChainThor mainnet (`eip155:100009`).
    #[serde(rename = "vechain")]
    Mainnet,
    /// VeChainThor testnet (`eip155:100010`).
    #[serde(rename = "vechain-testnet")]
    Testnet,
}

impl Network {
    /// Return all known [`Network`] variants.
    pub fn variants() -> &'static [Network] {
        &[Network::Mainnet, Network::Testnet]
    }

    /// Normalized CAIP-2 identifier of this network.
    pub fn caip2(&self) -> &'static str {
        match self {
            Network::Mainnet => "eip155:100009",
            Network::Testnet => "eip155:100010",
        }
    }

    /// Resolves a raw network identifier to a supported network.
    ///
    /// The identifier is normalized first, so both `eip155:100009` and
    /// `vechain:100009` resolve to [`Network::Mainnet`].
    pub fn resolve(id: &str) -> Option<Network> {
        let normalized = ChainId::normalize(id);
        Network::variants()
            .iter()
            .copied()
            .find(|network| network.caip2() == normalized)
    }

    /// Token symbols this facilitator can describe on the network, native
    /// asset included.
    pub fn assets(&self) -> &'static [&'static str] {
        &["VET", "VTHO", "VEUSD", "B3TR"]
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.caip2())
    }
}
