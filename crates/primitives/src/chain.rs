use std::{fmt, str};

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Chain family, derived from the CAIP-2 namespace.
///
/// Determines which adapter and outbound builder a chain uses.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ChainFamily {
    /// EVM chains (`eip155:*`).
    Evm,
    /// Solana-style chains (`solana:*`).
    Svm,
}

/// A CAIP-2 chain identifier, e.g. `eip155:1` or `solana:mainnet`.
#[derive(
    Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, BorshSerialize, BorshDeserialize,
    Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct ChainRef {
    namespace: String,
    reference: String,
}

impl ChainRef {
    pub fn new(namespace: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            reference: reference.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Resolves the adapter family for this chain.
    ///
    /// Unknown namespaces are an error at config load, not here.
    pub fn family(&self) -> Option<ChainFamily> {
        match self.namespace.as_str() {
            "eip155" => Some(ChainFamily::Evm),
            "solana" => Some(ChainFamily::Svm),
            _ => None,
        }
    }

    /// The numeric chain id for EVM chains.
    pub fn evm_chain_id(&self) -> Option<u64> {
        (self.family() == Some(ChainFamily::Evm))
            .then(|| self.reference.parse().ok())
            .flatten()
    }
}

impl fmt::Display for ChainRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

/// Error parsing a CAIP-2 chain identifier.
#[derive(Debug, Clone, Error)]
#[error("invalid CAIP-2 chain id: {0}")]
pub struct ParseChainRefError(String);

impl str::FromStr for ChainRef {
    type Err = ParseChainRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, reference) = s
            .split_once(':')
            .ok_or_else(|| ParseChainRefError(s.to_owned()))?;
        if namespace.is_empty() || reference.is_empty() || reference.contains(':') {
            return Err(ParseChainRefError(s.to_owned()));
        }
        Ok(Self::new(namespace, reference))
    }
}

impl TryFrom<String> for ChainRef {
    type Error = ParseChainRefError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChainRef> for String {
    fn from(value: ChainRef) -> Self {
        value.to_string()
    }
}
