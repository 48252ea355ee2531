//! Chains the provider will switch to and their display labels.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Closed set of chain identifiers accepted by `switch_chain`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChainId {
    #[default]
    X1Mainnet,
    X1Testnet,
    SolanaMainnet,
    SolanaDevnet,
    SolanaTestnet,
}

impl ChainId {
    pub const ALL: [ChainId; 5] = [
        Self::X1Mainnet,
        Self::X1Testnet,
        Self::SolanaMainnet,
        Self::SolanaDevnet,
        Self::SolanaTestnet,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::X1Mainnet => "x1:mainnet",
            Self::X1Testnet => "x1:testnet",
            Self::SolanaMainnet => "solana:mainnet",
            Self::SolanaDevnet => "solana:devnet",
            Self::SolanaTestnet => "solana:testnet",
        }
    }

    /// Human-readable network name shown to dApps.
    pub fn network_label(self) -> &'static str {
        match self {
            Self::X1Mainnet => "X1 Mainnet",
            Self::X1Testnet => "X1 Testnet",
            Self::SolanaMainnet => "Solana Mainnet",
            Self::SolanaDevnet => "Solana Devnet",
            Self::SolanaTestnet => "Solana Testnet",
        }
    }

    pub fn info(self) -> NetworkInfo {
        NetworkInfo {
            network: self.network_label().to_string(),
            chain: self,
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainId {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|chain| chain.as_str() == s)
            .ok_or_else(|| GatewayError::UnsupportedChain(s.to_string()))
    }
}

impl TryFrom<String> for ChainId {
    type Error = GatewayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChainId> for String {
    fn from(chain: ChainId) -> Self {
        chain.as_str().to_string()
    }
}

/// `{network, chain}` pair returned by `get_network` and carried in
/// `networkChanged` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub network: String,
    pub chain: ChainId,
}
