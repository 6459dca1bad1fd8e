//! Additional Ethereum RPC types.

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize, Serializer};

/// A block reference.
#[derive(Clone, Copy, Debug)]
pub enum Block {
    /// The latest block.
    Latest,
    /// The pending block.
    Pending,
}

impl Serialize for Block {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Latest => serializer.serialize_str("latest"),
            Self::Pending => serializer.serialize_str("pending"),
        }
    }
}

/// The network a request is targeting.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Network {
    /// Human readable network name.
    pub name: String,
    /// The chain ID as a decimal string.
    #[serde(rename = "chainID", alias = "chain_id")]
    pub chain_id: String,
}

impl Network {
    /// Returns the numeric chain ID of the network.
    pub fn chain_id(&self) -> Result<u64> {
        self.chain_id
            .parse()
            .with_context(|| format!("invalid chain ID '{}' for {}", self.chain_id, self.name))
    }
}
