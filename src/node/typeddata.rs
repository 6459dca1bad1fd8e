//! Typed data for RPC calls.
//!
//! This is just a thin wrapper around `alloy_dyn_abi::eip712::TypedData` that
//! keeps track of its original JSON blob so it can debug and re-serialize it.

use super::types::Network;
use ethnum::U256;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::{
    fmt::{self, Debug, Formatter},
    ops::Deref,
};

/// Inner actual `TypedData` implementation.
type Inner = alloy_dyn_abi::eip712::TypedData;

/// A wrapper type around `alloy_dyn_abi::eip712::TypedData` that implements
/// JSON serialization and debug printing.
pub struct TypedData {
    raw: Value,
    inner: Inner,
    chain_id: Option<U256>,
}

impl TypedData {
    /// Returns the chain ID declared in the typed data domain, if any.
    pub fn chain_id(&self) -> Option<U256> {
        self.chain_id
    }

    /// Verifies the typed data domain is compatible with the target network.
    ///
    /// Returns the declared chain ID on mismatch.
    pub fn verify(&self, network: &Network) -> Result<(), U256> {
        match self.chain_id() {
            Some(chain_id) if network.chain_id().ok().map(U256::from) != Some(chain_id) => {
                Err(chain_id)
            }
            _ => Ok(()),
        }
    }
}

impl Deref for TypedData {
    type Target = Inner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Debug for TypedData {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl Serialize for TypedData {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TypedData {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        let inner = serde_json::from_value(raw.clone()).map_err(de::Error::custom)?;

        // Be extra permissive with `chainId` because EIP-712 doesn't really
        // standardize its representation.
        let chain_id = match &raw["domain"]["chainId"] {
            Value::Null => None,
            Value::Number(value) if value.is_u64() => value.as_u64().map(U256::from),
            Value::String(value) => {
                let (s, radix) = match value.strip_prefix("0x") {
                    Some(s) => (s, 16),
                    None => (&**value, 10),
                };
                Some(U256::from_str_radix(s, radix).map_err(de::Error::custom)?)
            }
            other => {
                return Err(de::Error::custom(format!(
                    "invalid chain ID value in domain '{other}'"
                )))
            }
        };

        Ok(Self {
            raw,
            inner,
            chain_id,
        })
    }
}
