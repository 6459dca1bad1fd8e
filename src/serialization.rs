//! Module containing serialization helpers.

use alloy_primitives::Address;
use serde::{de, Deserialize, Deserializer};
use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::Deref,
    str::FromStr,
};

/// A value that is deserialized from its string representation.
#[derive(Clone, Debug)]
pub struct Str<T>(pub T);

impl<T> Deref for Str<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de, T> Deserialize<'de> for Str<T>
where
    T: FromStr,
    T::Err: Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map(Str).map_err(de::Error::custom)
    }
}

/// Debug formatting for a list of addresses using their checksummed form.
pub struct Addresses<'a>(pub &'a [Address]);

impl Debug for Addresses<'_> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let mut list = f.debug_list();
        for address in self.0 {
            list.entry(&format_args!("{address}"));
        }
        list.finish()
    }
}

/// Message payload decoding for `personal_sign` and `eth_sign`.
///
/// dApps send either `0x`-prefixed hex data or plain UTF-8 text, so hex is
/// tried first and anything that does not decode is signed as text.
pub mod message {
    pub fn decode(message: &str) -> Vec<u8> {
        message
            .strip_prefix("0x")
            .and_then(|hex| hex::decode(hex).ok())
            .unwrap_or_else(|| message.as_bytes().to_vec())
    }

    pub fn encode(message: &[u8]) -> String {
        format!("0x{}", hex::encode(message))
    }
}

/// Result serialization.
pub mod result {
    use serde::{
        de::{self, Deserializer},
        ser::Serializer,
        Deserialize, Serialize,
    };

    #[derive(Deserialize, Serialize)]
    struct Res<T, E> {
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<T>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<E>,
    }

    pub fn serialize<S, T, E>(result: &Result<T, E>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
        E: Serialize,
    {
        match result {
            Ok(result) => Res {
                result: Some(result),
                error: None,
            },
            Err(error) => Res {
                result: None,
                error: Some(error),
            },
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D, T, E>(deserializer: D) -> Result<Result<T, E>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
        E: Deserialize<'de>,
    {
        match Res::<T, E>::deserialize(deserializer)? {
            Res {
                result: Some(result),
                error: None,
            } => Ok(Ok(result)),
            Res {
                result: None,
                error: Some(error),
            } => Ok(Err(error)),
            Res {
                result: None,
                error: None,
            } => Err(de::Error::custom("missing result or error")),
            Res {
                result: Some(_),
                error: Some(_),
            } => Err(de::Error::custom("both result and error specified")),
        }
    }
}
